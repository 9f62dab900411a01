// =============================================================================
// Venue adapter contract and shared per-venue caches
// =============================================================================
//
// Every venue exposes the same operations behind the `Exchange` trait; the
// caches every adapter maintains (rules, last BBOs, live orders, positions,
// account) live in `ExchangeState` so the strategy can read a consistent
// local view without touching the network.
//
// Symbol reconciliation: venues list 1000×-scaled meme coins as `1000X`.
// Reads through `get_rule` / `get_last_bbo` unify those with a plain `X`
// listing; BBO prices divide by 1000 and amounts multiply by 1000 so both
// venues are compared in the same coin units. Trading stays in native units
// of whichever venue holds the contract.
// =============================================================================

pub mod binance;
pub mod gate;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::info;

use crate::models::{
    Account, Bbo, ContractRule, Order, OrderType, Position, Side, TradeSide,
};

/// Orders-map capacity; beyond this the oldest entries are dropped.
const ORDERS_CAP: usize = 500;
/// Entries retained after a trim.
const ORDERS_KEEP: usize = 100;

/// Default taker fee applied when computing close profitability.
pub const DEFAULT_TAKER_FEE_RATE: f64 = 0.0005;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Fan-in events flowing from every adapter to the trader.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Bbo(Bbo),
    Order(Order),
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Uniform venue interface. Long-running `listen_*` methods never return
/// under normal operation; they are spawned as process-lifetime tasks.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Local caches and event sink.
    fn state(&self) -> &ExchangeState;

    /// Idempotently configure cross margin and dual-side position mode.
    async fn init(&self, symbols: &[String]) -> Result<()>;

    /// Subscribe the public BBO stream for one symbol.
    async fn listen_public(self: Arc<Self>, symbol: String);

    /// Subscribe the private account/order stream.
    async fn listen_private(self: Arc<Self>);

    /// Start the WS-API request/response pool with `count` connections.
    async fn listen_ws_api(self: Arc<Self>, count: usize);

    /// One-shot REST fetch of all contract rules, keyed by native symbol.
    async fn get_rules(&self) -> Result<HashMap<String, ContractRule>>;

    /// Submit an order over the WS-API pool.
    /// Returns `(order_id, error)`; a failed submission has an empty id and
    /// a non-empty error.
    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        trade_side: TradeSide,
        order_type: OrderType,
        amount: f64,
        price: f64,
    ) -> (String, String);

    async fn cancel_order(&self, id: &str, symbol: &str) -> Result<()>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()>;

    /// REST snapshot of open orders, used to replace the local cache on
    /// (re)connect.
    async fn get_orders(&self) -> Result<HashMap<String, Order>>;

    /// REST snapshot of open positions, used to replace the local cache on
    /// (re)connect and after every trade round.
    async fn get_positions(&self) -> Result<HashMap<String, Position>>;

    /// Set leverage for one native symbol. Returns an error description on
    /// rejection (leverage failures are per-symbol, not fatal).
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Option<String>;

    async fn set_margin_mode(&self, symbol: &str) -> Result<()>;

    async fn set_position_mode(&self, symbol: &str) -> Result<()>;

    /// Refresh the account balance snapshot.
    async fn update_balance(&self) -> Result<()>;

    fn name(&self) -> &'static str {
        self.state().name
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Per-venue caches, mutated only by that venue's own handlers and read by
/// the trader/strategy through snapshots taken under lock.
pub struct ExchangeState {
    pub name: &'static str,
    pub taker_fee_rate: f64,
    rules: RwLock<HashMap<String, ContractRule>>,
    bbos: RwLock<HashMap<String, Bbo>>,
    orders: RwLock<HashMap<String, Order>>,
    positions: RwLock<HashMap<String, Position>>,
    account: RwLock<Account>,
    events: RwLock<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

impl ExchangeState {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            taker_fee_rate: DEFAULT_TAKER_FEE_RATE,
            rules: RwLock::new(HashMap::new()),
            bbos: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            positions: RwLock::new(HashMap::new()),
            account: RwLock::new(Account::default()),
            events: RwLock::new(None),
        }
    }

    /// Register the trader's event channel. Adapters publish BBO and order
    /// events through this sink; the trader owns the single receiver.
    pub fn set_event_sink(&self, tx: mpsc::UnboundedSender<EngineEvent>) {
        *self.events.write() = Some(tx);
    }

    pub fn emit(&self, event: EngineEvent) {
        if let Some(tx) = self.events.read().as_ref() {
            let _ = tx.send(event);
        }
    }

    // -------------------------------------------------------------------------
    // Rules
    // -------------------------------------------------------------------------

    pub fn replace_rules(&self, rules: HashMap<String, ContractRule>) {
        *self.rules.write() = rules;
    }

    /// Rule lookup with `1000X` unification. The returned rule is the native
    /// listing (its `symbol` names the venue's own contract).
    pub fn get_rule(&self, symbol: &str) -> Option<ContractRule> {
        let rules = self.rules.read();
        rules
            .get(symbol)
            .or_else(|| rules.get(&format!("1000{symbol}")))
            .or_else(|| rules.get(symbol.replace("1000", "").as_str()))
            .cloned()
    }

    pub fn rule_symbols(&self) -> Vec<String> {
        self.rules.read().keys().cloned().collect()
    }

    pub fn set_trade_leverage(&self, symbol: &str, leverage: u32) {
        let mut rules = self.rules.write();
        let key = if rules.contains_key(symbol) {
            symbol.to_string()
        } else if rules.contains_key(&format!("1000{symbol}")) {
            format!("1000{symbol}")
        } else {
            symbol.replace("1000", "")
        };
        if let Some(rule) = rules.get_mut(&key) {
            rule.trade_leverage = leverage;
        }
    }

    // -------------------------------------------------------------------------
    // BBOs
    // -------------------------------------------------------------------------

    /// Store the latest BBO under its native symbol.
    pub fn upsert_bbo(&self, bbo: Bbo) {
        self.bbos.write().insert(bbo.symbol.clone(), bbo);
    }

    /// Latest BBO with `1000X` unification: a stored `1000X` snapshot is
    /// returned with prices ÷ 1000 and amounts × 1000 so both venues read in
    /// plain coin units.
    pub fn get_last_bbo(&self, symbol: &str) -> Option<Bbo> {
        let bbos = self.bbos.read();
        let bbo = bbos
            .get(symbol)
            .or_else(|| bbos.get(&format!("1000{symbol}")))
            .or_else(|| bbos.get(symbol.replace("1000", "").as_str()))?;

        let mut bbo = bbo.clone();
        if bbo.symbol.starts_with("1000") {
            bbo.bid /= 1000.0;
            bbo.ask /= 1000.0;
            bbo.bid_amount *= 1000.0;
            bbo.ask_amount *= 1000.0;
        }
        Some(bbo)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// Apply a private-stream order update: terminal statuses evict, live
    /// ones upsert. The map is bounded; on overflow only the newest
    /// [`ORDERS_KEEP`] entries by creation time survive.
    pub fn apply_order(&self, order: &Order) {
        let mut orders = self.orders.write();
        if order.status.is_terminal() {
            orders.remove(&order.id);
        } else {
            orders.insert(order.id.clone(), order.clone());
        }

        if orders.len() > ORDERS_CAP {
            let mut entries: Vec<(String, i64)> = orders
                .iter()
                .map(|(id, o)| (id.clone(), o.c_time_ms))
                .collect();
            entries.sort_by_key(|(_, t)| *t);
            let cutoff = entries.len() - ORDERS_KEEP;
            for (id, _) in entries.into_iter().take(cutoff) {
                orders.remove(&id);
            }
        }
    }

    pub fn replace_orders(&self, orders: HashMap<String, Order>) {
        *self.orders.write() = orders;
    }

    pub fn orders_snapshot(&self) -> HashMap<String, Order> {
        self.orders.read().clone()
    }

    pub fn orders_len(&self) -> usize {
        self.orders.read().len()
    }

    // -------------------------------------------------------------------------
    // Positions
    // -------------------------------------------------------------------------

    /// Apply a position update: zero amount evicts, anything else upserts.
    pub fn apply_position(&self, position: Position) {
        let mut positions = self.positions.write();
        if position.amount == 0.0 {
            if positions.remove(&position.id).is_some() {
                info!(
                    venue = self.name,
                    id = %position.id,
                    "position closed"
                );
            }
            return;
        }

        let verb = if positions.contains_key(&position.id) {
            "updated"
        } else {
            "opened"
        };
        info!(
            venue = self.name,
            id = %position.id,
            side = %position.side,
            price = position.price,
            amount = position.amount,
            "position {verb}"
        );
        positions.insert(position.id.clone(), position);
    }

    pub fn replace_positions(&self, positions: HashMap<String, Position>) {
        *self.positions.write() = positions;
    }

    pub fn positions_snapshot(&self) -> HashMap<String, Position> {
        self.positions.read().clone()
    }

    /// First live position for `symbol`, any side.
    pub fn find_position(&self, symbol: &str) -> Option<Position> {
        self.positions
            .read()
            .values()
            .find(|p| p.symbol == symbol && p.amount != 0.0)
            .cloned()
    }

    // -------------------------------------------------------------------------
    // Account
    // -------------------------------------------------------------------------

    pub fn account(&self) -> Account {
        self.account.read().clone()
    }

    pub fn update_account(&self, f: impl FnOnce(&mut Account)) {
        f(&mut self.account.write());
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Parse a JSON value that may be either a string or a number into `f64`.
pub fn json_f64(val: &Value) -> f64 {
    if let Some(s) = val.as_str() {
        s.parse().unwrap_or(0.0)
    } else {
        val.as_f64().unwrap_or(0.0)
    }
}

/// Parse a JSON value that may be either a string or a number into `i64`.
pub fn json_i64(val: &Value) -> i64 {
    if let Some(s) = val.as_str() {
        s.parse().unwrap_or(0)
    } else if let Some(n) = val.as_i64() {
        n
    } else {
        val.as_f64().unwrap_or(0.0) as i64
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderStatus;

    fn bbo(symbol: &str, bid: f64, ask: f64) -> Bbo {
        Bbo {
            symbol: symbol.to_string(),
            bid,
            bid_amount: 100.0,
            ask,
            ask_amount: 200.0,
            time_ms: 1_700_000_000_000,
        }
    }

    fn order(id: &str, status: OrderStatus, c_time_ms: i64) -> Order {
        Order {
            venue: "Test".into(),
            symbol: "ARPAUSDT".into(),
            id: id.into(),
            status,
            side: Side::Buy,
            trade_side: TradeSide::Open,
            price: 1.0,
            amount: 1.0,
            deal_price: 0.0,
            deal_amount: 0.0,
            c_time_ms,
        }
    }

    fn position(symbol: &str, side: Side, amount: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            id: Position::key(symbol, side),
            side,
            price: 1.0,
            amount,
            c_time_ms: 0,
        }
    }

    #[test]
    fn last_bbo_scales_thousand_listings() {
        let state = ExchangeState::new("Test");
        state.upsert_bbo(bbo("1000PEPEUSDT", 8.0, 9.0));

        // Requested under the unscaled name: prices ÷ 1000, amounts × 1000.
        let b = state.get_last_bbo("PEPEUSDT").unwrap();
        assert!((b.bid - 0.008).abs() < 1e-12);
        assert!((b.ask - 0.009).abs() < 1e-12);
        assert!((b.bid_amount - 100_000.0).abs() < 1e-9);
        assert!((b.ask_amount - 200_000.0).abs() < 1e-9);

        // Requested under the native scaled name: same normalized view.
        let b = state.get_last_bbo("1000PEPEUSDT").unwrap();
        assert!((b.bid - 0.008).abs() < 1e-12);
    }

    #[test]
    fn last_bbo_plain_listing_untouched() {
        let state = ExchangeState::new("Test");
        state.upsert_bbo(bbo("ARPAUSDT", 0.0461, 0.0462));
        let b = state.get_last_bbo("ARPAUSDT").unwrap();
        assert!((b.bid - 0.0461).abs() < 1e-12);
        assert!((b.bid_amount - 100.0).abs() < 1e-12);
    }

    #[test]
    fn rule_lookup_unifies_thousand_listings() {
        let state = ExchangeState::new("Test");
        let mut rules = HashMap::new();
        rules.insert("1000PEPEUSDT".to_string(), ContractRule::new("1000PEPEUSDT"));
        state.replace_rules(rules);

        assert!(state.get_rule("PEPEUSDT").is_some());
        assert!(state.get_rule("1000PEPEUSDT").is_some());
        assert!(state.get_rule("ARPAUSDT").is_none());

        state.set_trade_leverage("PEPEUSDT", 7);
        assert_eq!(state.get_rule("PEPEUSDT").unwrap().trade_leverage, 7);
    }

    #[test]
    fn terminal_order_evicts_live_order_upserts() {
        let state = ExchangeState::new("Test");
        state.apply_order(&order("1", OrderStatus::New, 1));
        state.apply_order(&order("2", OrderStatus::PartiallyFilled, 2));
        assert_eq!(state.orders_len(), 2);

        state.apply_order(&order("1", OrderStatus::Filled, 1));
        assert_eq!(state.orders_len(), 1);

        state.apply_order(&order("2", OrderStatus::Canceled, 2));
        assert_eq!(state.orders_len(), 0);
    }

    #[test]
    fn orders_trim_keeps_newest_hundred() {
        let state = ExchangeState::new("Test");
        for i in 0..501 {
            state.apply_order(&order(&format!("id-{i}"), OrderStatus::New, i));
        }
        assert_eq!(state.orders_len(), 100);
        let survivors = state.orders_snapshot();
        // Newest by creation time survive.
        assert!(survivors.contains_key("id-500"));
        assert!(survivors.contains_key("id-401"));
        assert!(!survivors.contains_key("id-400"));
        assert!(!survivors.contains_key("id-0"));
    }

    #[test]
    fn zero_amount_position_is_evicted() {
        let state = ExchangeState::new("Test");
        state.apply_position(position("ARPAUSDT", Side::Sell, 10.0));
        assert!(state.find_position("ARPAUSDT").is_some());

        state.apply_position(position("ARPAUSDT", Side::Sell, 0.0));
        assert!(state.find_position("ARPAUSDT").is_none());
        assert!(state.positions_snapshot().is_empty());
    }

    #[test]
    fn snapshot_replace_is_idempotent() {
        let state = ExchangeState::new("Test");
        state.apply_position(position("STALEUSDT", Side::Buy, 3.0));

        let mut snapshot = HashMap::new();
        let p = position("ARPAUSDT", Side::Sell, 5.0);
        snapshot.insert(p.id.clone(), p);

        state.replace_positions(snapshot.clone());
        state.replace_positions(snapshot.clone());
        assert_eq!(state.positions_snapshot(), snapshot);
        assert!(state.find_position("STALEUSDT").is_none());
    }

    #[test]
    fn json_coercion_handles_string_numbers() {
        assert_eq!(json_f64(&serde_json::json!("0.0461")), 0.0461);
        assert_eq!(json_f64(&serde_json::json!(12.5)), 12.5);
        assert_eq!(json_f64(&serde_json::json!(null)), 0.0);
        assert_eq!(json_i64(&serde_json::json!("1700000000000")), 1_700_000_000_000);
        assert_eq!(json_i64(&serde_json::json!(42)), 42);
    }
}
