// =============================================================================
// Trader — startup orchestration and the BBO-driven execution loop
// =============================================================================
//
// Startup: fetch rules, match symbols across venues, refresh balances,
// negotiate per-symbol leverage, configure margin/position modes, then spawn
// every stream. Runtime: consume the fan-in event channel; each BBO tick may
// produce a signal, and a per-symbol lock guarantees at most one round in
// flight per symbol. After a round, balances and positions are re-fetched and
// a cooldown absorbs exchange-side propagation before the next decision.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::exchanges::{EngineEvent, Exchange, ExchangeState};
use crate::mathx::floor;
use crate::models::{Order, OrderStatus, Side, Signal, TradeSide};
use crate::strategy::Strategy;
use crate::timex;

/// Post-trade cooldown absorbing exchange-side propagation delay.
const TRADE_COOLDOWN: Duration = Duration::from_secs(2);

/// Spacing between leverage calls and public-stream startups.
const STARTUP_SPACING: Duration = Duration::from_millis(100);

pub struct Trader {
    cfg: Settings,
    strategy: Arc<dyn Strategy>,
    exchanges: Vec<Arc<dyn Exchange>>,
    order_lock: Arc<Mutex<HashMap<String, i64>>>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,
}

impl Trader {
    pub fn new(cfg: Settings, strategy: Arc<dyn Strategy>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            cfg,
            strategy,
            exchanges: Vec::new(),
            order_lock: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Register a venue: its events start flowing into the trader's channel.
    pub fn add_exchange(&mut self, ex: Arc<dyn Exchange>) {
        ex.state().set_event_sink(self.events_tx.clone());
        self.exchanges.push(ex);
    }

    // -------------------------------------------------------------------------
    // Startup
    // -------------------------------------------------------------------------

    pub async fn run(mut self) -> Result<()> {
        // 1. Trading rules per venue.
        for ex in &self.exchanges {
            let rules = ex.get_rules().await?;
            info!(venue = ex.name(), count = rules.len(), "rules loaded");
            ex.state().replace_rules(rules);
        }

        // 2. Symbols tradable on every venue.
        let states: Vec<&ExchangeState> = self.exchanges.iter().map(|e| e.state()).collect();
        let symbols = match_symbols(&self.cfg, states[0], &states[1..]);
        if symbols.is_empty() {
            bail!("no matching symbols across venues");
        }
        info!(count = symbols.len(), "matched tradable symbols");

        // 3. Balances.
        let mut balance_total = 0.0;
        for ex in &self.exchanges {
            ex.update_balance().await?;
            let balance = ex.state().account().swap_balance;
            balance_total += balance;
            info!(venue = ex.name(), balance, "balance loaded");
        }
        info!(balance_total, "total capital");

        // 4. Per-symbol leverage: the smallest venue maximum, capped by the
        //    configured target, applied everywhere.
        for symbol in &symbols {
            let mut leverage = self.cfg.leverage;
            for ex in &self.exchanges {
                if let Some(rule) = ex.state().get_rule(symbol) {
                    leverage = leverage.min(rule.max_leverage);
                }
            }
            for ex in &self.exchanges {
                tokio::time::sleep(STARTUP_SPACING).await;
                ex.state().set_trade_leverage(symbol, leverage);
                let Some(rule) = ex.state().get_rule(symbol) else {
                    continue;
                };
                if let Some(err) = ex.set_leverage(&rule.symbol, leverage).await {
                    error!(venue = ex.name(), symbol = %rule.symbol, err = %err, "set leverage failed");
                }
            }
        }

        // 5. Margin and position modes (idempotent per venue).
        for ex in &self.exchanges {
            if let Err(e) = ex.init(&symbols).await {
                warn!(venue = ex.name(), error = %e, "venue init failed");
            }
        }

        // 6. Streams: private + ws-api per venue, then public per symbol.
        for ex in &self.exchanges {
            tokio::spawn(ex.clone().listen_private());
            tokio::spawn(ex.clone().listen_ws_api(self.cfg.ws_api_conns));
        }
        for symbol in &symbols {
            tokio::time::sleep(STARTUP_SPACING).await;
            for ex in &self.exchanges {
                tokio::spawn(ex.clone().listen_public(symbol.clone()));
            }
        }
        info!("all streams launched");

        // 7. Event loop.
        let mut rx = self.events_rx.take().expect("run called twice");
        while let Some(event) = rx.recv().await {
            match event {
                EngineEvent::Bbo(bbo) => self.on_bbo(&bbo.symbol),
                EngineEvent::Order(order) => on_order(&order),
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Runtime
    // -------------------------------------------------------------------------

    /// One BBO tick: skip locked symbols, otherwise ask the strategy and
    /// execute any signal on a spawned task while the lock is held.
    fn on_bbo(&self, symbol: &str) {
        let now = timex::time_ms();

        if self.order_lock.lock().contains_key(symbol) {
            return;
        }

        let states: Vec<&ExchangeState> = self.exchanges.iter().map(|e| e.state()).collect();
        let Some(signal) = self.strategy.gen_signal(now, symbol, &states) else {
            return;
        };

        self.order_lock.lock().insert(symbol.to_string(), now);

        let exchanges = self.exchanges.clone();
        let order_lock = self.order_lock.clone();
        tokio::spawn(async move {
            execute_round(exchanges, order_lock, now, signal).await;
        });
    }
}

/// Execute both legs concurrently, reconcile, cool down, release the lock.
/// A failed leg leaves the lock in place: the symbol is halted for operator
/// review rather than auto-unwound.
async fn execute_round(
    exchanges: Vec<Arc<dyn Exchange>>,
    order_lock: Arc<Mutex<HashMap<String, i64>>>,
    market_time: i64,
    signal: Signal,
) {
    let symbol = signal.symbol.clone();

    for leg in &signal.exchanges {
        info!(
            venue = %leg.venue,
            symbol = %symbol,
            spread_pct = floor(signal.spread * 100.0, 2),
            delay = market_time - leg.time_ms,
            side = %leg.side,
            trade_side = %leg.trade_side,
            price = leg.price,
            amount = leg.amount,
            "signal leg"
        );
    }

    let mut tasks = Vec::new();
    for leg in signal.exchanges.clone() {
        let Some(ex) = exchanges.iter().find(|e| e.name() == leg.venue).cloned() else {
            error!(venue = %leg.venue, "signal names an unregistered venue");
            return;
        };
        let symbol = symbol.clone();
        let order_type = signal.order_type;
        tasks.push(tokio::spawn(async move {
            let (id, err) = ex
                .create_order(&symbol, leg.side, leg.trade_side, order_type, leg.amount, leg.price)
                .await;
            let delay = timex::time_ms() - market_time;
            if id.is_empty() {
                error!(venue = %leg.venue, symbol = %symbol, delay, err = %err, "order failed");
            } else {
                info!(venue = %leg.venue, symbol = %symbol, delay, id = %id, "order placed");
            }
            id
        }));
    }

    let mut placed = 0usize;
    let total = tasks.len();
    for task in tasks {
        match task.await {
            Ok(id) if !id.is_empty() => placed += 1,
            _ => {}
        }
    }

    if placed != total {
        // One leg is live without its hedge. No auto-unwind: the lock entry
        // stays so no further signal fires for this symbol until an operator
        // intervenes.
        error!(
            symbol = %symbol,
            placed,
            total,
            "paired execution incomplete — symbol halted"
        );
        return;
    }

    for ex in &exchanges {
        if let Err(e) = ex.update_balance().await {
            warn!(venue = ex.name(), error = %e, "balance refresh failed");
        }
        match ex.get_positions().await {
            Ok(positions) => ex.state().replace_positions(positions),
            Err(e) => warn!(venue = ex.name(), error = %e, "position refresh failed"),
        }
    }

    tokio::time::sleep(TRADE_COOLDOWN).await;
    order_lock.lock().remove(&symbol);
}

/// Order-stream bookkeeping: log fill slippage against the signal price.
fn on_order(order: &Order) {
    if order.status != OrderStatus::Filled || order.price <= 0.0 || order.deal_price <= 0.0 {
        return;
    }

    let slip_pct = fill_slippage_pct(order.price, order.deal_price);
    let action = match (order.trade_side, order.side) {
        (TradeSide::Open, Side::Buy) => "open long",
        (TradeSide::Open, Side::Sell) => "open short",
        (TradeSide::Close, Side::Buy) => "close long",
        (TradeSide::Close, Side::Sell) => "close short",
    };
    info!(
        venue = %order.venue,
        symbol = %order.symbol,
        action,
        slip_pct,
        "order filled"
    );
}

/// Relative fill slippage in percent, quantized to 4 decimals.
fn fill_slippage_pct(price: f64, deal_price: f64) -> f64 {
    floor((deal_price - price) / price, 4) * 100.0
}

// ---------------------------------------------------------------------------
// Symbol matching
// ---------------------------------------------------------------------------

/// Master symbols present on every slave (allowing `1000X` equivalents),
/// filtered to the quote asset, minus the blacklist, sliced by the
/// configured range.
pub fn match_symbols(
    cfg: &Settings,
    master: &ExchangeState,
    slaves: &[&ExchangeState],
) -> Vec<String> {
    let mut symbols = master.rule_symbols();
    symbols.sort();

    symbols.retain(|symbol| {
        if !symbol.ends_with(&cfg.quote) {
            return false;
        }
        if cfg.symbols_blacklist.contains(symbol) {
            return false;
        }
        slaves.iter().all(|slave| slave.get_rule(symbol).is_some())
    });

    cfg.slice_symbols(symbols)
}
