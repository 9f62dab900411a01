// =============================================================================
// Venue B adapter — HMAC-SHA512 signed REST and in-band WS login
// =============================================================================
//
// One WS endpoint hosts every channel. Public subscriptions are unsigned;
// private subscriptions carry a per-channel HMAC-SHA512 auth block; the
// WS-API (order placement) authenticates each connection with an in-band
// `futures.login` whose signature covers `api\n{channel}\n{query}\n{ts}`.
// Every connection runs a 10 s `futures.ping` keep-alive.
//
// Contracts are listed `BASE_QUOTE`; local symbols drop the underscore and
// the rules cache resolves the native listing (including 1000×-scaled ones)
// when subscribing or placing orders.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::crypto;
use crate::exchanges::{json_f64, json_i64, EngineEvent, Exchange, ExchangeState};
use crate::mathx;
use crate::models::{
    Bbo, ContractRule, Order, OrderStatus, OrderType, Position, Secret, Side, TradeSide,
};
use crate::timex;
use crate::ws::{ConnPool, WsHandler, WsSession};

const BASE_REST: &str = "https://api.gateio.ws";
const BASE_WS: &str = "wss://fx-ws.gateio.ws/v4/ws/usdt";

/// Keep-alive cadence for every connection to the shared endpoint.
const PING_INTERVAL: Duration = Duration::from_secs(10);

pub struct Gate {
    state: ExchangeState,
    secret: Secret,
    quote: String,
    client: reqwest::Client,
    ws_api_pool: RwLock<Option<Arc<ConnPool>>>,
    sessions: RwLock<HashMap<String, Arc<WsSession>>>,
}

impl Gate {
    pub fn new(secret: Secret, quote: impl Into<String>) -> Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build http client")?;

        Ok(Arc::new(Self {
            state: ExchangeState::new("Gate"),
            secret,
            quote: quote.into(),
            client,
            ws_api_pool: RwLock::new(None),
            sessions: RwLock::new(HashMap::new()),
        }))
    }

    // -------------------------------------------------------------------------
    // Symbol mapping
    // -------------------------------------------------------------------------

    /// Native contract name for a unified symbol: the rules cache resolves
    /// 1000×-scaled listings, then the quote suffix gains its underscore.
    fn contract_name(&self, symbol: &str) -> String {
        let native = self
            .state
            .get_rule(symbol)
            .map(|r| r.symbol)
            .unwrap_or_else(|| symbol.to_string());
        native.replace(&self.quote, &format!("_{}", self.quote))
    }

    // -------------------------------------------------------------------------
    // REST transport
    // -------------------------------------------------------------------------

    /// Signature source string:
    /// `{METHOD}\n{PATH}\n{QUERY}\n{SHA512(BODY)}\n{timestamp_s}`.
    fn rest_sign_payload(method: &str, path: &str, query: &str, body: &str, now_s: i64) -> String {
        format!(
            "{method}\n{path}\n{query}\n{}\n{now_s}",
            crypto::sha512_hex(body)
        )
    }

    async fn go(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value> {
        let query_str = query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let body_str = body.map(|b| b.to_string()).unwrap_or_default();

        let now = timex::time_s();
        let payload = Self::rest_sign_payload(method.as_str(), path, &query_str, &body_str, now);
        let sign = crypto::hmac_sha512_hex(&self.secret.secret, &payload);

        let mut url = format!("{BASE_REST}{path}");
        if !query_str.is_empty() {
            url = format!("{url}?{query_str}");
        }

        let mut request = self
            .client
            .request(method.clone(), &url)
            .header("KEY", &self.secret.key)
            .header("Timestamp", now.to_string())
            .header("SIGN", sign)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if !body_str.is_empty() {
            request = request.body(body_str);
        }

        let resp = request
            .send()
            .await
            .with_context(|| format!("{method} {path} request failed"))?;

        let status = resp.status();
        let body: Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("{method} {path} returned {status}: {body}");
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // WS signing
    // -------------------------------------------------------------------------

    /// Private-channel subscription signature.
    fn channel_sign(&self, channel: &str, event: &str, now_s: i64) -> String {
        crypto::hmac_sha512_hex(
            &self.secret.secret,
            &format!("channel={channel}&event={event}&time={now_s}"),
        )
    }

    /// WS-API login / request signature.
    fn ws_api_sign(&self, channel: &str, query: &str, now_s: i64) -> String {
        crypto::hmac_sha512_hex(
            &self.secret.secret,
            &format!("api\n{channel}\n{query}\n{now_s}"),
        )
    }

    fn login_request(&self, now_s: i64) -> Value {
        json!({
            "time": now_s,
            "channel": "futures.login",
            "event": "api",
            "payload": {
                "api_key": self.secret.key,
                "signature": self.ws_api_sign("futures.login", "", now_s),
                "timestamp": now_s.to_string(),
                "req_id": Uuid::new_v4().simple().to_string(),
            },
        })
    }

    fn subscribe_request(&self, channel: &str, user_id: &str, now_s: i64) -> Value {
        json!({
            "time": now_s,
            "channel": channel,
            "event": "subscribe",
            "payload": [user_id, "!all"],
            "auth": {
                "method": "api_key",
                "KEY": self.secret.key,
                "SIGN": self.channel_sign(channel, "subscribe", now_s),
            },
        })
    }

    /// Keep-alive task for one connection.
    fn spawn_ping(&self, session: Arc<WsSession>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PING_INTERVAL).await;
                let req = json!({"time": timex::time_s(), "channel": "futures.ping"});
                session.send(&req, "").await;
            }
        })
    }

    // -------------------------------------------------------------------------
    // Private-stream handlers
    // -------------------------------------------------------------------------

    fn handle_orders(&self, msg: &Value) {
        let Some(results) = msg["result"].as_array() else {
            return;
        };
        for data in results {
            if let Some(order) = parse_order(data) {
                self.state.apply_order(&order);
                self.state.emit(EngineEvent::Order(order));
            }
        }
    }

    fn handle_positions(&self, msg: &Value) {
        let Some(results) = msg["result"].as_array() else {
            return;
        };
        for data in results {
            let symbol = data["contract"]
                .as_str()
                .unwrap_or_default()
                .replace('_', "");
            let size = json_f64(&data["size"]);
            let side = if size > 0.0 { Side::Buy } else { Side::Sell };
            self.state.apply_position(Position {
                id: Position::key(&symbol, side),
                symbol,
                side,
                price: json_f64(&data["entry_price"]),
                amount: size.abs(),
                c_time_ms: 0,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Order parsing
// ---------------------------------------------------------------------------

/// Status from the venue's `status` / `finish_as` pair. Liquidations,
/// reduce-only closures, position-close and self-trade-prevention terminals
/// all collapse to Canceled.
fn map_order_status(status: &str, finish_as: &str) -> OrderStatus {
    if status == "open" || finish_as == "_new" {
        return OrderStatus::New;
    }
    match finish_as {
        "cancelled" | "liquidated" | "reduce_only" | "position_close" | "stp" | "reduce_out" => {
            OrderStatus::Canceled
        }
        _ => OrderStatus::Filled,
    }
}

/// Parse one order entry, shared by the private stream and the REST snapshot.
fn parse_order(data: &Value) -> Option<Order> {
    let id = json_i64(&data["id"]);
    if id == 0 {
        return None;
    }

    let symbol = data["contract"]
        .as_str()
        .unwrap_or_default()
        .replace('_', "");
    let size = json_f64(&data["size"]);
    let side = if size > 0.0 { Side::Buy } else { Side::Sell };
    let amount = size.abs();
    let deal_amount = amount - json_f64(&data["left"]);
    let trade_side = if data["is_close"].as_bool() == Some(true) {
        TradeSide::Close
    } else {
        TradeSide::Open
    };

    // The stream reports milliseconds, the REST snapshot seconds.
    let c_time_ms = if data["create_time_ms"].is_null() {
        (json_f64(&data["create_time"]) * 1000.0) as i64
    } else {
        json_i64(&data["create_time_ms"])
    };

    Some(Order {
        venue: "Gate".to_string(),
        symbol,
        id: id.to_string(),
        status: map_order_status(
            data["status"].as_str().unwrap_or_default(),
            data["finish_as"].as_str().unwrap_or_default(),
        ),
        side,
        trade_side,
        price: json_f64(&data["price"]),
        amount,
        deal_price: json_f64(&data["fill_price"]),
        deal_amount,
        c_time_ms,
    })
}

/// Correlation id of a WS frame: the request id, unless the frame is a bare
/// acknowledgement (the real response follows).
fn correlation_id(msg: &Value) -> String {
    if msg["ack"].as_bool() == Some(true) {
        return String::new();
    }
    msg["request_id"].as_str().unwrap_or_default().to_string()
}

// ---------------------------------------------------------------------------
// WS handlers
// ---------------------------------------------------------------------------

struct PublicHandler {
    ex: Arc<Gate>,
}

#[async_trait]
impl WsHandler for PublicHandler {
    async fn on_connect(&self, session: &Arc<WsSession>) -> Vec<JoinHandle<()>> {
        let symbol = session.symbol().to_string();
        let req = json!({
            "time": timex::time_s(),
            "channel": "futures.book_ticker",
            "event": "subscribe",
            "payload": [self.ex.contract_name(&symbol)],
        });
        session.send(&req, "").await;
        vec![self.ex.spawn_ping(session.clone())]
    }

    async fn on_message(
        &self,
        _session: &Arc<WsSession>,
        symbol: &str,
        raw: &str,
    ) -> (Option<Value>, String) {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            warn!(venue = "Gate", "malformed public frame");
            return (None, String::new());
        };

        if msg["channel"].as_str() == Some("futures.book_ticker")
            && msg["event"].as_str() == Some("update")
        {
            let data = &msg["result"];
            let native = data["s"].as_str().unwrap_or_default().replace('_', "");
            let bbo = Bbo {
                symbol: native,
                bid: json_f64(&data["b"]),
                bid_amount: json_f64(&data["B"]),
                ask: json_f64(&data["a"]),
                ask_amount: json_f64(&data["A"]),
                time_ms: json_i64(&data["t"]),
            };
            self.ex.state.upsert_bbo(bbo.clone());

            // The trader keys locks and signals by the subscribed symbol.
            let mut event_bbo = bbo;
            event_bbo.symbol = symbol.to_string();
            self.ex.state.emit(EngineEvent::Bbo(event_bbo));
        }

        let id = correlation_id(&msg);
        (Some(msg), id)
    }
}

struct PrivateHandler {
    ex: Arc<Gate>,
}

#[async_trait]
impl WsHandler for PrivateHandler {
    async fn on_connect(&self, session: &Arc<WsSession>) -> Vec<JoinHandle<()>> {
        let now = timex::time_s();
        let user_id = self.ex.state.account().user_id;
        if user_id.is_empty() {
            warn!(venue = "Gate", "private subscribe without user id — update balance first");
        }

        for channel in ["futures.orders", "futures.positions"] {
            let req = self.ex.subscribe_request(channel, &user_id, now);
            session.send(&req, "").await;
        }

        // Refetch on every (re)connect so the caches never drift across a
        // gap in the stream.
        match self.ex.get_orders().await {
            Ok(orders) => self.ex.state.replace_orders(orders),
            Err(e) => warn!(venue = "Gate", error = %e, "order snapshot refetch failed"),
        }
        match self.ex.get_positions().await {
            Ok(positions) => self.ex.state.replace_positions(positions),
            Err(e) => warn!(venue = "Gate", error = %e, "position snapshot refetch failed"),
        }

        vec![self.ex.spawn_ping(session.clone())]
    }

    async fn on_message(
        &self,
        _session: &Arc<WsSession>,
        _symbol: &str,
        raw: &str,
    ) -> (Option<Value>, String) {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            warn!(venue = "Gate", "malformed private frame");
            return (None, String::new());
        };

        if msg["event"].as_str() == Some("update") {
            match msg["channel"].as_str() {
                Some("futures.orders") => self.ex.handle_orders(&msg),
                Some("futures.positions") => self.ex.handle_positions(&msg),
                _ => {}
            }
        }

        let id = correlation_id(&msg);
        (Some(msg), id)
    }
}

struct WsApiHandler {
    ex: Arc<Gate>,
}

#[async_trait]
impl WsHandler for WsApiHandler {
    async fn on_connect(&self, session: &Arc<WsSession>) -> Vec<JoinHandle<()>> {
        let req = self.ex.login_request(timex::time_s());
        session.send(&req, "").await;
        vec![self.ex.spawn_ping(session.clone())]
    }

    async fn on_message(
        &self,
        session: &Arc<WsSession>,
        _symbol: &str,
        raw: &str,
    ) -> (Option<Value>, String) {
        let Ok(msg) = serde_json::from_str::<Value>(raw) else {
            warn!(venue = "Gate", "malformed ws-api frame");
            return (None, String::new());
        };

        if msg["ack"].as_bool() == Some(true) {
            return (Some(msg), String::new());
        }

        if !msg["data"]["errs"].is_null() {
            // A rejected login leaves the connection useless; recycle it and
            // let round-robin skip the slot while it reconnects.
            if msg["header"]["channel"].as_str() == Some("futures.login") {
                error!(venue = "Gate", errs = %msg["data"]["errs"], "ws-api login rejected");
                session.request_reconnect();
            }
        }

        let id = correlation_id(&msg);
        (Some(msg), id)
    }
}

// ---------------------------------------------------------------------------
// Exchange impl
// ---------------------------------------------------------------------------

#[async_trait]
impl Exchange for Gate {
    fn state(&self) -> &ExchangeState {
        &self.state
    }

    async fn init(&self, _symbols: &[String]) -> Result<()> {
        self.set_position_mode("").await?;
        self.cancel_all_orders("").await?;
        Ok(())
    }

    async fn listen_public(self: Arc<Self>, symbol: String) {
        let session = WsSession::with_symbol(BASE_WS, format!("gate {symbol}"), &symbol);
        self.sessions.write().insert(symbol, session.clone());
        session.run(Arc::new(PublicHandler { ex: self.clone() })).await;
    }

    async fn listen_private(self: Arc<Self>) {
        let session = WsSession::new(BASE_WS, "gate private");
        self.sessions.write().insert("PRIVATE".to_string(), session.clone());
        session.run(Arc::new(PrivateHandler { ex: self.clone() })).await;
    }

    async fn listen_ws_api(self: Arc<Self>, count: usize) {
        let pool = ConnPool::new("gate ws-api");
        *self.ws_api_pool.write() = Some(pool.clone());

        let handler = Arc::new(WsApiHandler { ex: self.clone() });
        pool.run(
            count,
            |i| WsSession::new(BASE_WS, format!("gate ws-api {i}")),
            handler,
        );

        std::future::pending::<()>().await;
    }

    async fn get_rules(&self) -> Result<HashMap<String, ContractRule>> {
        let res = self
            .go(Method::GET, "/api/v4/futures/usdt/contracts", &[], None)
            .await?;

        let mut rules = HashMap::new();
        for data in res.as_array().context("contracts is not an array")? {
            let symbol = data["name"].as_str().unwrap_or_default().replace('_', "");
            if !symbol.ends_with(&self.quote) {
                continue;
            }

            let price_step = match data["order_price_round"].as_str() {
                Some(s) => s.to_string(),
                None => json_f64(&data["order_price_round"]).to_string(),
            };

            let mut rule = ContractRule::new(&symbol);
            rule.price_prec = mathx::prec(&price_step);
            rule.amount_prec = 0;
            rule.max_amount = json_f64(&data["order_size_max"]);
            rule.min_amount = json_f64(&data["order_size_min"]);
            rule.max_leverage = json_i64(&data["leverage_max"]) as u32;
            rule.contract_size = json_f64(&data["quanto_multiplier"]);
            if rule.contract_size == 0.0 {
                rule.contract_size = 1.0;
            }
            rules.insert(symbol, rule);
        }
        Ok(rules)
    }

    async fn create_order(
        &self,
        symbol: &str,
        side: Side,
        trade_side: TradeSide,
        order_type: OrderType,
        amount: f64,
        price: f64,
    ) -> (String, String) {
        let pool = self.ws_api_pool.read().clone();
        let Some(pool) = pool else {
            return (String::new(), "ws not connected".to_string());
        };

        // Signed size: positive buys, negative sells. A close crosses the
        // held side and is flagged reduce-only.
        let size = match trade_side {
            TradeSide::Open => {
                if side == Side::Buy {
                    amount
                } else {
                    -amount
                }
            }
            TradeSide::Close => {
                if side == Side::Sell {
                    amount
                } else {
                    -amount
                }
            }
        };

        let mut args = json!({
            "contract": self.contract_name(symbol),
            "size": if size.fract() == 0.0 { json!(size as i64) } else { json!(size) },
        });
        if trade_side == TradeSide::Close {
            args["reduce_only"] = json!(true);
        }
        if order_type == OrderType::Market {
            args["price"] = json!("0");
            args["tif"] = json!("ioc");
        } else {
            args["price"] = json!(price.to_string());
            args["tif"] = json!(order_type.to_string().to_lowercase());
        }

        let req_id = Uuid::new_v4().simple().to_string();
        let req = json!({
            "time": timex::time_s(),
            "channel": "futures.order_place",
            "event": "api",
            "payload": {
                "req_id": req_id,
                "req_param": args,
            },
        });

        let (res, ok) = pool.send(&req, &req_id).await;
        if !ok {
            return (String::new(), "ws not connected".to_string());
        }

        let res = res.unwrap_or(Value::Null);
        if !res["data"]["errs"].is_null() {
            return (String::new(), res["data"]["errs"].to_string());
        }
        let order_id = json_i64(&res["data"]["result"]["id"]);
        if order_id == 0 {
            return (String::new(), res.to_string());
        }
        (order_id.to_string(), String::new())
    }

    async fn cancel_order(&self, id: &str, _symbol: &str) -> Result<()> {
        self.go(
            Method::DELETE,
            &format!("/api/v4/futures/usdt/orders/{id}"),
            &[],
            None,
        )
        .await?;
        info!(venue = "Gate", id, "order canceled");
        Ok(())
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<()> {
        let mut query = Vec::new();
        if !symbol.is_empty() {
            query.push(("contract", self.contract_name(symbol)));
        }
        self.go(Method::DELETE, "/api/v4/futures/usdt/orders", &query, None)
            .await?;
        info!(venue = "Gate", symbol, "all orders canceled");
        Ok(())
    }

    async fn get_orders(&self) -> Result<HashMap<String, Order>> {
        let res = self
            .go(
                Method::GET,
                "/api/v4/futures/usdt/orders",
                &[("status", "open".to_string())],
                None,
            )
            .await?;

        let mut orders = HashMap::new();
        for data in res.as_array().context("orders is not an array")? {
            if let Some(order) = parse_order(data) {
                orders.insert(order.id.clone(), order);
            }
        }
        Ok(orders)
    }

    async fn get_positions(&self) -> Result<HashMap<String, Position>> {
        let res = self
            .go(
                Method::GET,
                "/api/v4/futures/usdt/positions",
                &[("holding", "true".to_string())],
                None,
            )
            .await?;

        let mut positions = HashMap::new();
        for data in res.as_array().context("positions is not an array")? {
            let size = json_f64(&data["size"]);
            if size == 0.0 {
                continue;
            }
            let symbol = data["contract"]
                .as_str()
                .unwrap_or_default()
                .replace('_', "");
            let side = if size > 0.0 { Side::Buy } else { Side::Sell };
            let position = Position {
                id: Position::key(&symbol, side),
                symbol,
                side,
                price: json_f64(&data["entry_price"]),
                amount: size.abs(),
                c_time_ms: 0,
            };
            positions.insert(position.id.clone(), position);
        }
        Ok(positions)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Option<String> {
        let contract = self.contract_name(symbol);
        let res = self
            .go(
                Method::POST,
                &format!("/api/v4/futures/usdt/positions/{contract}/leverage"),
                &[
                    // Leverage 0 selects cross margin; the cap rides along.
                    ("leverage", "0".to_string()),
                    ("cross_leverage_limit", leverage.to_string()),
                ],
                None,
            )
            .await;
        match res {
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        }
    }

    async fn set_margin_mode(&self, _symbol: &str) -> Result<()> {
        // Cross margin is selected by leverage 0 in set_leverage.
        debug!(venue = "Gate", "margin mode handled via leverage");
        Ok(())
    }

    async fn set_position_mode(&self, _symbol: &str) -> Result<()> {
        if self.state.account().in_dual_mode {
            info!(venue = "Gate", "dual-side position mode already set");
            return Ok(());
        }

        self.go(
            Method::POST,
            "/api/v4/futures/usdt/dual_mode",
            &[("dual_mode", "true".to_string())],
            None,
        )
        .await?;
        info!(venue = "Gate", "dual-side position mode enabled");
        Ok(())
    }

    async fn update_balance(&self) -> Result<()> {
        let res = self
            .go(Method::GET, "/api/v4/futures/usdt/accounts", &[], None)
            .await?;

        let user_id = json_i64(&res["user"]).to_string();
        let in_dual_mode = res["in_dual_mode"].as_bool().unwrap_or(false);
        let balance = json_f64(&res["total"]);
        let available = json_f64(&res["available"]);
        self.state.update_account(|acc| {
            acc.user_id = user_id;
            acc.in_dual_mode = in_dual_mode;
            acc.swap_balance = balance;
            acc.swap_available = available;
        });
        Ok(())
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("quote", &self.quote)
            .field("secret", &"<redacted>")
            .finish()
    }
}
