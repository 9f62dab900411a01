// =============================================================================
// Shared domain types for the hedge engine
// =============================================================================

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Order lifecycle status, normalized across venues.
///
/// Non-fill terminals (rejected, expired, liquidated, reduce-only closures,
/// self-trade prevention, position-close) all collapse to `Canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
}

impl OrderStatus {
    /// Terminal statuses evict the order from the local cache.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Canceled => write!(f, "CANCELED"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Position direction in dual-side (hedge) mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// Whether an order opens or closes a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Open,
    Close,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Close => write!(f, "CLOSE"),
        }
    }
}

/// Order type. Hedge signals always use `Market`; the others exist for the
/// venues' limit time-in-force variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Ioc,
    Fok,
    Gtc,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Ioc => write!(f, "IOC"),
            Self::Fok => write!(f, "FOK"),
            Self::Gtc => write!(f, "GTC"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Best-bid/best-offer snapshot. Immutable; replaced atomically per symbol
/// per venue, retained only as "last".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bbo {
    pub symbol: String,
    pub bid: f64,
    pub bid_amount: f64,
    pub ask: f64,
    pub ask_amount: f64,
    /// Venue event timestamp in milliseconds.
    pub time_ms: i64,
}

/// Per-symbol contract trading rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractRule {
    pub symbol: String,
    /// Fractional digits of the price step (quote asset).
    pub price_prec: u32,
    /// Fractional digits of the amount step (contracts).
    pub amount_prec: u32,
    /// Maximum order amount in contracts.
    pub max_amount: f64,
    /// Minimum order amount in contracts.
    pub min_amount: f64,
    /// Venue's maximum leverage for the symbol.
    pub max_leverage: u32,
    /// Leverage resolved at startup: min across venues, capped by config.
    pub trade_leverage: u32,
    /// Coins per contract. 1.0 on venues that trade in coin units.
    pub contract_size: f64,
}

impl ContractRule {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price_prec: 0,
            amount_prec: 0,
            max_amount: 0.0,
            min_amount: 0.0,
            max_leverage: 20,
            trade_leverage: 20,
            contract_size: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Account state
// ---------------------------------------------------------------------------

/// A tracked order on one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub venue: String,
    pub symbol: String,
    pub id: String,
    pub status: OrderStatus,
    pub side: Side,
    pub trade_side: TradeSide,
    pub price: f64,
    pub amount: f64,
    /// Average fill price.
    pub deal_price: f64,
    /// Filled amount.
    pub deal_amount: f64,
    pub c_time_ms: i64,
}

/// An open position leg. `id` is `symbol + side`; in dual-side mode a venue
/// may carry both a LONG and a SHORT entry for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub id: String,
    pub side: Side,
    /// Entry price.
    pub price: f64,
    /// Absolute size in contracts. Zero-size positions are never retained.
    pub amount: f64,
    pub c_time_ms: i64,
}

impl Position {
    /// Cache key for a position leg.
    pub fn key(symbol: &str, side: Side) -> String {
        format!("{symbol}{side}")
    }
}

/// Futures account snapshot for the configured quote asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub in_dual_mode: bool,
    pub swap_balance: f64,
    pub swap_available: f64,
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// One leg of a hedge signal, addressed to a single venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSignal {
    pub venue: String,
    pub trade_side: TradeSide,
    pub side: Side,
    pub price: f64,
    /// Amount in venue-native contracts.
    pub amount: f64,
    /// BBO timestamp the leg was priced from.
    pub time_ms: i64,
}

/// A paired open/close decision produced by the strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    pub order_type: OrderType,
    pub spread: f64,
    pub exchanges: Vec<ExchangeSignal>,
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Venue credentials. `key`/`secret` sign REST and WS subscriptions;
/// `api_key`/`private_key` drive the ed25519 WS-API logon where a venue
/// uses one.
#[derive(Clone, Default, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub private_key: String,
    #[serde(default)]
    pub public_key: String,
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secret")
            .field("key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("api_key", &"<redacted>")
            .field("private_key", &"<redacted>")
            .field("public_key", &"<redacted>")
            .finish()
    }
}
