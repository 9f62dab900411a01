// =============================================================================
// Settings — immutable engine configuration
// =============================================================================
//
// Loaded once at startup from a JSON file and threaded by value into the
// trader, the strategy, and each venue adapter. Nothing here mutates at
// runtime. Every field carries a serde default so older config files keep
// loading as fields are added; credentials may be overridden from the
// environment so the file never has to hold live keys.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::models::Secret;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_quote() -> String {
    "USDT".to_string()
}

fn default_spread() -> f64 {
    0.005
}

fn default_max_delay_ms() -> i64 {
    200
}

fn default_leverage() -> u32 {
    20
}

fn default_pos_rate() -> f64 {
    0.5
}

fn default_reserve_margin() -> f64 {
    0.2
}

fn default_bbo_volume_rate() -> f64 {
    0.1
}

fn default_min_nominal() -> f64 {
    5.0
}

fn default_ws_api_conns() -> usize {
    5
}

// =============================================================================
// Settings
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Quote asset suffix; only symbols ending with it are tradable.
    #[serde(default = "default_quote")]
    pub quote: String,

    /// Optional `[start, end]` slice over the matched symbols list.
    /// `end == 0` means "to the end"; an empty list disables slicing.
    #[serde(default)]
    pub symbol_range: Vec<usize>,

    /// Symbols excluded from trading.
    #[serde(default)]
    pub symbols_blacklist: Vec<String>,

    /// Minimum inter-venue spread to open a hedge.
    #[serde(default = "default_spread")]
    pub spread: f64,

    /// Maximum BBO staleness in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay: i64,

    /// Requested leverage; capped per symbol by every venue's maximum.
    #[serde(default = "default_leverage")]
    pub leverage: u32,

    /// Fraction of balance allocatable per open.
    #[serde(default = "default_pos_rate")]
    pub pos_rate: f64,

    /// Floor of untouched balance fraction.
    #[serde(default = "default_reserve_margin")]
    pub reserve_margin: f64,

    /// Fraction of top-of-book depth usable per order.
    #[serde(default = "default_bbo_volume_rate")]
    pub bbo_volume_rate: f64,

    /// Minimum notional per leg on open (quote asset).
    #[serde(default = "default_min_nominal")]
    pub min_nominal: f64,

    /// WS-API connections per venue pool.
    #[serde(default = "default_ws_api_conns")]
    pub ws_api_conns: usize,

    /// Master venue credentials.
    #[serde(default)]
    pub master: Secret,

    /// Slave venue credentials.
    #[serde(default)]
    pub slave: Secret,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            quote: default_quote(),
            symbol_range: Vec::new(),
            symbols_blacklist: Vec::new(),
            spread: default_spread(),
            max_delay: default_max_delay_ms(),
            leverage: default_leverage(),
            pos_rate: default_pos_rate(),
            reserve_margin: default_reserve_margin(),
            bbo_volume_rate: default_bbo_volume_rate(),
            min_nominal: default_min_nominal(),
            ws_api_conns: default_ws_api_conns(),
            master: Secret::default(),
            slave: Secret::default(),
        }
    }
}

impl Settings {
    /// Load settings from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;

        let mut settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse settings from {}", path.display()))?;

        settings.apply_env_overrides();

        info!(
            path = %path.display(),
            quote = %settings.quote,
            spread = settings.spread,
            max_delay = settings.max_delay,
            leverage = settings.leverage,
            "settings loaded"
        );

        Ok(settings)
    }

    /// Override credentials from the environment where present, so live keys
    /// never have to sit in the config file.
    pub fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 6] = [
            ("HEDGE_MASTER_KEY", &mut self.master.key),
            ("HEDGE_MASTER_SECRET", &mut self.master.secret),
            ("HEDGE_MASTER_API_KEY", &mut self.master.api_key),
            ("HEDGE_MASTER_PRIVATE_KEY", &mut self.master.private_key),
            ("HEDGE_SLAVE_KEY", &mut self.slave.key),
            ("HEDGE_SLAVE_SECRET", &mut self.slave.secret),
        ];
        for (var, slot) in overrides {
            if let Ok(val) = std::env::var(var) {
                if !val.is_empty() {
                    *slot = val;
                }
            }
        }
    }

    /// Apply the configured `[start, end]` slice to a matched symbols list.
    pub fn slice_symbols(&self, symbols: Vec<String>) -> Vec<String> {
        if self.symbol_range.len() < 2 {
            return symbols;
        }
        let start = self.symbol_range[0].min(symbols.len());
        let end = self.symbol_range[1];
        if end == 0 {
            if start == 0 {
                return symbols;
            }
            return symbols[start..].to_vec();
        }
        let end = end.min(symbols.len()).max(start);
        symbols[start..end].to_vec()
    }
}
