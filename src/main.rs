// =============================================================================
// Hedgerunner — cross-venue perpetual-futures arbitrage
// =============================================================================
//
// Two run modes:
//   hedgerunner            — live hedging across both venues
//   hedgerunner monitor    — record spread transitions to CSV, no trading
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod config;
mod crypto;
mod exchanges;
mod mathx;
mod models;
mod monitor;
mod strategy;
mod timex;
mod trader;
mod ws;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::exchanges::binance::Binance;
use crate::exchanges::gate::Gate;
use crate::exchanges::Exchange;
use crate::strategy::hedge::HedgeStrategy;
use crate::trader::Trader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_path =
        std::env::var("HEDGE_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let settings = Settings::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load settings, using defaults");
        let mut settings = Settings::default();
        settings.apply_env_overrides();
        settings
    });

    info!(
        quote = %settings.quote,
        spread = settings.spread,
        leverage = settings.leverage,
        "hedgerunner starting"
    );

    // ── 2. Venue adapters ────────────────────────────────────────────────
    let master: Arc<dyn Exchange> = Binance::new(settings.master.clone(), &settings.quote)?;
    let slave: Arc<dyn Exchange> = Gate::new(settings.slave.clone(), &settings.quote)?;

    // ── 3. Run mode dispatch ─────────────────────────────────────────────
    let mode = std::env::args().nth(1).unwrap_or_default();
    if mode == "monitor" {
        tokio::select! {
            res = monitor::run(settings, vec![master, slave]) => res?,
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received");
            }
        }
        return Ok(());
    }

    // ── 4. Trader ────────────────────────────────────────────────────────
    let strategy = Arc::new(HedgeStrategy::new(&settings));
    let mut trader = Trader::new(settings, strategy);
    trader.add_exchange(master);
    trader.add_exchange(slave);

    tokio::select! {
        res = trader.run() => res?,
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received — stopping");
        }
    }

    info!("hedgerunner shut down");
    Ok(())
}
