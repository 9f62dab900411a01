// =============================================================================
// Market monitor — records inter-venue spread transitions to CSV
// =============================================================================
//
// A trade-free run mode: subscribe only the public streams and write one row
// per open/close transition to `./cache/{symbol}.csv`. A virtual position per
// symbol decides which transition applies; consecutive ticks with unchanged
// spreads are dropped so the files stay small. Useful for sizing thresholds
// offline before risking capital.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::exchanges::{EngineEvent, Exchange};
use crate::mathx::{calc_spread, floor};
use crate::timex;
use crate::trader::match_symbols;

const CACHE_DIR: &str = "./cache";

/// One recorded transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SpreadRow {
    pub action: &'static str,
    pub spread: f64,
    pub m_delay: i64,
    pub s_delay: i64,
    pub time_ms: i64,
}

/// Spread bookkeeping: dedup plus the per-symbol virtual position.
#[derive(Default)]
struct SpreadBook {
    last_open_spread: Option<f64>,
    last_close_spread: Option<f64>,
    virtual_pos: HashMap<String, i64>,
}

impl SpreadBook {
    /// Decide whether this tick transitions a virtual position. Returns the
    /// action and the spread that triggered it.
    fn decide(
        &mut self,
        symbol: &str,
        open_threshold: f64,
        open_spread: f64,
        close_spread: f64,
        now_ms: i64,
    ) -> Option<(&'static str, f64)> {
        if self.last_open_spread == Some(open_spread)
            && self.last_close_spread == Some(close_spread)
        {
            return None;
        }
        self.last_open_spread = Some(open_spread);
        self.last_close_spread = Some(close_spread);

        if self.virtual_pos.contains_key(symbol) {
            if close_spread <= 0.0 {
                self.virtual_pos.remove(symbol);
                return Some(("close", close_spread));
            }
            return None;
        }
        if open_spread > open_threshold {
            self.virtual_pos.insert(symbol.to_string(), now_ms);
            return Some(("open", open_spread));
        }
        None
    }
}

/// Run the monitor until cancelled: rules, symbol match, public streams,
/// then record transitions as they arrive.
pub async fn run(cfg: Settings, exchanges: Vec<Arc<dyn Exchange>>) -> Result<()> {
    if exchanges.len() != 2 {
        anyhow::bail!("monitor requires exactly two venues");
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    for ex in &exchanges {
        ex.state().set_event_sink(tx.clone());
        let rules = ex.get_rules().await?;
        ex.state().replace_rules(rules);
    }

    let states: Vec<_> = exchanges.iter().map(|e| e.state()).collect();
    let symbols = match_symbols(&cfg, states[0], &states[1..]);
    if symbols.is_empty() {
        anyhow::bail!("no matching symbols across venues");
    }
    info!(count = symbols.len(), "monitoring symbols");

    for symbol in &symbols {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        for ex in &exchanges {
            tokio::spawn(ex.clone().listen_public(symbol.clone()));
        }
    }

    let mut book = SpreadBook::default();
    while let Some(event) = rx.recv().await {
        let EngineEvent::Bbo(bbo) = event else {
            continue;
        };
        let symbol = bbo.symbol;
        let now = timex::time_ms();

        let (m, s) = (exchanges[0].state(), exchanges[1].state());
        let (Some(m_bbo), Some(s_bbo)) = (m.get_last_bbo(&symbol), s.get_last_bbo(&symbol))
        else {
            continue;
        };

        let m_delay = now - m_bbo.time_ms;
        let s_delay = now - s_bbo.time_ms;
        if m_delay > cfg.max_delay || s_delay > cfg.max_delay {
            continue;
        }

        // Whichever venue is rich drives both directions.
        let (open_spread, close_spread) = if m_bbo.bid > s_bbo.ask {
            (
                calc_spread(m_bbo.bid, s_bbo.ask),
                calc_spread(m_bbo.ask, s_bbo.bid),
            )
        } else {
            (
                calc_spread(s_bbo.bid, m_bbo.ask),
                calc_spread(s_bbo.ask, m_bbo.bid),
            )
        };
        let open_spread = floor(open_spread, 4);
        let close_spread = floor(close_spread, 4);

        let Some((action, spread)) =
            book.decide(&symbol, cfg.spread, open_spread, close_spread, now)
        else {
            continue;
        };

        let row = SpreadRow {
            action,
            spread,
            m_delay,
            s_delay,
            time_ms: now,
        };
        if let Err(e) = append_row(&csv_path(&symbol), &row) {
            warn!(symbol = %symbol, error = %e, "failed to record spread row");
        }
    }
    Ok(())
}

fn csv_path(symbol: &str) -> PathBuf {
    Path::new(CACHE_DIR).join(format!("{symbol}.csv"))
}

/// Append one row, creating the file (and header) on first write.
fn append_row(path: &Path, row: &SpreadRow) -> Result<()> {
    let new_file = !path.exists();
    if new_file {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if new_file {
        writer.write_record(["action", "spread", "m_delay", "s_delay", "t"])?;
    }
    writer.write_record([
        row.action.to_string(),
        row.spread.to_string(),
        row.m_delay.to_string(),
        row.s_delay.to_string(),
        row.time_ms.to_string(),
    ])?;
    writer.flush()?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_open_then_close_transition() {
        let mut book = SpreadBook::default();

        // Spread clears the threshold: open a virtual position.
        let decision = book.decide("ARPAUSDT", 0.005, 0.0067, 0.0045, 1);
        assert_eq!(decision, Some(("open", 0.0067)));

        // Still positive close spread: nothing to record.
        assert_eq!(book.decide("ARPAUSDT", 0.005, 0.0050, 0.0030, 2), None);

        // Inverted: close and free the symbol.
        let decision = book.decide("ARPAUSDT", 0.005, 0.0010, -0.0002, 3);
        assert_eq!(decision, Some(("close", -0.0002)));
        assert!(!book.virtual_pos.contains_key("ARPAUSDT"));
    }

    #[test]
    fn unchanged_spreads_are_deduplicated() {
        let mut book = SpreadBook::default();
        assert!(book.decide("ARPAUSDT", 0.005, 0.0067, 0.0045, 1).is_some());
        // Identical tick: dropped before any position logic runs.
        assert_eq!(book.decide("ARPAUSDT", 0.005, 0.0067, 0.0045, 2), None);
    }

    #[test]
    fn below_threshold_records_nothing() {
        let mut book = SpreadBook::default();
        assert_eq!(book.decide("ARPAUSDT", 0.005, 0.0049, 0.0030, 1), None);
        assert!(book.virtual_pos.is_empty());
    }

    #[test]
    fn csv_path_is_per_symbol() {
        assert_eq!(csv_path("ARPAUSDT"), PathBuf::from("./cache/ARPAUSDT.csv"));
    }
}
