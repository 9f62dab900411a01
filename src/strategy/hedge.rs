// =============================================================================
// Hedge strategy — inter-venue spread capture with paired market orders
// =============================================================================
//
// On every BBO tick the strategy looks at both venues' latest top-of-book
// and inventory:
//   - positions on both venues  -> consider closing (spread must invert),
//   - positions on neither      -> consider opening (spread must clear the
//     configured threshold),
//   - one-sided inventory       -> stand down; the trader escalates that.
//
// Sizing is done in coins and converted back to each venue's contract count;
// when contract sizes differ the coarser venue is floored first and the
// other leg derived from it, so `n_m * cs_m == n_s * cs_s` always holds.
// =============================================================================

use tracing::{error, info, warn};

use crate::config::Settings;
use crate::exchanges::ExchangeState;
use crate::mathx::{calc_spread, floor};
use crate::models::{
    Bbo, ContractRule, ExchangeSignal, OrderType, Position, Side, Signal, TradeSide,
};
use crate::strategy::Strategy;

/// Minimum return on entry cost required to close a hedge.
const MIN_PROFIT_RATE: f64 = 0.002;

pub struct HedgeStrategy {
    spread_open: f64,
    max_delay_ms: i64,
    pos_rate: f64,
    reserve_margin: f64,
    bbo_volume_rate: f64,
    min_nominal: f64,
}

impl HedgeStrategy {
    pub fn new(cfg: &Settings) -> Self {
        Self {
            spread_open: cfg.spread,
            max_delay_ms: cfg.max_delay,
            pos_rate: cfg.pos_rate,
            reserve_margin: cfg.reserve_margin,
            bbo_volume_rate: cfg.bbo_volume_rate,
            min_nominal: cfg.min_nominal,
        }
    }

    // -------------------------------------------------------------------------
    // Open
    // -------------------------------------------------------------------------

    fn open_signal(
        &self,
        symbol: &str,
        m_bbo: &Bbo,
        s_bbo: &Bbo,
        m: &ExchangeState,
        s: &ExchangeState,
    ) -> Option<Signal> {
        let available = self.available_capital(m, s);
        if available <= 0.0 {
            return None;
        }

        // Two directions: short master against the slave's offer, or long
        // master against the slave's bid. The short-master direction wins a
        // tie by being checked first.
        let s1 = calc_spread(m_bbo.bid, s_bbo.ask);
        let s2 = calc_spread(s_bbo.bid, m_bbo.ask);

        let (spread, m_data, s_data, m_side, s_side) = if s1 > self.spread_open {
            let m = (m_bbo.bid, m_bbo.bid_amount);
            let s = (s_bbo.ask, s_bbo.ask_amount);
            (s1, m, s, Side::Sell, Side::Buy)
        } else if s2 > self.spread_open {
            let m = (m_bbo.ask, m_bbo.ask_amount);
            let s = (s_bbo.bid, s_bbo.bid_amount);
            (s2, m, s, Side::Buy, Side::Sell)
        } else {
            return None;
        };
        let (m_price, m_depth) = m_data;
        let (s_price, s_depth) = s_data;

        let m_rule = m.get_rule(symbol)?;
        let s_rule = s.get_rule(symbol)?;

        // Coin budget: thinnest book scaled down, balance at leverage
        // against either venue's price, and both venues' order caps.
        let min_bbo_coins = (m_depth * m_rule.contract_size).min(s_depth * s_rule.contract_size);
        let order_value = available * m_rule.trade_leverage as f64;
        let coin_count = (min_bbo_coins * self.bbo_volume_rate)
            .min(order_value / m_price)
            .min(order_value / s_price)
            .min(m_rule.max_amount * m_rule.contract_size)
            .min(s_rule.max_amount * s_rule.contract_size);

        let (m_count, s_count) = normalize_amounts(
            coin_count / m_rule.contract_size,
            coin_count / s_rule.contract_size,
            &m_rule,
            &s_rule,
        );

        if m_count == 0.0 || s_count == 0.0 {
            return None;
        }
        if m_count < m_rule.min_amount {
            warn!(symbol, count = m_count, min = m_rule.min_amount, "master below min amount");
            return None;
        }
        if s_count < s_rule.min_amount {
            warn!(symbol, count = s_count, min = s_rule.min_amount, "slave below min amount");
            return None;
        }
        if m_price * m_count * m_rule.contract_size < self.min_nominal {
            warn!(symbol, "master below min notional");
            return None;
        }
        if s_price * s_count * s_rule.contract_size < self.min_nominal {
            warn!(symbol, "slave below min notional");
            return None;
        }

        Some(Signal {
            symbol: symbol.to_string(),
            order_type: OrderType::Market,
            spread,
            exchanges: vec![
                ExchangeSignal {
                    venue: m.name.to_string(),
                    trade_side: TradeSide::Open,
                    side: m_side,
                    price: m_price,
                    amount: m_count,
                    time_ms: m_bbo.time_ms,
                },
                ExchangeSignal {
                    venue: s.name.to_string(),
                    trade_side: TradeSide::Open,
                    side: s_side,
                    price: s_price,
                    amount: s_count,
                    time_ms: s_bbo.time_ms,
                },
            ],
        })
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    fn close_signal(
        &self,
        symbol: &str,
        m_bbo: &Bbo,
        s_bbo: &Bbo,
        m: &ExchangeState,
        s: &ExchangeState,
        m_pos: &Position,
        s_pos: &Position,
    ) -> Option<Signal> {
        // Close only when the entry direction's spread has inverted; the
        // exit crosses the book on both venues.
        let (spread, m_data, s_data) = if m_pos.side == Side::Sell && s_pos.side == Side::Buy {
            let s1 = calc_spread(m_bbo.ask, s_bbo.bid);
            if s1 > 0.0 {
                return None;
            }
            (s1, (m_bbo.ask, m_bbo.ask_amount), (s_bbo.bid, s_bbo.bid_amount))
        } else if m_pos.side == Side::Buy && s_pos.side == Side::Sell {
            let s2 = calc_spread(s_bbo.ask, m_bbo.bid);
            if s2 > 0.0 {
                return None;
            }
            (s2, (m_bbo.bid, m_bbo.bid_amount), (s_bbo.ask, s_bbo.ask_amount))
        } else {
            return None;
        };
        let (m_price, m_depth) = m_data;
        let (s_price, s_depth) = s_data;

        let m_rule = m.get_rule(symbol)?;
        let s_rule = s.get_rule(symbol)?;

        // The convergence overshot entry, but the exit still has to pay for
        // itself: gross PnL, then taker fees, then a minimum return on cost.
        let m_fee = (m_price + m_pos.price) * m.taker_fee_rate;
        let s_fee = (s_price + s_pos.price) * s.taker_fee_rate;
        let (m_pnl, s_pnl) = if m_pos.side == Side::Sell {
            (m_pos.price - m_price, s_price - s_pos.price)
        } else {
            (m_price - m_pos.price, s_pos.price - s_price)
        };

        let pnl = m_pnl + s_pnl;
        if pnl <= 0.0 {
            info!(symbol, "spread inverted but the round is not profitable");
            return None;
        }
        let profit = pnl - (m_fee + s_fee);
        if profit <= 0.0 {
            info!(symbol, "spread inverted but fees eat the profit");
            return None;
        }
        let profit_rate = profit / (m_pos.price + s_pos.price);
        if profit_rate < MIN_PROFIT_RATE {
            info!(symbol, profit_rate, "spread inverted but the return is too thin");
            return None;
        }

        let coin_count = (m_depth * m_rule.contract_size * self.bbo_volume_rate)
            .min(s_depth * s_rule.contract_size * self.bbo_volume_rate)
            .min(m_pos.amount * m_rule.contract_size)
            .min(s_pos.amount * s_rule.contract_size);

        let (m_count, s_count) = normalize_amounts(
            coin_count / m_rule.contract_size,
            coin_count / s_rule.contract_size,
            &m_rule,
            &s_rule,
        );
        if m_count == 0.0 || s_count == 0.0 {
            return None;
        }

        Some(Signal {
            symbol: symbol.to_string(),
            order_type: OrderType::Market,
            spread,
            exchanges: vec![
                ExchangeSignal {
                    venue: m.name.to_string(),
                    trade_side: TradeSide::Close,
                    side: m_pos.side,
                    price: m_price,
                    amount: m_count,
                    time_ms: m_bbo.time_ms,
                },
                ExchangeSignal {
                    venue: s.name.to_string(),
                    trade_side: TradeSide::Close,
                    side: s_pos.side,
                    price: s_price,
                    amount: s_count,
                    time_ms: s_bbo.time_ms,
                },
            ],
        })
    }

    // -------------------------------------------------------------------------
    // Capital gate
    // -------------------------------------------------------------------------

    /// Allocatable capital: `balance * pos_rate` per venue, provided the
    /// venue keeps `balance * reserve_margin` untouched after allocation.
    /// Effective capital is the smaller venue's slice; any failed gate
    /// zeroes the round.
    fn available_capital(&self, m: &ExchangeState, s: &ExchangeState) -> f64 {
        let mut slices = [0.0; 2];
        for (i, ex) in [m, s].into_iter().enumerate() {
            let account = ex.account();
            let slice = account.swap_balance * self.pos_rate;
            let reserve = account.swap_balance * self.reserve_margin;
            if account.swap_available <= 0.0 {
                return 0.0;
            }
            if account.swap_available - slice < reserve {
                return 0.0;
            }
            slices[i] = slice;
        }
        slices[0].min(slices[1])
    }
}

impl Strategy for HedgeStrategy {
    fn gen_signal(
        &self,
        now_ms: i64,
        symbol: &str,
        exchanges: &[&ExchangeState],
    ) -> Option<Signal> {
        if exchanges.len() != 2 {
            error!("hedge strategy requires exactly two venues");
            return None;
        }
        let (m, s) = (exchanges[0], exchanges[1]);

        let m_bbo = m.get_last_bbo(symbol)?;
        let s_bbo = s.get_last_bbo(symbol)?;

        // Stale books produce phantom spreads; a tick exactly at the limit
        // still passes.
        if now_ms - m_bbo.time_ms > self.max_delay_ms || now_ms - s_bbo.time_ms > self.max_delay_ms
        {
            return None;
        }

        let m_pos = m.find_position(symbol);
        let s_pos = s.find_position(symbol);

        match (m_pos, s_pos) {
            (Some(mp), Some(sp)) => self.close_signal(symbol, &m_bbo, &s_bbo, m, s, &mp, &sp),
            (None, None) => self.open_signal(symbol, &m_bbo, &s_bbo, m, s),
            // One leg without its hedge is an inconsistency the trader
            // surfaces; adding exposure to it would make things worse.
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Precision normalization
// ---------------------------------------------------------------------------

/// Quantize both contract counts so the coin totals match exactly:
/// `n_m * cs_m == n_s * cs_s` up to the coarser contract size. The venue
/// with the larger contract size is floored first and the finer leg derived
/// from it without re-flooring.
fn normalize_amounts(
    m_count: f64,
    s_count: f64,
    m_rule: &ContractRule,
    s_rule: &ContractRule,
) -> (f64, f64) {
    let prec = m_rule.amount_prec.min(s_rule.amount_prec);

    if m_rule.contract_size == s_rule.contract_size {
        (floor(m_count, prec), floor(s_count, prec))
    } else if m_rule.contract_size < s_rule.contract_size {
        let s_count = floor(s_count, prec);
        (
            s_count * s_rule.contract_size / m_rule.contract_size,
            s_count,
        )
    } else {
        let m_count = floor(m_count, prec);
        (
            m_count,
            m_count * m_rule.contract_size / s_rule.contract_size,
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, Bbo, Position};
    use std::collections::HashMap;

    const NOW: i64 = 1_700_000_000_000;
    const MAX_DELAY: i64 = 200;

    fn strategy() -> HedgeStrategy {
        HedgeStrategy {
            spread_open: 0.005,
            max_delay_ms: MAX_DELAY,
            pos_rate: 1.0,
            reserve_margin: 0.0,
            bbo_volume_rate: 0.1,
            min_nominal: 5.0,
        }
    }

    fn venue(name: &'static str, balance: f64) -> ExchangeState {
        let state = ExchangeState::new(name);
        state.update_account(|acc| {
            *acc = Account {
                user_id: String::new(),
                in_dual_mode: true,
                swap_balance: balance,
                swap_available: balance,
            };
        });
        state
    }

    fn rule(symbol: &str, contract_size: f64, amount_prec: u32) -> ContractRule {
        let mut rule = ContractRule::new(symbol);
        rule.amount_prec = amount_prec;
        rule.max_amount = 1_000_000.0;
        rule.min_amount = 1.0;
        rule.max_leverage = 20;
        rule.trade_leverage = 20;
        rule.contract_size = contract_size;
        rule
    }

    fn install_rule(state: &ExchangeState, rule: ContractRule) {
        let mut rules = HashMap::new();
        rules.insert(rule.symbol.clone(), rule);
        state.replace_rules(rules);
    }

    fn bbo(symbol: &str, bid: f64, bid_amount: f64, ask: f64, ask_amount: f64, t: i64) -> Bbo {
        Bbo {
            symbol: symbol.to_string(),
            bid,
            bid_amount,
            ask,
            ask_amount,
            time_ms: t,
        }
    }

    fn position(symbol: &str, side: Side, price: f64, amount: f64) -> Position {
        Position {
            symbol: symbol.to_string(),
            id: Position::key(symbol, side),
            side,
            price,
            amount,
            c_time_ms: 0,
        }
    }

    /// S1 market: slave bid (0.04651) over master ask (0.04620).
    fn s1_venues() -> (ExchangeState, ExchangeState) {
        let m = venue("Binance", 100.0);
        let s = venue("Gate", 100.0);
        install_rule(&m, rule("ARPAUSDT", 1.0, 0));
        install_rule(&s, rule("ARPAUSDT", 1.0, 0));
        m.upsert_bbo(bbo("ARPAUSDT", 0.04610, 10_000.0, 0.04620, 10_000.0, NOW));
        s.upsert_bbo(bbo("ARPAUSDT", 0.04651, 10_000.0, 0.04700, 10_000.0, NOW));
        (m, s)
    }

    #[test]
    fn open_signal_matched_counts() {
        let (m, s) = s1_venues();
        let signal = strategy()
            .gen_signal(NOW, "ARPAUSDT", &[&m, &s])
            .expect("open signal");

        // Slave bid over master ask: long master, short slave.
        let expected = calc_spread(0.04651, 0.04620);
        assert!((signal.spread - expected).abs() < 1e-9);
        assert!((signal.spread - 0.00669).abs() < 1e-4);
        assert_eq!(signal.order_type, OrderType::Market);

        let m_leg = &signal.exchanges[0];
        let s_leg = &signal.exchanges[1];
        assert_eq!(m_leg.venue, "Binance");
        assert_eq!(m_leg.side, Side::Buy);
        assert_eq!(m_leg.trade_side, TradeSide::Open);
        assert!((m_leg.price - 0.04620).abs() < 1e-12);
        assert_eq!(s_leg.side, Side::Sell);
        assert!((s_leg.price - 0.04651).abs() < 1e-12);

        // 10 000 depth * 0.1 volume rate, well under the capital cap.
        assert!((m_leg.amount - 1000.0).abs() < 1e-9);
        assert!((s_leg.amount - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn no_signal_below_threshold() {
        let (m, s) = s1_venues();
        // Books within a few bps of each other on both sides.
        m.upsert_bbo(bbo("ARPAUSDT", 0.04610, 10_000.0, 0.04615, 10_000.0, NOW));
        s.upsert_bbo(bbo("ARPAUSDT", 0.04612, 10_000.0, 0.04617, 10_000.0, NOW));
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn stale_master_bbo_blocks_signal() {
        let (m, s) = s1_venues();
        m.upsert_bbo(bbo(
            "ARPAUSDT",
            0.04610,
            10_000.0,
            0.04620,
            10_000.0,
            NOW - MAX_DELAY - 100,
        ));
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn staleness_boundary_is_inclusive() {
        let (m, s) = s1_venues();
        // Exactly at the limit passes.
        m.upsert_bbo(bbo("ARPAUSDT", 0.04610, 10_000.0, 0.04620, 10_000.0, NOW - MAX_DELAY));
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_some());

        // One millisecond beyond fails.
        m.upsert_bbo(bbo(
            "ARPAUSDT",
            0.04610,
            10_000.0,
            0.04620,
            10_000.0,
            NOW - MAX_DELAY - 1,
        ));
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn one_sided_inventory_blocks_signal() {
        let (m, s) = s1_venues();
        m.apply_position(position("ARPAUSDT", Side::Sell, 0.05, 1000.0));
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn missing_bbo_blocks_signal() {
        let (m, s) = s1_venues();
        let empty = venue("Gate", 100.0);
        install_rule(&empty, rule("ARPAUSDT", 1.0, 0));
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &empty]).is_none());
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&empty, &s]).is_none());
    }

    #[test]
    fn capital_gate_blocks_when_reserve_violated() {
        let (m, s) = s1_venues();
        let mut strat = strategy();
        // Full allocation would leave nothing; a 20% reserve cannot hold.
        strat.reserve_margin = 0.2;
        assert!(strat.gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn capital_gate_blocks_on_zero_available() {
        let (m, s) = s1_venues();
        s.update_account(|acc| acc.swap_available = 0.0);
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn capital_caps_size_under_leverage() {
        let (m, s) = s1_venues();
        // Tiny balances: 2 * 20 / 0.047 ≈ 851 coins, below the book cap.
        m.update_account(|acc| {
            acc.swap_balance = 2.0;
            acc.swap_available = 2.0;
        });
        s.update_account(|acc| {
            acc.swap_balance = 2.0;
            acc.swap_available = 2.0;
        });
        let signal = strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).unwrap();
        let amount = signal.exchanges[0].amount;
        assert!(amount < 1000.0, "capital must cap below the depth slice");
        assert!((signal.exchanges[0].amount - signal.exchanges[1].amount).abs() < 1e-9);
    }

    #[test]
    fn min_amount_rejects_open() {
        let (m, s) = s1_venues();
        let mut r = rule("ARPAUSDT", 1.0, 0);
        r.min_amount = 5000.0;
        install_rule(&m, r);
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn min_nominal_rejects_open() {
        let (m, s) = s1_venues();
        let mut strat = strategy();
        // 1000 contracts * 0.0462 ≈ 46 quote units.
        strat.min_nominal = 100.0;
        assert!(strat.gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn contract_size_mismatch_keeps_coin_totals_equal() {
        let m = venue("Binance", 10_000.0);
        let s = venue("Gate", 10_000.0);
        install_rule(&m, rule("OPUSDT", 1.0, 0));
        install_rule(&s, rule("OPUSDT", 10.0, 0));
        // Depth chosen so the coin budget (1005) does not divide evenly into
        // slave contracts.
        m.upsert_bbo(bbo("OPUSDT", 0.04610, 10_050.0, 0.04620, 10_050.0, NOW));
        s.upsert_bbo(bbo("OPUSDT", 0.04651, 5_000.0, 0.04700, 5_000.0, NOW));

        let signal = strategy().gen_signal(NOW, "OPUSDT", &[&m, &s]).unwrap();
        let m_leg = &signal.exchanges[0];
        let s_leg = &signal.exchanges[1];

        // Slave floored first, master derived: n_m == 10 * n_s exactly.
        assert!((s_leg.amount - 100.0).abs() < 1e-12);
        assert!((m_leg.amount - 1000.0).abs() < 1e-12);
        assert!((m_leg.amount * 1.0 - s_leg.amount * 10.0).abs() < 1e-12);
    }

    // -------------------------------------------------------------------------
    // Close
    // -------------------------------------------------------------------------

    /// S4 market: master short @ 0.05, slave long @ 0.049, spread inverted.
    fn s4_venues(m_entry: f64, s_entry: f64) -> (ExchangeState, ExchangeState) {
        let m = venue("Binance", 100.0);
        let s = venue("Gate", 100.0);
        install_rule(&m, rule("ARPAUSDT", 1.0, 0));
        install_rule(&s, rule("ARPAUSDT", 1.0, 0));
        m.upsert_bbo(bbo("ARPAUSDT", 0.04690, 10_000.0, 0.04700, 10_000.0, NOW));
        s.upsert_bbo(bbo("ARPAUSDT", 0.04850, 10_000.0, 0.04860, 10_000.0, NOW));
        m.apply_position(position("ARPAUSDT", Side::Sell, m_entry, 1000.0));
        s.apply_position(position("ARPAUSDT", Side::Buy, s_entry, 1000.0));
        (m, s)
    }

    #[test]
    fn close_signal_when_profitable() {
        let (m, s) = s4_venues(0.05000, 0.04900);
        let signal = strategy()
            .gen_signal(NOW, "ARPAUSDT", &[&m, &s])
            .expect("close signal");

        assert!(signal.spread <= 0.0);
        let m_leg = &signal.exchanges[0];
        let s_leg = &signal.exchanges[1];
        assert_eq!(m_leg.trade_side, TradeSide::Close);
        assert_eq!(s_leg.trade_side, TradeSide::Close);
        // Close keeps the held side; executors cross it per venue.
        assert_eq!(m_leg.side, Side::Sell);
        assert_eq!(s_leg.side, Side::Buy);
        // Short closes at the ask, long closes at the bid.
        assert!((m_leg.price - 0.04700).abs() < 1e-12);
        assert!((s_leg.price - 0.04850).abs() < 1e-12);
        // min(depth slice 1000, positions 1000).
        assert!((m_leg.amount - 1000.0).abs() < 1e-9);
        assert!((s_leg.amount - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn close_rejected_when_return_below_floor() {
        // Entries close enough that the return on cost is under 20 bps.
        let (m, s) = s4_venues(0.04775, 0.04900);
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn close_rejected_when_pnl_negative() {
        // Exit prices worse than entries on both legs.
        let (m, s) = s4_venues(0.04600, 0.04900);
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn close_requires_spread_inversion() {
        let (m, s) = s4_venues(0.05000, 0.04900);
        // Master ask still above slave bid: the spread has not inverted.
        m.upsert_bbo(bbo("ARPAUSDT", 0.04990, 10_000.0, 0.05000, 10_000.0, NOW));
        s.upsert_bbo(bbo("ARPAUSDT", 0.04850, 10_000.0, 0.04860, 10_000.0, NOW));
        assert!(strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).is_none());
    }

    #[test]
    fn close_caps_at_position_size() {
        let (m, s) = s4_venues(0.05000, 0.04900);
        // Smaller slave position bounds the round.
        s.apply_position(position("ARPAUSDT", Side::Buy, 0.04900, 400.0));
        let signal = strategy().gen_signal(NOW, "ARPAUSDT", &[&m, &s]).unwrap();
        assert!((signal.exchanges[0].amount - 400.0).abs() < 1e-9);
        assert!((signal.exchanges[1].amount - 400.0).abs() < 1e-9);
    }

    #[test]
    fn close_opposite_entry_direction() {
        // Master long / slave short, closed when the slave's ask drops to
        // (or under) the master's bid.
        let m = venue("Binance", 100.0);
        let s = venue("Gate", 100.0);
        install_rule(&m, rule("ARPAUSDT", 1.0, 0));
        install_rule(&s, rule("ARPAUSDT", 1.0, 0));
        m.upsert_bbo(bbo("ARPAUSDT", 0.05000, 10_000.0, 0.05010, 10_000.0, NOW));
        s.upsert_bbo(bbo("ARPAUSDT", 0.04980, 10_000.0, 0.04990, 10_000.0, NOW));
        m.apply_position(position("ARPAUSDT", Side::Buy, 0.04900, 1000.0));
        s.apply_position(position("ARPAUSDT", Side::Sell, 0.05100, 1000.0));

        let signal = strategy()
            .gen_signal(NOW, "ARPAUSDT", &[&m, &s])
            .expect("close signal");
        // Long master closes at the master bid, short slave at the slave ask.
        assert!((signal.exchanges[0].price - 0.05000).abs() < 1e-12);
        assert!((signal.exchanges[1].price - 0.04990).abs() < 1e-12);
    }

    // -------------------------------------------------------------------------
    // Normalization unit tests
    // -------------------------------------------------------------------------

    #[test]
    fn normalize_equal_sizes_floors_both() {
        let a = rule("X", 1.0, 0);
        let b = rule("X", 1.0, 0);
        let (m, s) = normalize_amounts(10.7, 10.2, &a, &b);
        assert_eq!(m, 10.0);
        assert_eq!(s, 10.0);
    }

    #[test]
    fn normalize_derives_finer_leg_without_reflooring() {
        let fine = rule("X", 0.1, 0);
        let coarse = rule("X", 1.0, 0);
        // Master finer: slave floored, master derived (may be fractional in
        // contracts of the finer venue but exact in coins).
        let (m, s) = normalize_amounts(105.0, 10.5, &fine, &coarse);
        assert_eq!(s, 10.0);
        assert!((m - 100.0).abs() < 1e-9);
        assert!((m * 0.1 - s * 1.0).abs() < 1e-12);

        // Mirrored: master coarser.
        let (m2, s2) = normalize_amounts(10.5, 105.0, &coarse, &fine);
        assert_eq!(m2, 10.0);
        assert!((s2 - 100.0).abs() < 1e-9);
        assert!((m2 * 1.0 - s2 * 0.1).abs() < 1e-12);
    }
}
