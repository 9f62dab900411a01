// =============================================================================
// Exchange-compatible float quantization and spread math
// =============================================================================

/// Floor `number` at `decimals` fractional digits.
///
/// Quantization happens in integer space (`number * 10^decimals` truncated
/// toward negative infinity) so the result is always a valid exchange step.
/// Returns 0.0 when the input or the scaled integer collapses to zero.
pub fn floor(number: f64, decimals: u32) -> f64 {
    if number == 0.0 {
        return 0.0;
    }
    let factor = 10f64.powi(decimals as i32);
    let n = (number * factor).floor();
    if n == 0.0 {
        return 0.0;
    }
    n / factor
}

/// Ceil `number` at `decimals` fractional digits.
pub fn ceil(number: f64, decimals: u32) -> f64 {
    if number == 0.0 {
        return 0.0;
    }
    let factor = 10f64.powi(decimals as i32);
    let n = (number * factor).ceil();
    if n == 0.0 {
        return 0.0;
    }
    n / factor
}

/// Normalized inter-venue spread: `(high - low) / ((high + low) / 2)`.
pub fn calc_spread(high: f64, low: f64) -> f64 {
    (high - low) / ((high + low) / 2.0)
}

/// Count of significant fractional digits in a decimal step string.
///
/// Venues report price steps as strings like `"0.001"`; the fractional digit
/// count (3 here) is the precision used for quantization. Scientific notation
/// is expanded before counting, trailing zeros are not significant.
pub fn prec(step: &str) -> u32 {
    let expanded;
    let s = if step.contains(['e', 'E']) {
        expanded = format!("{:.12}", step.parse::<f64>().unwrap_or(0.0));
        expanded.as_str()
    } else {
        step
    };

    match s.split_once('.') {
        Some((_, frac)) => frac.trim_end_matches('0').len() as u32,
        None => 0,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-12;

    #[test]
    fn floor_truncates_toward_zero_steps() {
        assert!((floor(149.678, 2) - 149.67).abs() < EPS);
        assert!((floor(0.046199, 4) - 0.0461).abs() < EPS);
        assert!((floor(1234.0, 0) - 1234.0).abs() < EPS);
    }

    #[test]
    fn floor_zero_inputs() {
        assert_eq!(floor(0.0, 4), 0.0);
        // Scaled integer collapses to zero below the step size.
        assert_eq!(floor(0.0001, 2), 0.0);
    }

    #[test]
    fn floor_matches_scaled_integer_law() {
        // floor(x, d) * 10^d == floor(x * 10^d)
        for &(x, d) in &[(3.14159, 3u32), (0.0457, 2), (12.5, 0), (99.999, 1)] {
            let factor = 10f64.powi(d as i32);
            assert!((floor(x, d) * factor - (x * factor).floor()).abs() < 1e-9);
        }
    }

    #[test]
    fn ceil_rounds_up_at_decimals() {
        assert!((ceil(149.671, 2) - 149.68).abs() < EPS);
        assert!((ceil(0.04611, 4) - 0.0462).abs() < EPS);
        assert_eq!(ceil(0.0, 5), 0.0);
    }

    #[test]
    fn spread_basic() {
        let s = calc_spread(0.04651, 0.04620);
        assert!((s - 0.006689).abs() < 1e-5);
    }

    #[test]
    fn spread_laws() {
        // spread(a, a) == 0
        assert_eq!(calc_spread(5.0, 5.0), 0.0);
        // spread(a, b) == -spread(b, a)
        assert!((calc_spread(3.0, 2.0) + calc_spread(2.0, 3.0)).abs() < EPS);
    }

    #[test]
    fn prec_plain_decimals() {
        assert_eq!(prec("0.001"), 3);
        assert_eq!(prec("0.0001"), 4);
        assert_eq!(prec("1"), 0);
        assert_eq!(prec("10"), 0);
        assert_eq!(prec("0.050"), 2);
        assert_eq!(prec("1.0"), 0);
    }

    #[test]
    fn prec_scientific_notation() {
        assert_eq!(prec("1e-7"), 7);
        assert_eq!(prec("5E-3"), 3);
    }
}
