// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// Formula:
//   MACD line   = EMA(12) - EMA(26)
//   Signal line = EMA(9) of the MACD line
//   Histogram   = MACD line - Signal line
//
// Built on top of `calculate_ema`, same as the teacher's `ema::ema_trend_aligned`
// composes multiple EMA periods rather than reimplementing smoothing.
// =============================================================================

use super::ema::calculate_ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the most recent MACD(12,26,9) reading from a `closes` slice.
///
/// # Edge cases
/// - Fewer than `26 + 9` closes => `None` (not enough history to seed both
///   the slow EMA and the signal EMA of the MACD line).
/// - Any non-finite intermediate value => `None`.
pub fn calculate_macd(closes: &[f64]) -> Option<MacdResult> {
    const FAST: usize = 12;
    const SLOW: usize = 26;
    const SIGNAL: usize = 9;

    if closes.len() < SLOW + SIGNAL {
        return None;
    }

    let ema_fast = calculate_ema(closes, FAST);
    let ema_slow = calculate_ema(closes, SLOW);
    if ema_fast.len() < ema_slow.len() {
        return None;
    }

    // Align series: ema_fast starts FAST-1 earlier than ema_slow, so drop the
    // leading entries that precede ema_slow's first value.
    let offset = ema_fast.len() - ema_slow.len();
    let macd_line: Vec<f64> = ema_fast[offset..]
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    if macd_line.len() < SIGNAL {
        return None;
    }

    let signal_line = calculate_ema(&macd_line, SIGNAL);
    let macd = *macd_line.last()?;
    let signal = *signal_line.last()?;
    let histogram = macd - signal;

    if !macd.is_finite() || !signal.is_finite() || !histogram.is_finite() {
        return None;
    }

    Some(MacdResult {
        macd,
        signal,
        histogram,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f64> {
        (1..=n).map(|i| i as f64).collect()
    }

    #[test]
    fn insufficient_history_returns_none() {
        assert!(calculate_macd(&ascending(30)).is_none());
    }

    #[test]
    fn steady_uptrend_produces_positive_macd() {
        let closes = ascending(80);
        let result = calculate_macd(&closes).expect("enough history");
        assert!(result.macd > 0.0, "fast EMA should lead slow EMA in an uptrend");
    }

    #[test]
    fn flat_series_macd_near_zero() {
        let closes = vec![100.0; 80];
        let result = calculate_macd(&closes).expect("enough history");
        assert!(result.macd.abs() < 1e-9);
        assert!(result.histogram.abs() < 1e-9);
    }
}
