// =============================================================================
// Market Regime Detector
// =============================================================================
//
// Classifies the current market into one of five regimes. Tie-break order
// (first match wins) is fixed: CHOPPY > SIDEWAYS > HIGH_VOL > LOW_VOL >
// TRENDING.
//
//   1. CHOPPY    — price crosses ema9 more than 4 times over the last 20
//                  candles, or adx14 < 15.
//   2. SIDEWAYS  — closing price stays within a 2% band over the last 20
//                  candles.
//   3. HIGH_VOL  — atr14 > 1.5 * atrAverage.
//   4. LOW_VOL   — atr14 < 0.5 * atrAverage.
//   5. TRENDING  — none of the above.
//
// `regime/entropy.rs` and `regime/hurst.rs` are kept as enrichment — they
// annotate a TRENDING read with a mean-reversion warning but never change
// the classification itself, preserving the fixed tie-break order above.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::calculate_atr;
use crate::indicators::ema::calculate_ema;
use crate::market_data::Candle;
use crate::regime::entropy::ShannonEntropyFilter;
use crate::regime::hurst::calculate_hurst_exponent;
use crate::types::Regime;

/// Complete snapshot of the detected regime plus contributing metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: Regime,
    pub adx: f64,
    pub atr: f64,
    pub atr_average: f64,
    pub ema9_cross_count: u32,
    pub price_band_pct: f64,
    /// Hurst exponent, kept as an enrichment annotation — does not affect
    /// `regime`.
    pub hurst: f64,
    /// Shannon entropy of candle direction distribution, same enrichment
    /// role as `hurst`.
    pub entropy: f64,
    pub mean_reverting_microstructure: bool,
    pub regime_age_secs: f64,
}

pub struct RegimeDetector {
    state: RwLock<Option<RegimeState>>,
    last_change_time: RwLock<Instant>,
}

impl RegimeDetector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(None),
            last_change_time: RwLock::new(Instant::now()),
        })
    }

    /// Run full regime detection on the provided candles (oldest first,
    /// latest closed candle last) and their closing prices.
    pub fn detect(&self, candles: &[Candle], closes: &[f64]) -> Option<RegimeState> {
        if closes.len() < 21 {
            return None;
        }

        let adx_value = calculate_adx(candles, 14).unwrap_or(0.0);
        let atr_value = calculate_atr(candles, 14).unwrap_or(0.0);
        let atr_average = rolling_atr_average(candles, 14, 20).unwrap_or(atr_value);
        let ema9 = calculate_ema(closes, 9);
        let cross_count = ema9_cross_count(closes, &ema9, 20);
        let price_band_pct = price_band_pct(closes, 20);
        let hurst_value = calculate_hurst_exponent(closes).unwrap_or(0.50);
        let entropy_value = ShannonEntropyFilter::calculate(candles, 50).unwrap_or(0.0);

        let regime = classify(adx_value, atr_value, atr_average, cross_count, price_band_pct);

        // Enrichment only: a nominally TRENDING regime with a low Hurst
        // exponent and high entropy may be exhibiting mean-reverting
        // microstructure underneath a directional close-to-close move.
        let mean_reverting_microstructure =
            regime == Regime::Trending && hurst_value < 0.45 && entropy_value > 0.80;

        let now = Instant::now();
        let prev_regime = self.state.read().as_ref().map(|s| s.regime);
        if prev_regime != Some(regime) {
            *self.last_change_time.write() = now;
        }
        let regime_age_secs = now.duration_since(*self.last_change_time.read()).as_secs_f64();

        let new_state = RegimeState {
            regime,
            adx: adx_value,
            atr: atr_value,
            atr_average,
            ema9_cross_count: cross_count,
            price_band_pct,
            hurst: hurst_value,
            entropy: entropy_value,
            mean_reverting_microstructure,
            regime_age_secs,
        };

        debug!(
            regime = %regime,
            adx = format!("{:.2}", adx_value),
            atr = format!("{:.4}", atr_value),
            atr_average = format!("{:.4}", atr_average),
            cross_count,
            price_band_pct = format!("{:.3}", price_band_pct),
            age_secs = format!("{:.1}", regime_age_secs),
            "regime detected"
        );

        *self.state.write() = Some(new_state.clone());
        Some(new_state)
    }

    pub fn update(&self, candles: &[Candle]) -> Option<RegimeState> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        self.detect(candles, &closes)
    }

    pub fn current_regime(&self) -> Option<RegimeState> {
        self.state.read().clone()
    }
}

impl Default for RegimeDetector {
    fn default() -> Self {
        Self {
            state: RwLock::new(None),
            last_change_time: RwLock::new(Instant::now()),
        }
    }
}

/// Average of the rolling ATR(`period`) reading taken at each of the last
/// `lookback` closed candles. Used as the baseline `atrAverage` the current
/// ATR is compared against for HIGH_VOL/LOW_VOL classification.
fn rolling_atr_average(candles: &[Candle], period: usize, lookback: usize) -> Option<f64> {
    let min_len = period + 1;
    if candles.len() < min_len {
        return None;
    }
    let usable_lookback = lookback.min(candles.len() - min_len + 1);
    if usable_lookback == 0 {
        return None;
    }
    let mut sum = 0.0;
    let mut count = 0u32;
    for i in 0..usable_lookback {
        let end = candles.len() - i;
        if let Some(atr) = calculate_atr(&candles[..end], period) {
            sum += atr;
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Count how many times the close crosses its EMA9 over the last `window`
/// closed candles.
fn ema9_cross_count(closes: &[f64], ema9: &[f64], window: usize) -> u32 {
    if ema9.is_empty() {
        return 0;
    }
    // ema9[i] corresponds to closes[8 + i]; align both series to their
    // common tail before comparing signs.
    let offset = closes.len() - ema9.len();
    let take = window.min(ema9.len().saturating_sub(1));
    if take == 0 {
        return 0;
    }
    let start = ema9.len() - take - 1;
    let mut crossings = 0u32;
    let mut prev_above = closes[start + offset] > ema9[start];
    for i in (start + 1)..ema9.len() {
        let above = closes[i + offset] > ema9[i];
        if above != prev_above {
            crossings += 1;
        }
        prev_above = above;
    }
    crossings
}

/// `(max - min) / min` over the last `window` closes, as a fraction (0.02 ==
/// 2%).
fn price_band_pct(closes: &[f64], window: usize) -> f64 {
    let take = window.min(closes.len());
    if take == 0 {
        return f64::INFINITY;
    }
    let slice = &closes[closes.len() - take..];
    let min = slice.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = slice.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if min <= 0.0 || !min.is_finite() || !max.is_finite() {
        return f64::INFINITY;
    }
    (max - min) / min
}

fn classify(adx: f64, atr: f64, atr_average: f64, cross_count: u32, price_band_pct: f64) -> Regime {
    if cross_count > 4 || adx < 15.0 {
        return Regime::Choppy;
    }
    if price_band_pct <= 0.02 {
        return Regime::Sideways;
    }
    if atr_average > 0.0 && atr > 1.5 * atr_average {
        return Regime::HighVol;
    }
    if atr_average > 0.0 && atr < 0.5 * atr_average {
        return Regime::LowVol;
    }
    Regime::Trending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choppy_wins_on_low_adx() {
        assert_eq!(classify(10.0, 1.0, 1.0, 0, 0.001), Regime::Choppy);
    }

    #[test]
    fn choppy_wins_on_cross_count() {
        assert_eq!(classify(30.0, 1.0, 1.0, 5, 0.001), Regime::Choppy);
    }

    #[test]
    fn sideways_when_within_band() {
        assert_eq!(classify(30.0, 1.0, 1.0, 0, 0.015), Regime::Sideways);
    }

    #[test]
    fn high_vol_when_atr_expands() {
        assert_eq!(classify(30.0, 2.0, 1.0, 0, 0.05), Regime::HighVol);
    }

    #[test]
    fn low_vol_when_atr_contracts() {
        assert_eq!(classify(30.0, 0.3, 1.0, 0, 0.05), Regime::LowVol);
    }

    #[test]
    fn trending_is_the_default() {
        assert_eq!(classify(30.0, 1.0, 1.0, 0, 0.05), Regime::Trending);
    }

    #[test]
    fn choppy_takes_priority_over_sideways_and_vol() {
        assert_eq!(classify(10.0, 2.0, 1.0, 0, 0.001), Regime::Choppy);
    }

    #[test]
    fn price_band_pct_detects_tight_range() {
        let closes: Vec<f64> = vec![100.0; 25];
        assert!(price_band_pct(&closes, 20) < 1e-9);
    }

    #[test]
    fn price_band_pct_detects_wide_range() {
        let mut closes = vec![100.0; 19];
        closes.push(150.0);
        assert!(price_band_pct(&closes, 20) > 0.4);
    }

    #[test]
    fn ema9_cross_count_zero_for_monotonic_series() {
        let closes: Vec<f64> = (1..=40).map(|i| i as f64).collect();
        let ema9 = calculate_ema(&closes, 9);
        assert_eq!(ema9_cross_count(&closes, &ema9, 20), 0);
    }
}
