// =============================================================================
// Position Sizer & Leverage Calculator
// =============================================================================
//
// No direct spot analog in the teacher — spot positions are unleveraged and
// sized by a single `StrategyParams` percentage. This module generalizes
// that single-percentage idea into confidence-tiered sizing plus a Kelly
// guard and a leverage table, kept in the same plain free-function style as
// `indicators/*` (pure computation, `Option`/clamped outputs, no I/O).

use crate::types::Regime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizerConfig {
    pub min_size_pct: f64,
    pub max_size_pct: f64,
    pub leverage_cap: u32,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            min_size_pct: 8.0,
            max_size_pct: 25.0,
            leverage_cap: 8,
        }
    }
}

/// Trailing trade-history stats for the symbol being sized, sourced from the
/// Trade Journal.
#[derive(Debug, Clone, Copy, Default)]
pub struct SymbolHistory {
    pub closed_trade_count: u32,
    pub win_rate: f64,
    pub reward_risk_ratio: f64,
    pub consecutive_losses: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingResult {
    pub size_pct: f64,
    pub leverage: u32,
}

/// `confidence` is the Gate's post-bonus confidence; `attenuation` is the
/// product of every `PassWithAttenuation` multiplier the Gate applied.
/// Returns `None` when the confidence tier floor isn't met (the tier table
/// itself has no entry below 60, matching the Gate's own confidence floor).
pub fn size_position(
    confidence: f64,
    regime: Regime,
    history: SymbolHistory,
    attenuation: f64,
    config: &SizerConfig,
) -> Option<SizingResult> {
    let mut size_pct = confidence_tier_size_pct(confidence)?;
    size_pct *= attenuation;

    if history.closed_trade_count >= 10 {
        let kelly = history.win_rate - (1.0 - history.win_rate) / history.reward_risk_ratio.max(f64::EPSILON);
        let kelly = kelly.max(0.0);
        let factor = if history.win_rate >= 0.40 { 0.25 } else { 0.15 };
        let kelly_cap = factor * kelly * 100.0;
        size_pct = size_pct.min(kelly_cap);
    }

    size_pct = size_pct.clamp(config.min_size_pct, config.max_size_pct);

    let mut leverage = leverage_tier(confidence, config.leverage_cap);
    if matches!(regime, Regime::HighVol | Regime::Choppy) {
        leverage = ((leverage as f64) * 0.5).round() as u32;
    }
    if history.consecutive_losses >= 2 {
        size_pct /= 2.0;
        leverage = ((leverage as f64) / 2.0).round() as u32;
    }
    leverage = leverage.clamp(1, config.leverage_cap);
    size_pct = size_pct.clamp(config.min_size_pct.min(size_pct), config.max_size_pct);

    Some(SizingResult { size_pct, leverage })
}

fn confidence_tier_size_pct(confidence: f64) -> Option<f64> {
    if confidence >= 90.0 {
        Some(20.0)
    } else if confidence >= 80.0 {
        Some(18.0)
    } else if confidence >= 70.0 {
        Some(15.0)
    } else if confidence >= 60.0 {
        Some(12.0)
    } else {
        None
    }
}

fn leverage_tier(confidence: f64, cap: u32) -> u32 {
    let tier = if confidence >= 90.0 {
        8
    } else if confidence >= 80.0 {
        6
    } else if confidence >= 70.0 {
        5
    } else {
        3
    };
    tier.min(cap)
}

/// `sizeUsd = availableCapitalUsd * sizePct / 100`, clamped to never exceed
/// `availableCapitalUsd` (floating-point rounding guard).
pub fn size_usd(size_pct: f64, available_capital_usd: f64) -> f64 {
    (available_capital_usd * size_pct / 100.0).min(available_capital_usd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_history() -> SymbolHistory {
        SymbolHistory::default()
    }

    #[test]
    fn below_60_confidence_yields_no_sizing() {
        assert!(size_position(55.0, Regime::Trending, no_history(), 1.0, &SizerConfig::default()).is_none());
    }

    #[test]
    fn top_tier_confidence_sizes_at_20_pct_with_8x_leverage() {
        let result = size_position(95.0, Regime::Trending, no_history(), 1.0, &SizerConfig::default()).unwrap();
        assert_eq!(result.size_pct, 20.0);
        assert_eq!(result.leverage, 8);
    }

    #[test]
    fn attenuation_shrinks_size_pct() {
        let result = size_position(95.0, Regime::Trending, no_history(), 0.5, &SizerConfig::default()).unwrap();
        assert_eq!(result.size_pct, 10.0);
    }

    #[test]
    fn high_vol_regime_halves_leverage() {
        let result = size_position(95.0, Regime::HighVol, no_history(), 1.0, &SizerConfig::default()).unwrap();
        assert_eq!(result.leverage, 4);
    }

    #[test]
    fn consecutive_losses_halve_size_and_leverage() {
        let history = SymbolHistory {
            consecutive_losses: 2,
            ..SymbolHistory::default()
        };
        let result = size_position(95.0, Regime::Trending, history, 1.0, &SizerConfig::default()).unwrap();
        assert_eq!(result.size_pct, 10.0);
        assert_eq!(result.leverage, 4);
    }

    #[test]
    fn kelly_guard_caps_size_for_established_symbol() {
        let history = SymbolHistory {
            closed_trade_count: 15,
            win_rate: 0.45,
            reward_risk_ratio: 1.0,
            consecutive_losses: 0,
        };
        // kelly = 0.45 - 0.55/1.0 = -0.10 -> max(kelly,0) = 0 -> kelly_cap = 0
        // clamped up to min_size_pct floor.
        let result = size_position(95.0, Regime::Trending, history, 1.0, &SizerConfig::default()).unwrap();
        assert_eq!(result.size_pct, SizerConfig::default().min_size_pct);
    }

    #[test]
    fn size_pct_never_exceeds_max() {
        let result = size_position(100.0, Regime::Trending, no_history(), 2.0, &SizerConfig::default()).unwrap();
        assert!(result.size_pct <= SizerConfig::default().max_size_pct);
    }

    #[test]
    fn size_usd_never_exceeds_available_capital() {
        assert_eq!(size_usd(25.0, 1000.0), 250.0);
        assert!(size_usd(1000.0, 1000.0) <= 1000.0);
    }

    #[test]
    fn leverage_never_exceeds_hard_cap() {
        let config = SizerConfig {
            leverage_cap: 8,
            ..SizerConfig::default()
        };
        let result = size_position(100.0, Regime::Trending, no_history(), 1.0, &config).unwrap();
        assert!(result.leverage <= 8);
    }
}
