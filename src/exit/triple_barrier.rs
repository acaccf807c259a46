// =============================================================================
// Stop & Trailing Manager
// =============================================================================
//
// Reworked from the teacher's time-based triple-barrier (SL/TP1/TP2/time,
// with progressive-tightening-toward-breakeven) into a regime-adaptive ATR
// stop plus a trailing state machine with ATR-multiple partial take-profits.
// Keeps the teacher's shape: an immutable `*Config` built once from ATR and
// regime, mutable `*State` that `evaluate()`s against a live price and
// reports an `ExitReason`, progressive tightening expressed as "only ever
// tighten, never widen" on `current_stop_price`.

use crate::types::{Regime, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const MIN_STOP_PCT: f64 = 1.0;
const MAX_STOP_PCT: f64 = 5.0;
const EMERGENCY_POSITION_LOSS_PCT: f64 = 4.0;

fn atr_multiplier(regime: Regime) -> Option<f64> {
    match regime {
        Regime::Trending => Some(2.5),
        Regime::HighVol => Some(3.0),
        Regime::LowVol => Some(2.0),
        Regime::Sideways => Some(2.0),
        Regime::Choppy => None,
    }
}

fn activation_threshold_pct(regime: Regime) -> f64 {
    match regime {
        Regime::Trending => 2.5,
        Regime::Sideways => 1.5,
        _ => 2.0,
    }
}

/// The regime-adaptive initial stop, computed once at position open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    pub stop_distance: f64,
    pub stop_distance_pct: f64,
    pub regime: Regime,
}

impl StopConfig {
    /// Returns `None` when `regime` is CHOPPY — the Stop Manager has no
    /// initial stop for a regime the Gate should already have rejected the
    /// entry for.
    pub fn from_atr(atr: f64, entry_price: f64, regime: Regime) -> Option<Self> {
        let multiplier = atr_multiplier(regime)?;
        if entry_price <= 0.0 {
            return None;
        }
        let raw_distance = multiplier * atr;
        let raw_pct = raw_distance / entry_price * 100.0;
        let bounded_pct = raw_pct.clamp(MIN_STOP_PCT, MAX_STOP_PCT);
        let stop_distance = entry_price * bounded_pct / 100.0;

        debug!(
            %regime,
            atr,
            stop_distance_pct = format!("{bounded_pct:.3}"),
            "initial stop computed"
        );

        Some(Self {
            stop_distance,
            stop_distance_pct: bounded_pct,
            regime,
        })
    }

    /// If the stop distance applied at full `size_usd` would risk more than
    /// `max_loss_pct` of the position's value, returns the size multiplier
    /// (`<= 1.0`) that brings max loss back within budget. The stop itself
    /// is never tightened to compensate — size shrinks instead.
    pub fn size_shrink_factor(&self, max_loss_pct: f64) -> f64 {
        if self.stop_distance_pct <= max_loss_pct || max_loss_pct <= 0.0 {
            1.0
        } else {
            max_loss_pct / self.stop_distance_pct
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrailPhase {
    Inactive,
    Active,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialExit {
    pub at: DateTime<Utc>,
    pub close_pct: f64,
    pub r_multiple: f64,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailStop,
    EmergencyPositionLoss,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StopLoss => write!(f, "SL"),
            Self::TrailStop => write!(f, "TRAIL"),
            Self::EmergencyPositionLoss => write!(f, "EMERGENCY"),
        }
    }
}

/// Mutable per-position trailing state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailState {
    pub config: StopConfig,
    pub entry_price: f64,
    pub side: Side,
    pub initial_stop: f64,
    pub current_stop_price: f64,
    pub phase: TrailPhase,
    pub peak_price: f64,
    pub use_tight_trailing: bool,
    pub tp1_done: bool,
    pub tp2_done: bool,
    pub partial_exits: Vec<PartialExit>,
}

impl TrailState {
    pub fn new(config: StopConfig, entry_price: f64, side: Side, use_tight_trailing: bool) -> Self {
        let initial_stop = match side {
            Side::Long => entry_price - config.stop_distance,
            Side::Short => entry_price + config.stop_distance,
        };
        info!(
            %side,
            entry_price,
            stop = format!("{initial_stop:.4}"),
            "trail state initialized"
        );
        Self {
            config,
            entry_price,
            side,
            initial_stop,
            current_stop_price: initial_stop,
            phase: TrailPhase::Inactive,
            peak_price: entry_price,
            use_tight_trailing,
            tp1_done: false,
            tp2_done: false,
            partial_exits: Vec::new(),
        }
    }

    fn profit_pct(&self, price: f64) -> f64 {
        match self.side {
            Side::Long => (price - self.entry_price) / self.entry_price * 100.0,
            Side::Short => (self.entry_price - price) / self.entry_price * 100.0,
        }
    }

    fn r_multiple(&self, price: f64) -> f64 {
        let risk = (self.entry_price - self.initial_stop).abs();
        if risk <= 0.0 {
            return 0.0;
        }
        let reward = match self.side {
            Side::Long => price - self.entry_price,
            Side::Short => self.entry_price - price,
        };
        reward / risk
    }

    /// Evaluate the current price against the stop, trailing activation,
    /// partial take-profits, and the single-position emergency-loss floor.
    /// Mutates `current_stop_price`/`peak_price`/partial-exit bookkeeping in
    /// place; returns `Some(reason)` when the remaining position should be
    /// closed now.
    pub fn evaluate(&mut self, now: DateTime<Utc>, price: f64, atr: f64) -> Option<ExitReason> {
        let profit_pct = self.profit_pct(price);

        if -profit_pct >= EMERGENCY_POSITION_LOSS_PCT {
            return Some(ExitReason::EmergencyPositionLoss);
        }

        let stop_hit = match self.side {
            Side::Long => price <= self.current_stop_price,
            Side::Short => price >= self.current_stop_price,
        };
        if stop_hit {
            let reason = if self.phase == TrailPhase::Active {
                ExitReason::TrailStop
            } else {
                ExitReason::StopLoss
            };
            return Some(reason);
        }

        if self.phase == TrailPhase::Inactive
            && profit_pct >= activation_threshold_pct(self.config.regime)
        {
            self.phase = TrailPhase::Active;
            self.peak_price = price;
            debug!(profit_pct, "trailing activated");
        }

        if self.phase == TrailPhase::Active {
            let favorable = match self.side {
                Side::Long => price > self.peak_price,
                Side::Short => price < self.peak_price,
            };
            if favorable {
                self.peak_price = price;
            }

            let trail_mult = if self.use_tight_trailing {
                0.5
            } else if profit_pct >= 3.0 {
                1.0
            } else {
                1.5
            };
            let trail_distance = trail_mult * atr;

            let candidate_stop = match self.side {
                Side::Long => self.peak_price - trail_distance,
                Side::Short => self.peak_price + trail_distance,
            };

            match self.side {
                Side::Long => {
                    if candidate_stop > self.current_stop_price {
                        self.current_stop_price = candidate_stop;
                    }
                }
                Side::Short => {
                    if candidate_stop < self.current_stop_price {
                        self.current_stop_price = candidate_stop;
                    }
                }
            }
        }

        if !self.tp1_done && atr > 0.0 {
            let target = match self.side {
                Side::Long => self.entry_price + 1.5 * atr,
                Side::Short => self.entry_price - 1.5 * atr,
            };
            let reached = match self.side {
                Side::Long => price >= target,
                Side::Short => price <= target,
            };
            if reached {
                self.tp1_done = true;
                self.partial_exits.push(PartialExit {
                    at: now,
                    close_pct: 30.0,
                    r_multiple: self.r_multiple(price),
                    reason: "TP1",
                });
                debug!(price, "TP1 partial exit recorded");
            }
        }

        if !self.tp2_done && atr > 0.0 {
            let target = match self.side {
                Side::Long => self.entry_price + 2.5 * atr,
                Side::Short => self.entry_price - 2.5 * atr,
            };
            let reached = match self.side {
                Side::Long => price >= target,
                Side::Short => price <= target,
            };
            if reached {
                self.tp2_done = true;
                self.partial_exits.push(PartialExit {
                    at: now,
                    close_pct: 30.0,
                    r_multiple: self.r_multiple(price),
                    reason: "TP2",
                });
                debug!(price, "TP2 partial exit recorded");
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn choppy_regime_has_no_initial_stop() {
        assert!(StopConfig::from_atr(1.0, 100.0, Regime::Choppy).is_none());
    }

    #[test]
    fn stop_distance_pct_is_bounded() {
        let tight = StopConfig::from_atr(0.01, 100.0, Regime::LowVol).unwrap();
        assert!(tight.stop_distance_pct >= MIN_STOP_PCT);

        let wide = StopConfig::from_atr(100.0, 100.0, Regime::HighVol).unwrap();
        assert!(wide.stop_distance_pct <= MAX_STOP_PCT);
    }

    #[test]
    fn size_shrink_factor_is_one_within_budget() {
        let config = StopConfig::from_atr(1.0, 100.0, Regime::LowVol).unwrap();
        assert_eq!(config.size_shrink_factor(10.0), 1.0);
    }

    #[test]
    fn size_shrink_factor_shrinks_when_over_budget() {
        let config = StopConfig::from_atr(10.0, 100.0, Regime::HighVol).unwrap();
        // stop_distance_pct clamped to 5.0; max_loss_pct of 2.0 should shrink.
        let factor = config.size_shrink_factor(2.0);
        assert!(factor < 1.0);
        assert!((config.stop_distance_pct * factor - 2.0).abs() < 1e-9);
    }

    #[test]
    fn long_stop_loss_triggers_before_activation() {
        let config = StopConfig::from_atr(1.0, 100.0, Regime::Trending).unwrap();
        let mut state = TrailState::new(config, 100.0, Side::Long, false);
        let reason = state.evaluate(Utc::now(), state.initial_stop - 0.01, 1.0);
        assert_eq!(reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn trailing_activates_and_never_widens() {
        let config = StopConfig::from_atr(1.0, 100.0, Regime::Trending).unwrap();
        let mut state = TrailState::new(config, 100.0, Side::Long, false);

        state.evaluate(Utc::now(), 103.0, 1.0); // +3% activates trailing (threshold 2.5%)
        assert_eq!(state.phase, TrailPhase::Active);
        let stop_after_first = state.current_stop_price;

        state.evaluate(Utc::now(), 104.0, 1.0);
        assert!(state.current_stop_price >= stop_after_first);

        state.evaluate(Utc::now(), 103.5, 1.0);
        assert!(state.current_stop_price >= stop_after_first);
    }

    #[test]
    fn tp1_and_tp2_record_partial_exits() {
        let config = StopConfig::from_atr(1.0, 100.0, Regime::Trending).unwrap();
        let mut state = TrailState::new(config, 100.0, Side::Long, false);

        state.evaluate(Utc::now(), 101.5, 1.0); // entry + 1.5*atr
        assert!(state.tp1_done);
        assert_eq!(state.partial_exits.len(), 1);

        state.evaluate(Utc::now(), 102.5, 1.0); // entry + 2.5*atr
        assert!(state.tp2_done);
        assert_eq!(state.partial_exits.len(), 2);
    }

    #[test]
    fn emergency_position_loss_closes_immediately() {
        let config = StopConfig::from_atr(10.0, 100.0, Regime::HighVol).unwrap();
        let mut state = TrailState::new(config, 100.0, Side::Long, false);
        let reason = state.evaluate(Utc::now(), 95.0, 1.0); // -5% loss
        assert_eq!(reason, Some(ExitReason::EmergencyPositionLoss));
    }

    #[test]
    fn breakout_tight_trailing_uses_half_atr() {
        let config = StopConfig::from_atr(1.0, 100.0, Regime::Trending).unwrap();
        let mut state = TrailState::new(config, 100.0, Side::Long, true);
        state.evaluate(Utc::now(), 103.0, 1.0);
        assert_eq!(state.phase, TrailPhase::Active);
        // tight trailing: trail_distance = 0.5*atr = 0.5, stop = peak - 0.5
        assert!((state.current_stop_price - (103.0 - 0.5)).abs() < 1e-9);
    }
}
