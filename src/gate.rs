// =============================================================================
// Signal Quality Gate
// =============================================================================
//
// Replaces the teacher's `smart_filters.rs` + `trade_insurance.rs` pair.
// Both of those short-circuit on the first `Some(reason)` returned by an
// ordered list of checks; this module keeps that short-circuit shape but
// generalizes the per-check result from a bare rejection reason to a
// `Decision` that can also attenuate size, since the spec's filters need to
// shrink a position rather than only allow/deny it. Every filter's verdict
// is recorded for the audit trail the same way `decision_envelope.rs`
// records `insurance_verdict`/`smart_filters` on the teacher's
// `DecisionEnvelope`.

use crate::blacklist::Blacklist;
use crate::correlation::CorrelationTable;
use crate::types::{Proposal, Regime, Side};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of a single filter, or of the gate as a whole.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Pass,
    PassWithAttenuation(f64, String),
    Reject(String),
}

impl Decision {
    fn is_reject(&self) -> bool {
        matches!(self, Decision::Reject(_))
    }

    fn multiplier(&self) -> f64 {
        match self {
            Decision::Pass => 1.0,
            Decision::PassWithAttenuation(m, _) => *m,
            Decision::Reject(_) => 0.0,
        }
    }
}

/// Thresholds the Gate applies. Exposed as configuration per the resolved
/// Open Question on confidence thresholds (see `DESIGN.md`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub min_confidence_trending: f64,
    pub min_confidence_other: f64,
    pub attenuation_band_lo: f64,
    pub attenuation_band_hi: f64,
    pub min_volume_ratio: f64,
    pub reject_volume_ratio: f64,
    pub correlation_group_cap: u32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_confidence_trending: 60.0,
            min_confidence_other: 65.0,
            attenuation_band_lo: 50.0,
            attenuation_band_hi: 70.0,
            min_volume_ratio: 1.5,
            reject_volume_ratio: 0.8,
            correlation_group_cap: 2,
        }
    }
}

/// Per-engine state the Gate consults but does not own: exposure headroom,
/// open position counts by correlation group, and the global risk monitor's
/// verdict. Gathered by the engine loop before each gate evaluation.
pub struct GateInputs<'a> {
    pub now: DateTime<Utc>,
    pub blacklist: &'a Blacklist,
    pub correlation: &'a CorrelationTable,
    pub open_positions_in_group: u32,
    pub allocated_capital_usd: f64,
    pub current_exposure_usd: f64,
    pub risk_can_open: bool,
}

/// One filter's recorded verdict, suitable for appending to a
/// `DecisionEnvelope`-style audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRecord {
    pub name: &'static str,
    pub verdict: String,
}

/// Aggregate result of running a Proposal through every filter.
#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub final_decision: Decision,
    /// Product of every PassWithAttenuation multiplier encountered before
    /// the first Reject (or before the end, if none rejected).
    pub size_multiplier: f64,
    /// Confidence after filter-applied bonuses (MicroAligner, VolumeConfirmer,
    /// BreakoutDetector); unchanged from the proposal's own confidence if no
    /// bonus-bearing filter fired.
    pub adjusted_confidence: f64,
    pub use_tight_trailing: bool,
    pub records: Vec<FilterRecord>,
}

impl GateVerdict {
    pub fn allowed(&self) -> bool {
        !self.final_decision.is_reject()
    }
}

pub struct Gate {
    config: GateConfig,
}

impl Gate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Run `proposal` through all 11 filters in spec order, stopping at the
    /// first `Reject`. Side is taken from `proposal.side`, already forced to
    /// the analyzer's dominant direction by the time a Proposal exists.
    pub fn evaluate(&self, proposal: &Proposal, inputs: &GateInputs) -> GateVerdict {
        let mut records = Vec::with_capacity(11);
        let mut multiplier = 1.0_f64;
        let mut confidence = proposal.confidence;
        let mut use_tight_trailing = false;

        macro_rules! apply {
            ($name:expr, $decision:expr) => {{
                let decision: Decision = $decision;
                records.push(FilterRecord {
                    name: $name,
                    verdict: format!("{decision:?}"),
                });
                if decision.is_reject() {
                    debug!(filter = $name, symbol = %proposal.symbol, "gate rejected proposal");
                    return GateVerdict {
                        final_decision: decision,
                        size_multiplier: multiplier,
                        adjusted_confidence: confidence,
                        use_tight_trailing,
                        records,
                    };
                }
                multiplier *= decision.multiplier();
            }};
        }

        apply!("BlacklistFilter", self.blacklist_filter(proposal, inputs));
        apply!("RegimeFilter", self.regime_filter(proposal));
        apply!("ConfidenceFilter", self.confidence_filter(proposal));
        apply!("DirectionAligner", self.direction_aligner(proposal));
        apply!("MomentumValidator", self.momentum_validator(proposal));

        if let Decision::Reject(reason) = self.micro_aligner(proposal, &mut confidence) {
            apply!("MicroAligner", Decision::Reject(reason));
        } else {
            records.push(FilterRecord {
                name: "MicroAligner",
                verdict: "Pass".to_string(),
            });
        }

        apply!(
            "VolumeConfirmer",
            self.volume_confirmer(proposal, &mut confidence)
        );
        self.breakout_detector(proposal, &mut confidence, &mut use_tight_trailing);
        records.push(FilterRecord {
            name: "BreakoutDetector",
            verdict: "Pass".to_string(),
        });
        apply!("ExposureGate", self.exposure_gate(inputs));
        apply!("CorrelationGate", self.correlation_gate(proposal, inputs));
        apply!("GlobalRiskGate", self.global_risk_gate(inputs));

        GateVerdict {
            final_decision: Decision::Pass,
            size_multiplier: multiplier,
            adjusted_confidence: confidence,
            use_tight_trailing,
            records,
        }
    }

    fn blacklist_filter(&self, proposal: &Proposal, inputs: &GateInputs) -> Decision {
        if inputs.blacklist.is_blacklisted(&proposal.symbol, inputs.now) {
            Decision::Reject(format!("{} is blacklisted", proposal.symbol))
        } else {
            Decision::Pass
        }
    }

    fn regime_filter(&self, proposal: &Proposal) -> Decision {
        match proposal.context.regime {
            Regime::Choppy | Regime::Sideways => {
                Decision::Reject(format!("regime {} not tradeable", proposal.context.regime))
            }
            _ => Decision::Pass,
        }
    }

    fn confidence_filter(&self, proposal: &Proposal) -> Decision {
        let min = if proposal.context.regime == Regime::Trending {
            self.config.min_confidence_trending
        } else {
            self.config.min_confidence_other
        };
        if proposal.confidence < min {
            return Decision::Reject(format!(
                "confidence {:.1} below minimum {:.1} for regime {}",
                proposal.confidence, min, proposal.context.regime
            ));
        }
        if proposal.confidence >= self.config.attenuation_band_lo
            && proposal.confidence < self.config.attenuation_band_hi
        {
            Decision::PassWithAttenuation(0.5, "confidence in attenuation band".to_string())
        } else {
            Decision::Pass
        }
    }

    fn direction_aligner(&self, proposal: &Proposal) -> Decision {
        if let Some(bias) = proposal.context.scanner_bias {
            if bias != proposal.side {
                debug!(
                    symbol = %proposal.symbol,
                    scanner_bias = %bias,
                    analyzer_side = %proposal.side,
                    "scanner bias contradicts analyzer, following analyzer"
                );
            }
        }
        Decision::Pass
    }

    fn momentum_validator(&self, proposal: &Proposal) -> Decision {
        let closes = &proposal.context.last_5_closes;
        if let (Some(&first), Some(&last)) = (closes.first(), closes.last()) {
            if first != 0.0 {
                let move_pct = (last - first) / first;
                if proposal.side == Side::Long && move_pct < -0.003 {
                    return Decision::Reject(format!(
                        "close fell {:.2}% over last 5 candles",
                        move_pct * 100.0
                    ));
                }
                if proposal.side == Side::Short && move_pct > 0.003 {
                    return Decision::Reject(format!(
                        "close rose {:.2}% over last 5 candles",
                        move_pct * 100.0
                    ));
                }
            }
        }
        let rsi = proposal.context.rsi_15m;
        if proposal.side == Side::Long && rsi > 70.0 {
            return Decision::Reject(format!("rsi15m {rsi:.1} overbought for LONG"));
        }
        if proposal.side == Side::Short && rsi < 30.0 {
            return Decision::Reject(format!("rsi15m {rsi:.1} oversold for SHORT"));
        }
        Decision::Pass
    }

    fn micro_aligner(&self, proposal: &Proposal, confidence: &mut f64) -> Decision {
        let (m1, m5) = (
            proposal.context.micro_trend_1m,
            proposal.context.micro_trend_5m,
        );
        let (Some(m1), Some(m5)) = (m1, m5) else {
            return Decision::Pass;
        };
        let wants = match proposal.side {
            Side::Long => crate::types::TrendDirection::Up,
            Side::Short => crate::types::TrendDirection::Down,
        };
        let matches_1m = m1 == wants;
        let matches_5m = m5 == wants;
        if matches_1m && matches_5m {
            *confidence += 10.0;
            Decision::Pass
        } else if !matches_1m && !matches_5m {
            Decision::Reject("1m and 5m micro trends both contradict side".to_string())
        } else {
            Decision::Pass
        }
    }

    fn volume_confirmer(&self, proposal: &Proposal, confidence: &mut f64) -> Decision {
        let ratio = proposal.context.volume_ratio;
        if ratio < self.config.reject_volume_ratio {
            return Decision::Reject(format!("volumeRatio {ratio:.2} below floor"));
        }
        if ratio > 2.5 {
            *confidence += 10.0;
        }
        if ratio >= self.config.min_volume_ratio {
            Decision::Pass
        } else {
            Decision::PassWithAttenuation(0.6, format!("volumeRatio {ratio:.2} below 1.5"))
        }
    }

    fn breakout_detector(&self, proposal: &Proposal, confidence: &mut f64, use_tight_trailing: &mut bool) {
        if let Some(resistance) = proposal.context.nearest_resistance {
            if proposal.entry_price > resistance && proposal.context.volume_surge {
                *confidence += 15.0;
                *use_tight_trailing = true;
            }
        }
    }

    fn exposure_gate(&self, inputs: &GateInputs) -> Decision {
        let headroom = inputs.allocated_capital_usd - inputs.current_exposure_usd;
        if headroom <= 0.0 {
            Decision::Reject("no exposure headroom remaining".to_string())
        } else {
            Decision::Pass
        }
    }

    fn correlation_gate(&self, proposal: &Proposal, inputs: &GateInputs) -> Decision {
        let group = inputs.correlation.group_for(&proposal.symbol);
        if inputs.open_positions_in_group >= self.config.correlation_group_cap {
            Decision::Reject(format!(
                "{group} correlation group already at cap {}",
                self.config.correlation_group_cap
            ))
        } else {
            Decision::Pass
        }
    }

    fn global_risk_gate(&self, inputs: &GateInputs) -> Decision {
        if inputs.risk_can_open {
            Decision::Pass
        } else {
            Decision::Reject("global risk monitor blocked new entries".to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrelationGroup, ProposalContext, TrendDirection};

    fn base_proposal(regime: Regime, confidence: f64, side: Side) -> Proposal {
        Proposal {
            symbol: "BTCUSDT".to_string(),
            side,
            entry_price: 100.0,
            confidence,
            stop_loss: 95.0,
            take_profit: 110.0,
            atr: 1.0,
            context: ProposalContext {
                regime,
                rsi_15m: 50.0,
                volume_ratio: 2.0,
                last_5_closes: vec![100.0, 100.1, 100.2, 100.1, 100.3],
                micro_trend_1m: None,
                micro_trend_5m: None,
                nearest_resistance: None,
                volume_surge: false,
                scanner_bias: None,
                correlation_group: CorrelationGroup::Major,
            },
        }
    }

    fn base_inputs<'a>(blacklist: &'a Blacklist, correlation: &'a CorrelationTable) -> GateInputs<'a> {
        GateInputs {
            now: Utc::now(),
            blacklist,
            correlation,
            open_positions_in_group: 0,
            allocated_capital_usd: 1000.0,
            current_exposure_usd: 0.0,
            risk_can_open: true,
        }
    }

    #[test]
    fn sideways_regime_is_rejected() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let proposal = base_proposal(Regime::Sideways, 90.0, Side::Long);
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(!verdict.allowed());
        assert!(matches!(verdict.final_decision, Decision::Reject(_)));
    }

    #[test]
    fn trending_below_60_confidence_is_rejected() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let proposal = base_proposal(Regime::Trending, 55.0, Side::Long);
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(!verdict.allowed());
    }

    #[test]
    fn trending_in_attenuation_band_halves_size() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let proposal = base_proposal(Regime::Trending, 65.0, Side::Long);
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(verdict.allowed());
        assert_eq!(verdict.size_multiplier, 0.5);
    }

    #[test]
    fn blacklisted_symbol_is_rejected_before_anything_else() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let now = Utc::now();
        blacklist.add("BTCUSDT", now, 60, "stop loss");
        let proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        let inputs = GateInputs {
            now,
            ..base_inputs(&blacklist, &correlation)
        };
        let verdict = gate.evaluate(&proposal, &inputs);
        assert_eq!(verdict.records[0].name, "BlacklistFilter");
        assert!(!verdict.allowed());
    }

    #[test]
    fn momentum_validator_rejects_long_on_sharp_drop() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let mut proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        proposal.context.last_5_closes = vec![100.0, 99.0, 98.0, 97.5, 99.5];
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(!verdict.allowed());
    }

    #[test]
    fn micro_aligner_adds_confidence_when_both_timeframes_agree() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let mut proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        proposal.context.micro_trend_1m = Some(TrendDirection::Up);
        proposal.context.micro_trend_5m = Some(TrendDirection::Up);
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(verdict.allowed());
        assert!(verdict.adjusted_confidence >= 100.0);
    }

    #[test]
    fn micro_aligner_rejects_when_both_contradict() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let mut proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        proposal.context.micro_trend_1m = Some(TrendDirection::Down);
        proposal.context.micro_trend_5m = Some(TrendDirection::Down);
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(!verdict.allowed());
    }

    #[test]
    fn low_volume_ratio_below_floor_is_rejected() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let mut proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        proposal.context.volume_ratio = 0.5;
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(!verdict.allowed());
    }

    #[test]
    fn mid_volume_ratio_attenuates() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let mut proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        proposal.context.volume_ratio = 1.2;
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(verdict.allowed());
        assert_eq!(verdict.size_multiplier, 0.6);
    }

    #[test]
    fn breakout_with_volume_surge_enables_tight_trailing() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let mut proposal = base_proposal(Regime::Trending, 80.0, Side::Long);
        proposal.context.nearest_resistance = Some(99.0);
        proposal.context.volume_surge = true;
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(verdict.allowed());
        assert!(verdict.use_tight_trailing);
    }

    #[test]
    fn exposure_gate_rejects_when_no_headroom() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        let mut inputs = base_inputs(&blacklist, &correlation);
        inputs.current_exposure_usd = inputs.allocated_capital_usd;
        let verdict = gate.evaluate(&proposal, &inputs);
        assert!(!verdict.allowed());
    }

    #[test]
    fn correlation_gate_rejects_at_cap() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        let mut inputs = base_inputs(&blacklist, &correlation);
        inputs.open_positions_in_group = 2;
        let verdict = gate.evaluate(&proposal, &inputs);
        assert!(!verdict.allowed());
    }

    #[test]
    fn global_risk_gate_rejects_when_blocked() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        let mut inputs = base_inputs(&blacklist, &correlation);
        inputs.risk_can_open = false;
        let verdict = gate.evaluate(&proposal, &inputs);
        assert!(!verdict.allowed());
    }

    #[test]
    fn clean_proposal_passes_all_filters() {
        let gate = Gate::new(GateConfig::default());
        let blacklist = Blacklist::new();
        let correlation = CorrelationTable::default();
        let proposal = base_proposal(Regime::Trending, 90.0, Side::Long);
        let verdict = gate.evaluate(&proposal, &base_inputs(&blacklist, &correlation));
        assert!(verdict.allowed());
        assert_eq!(verdict.size_multiplier, 1.0);
        assert_eq!(verdict.records.len(), 11);
    }
}
