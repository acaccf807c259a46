// =============================================================================
// Shared types used across the trading engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Balance snapshot for a single asset from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub free: f64,
    #[serde(default)]
    pub locked: f64,
}

/// Whether the engine is actively trading, paused, or killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradingMode {
    Live,
    Paused,
    Killed,
}

impl Default for TradingMode {
    fn default() -> Self {
        Self::Paused
    }
}

impl std::fmt::Display for TradingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Live => write!(f, "Live"),
            Self::Paused => write!(f, "Paused"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Whether we are running against real funds or simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Per-timeframe trend reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Up => write!(f, "UP"),
            TrendDirection::Down => write!(f, "DOWN"),
            TrendDirection::Sideways => write!(f, "SIDEWAYS"),
        }
    }
}

/// Qualitative strength of a trend reading, derived from EMA separation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendStrength {
    Strong,
    Moderate,
    Weak,
}

/// `trendStrength=STRONG iff |ema9-ema21|/price > 1%`, `MODERATE iff > 0.3%`,
/// else `WEAK`.
pub fn classify_trend_strength(ema9: f64, ema21: f64, price: f64) -> TrendStrength {
    if price == 0.0 {
        return TrendStrength::Weak;
    }
    let spread_pct = (ema9 - ema21).abs() / price;
    if spread_pct > 0.01 {
        TrendStrength::Strong
    } else if spread_pct > 0.003 {
        TrendStrength::Moderate
    } else {
        TrendStrength::Weak
    }
}

/// Static correlation-group membership for a symbol. Used by the
/// Signal Quality Gate's CorrelationGate to cap concurrent directional
/// exposure across symbols that tend to move together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrelationGroup {
    Major,
    Layer1,
    Defi,
    Meme,
    Other,
}

impl std::fmt::Display for CorrelationGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CorrelationGroup::Major => "major",
            CorrelationGroup::Layer1 => "layer1",
            CorrelationGroup::Defi => "defi",
            CorrelationGroup::Meme => "meme",
            CorrelationGroup::Other => "other",
        };
        write!(f, "{s}")
    }
}

/// Market regime classification produced by the regime detector and consumed
/// by the Signal Quality Gate's RegimeFilter/ConfidenceFilter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Regime {
    Trending,
    Sideways,
    Choppy,
    HighVol,
    LowVol,
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Regime::Trending => "TRENDING",
            Regime::Sideways => "SIDEWAYS",
            Regime::Choppy => "CHOPPY",
            Regime::HighVol => "HIGH_VOL",
            Regime::LowVol => "LOW_VOL",
        };
        write!(f, "{s}")
    }
}

/// A tentative trade produced by the multi-timeframe analyzer. Ephemeral —
/// created per scan cycle and discarded if the gate rejects it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub confidence: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub atr: f64,
    pub context: ProposalContext,
}

/// Everything the Signal Quality Gate's filters need beyond the proposal's
/// headline fields, gathered by the analyzer at proposal time so the gate
/// itself never has to reach back into market data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalContext {
    pub regime: Regime,
    pub rsi_15m: f64,
    pub volume_ratio: f64,
    /// Closing prices of the last 5 candles of the base timeframe, oldest
    /// first, used by the MomentumValidator's short-horizon reversal check.
    pub last_5_closes: Vec<f64>,
    pub micro_trend_1m: Option<TrendDirection>,
    pub micro_trend_5m: Option<TrendDirection>,
    pub nearest_resistance: Option<f64>,
    pub volume_surge: bool,
    /// Dominant direction from the upstream scanner's momentum ranking; the
    /// DirectionAligner follows the analyzer over this when they disagree.
    pub scanner_bias: Option<Side>,
    pub correlation_group: CorrelationGroup,
}

/// A Proposal that has passed the Signal Quality Gate, augmented with sizing
/// and confirmation bookkeeping owned by the Position Sizer and Position
/// Lifecycle Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedTrade {
    pub proposal: Proposal,
    pub size_pct: f64,
    pub size_usd: f64,
    pub leverage: u32,
    pub effective_stop_loss_pct: f64,
    pub effective_stop_loss_price: f64,
    pub pending_confirmation: bool,
    pub confirmation_deadline: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_strength_thresholds() {
        assert_eq!(classify_trend_strength(101.5, 100.0, 100.0), TrendStrength::Strong);
        assert_eq!(classify_trend_strength(100.5, 100.0, 100.0), TrendStrength::Moderate);
        assert_eq!(classify_trend_strength(100.1, 100.0, 100.0), TrendStrength::Weak);
    }

    #[test]
    fn trend_strength_guards_zero_price() {
        assert_eq!(classify_trend_strength(1.0, 2.0, 0.0), TrendStrength::Weak);
    }

    #[test]
    fn side_opposite_round_trips() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }
}
