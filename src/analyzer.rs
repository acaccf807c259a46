// =============================================================================
// Multi-Timeframe Analyzer
// =============================================================================
//
// Generalizes `strategy.rs`'s single-timeframe indicator pipeline (EMA/RSI/
// ADX/Bollinger/ROC, weighted-bucket confidence scoring) across multiple
// timeframes and folds in a reference-symbol (BTC) correlation adjustment.
// Pure over candle slices the caller has already fetched from the candle
// buffer — same separation `scanner.rs` keeps from its exchange snapshot.

use serde::{Deserialize, Serialize};

use crate::indicators::adx::calculate_adx;
use crate::indicators::atr::calculate_atr;
use crate::indicators::ema::calculate_ema;
use crate::indicators::macd::calculate_macd;
use crate::indicators::rsi::calculate_rsi;
use crate::market_data::Candle;
use crate::regime::RegimeDetector;
use crate::types::{CorrelationGroup, Proposal, ProposalContext, Regime, Side, TrendDirection};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub min_confidence: f64,
    /// Weight applied to each configured timeframe in the alignment vote,
    /// keyed by interval string (e.g. "4h", "1h", "15m").
    pub timeframe_weights: Vec<(String, f64)>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_confidence: 60.0,
            timeframe_weights: vec![
                ("4h".to_string(), 0.50),
                ("1h".to_string(), 0.30),
                ("15m".to_string(), 0.20),
            ],
        }
    }
}

/// Per-timeframe indicator reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeView {
    pub timeframe: String,
    pub trend: TrendDirection,
    pub ema9: f64,
    pub ema21: f64,
    pub close: f64,
}

/// BTC's own 4h reading, used for the correlation adjustment on every other
/// symbol.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSnapshot {
    pub trend_4h: TrendDirection,
    pub atr14: f64,
    pub atr_average: f64,
}

pub fn timeframe_view(timeframe: &str, candles: &[Candle]) -> Option<TimeframeView> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    if closes.len() < 21 {
        return None;
    }
    let ema9 = *calculate_ema(&closes, 9).last()?;
    let ema21 = *calculate_ema(&closes, 21).last()?;
    let close = *closes.last()?;

    let trend = if ema9 > ema21 && close > ema9 {
        TrendDirection::Up
    } else if ema9 < ema21 && close < ema21 {
        TrendDirection::Down
    } else {
        TrendDirection::Sideways
    };

    Some(TimeframeView {
        timeframe: timeframe.to_string(),
        trend,
        ema9,
        ema21,
        close,
    })
}

/// Weighted-majority alignment across the configured timeframes.
///
/// Returns `(dominant_direction, alignment_score)`. `alignment_score` is
/// 100 when all timeframes agree on a non-sideways direction, 70 when a
/// strict majority by weight agrees, 40 otherwise.
fn alignment(views: &[TimeframeView], config: &AnalyzerConfig) -> (TrendDirection, f64) {
    let weight_of = |tf: &str| -> f64 {
        config
            .timeframe_weights
            .iter()
            .find(|(name, _)| name == tf)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    };

    let mut up_weight = 0.0;
    let mut down_weight = 0.0;
    for v in views {
        match v.trend {
            TrendDirection::Up => up_weight += weight_of(&v.timeframe),
            TrendDirection::Down => down_weight += weight_of(&v.timeframe),
            TrendDirection::Sideways => {}
        }
    }

    let dominant = if up_weight > down_weight {
        TrendDirection::Up
    } else if down_weight > up_weight {
        TrendDirection::Down
    } else {
        TrendDirection::Sideways
    };

    if dominant == TrendDirection::Sideways {
        return (TrendDirection::Sideways, 40.0);
    }

    let all_agree = views.iter().all(|v| v.trend == dominant);
    let score = if all_agree {
        100.0
    } else if (dominant == TrendDirection::Up && up_weight > down_weight)
        || (dominant == TrendDirection::Down && down_weight > up_weight)
    {
        70.0
    } else {
        40.0
    };
    (dominant, score)
}

/// Weighted indicator score on the base (15m) timeframe: EMA trend, RSI,
/// MACD, volume, price-action buckets summing to 100 when every bucket
/// fires in the proposal's favor.
fn base_indicator_score(base_candles: &[Candle], side: Side) -> Option<f64> {
    let closes: Vec<f64> = base_candles.iter().map(|c| c.close).collect();
    if closes.len() < 35 {
        return None;
    }

    let mut score = 0.0;

    // EMA trend bucket (30 pts)
    let ema9 = calculate_ema(&closes, 9);
    let ema21 = calculate_ema(&closes, 21);
    if let (Some(&e9), Some(&e21)) = (ema9.last(), ema21.last()) {
        let bullish = e9 > e21;
        if (side == Side::Long && bullish) || (side == Side::Short && !bullish) {
            score += 30.0;
        }
    }

    // RSI bucket (20 pts) — reward room to run, not already exhausted.
    if let Some(&rsi) = calculate_rsi(&closes, 14).last() {
        let favorable = match side {
            Side::Long => rsi < 65.0 && rsi > 35.0,
            Side::Short => rsi > 35.0 && rsi < 65.0,
        };
        if favorable {
            score += 20.0;
        }
    }

    // MACD bucket (20 pts)
    if let Some(macd) = calculate_macd(&closes) {
        let bullish = macd.histogram > 0.0;
        if (side == Side::Long && bullish) || (side == Side::Short && !bullish) {
            score += 20.0;
        }
    }

    // Volume bucket (15 pts) — last candle's volume above the 20-candle mean.
    if base_candles.len() >= 21 {
        let recent = base_candles.last().map(|c| c.volume).unwrap_or(0.0);
        let window = &base_candles[base_candles.len() - 21..base_candles.len() - 1];
        let avg: f64 = window.iter().map(|c| c.volume).sum::<f64>() / window.len() as f64;
        if avg > 0.0 && recent > avg {
            score += 15.0;
        }
    }

    // Price-action bucket (15 pts) — directional close over the last 3 candles.
    if closes.len() >= 4 {
        let delta = closes[closes.len() - 1] - closes[closes.len() - 4];
        if (side == Side::Long && delta > 0.0) || (side == Side::Short && delta < 0.0) {
            score += 15.0;
        }
    }

    Some(score)
}

/// Derive a `Proposal` for `symbol` from its per-timeframe views, base
/// (15m) candles, optional micro (1m/5m) views, and an optional BTC
/// reference snapshot. Returns `None` when alignment is SIDEWAYS or the
/// resulting confidence falls below `config.min_confidence`.
#[allow(clippy::too_many_arguments)]
pub fn analyze(
    symbol: &str,
    regime_detector: &RegimeDetector,
    base_candles: &[Candle],
    views: &[TimeframeView],
    micro_1m: Option<&TimeframeView>,
    micro_5m: Option<&TimeframeView>,
    reference: Option<ReferenceSnapshot>,
    volume_ratio: f64,
    correlation_group: CorrelationGroup,
    config: &AnalyzerConfig,
) -> Option<Proposal> {
    let (dominant, _alignment_score) = alignment(views, config);
    if dominant == TrendDirection::Sideways {
        return None;
    }
    let side = match dominant {
        TrendDirection::Up => Side::Long,
        TrendDirection::Down => Side::Short,
        TrendDirection::Sideways => unreachable!(),
    };

    let base_score = base_indicator_score(base_candles, side)?;

    let all_agree = views.iter().all(|v| v.trend == dominant);
    let contradiction_1h_4h = views
        .iter()
        .find(|v| v.timeframe == "1h")
        .zip(views.iter().find(|v| v.timeframe == "4h"))
        .map(|(h1, h4)| h1.trend != TrendDirection::Sideways && h1.trend != h4.trend)
        .unwrap_or(false);

    let mut confidence = base_score;
    if all_agree {
        confidence += 25.0;
    }
    if contradiction_1h_4h {
        confidence -= 15.0;
    }

    let mut paused_for_btc_vol = false;
    if let Some(reference) = reference {
        if correlation_group != CorrelationGroup::Major {
            let strongly_opposite = reference.trend_4h != TrendDirection::Sideways
                && ((side == Side::Long && reference.trend_4h == TrendDirection::Down)
                    || (side == Side::Short && reference.trend_4h == TrendDirection::Up));
            if strongly_opposite {
                confidence -= 20.0;
            }
            if reference.atr_average > 0.0 && reference.atr14 > 2.0 * reference.atr_average {
                paused_for_btc_vol = true;
            }
        }
    }
    if paused_for_btc_vol {
        return None;
    }

    confidence = confidence.clamp(0.0, 100.0);
    if confidence < config.min_confidence {
        return None;
    }

    let regime = regime_detector
        .current_regime()
        .map(|s| s.regime)
        .unwrap_or(Regime::Sideways);

    let base_closes: Vec<f64> = base_candles.iter().map(|c| c.close).collect();
    let atr = calculate_atr(base_candles, 14).unwrap_or(0.0);
    let entry_price = *base_closes.last()?;
    let rsi_15m = *calculate_rsi(&base_closes, 14).last().unwrap_or(&50.0);
    let last_5_closes = base_closes[base_closes.len().saturating_sub(5)..].to_vec();

    let (stop_loss, take_profit) = match side {
        Side::Long => (entry_price - atr, entry_price + 2.0 * atr),
        Side::Short => (entry_price + atr, entry_price - 2.0 * atr),
    };

    Some(Proposal {
        symbol: symbol.to_string(),
        side,
        entry_price,
        confidence,
        stop_loss,
        take_profit,
        atr,
        context: ProposalContext {
            regime,
            rsi_15m,
            volume_ratio,
            last_5_closes,
            micro_trend_1m: micro_1m.map(|v| v.trend),
            micro_trend_5m: micro_5m.map(|v| v.trend),
            nearest_resistance: None,
            volume_surge: volume_ratio > 2.0,
            scanner_bias: None,
            correlation_group,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(close: f64, volume: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 0,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
            quote_volume: volume * close,
            trades_count: 10,
            taker_buy_volume: volume * 0.5,
            taker_buy_quote_volume: volume * close * 0.5,
            is_closed: true,
        }
    }

    fn uptrend_candles(n: usize) -> Vec<Candle> {
        (0..n).map(|i| candle(100.0 + i as f64, 100.0 + i as f64)).collect()
    }

    #[test]
    fn timeframe_view_detects_uptrend() {
        let candles = uptrend_candles(40);
        let view = timeframe_view("4h", &candles).unwrap();
        assert_eq!(view.trend, TrendDirection::Up);
    }

    #[test]
    fn alignment_all_agree_scores_100() {
        let config = AnalyzerConfig::default();
        let views = vec![
            timeframe_view("4h", &uptrend_candles(40)).unwrap(),
            timeframe_view("1h", &uptrend_candles(40)).unwrap(),
            timeframe_view("15m", &uptrend_candles(40)).unwrap(),
        ];
        let (dominant, score) = alignment(&views, &config);
        assert_eq!(dominant, TrendDirection::Up);
        assert_eq!(score, 100.0);
    }

    #[test]
    fn analyze_returns_none_when_sideways() {
        let config = AnalyzerConfig::default();
        let flat = vec![candle(100.0, 100.0); 40];
        let views = vec![
            timeframe_view("4h", &flat).unwrap(),
            timeframe_view("1h", &flat).unwrap(),
            timeframe_view("15m", &flat).unwrap(),
        ];
        let detector = RegimeDetector::default();
        let result = analyze(
            "ETHUSDT",
            &detector,
            &flat,
            &views,
            None,
            None,
            None,
            1.0,
            CorrelationGroup::Layer1,
            &config,
        );
        assert!(result.is_none());
    }

    #[test]
    fn analyze_produces_proposal_on_strong_aligned_uptrend() {
        let config = AnalyzerConfig::default();
        let base = uptrend_candles(40);
        let views = vec![
            timeframe_view("4h", &uptrend_candles(40)).unwrap(),
            timeframe_view("1h", &uptrend_candles(40)).unwrap(),
            timeframe_view("15m", &uptrend_candles(40)).unwrap(),
        ];
        let detector = RegimeDetector::default();
        let result = analyze(
            "ETHUSDT",
            &detector,
            &base,
            &views,
            None,
            None,
            None,
            1.0,
            CorrelationGroup::Layer1,
            &config,
        );
        assert!(result.is_some());
        let proposal = result.unwrap();
        assert_eq!(proposal.side, Side::Long);
    }

    #[test]
    fn btc_extreme_volatility_vetoes_altcoin_proposal() {
        let config = AnalyzerConfig::default();
        let base = uptrend_candles(40);
        let views = vec![
            timeframe_view("4h", &uptrend_candles(40)).unwrap(),
            timeframe_view("1h", &uptrend_candles(40)).unwrap(),
            timeframe_view("15m", &uptrend_candles(40)).unwrap(),
        ];
        let detector = RegimeDetector::default();
        let reference = ReferenceSnapshot {
            trend_4h: TrendDirection::Up,
            atr14: 10.0,
            atr_average: 1.0,
        };
        let result = analyze(
            "ETHUSDT",
            &detector,
            &base,
            &views,
            None,
            None,
            Some(reference),
            1.0,
            CorrelationGroup::Layer1,
            &config,
        );
        assert!(result.is_none());
    }
}
