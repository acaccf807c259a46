// =============================================================================
// Market Scanner
// =============================================================================
//
// Ranks the exchange's full ticker snapshot down to a short list of
// candidates worth running through the analyzer. Pure function over a
// `Vec<TickerSnapshot>` input, same separation the teacher's `indicators/*`
// keep between pure computation and the I/O that gathers their input —
// fetching the snapshot itself is the exchange adapter's job (§6).

use serde::{Deserialize, Serialize};

/// One symbol's 24h ticker plus the short-horizon fields the scanner needs.
/// Produced by the exchange adapter from its `/ticker/24hr`-equivalent
/// endpoint plus the candle buffer's recent volume history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub quote_volume_24h: f64,
    pub price_change_5m_pct: f64,
    pub recent_volume: f64,
    /// Mean volume over the last 20 closed candles of the base timeframe.
    /// `None` when the symbol has fewer than 20 closed candles buffered.
    pub avg_volume_20: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    pub min_volume_usd: f64,
    pub top_n: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_volume_usd: 10_000_000.0,
            top_n: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub symbol: String,
    pub momentum_score: f64,
    pub volume_ratio: f64,
    pub price_change_5m_pct: f64,
}

/// Discard low-volume and blacklisted-pattern symbols, rank survivors by
/// `momentumScore = volumeRatio * |priceChange5mPct|`, and return the top
/// `config.top_n` descending. Ties break on higher `volume_ratio`.
pub fn scan(tickers: &[TickerSnapshot], blacklist_patterns: &[String], config: &ScannerConfig) -> Vec<RankedCandidate> {
    let mut candidates: Vec<RankedCandidate> = tickers
        .iter()
        .filter(|t| t.quote_volume_24h >= config.min_volume_usd)
        .filter(|t| !blacklist_patterns.iter().any(|pat| t.symbol.contains(pat.as_str())))
        .filter_map(|t| {
            let avg_volume_20 = t.avg_volume_20?;
            if avg_volume_20 <= 0.0 {
                return None;
            }
            let volume_ratio = t.recent_volume / avg_volume_20;
            let momentum_score = volume_ratio * t.price_change_5m_pct.abs();
            Some(RankedCandidate {
                symbol: t.symbol.clone(),
                momentum_score,
                volume_ratio,
                price_change_5m_pct: t.price_change_5m_pct,
            })
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.momentum_score
            .partial_cmp(&a.momentum_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.volume_ratio.partial_cmp(&a.volume_ratio).unwrap_or(std::cmp::Ordering::Equal))
    });

    candidates.truncate(config.top_n);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(symbol: &str, volume_24h: f64, change_5m: f64, recent: f64, avg20: Option<f64>) -> TickerSnapshot {
        TickerSnapshot {
            symbol: symbol.to_string(),
            quote_volume_24h: volume_24h,
            price_change_5m_pct: change_5m,
            recent_volume: recent,
            avg_volume_20: avg20,
        }
    }

    #[test]
    fn low_volume_symbols_are_discarded() {
        let tickers = vec![ticker("LOWUSDT", 1_000_000.0, 2.0, 100.0, Some(50.0))];
        let result = scan(&tickers, &[], &ScannerConfig::default());
        assert!(result.is_empty());
    }

    #[test]
    fn symbols_without_enough_history_are_excluded() {
        let tickers = vec![ticker("BTCUSDT", 50_000_000.0, 2.0, 100.0, None)];
        let result = scan(&tickers, &[], &ScannerConfig::default());
        assert!(result.is_empty());
    }

    #[test]
    fn blacklisted_pattern_symbols_are_excluded() {
        let tickers = vec![ticker("BTCUPUSDT", 50_000_000.0, 2.0, 100.0, Some(50.0))];
        let patterns = vec!["UP".to_string()];
        let result = scan(&tickers, &patterns, &ScannerConfig::default());
        assert!(result.is_empty());
    }

    #[test]
    fn ranks_by_momentum_score_descending() {
        let tickers = vec![
            ticker("AUSDT", 50_000_000.0, 1.0, 100.0, Some(100.0)),
            ticker("BUSDT", 50_000_000.0, 5.0, 300.0, Some(100.0)),
        ];
        let result = scan(&tickers, &[], &ScannerConfig::default());
        assert_eq!(result[0].symbol, "BUSDT");
        assert_eq!(result[1].symbol, "AUSDT");
    }

    #[test]
    fn truncates_to_top_n() {
        let tickers: Vec<TickerSnapshot> = (0..30)
            .map(|i| ticker(&format!("SYM{i}USDT"), 50_000_000.0, 1.0 + i as f64, 100.0, Some(100.0)))
            .collect();
        let config = ScannerConfig {
            top_n: 5,
            ..ScannerConfig::default()
        };
        let result = scan(&tickers, &[], &config);
        assert_eq!(result.len(), 5);
    }

    #[test]
    fn ties_break_on_higher_volume_ratio() {
        let tickers = vec![
            ticker("AUSDT", 50_000_000.0, 2.0, 100.0, Some(100.0)),
            ticker("BUSDT", 50_000_000.0, 4.0, 100.0, Some(200.0)),
        ];
        // momentum_score for both: A = 1.0*2.0=2.0, B = 0.5*4.0=2.0 (tie)
        let result = scan(&tickers, &[], &ScannerConfig::default());
        assert_eq!(result[0].symbol, "AUSDT");
    }
}
