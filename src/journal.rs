// =============================================================================
// Trade Journal — append-only record of closed trades (spec §4.7 feedback)
// =============================================================================
//
// Extracted and generalized from the teacher's `app_state.rs` journal-stats
// block, which folded win-rate/profit-factor aggregation straight into the
// dashboard snapshot builder. Here it becomes its own append-only store
// (spec §5: "trade journal writes are strictly append-only and ordered by
// completion time") that also answers the Position Sizer's per-symbol
// win-rate/reward-risk-ratio query used by its Kelly guard.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::position_engine::Position;
use crate::sizer::SymbolHistory;
use crate::types::Side;

/// Trailing window size used for per-symbol win-rate/R-multiple stats,
/// matching the Kelly guard's "over the same trailing-20 window" spec.
pub const TRAILING_WINDOW: usize = 20;
const DEFAULT_REWARD_RISK_RATIO: f64 = 1.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub realized_pnl: f64,
    /// `R = realizedPnl / |entry - initialStop| * initialQuantity`; `0.0` if
    /// the stop distance is degenerate (shouldn't happen for a real trade).
    pub r_multiple: f64,
    pub closed_at: DateTime<Utc>,
    pub close_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: f64,
    pub profit_factor: f64,
}

/// Append-only trade journal, single-writer per engine (spec §5).
pub struct Journal {
    records: RwLock<Vec<TradeRecord>>,
}

impl Journal {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    /// Append a closed position as a `TradeRecord`. Called once per close
    /// event, including reconciliation-driven external closes (reason
    /// `EXTERNAL_CLOSE`).
    pub fn record_closed_position(&self, pos: &Position) -> TradeRecord {
        let risk_usd = (pos.entry_price - pos.stop_loss).abs() * pos.initial_quantity;
        let r_multiple = if risk_usd > 0.0 {
            pos.realized_pnl / risk_usd
        } else {
            0.0
        };

        let record = TradeRecord {
            symbol: pos.symbol.clone(),
            side: pos.side,
            entry_price: pos.entry_price,
            stop_loss: pos.stop_loss,
            realized_pnl: pos.realized_pnl,
            r_multiple,
            closed_at: pos.closed_at.unwrap_or_else(Utc::now),
            close_reason: pos.close_reason.clone(),
        };

        self.records.write().push(record.clone());
        record
    }

    /// Aggregate stats across the whole journal (dashboard use), mirroring
    /// the teacher's `journal_stats` snapshot field.
    pub fn aggregate_stats(&self) -> Option<JournalStats> {
        let records = self.records.read();
        if records.is_empty() {
            return None;
        }

        let total_trades = records.len();
        let wins = records.iter().filter(|r| r.realized_pnl > 0.0).count();
        let win_rate = wins as f64 / total_trades as f64;
        let total_net_pnl: f64 = records.iter().map(|r| r.realized_pnl).sum();
        let gross_profit: f64 = records
            .iter()
            .map(|r| r.realized_pnl)
            .filter(|&pnl| pnl > 0.0)
            .sum();
        let gross_loss: f64 = records
            .iter()
            .map(|r| r.realized_pnl)
            .filter(|&pnl| pnl < 0.0)
            .map(|pnl| pnl.abs())
            .sum();
        let profit_factor = if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Some(JournalStats {
            total_trades,
            win_rate,
            total_net_pnl,
            profit_factor,
        })
    }

    /// Per-symbol win-rate/reward-risk-ratio/consecutive-losses over the
    /// trailing `TRAILING_WINDOW` closed trades, feeding the Sizer's Kelly
    /// guard directly.
    pub fn symbol_history(&self, symbol: &str) -> SymbolHistory {
        let records = self.records.read();
        let trailing: Vec<&TradeRecord> = records
            .iter()
            .filter(|r| r.symbol == symbol)
            .rev()
            .take(TRAILING_WINDOW)
            .collect();

        if trailing.is_empty() {
            return SymbolHistory::default();
        }

        let closed_trade_count = trailing.len() as u32;
        let wins: Vec<&&TradeRecord> = trailing.iter().filter(|r| r.realized_pnl > 0.0).collect();
        let losses: Vec<&&TradeRecord> = trailing.iter().filter(|r| r.realized_pnl <= 0.0).collect();
        let win_rate = wins.len() as f64 / trailing.len() as f64;

        let reward_risk_ratio = if losses.len() >= 2 {
            let avg_win_r = wins.iter().map(|r| r.r_multiple).sum::<f64>() / wins.len().max(1) as f64;
            let avg_loss_r =
                losses.iter().map(|r| r.r_multiple.abs()).sum::<f64>() / losses.len() as f64;
            if avg_loss_r > 0.0 {
                avg_win_r / avg_loss_r
            } else {
                DEFAULT_REWARD_RISK_RATIO
            }
        } else {
            DEFAULT_REWARD_RISK_RATIO
        };

        // trailing is newest-first (rev()); count the unbroken losing streak
        // from the most recent trade backwards.
        let consecutive_losses = trailing
            .iter()
            .take_while(|r| r.realized_pnl <= 0.0)
            .count() as u32;

        SymbolHistory {
            closed_trade_count,
            win_rate,
            reward_risk_ratio,
            consecutive_losses,
        }
    }

    pub fn recent(&self, count: usize) -> Vec<TradeRecord> {
        let records = self.records.read();
        records.iter().rev().take(count).cloned().collect()
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position_engine::PositionStatus;

    fn closed_position(symbol: &str, entry: f64, stop: f64, pnl: f64) -> Position {
        Position {
            id: "id".to_string(),
            symbol: symbol.to_string(),
            side: Side::Long,
            entry_price: entry,
            initial_quantity: 1.0,
            quantity: 0.0,
            size_usd: entry,
            leverage: 1,
            atr: 1.0,
            current_price: entry,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            stop_loss: stop,
            status: PositionStatus::Closed,
            opened_at: Utc::now(),
            confirmation_deadline: None,
            closed_at: Some(Utc::now()),
            close_reason: Some("SL".to_string()),
            realized_pnl: pnl,
            partial_exit_count: 0,
        }
    }

    #[test]
    fn empty_journal_has_no_stats() {
        let journal = Journal::new();
        assert!(journal.aggregate_stats().is_none());
        assert_eq!(journal.symbol_history("BTCUSDT").closed_trade_count, 0);
    }

    #[test]
    fn aggregate_stats_compute_win_rate_and_profit_factor() {
        let journal = Journal::new();
        journal.record_closed_position(&closed_position("BTCUSDT", 100.0, 98.0, 40.0));
        journal.record_closed_position(&closed_position("BTCUSDT", 100.0, 98.0, -20.0));
        let stats = journal.aggregate_stats().unwrap();
        assert_eq!(stats.total_trades, 2);
        assert!((stats.win_rate - 0.5).abs() < 1e-9);
        assert!((stats.profit_factor - 2.0).abs() < 1e-9);
    }

    #[test]
    fn reward_risk_ratio_defaults_with_fewer_than_two_losses() {
        let journal = Journal::new();
        journal.record_closed_position(&closed_position("ETHUSDT", 100.0, 98.0, 40.0));
        let history = journal.symbol_history("ETHUSDT");
        assert_eq!(history.reward_risk_ratio, DEFAULT_REWARD_RISK_RATIO);
    }

    #[test]
    fn consecutive_losses_counts_unbroken_streak_from_most_recent() {
        let journal = Journal::new();
        journal.record_closed_position(&closed_position("SOLUSDT", 100.0, 98.0, 10.0));
        journal.record_closed_position(&closed_position("SOLUSDT", 100.0, 98.0, -5.0));
        journal.record_closed_position(&closed_position("SOLUSDT", 100.0, 98.0, -5.0));
        let history = journal.symbol_history("SOLUSDT");
        assert_eq!(history.consecutive_losses, 2);
    }

    #[test]
    fn history_only_considers_trailing_window_for_its_own_symbol() {
        let journal = Journal::new();
        for _ in 0..25 {
            journal.record_closed_position(&closed_position("BNBUSDT", 100.0, 98.0, 1.0));
        }
        journal.record_closed_position(&closed_position("OTHER", 100.0, 98.0, -1.0));
        let history = journal.symbol_history("BNBUSDT");
        assert_eq!(history.closed_trade_count, TRAILING_WINDOW as u32);
    }
}
