// =============================================================================
// Position Lifecycle Manager — state machine for pending/open/closed trades
// =============================================================================
//
// Life-cycle (spec §4.9):
//   PENDING_CONFIRM -> OPEN -> PARTIAL_EXITED(n) -> CLOSED
//   PENDING_CONFIRM -> CANCELLED
//   OPEN / PARTIAL_EXITED -> EMERGENCY_CLOSED
//
// Generalizes the teacher's Open/PartialTP1/Closed state machine: the
// teacher's fixed SL/TP1/TP2 book-keeping moves out to the Stop & Trailing
// Manager (`exit::triple_barrier::TrailState`), so this module only owns
// position identity, sizing, and the confirmation/partial-exit/close
// transitions themselves. Thread-safety unchanged: all mutable state behind
// `parking_lot::RwLock`.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::types::{AcceptedTrade, Side};

// ---------------------------------------------------------------------------
// Position model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    PendingConfirm,
    Open,
    PartialExited(u32),
    Closed,
    Cancelled,
    EmergencyClosed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingConfirm => write!(f, "PENDING_CONFIRM"),
            Self::Open => write!(f, "OPEN"),
            Self::PartialExited(n) => write!(f, "PARTIAL_EXITED({n})"),
            Self::Closed => write!(f, "CLOSED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::EmergencyClosed => write!(f, "EMERGENCY_CLOSED"),
        }
    }
}

/// Outcome of resolving a pending entry at the end of its confirmation
/// window.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Activated,
    Cancelled(String),
}

/// A single tracked position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier (UUID v4).
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    /// Quantity at open, used as the base for partial-exit percentages.
    pub initial_quantity: f64,
    /// Remaining open quantity (reduced on partial close).
    pub quantity: f64,
    pub size_usd: f64,
    pub leverage: u32,
    pub atr: f64,
    #[serde(default)]
    pub current_price: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub unrealized_pnl_pct: f64,
    pub stop_loss: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub confirmation_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default)]
    pub partial_exit_count: u32,
}

impl Position {
    fn direction(&self) -> f64 {
        match self.side {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Position Manager
// ---------------------------------------------------------------------------

/// Thread-safe manager owning the pending, open, and closed position lists.
pub struct PositionManager {
    pending: RwLock<Vec<Position>>,
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
}

/// Default adverse-move threshold during the confirmation window (spec
/// §4.9: "0.3-0.5%").
pub const DEFAULT_CONFIRMATION_ADVERSE_PCT: f64 = 0.4;

impl PositionManager {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(Vec::new()),
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Open a pending position from a Sizer-accepted trade
    // -------------------------------------------------------------------------

    /// Register an accepted trade as `PENDING_CONFIRM` and return its id. The
    /// scan loop is expected to call `confirm_pending` once
    /// `accepted.confirmation_deadline` is reached (or immediately, if
    /// `confirmationCandles` is configured to 0).
    pub fn open_pending(&self, accepted: &AcceptedTrade, now: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        let proposal = &accepted.proposal;
        let quantity = if proposal.entry_price > 0.0 {
            accepted.size_usd * accepted.leverage as f64 / proposal.entry_price
        } else {
            0.0
        };

        let pos = Position {
            id: id.clone(),
            symbol: proposal.symbol.clone(),
            side: proposal.side,
            entry_price: proposal.entry_price,
            initial_quantity: quantity,
            quantity,
            size_usd: accepted.size_usd,
            leverage: accepted.leverage,
            atr: proposal.atr,
            current_price: proposal.entry_price,
            unrealized_pnl: 0.0,
            unrealized_pnl_pct: 0.0,
            stop_loss: accepted.effective_stop_loss_price,
            status: PositionStatus::PendingConfirm,
            opened_at: now,
            confirmation_deadline: Some(accepted.confirmation_deadline),
            closed_at: None,
            close_reason: None,
            realized_pnl: 0.0,
            partial_exit_count: 0,
        };

        info!(
            id = %id,
            symbol = %pos.symbol,
            side = %pos.side,
            entry_price = pos.entry_price,
            size_usd = pos.size_usd,
            leverage = pos.leverage,
            "position pending confirmation"
        );

        self.pending.write().push(pos);
        id
    }

    // -------------------------------------------------------------------------
    // Confirmation window
    // -------------------------------------------------------------------------

    /// Resolve a pending entry: activate it if price hasn't moved against the
    /// signal by more than `max_adverse_pct`, otherwise cancel it. Returns
    /// `None` if no matching pending position exists.
    pub fn confirm_pending(
        &self,
        id: &str,
        current_price: f64,
        max_adverse_pct: f64,
        now: DateTime<Utc>,
    ) -> Option<ConfirmOutcome> {
        let mut pending = self.pending.write();
        let idx = pending.iter().position(|p| p.id == id)?;
        let mut pos = pending.remove(idx);

        let adverse_pct = match pos.side {
            Side::Long => (pos.entry_price - current_price) / pos.entry_price * 100.0,
            Side::Short => (current_price - pos.entry_price) / pos.entry_price * 100.0,
        };

        if adverse_pct >= max_adverse_pct {
            let reason = format!(
                "price moved {adverse_pct:.3}% against signal during confirmation window"
            );
            warn!(id, symbol = %pos.symbol, %reason, "pending entry cancelled");
            pos.status = PositionStatus::Cancelled;
            pos.closed_at = Some(now);
            pos.close_reason = Some(reason.clone());
            self.closed.write().push(pos);
            return Some(ConfirmOutcome::Cancelled(reason));
        }

        pos.current_price = current_price;
        pos.status = PositionStatus::Open;
        info!(id, symbol = %pos.symbol, "position confirmed and opened");
        self.open.write().push(pos);
        Some(ConfirmOutcome::Activated)
    }

    /// Cancel every pending position whose confirmation deadline has already
    /// passed without being resolved, returning their ids.
    pub fn expire_unconfirmed(&self, now: DateTime<Utc>) -> Vec<String> {
        let mut pending = self.pending.write();
        let mut closed_out = Vec::new();
        let mut expired_ids = Vec::new();
        pending.retain_mut(|pos| {
            let due = pos.confirmation_deadline.map(|d| now >= d).unwrap_or(false);
            if due {
                expired_ids.push(pos.id.clone());
                let mut cancelled = pos.clone();
                cancelled.status = PositionStatus::Cancelled;
                cancelled.closed_at = Some(now);
                cancelled.close_reason = Some("confirmation window expired".to_string());
                warn!(id = %cancelled.id, symbol = %cancelled.symbol, "pending entry expired unconfirmed");
                closed_out.push(cancelled);
                false
            } else {
                true
            }
        });
        self.closed.write().extend(closed_out);
        expired_ids
    }

    // -------------------------------------------------------------------------
    // Price updates
    // -------------------------------------------------------------------------

    /// Update `current_price` for every open position matching `symbol` and
    /// recompute unrealized PnL.
    pub fn update_price(&self, symbol: &str, current_price: f64) {
        let mut positions = self.open.write();
        for pos in positions.iter_mut().filter(|p| p.symbol == symbol) {
            pos.current_price = current_price;
            let direction = pos.direction();
            pos.unrealized_pnl = direction * (current_price - pos.entry_price) * pos.quantity;
            pos.unrealized_pnl_pct = if pos.entry_price > 0.0 {
                direction * ((current_price - pos.entry_price) / pos.entry_price) * 100.0
            } else {
                0.0
            };
        }
    }

    // -------------------------------------------------------------------------
    // Partial exits (driven by the Stop & Trailing Manager's TP1/TP2 hits)
    // -------------------------------------------------------------------------

    /// Apply a partial close of `close_pct` of the position's *initial*
    /// quantity at `price`, transitioning it to `PARTIAL_EXITED(n)`. Returns
    /// the realized PnL of this partial, or `None` if the position isn't
    /// open.
    pub fn record_partial_exit(&self, id: &str, close_pct: f64, price: f64) -> Option<f64> {
        let mut open = self.open.write();
        let pos = open.iter_mut().find(|p| p.id == id)?;

        let close_qty = (pos.initial_quantity * close_pct / 100.0).min(pos.quantity);
        let partial_pnl = pos.direction() * (price - pos.entry_price) * close_qty;

        pos.quantity -= close_qty;
        pos.realized_pnl += partial_pnl;
        pos.partial_exit_count += 1;
        pos.status = PositionStatus::PartialExited(pos.partial_exit_count);

        info!(
            id,
            symbol = %pos.symbol,
            close_qty,
            remaining_qty = pos.quantity,
            partial_pnl,
            "partial exit applied"
        );

        Some(partial_pnl)
    }

    // -------------------------------------------------------------------------
    // Close a position
    // -------------------------------------------------------------------------

    /// Close a position by `id` and move it to the closed list. Returns the
    /// closed `Position` (carrying the total realized PnL across partials +
    /// final) if found, `None` otherwise. A `reason` containing "emergency"
    /// (case-insensitive) marks the position `EMERGENCY_CLOSED` rather than
    /// `CLOSED`.
    pub fn close_position(&self, id: &str, reason: &str, close_price: f64) -> Option<Position> {
        let mut open = self.open.write();
        let idx = open.iter().position(|p| p.id == id)?;
        let mut pos = open.remove(idx);

        let final_pnl = pos.direction() * (close_price - pos.entry_price) * pos.quantity;
        pos.realized_pnl += final_pnl;
        pos.current_price = close_price;
        pos.unrealized_pnl = 0.0;
        pos.unrealized_pnl_pct = 0.0;
        pos.status = if reason.to_lowercase().contains("emergency") {
            PositionStatus::EmergencyClosed
        } else {
            PositionStatus::Closed
        };
        pos.closed_at = Some(Utc::now());
        pos.close_reason = Some(reason.to_string());
        pos.quantity = 0.0;

        info!(id, reason, close_price, realized_pnl = pos.realized_pnl, status = %pos.status, "position closed");

        self.closed.write().push(pos.clone());
        Some(pos)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Snapshot of positions actively monitored for exits (`OPEN` or
    /// `PARTIAL_EXITED`).
    pub fn get_open_positions(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn get_pending_positions(&self) -> Vec<Position> {
        self.pending.read().clone()
    }

    pub fn get_closed_positions(&self, count: usize) -> Vec<Position> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }

    /// Capital currently committed (pending + open), used by the Capital
    /// Allocator's exposure bookkeeping.
    pub fn exposure_usd(&self) -> f64 {
        self.open.read().iter().map(|p| p.size_usd).sum::<f64>()
            + self.pending.read().iter().map(|p| p.size_usd).sum::<f64>()
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionManager")
            .field("pending_positions", &self.pending.read().len())
            .field("open_positions", &self.open.read().len())
            .field("closed_positions", &self.closed.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CorrelationGroup, Proposal, ProposalContext, Regime};

    fn accepted(side: Side, entry: f64) -> AcceptedTrade {
        AcceptedTrade {
            proposal: Proposal {
                symbol: "BTCUSDT".to_string(),
                side,
                entry_price: entry,
                confidence: 80.0,
                stop_loss: entry * 0.97,
                take_profit: entry * 1.05,
                atr: entry * 0.01,
                context: ProposalContext {
                    regime: Regime::Trending,
                    rsi_15m: 50.0,
                    volume_ratio: 2.0,
                    last_5_closes: vec![entry; 5],
                    micro_trend_1m: None,
                    micro_trend_5m: None,
                    nearest_resistance: None,
                    volume_surge: false,
                    scanner_bias: None,
                    correlation_group: CorrelationGroup::Major,
                },
            },
            size_pct: 15.0,
            size_usd: 1500.0,
            leverage: 5,
            effective_stop_loss_pct: 3.0,
            effective_stop_loss_price: entry * 0.97,
            pending_confirmation: true,
            confirmation_deadline: Utc::now(),
        }
    }

    #[test]
    fn opens_pending_then_confirms_to_open() {
        let mgr = PositionManager::new();
        let now = Utc::now();
        let id = mgr.open_pending(&accepted(Side::Long, 100.0), now);
        assert_eq!(mgr.get_pending_positions().len(), 1);

        let outcome = mgr.confirm_pending(&id, 100.2, 0.4, now).unwrap();
        assert_eq!(outcome, ConfirmOutcome::Activated);
        assert_eq!(mgr.get_pending_positions().len(), 0);
        assert_eq!(mgr.get_open_positions().len(), 1);
    }

    #[test]
    fn confirmation_cancels_on_adverse_move() {
        let mgr = PositionManager::new();
        let now = Utc::now();
        let id = mgr.open_pending(&accepted(Side::Long, 100.0), now);

        let outcome = mgr.confirm_pending(&id, 99.0, 0.4, now).unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Cancelled(_)));
        assert_eq!(mgr.get_open_positions().len(), 0);
        assert_eq!(mgr.get_closed_positions(10).len(), 1);
        assert_eq!(mgr.get_closed_positions(10)[0].status, PositionStatus::Cancelled);
    }

    #[test]
    fn partial_exit_reduces_quantity_and_transitions_status() {
        let mgr = PositionManager::new();
        let now = Utc::now();
        let id = mgr.open_pending(&accepted(Side::Long, 100.0), now);
        mgr.confirm_pending(&id, 100.0, 0.4, now);

        let initial_qty = mgr.get_open_positions()[0].initial_quantity;
        let pnl = mgr.record_partial_exit(&id, 30.0, 101.5).unwrap();
        assert!(pnl > 0.0);

        let pos = &mgr.get_open_positions()[0];
        assert_eq!(pos.status, PositionStatus::PartialExited(1));
        assert!((pos.quantity - initial_qty * 0.70).abs() < 1e-9);
    }

    #[test]
    fn close_position_accumulates_partial_and_final_pnl() {
        let mgr = PositionManager::new();
        let now = Utc::now();
        let id = mgr.open_pending(&accepted(Side::Long, 100.0), now);
        mgr.confirm_pending(&id, 100.0, 0.4, now);
        mgr.record_partial_exit(&id, 30.0, 101.5);

        let closed_pos = mgr.close_position(&id, "SL", 99.0).unwrap();
        assert!(closed_pos.realized_pnl.is_finite());
        assert_eq!(mgr.get_open_positions().len(), 0);
        let closed = mgr.get_closed_positions(10);
        assert_eq!(closed[0].status, PositionStatus::Closed);
    }

    #[test]
    fn emergency_reason_sets_emergency_closed_status() {
        let mgr = PositionManager::new();
        let now = Utc::now();
        let id = mgr.open_pending(&accepted(Side::Short, 100.0), now);
        mgr.confirm_pending(&id, 100.0, 0.4, now);

        mgr.close_position(&id, "EMERGENCY", 110.0);
        let closed = mgr.get_closed_positions(10);
        assert_eq!(closed[0].status, PositionStatus::EmergencyClosed);
    }

    #[test]
    fn expire_unconfirmed_cancels_stale_pending_entries() {
        let mgr = PositionManager::new();
        let past = Utc::now() - chrono::Duration::minutes(5);
        let mut trade = accepted(Side::Long, 100.0);
        trade.confirmation_deadline = past;
        let id = mgr.open_pending(&trade, past);

        let expired = mgr.expire_unconfirmed(Utc::now());
        assert_eq!(expired, vec![id]);
        assert_eq!(mgr.get_pending_positions().len(), 0);
    }
}
