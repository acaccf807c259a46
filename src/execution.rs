// =============================================================================
// Execution Engine — routes accepted trades through risk checks and the
// exchange client, with full demo-mode simulation support
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::exchange::ExchangeAdapter;
use crate::position_engine::PositionManager;
use crate::risk::RiskMonitor;
use crate::types::{AcceptedTrade, Side};

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Outcome of an execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Order was placed on the exchange (live mode); position is `PENDING_CONFIRM`.
    Placed(String),
    /// Order was simulated locally (demo mode); position is `PENDING_CONFIRM`.
    Simulated(String),
    /// Order was blocked by the risk monitor.
    Blocked(String),
    /// An error occurred during execution.
    Error(String),
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed(id) => write!(f, "Placed({id})"),
            Self::Simulated(msg) => write!(f, "Simulated({msg})"),
            Self::Blocked(reason) => write!(f, "Blocked({reason})"),
            Self::Error(err) => write!(f, "Error({err})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Ties together the exchange client, this engine's position lifecycle
/// manager, and its risk monitor to execute (or simulate) accepted trades.
/// One `ExecutionEngine` per configured engine, per spec §4.1 fault isolation.
pub struct ExecutionEngine {
    pub client: Arc<dyn ExchangeAdapter>,
    pub position_manager: Arc<PositionManager>,
    pub risk_monitor: Arc<RiskMonitor>,
    pub leverage_cap: u32,
}

impl ExecutionEngine {
    pub fn new(
        client: Arc<dyn ExchangeAdapter>,
        position_manager: Arc<PositionManager>,
        risk_monitor: Arc<RiskMonitor>,
        leverage_cap: u32,
    ) -> Self {
        Self {
            client,
            position_manager,
            risk_monitor,
            leverage_cap,
        }
    }

    /// Execute an accepted trade.
    ///
    /// In **demo mode** the order is simulated locally: no request reaches
    /// the exchange, and the position is opened in `PENDING_CONFIRM`
    /// directly against `accepted.proposal.entry_price`.
    ///
    /// In **live mode** the risk monitor is consulted first; if clear, the
    /// leverage is set and a market order is forwarded to the exchange.
    ///
    /// Either way the position lands in `PENDING_CONFIRM` — the caller's
    /// scan loop is responsible for calling `confirm_pending`/`expire_unconfirmed`
    /// once the confirmation window elapses (spec §4.9).
    pub async fn execute_accepted(
        &self,
        accepted: &AcceptedTrade,
        is_demo: bool,
        now: DateTime<Utc>,
    ) -> ExecutionResult {
        let proposal = &accepted.proposal;
        info!(
            symbol = %proposal.symbol,
            side = ?proposal.side,
            price = proposal.entry_price,
            size_usd = accepted.size_usd,
            leverage = accepted.leverage,
            is_demo,
            "execution proposal received"
        );

        let (allowed, reason) = self.risk_monitor.can_open(now);
        if !allowed {
            let msg = reason.unwrap_or_else(|| "unknown risk violation".to_string());
            warn!(symbol = %proposal.symbol, reason = %msg, "execution blocked by risk monitor");
            return ExecutionResult::Blocked(msg);
        }

        if accepted.leverage > self.leverage_cap {
            let msg = format!(
                "requested leverage {}x exceeds engine cap {}x",
                accepted.leverage, self.leverage_cap
            );
            warn!(symbol = %proposal.symbol, %msg, "execution blocked by leverage cap");
            return ExecutionResult::Blocked(msg);
        }

        if is_demo {
            self.execute_demo(accepted, now)
        } else {
            self.execute_live(accepted, now).await
        }
    }

    // -------------------------------------------------------------------------
    // Demo execution
    // -------------------------------------------------------------------------

    fn execute_demo(&self, accepted: &AcceptedTrade, now: DateTime<Utc>) -> ExecutionResult {
        let position_id = self.position_manager.open_pending(accepted, now);
        let msg = format!(
            "Demo fill: symbol={} side={:?} price={} position_id={position_id}",
            accepted.proposal.symbol, accepted.proposal.side, accepted.proposal.entry_price
        );
        info!("{}", msg);
        ExecutionResult::Simulated(position_id)
    }

    // -------------------------------------------------------------------------
    // Live execution
    // -------------------------------------------------------------------------

    async fn execute_live(&self, accepted: &AcceptedTrade, now: DateTime<Utc>) -> ExecutionResult {
        let proposal = &accepted.proposal;
        let side_str = match proposal.side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };
        let quantity = if proposal.entry_price > 0.0 {
            accepted.size_usd * accepted.leverage as f64 / proposal.entry_price
        } else {
            0.0
        };

        debug!(symbol = %proposal.symbol, side_str, quantity, "sending live order to exchange");

        if let Err(e) = self
            .client
            .set_leverage(&proposal.symbol, accepted.leverage)
            .await
        {
            warn!(symbol = %proposal.symbol, error = %e, "failed to set leverage, proceeding at exchange default");
        }

        let result = self
            .client
            .place_order(&proposal.symbol, side_str, "MARKET", quantity, None)
            .await;

        match result {
            Ok(_order_response) => {
                let position_id = self.position_manager.open_pending(accepted, now);
                info!(
                    symbol = %proposal.symbol,
                    position_id = %position_id,
                    "live order placed and position created"
                );
                ExecutionResult::Placed(position_id)
            }
            Err(e) => {
                warn!(symbol = %proposal.symbol, error = %e, "live order placement failed");
                ExecutionResult::Error(format!("Order placement failed: {e}"))
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("client", &"<dyn ExchangeAdapter>")
            .field("position_manager", &self.position_manager)
            .field("risk_monitor", &"<RiskMonitor>")
            .field("leverage_cap", &self.leverage_cap)
            .finish()
    }
}
