// =============================================================================
// Exit Monitor Loop — Periodic stop/trail + micro-trail evaluation
// =============================================================================
//
// Runs as a background Tokio task per engine, waking every 5 seconds to:
//   1. Iterate the engine's open positions.
//   2. Evaluate each position's Stop & Trailing Manager state.
//   3. If no stop triggered AND enable_micro_trail is ON, evaluate the
//      order-flow-aware micro-trail on top.
//   4. Close any position that has triggered an exit and record the result.
//
// Kept as a per-engine loop rather than global: each engine owns its
// position manager and risk monitor, same way the teacher's single-engine
// loop owned its one `AppState`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::blacklist::Blacklist;
use crate::clock::Clock;
use crate::exit::micro_trail::{MicroTrailState, OrderFlowContext};
use crate::exit::triple_barrier::TrailState;
use crate::journal::Journal;
use crate::position_engine::PositionManager;
use crate::risk::RiskMonitor;

const MONITOR_INTERVAL_SECS: u64 = 5;

pub type TrailStates = Arc<RwLock<HashMap<String, TrailState>>>;
pub type MicroTrailStates = Arc<RwLock<HashMap<String, MicroTrailState>>>;

pub fn new_trail_states() -> TrailStates {
    Arc::new(RwLock::new(HashMap::new()))
}

pub fn new_micro_trail_states() -> MicroTrailStates {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Run one engine's exit monitor loop. Runs forever; spawn as a background
/// Tokio task per engine at startup.
pub async fn run_exit_monitor(
    engine_id: String,
    state: Arc<AppState>,
    position_manager: Arc<PositionManager>,
    risk_monitor: Arc<RiskMonitor>,
    journal: Arc<Journal>,
    blacklist: Arc<Blacklist>,
    blacklist_duration_minutes: i64,
    trails: TrailStates,
    micro_trails: MicroTrailStates,
    clock: Arc<dyn Clock>,
    enable_micro_trail: bool,
) {
    info!(engine_id, interval_secs = MONITOR_INTERVAL_SECS, "exit monitor started");
    let mut ticker = interval(Duration::from_secs(MONITOR_INTERVAL_SECS));

    loop {
        ticker.tick().await;

        let open_positions = position_manager.get_open_positions();
        if open_positions.is_empty() {
            continue;
        }

        let now = clock.now_utc();
        let mut to_close: Vec<(String, f64, String)> = Vec::new();
        let mut to_partial: Vec<(String, f64, f64)> = Vec::new();

        {
            let mut trail_map = trails.write();
            let mut micro_map = micro_trails.write();

            for position in &open_positions {
                let current_price = position.current_price;
                if current_price <= 0.0 {
                    warn!(id = %position.id, symbol = %position.symbol, "invalid current price, skipping");
                    continue;
                }

                let stop_exit = if let Some(trail) = trail_map.get_mut(&position.id) {
                    let before = trail.partial_exits.len();
                    let exit = trail.evaluate(now, current_price, position.atr);
                    for new_partial in &trail.partial_exits[before..] {
                        to_partial.push((position.id.clone(), new_partial.close_pct, current_price));
                    }
                    exit
                } else {
                    debug!(id = %position.id, "no trail state for position");
                    None
                };

                if let Some(reason) = stop_exit {
                    info!(id = %position.id, symbol = %position.symbol, %reason, "stop/trail triggered");
                    to_close.push((position.id.clone(), current_price, reason.to_string()));
                    continue;
                }

                if let Some(micro) = micro_map.get_mut(&position.id) {
                    let of_ctx = build_order_flow_context(&state, &position.symbol, micro);
                    let now_secs = now.timestamp() as u64;
                    let trail_hit = micro.evaluate(current_price, now_secs, &of_ctx);
                    if trail_hit && enable_micro_trail {
                        let reason = format!("MicroTrail_{}", micro.phase);
                        info!(id = %position.id, symbol = %position.symbol, %reason, "micro-trail triggered");
                        to_close.push((position.id.clone(), current_price, reason));
                    }
                }
            }
        }

        for (position_id, close_pct, price) in to_partial {
            match position_manager.record_partial_exit(&position_id, close_pct, price) {
                Some(realized_pnl) => {
                    info!(id = %position_id, close_pct, realized_pnl, "partial exit recorded");
                    risk_monitor.update_pnl(realized_pnl, now);
                    state.increment_version();
                }
                None => error!(id = %position_id, "failed to record partial exit — position not found"),
            }
        }

        for (position_id, exit_price, reason) in to_close {
            match position_manager.close_position(&position_id, &reason, exit_price) {
                Some(closed) => {
                    info!(id = %position_id, pnl = closed.realized_pnl, %reason, "position closed by exit monitor");
                    risk_monitor.record_trade_result(closed.realized_pnl, now);
                    journal.record_closed_position(&closed);
                    if reason == "SL" {
                        blacklist.add(&closed.symbol, now, blacklist_duration_minutes, "stop loss");
                    }
                    trails.write().remove(&position_id);
                    micro_trails.write().remove(&position_id);
                    state.increment_version();
                }
                None => error!(id = %position_id, "failed to close position — not found"),
            }
        }
    }
}

fn build_order_flow_context(state: &AppState, symbol: &str, micro: &MicroTrailState) -> OrderFlowContext {
    let trade_procs = state.trade_processors.read();
    let proc = trade_procs.get(symbol);
    let cvd = proc.map(|p| p.cvd()).unwrap_or(0.0);
    let orderbook_imbalance = state.orderbook_manager.imbalance(symbol).unwrap_or(0.0);
    let vpin = state.vpin_states.read().get(symbol).map(|v| v.vpin).unwrap_or(0.0);

    OrderFlowContext {
        cvd,
        cvd_at_entry: micro.cvd_at_entry,
        orderbook_imbalance,
        vpin,
    }
}
