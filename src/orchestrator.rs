// =============================================================================
// Unified Orchestrator — supervises one scan loop + exit monitor per engine,
// restarting on heartbeat timeout and isolating faults between engines
// (spec §4.1)
// =============================================================================
//
// Grounded in the teacher's per-symbol `tokio::spawn` + reconnect-on-error
// pattern in `main.rs` (each kline/trade/depth stream runs in its own task
// with a retry loop). Generalized from "one task per market-data stream" to
// "one supervised task pair (scan loop + exit monitor) per configured
// engine", with `EngineHealth` standing in for the stream's implicit
// liveness check and `record_restart_attempt` capping how many times a
// stalled engine gets relaunched before it's left in `ERROR`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use chrono::Utc;

use crate::app_state::AppState;
use crate::blacklist::Blacklist;
use crate::clock::{Clock, SystemClock};
use crate::correlation::CorrelationTable;
use crate::engine::EngineLoop;
use crate::exchange::ExchangeAdapter;
use crate::execution::ExecutionEngine;
use crate::exit::monitor::{new_micro_trail_states, new_trail_states, run_exit_monitor};
use crate::heartbeat::HealthStatus;

struct EngineTasks {
    scan: JoinHandle<()>,
    monitor: JoinHandle<()>,
}

/// Owns the shared market-structure tables (blacklist, correlation) and
/// supervises one scan-loop + exit-monitor task pair per configured engine.
/// A panic or sustained heartbeat stall in one engine never touches another
/// — each gets restarted (or declared `ERROR`) independently.
pub struct Orchestrator {
    state: Arc<AppState>,
    exchange: Arc<dyn ExchangeAdapter>,
    blacklist: Arc<Blacklist>,
    correlation: Arc<CorrelationTable>,
    clock: Arc<dyn Clock>,
    tasks: RwLock<HashMap<String, EngineTasks>>,
}

impl Orchestrator {
    pub fn new(state: Arc<AppState>, exchange: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            state,
            exchange,
            blacklist: Arc::new(Blacklist::new()),
            correlation: Arc::new(CorrelationTable::default()),
            clock: Arc::new(SystemClock),
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Spawn every enabled engine's scan loop and exit monitor, then run the
    /// supervisor tick forever, restarting any engine whose heartbeat has
    /// gone stale.
    pub async fn start(self: Arc<Self>) {
        let engine_ids: Vec<String> = {
            let config = self.state.config.read();
            config
                .engines
                .iter()
                .filter(|e| e.enabled)
                .map(|e| e.engine_id.clone())
                .collect()
        };

        for engine_id in &engine_ids {
            self.spawn_engine(engine_id);
        }
        info!(engines = engine_ids.len(), "orchestrator started");

        let monitor_tick_secs = self.state.config.read().global.monitor_tick_seconds.max(1);
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(monitor_tick_secs));

        loop {
            ticker.tick().await;
            self.supervise();
        }
    }

    /// Abort every running engine task. Called on graceful shutdown.
    pub fn stop(&self) {
        let mut tasks = self.tasks.write();
        for (engine_id, t) in tasks.drain() {
            t.scan.abort();
            t.monitor.abort();
            info!(engine_id, "engine tasks aborted");
        }
    }

    fn supervise(&self) {
        self.check_portfolio_emergency();

        for runtime in &self.state.engines {
            match runtime.health.status() {
                HealthStatus::Ok | HealthStatus::Warn => {}
                HealthStatus::Restart => {
                    if runtime.health.record_restart_attempt() {
                        warn!(
                            engine_id = %runtime.engine_id,
                            restarts = runtime.health.restart_count(),
                            "engine heartbeat stalled — restarting"
                        );
                        self.restart_engine(&runtime.engine_id);
                    } else {
                        error!(
                            engine_id = %runtime.engine_id,
                            "engine exhausted its restart budget — now ERROR, awaiting manual intervention"
                        );
                    }
                }
                HealthStatus::Error => {
                    // Already declared ERROR; a human must clear it by
                    // restarting the process or disabling the engine.
                }
            }
        }
    }

    /// Sum unrealized loss across every engine's open positions against the
    /// portfolio's peak value; if the loss exceeds `emergencyPortfolioLossPct`,
    /// close every open position across every engine (spec §4.8).
    fn check_portfolio_emergency(&self) {
        let threshold_pct = self.state.config.read().global.emergency_portfolio_loss_pct;
        if threshold_pct <= 0.0 {
            return;
        }

        let portfolio_value = self.state.risk_monitor.get_state(Utc::now()).peak_portfolio_value;
        if portfolio_value <= 0.0 {
            return;
        }

        let unrealized_total: f64 = self
            .state
            .engines
            .iter()
            .flat_map(|runtime| runtime.position_manager.get_open_positions())
            .map(|p| p.unrealized_pnl)
            .sum();

        if unrealized_total >= 0.0 {
            return;
        }

        let loss_pct = -unrealized_total / portfolio_value * 100.0;
        if loss_pct < threshold_pct {
            return;
        }

        error!(
            loss_pct,
            threshold_pct, portfolio_value, "portfolio-wide emergency loss breached — closing every position"
        );

        let now = Utc::now();
        for runtime in &self.state.engines {
            for pos in runtime.position_manager.get_open_positions() {
                if let Some(closed) = runtime.position_manager.close_position(
                    &pos.id,
                    "EMERGENCY_PORTFOLIO",
                    pos.current_price,
                ) {
                    runtime.risk_monitor.record_trade_result(closed.realized_pnl, now);
                    runtime.journal.record_closed_position(&closed);
                }
            }
        }
        self.state.increment_version();
    }

    fn restart_engine(&self, engine_id: &str) {
        if let Some(old) = self.tasks.write().remove(engine_id) {
            old.scan.abort();
            old.monitor.abort();
        }
        self.spawn_engine(engine_id);
    }

    fn spawn_engine(&self, engine_id: &str) {
        let Some(runtime) = self.state.engines.iter().find(|e| e.engine_id == engine_id) else {
            warn!(engine_id, "cannot spawn unknown engine");
            return;
        };
        let Some(engine_cfg) = self
            .state
            .config
            .read()
            .engines
            .iter()
            .find(|e| e.engine_id == engine_id)
            .cloned()
        else {
            warn!(engine_id, "cannot spawn engine missing from config");
            return;
        };

        let execution = Arc::new(ExecutionEngine::new(
            self.exchange.clone(),
            runtime.position_manager.clone(),
            runtime.risk_monitor.clone(),
            engine_cfg.leverage_cap,
        ));

        let trails = new_trail_states();
        let micro_trails = new_micro_trail_states();

        let scan = EngineLoop {
            engine_id: engine_id.to_string(),
            state: self.state.clone(),
            exchange: self.exchange.clone(),
            execution,
            position_manager: runtime.position_manager.clone(),
            risk_monitor: runtime.risk_monitor.clone(),
            journal: runtime.journal.clone(),
            health: runtime.health.clone(),
            blacklist: self.blacklist.clone(),
            correlation: self.correlation.clone(),
            trails: trails.clone(),
            micro_trails: micro_trails.clone(),
        };
        let scan_handle = tokio::spawn(scan.run());

        let monitor_handle = tokio::spawn(run_exit_monitor(
            engine_id.to_string(),
            self.state.clone(),
            runtime.position_manager.clone(),
            runtime.risk_monitor.clone(),
            runtime.journal.clone(),
            self.blacklist.clone(),
            engine_cfg.blacklist_duration_minutes,
            trails,
            micro_trails,
            self.clock.clone(),
            engine_cfg.enable_micro_trail,
        ));

        self.tasks.write().insert(
            engine_id.to_string(),
            EngineTasks {
                scan: scan_handle,
                monitor: monitor_handle,
            },
        );

        info!(engine_id, "engine scan loop + exit monitor spawned");
    }
}
