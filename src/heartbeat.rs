// =============================================================================
// Engine Health — heartbeat bookkeeping for the orchestrator's supervisor
// (spec §4.1)
// =============================================================================
//
// Grounded in the teacher's `app_state.rs` `last_ws_user_event: RwLock<Instant>`
// pattern (a monotonic timestamp updated on every liveness signal, read by a
// separate watcher). Generalized from one global field into a per-engine
// `EngineHealth` the orchestrator polls every `monitorTick`.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Ok,
    Warn,
    Restart,
    Error,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warn => write!(f, "WARN"),
            Self::Restart => write!(f, "RESTART"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Serializable snapshot for the dashboard; mirrors `EngineHealth`'s live
/// fields without the `Instant`, which isn't serializable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineHealthSnapshot {
    pub engine_id: String,
    pub status: HealthStatus,
    pub last_heartbeat_age_ms: u64,
    pub restart_count: u32,
}

pub struct EngineHealth {
    pub engine_id: String,
    last_heartbeat: RwLock<Instant>,
    restart_count: RwLock<u32>,
    errored: RwLock<bool>,
    warn_after: Duration,
    restart_after: Duration,
    max_restarts: u32,
}

impl EngineHealth {
    pub fn new(
        engine_id: impl Into<String>,
        warn_after_secs: u64,
        restart_after_secs: u64,
        max_restarts: u32,
    ) -> Self {
        Self {
            engine_id: engine_id.into(),
            last_heartbeat: RwLock::new(Instant::now()),
            restart_count: RwLock::new(0),
            errored: RwLock::new(false),
            warn_after: Duration::from_secs(warn_after_secs),
            restart_after: Duration::from_secs(restart_after_secs),
            max_restarts,
        }
    }

    /// Called by the engine's scan/monitor loops on every tick.
    pub fn beat(&self) {
        *self.last_heartbeat.write() = Instant::now();
    }

    pub fn age(&self) -> Duration {
        self.last_heartbeat.read().elapsed()
    }

    /// Current health status, *not* mutating restart bookkeeping — callers
    /// decide whether to act on `Restart` via `record_restart_attempt`.
    pub fn status(&self) -> HealthStatus {
        if *self.errored.read() {
            return HealthStatus::Error;
        }
        let age = self.age();
        if age > self.restart_after {
            HealthStatus::Restart
        } else if age > self.warn_after {
            HealthStatus::Warn
        } else {
            HealthStatus::Ok
        }
    }

    /// Record an attempted restart. Returns `true` if the restart should
    /// proceed (`restart_count < max_restarts`), `false` if the engine
    /// should instead transition to the terminal `ERROR` state.
    pub fn record_restart_attempt(&self) -> bool {
        let mut count = self.restart_count.write();
        if *count >= self.max_restarts {
            *self.errored.write() = true;
            warn!(engine_id = %self.engine_id, restarts = *count, "max restarts exceeded, engine in ERROR");
            return false;
        }
        *count += 1;
        self.beat();
        true
    }

    pub fn restart_count(&self) -> u32 {
        *self.restart_count.read()
    }

    pub fn snapshot(&self) -> EngineHealthSnapshot {
        EngineHealthSnapshot {
            engine_id: self.engine_id.clone(),
            status: self.status(),
            last_heartbeat_age_ms: self.age().as_millis() as u64,
            restart_count: self.restart_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn fresh_heartbeat_is_ok() {
        let health = EngineHealth::new("alpha", 60, 300, 3);
        assert_eq!(health.status(), HealthStatus::Ok);
    }

    #[test]
    fn stale_heartbeat_warns_then_requests_restart() {
        let health = EngineHealth::new("alpha", 0, 0, 3);
        sleep(Duration::from_millis(5));
        assert_eq!(health.status(), HealthStatus::Restart);
    }

    #[test]
    fn beat_resets_the_clock() {
        let health = EngineHealth::new("alpha", 0, 0, 3);
        sleep(Duration::from_millis(5));
        health.beat();
        assert_eq!(health.status(), HealthStatus::Ok);
    }

    #[test]
    fn restart_budget_exhausts_into_error() {
        let health = EngineHealth::new("alpha", 60, 300, 2);
        assert!(health.record_restart_attempt());
        assert!(health.record_restart_attempt());
        assert!(!health.record_restart_attempt());
        assert_eq!(health.status(), HealthStatus::Error);
    }
}
