// =============================================================================
// Engine Error Taxonomy
// =============================================================================
//
// Closed set of error kinds that callers must be able to distinguish: fatal
// startup failures, recoverable per-trade/per-tick failures, and operational
// conditions (circuit breaker). Everything else (deep call chains, one-off
// glue) keeps using `anyhow::Result` with `.context()`, same as the rest of
// this codebase.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("credentials missing: {0}")]
    CredentialsMissing(String),

    #[error("exchange authentication failed: {0}")]
    AuthFailure(String),

    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("order rejected: {code} {message}")]
    OrderRejected { code: String, message: String },

    #[error("reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),

    #[error("engine crashed: {0}")]
    EngineCrash(String),

    #[error("circuit breaker active: {0}")]
    CircuitBreaker(String),
}

impl EngineError {
    /// Fatal errors abort startup; everything else is recoverable at some
    /// level (per-trade, per-tick, or by the supervisor).
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigInvalid(_)
                | EngineError::CredentialsMissing(_)
                | EngineError::AuthFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_invalid_is_fatal() {
        assert!(EngineError::ConfigInvalid("bad".into()).is_fatal_at_startup());
    }

    #[test]
    fn transient_is_not_fatal() {
        assert!(!EngineError::Transient("blip".into()).is_fatal_at_startup());
    }

    #[test]
    fn circuit_breaker_is_not_fatal() {
        assert!(!EngineError::CircuitBreaker("daily loss".into()).is_fatal_at_startup());
    }
}
