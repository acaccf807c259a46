// =============================================================================
// Capital Allocator — splits portfolio value across engines (spec §4.2)
// =============================================================================
//
// No analog in the teacher, which runs a single engine against the whole
// account balance. Grounded in the teacher's `app_state.rs` balance-snapshot
// style (plain structs rebuilt from config + live exposure on every read,
// no persisted derived state) and its `RwLock`-guarded mutable counters
// elsewhere in the codebase for `record_exposure_change`.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

use crate::error::EngineError;

/// Per-engine allocation input, sourced from `UnifiedConfig`.
#[derive(Debug, Clone)]
pub struct EngineCapitalConfig {
    pub engine_id: String,
    pub enabled: bool,
    pub capital_pct: f64,
}

/// A single engine's resolved capital allocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineAllocation {
    pub pct: f64,
    pub allocated_usd: f64,
    pub current_exposure_usd: f64,
    pub available_usd: f64,
}

pub struct CapitalAllocator {
    configs: Vec<EngineCapitalConfig>,
    exposure: RwLock<HashMap<String, f64>>,
}

impl CapitalAllocator {
    pub fn new(configs: Vec<EngineCapitalConfig>) -> Self {
        let exposure = configs
            .iter()
            .map(|c| (c.engine_id.clone(), 0.0))
            .collect();
        Self {
            configs,
            exposure: RwLock::new(exposure),
        }
    }

    /// Fails if enabled engines' `capitalPct` sums above 100.
    pub fn validate(&self) -> Result<(), EngineError> {
        let total: f64 = self
            .configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.capital_pct)
            .sum();
        if total > 100.0 {
            return Err(EngineError::ConfigInvalid(format!(
                "enabled engines' capitalPct sums to {total:.2}%, exceeds 100%"
            )));
        }
        Ok(())
    }

    /// Resolve one engine's share of `portfolio_value`. Disabled engines'
    /// shares are redistributed proportionally among enabled engines so the
    /// enabled set still totals 100%.
    pub fn allocation_for(&self, engine_id: &str, portfolio_value: f64) -> Option<EngineAllocation> {
        let config = self.configs.iter().find(|c| c.engine_id == engine_id)?;
        if !config.enabled {
            return Some(EngineAllocation {
                pct: 0.0,
                allocated_usd: 0.0,
                current_exposure_usd: 0.0,
                available_usd: 0.0,
            });
        }

        let enabled_total: f64 = self
            .configs
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.capital_pct)
            .sum();
        let pct = if enabled_total > 0.0 {
            config.capital_pct / enabled_total * 100.0
        } else {
            0.0
        };
        let allocated_usd = portfolio_value * pct / 100.0;
        let current_exposure_usd = *self.exposure.read().get(engine_id).unwrap_or(&0.0);
        let available_usd = (allocated_usd - current_exposure_usd).max(0.0);

        Some(EngineAllocation {
            pct,
            allocated_usd,
            current_exposure_usd,
            available_usd,
        })
    }

    /// Update an engine's tracked exposure by `delta_usd` (positive on
    /// entry/size-up, negative on exit/partial close).
    pub fn record_exposure_change(&self, engine_id: &str, delta_usd: f64) {
        let mut exposure = self.exposure.write();
        let current = exposure.entry(engine_id.to_string()).or_insert(0.0);
        *current = (*current + delta_usd).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs() -> Vec<EngineCapitalConfig> {
        vec![
            EngineCapitalConfig {
                engine_id: "alpha".to_string(),
                enabled: true,
                capital_pct: 60.0,
            },
            EngineCapitalConfig {
                engine_id: "beta".to_string(),
                enabled: true,
                capital_pct: 40.0,
            },
        ]
    }

    #[test]
    fn validate_rejects_overallocation() {
        let configs = vec![
            EngineCapitalConfig {
                engine_id: "alpha".to_string(),
                enabled: true,
                capital_pct: 70.0,
            },
            EngineCapitalConfig {
                engine_id: "beta".to_string(),
                enabled: true,
                capital_pct: 40.0,
            },
        ];
        assert!(CapitalAllocator::new(configs).validate().is_err());
    }

    #[test]
    fn validate_passes_at_exactly_100() {
        assert!(CapitalAllocator::new(configs()).validate().is_ok());
    }

    #[test]
    fn allocation_splits_by_pct() {
        let allocator = CapitalAllocator::new(configs());
        let alpha = allocator.allocation_for("alpha", 10_000.0).unwrap();
        assert!((alpha.allocated_usd - 6_000.0).abs() < 1e-9);
    }

    #[test]
    fn disabled_engines_share_redistributes_among_enabled() {
        let mut configs = configs();
        configs.push(EngineCapitalConfig {
            engine_id: "gamma".to_string(),
            enabled: false,
            capital_pct: 50.0,
        });
        let allocator = CapitalAllocator::new(configs);
        // alpha(60)/beta(40) enabled sum to 100 already -> pct unchanged.
        let alpha = allocator.allocation_for("alpha", 1_000.0).unwrap();
        assert!((alpha.pct - 60.0).abs() < 1e-9);
        let gamma = allocator.allocation_for("gamma", 1_000.0).unwrap();
        assert_eq!(gamma.allocated_usd, 0.0);
    }

    #[test]
    fn exposure_change_reduces_available_usd() {
        let allocator = CapitalAllocator::new(configs());
        allocator.record_exposure_change("alpha", 2_000.0);
        let alpha = allocator.allocation_for("alpha", 10_000.0).unwrap();
        assert!((alpha.available_usd - 4_000.0).abs() < 1e-9);
    }

    #[test]
    fn exposure_never_goes_negative() {
        let allocator = CapitalAllocator::new(configs());
        allocator.record_exposure_change("alpha", -500.0);
        let alpha = allocator.allocation_for("alpha", 10_000.0).unwrap();
        assert_eq!(alpha.current_exposure_usd, 0.0);
    }
}
