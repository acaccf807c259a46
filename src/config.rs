// =============================================================================
// Unified Configuration — per-engine table over a global risk/health surface
// =============================================================================
//
// Generalizes the teacher's single `RuntimeConfig` (`runtime_config.rs`) into
// a `UnifiedConfig` carrying one `GlobalConfig` (orchestrator-wide risk/health
// knobs) plus a `Vec<EngineConfig>` (per-engine strategy/sizing/exit knobs,
// one of the teacher's flat `RuntimeConfig` per engine). Keeps the teacher's
// `#[serde(default = "...")]`-per-field forward-compatibility discipline and
// its atomic tmp-file + rename `save()`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::gate::GateConfig;
use crate::sizer::SizerConfig;
use crate::types::{AccountMode, TradingMode};

fn default_true() -> bool {
    true
}

fn default_watchlist() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_capital_pct() -> f64 {
    100.0
}
fn default_max_positions() -> u32 {
    3
}
fn default_scan_interval_secs() -> u64 {
    45
}
fn default_monitor_interval_secs() -> u64 {
    5
}
fn default_min_confidence_trending() -> f64 {
    60.0
}
fn default_min_confidence_other() -> f64 {
    65.0
}
fn default_attenuation_band_lo() -> f64 {
    50.0
}
fn default_attenuation_band_hi() -> f64 {
    70.0
}
fn default_min_volume_ratio() -> f64 {
    1.5
}
fn default_reject_volume_ratio() -> f64 {
    0.8
}
fn default_correlation_group_cap() -> u32 {
    2
}
fn default_size_pct_min() -> f64 {
    8.0
}
fn default_size_pct_max() -> f64 {
    25.0
}
fn default_leverage_cap() -> u32 {
    8
}
fn default_blacklist_duration_minutes() -> i64 {
    60
}
fn default_confirmation_candles() -> u32 {
    1
}
fn default_confirmation_adverse_pct() -> f64 {
    0.4
}

/// Per-engine tunables. Roughly one of the teacher's `RuntimeConfig` per
/// configured engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub engine_id: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_capital_pct")]
    pub capital_pct: f64,
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<String>,
    #[serde(default = "default_max_positions")]
    pub max_positions: u32,
    #[serde(default = "default_scan_interval_secs")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,

    // Open Question #1 resolution: these thresholds stay independent,
    // configurable fields rather than hardcoded constants.
    #[serde(default = "default_min_confidence_trending")]
    pub min_confidence_trending: f64,
    #[serde(default = "default_min_confidence_other")]
    pub min_confidence_other: f64,
    #[serde(default = "default_attenuation_band_lo")]
    pub attenuation_band_lo: f64,
    #[serde(default = "default_attenuation_band_hi")]
    pub attenuation_band_hi: f64,
    #[serde(default = "default_min_volume_ratio")]
    pub min_volume_ratio: f64,
    #[serde(default = "default_reject_volume_ratio")]
    pub reject_volume_ratio: f64,
    #[serde(default = "default_correlation_group_cap")]
    pub correlation_group_cap: u32,

    #[serde(default = "default_size_pct_min")]
    pub size_pct_min: f64,
    #[serde(default = "default_size_pct_max")]
    pub size_pct_max: f64,
    #[serde(default = "default_leverage_cap")]
    pub leverage_cap: u32,

    #[serde(default = "default_blacklist_duration_minutes")]
    pub blacklist_duration_minutes: i64,
    #[serde(default = "default_confirmation_candles")]
    pub confirmation_candles: u32,
    #[serde(default = "default_confirmation_adverse_pct")]
    pub confirmation_adverse_pct: f64,

    #[serde(default = "default_true")]
    pub enable_micro_trail: bool,
    #[serde(default = "default_true")]
    pub enable_htf_gate: bool,
    #[serde(default = "default_true")]
    pub enable_cusum: bool,
    #[serde(default = "default_true")]
    pub enable_absorption: bool,
}

impl EngineConfig {
    pub fn new(engine_id: impl Into<String>) -> Self {
        Self {
            engine_id: engine_id.into(),
            enabled: true,
            capital_pct: default_capital_pct(),
            watchlist: default_watchlist(),
            max_positions: default_max_positions(),
            scan_interval_secs: default_scan_interval_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            min_confidence_trending: default_min_confidence_trending(),
            min_confidence_other: default_min_confidence_other(),
            attenuation_band_lo: default_attenuation_band_lo(),
            attenuation_band_hi: default_attenuation_band_hi(),
            min_volume_ratio: default_min_volume_ratio(),
            reject_volume_ratio: default_reject_volume_ratio(),
            correlation_group_cap: default_correlation_group_cap(),
            size_pct_min: default_size_pct_min(),
            size_pct_max: default_size_pct_max(),
            leverage_cap: default_leverage_cap(),
            blacklist_duration_minutes: default_blacklist_duration_minutes(),
            confirmation_candles: default_confirmation_candles(),
            confirmation_adverse_pct: default_confirmation_adverse_pct(),
            enable_micro_trail: true,
            enable_htf_gate: true,
            enable_cusum: true,
            enable_absorption: true,
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            min_confidence_trending: self.min_confidence_trending,
            min_confidence_other: self.min_confidence_other,
            attenuation_band_lo: self.attenuation_band_lo,
            attenuation_band_hi: self.attenuation_band_hi,
            min_volume_ratio: self.min_volume_ratio,
            reject_volume_ratio: self.reject_volume_ratio,
            correlation_group_cap: self.correlation_group_cap,
        }
    }

    pub fn sizer_config(&self) -> SizerConfig {
        SizerConfig {
            min_size_pct: self.size_pct_min,
            max_size_pct: self.size_pct_max,
            leverage_cap: self.leverage_cap,
        }
    }
}

fn default_daily_loss_limit_pct() -> f64 {
    3.0
}
fn default_max_drawdown_pct() -> f64 {
    5.0
}
fn default_circuit_breaker_cooldown_minutes() -> i64 {
    60
}
fn default_heartbeat_warn_seconds() -> u64 {
    60
}
fn default_heartbeat_restart_seconds() -> u64 {
    300
}
fn default_max_restarts() -> u32 {
    3
}
fn default_shutdown_grace_period_seconds() -> u64 {
    30
}
fn default_monitor_tick_seconds() -> u64 {
    1
}
fn default_max_daily_trades() -> u32 {
    50
}
fn default_max_consecutive_losses() -> u32 {
    5
}
fn default_emergency_position_loss_pct() -> f64 {
    4.0
}
fn default_emergency_portfolio_loss_pct() -> f64 {
    5.0
}

/// Orchestrator-wide knobs shared by every engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: f64,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: u32,
    #[serde(default = "default_circuit_breaker_cooldown_minutes")]
    pub circuit_breaker_cooldown_minutes: i64,
    #[serde(default = "default_heartbeat_warn_seconds")]
    pub heartbeat_warn_seconds: u64,
    #[serde(default = "default_heartbeat_restart_seconds")]
    pub heartbeat_restart_seconds: u64,
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,
    #[serde(default = "default_shutdown_grace_period_seconds")]
    pub shutdown_grace_period_seconds: u64,
    #[serde(default = "default_monitor_tick_seconds")]
    pub monitor_tick_seconds: u64,
    #[serde(default = "default_emergency_position_loss_pct")]
    pub emergency_position_loss_pct: f64,
    #[serde(default = "default_emergency_portfolio_loss_pct")]
    pub emergency_portfolio_loss_pct: f64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            max_drawdown_pct: default_max_drawdown_pct(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_daily_trades: default_max_daily_trades(),
            circuit_breaker_cooldown_minutes: default_circuit_breaker_cooldown_minutes(),
            heartbeat_warn_seconds: default_heartbeat_warn_seconds(),
            heartbeat_restart_seconds: default_heartbeat_restart_seconds(),
            max_restarts: default_max_restarts(),
            shutdown_grace_period_seconds: default_shutdown_grace_period_seconds(),
            monitor_tick_seconds: default_monitor_tick_seconds(),
            emergency_position_loss_pct: default_emergency_position_loss_pct(),
            emergency_portfolio_loss_pct: default_emergency_portfolio_loss_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedConfig {
    #[serde(default)]
    pub trading_mode: TradingMode,
    #[serde(default)]
    pub account_mode: AccountMode,
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub engines: Vec<EngineConfig>,
}

impl Default for UnifiedConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Demo,
            global: GlobalConfig::default(),
            engines: vec![EngineConfig::new("primary")],
        }
    }
}

impl UnifiedConfig {
    /// Sum of enabled engines' `capital_pct`; `start()` must reject > 100.
    pub fn enabled_capital_pct_total(&self) -> f64 {
        self.engines
            .iter()
            .filter(|e| e.enabled)
            .map(|e| e.capital_pct)
            .sum()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read unified config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse unified config from {}", path.display()))?;
        info!(path = %path.display(), engines = config.engines.len(), "unified config loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise unified config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;
        info!(path = %path.display(), "unified config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_one_engine_at_100_pct() {
        let cfg = UnifiedConfig::default();
        assert_eq!(cfg.engines.len(), 1);
        assert_eq!(cfg.enabled_capital_pct_total(), 100.0);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: UnifiedConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.trading_mode, TradingMode::Paused);
        assert_eq!(cfg.global.max_restarts, 3);
    }

    #[test]
    fn deserialise_partial_engine_json_fills_defaults() {
        let json = r#"{"engines": [{"engine_id": "alpha"}]}"#;
        let cfg: UnifiedConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.engines[0].leverage_cap, 8);
        assert_eq!(cfg.engines[0].max_positions, 3);
    }

    #[test]
    fn gate_and_sizer_config_carry_engine_thresholds() {
        let mut engine = EngineConfig::new("alpha");
        engine.min_confidence_trending = 55.0;
        engine.leverage_cap = 6;
        assert_eq!(engine.gate_config().min_confidence_trending, 55.0);
        assert_eq!(engine.sizer_config().leverage_cap, 6);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = UnifiedConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: UnifiedConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.engines.len(), cfg2.engines.len());
        assert_eq!(cfg.global.max_restarts, cfg2.global.max_restarts);
    }
}
