// =============================================================================
// Central Application State — Helios Futures Engine
// =============================================================================
//
// The single source of truth for the entire engine. All subsystems hold Arc
// references to their own state; AppState ties them together and provides a
// unified snapshot for the dashboard API and WebSocket feed.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::capital_allocator::{CapitalAllocator, EngineCapitalConfig};
use crate::config::UnifiedConfig;
use crate::decision_envelope::DecisionEnvelope;
use crate::heartbeat::{EngineHealth, EngineHealthSnapshot};
use crate::journal::Journal;
use crate::market_data::{CandleBuffer, OrderBookManager, TradeStreamProcessor};
use crate::position_engine::{Position, PositionManager};
use crate::regime::{RegimeDetector, RegimeState};
use crate::risk::{CircuitBreakerInfo, RiskMonitor};
use crate::signals::VPINState;
use crate::types::BalanceInfo;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// Optional machine-readable error code (e.g. Binance error code).
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

/// Per-engine runtime state: each configured engine gets its own position
/// lifecycle manager, risk monitor, journal, and health tracker, so a crash
/// or breach in one engine never touches another (spec §4.1 fault isolation).
pub struct EngineRuntime {
    pub engine_id: String,
    pub position_manager: Arc<PositionManager>,
    pub risk_monitor: Arc<RiskMonitor>,
    pub journal: Arc<Journal>,
    pub health: Arc<EngineHealth>,
}

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Monotonically increasing version counter. Incremented on every
    /// meaningful state mutation. The WebSocket feed uses this to detect
    /// changes and push updates.
    pub state_version: AtomicU64,

    /// WebSocket message sequence number (incremented per message sent).
    pub ws_sequence_number: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub config: Arc<RwLock<UnifiedConfig>>,

    // ── Market Data ─────────────────────────────────────────────────────
    pub candle_buffer: Arc<CandleBuffer>,
    pub trade_processors: RwLock<HashMap<String, Arc<TradeStreamProcessor>>>,
    pub orderbook_manager: Arc<OrderBookManager>,

    // ── Capital Allocation ──────────────────────────────────────────────
    pub capital_allocator: Arc<CapitalAllocator>,

    // ── Engines ─────────────────────────────────────────────────────────
    /// One runtime per configured engine, in `config.engines` order. The
    /// dashboard-facing shortcuts below (`risk_monitor`, `position_manager`,
    /// `journal`) always point at `engines[0]`, the primary engine.
    pub engines: Vec<EngineRuntime>,

    // ── Risk (primary engine shortcut) ──────────────────────────────────
    pub risk_monitor: Arc<RiskMonitor>,

    // ── Positions (primary engine shortcut) ─────────────────────────────
    pub position_manager: Arc<PositionManager>,

    // ── Trade Journal (primary engine shortcut) ─────────────────────────
    pub journal: Arc<Journal>,

    // ── Regime Detection ────────────────────────────────────────────────
    pub regime_detector: Arc<RwLock<RegimeDetector>>,

    // ── Signal Pipeline ─────────────────────────────────────────────────
    pub vpin_states: RwLock<HashMap<String, VPINState>>,

    // ── Account / Exchange ──────────────────────────────────────────────
    pub balances: RwLock<Vec<BalanceInfo>>,

    // ── Decision Audit Trail ────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<DecisionEnvelope>>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Operational Status ──────────────────────────────────────────────
    pub no_go_reason: RwLock<Option<String>>,
    pub ws_user_connected: RwLock<bool>,
    pub last_ws_user_event: RwLock<std::time::Instant>,
    pub last_reconcile_ok: RwLock<Option<std::time::Instant>>,
    pub last_reconcile_error: RwLock<Option<String>>,

    // ── Futures Intelligence ────────────────────────────────────────────
    pub futures_intel: RwLock<HashMap<String, serde_json::Value>>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Construct a new `AppState` from the given unified configuration.
    ///
    /// All subsystems are initialised with sensible defaults derived from
    /// `config`. The returned value is typically wrapped in `Arc` immediately.
    pub fn new(config: UnifiedConfig) -> Self {
        let now = Utc::now();

        // Pre-create trade processors for the union of every engine's watchlist.
        let mut trade_processors = HashMap::new();
        for engine in &config.engines {
            for symbol in &engine.watchlist {
                trade_processors
                    .entry(symbol.clone())
                    .or_insert_with(|| Arc::new(TradeStreamProcessor::new(symbol.clone())));
            }
        }

        // Derive starting capital from a sensible default. In production this
        // would be fetched from the exchange balance.
        let starting_capital = 1000.0;

        let capital_allocator = Arc::new(CapitalAllocator::new(
            config
                .engines
                .iter()
                .map(|e| EngineCapitalConfig {
                    engine_id: e.engine_id.clone(),
                    enabled: e.enabled,
                    capital_pct: e.capital_pct,
                })
                .collect(),
        ));

        let engines: Vec<EngineRuntime> = config
            .engines
            .iter()
            .map(|engine_cfg| EngineRuntime {
                engine_id: engine_cfg.engine_id.clone(),
                position_manager: Arc::new(PositionManager::new()),
                risk_monitor: Arc::new(RiskMonitor::new(
                    starting_capital,
                    config.global.daily_loss_limit_pct / 100.0,
                    config.global.max_consecutive_losses,
                    config.global.max_drawdown_pct / 100.0,
                    config.global.max_daily_trades,
                    chrono::Duration::minutes(config.global.circuit_breaker_cooldown_minutes),
                    now,
                )),
                journal: Arc::new(Journal::new()),
                health: Arc::new(EngineHealth::new(
                    engine_cfg.engine_id.clone(),
                    config.global.heartbeat_warn_seconds,
                    config.global.heartbeat_restart_seconds,
                    config.global.max_restarts,
                )),
            })
            .collect();

        let primary = engines
            .first()
            .expect("UnifiedConfig must have at least one engine");
        let risk_monitor = primary.risk_monitor.clone();
        let position_manager = primary.position_manager.clone();
        let journal = primary.journal.clone();

        Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),

            config: Arc::new(RwLock::new(config)),
            candle_buffer: Arc::new(CandleBuffer::new(500)),
            trade_processors: RwLock::new(trade_processors),
            orderbook_manager: Arc::new(OrderBookManager::new()),

            capital_allocator,
            engines,
            risk_monitor,
            position_manager,
            journal,

            regime_detector: Arc::new(RwLock::new(RegimeDetector::default())),
            vpin_states: RwLock::new(HashMap::new()),

            balances: RwLock::new(Vec::new()),
            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),

            no_go_reason: RwLock::new(None),
            ws_user_connected: RwLock::new(false),
            last_ws_user_event: RwLock::new(std::time::Instant::now()),
            last_reconcile_ok: RwLock::new(None),
            last_reconcile_error: RwLock::new(None),

            futures_intel: RwLock::new(HashMap::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    /// Atomically increment the state version. Call this after every
    /// meaningful mutation to signal WebSocket clients that fresh data is
    /// available.
    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    /// Read the current state version without modifying it.
    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message. The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted when the limit is
    /// reached.
    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    /// Record an error with an optional machine-readable code.
    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Decision Audit ──────────────────────────────────────────────────

    /// Record a decision envelope. The ring buffer is capped at
    /// [`MAX_RECENT_DECISIONS`]; oldest entries are evicted when the limit
    /// is reached.
    pub fn push_decision(&self, envelope: DecisionEnvelope) {
        let mut decisions = self.recent_decisions.write();
        decisions.push(envelope);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the entire engine state.
    ///
    /// This is the payload sent to the dashboard via the REST
    /// `GET /api/v1/state` endpoint and the WebSocket push feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = Utc::now();
        let config = self.config.read();
        let version = self.current_state_version();

        // ── Truth header ────────────────────────────────────────────
        let ws_user_event_age_ms = self
            .last_ws_user_event
            .read()
            .elapsed()
            .as_millis() as u64;

        let reconcile_last_ok_age_s = self.last_reconcile_ok.read().map(|t| t.elapsed().as_secs());

        // Get risk state to extract the risk mode (primary engine).
        let risk_state = self.risk_monitor.get_state(now);

        let truth = TruthHeader {
            ws_mode: "combined".to_string(),
            ws_user_connected: *self.ws_user_connected.read(),
            last_ws_user_event_age_ms: ws_user_event_age_ms,
            reconcile_last_ok_age_s,
            reconcile_last_error: self.last_reconcile_error.read().clone(),
            no_go_reason: self.no_go_reason.read().clone(),
            state_version: version,
            ws_sequence_number: self.ws_sequence_number.load(Ordering::Relaxed),
            trading_mode: config.trading_mode.to_string(),
            risk_mode: risk_state.risk_mode.clone(),
            server_time: now.timestamp_millis(),
        };

        // ── Positions ───────────────────────────────────────────────
        let positions = self.position_manager.get_open_positions();

        // ── Decisions ───────────────────────────────────────────────
        let recent_decisions = self.recent_decisions.read().clone();

        // ── Risk ────────────────────────────────────────────────────
        let risk = RiskSnapshot {
            risk_mode: risk_state.risk_mode.clone(),
            daily_pnl: Some(risk_state.daily_pnl),
            daily_pnl_pct: Some(risk_state.daily_pnl_pct),
            remaining_daily_loss_pct: Some(risk_state.remaining_daily_loss_pct),
            circuit_breakers: Some(risk_state.circuit_breakers.clone()),
        };

        // ── Runtime config summary ──────────────────────────────────
        let all_symbols: Vec<String> = {
            let mut set: Vec<String> = Vec::new();
            for engine in &config.engines {
                for symbol in &engine.watchlist {
                    if !set.contains(symbol) {
                        set.push(symbol.clone());
                    }
                }
            }
            set
        };
        let primary_engine_cfg = config.engines.first();
        let runtime_config_summary = RuntimeConfigSummary {
            trading_mode: config.trading_mode.to_string(),
            account_mode: Some(config.account_mode.to_string()),
            symbols: Some(all_symbols.clone()),
            max_concurrent_positions: primary_engine_cfg.map(|e| e.max_positions),
            max_daily_loss_pct: Some(config.global.daily_loss_limit_pct),
            max_consecutive_losses: Some(config.global.max_consecutive_losses),
            max_trades_per_day: Some(config.global.max_daily_trades),
        };

        // ── Balances ────────────────────────────────────────────────
        let balances = self.balances.read().clone();

        // ── Errors ──────────────────────────────────────────────────
        let recent_errors = self.recent_errors.read().clone();

        // ── Market data ─────────────────────────────────────────────
        let market_data = self.build_market_data_snapshot(&all_symbols);

        // ── Engine health & capital allocation ───────────────────────
        let engine_health: Vec<EngineHealthSnapshot> =
            self.engines.iter().map(|e| e.health.snapshot()).collect();
        let portfolio_value = self.risk_monitor.get_state(now).peak_portfolio_value;
        let allocations: HashMap<String, crate::capital_allocator::EngineAllocation> = self
            .engines
            .iter()
            .filter_map(|e| {
                self.capital_allocator
                    .allocation_for(&e.engine_id, portfolio_value)
                    .map(|a| (e.engine_id.clone(), a))
            })
            .collect();

        // ── Regime ──────────────────────────────────────────────────
        let regime = self.regime_detector.read().current_regime().map(|rs| {
            RegimeSnapshot {
                regime: rs.regime.to_string(),
                adx: Some(rs.adx),
                bbw: Some(rs.price_band_pct),
                hurst: Some(rs.hurst),
                entropy: Some(rs.entropy),
                regime_age_seconds: Some(rs.regime_age_secs),
            }
        });

        // ── VPIN ────────────────────────────────────────────────────
        let vpin = {
            let states = self.vpin_states.read();
            if states.is_empty() {
                None
            } else {
                Some(states.clone())
            }
        };

        // ── Futures intel ───────────────────────────────────────────
        let futures_intel = {
            let intel = self.futures_intel.read();
            if intel.is_empty() {
                None
            } else {
                Some(intel.clone())
            }
        };

        // ── Journal stats ───────────────────────────────────────────
        let journal_stats = self.journal.aggregate_stats().map(|s| JournalStats {
            total_trades: s.total_trades,
            win_rate: s.win_rate,
            total_net_pnl: s.total_net_pnl,
            profit_factor: s.profit_factor,
        });

        // ── Heartbeat ───────────────────────────────────────────────
        let last_heartbeat_age_s = Some(ws_user_event_age_ms / 1000);

        // ── Feature flags ───────────────────────────────────────────
        let feature_flags = primary_engine_cfg.map(|e| FeatureFlagsSnapshot {
            htf_gate: e.enable_htf_gate,
            cusum: e.enable_cusum,
            absorption: e.enable_absorption,
            micro_trail: e.enable_micro_trail,
        });

        StateSnapshot {
            state_version: version,
            server_time: now.timestamp_millis(),
            truth,
            positions,
            recent_decisions,
            risk,
            runtime_config: runtime_config_summary,
            balances: Some(balances),
            recent_errors: Some(recent_errors),
            market_data: Some(market_data),
            regime,
            vpin,
            futures_intel,
            journal_stats,
            last_heartbeat_age_s,
            feature_flags,
            engines: engine_health,
            allocations,
        }
    }

    /// Build market data snapshots for each tracked symbol.
    fn build_market_data_snapshot(&self, symbols: &[String]) -> MarketDataSnapshot {
        let mut symbol_data = HashMap::new();
        let trade_procs = self.trade_processors.read();

        for symbol in symbols {
            let last_price = trade_procs
                .get(symbol)
                .map(|tp| tp.last_price())
                .unwrap_or(0.0);

            let cvd = trade_procs
                .get(symbol)
                .map(|tp| tp.cvd())
                .unwrap_or(0.0);

            let buy_volume_ratio = trade_procs
                .get(symbol)
                .map(|tp| tp.buy_volume_ratio())
                .unwrap_or(0.5);

            let orderbook_imbalance = self
                .orderbook_manager
                .imbalance(symbol)
                .unwrap_or(0.0);

            let spread_bps = self.orderbook_manager.spread_bps(symbol);

            symbol_data.insert(
                symbol.clone(),
                SymbolMarketData {
                    last_price,
                    rsi_14: None,
                    ema_9: None,
                    ema_21: None,
                    ema_55: None,
                    adx: None,
                    atr_14: None,
                    bollinger_width: None,
                    roc_14: None,
                    spread_bps,
                    cvd,
                    orderbook_imbalance,
                    buy_volume_ratio,
                },
            );
        }

        MarketDataSnapshot {
            symbols: symbol_data,
        }
    }
}

// =============================================================================
// Serialisable snapshot types (match the TypeScript StateSnapshot interface)
// =============================================================================

/// Full engine state snapshot sent to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub truth: TruthHeader,
    pub positions: Vec<Position>,
    pub recent_decisions: Vec<DecisionEnvelope>,
    pub risk: RiskSnapshot,
    pub runtime_config: RuntimeConfigSummary,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub balances: Option<Vec<BalanceInfo>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub recent_errors: Option<Vec<ErrorRecord>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_data: Option<MarketDataSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime: Option<RegimeSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpin: Option<HashMap<String, VPINState>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub futures_intel: Option<HashMap<String, serde_json::Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_stats: Option<JournalStats>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_age_s: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_flags: Option<FeatureFlagsSnapshot>,

    pub engines: Vec<EngineHealthSnapshot>,

    pub allocations: HashMap<String, crate::capital_allocator::EngineAllocation>,
}

/// Operational truth header — the dashboard's primary status banner.
#[derive(Debug, Clone, Serialize)]
pub struct TruthHeader {
    pub ws_mode: String,
    pub ws_user_connected: bool,
    pub last_ws_user_event_age_ms: u64,
    pub reconcile_last_ok_age_s: Option<u64>,
    pub reconcile_last_error: Option<String>,
    pub no_go_reason: Option<String>,
    pub state_version: u64,
    pub ws_sequence_number: u64,
    pub trading_mode: String,
    pub risk_mode: String,
    pub server_time: i64,
}

/// Risk engine snapshot for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSnapshot {
    pub risk_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_pnl: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_pnl_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_daily_loss_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breakers: Option<Vec<CircuitBreakerInfo>>,
}

/// Summary of runtime config for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigSummary {
    pub trading_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_positions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_daily_loss_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_losses: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_trades_per_day: Option<u32>,
}

/// Market data for all tracked symbols.
#[derive(Debug, Clone, Serialize)]
pub struct MarketDataSnapshot {
    pub symbols: HashMap<String, SymbolMarketData>,
}

/// Per-symbol market data indicators.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolMarketData {
    pub last_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsi_14: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema_9: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema_21: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema_55: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub atr_14: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bollinger_width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roc_14: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread_bps: Option<f64>,
    pub cvd: f64,
    pub orderbook_imbalance: f64,
    pub buy_volume_ratio: f64,
}

/// Regime detection snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RegimeSnapshot {
    pub regime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbw: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hurst: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entropy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regime_age_seconds: Option<f64>,
}

/// Feature flags snapshot for the dashboard (primary engine).
#[derive(Debug, Clone, Serialize)]
pub struct FeatureFlagsSnapshot {
    pub htf_gate: bool,
    pub cusum: bool,
    pub absorption: bool,
    pub micro_trail: bool,
}

/// Trade journal aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: f64,
    pub profit_factor: f64,
}
