// =============================================================================
// Per-Engine Scan Loop — ties the Scanner, Multi-Timeframe Analyzer, Signal
// Quality Gate, Sizer, and Execution Engine together for one configured
// engine (spec §4.1, §4.9)
// =============================================================================
//
// Grounded in the teacher's `main.rs` strategy-loop task: a periodic tick
// that evaluates the watchlist, turns proposals into orders, and seeds the
// exit monitor's trail state for every new position. Generalized from the
// teacher's single global loop into one task per configured engine, each
// holding only its own `PositionManager`/`RiskMonitor`/`Journal` so a panic
// or risk breach in one engine can't touch another.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::analyzer::{self, AnalyzerConfig, ReferenceSnapshot, TimeframeView};
use crate::app_state::AppState;
use crate::blacklist::Blacklist;
use crate::correlation::CorrelationTable;
use crate::exchange::ExchangeAdapter;
use crate::execution::{ExecutionEngine, ExecutionResult};
use crate::exit::micro_trail::MicroTrailState;
use crate::exit::monitor::{MicroTrailStates, TrailStates};
use crate::exit::triple_barrier::{StopConfig, TrailState};
use crate::gate::{Gate, GateInputs};
use crate::journal::Journal;
use crate::market_data::{Candle, CandleKey};
use crate::position_engine::{ConfirmOutcome, PositionManager};
use crate::risk::RiskMonitor;
use crate::scanner::{self, RankedCandidate, ScannerConfig};
use crate::sizer::{self, SizerConfig};
use crate::types::{AccountMode, AcceptedTrade, CorrelationGroup};

const BASE_TIMEFRAME: &str = "15m";
const HIGHER_TIMEFRAMES: [&str; 3] = ["4h", "1h", "15m"];
const CANDLE_LOOKBACK: usize = 150;
const REFERENCE_SYMBOL: &str = "BTCUSDT";

/// Everything one engine's scan loop needs, gathered once at spawn time.
pub struct EngineLoop {
    pub engine_id: String,
    pub state: Arc<AppState>,
    pub exchange: Arc<dyn ExchangeAdapter>,
    pub execution: Arc<ExecutionEngine>,
    pub position_manager: Arc<PositionManager>,
    pub risk_monitor: Arc<RiskMonitor>,
    pub journal: Arc<Journal>,
    pub health: Arc<crate::heartbeat::EngineHealth>,
    pub blacklist: Arc<Blacklist>,
    pub correlation: Arc<CorrelationTable>,
    pub trails: TrailStates,
    pub micro_trails: MicroTrailStates,
}

impl EngineLoop {
    /// Run this engine's scan loop forever. Spawn as a background Tokio task.
    pub async fn run(self) {
        let scan_interval_secs = {
            let config = self.state.config.read();
            config
                .engines
                .iter()
                .find(|e| e.engine_id == self.engine_id)
                .map(|e| e.scan_interval_secs)
                .unwrap_or(45)
        };

        info!(engine_id = %self.engine_id, scan_interval_secs, "engine scan loop starting");
        let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(scan_interval_secs));

        loop {
            ticker.tick().await;
            self.health.beat();

            if let Err(e) = self.tick().await {
                warn!(engine_id = %self.engine_id, error = %e, "engine tick failed");
            }
        }
    }

    async fn tick(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        self.resolve_pending(now);

        let engine_cfg = {
            let config = self.state.config.read();
            config
                .engines
                .iter()
                .find(|e| e.engine_id == self.engine_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("engine {} missing from config", self.engine_id))?
        };
        let is_demo = {
            let config = self.state.config.read();
            config.account_mode == AccountMode::Demo
                || config.trading_mode != crate::types::TradingMode::Live
        };

        let tickers = self.exchange.get_ticker_snapshot(now).await?;
        let scanner_config = ScannerConfig {
            min_volume_usd: 10_000_000.0,
            top_n: engine_cfg.watchlist.len().max(10),
        };
        let blacklist_patterns: Vec<String> =
            self.blacklist.snapshot().iter().map(|e| e.symbol.clone()).collect();
        let ranked = scanner::scan(&tickers, &blacklist_patterns, &scanner_config);
        let ranked_by_symbol: HashMap<String, RankedCandidate> =
            ranked.into_iter().map(|c| (c.symbol.clone(), c)).collect();

        let gate_config = engine_cfg.gate_config();
        let sizer_config = engine_cfg.sizer_config();
        let gate = Gate::new(gate_config);

        let reference = self.reference_snapshot();

        for symbol in &engine_cfg.watchlist {
            if symbol == REFERENCE_SYMBOL {
                continue;
            }
            self.evaluate_symbol(
                symbol,
                &gate,
                &sizer_config,
                &ranked_by_symbol,
                reference,
                &engine_cfg,
                is_demo,
                now,
            )
            .await;
        }

        self.blacklist.prune(now);
        Ok(())
    }

    /// Resolve every pending position whose confirmation deadline has
    /// arrived, and cancel anything left over from a missed tick.
    fn resolve_pending(&self, now: chrono::DateTime<Utc>) {
        for id in self.position_manager.expire_unconfirmed(now) {
            debug!(engine_id = %self.engine_id, position_id = %id, "pending position expired unconfirmed");
        }

        for pending in self.position_manager.get_pending_positions() {
            if pending
                .confirmation_deadline
                .map(|d| now < d)
                .unwrap_or(true)
            {
                continue;
            }
            let current_price = {
                let procs = self.state.trade_processors.read();
                procs.get(&pending.symbol).map(|tp| tp.last_price()).unwrap_or(0.0)
            };
            let price = if current_price > 0.0 { current_price } else { pending.entry_price };
            let max_adverse_pct = {
                let config = self.state.config.read();
                config
                    .engines
                    .iter()
                    .find(|e| e.engine_id == self.engine_id)
                    .map(|e| e.confirmation_adverse_pct)
                    .unwrap_or(crate::position_engine::DEFAULT_CONFIRMATION_ADVERSE_PCT)
            };
            if let Some(outcome) =
                self.position_manager.confirm_pending(&pending.id, price, max_adverse_pct, now)
            {
                match outcome {
                    ConfirmOutcome::Activated => {
                        self.seed_exit_state(&pending.id, &pending, now);
                        self.state.increment_version();
                    }
                    ConfirmOutcome::Cancelled(reason) => {
                        info!(engine_id = %self.engine_id, position_id = %pending.id, %reason, "pending entry cancelled");
                        self.state.increment_version();
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_symbol(
        &self,
        symbol: &str,
        gate: &Gate,
        sizer_config: &SizerConfig,
        ranked_by_symbol: &HashMap<String, RankedCandidate>,
        reference: Option<ReferenceSnapshot>,
        engine_cfg: &crate::config::EngineConfig,
        is_demo: bool,
        now: chrono::DateTime<Utc>,
    ) {
        let base_candles = self.closed_candles(symbol, BASE_TIMEFRAME, CANDLE_LOOKBACK);
        if base_candles.len() < 50 {
            return;
        }

        let analyzer_config = AnalyzerConfig {
            min_confidence: engine_cfg.min_confidence_other.min(engine_cfg.min_confidence_trending),
            ..AnalyzerConfig::default()
        };

        let views: Vec<TimeframeView> = HIGHER_TIMEFRAMES
            .iter()
            .filter_map(|tf| {
                let candles = self.closed_candles(symbol, tf, CANDLE_LOOKBACK);
                analyzer::timeframe_view(tf, &candles)
            })
            .collect();
        if views.len() < HIGHER_TIMEFRAMES.len() {
            return;
        }

        let micro_1m = analyzer::timeframe_view("1m", &self.closed_candles(symbol, "1m", 30));
        let micro_5m = analyzer::timeframe_view("5m", &self.closed_candles(symbol, "5m", 30));

        let correlation_group = self.correlation.group_for(symbol);
        let volume_ratio = ranked_by_symbol.get(symbol).map(|c| c.volume_ratio).unwrap_or(1.0);

        let proposal = analyzer::analyze(
            symbol,
            &self.state.regime_detector.read(),
            &base_candles,
            &views,
            micro_1m.as_ref(),
            micro_5m.as_ref(),
            reference,
            volume_ratio,
            correlation_group,
            &analyzer_config,
        );

        let Some(mut proposal) = proposal else {
            return;
        };
        if let Some(bias) = ranked_by_symbol.get(symbol) {
            proposal.context.scanner_bias = Some(if bias.price_change_5m_pct >= 0.0 {
                crate::types::Side::Long
            } else {
                crate::types::Side::Short
            });
        }

        let portfolio_value = self.risk_monitor.get_state(now).peak_portfolio_value;
        let allocation = self
            .state
            .capital_allocator
            .allocation_for(&self.engine_id, portfolio_value);
        let allocated_capital_usd = allocation.map(|a| a.allocated_usd).unwrap_or(0.0);
        let open_positions = self.position_manager.get_open_positions();
        let total_position_count = (open_positions.len()
            + self.position_manager.get_pending_positions().len()) as u32;
        if total_position_count >= engine_cfg.max_positions {
            debug!(
                engine_id = %self.engine_id,
                symbol,
                total_position_count,
                max_positions = engine_cfg.max_positions,
                "max concurrent positions reached, skipping"
            );
            return;
        }
        let open_positions_in_group = open_positions
            .iter()
            .filter(|p| self.correlation.group_for(&p.symbol) == correlation_group)
            .count() as u32;
        let (risk_can_open, _) = self.risk_monitor.can_open(now);

        let gate_inputs = GateInputs {
            now,
            blacklist: &self.blacklist,
            correlation: &self.correlation,
            open_positions_in_group,
            allocated_capital_usd,
            current_exposure_usd: self.position_manager.exposure_usd(),
            risk_can_open,
        };
        let verdict = gate.evaluate(&proposal, &gate_inputs);

        let side_str = proposal.side.to_string();
        let envelope = if verdict.allowed() {
            crate::decision_envelope::DecisionEnvelope::allow(symbol, &side_str, "HeliosMTF")
        } else {
            let reason = match &verdict.final_decision {
                crate::gate::Decision::Reject(r) => r.clone(),
                _ => "rejected".to_string(),
            };
            crate::decision_envelope::DecisionEnvelope::blocked(symbol, &side_str, "HeliosMTF", "Gate", reason)
        };
        self.state.push_decision(envelope);

        if !verdict.allowed() {
            return;
        }

        let history = self.journal.symbol_history(symbol);
        let Some(sizing) = sizer::size_position(
            verdict.adjusted_confidence,
            proposal.context.regime,
            history,
            verdict.size_multiplier,
            sizer_config,
        ) else {
            return;
        };

        let size_usd = sizer::size_usd(sizing.size_pct, allocated_capital_usd);
        if size_usd <= 0.0 {
            return;
        }

        let effective_stop_loss_pct = if proposal.entry_price > 0.0 {
            ((proposal.stop_loss - proposal.entry_price) / proposal.entry_price).abs() * 100.0
        } else {
            0.0
        };

        let confirmation_deadline = now
            + chrono::Duration::seconds(
                (engine_cfg.confirmation_candles.max(1) as i64)
                    * engine_cfg.scan_interval_secs as i64,
            );

        proposal.confidence = verdict.adjusted_confidence;
        let effective_stop_loss_price = proposal.stop_loss;
        let accepted = AcceptedTrade {
            proposal,
            size_pct: sizing.size_pct,
            size_usd,
            leverage: sizing.leverage,
            effective_stop_loss_pct,
            effective_stop_loss_price,
            pending_confirmation: engine_cfg.confirmation_candles > 0,
            confirmation_deadline,
        };

        let result = self.execution.execute_accepted(&accepted, is_demo, now).await;
        info!(engine_id = %self.engine_id, symbol, result = %result, "execution result");

        if let ExecutionResult::Placed(id) | ExecutionResult::Simulated(id) = &result {
            if let Some(pos) = self
                .position_manager
                .get_pending_positions()
                .into_iter()
                .find(|p| &p.id == id)
            {
                self.seed_exit_state(id, &pos, now);
            }
        }
    }

    /// Create trail/micro-trail state for a freshly opened (or freshly
    /// confirmed) position so the exit monitor loop picks it up next tick.
    fn seed_exit_state(&self, position_id: &str, pos: &crate::position_engine::Position, _now: chrono::DateTime<Utc>) {
        let regime = self
            .state
            .regime_detector
            .read()
            .current_regime()
            .map(|s| s.regime)
            .unwrap_or(crate::types::Regime::Sideways);

        if let Some(config) = StopConfig::from_atr(pos.atr, pos.entry_price, regime) {
            let trail = TrailState::new(config, pos.entry_price, pos.side, false);
            self.trails.write().insert(position_id.to_string(), trail);
        }

        let engine_cfg = {
            let config = self.state.config.read();
            config.engines.iter().find(|e| e.engine_id == self.engine_id).cloned()
        };
        if engine_cfg.map(|e| e.enable_micro_trail).unwrap_or(true) {
            let tp1_price = match pos.side {
                crate::types::Side::Long => pos.entry_price + pos.atr * 2.0,
                crate::types::Side::Short => pos.entry_price - pos.atr * 2.0,
            };
            let mut micro = MicroTrailState::new(pos.side == crate::types::Side::Long, pos.entry_price, tp1_price, pos.atr);
            let cvd = {
                let procs = self.state.trade_processors.read();
                procs.get(&pos.symbol).map(|tp| tp.cvd()).unwrap_or(0.0)
            };
            micro.set_cvd_at_entry(cvd);
            self.micro_trails.write().insert(position_id.to_string(), micro);
        }

        info!(engine_id = %self.engine_id, position_id, symbol = %pos.symbol, "exit state seeded");
    }

    fn closed_candles(&self, symbol: &str, interval: &str, count: usize) -> Vec<Candle> {
        let key = CandleKey {
            symbol: symbol.to_string(),
            interval: interval.to_string(),
        };
        self.state.candle_buffer.get_closed_candles(&key, count)
    }

    /// BTC's own 4h trend + ATR, consulted by the analyzer's correlation veto.
    fn reference_snapshot(&self) -> Option<ReferenceSnapshot> {
        let candles_4h = self.closed_candles(REFERENCE_SYMBOL, "4h", CANDLE_LOOKBACK);
        if candles_4h.len() < 30 {
            return None;
        }
        let trend_4h = analyzer::timeframe_view("4h", &candles_4h)?.trend;
        let atr14 = crate::indicators::atr::calculate_atr(&candles_4h, 14)?;
        let atrs: Vec<f64> = (14..candles_4h.len())
            .filter_map(|i| crate::indicators::atr::calculate_atr(&candles_4h[..=i], 14))
            .collect();
        let atr_average = if atrs.is_empty() {
            atr14
        } else {
            atrs.iter().sum::<f64>() / atrs.len() as f64
        };
        Some(ReferenceSnapshot {
            trend_4h,
            atr14,
            atr_average,
        })
    }
}
