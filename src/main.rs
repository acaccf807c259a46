// =============================================================================
// Helios Futures Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. Operators must
// explicitly switch to Live mode via the dashboard or API once they're
// satisfied with demo behavior.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod absorption_detector;
mod analyzer;
mod api;
mod app_state;
mod arena;
mod blacklist;
mod capital_allocator;
mod clock;
mod config;
mod correlation;
mod cusum_detector;
mod decision_envelope;
mod engine;
mod error;
mod exchange;
mod execution;
mod exit;
mod futures_intel;
mod gate;
mod heartbeat;
mod htf_analysis;
mod indicators;
mod journal;
mod market_data;
mod orchestrator;
mod position_engine;
mod regime;
mod risk;
mod scanner;
mod signals;
mod sizer;
mod types;

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::UnifiedConfig;
use crate::exchange::{BinanceFuturesClient, ExchangeAdapter};
use crate::orchestrator::Orchestrator;
use crate::types::{AccountMode, TradingMode};

const UNIFIED_CONFIG_PATH: &str = "unified_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Helios Futures Engine — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = UnifiedConfig::load(UNIFIED_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load unified config, using defaults");
        UnifiedConfig::default()
    });

    // SAFETY: force Demo + Paused on startup regardless of what was persisted.
    config.trading_mode = TradingMode::Paused;
    config.account_mode = AccountMode::Demo;

    if config.engines.is_empty() {
        config.engines.push(crate::config::EngineConfig::new("primary"));
    }

    let total_capital_pct = config.enabled_capital_pct_total();
    if total_capital_pct > 100.0 {
        anyhow::bail!(
            "enabled engines request {total_capital_pct}% of capital, which exceeds 100%"
        );
    }

    info!(
        engines = config.engines.len(),
        total_capital_pct, "unified config loaded"
    );
    info!(
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        "engine starting in SAFE mode (Demo + Paused)"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));

    // ── 3. Build the exchange adapter ────────────────────────────────────
    let api_key = std::env::var("BINANCE_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BINANCE_API_SECRET").unwrap_or_default();
    let testnet = std::env::var("BINANCE_TESTNET")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(true);
    let exchange: Arc<dyn ExchangeAdapter> =
        Arc::new(BinanceFuturesClient::new(api_key, api_secret, testnet));

    // ── 4. Spawn market data streams ─────────────────────────────────────
    // Every engine's watchlist, de-duplicated — streams are shared market
    // infrastructure, not per-engine.
    let mut symbols: Vec<String> = state
        .config
        .read()
        .engines
        .iter()
        .flat_map(|e| e.watchlist.clone())
        .collect();
    symbols.sort();
    symbols.dedup();

    const KLINE_INTERVALS: [&str; 5] = ["1m", "5m", "15m", "1h", "4h"];

    for symbol in &symbols {
        for interval in KLINE_INTERVALS {
            let cb = state.candle_buffer.clone();
            let sym = symbol.clone();
            tokio::spawn(async move {
                loop {
                    if let Err(e) =
                        market_data::candle_buffer::run_kline_stream(&sym, interval, &cb).await
                    {
                        error!(symbol = %sym, interval, error = %e, "kline stream error — reconnecting in 5s");
                    }
                    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                }
            });
        }

        {
            let procs = state.trade_processors.read();
            if let Some(tp) = procs.get(symbol) {
                let processor = tp.clone();
                let sym = symbol.clone();
                tokio::spawn(async move {
                    loop {
                        if let Err(e) =
                            market_data::trade_stream::run_trade_stream(&sym, &processor).await
                        {
                            error!(symbol = %sym, error = %e, "trade stream error — reconnecting in 5s");
                        }
                        tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
                    }
                });
            }
        }

        let ob = state.orderbook_manager.clone();
        let sym = symbol.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = market_data::orderbook::run_depth_stream(&sym, &ob).await {
                    error!(symbol = %sym, error = %e, "depth stream error — reconnecting in 5s");
                }
                tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
            }
        });
    }

    info!(count = symbols.len(), "market data streams launched");

    // ── 5. Regime detection loop ─────────────────────────────────────────
    // One shared regime detector, keyed off the reference symbol's 5m
    // candles, consulted by every engine's scan loop.
    let regime_state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            let key = market_data::CandleKey {
                symbol: "BTCUSDT".to_string(),
                interval: "5m".to_string(),
            };
            let candles = regime_state.candle_buffer.get_closed_candles(&key, 100);
            if candles.len() >= 50 {
                regime_state.regime_detector.write().update(&candles);
                regime_state.increment_version();
            }
        }
    });

    // ── 6. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("HELIOS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 7. Reconciliation loop ───────────────────────────────────────────
    let recon_state = state.clone();
    let recon_exchange = exchange.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;

            if recon_state.config.read().account_mode == AccountMode::Demo {
                continue;
            }

            match recon_exchange.get_balance_usd().await {
                Ok(balance) => {
                    *recon_state.balances.write() = vec![crate::types::BalanceInfo {
                        asset: "USDT".to_string(),
                        free: balance,
                        locked: 0.0,
                    }];
                    for runtime in &recon_state.engines {
                        runtime.risk_monitor.mark(balance);
                    }
                    *recon_state.last_reconcile_ok.write() = Some(std::time::Instant::now());
                    *recon_state.last_reconcile_error.write() = None;
                    recon_state.increment_version();
                }
                Err(e) => {
                    *recon_state.last_reconcile_error.write() = Some(format!("{e}"));
                    warn!(error = %e, "reconciliation failed");
                }
            }

            // Position reconciliation: any position we think is open but the
            // exchange no longer reports (liquidation, manual close) is
            // closed locally as EXTERNAL_CLOSE so the journal stays truthful.
            match recon_exchange.fetch_positions().await {
                Ok(exchange_positions) => {
                    let open_symbols: std::collections::HashSet<&str> =
                        exchange_positions.iter().map(|p| p.symbol.as_str()).collect();

                    for runtime in &recon_state.engines {
                        for pos in runtime.position_manager.get_open_positions() {
                            if open_symbols.contains(pos.symbol.as_str()) {
                                continue;
                            }
                            warn!(
                                engine_id = %runtime.engine_id,
                                symbol = %pos.symbol,
                                id = %pos.id,
                                "position missing from exchange truth — reconciling as external close"
                            );
                            if let Some(closed) = runtime
                                .position_manager
                                .close_position(&pos.id, "EXTERNAL_CLOSE", pos.current_price)
                            {
                                runtime.risk_monitor.record_trade_result(closed.realized_pnl, Utc::now());
                                runtime.journal.record_closed_position(&closed);
                            }
                        }
                    }
                    recon_state.increment_version();
                }
                Err(e) => {
                    warn!(error = %e, "position reconciliation failed");
                }
            }
        }
    });

    // ── 8. Position price feed ───────────────────────────────────────────
    // Keeps every open position's mark price current for every engine,
    // independent of any one engine's scan cadence.
    let price_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(5));
        loop {
            interval.tick().await;
            for runtime in &price_state.engines {
                for pos in runtime.position_manager.get_open_positions() {
                    let procs = price_state.trade_processors.read();
                    if let Some(tp) = procs.get(&pos.symbol) {
                        let price = tp.last_price();
                        if price > 0.0 {
                            runtime.position_manager.update_price(&pos.symbol, price);
                        }
                    }
                }
            }
        }
    });

    // ── 9. Unified Orchestrator ───────────────────────────────────────────
    // Spawns one scan loop + exit monitor per enabled engine and supervises
    // their heartbeats.
    let orchestrator = Arc::new(Orchestrator::new(state.clone(), exchange.clone()));
    let orchestrator_handle = orchestrator.clone();
    tokio::spawn(async move {
        orchestrator_handle.start().await;
    });

    info!("all subsystems running. Press Ctrl+C to stop.");

    // ── 10. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    orchestrator.stop();

    if let Err(e) = state.config.read().save(UNIFIED_CONFIG_PATH) {
        error!(error = %e, "failed to save unified config on shutdown");
    }

    info!("Helios Futures Engine shut down complete.");
    Ok(())
}
