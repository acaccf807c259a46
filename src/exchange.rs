// =============================================================================
// Exchange Adapter — external adapter contract (spec §6)
// =============================================================================
//
// Grounded in the teacher's `binance/client.rs` (HMAC-SHA256 signed REST
// client) and `binance/rate_limit.rs` (unchanged, kept verbatim). The
// teacher talks to Binance Spot directly from `execution.rs`; here that's
// behind an `ExchangeAdapter` trait so the orchestrator and execution engine
// depend on a capability contract rather than one exchange's REST shape,
// matching spec §6's external adapter boundary. `BinanceFuturesClient` is
// the concrete (and, for now, only) implementor, pointed at Binance's
// USDT-M futures API instead of spot.

pub mod client;
pub mod rate_limit;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::market_data::Candle;
use crate::scanner::TickerSnapshot;

pub use client::BinanceFuturesClient;
pub use rate_limit::{RateLimitSnapshot, RateLimitTracker};

/// A filled or rejected order as seen by the caller; adapter-agnostic.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub exchange_order_id: String,
    pub filled_qty: f64,
    pub avg_fill_price: f64,
}

/// The exchange's authoritative view of one open position, used to
/// reconcile against `PositionManager`'s local state (spec §4.9/§7).
#[derive(Debug, Clone)]
pub struct ExchangePosition {
    pub symbol: String,
    pub quantity: f64,
}

/// Capability contract every exchange integration must satisfy. The
/// orchestrator, execution engine, and scanner depend on this trait, not on
/// `BinanceFuturesClient` directly, so a second exchange can be added without
/// touching engine logic.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn get_balance_usd(&self) -> Result<f64, EngineError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), EngineError>;

    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResult, EngineError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), EngineError>;

    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, EngineError>;

    /// Full-market ticker snapshot, feeding the Market Scanner (§4.4).
    async fn get_ticker_snapshot(&self, now: DateTime<Utc>) -> Result<Vec<TickerSnapshot>, EngineError>;

    /// Exchange's authoritative open positions, used by the reconciliation
    /// loop to detect positions closed externally (liquidation, manual
    /// intervention) that `PositionManager` doesn't yet know about.
    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, EngineError>;
}
