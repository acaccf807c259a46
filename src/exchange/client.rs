// =============================================================================
// Binance USDT-M Futures REST Client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: The secret key is never logged or serialized. All signed requests
// include X-MBX-APIKEY as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the bot and Binance servers.
//
// Adapted from the teacher's `binance/client.rs`: same signing/`recvWindow`
// discipline, rebased from `/api/v3/*` (spot) onto `/fapi/v1/*` (USDT-M
// futures), plus `set_leverage` and a ticker-snapshot fetch the spot client
// had no need for.
// =============================================================================

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::error::EngineError;
use crate::exchange::{ExchangeAdapter, ExchangePosition, OrderResult};
use crate::market_data::Candle;
use crate::scanner::TickerSnapshot;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

/// Binance USDT-M futures REST client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl BinanceFuturesClient {
    /// Create a new client. `testnet` points at Binance's futures testnet
    /// base URL instead of the production one.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, testnet: bool) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let base_url = if testnet {
            "https://testnet.binancefuture.com".to_string()
        } else {
            "https://fapi.binance.com".to_string()
        };

        debug!(base_url = %base_url, "BinanceFuturesClient initialised");

        Self {
            api_key,
            secret,
            base_url,
            client,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    fn parse_str_f64(val: &serde_json::Value) -> anyhow::Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }

    /// GET /fapi/v2/balance (signed) — USDT-M futures wallet balance.
    #[instrument(skip(self), name = "exchange::get_account_balance")]
    async fn get_account_balance(&self) -> anyhow::Result<serde_json::Value> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/balance?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /fapi/v2/balance request failed")?;
        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse balance response")?;

        if !status.is_success() {
            anyhow::bail!("futures GET /fapi/v2/balance returned {}: {}", status, body);
        }
        Ok(body)
    }
}

#[async_trait]
impl ExchangeAdapter for BinanceFuturesClient {
    #[instrument(skip(self), name = "exchange::get_balance_usd")]
    async fn get_balance_usd(&self) -> Result<f64, EngineError> {
        let body = self.get_account_balance().await.map_err(|e| {
            warn!(error = %e, "futures balance request failed");
            EngineError::Transient(e.to_string())
        })?;

        let balances = body.as_array().ok_or_else(|| EngineError::Transient("malformed response body".into()))?;

        for b in balances {
            if b["asset"].as_str() == Some("USDT") {
                let balance = Self::parse_str_f64(&b["balance"]).unwrap_or(0.0);
                return Ok(balance);
            }
        }
        Ok(0.0)
    }

    #[instrument(skip(self), name = "exchange::set_leverage")]
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), EngineError> {
        let params = format!("symbol={symbol}&leverage={leverage}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/leverage?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            warn!(symbol, leverage, %body, "set_leverage rejected by exchange");
            return Err(EngineError::OrderRejected {
                code: body["code"].as_i64().unwrap_or(0).to_string(),
                message: body["msg"].as_str().unwrap_or("leverage rejected").to_string(),
            });
        }
        debug!(symbol, leverage, "leverage set");
        Ok(())
    }

    #[instrument(skip(self, price), name = "exchange::place_order")]
    async fn place_order(
        &self,
        symbol: &str,
        side: &str,
        order_type: &str,
        quantity: f64,
        price: Option<f64>,
    ) -> Result<OrderResult, EngineError> {
        let mut params = format!("symbol={symbol}&side={side}&type={order_type}&quantity={quantity}");
        if let Some(p) = price {
            params.push_str(&format!("&price={p}&timeInForce=GTC"));
        }

        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| EngineError::Transient(e.to_string()))?;

        if !status.is_success() {
            return Err(EngineError::OrderRejected {
                code: body["code"].as_i64().unwrap_or(0).to_string(),
                message: body["msg"].as_str().unwrap_or("order rejected").to_string(),
            });
        }

        Ok(OrderResult {
            exchange_order_id: body["orderId"].as_u64().unwrap_or(0).to_string(),
            filled_qty: Self::parse_str_f64(&body["executedQty"]).unwrap_or(quantity),
            avg_fill_price: Self::parse_str_f64(&body["avgPrice"]).unwrap_or(price.unwrap_or(0.0)),
        })
    }

    #[instrument(skip(self), name = "exchange::cancel_order")]
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), EngineError> {
        let params = format!("symbol={symbol}&orderId={order_id}");
        let qs = self.signed_query(&params);
        let url = format!("{}/fapi/v1/order?{}", self.base_url, qs);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(EngineError::Transient("non-success status from exchange".into()));
        }
        Ok(())
    }

    #[instrument(skip(self), name = "exchange::get_klines")]
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>, EngineError> {
        let url = format!(
            "{}/fapi/v1/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self.client.get(&url).send().await.map_err(|e| EngineError::Transient(e.to_string()))?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| EngineError::Transient(e.to_string()))?;
        if !status.is_success() {
            return Err(EngineError::Transient("non-success status from exchange".into()));
        }

        let raw = body.as_array().ok_or_else(|| EngineError::Transient("malformed response body".into()))?;
        let mut candles = Vec::with_capacity(raw.len());
        for entry in raw {
            let arr = match entry.as_array() {
                Some(a) if a.len() >= 11 => a,
                _ => continue,
            };
            let open_time = arr[0].as_i64().unwrap_or(0);
            let open = Self::parse_str_f64(&arr[1]).unwrap_or(0.0);
            let high = Self::parse_str_f64(&arr[2]).unwrap_or(0.0);
            let low = Self::parse_str_f64(&arr[3]).unwrap_or(0.0);
            let close = Self::parse_str_f64(&arr[4]).unwrap_or(0.0);
            let volume = Self::parse_str_f64(&arr[5]).unwrap_or(0.0);
            let close_time = arr[6].as_i64().unwrap_or(0);
            candles.push(Candle::new(open_time, open, high, low, close, volume, close_time));
        }
        Ok(candles)
    }

    #[instrument(skip(self), name = "exchange::get_ticker_snapshot")]
    async fn get_ticker_snapshot(&self, now: DateTime<Utc>) -> Result<Vec<TickerSnapshot>, EngineError> {
        let url = format!("{}/fapi/v1/ticker/24hr", self.base_url);
        let resp = self.client.get(&url).send().await.map_err(|e| EngineError::Transient(e.to_string()))?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| EngineError::Transient(e.to_string()))?;
        if !status.is_success() {
            return Err(EngineError::Transient("non-success status from exchange".into()));
        }

        let raw = body.as_array().ok_or_else(|| EngineError::Transient("malformed response body".into()))?;
        let _ = now;
        let snapshots = raw
            .iter()
            .filter_map(|entry| {
                let symbol = entry["symbol"].as_str()?.to_string();
                if !symbol.ends_with("USDT") {
                    return None;
                }
                Some(TickerSnapshot {
                    symbol,
                    quote_volume_24h: Self::parse_str_f64(&entry["quoteVolume"]).unwrap_or(0.0),
                    price_change_5m_pct: 0.0,
                    recent_volume: Self::parse_str_f64(&entry["volume"]).unwrap_or(0.0),
                    avg_volume_20: None,
                })
            })
            .collect();
        Ok(snapshots)
    }

    /// GET /fapi/v2/positionRisk (signed) — authoritative open positions,
    /// used to reconcile against `PositionManager`'s local state.
    #[instrument(skip(self), name = "exchange::fetch_positions")]
    async fn fetch_positions(&self) -> Result<Vec<ExchangePosition>, EngineError> {
        let qs = self.signed_query("");
        let url = format!("{}/fapi/v2/positionRisk?{}", self.base_url, qs);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::Transient(e.to_string()))?;
        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| EngineError::Transient(e.to_string()))?;
        if !status.is_success() {
            return Err(EngineError::Transient("non-success status from exchange".into()));
        }

        let raw = body.as_array().ok_or_else(|| EngineError::Transient("malformed response body".into()))?;
        let positions = raw
            .iter()
            .filter_map(|entry| {
                let symbol = entry["symbol"].as_str()?.to_string();
                let quantity = Self::parse_str_f64(&entry["positionAmt"]).unwrap_or(0.0);
                if quantity == 0.0 {
                    return None;
                }
                Some(ExchangePosition { symbol, quantity })
            })
            .collect();
        Ok(positions)
    }
}

impl std::fmt::Debug for BinanceFuturesClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceFuturesClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}
