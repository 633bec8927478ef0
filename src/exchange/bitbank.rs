// =============================================================================
// Bitbank REST API client — HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. Signed requests
// carry ACCESS-KEY / ACCESS-NONCE / ACCESS-SIGNATURE headers where the
// signature is HMAC-SHA256 over `nonce + path` for GETs and `nonce + body`
// for POSTs. The nonce is a strictly increasing millisecond counter.
//
// Every response uses the Bitbank envelope {"success": 0|1, "data": ...};
// failures carry a numeric code in data.code which is mapped onto the error
// taxonomy (20001-class = auth, 70009 = busy/transient, anything else
// permanent).
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::{Datelike, Duration as ChronoDuration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument, warn};

use crate::errors::ExchangeError;
use crate::exchange::rate_limit::TokenBucket;
use crate::exchange::{
    Balance, CancelOutcome, ExchangeApi, NewOrder, Order, OrderAck, OrderStatus, OrderType,
    RawPosition, Ticker,
};
use crate::market_data::{Bar, Timeframe};
use crate::types::Side;

type HmacSha256 = Hmac<Sha256>;

const PUBLIC_BASE: &str = "https://public.bitbank.cc";
const PRIVATE_BASE: &str = "https://api.bitbank.cc";
const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Conservative self-imposed pacing (Bitbank allows more).
const BUCKET_CAPACITY: u32 = 10;
const BUCKET_REFILL_PER_SEC: f64 = 5.0;

pub struct BitbankClient {
    api_key: String,
    secret: String,
    client: reqwest::Client,
    public_base: String,
    private_base: String,
    nonce: AtomicU64,
    limiter: TokenBucket,
}

impl BitbankClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        debug!("BitbankClient initialised");

        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            client,
            public_base: PUBLIC_BASE.to_string(),
            private_base: PRIVATE_BASE.to_string(),
            nonce: AtomicU64::new(Self::timestamp_ms()),
            limiter: TokenBucket::new(BUCKET_CAPACITY, BUCKET_REFILL_PER_SEC),
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// HMAC-SHA256 hex signature of `message`.
    pub fn sign(&self, message: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Strictly increasing nonce, resilient to same-millisecond calls.
    fn next_nonce(&self) -> u64 {
        let now = Self::timestamp_ms();
        self.nonce
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
                Some(prev.max(now - 1) + 1)
            })
            .map(|prev| prev.max(now - 1) + 1)
            .unwrap_or(now)
    }

    // -------------------------------------------------------------------------
    // Transport
    // -------------------------------------------------------------------------

    async fn public_get(&self, path: &str) -> Result<serde_json::Value, ExchangeError> {
        self.limiter.acquire().await;
        let url = format!("{}{}", self.public_base, path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transport(format!("invalid JSON: {e}")))?;
        unwrap_envelope(body)
    }

    async fn private_get(&self, path_with_query: &str) -> Result<serde_json::Value, ExchangeError> {
        self.limiter.acquire().await;
        let nonce = self.next_nonce();
        let signature = self.sign(&format!("{nonce}{path_with_query}"));

        let url = format!("{}{}", self.private_base, path_with_query);
        let resp = self
            .client
            .get(&url)
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-NONCE", nonce.to_string())
            .header("ACCESS-SIGNATURE", signature)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transport(format!("invalid JSON: {e}")))?;
        unwrap_envelope(body)
    }

    async fn private_post(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, ExchangeError> {
        self.limiter.acquire().await;
        let nonce = self.next_nonce();
        let payload = body.to_string();
        let signature = self.sign(&format!("{nonce}{payload}"));

        let url = format!("{}{}", self.private_base, path);
        let resp = self
            .client
            .post(&url)
            .header("ACCESS-KEY", &self.api_key)
            .header("ACCESS-NONCE", nonce.to_string())
            .header("ACCESS-SIGNATURE", signature)
            .header("Content-Type", "application/json")
            .body(payload)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExchangeError::Transport(format!("invalid JSON: {e}")))?;
        unwrap_envelope(body)
    }

    // -------------------------------------------------------------------------
    // Candlestick pagination
    // -------------------------------------------------------------------------

    /// Bitbank serves candles bucketed by UTC date (intraday timeframes) or
    /// by year (4h and up). Walk buckets newest-first until `limit` bars are
    /// collected.
    async fn fetch_candles(
        &self,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let code = timeframe.exchange_code();
        let mut bars: Vec<Bar> = Vec::new();
        let now = Utc::now();

        // More buckets than ever needed; the loop stops once enough bars.
        for back in 0..8 {
            let key = match timeframe {
                Timeframe::M15 => {
                    let day = now - ChronoDuration::days(back);
                    day.format("%Y%m%d").to_string()
                }
                Timeframe::H4 => {
                    let year = now.year() - back as i32;
                    format!("{year}")
                }
            };

            let path = format!("/{pair}/candlestick/{code}/{key}");
            let data = match self.public_get(&path).await {
                Ok(data) => data,
                // A bucket with no data yet (e.g. midnight UTC) is not fatal.
                Err(ExchangeError::Api { .. }) if back > 0 => break,
                Err(e) => return Err(e),
            };

            let mut bucket = parse_candlestick(&data, code)?;
            bucket.extend(bars);
            bars = bucket;

            if bars.len() >= limit {
                break;
            }
        }

        bars.sort_by_key(|b| b.ts);
        bars.dedup_by_key(|b| b.ts);
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        Ok(bars)
    }
}

#[async_trait]
impl ExchangeApi for BitbankClient {
    #[instrument(skip(self), name = "bitbank::get_ticker")]
    async fn get_ticker(&self, pair: &str) -> Result<Ticker, ExchangeError> {
        let data = self.public_get(&format!("/{pair}/ticker")).await?;
        let ts_ms = data["timestamp"].as_i64().unwrap_or(0);
        Ok(Ticker {
            bid: parse_f64(&data["buy"])?,
            ask: parse_f64(&data["sell"])?,
            last: parse_f64(&data["last"])?,
            ts: Utc
                .timestamp_millis_opt(ts_ms)
                .single()
                .unwrap_or_else(Utc::now),
        })
    }

    #[instrument(skip(self), name = "bitbank::get_ohlcv")]
    async fn get_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let bars = self.fetch_candles(pair, timeframe, limit).await?;
        debug!(pair, timeframe = %timeframe, count = bars.len(), "ohlcv fetched");
        Ok(bars)
    }

    #[instrument(skip(self), name = "bitbank::get_balance")]
    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        let data = self.private_get("/v1/user/margin/status").await?;
        Ok(Balance {
            available: parse_f64(&data["available_margin"])?,
            used: parse_f64(&data["used_margin"]).unwrap_or(0.0),
            total: parse_f64(&data["total_margin"]).unwrap_or(0.0),
            // Null is a legitimate value here (no open positions).
            maintenance_margin_ratio: parse_f64(&data["maintenance_margin_ratio"]).ok(),
        })
    }

    #[instrument(skip(self), name = "bitbank::get_open_orders")]
    async fn get_open_orders(&self, pair: &str) -> Result<Vec<Order>, ExchangeError> {
        let data = self
            .private_get(&format!("/v1/user/spot/active_orders?pair={pair}"))
            .await?;
        let raw = data["orders"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        let mut orders = Vec::with_capacity(raw.len());
        for entry in &raw {
            match parse_order(entry) {
                Ok(order) => orders.push(order),
                Err(e) => warn!(error = %e, "skipping unparseable order entry"),
            }
        }
        debug!(pair, count = orders.len(), "open orders retrieved");
        Ok(orders)
    }

    #[instrument(skip(self), name = "bitbank::get_order")]
    async fn get_order(&self, pair: &str, id: &str) -> Result<Order, ExchangeError> {
        let data = self
            .private_get(&format!("/v1/user/spot/order?pair={pair}&order_id={id}"))
            .await?;
        parse_order(&data)
    }

    #[instrument(skip(self), name = "bitbank::get_positions")]
    async fn get_positions(&self, pair: &str) -> Result<Vec<RawPosition>, ExchangeError> {
        let data = self
            .private_get(&format!("/v1/user/margin/positions?pair={pair}"))
            .await?;
        let raw = data["positions"].as_array().cloned().unwrap_or_default();

        let mut positions = Vec::with_capacity(raw.len());
        for entry in &raw {
            let side = match entry["position_side"].as_str() {
                Some("long") => Side::Buy,
                Some("short") => Side::Sell,
                other => {
                    warn!(?other, "unknown position side — skipping");
                    continue;
                }
            };
            let amount = parse_f64(&entry["open_amount"]).unwrap_or(0.0);
            if amount <= 0.0 {
                continue;
            }
            positions.push(RawPosition {
                side,
                amount,
                avg_price: parse_f64(&entry["average_price"]).unwrap_or(0.0),
            });
        }
        Ok(positions)
    }

    #[instrument(skip(self, order), name = "bitbank::create_order")]
    async fn create_order(&self, order: &NewOrder) -> Result<OrderAck, ExchangeError> {
        let mut body = serde_json::json!({
            "pair": order.pair,
            "amount": format!("{}", order.amount),
            "side": match order.side {
                Side::Buy => "buy",
                Side::Sell => "sell",
                Side::Hold => {
                    return Err(ExchangeError::Validation(
                        "HOLD is not a valid order side".to_string(),
                    ))
                }
            },
            "type": order.order_type.to_string(),
        });

        if let Some(price) = order.price {
            body["price"] = serde_json::json!(format!("{price}"));
        }
        if let Some(trigger) = order.trigger_price {
            body["trigger_price"] = serde_json::json!(format!("{trigger}"));
        }
        if order.post_only {
            body["post_only"] = serde_json::json!(true);
        }

        debug!(
            pair = %order.pair,
            side = %order.side,
            order_type = %order.order_type,
            amount = order.amount,
            "placing order"
        );

        let data = self.private_post("/v1/user/spot/order", &body).await?;
        let ack = parse_order(&data)?;
        Ok(OrderAck {
            id: ack.id,
            status: ack.status,
        })
    }

    #[instrument(skip(self), name = "bitbank::cancel_order")]
    async fn cancel_order(&self, pair: &str, id: &str) -> Result<CancelOutcome, ExchangeError> {
        let body = serde_json::json!({ "pair": pair, "order_id": id });
        match self.private_post("/v1/user/spot/cancel_order", &body).await {
            Ok(_) => {
                debug!(pair, id, "order cancelled");
                Ok(CancelOutcome::Cancelled)
            }
            // 50010: order not found / already done — an idempotent outcome
            // for the cleanup paths, not an error.
            Err(ExchangeError::Api { code: 50010, .. }) | Err(ExchangeError::OrderNotFound) => {
                Ok(CancelOutcome::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for BitbankClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitbankClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("public_base", &self.public_base)
            .field("private_base", &self.private_base)
            .finish()
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

/// Unwrap the Bitbank {"success": 0|1, "data": ...} envelope.
fn unwrap_envelope(body: serde_json::Value) -> Result<serde_json::Value, ExchangeError> {
    match body["success"].as_i64() {
        Some(1) => Ok(body["data"].clone()),
        _ => {
            let code = body["data"]["code"].as_i64().unwrap_or(0);
            Err(ExchangeError::from_api_code(
                code,
                format!("exchange error code {code}"),
            ))
        }
    }
}

fn classify_reqwest(e: reqwest::Error) -> ExchangeError {
    if e.is_timeout() {
        ExchangeError::Timeout(e.to_string())
    } else if e.status() == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
        ExchangeError::RateLimited
    } else {
        ExchangeError::Transport(e.to_string())
    }
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_f64(value: &serde_json::Value) -> Result<f64, ExchangeError> {
    if let Some(s) = value.as_str() {
        s.parse::<f64>()
            .map_err(|_| ExchangeError::Transport(format!("failed to parse '{s}' as f64")))
    } else if let Some(n) = value.as_f64() {
        Ok(n)
    } else {
        Err(ExchangeError::Transport(format!(
            "expected string or number, got {value}"
        )))
    }
}

/// Parse one candlestick bucket: data.candlestick[].ohlcv is an array of
/// [open, high, low, close, volume, unixtime_ms] rows with string prices.
fn parse_candlestick(data: &serde_json::Value, code: &str) -> Result<Vec<Bar>, ExchangeError> {
    let sticks = data["candlestick"]
        .as_array()
        .ok_or_else(|| ExchangeError::Transport("candlestick response not an array".to_string()))?;

    let entry = sticks
        .iter()
        .find(|s| s["type"].as_str() == Some(code))
        .or_else(|| sticks.first())
        .ok_or_else(|| ExchangeError::Transport("empty candlestick response".to_string()))?;

    let rows = entry["ohlcv"]
        .as_array()
        .ok_or_else(|| ExchangeError::Transport("candlestick missing ohlcv".to_string()))?;

    let mut bars = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(fields) = row.as_array() else { continue };
        if fields.len() < 6 {
            warn!(len = fields.len(), "skipping malformed ohlcv row");
            continue;
        }
        let ts_ms = fields[5].as_i64().unwrap_or(0);
        let Some(ts) = Utc.timestamp_millis_opt(ts_ms).single() else {
            continue;
        };
        bars.push(Bar::new(
            ts,
            parse_f64(&fields[0])?,
            parse_f64(&fields[1])?,
            parse_f64(&fields[2])?,
            parse_f64(&fields[3])?,
            parse_f64(&fields[4])?,
        ));
    }
    Ok(bars)
}

fn parse_order(data: &serde_json::Value) -> Result<Order, ExchangeError> {
    let id = match data["order_id"].as_u64() {
        Some(n) => n.to_string(),
        None => data["order_id"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| ExchangeError::Transport("order missing order_id".to_string()))?,
    };

    let side = match data["side"].as_str() {
        Some("buy") => Side::Buy,
        Some("sell") => Side::Sell,
        other => {
            return Err(ExchangeError::Transport(format!(
                "unknown order side {other:?}"
            )))
        }
    };

    let order_type = match data["type"].as_str() {
        Some("limit") => OrderType::Limit,
        Some("market") => OrderType::Market,
        Some("stop") => OrderType::Stop,
        Some("stop_limit") => OrderType::StopLimit,
        other => {
            return Err(ExchangeError::Transport(format!(
                "unknown order type {other:?}"
            )))
        }
    };

    let status = match data["status"].as_str() {
        Some("UNFILLED") => OrderStatus::Active,
        Some("PARTIALLY_FILLED") => OrderStatus::PartiallyFilled,
        Some("FULLY_FILLED") => OrderStatus::Filled,
        Some("CANCELED_UNFILLED") | Some("CANCELED_PARTIALLY_FILLED") => OrderStatus::Cancelled,
        _ => OrderStatus::Rejected,
    };

    Ok(Order {
        id,
        order_type,
        side,
        price: parse_f64(&data["price"]).ok(),
        trigger_price: parse_f64(&data["trigger_price"]).ok(),
        amount: parse_f64(&data["start_amount"])
            .or_else(|_| parse_f64(&data["amount"]))
            .unwrap_or(0.0),
        filled_amount: parse_f64(&data["executed_amount"]).unwrap_or(0.0),
        avg_fill_price: parse_f64(&data["average_price"]).ok().filter(|p| *p > 0.0),
        status,
        linked_position_id: None,
    })
}
