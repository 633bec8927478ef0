// =============================================================================
// Exchange façade — the only surface the core talks to
// =============================================================================
//
// Transport detail lives behind this trait: `BitbankClient` for live/paper
// market data and live orders, `PaperExchange` for simulated fills. The
// exchange is authoritative for orders and positions; local state mirrors it
// and is reconciled at every cycle start.
//
// Order types used by the core: `limit` (entry, TP), `market` (forced close
// on rollback), `stop` (SL — always with a trigger price, never a plain
// limit, which the exchange could misread as a fresh entry).
// =============================================================================

pub mod bitbank;
pub mod paper;
pub mod rate_limit;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ExchangeError;
use crate::market_data::{Bar, Timeframe};
use crate::types::Side;

pub use bitbank::BitbankClient;
pub use paper::{PaperBridge, PaperExchange};
pub use rate_limit::TokenBucket;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub ts: DateTime<Utc>,
}

impl Ticker {
    /// Bid/ask spread in basis points of the mid price.
    pub fn spread_bps(&self) -> f64 {
        let mid = (self.bid + self.ask) / 2.0;
        if mid > 0.0 {
            (self.ask - self.bid) / mid * 10_000.0
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Balance {
    /// Margin available for new entries (JPY).
    pub available: f64,
    pub used: f64,
    pub total: f64,
    /// May be null on the wire; the risk layer substitutes its configured
    /// default.
    pub maintenance_margin_ratio: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    Stop,
    StopLimit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
            Self::Stop => write!(f, "stop"),
            Self::StopLimit => write!(f, "stop_limit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::PartiallyFilled)
    }
}

/// An order as mirrored from the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_type: OrderType,
    pub side: Side,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub amount: f64,
    #[serde(default)]
    pub filled_amount: f64,
    #[serde(default)]
    pub avg_fill_price: Option<f64>,
    pub status: OrderStatus,
    /// Local linkage only — the exchange knows nothing about positions.
    #[serde(default)]
    pub linked_position_id: Option<String>,
}

/// A raw margin position as reported by the exchange.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawPosition {
    pub side: Side,
    pub amount: f64,
    pub avg_price: f64,
}

/// Order submission request.
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    pub pair: String,
    pub order_type: OrderType,
    pub side: Side,
    pub amount: f64,
    pub price: Option<f64>,
    pub trigger_price: Option<f64>,
    pub post_only: bool,
}

impl NewOrder {
    pub fn limit(pair: &str, side: Side, amount: f64, price: f64, post_only: bool) -> Self {
        Self {
            pair: pair.to_string(),
            order_type: OrderType::Limit,
            side,
            amount,
            price: Some(price),
            trigger_price: None,
            post_only,
        }
    }

    pub fn market(pair: &str, side: Side, amount: f64) -> Self {
        Self {
            pair: pair.to_string(),
            order_type: OrderType::Market,
            side,
            amount,
            price: None,
            trigger_price: None,
            post_only: false,
        }
    }

    /// Stop order for SL protection — trigger price only.
    pub fn stop(pair: &str, side: Side, amount: f64, trigger_price: f64) -> Self {
        Self {
            pair: pair.to_string(),
            order_type: OrderType::Stop,
            side,
            amount,
            price: None,
            trigger_price: Some(trigger_price),
            post_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    NotFound,
}

#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_ticker(&self, pair: &str) -> Result<Ticker, ExchangeError>;

    async fn get_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError>;

    async fn get_balance(&self) -> Result<Balance, ExchangeError>;

    /// Flat list of live orders for the pair.
    async fn get_open_orders(&self, pair: &str) -> Result<Vec<Order>, ExchangeError>;

    async fn get_order(&self, pair: &str, id: &str) -> Result<Order, ExchangeError>;

    async fn get_positions(&self, pair: &str) -> Result<Vec<RawPosition>, ExchangeError>;

    async fn create_order(&self, order: &NewOrder) -> Result<OrderAck, ExchangeError>;

    async fn cancel_order(&self, pair: &str, id: &str) -> Result<CancelOutcome, ExchangeError>;
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_bps_computation() {
        let ticker = Ticker {
            bid: 9_995_000.0,
            ask: 10_005_000.0,
            last: 10_000_000.0,
            ts: Utc::now(),
        };
        assert!((ticker.spread_bps() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn stop_order_has_trigger_only() {
        let order = NewOrder::stop("btc_jpy", Side::Sell, 0.01, 9_900_000.0);
        assert_eq!(order.order_type, OrderType::Stop);
        assert!(order.price.is_none());
        assert_eq!(order.trigger_price, Some(9_900_000.0));
    }

    #[test]
    fn live_statuses() {
        assert!(OrderStatus::Active.is_live());
        assert!(OrderStatus::PartiallyFilled.is_live());
        assert!(!OrderStatus::Filled.is_live());
        assert!(!OrderStatus::Cancelled.is_live());
    }
}
