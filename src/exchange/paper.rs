// =============================================================================
// PaperExchange — in-memory exchange simulation
// =============================================================================
//
// Runs the full decision pipeline without touching the real exchange: orders
// fill against a movable mark price, margin positions are netted from fills,
// and resting TP/SL orders trigger when the price is pushed through them via
// `set_last_price`.
//
// Fill model:
//   - market: fills immediately at the last price;
//   - limit buy: fills when the limit is at or above the bid (a maker entry
//     pegged to the bid fills right away; a TP far above rests);
//   - limit sell: mirror rule against the ask;
//   - stop: rests until the mark crosses its trigger, then fills at trigger.
//
// Failure injection drives the error-path tests (permanent rejection per
// order type, transient failures for the retry path, auth failures).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::errors::ExchangeError;
use crate::exchange::{
    Balance, CancelOutcome, ExchangeApi, NewOrder, Order, OrderAck, OrderStatus, OrderType,
    RawPosition, Ticker,
};
use crate::market_data::{Bar, Timeframe};
use crate::types::Side;

#[derive(Default)]
struct FailureInjection {
    /// Order types that are permanently rejected (validation class).
    reject_types: Vec<OrderType>,
    /// Fail this many upcoming create_order calls with a transient error.
    transient_failures: u32,
    /// Fail this many upcoming create_order calls with an auth error.
    auth_failures: u32,
}

pub struct PaperExchange {
    ticker: RwLock<Ticker>,
    bars: RwLock<HashMap<Timeframe, Vec<Bar>>>,
    orders: RwLock<HashMap<String, Order>>,
    /// Net long/short exposure from fills.
    net_position: RwLock<f64>,
    avg_entry: RwLock<f64>,
    balance: RwLock<Balance>,
    failures: RwLock<FailureInjection>,
    next_id: AtomicU64,
}

impl PaperExchange {
    pub fn new(initial_margin: f64) -> Self {
        Self {
            ticker: RwLock::new(Ticker {
                bid: 0.0,
                ask: 0.0,
                last: 0.0,
                ts: Utc::now(),
            }),
            bars: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            net_position: RwLock::new(0.0),
            avg_entry: RwLock::new(0.0),
            balance: RwLock::new(Balance {
                available: initial_margin,
                used: 0.0,
                total: initial_margin,
                maintenance_margin_ratio: None,
            }),
            failures: RwLock::new(FailureInjection::default()),
            next_id: AtomicU64::new(1),
        }
    }

    // -------------------------------------------------------------------------
    // Simulation controls
    // -------------------------------------------------------------------------

    pub fn set_bars(&self, timeframe: Timeframe, bars: Vec<Bar>) {
        if let Some(last) = bars.last() {
            let close = last.close;
            self.set_ticker(close * 0.9999, close * 1.0001, close);
        }
        self.bars.write().insert(timeframe, bars);
    }

    pub fn set_ticker(&self, bid: f64, ask: f64, last: f64) {
        *self.ticker.write() = Ticker {
            bid,
            ask,
            last,
            ts: Utc::now(),
        };
    }

    /// Move the mark price and run resting orders through the fill rules.
    pub fn set_last_price(&self, price: f64) {
        self.set_ticker(price * 0.9999, price * 1.0001, price);

        let ids: Vec<String> = self.orders.read().keys().cloned().collect();
        for id in ids {
            let Some(order) = self.orders.read().get(&id).cloned() else {
                continue;
            };
            if !order.status.is_live() {
                continue;
            }
            if let Some(fill_price) = self.fill_price_for(&order) {
                self.apply_fill(&id, fill_price);
            }
        }
    }

    /// Permanently reject orders of `order_type` (validation-class error).
    pub fn reject_order_type(&self, order_type: OrderType) {
        self.failures.write().reject_types.push(order_type);
    }

    pub fn clear_rejections(&self) {
        self.failures.write().reject_types.clear();
    }

    /// Fail the next `n` order submissions with a transient error.
    pub fn inject_transient_failures(&self, n: u32) {
        self.failures.write().transient_failures = n;
    }

    /// Fail the next `n` order submissions with an auth (20001) error.
    pub fn inject_auth_failures(&self, n: u32) {
        self.failures.write().auth_failures = n;
    }

    pub fn live_order_count(&self) -> usize {
        self.orders
            .read()
            .values()
            .filter(|o| o.status.is_live())
            .count()
    }

    pub fn net_position(&self) -> f64 {
        *self.net_position.read()
    }

    // -------------------------------------------------------------------------
    // Fill engine
    // -------------------------------------------------------------------------

    fn fill_price_for(&self, order: &Order) -> Option<f64> {
        let ticker = *self.ticker.read();
        match order.order_type {
            OrderType::Market => Some(ticker.last),
            OrderType::Limit => {
                let price = order.price?;
                match order.side {
                    Side::Buy if price >= ticker.bid => Some(price.min(ticker.ask)),
                    Side::Sell if price <= ticker.ask => Some(price.max(ticker.bid)),
                    _ => None,
                }
            }
            OrderType::Stop | OrderType::StopLimit => {
                let trigger = order.trigger_price?;
                match order.side {
                    // Protective sell stop fires when the mark drops through it.
                    Side::Sell if ticker.last <= trigger => Some(trigger),
                    // Protective buy stop fires when the mark rises through it.
                    Side::Buy if ticker.last >= trigger => Some(trigger),
                    _ => None,
                }
            }
        }
    }

    fn apply_fill(&self, id: &str, fill_price: f64) {
        let mut orders = self.orders.write();
        let Some(order) = orders.get_mut(id) else {
            return;
        };

        order.status = OrderStatus::Filled;
        order.filled_amount = order.amount;
        order.avg_fill_price = Some(fill_price);

        let signed = order.side.direction() * order.amount;
        let mut net = self.net_position.write();
        let prev = *net;
        *net += signed;
        // Track a naive average entry for the growing side.
        if prev == 0.0 || prev.signum() == signed.signum() {
            let mut avg = self.avg_entry.write();
            let total = prev.abs() + order.amount;
            *avg = if total > 0.0 {
                (*avg * prev.abs() + fill_price * order.amount) / total
            } else {
                fill_price
            };
        }

        debug!(id, fill_price, net = *net, "paper fill applied");
    }
}

#[async_trait]
impl ExchangeApi for PaperExchange {
    async fn get_ticker(&self, _pair: &str) -> Result<Ticker, ExchangeError> {
        Ok(*self.ticker.read())
    }

    async fn get_ohlcv(
        &self,
        _pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        let bars = self.bars.read();
        let series = bars
            .get(&timeframe)
            .ok_or_else(|| ExchangeError::Transport(format!("no bars loaded for {timeframe}")))?;
        let start = series.len().saturating_sub(limit);
        Ok(series[start..].to_vec())
    }

    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        Ok(*self.balance.read())
    }

    async fn get_open_orders(&self, _pair: &str) -> Result<Vec<Order>, ExchangeError> {
        Ok(self
            .orders
            .read()
            .values()
            .filter(|o| o.status.is_live())
            .cloned()
            .collect())
    }

    async fn get_order(&self, _pair: &str, id: &str) -> Result<Order, ExchangeError> {
        self.orders
            .read()
            .get(id)
            .cloned()
            .ok_or(ExchangeError::OrderNotFound)
    }

    async fn get_positions(&self, _pair: &str) -> Result<Vec<RawPosition>, ExchangeError> {
        let net = *self.net_position.read();
        if net.abs() < 1e-12 {
            return Ok(Vec::new());
        }
        Ok(vec![RawPosition {
            side: if net > 0.0 { Side::Buy } else { Side::Sell },
            amount: net.abs(),
            avg_price: *self.avg_entry.read(),
        }])
    }

    async fn create_order(&self, new_order: &NewOrder) -> Result<OrderAck, ExchangeError> {
        {
            let mut failures = self.failures.write();
            if failures.auth_failures > 0 {
                failures.auth_failures -= 1;
                return Err(ExchangeError::Auth {
                    code: 20001,
                    message: "injected auth failure".to_string(),
                });
            }
            if failures.transient_failures > 0 {
                failures.transient_failures -= 1;
                return Err(ExchangeError::RateLimited);
            }
            if failures.reject_types.contains(&new_order.order_type) {
                return Err(ExchangeError::Validation(format!(
                    "injected rejection for {} orders",
                    new_order.order_type
                )));
            }
        }

        if new_order.amount <= 0.0 {
            return Err(ExchangeError::Validation("amount must be positive".to_string()));
        }
        if new_order.order_type == OrderType::Limit && new_order.price.is_none() {
            return Err(ExchangeError::Validation("limit order requires price".to_string()));
        }
        if matches!(new_order.order_type, OrderType::Stop | OrderType::StopLimit)
            && new_order.trigger_price.is_none()
        {
            return Err(ExchangeError::Validation(
                "stop order requires trigger_price".to_string(),
            ));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let order = Order {
            id: id.clone(),
            order_type: new_order.order_type,
            side: new_order.side,
            price: new_order.price,
            trigger_price: new_order.trigger_price,
            amount: new_order.amount,
            filled_amount: 0.0,
            avg_fill_price: None,
            status: OrderStatus::Active,
            linked_position_id: None,
        };
        self.orders.write().insert(id.clone(), order.clone());

        // Immediate-fill check against the current mark.
        if let Some(fill_price) = self.fill_price_for(&order) {
            self.apply_fill(&id, fill_price);
        }

        let status = self
            .orders
            .read()
            .get(&id)
            .map(|o| o.status)
            .unwrap_or(OrderStatus::Rejected);
        Ok(OrderAck { id, status })
    }

    async fn cancel_order(&self, _pair: &str, id: &str) -> Result<CancelOutcome, ExchangeError> {
        let mut orders = self.orders.write();
        match orders.get_mut(id) {
            Some(order) if order.status.is_live() => {
                order.status = OrderStatus::Cancelled;
                Ok(CancelOutcome::Cancelled)
            }
            Some(_) | None => Ok(CancelOutcome::NotFound),
        }
    }
}

// =============================================================================
// PaperBridge — live market data, simulated orders
// =============================================================================

/// Paper-trading composite: market data flows from a real (public) exchange
/// client while orders fill against the simulator. Every ticker fetch pushes
/// the live mark into the simulator so resting TP/SL orders trigger exactly
/// as they would on the venue.
pub struct PaperBridge {
    market: std::sync::Arc<dyn ExchangeApi>,
    sim: PaperExchange,
}

impl PaperBridge {
    pub fn new(market: std::sync::Arc<dyn ExchangeApi>, initial_margin: f64) -> Self {
        Self {
            market,
            sim: PaperExchange::new(initial_margin),
        }
    }

    pub fn sim(&self) -> &PaperExchange {
        &self.sim
    }

    async fn refresh_mark(&self, pair: &str) -> Result<Ticker, ExchangeError> {
        let ticker = self.market.get_ticker(pair).await?;
        self.sim.set_ticker(ticker.bid, ticker.ask, ticker.last);
        self.sim.set_last_price(ticker.last);
        Ok(ticker)
    }
}

#[async_trait]
impl ExchangeApi for PaperBridge {
    async fn get_ticker(&self, pair: &str) -> Result<Ticker, ExchangeError> {
        self.refresh_mark(pair).await
    }

    async fn get_ohlcv(
        &self,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, ExchangeError> {
        self.market.get_ohlcv(pair, timeframe, limit).await
    }

    async fn get_balance(&self) -> Result<Balance, ExchangeError> {
        self.sim.get_balance().await
    }

    async fn get_open_orders(&self, pair: &str) -> Result<Vec<Order>, ExchangeError> {
        self.sim.get_open_orders(pair).await
    }

    async fn get_order(&self, pair: &str, id: &str) -> Result<Order, ExchangeError> {
        self.sim.get_order(pair, id).await
    }

    async fn get_positions(&self, pair: &str) -> Result<Vec<RawPosition>, ExchangeError> {
        self.sim.get_positions(pair).await
    }

    async fn create_order(&self, order: &NewOrder) -> Result<OrderAck, ExchangeError> {
        // Fills must reference the freshest mark available.
        let _ = self.refresh_mark(&order.pair).await;
        self.sim.create_order(order).await
    }

    async fn cancel_order(&self, pair: &str, id: &str) -> Result<CancelOutcome, ExchangeError> {
        self.sim.cancel_order(pair, id).await
    }
}

impl std::fmt::Debug for PaperBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperBridge").field("sim", &self.sim).finish()
    }
}

impl std::fmt::Debug for PaperExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperExchange")
            .field("live_orders", &self.live_order_count())
            .field("net_position", &self.net_position())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> PaperExchange {
        let ex = PaperExchange::new(1_000_000.0);
        ex.set_ticker(9_999_000.0, 10_001_000.0, 10_000_000.0);
        ex
    }

    #[tokio::test]
    async fn market_order_fills_at_last() {
        let ex = exchange();
        let ack = ex
            .create_order(&NewOrder::market("btc_jpy", Side::Buy, 0.01))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        let order = ex.get_order("btc_jpy", &ack.id).await.unwrap();
        assert_eq!(order.avg_fill_price, Some(10_000_000.0));
        assert!((ex.net_position() - 0.01).abs() < 1e-12);
    }

    #[tokio::test]
    async fn maker_entry_at_bid_fills() {
        let ex = exchange();
        let ack = ex
            .create_order(&NewOrder::limit("btc_jpy", Side::Buy, 0.01, 9_999_000.0, true))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn far_tp_limit_rests_until_price_reaches() {
        let ex = exchange();
        let ack = ex
            .create_order(&NewOrder::limit("btc_jpy", Side::Sell, 0.01, 10_200_000.0, false))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Active);

        ex.set_last_price(10_250_000.0);
        let order = ex.get_order("btc_jpy", &ack.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[tokio::test]
    async fn sell_stop_triggers_on_drop() {
        let ex = exchange();
        let ack = ex
            .create_order(&NewOrder::stop("btc_jpy", Side::Sell, 0.01, 9_900_000.0))
            .await
            .unwrap();
        assert_eq!(ack.status, OrderStatus::Active);

        ex.set_last_price(9_890_000.0);
        let order = ex.get_order("btc_jpy", &ack.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.avg_fill_price, Some(9_900_000.0));
    }

    #[tokio::test]
    async fn injected_rejection_by_type() {
        let ex = exchange();
        ex.reject_order_type(OrderType::Stop);
        let err = ex
            .create_order(&NewOrder::stop("btc_jpy", Side::Sell, 0.01, 9_900_000.0))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::Validation(_)));
        // Other order types are unaffected.
        assert!(ex
            .create_order(&NewOrder::market("btc_jpy", Side::Buy, 0.01))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn transient_failures_recover() {
        let ex = exchange();
        ex.inject_transient_failures(2);
        let order = NewOrder::market("btc_jpy", Side::Buy, 0.01);
        assert!(ex.create_order(&order).await.is_err());
        assert!(ex.create_order(&order).await.is_err());
        assert!(ex.create_order(&order).await.is_ok());
    }

    #[tokio::test]
    async fn cancel_live_then_not_found() {
        let ex = exchange();
        let ack = ex
            .create_order(&NewOrder::limit("btc_jpy", Side::Sell, 0.01, 10_200_000.0, false))
            .await
            .unwrap();
        assert_eq!(
            ex.cancel_order("btc_jpy", &ack.id).await.unwrap(),
            CancelOutcome::Cancelled
        );
        assert_eq!(
            ex.cancel_order("btc_jpy", &ack.id).await.unwrap(),
            CancelOutcome::NotFound
        );
    }

    #[tokio::test]
    async fn fills_net_out_positions() {
        let ex = exchange();
        ex.create_order(&NewOrder::market("btc_jpy", Side::Buy, 0.02))
            .await
            .unwrap();
        ex.create_order(&NewOrder::market("btc_jpy", Side::Sell, 0.02))
            .await
            .unwrap();
        assert!(ex.net_position().abs() < 1e-12);
        assert!(ex.get_positions("btc_jpy").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_trigger_rejected() {
        let ex = exchange();
        let mut order = NewOrder::stop("btc_jpy", Side::Sell, 0.01, 9_900_000.0);
        order.trigger_price = None;
        assert!(matches!(
            ex.create_order(&order).await,
            Err(ExchangeError::Validation(_))
        ));
    }
}
