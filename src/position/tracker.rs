// =============================================================================
// PositionTracker — virtual positions mirrored against the exchange
// =============================================================================
//
// The tracker owns the local view of open positions. The exchange stays
// authoritative: every cycle starts with `sync`, which inspects the TP/SL
// orders of each tracked position, flags positions closed on fills, and
// cancels the surviving sibling so no orphan protection order remains
// (the exchange has no OCO).
//
// Invariant: an open position references at most one TP and one SL order.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::ExchangeError;
use crate::exchange::{CancelOutcome, ExchangeApi, OrderStatus};
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closing,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    Rollback,
    External,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TakeProfit => write!(f, "take_profit"),
            Self::StopLoss => write!(f, "stop_loss"),
            Self::Rollback => write!(f, "rollback"),
            Self::External => write!(f, "external"),
        }
    }
}

/// A tracked virtual position with its protection order linkage.
#[derive(Debug, Clone, Serialize)]
pub struct TrackedPosition {
    pub id: String,
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    pub entry_ts: DateTime<Utc>,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub tp_price: f64,
    pub sl_price: f64,
    pub status: PositionStatus,
}

/// A completed round trip.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedTrade {
    pub position_id: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub size: f64,
    pub pnl: f64,
    pub reason: ExitReason,
    pub closed_at: DateTime<Utc>,
}

pub struct PositionTracker {
    pair: String,
    open: RwLock<Vec<TrackedPosition>>,
    closed: RwLock<Vec<ClosedTrade>>,
    last_close: RwLock<Option<DateTime<Utc>>>,
}

impl PositionTracker {
    pub fn new(pair: impl Into<String>) -> Self {
        Self {
            pair: pair.into(),
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
            last_close: RwLock::new(None),
        }
    }

    /// Register a freshly protected position. Called by the execution layer
    /// only after entry, TP, and SL all succeeded.
    #[allow(clippy::too_many_arguments)]
    pub fn open_position(
        &self,
        side: Side,
        entry_price: f64,
        size: f64,
        tp_order_id: String,
        sl_order_id: String,
        tp_price: f64,
        sl_price: f64,
        now: DateTime<Utc>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let position = TrackedPosition {
            id: id.clone(),
            side,
            entry_price,
            size,
            entry_ts: now,
            tp_order_id: Some(tp_order_id),
            sl_order_id: Some(sl_order_id),
            tp_price,
            sl_price,
            status: PositionStatus::Open,
        };

        info!(
            id = %id,
            side = %side,
            entry_price,
            size,
            tp_price,
            sl_price,
            "position opened"
        );

        self.open.write().push(position);
        id
    }

    pub fn open_positions(&self) -> Vec<TrackedPosition> {
        self.open.read().clone()
    }

    pub fn open_count(&self) -> u32 {
        self.open.read().len() as u32
    }

    pub fn get(&self, id: &str) -> Option<TrackedPosition> {
        self.open.read().iter().find(|p| p.id == id).cloned()
    }

    /// Replace the exit-order linkage after a repair re-placed one of them.
    pub fn set_exit_orders(&self, id: &str, tp_order_id: Option<String>, sl_order_id: Option<String>) {
        let mut open = self.open.write();
        if let Some(position) = open.iter_mut().find(|p| p.id == id) {
            if tp_order_id.is_some() {
                position.tp_order_id = tp_order_id;
            }
            if sl_order_id.is_some() {
                position.sl_order_id = sl_order_id;
            }
        }
    }

    pub fn last_close_time(&self) -> Option<DateTime<Utc>> {
        *self.last_close.read()
    }

    pub fn recent_closed(&self, count: usize) -> Vec<ClosedTrade> {
        let closed = self.closed.read();
        closed.iter().rev().take(count).cloned().collect()
    }

    /// Every live TP/SL order id currently referenced by an open position.
    pub fn referenced_order_ids(&self) -> Vec<String> {
        self.open
            .read()
            .iter()
            .flat_map(|p| {
                p.tp_order_id
                    .iter()
                    .chain(p.sl_order_id.iter())
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Mirror tracked positions against the exchange: detect TP/SL fills,
    /// close the position locally, and cancel the surviving sibling order.
    /// Returns the trades closed by this pass.
    pub async fn sync(
        &self,
        exchange: &dyn ExchangeApi,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClosedTrade>, ExchangeError> {
        let snapshot = self.open_positions();
        let mut closed_now = Vec::new();

        for position in snapshot {
            let tp_order = match &position.tp_order_id {
                Some(id) => Some(exchange.get_order(&self.pair, id).await),
                None => None,
            };
            let sl_order = match &position.sl_order_id {
                Some(id) => Some(exchange.get_order(&self.pair, id).await),
                None => None,
            };

            let tp_filled = matches!(
                &tp_order,
                Some(Ok(order)) if order.status == OrderStatus::Filled
            );
            let sl_filled = matches!(
                &sl_order,
                Some(Ok(order)) if order.status == OrderStatus::Filled
            );

            if tp_filled {
                let exit_price = tp_order
                    .and_then(|o| o.ok())
                    .and_then(|o| o.avg_fill_price)
                    .unwrap_or(position.tp_price);
                if let Some(sl_id) = &position.sl_order_id {
                    self.cancel_quietly(exchange, sl_id).await;
                }
                closed_now.push(self.close_position(
                    &position.id,
                    exit_price,
                    ExitReason::TakeProfit,
                    now,
                ));
            } else if sl_filled {
                let exit_price = sl_order
                    .and_then(|o| o.ok())
                    .and_then(|o| o.avg_fill_price)
                    .unwrap_or(position.sl_price);
                if let Some(tp_id) = &position.tp_order_id {
                    self.cancel_quietly(exchange, tp_id).await;
                }
                closed_now.push(self.close_position(
                    &position.id,
                    exit_price,
                    ExitReason::StopLoss,
                    now,
                ));
            }
        }

        // A tracked position with no matching exchange exposure was closed
        // externally (manual intervention, liquidation). Flag it, flat PnL —
        // the true fill price is unknowable here.
        let raw = exchange.get_positions(&self.pair).await?;
        let exchange_exposure: f64 = raw
            .iter()
            .map(|p| p.side.direction() * p.amount)
            .sum();
        let tracked_exposure: f64 = self
            .open
            .read()
            .iter()
            .map(|p| p.side.direction() * p.size)
            .sum();

        if self.open_count() > 0 && exchange_exposure.abs() < 1e-12 && tracked_exposure.abs() > 1e-12 {
            let stale: Vec<String> = self.open.read().iter().map(|p| p.id.clone()).collect();
            for id in stale {
                if let Some(position) = self.get(&id) {
                    warn!(
                        position_id = %id,
                        "tracked position has no exchange exposure — flagging externally closed"
                    );
                    for order_id in position.tp_order_id.iter().chain(position.sl_order_id.iter()) {
                        self.cancel_quietly(exchange, order_id).await;
                    }
                    closed_now.push(self.close_position(
                        &id,
                        position.entry_price,
                        ExitReason::External,
                        now,
                    ));
                }
            }
        }

        Ok(closed_now)
    }

    /// Close a tracked position and move it to the closed list.
    pub fn close_position(
        &self,
        id: &str,
        exit_price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> ClosedTrade {
        let mut open = self.open.write();
        let position = match open.iter().position(|p| p.id == id) {
            Some(idx) => open.remove(idx),
            None => {
                warn!(position_id = id, "close requested for unknown position");
                return ClosedTrade {
                    position_id: id.to_string(),
                    side: Side::Hold,
                    entry_price: 0.0,
                    exit_price,
                    size: 0.0,
                    pnl: 0.0,
                    reason,
                    closed_at: now,
                };
            }
        };
        drop(open);

        let pnl = position.side.direction() * (exit_price - position.entry_price) * position.size;
        let trade = ClosedTrade {
            position_id: position.id.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            size: position.size,
            pnl,
            reason,
            closed_at: now,
        };

        info!(
            position_id = %trade.position_id,
            reason = %reason,
            exit_price,
            pnl,
            "position closed"
        );

        *self.last_close.write() = Some(now);
        self.closed.write().push(trade.clone());
        trade
    }

    async fn cancel_quietly(&self, exchange: &dyn ExchangeApi, order_id: &str) {
        match exchange.cancel_order(&self.pair, order_id).await {
            Ok(CancelOutcome::Cancelled) => {
                info!(order_id, "sibling protection order cancelled");
            }
            Ok(CancelOutcome::NotFound) => {}
            Err(e) => warn!(order_id, error = %e, "sibling cancel failed"),
        }
    }
}

impl std::fmt::Debug for PositionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionTracker")
            .field("pair", &self.pair)
            .field("open", &self.open_count())
            .field("closed", &self.closed.read().len())
            .finish()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{NewOrder, PaperExchange};

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    async fn protected_position(
        ex: &PaperExchange,
        tracker: &PositionTracker,
    ) -> (String, String, String) {
        ex.set_ticker(9_999_000.0, 10_001_000.0, 10_000_000.0);
        // Entry fill.
        ex.create_order(&NewOrder::market("btc_jpy", Side::Buy, 0.01))
            .await
            .unwrap();
        let tp = ex
            .create_order(&NewOrder::limit("btc_jpy", Side::Sell, 0.01, 10_200_000.0, false))
            .await
            .unwrap();
        let sl = ex
            .create_order(&NewOrder::stop("btc_jpy", Side::Sell, 0.01, 9_850_000.0))
            .await
            .unwrap();
        let id = tracker.open_position(
            Side::Buy,
            10_000_000.0,
            0.01,
            tp.id.clone(),
            sl.id.clone(),
            10_200_000.0,
            9_850_000.0,
            now(),
        );
        (id, tp.id, sl.id)
    }

    #[tokio::test]
    async fn tp_fill_closes_position_and_cancels_sl() {
        let ex = PaperExchange::new(1_000_000.0);
        let tracker = PositionTracker::new("btc_jpy");
        let (_, _, sl_id) = protected_position(&ex, &tracker).await;

        ex.set_last_price(10_250_000.0); // TP fills
        let closed = tracker.sync(&ex, now()).await.unwrap();

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, ExitReason::TakeProfit);
        assert!(closed[0].pnl > 0.0);
        assert_eq!(tracker.open_count(), 0);

        // Sibling SL must be gone.
        let sl = ex.get_order("btc_jpy", &sl_id).await.unwrap();
        assert_eq!(sl.status, OrderStatus::Cancelled);
        assert!(tracker.last_close_time().is_some());
    }

    #[tokio::test]
    async fn sl_fill_closes_with_loss_and_cancels_tp() {
        let ex = PaperExchange::new(1_000_000.0);
        let tracker = PositionTracker::new("btc_jpy");
        let (_, tp_id, _) = protected_position(&ex, &tracker).await;

        ex.set_last_price(9_800_000.0); // SL triggers
        let closed = tracker.sync(&ex, now()).await.unwrap();

        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].reason, ExitReason::StopLoss);
        assert!(closed[0].pnl < 0.0);
        assert_eq!(tracker.open_count(), 0);

        let tp = ex.get_order("btc_jpy", &tp_id).await.unwrap();
        assert_eq!(tp.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn untouched_position_stays_open() {
        let ex = PaperExchange::new(1_000_000.0);
        let tracker = PositionTracker::new("btc_jpy");
        protected_position(&ex, &tracker).await;

        ex.set_last_price(10_050_000.0); // between SL and TP
        let closed = tracker.sync(&ex, now()).await.unwrap();
        assert!(closed.is_empty());
        assert_eq!(tracker.open_count(), 1);
    }

    #[tokio::test]
    async fn referenced_ids_cover_both_exit_orders() {
        let ex = PaperExchange::new(1_000_000.0);
        let tracker = PositionTracker::new("btc_jpy");
        let (_, tp_id, sl_id) = protected_position(&ex, &tracker).await;
        let ids = tracker.referenced_order_ids();
        assert!(ids.contains(&tp_id));
        assert!(ids.contains(&sl_id));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn pnl_sign_follows_side() {
        let tracker = PositionTracker::new("btc_jpy");
        let id = tracker.open_position(
            Side::Sell,
            10_000_000.0,
            0.01,
            "tp".into(),
            "sl".into(),
            9_800_000.0,
            10_150_000.0,
            now(),
        );
        let trade = tracker.close_position(&id, 9_800_000.0, ExitReason::TakeProfit, now());
        assert!(trade.pnl > 0.0, "short covered lower must profit");
    }
}
