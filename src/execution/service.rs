// =============================================================================
// ExecutionService — atomic entry + TP + SL with rollback
// =============================================================================
//
// Contract: entry, TP, and SL either all succeed, or the system converges to
// a safe state — no orphan orders, no naked position.
//
// Procedure per approved order:
//   1. Pre-clean stale exit orders for the pair.
//   2. Maker-preferred entry (post-only at the touch, bounded improvement
//      steps, taker downgrade if configured). The real fill price and amount
//      come from the exchange, not the request.
//   3. TP (limit) and SL (stop with trigger price — never a plain limit,
//      which the exchange would treat as a new entry). Transient and auth
//      errors retry up to the configured bound; permanent errors abort.
//   4. If TP or SL cannot be placed: market-close the filled size, cancel
//      the sibling, emit a critical alert. A filled entry is never rolled
//      back in memory — only reconciled.
//   5. Register the position with its exit-order linkage and schedule a
//      verification probe that asserts both orders are live at the expected
//      prices (defense against silent rejection).
//
// `reconcile` runs the same invariant periodically: repair missing TP/SL on
// tracked positions, cancel orphan exit orders with no position.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::errors::{AtomicEntryError, ExchangeError, ExchangeErrorKind};
use crate::exchange::{ExchangeApi, NewOrder, Order, OrderStatus};
use crate::execution::pricing::MakerPricer;
use crate::notify::Notifier;
use crate::position::PositionTracker;
use crate::risk::ApprovedOrder;
use crate::types::Side;

/// Outcome of one atomic entry attempt.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Entered {
        position_id: String,
        entry_price: f64,
        size: f64,
        tp_order_id: String,
        sl_order_id: String,
    },
    /// Entry filled but protection could not be placed; the fill was closed
    /// back out at market.
    RolledBack { reason: String },
    /// Entry never filled (or was rejected); nothing to unwind.
    Unfilled { reason: String },
}

impl std::fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Entered { position_id, .. } => write!(f, "entered({position_id})"),
            Self::RolledBack { reason } => write!(f, "rolled_back({reason})"),
            Self::Unfilled { reason } => write!(f, "unfilled({reason})"),
        }
    }
}

#[derive(Clone)]
pub struct ExecutionService {
    exchange: Arc<dyn ExchangeApi>,
    tracker: Arc<PositionTracker>,
    notifier: Arc<Notifier>,
    config: ExecutionConfig,
    pair: String,
}

impl ExecutionService {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        tracker: Arc<PositionTracker>,
        notifier: Arc<Notifier>,
        config: ExecutionConfig,
        pair: impl Into<String>,
    ) -> Self {
        Self {
            exchange,
            tracker,
            notifier,
            config,
            pair: pair.into(),
        }
    }

    // -------------------------------------------------------------------------
    // Atomic entry
    // -------------------------------------------------------------------------

    pub async fn place(&self, approved: &ApprovedOrder) -> ExecutionOutcome {
        info!(
            side = %approved.side,
            size = approved.size,
            entry_ref = approved.entry_price_ref,
            sl = approved.sl_price,
            tp = approved.tp_price,
            "atomic entry starting"
        );

        // 1. Pre-clean: no stale exit orders may survive into a new entry.
        if let Err(e) = self.cancel_unreferenced_orders().await {
            warn!(error = %e, "pre-clean failed — continuing with entry");
        }

        // 2. Entry.
        let (entry_price, filled_size) = match self.fill_entry(approved).await {
            Ok(Some(fill)) => fill,
            Ok(None) => {
                return ExecutionOutcome::Unfilled {
                    reason: "maker entry expired without fill".to_string(),
                }
            }
            Err(e) => {
                let failure = AtomicEntryError::EntryFailed(e);
                warn!(error = %failure, "entry order failed");
                return ExecutionOutcome::Unfilled {
                    reason: failure.to_string(),
                };
            }
        };

        let close_side = approved.side.flip();

        // 3a. Take-profit (limit).
        let tp_order = NewOrder::limit(&self.pair, close_side, filled_size, approved.tp_price, false);
        let tp_id = match self.submit_with_retry(&tp_order).await {
            Ok(ack) => ack.id,
            Err(e) => {
                let failure = AtomicEntryError::TakeProfitFailed {
                    attempts: self.config.max_order_retries + 1,
                    source: e,
                };
                return self
                    .rollback(approved.side, filled_size, None, failure.to_string())
                    .await;
            }
        };

        // 3b. Stop-loss (stop, trigger price only).
        let sl_order = NewOrder::stop(&self.pair, close_side, filled_size, approved.sl_price);
        let sl_id = match self.submit_with_retry(&sl_order).await {
            Ok(ack) => ack.id,
            Err(e) => {
                let failure = AtomicEntryError::StopLossFailed {
                    attempts: self.config.max_order_retries + 1,
                    source: e,
                };
                return self
                    .rollback(approved.side, filled_size, Some(tp_id), failure.to_string())
                    .await;
            }
        };

        // 5. Register and schedule the verification probe.
        let position_id = self.tracker.open_position(
            approved.side,
            entry_price,
            filled_size,
            tp_id.clone(),
            sl_id.clone(),
            approved.tp_price,
            approved.sl_price,
            Utc::now(),
        );

        let probe = self.clone();
        let probe_position = position_id.clone();
        let delay = Duration::from_secs(self.config.verify_after_seconds);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            probe.verify_position(&probe_position).await;
        });

        info!(
            position_id = %position_id,
            entry_price,
            size = filled_size,
            tp_order_id = %tp_id,
            sl_order_id = %sl_id,
            "atomic entry complete"
        );

        ExecutionOutcome::Entered {
            position_id,
            entry_price,
            size: filled_size,
            tp_order_id: tp_id,
            sl_order_id: sl_id,
        }
    }

    /// Maker-first entry. Returns the real fill price and amount, or `None`
    /// when every attempt expired unfilled.
    async fn fill_entry(
        &self,
        approved: &ApprovedOrder,
    ) -> Result<Option<(f64, f64)>, ExchangeError> {
        let pricer = MakerPricer::new(self.config.maker.clone(), self.config.price_tick);
        let ticker = self.exchange.get_ticker(&self.pair).await?;
        let mut price = pricer.entry_price(approved.side, &ticker);

        for attempt in 0..=pricer.max_improvements() {
            let order = NewOrder::limit(
                &self.pair,
                approved.side,
                approved.size,
                price,
                pricer.post_only(),
            );
            let ack = self.submit_with_retry(&order).await?;

            let filled = if ack.status == OrderStatus::Filled {
                Some(self.exchange.get_order(&self.pair, &ack.id).await?)
            } else {
                self.wait_for_fill(&ack.id, Duration::from_secs(pricer.wait_seconds()))
                    .await?
            };

            if let Some(order) = filled {
                let fill_price = order.avg_fill_price.or(order.price).unwrap_or(price);
                let amount = if order.filled_amount > 0.0 {
                    order.filled_amount
                } else {
                    order.amount
                };
                return Ok(Some((fill_price, amount)));
            }

            // Expired — cancel and either improve the price or downgrade.
            self.exchange.cancel_order(&self.pair, &ack.id).await?;

            if attempt < pricer.max_improvements() {
                let fresh = self.exchange.get_ticker(&self.pair).await?;
                match pricer.improved_price(approved.side, price, &fresh) {
                    Some(better) => {
                        debug!(old = price, new = better, "improving maker entry price");
                        price = better;
                    }
                    None => break,
                }
            }
        }

        if !pricer.taker_fallback() {
            return Ok(None);
        }

        // Taker downgrade.
        debug!("maker attempts exhausted — downgrading to taker entry");
        let market = NewOrder::market(&self.pair, approved.side, approved.size);
        let ack = self.submit_with_retry(&market).await?;
        let order = self.exchange.get_order(&self.pair, &ack.id).await?;
        if order.status == OrderStatus::Filled {
            let fill_price = order
                .avg_fill_price
                .unwrap_or(approved.entry_price_ref);
            let amount = if order.filled_amount > 0.0 {
                order.filled_amount
            } else {
                order.amount
            };
            Ok(Some((fill_price, amount)))
        } else {
            Ok(None)
        }
    }

    /// Poll an order until it fills or the window elapses. Returns the filled
    /// order, or `None` on expiry.
    async fn wait_for_fill(
        &self,
        order_id: &str,
        window: Duration,
    ) -> Result<Option<Order>, ExchangeError> {
        let poll = Duration::from_millis(self.config.order_poll_interval_ms);
        let deadline = tokio::time::Instant::now() + window;

        loop {
            let order = self.exchange.get_order(&self.pair, order_id).await?;
            match order.status {
                OrderStatus::Filled => return Ok(Some(order)),
                OrderStatus::Cancelled | OrderStatus::Rejected => return Ok(None),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll).await;
        }
    }

    // -------------------------------------------------------------------------
    // Rollback
    // -------------------------------------------------------------------------

    /// Close the filled size at market and cancel any partial sibling. The
    /// position must never sit unprotected.
    async fn rollback(
        &self,
        entry_side: Side,
        size: f64,
        sibling: Option<String>,
        reason: String,
    ) -> ExecutionOutcome {
        error!(reason = %reason, size, "atomic entry failed — rolling back");

        if let Some(id) = sibling {
            if let Err(e) = self.exchange.cancel_order(&self.pair, &id).await {
                warn!(order_id = %id, error = %e, "sibling cancel failed during rollback");
            }
        }

        let close = NewOrder::market(&self.pair, entry_side.flip(), size);
        match self.submit_with_retry(&close).await {
            Ok(_) => {
                self.notifier
                    .critical(
                        "atomic entry rollback",
                        &format!("entry reversed at market: {reason}"),
                    )
                    .await;
                ExecutionOutcome::RolledBack { reason }
            }
            Err(e) => {
                // The worst case: a naked position on the exchange. Scream.
                let failure = AtomicEntryError::RollbackFailed(e.to_string());
                error!(error = %failure, "rollback market close FAILED — naked position");
                self.notifier
                    .critical(
                        "rollback failed — naked position",
                        &format!("market close failed after: {reason}; {failure}"),
                    )
                    .await;
                ExecutionOutcome::RolledBack {
                    reason: format!("{reason}; {failure}"),
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Retry policy
    // -------------------------------------------------------------------------

    /// Submit an order with bounded retries on transient and auth-class
    /// errors. Permanent errors abort immediately.
    async fn submit_with_retry(
        &self,
        order: &NewOrder,
    ) -> Result<crate::exchange::OrderAck, ExchangeError> {
        let max_retries = self.config.max_order_retries;
        let mut auth_failures = 0u32;

        for attempt in 0..=max_retries {
            match self.exchange.create_order(order).await {
                Ok(ack) => return Ok(ack),
                Err(e) => match e.kind() {
                    ExchangeErrorKind::Permanent => return Err(e),
                    ExchangeErrorKind::Auth => {
                        auth_failures += 1;
                        if attempt == max_retries {
                            self.notifier
                                .critical(
                                    "repeated authentication failures",
                                    &format!("{auth_failures} consecutive auth errors: {e}"),
                                )
                                .await;
                            return Err(e);
                        }
                        self.backoff(attempt).await;
                    }
                    ExchangeErrorKind::Transient => {
                        if attempt == max_retries {
                            return Err(e);
                        }
                        warn!(attempt, error = %e, "transient order error — retrying");
                        self.backoff(attempt).await;
                    }
                },
            }
        }
        unreachable!("retry loop always returns")
    }

    /// Exponential backoff with jitter.
    async fn backoff(&self, attempt: u32) {
        let base = self.config.retry_base_delay_ms as f64;
        let jitter = 1.0 + rand::random::<f64>() * 0.3;
        let delay = base * 2_f64.powi(attempt as i32) * jitter;
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
    }

    // -------------------------------------------------------------------------
    // Verification probe & reconciliation
    // -------------------------------------------------------------------------

    /// Assert both exit orders of a position are live at the expected prices;
    /// repair anything missing. Defense against silent rejection.
    pub async fn verify_position(&self, position_id: &str) {
        let Some(position) = self.tracker.get(position_id) else {
            return; // already closed — nothing to verify
        };

        let mut tp_ok = false;
        let mut sl_ok = false;

        if let Some(tp_id) = &position.tp_order_id {
            if let Ok(order) = self.exchange.get_order(&self.pair, tp_id).await {
                tp_ok = (order.status.is_live() || order.status == OrderStatus::Filled)
                    && order
                        .price
                        .map(|p| (p - position.tp_price).abs() < self.config.price_tick)
                        .unwrap_or(false);
            }
        }
        if let Some(sl_id) = &position.sl_order_id {
            if let Ok(order) = self.exchange.get_order(&self.pair, sl_id).await {
                sl_ok = (order.status.is_live() || order.status == OrderStatus::Filled)
                    && order
                        .trigger_price
                        .map(|p| (p - position.sl_price).abs() < self.config.price_tick)
                        .unwrap_or(false);
            }
        }

        if tp_ok && sl_ok {
            debug!(position_id, "verification probe passed");
            return;
        }

        warn!(position_id, tp_ok, sl_ok, "verification probe failed — repairing");
        self.repair_position(&position.id).await;
    }

    /// Re-place whichever exit orders a position is missing.
    async fn repair_position(&self, position_id: &str) {
        let Some(position) = self.tracker.get(position_id) else {
            return;
        };
        let close_side = position.side.flip();

        let tp_live = match &position.tp_order_id {
            Some(id) => matches!(
                self.exchange.get_order(&self.pair, id).await,
                Ok(order) if order.status.is_live() || order.status == OrderStatus::Filled
            ),
            None => false,
        };
        if !tp_live {
            let order = NewOrder::limit(&self.pair, close_side, position.size, position.tp_price, false);
            match self.submit_with_retry(&order).await {
                Ok(ack) => {
                    info!(position_id, tp_order_id = %ack.id, "TP repaired");
                    self.tracker.set_exit_orders(position_id, Some(ack.id), None);
                }
                Err(e) => error!(position_id, error = %e, "TP repair failed"),
            }
        }

        let sl_live = match &position.sl_order_id {
            Some(id) => matches!(
                self.exchange.get_order(&self.pair, id).await,
                Ok(order) if order.status.is_live() || order.status == OrderStatus::Filled
            ),
            None => false,
        };
        if !sl_live {
            let order = NewOrder::stop(&self.pair, close_side, position.size, position.sl_price);
            match self.submit_with_retry(&order).await {
                Ok(ack) => {
                    info!(position_id, sl_order_id = %ack.id, "SL repaired");
                    self.tracker.set_exit_orders(position_id, None, Some(ack.id));
                }
                Err(e) => error!(position_id, error = %e, "SL repair failed"),
            }
        }
    }

    /// Periodic invariant enforcement: every open position carries a live
    /// TP + SL pair; every live exit order belongs to a position.
    pub async fn reconcile(&self) -> Result<(), ExchangeError> {
        for position in self.tracker.open_positions() {
            self.repair_position(&position.id).await;
        }
        self.cancel_unreferenced_orders().await
    }

    /// Cancel live orders on the pair that no tracked position references.
    async fn cancel_unreferenced_orders(&self) -> Result<(), ExchangeError> {
        let referenced = self.tracker.referenced_order_ids();
        let open_orders = self.exchange.get_open_orders(&self.pair).await?;

        for order in open_orders {
            if !referenced.contains(&order.id) {
                warn!(
                    order_id = %order.id,
                    order_type = %order.order_type,
                    "orphan order — cancelling"
                );
                if let Err(e) = self.exchange.cancel_order(&self.pair, &order.id).await {
                    warn!(order_id = %order.id, error = %e, "orphan cancel failed");
                }
            }
        }
        Ok(())
    }

    /// Shutdown path: cancel any pending entry order without a fill.
    pub async fn cancel_pending_entries(&self) -> Result<(), ExchangeError> {
        self.cancel_unreferenced_orders().await
    }
}

impl std::fmt::Debug for ExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionService")
            .field("pair", &self.pair)
            .field("tracker", &self.tracker)
            .finish()
    }
}
