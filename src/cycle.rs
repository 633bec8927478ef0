// =============================================================================
// TradingCycleManager — one decision cycle, end to end
// =============================================================================
//
// `run_cycle` is invoked by the scheduler every five minutes and performs:
//   1.  reconcile positions with the exchange, clean orphans, feed newly
//       closed trades into the drawdown state;
//   2.  fetch bars (15m + 4h), partial current bar dropped;
//   3.  generate features, validate against the canonical schema;
//   4.  classify the regime;
//   5.  run the six strategies, combine by regime-weighted vote;
//   6.  ensemble inference;
//   7.  integrate strategy and ML signals;
//   8.  risk pipeline → approved order or rejection;
//   9.  atomic entry if approved;
//   10. persist drawdown state, emit the structured cycle report.
//
// Concurrency: a process-wide lock serializes cycles; an overlapping trigger
// is skipped (not queued) and logged as `cycle_overlap`. The whole body runs
// under the wall-clock budget; on timeout the cycle reports failure rather
// than running long. Nothing escapes `run_cycle` — panics are caught at the
// boundary and reported as a failed cycle.
// =============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::BotConfig;
use crate::errors::ModelError;
use crate::exchange::ExchangeApi;
use crate::execution::{ExecutionOutcome, ExecutionService};
use crate::features::{FeatureGenerator, FeatureManager};
use crate::market_data::MarketFeed;
use crate::ml::{DegradationLevel, ModelCache};
use crate::notify::Notifier;
use crate::position::{CooldownDecision, PositionTracker, StopManager};
use crate::regime::RegimeClassifier;
use crate::risk::{anomaly_score, AnomalyInput, RiskInput, RiskManager, RiskVerdict};
use crate::signal::SignalIntegrator;
use crate::strategies::{Strategy, StrategyManager, StrategySignal};
use crate::types::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Completed,
    Skipped,
    Failed,
}

impl CycleStatus {
    /// Process exit semantics: non-zero means the cycle did not complete.
    pub fn code(self) -> i32 {
        match self {
            Self::Completed => 0,
            Self::Skipped => 1,
            Self::Failed => 2,
        }
    }
}

/// Structured record of one cycle, emitted at the end of every run.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: String,
    pub status: CycleStatus,
    pub decision: Option<Side>,
    pub confidence: Option<f64>,
    pub regime: Option<String>,
    pub rejection: Option<String>,
    pub execution: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl CycleReport {
    fn skipped(cycle_id: String, reason: &str) -> Self {
        Self {
            cycle_id,
            status: CycleStatus::Skipped,
            decision: None,
            confidence: None,
            regime: None,
            rejection: Some(reason.to_string()),
            execution: None,
            error: None,
            duration_ms: 0,
        }
    }

    fn failed(cycle_id: String, error: String, duration_ms: u64) -> Self {
        Self {
            cycle_id,
            status: CycleStatus::Failed,
            decision: None,
            confidence: None,
            regime: None,
            rejection: None,
            execution: None,
            error: Some(error),
            duration_ms,
        }
    }
}

pub struct TradingCycleManager {
    config: BotConfig,
    feed: MarketFeed,
    feature_manager: Arc<FeatureManager>,
    generator: FeatureGenerator,
    regime: RegimeClassifier,
    strategies: Arc<Vec<Box<dyn Strategy>>>,
    strategy_manager: StrategyManager,
    models: Arc<ModelCache>,
    integrator: SignalIntegrator,
    risk: Mutex<RiskManager>,
    execution: ExecutionService,
    tracker: Arc<PositionTracker>,
    stop_manager: StopManager,
    exchange: Arc<dyn ExchangeApi>,
    notifier: Arc<Notifier>,
    cycle_lock: tokio::sync::Mutex<()>,
    last_reconcile: Mutex<Option<Instant>>,
    uniform_alerted: AtomicBool,
}

impl TradingCycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: BotConfig,
        exchange: Arc<dyn ExchangeApi>,
        feature_manager: Arc<FeatureManager>,
        strategies: Arc<Vec<Box<dyn Strategy>>>,
        strategy_manager: StrategyManager,
        models: Arc<ModelCache>,
        risk: RiskManager,
        tracker: Arc<PositionTracker>,
        notifier: Arc<Notifier>,
    ) -> Self {
        let feed = MarketFeed::new(
            exchange.clone(),
            config.pair.clone(),
            config.features.fetch_limit,
            config.features.min_primary_bars,
        );
        let generator = FeatureGenerator::new(
            feature_manager.clone(),
            strategies.clone(),
            config.features.min_primary_bars,
        );
        let regime = RegimeClassifier::new(config.regime.clone());
        let integrator = SignalIntegrator::new(config.ml.clone());
        let execution = ExecutionService::new(
            exchange.clone(),
            tracker.clone(),
            notifier.clone(),
            config.execution.clone(),
            config.pair.clone(),
        );
        let stop_manager = StopManager::new(&config.position);

        Self {
            config,
            feed,
            feature_manager,
            generator,
            regime,
            strategies,
            strategy_manager,
            models,
            integrator,
            risk: Mutex::new(risk),
            execution,
            tracker,
            stop_manager,
            exchange,
            notifier,
            cycle_lock: tokio::sync::Mutex::new(()),
            last_reconcile: Mutex::new(None),
            uniform_alerted: AtomicBool::new(false),
        }
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }

    pub fn execution(&self) -> &ExecutionService {
        &self.execution
    }

    /// Persist risk state — used by the shutdown path.
    pub fn persist_state(&self) {
        if let Err(e) = self.risk.lock().persist() {
            error!(error = %e, "failed to persist drawdown state on shutdown");
        }
    }

    /// Run one cycle. Never panics; always returns a report.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4().to_string();

        // Overlap guard: skip, never queue.
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!(cycle_id = %cycle_id, "cycle_overlap — previous cycle still running, skipping");
            return CycleReport::skipped(cycle_id, "cycle_overlap");
        };

        let started = Instant::now();
        let budget = Duration::from_secs(self.config.execution.cycle_budget_seconds);

        let body = AssertUnwindSafe(self.cycle_body(&cycle_id)).catch_unwind();
        let report = match tokio::time::timeout(budget, body).await {
            Err(_) => {
                error!(
                    cycle_id = %cycle_id,
                    budget_secs = self.config.execution.cycle_budget_seconds,
                    "cycle exceeded wall-clock budget"
                );
                CycleReport::failed(
                    cycle_id.clone(),
                    "cycle_budget_exceeded".to_string(),
                    started.elapsed().as_millis() as u64,
                )
            }
            Ok(Err(panic)) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(cycle_id = %cycle_id, panic = %msg, "cycle panicked");
                CycleReport::failed(
                    cycle_id.clone(),
                    format!("panic: {msg}"),
                    started.elapsed().as_millis() as u64,
                )
            }
            Ok(Ok(mut report)) => {
                report.duration_ms = started.elapsed().as_millis() as u64;
                report
            }
        };

        info!(
            cycle_id = %report.cycle_id,
            status = ?report.status,
            decision = ?report.decision,
            confidence = report.confidence,
            regime = report.regime.as_deref(),
            rejection = report.rejection.as_deref(),
            execution = report.execution.as_deref(),
            error = report.error.as_deref(),
            duration_ms = report.duration_ms,
            "cycle finished"
        );

        report
    }

    async fn cycle_body(&self, cycle_id: &str) -> CycleReport {
        let cycle_id = cycle_id.to_string();
        let now = Utc::now();

        // --- 1. Reconcile with the exchange -------------------------------
        match self.tracker.sync(self.exchange.as_ref(), now).await {
            Ok(closed) => {
                for trade in closed {
                    let transition = self.risk.lock().record_closed_trade(trade.pnl, now);
                    info!(
                        cycle_id = %cycle_id,
                        position_id = %trade.position_id,
                        pnl = trade.pnl,
                        reason = %trade.reason,
                        "closed trade recorded"
                    );
                    if let Some(status) = transition {
                        self.notifier
                            .critical(
                                "trading paused",
                                &format!("drawdown state entered {status} after pnl {:.0}", trade.pnl),
                            )
                            .await;
                    }
                }
            }
            Err(e) => {
                return CycleReport::failed(cycle_id, format!("reconcile failed: {e}"), 0);
            }
        }

        let reconcile_due = {
            let mut last = self.last_reconcile.lock();
            let interval = Duration::from_secs(self.config.execution.reconcile_interval_seconds);
            let due = last.map(|t| t.elapsed() >= interval).unwrap_or(true);
            if due {
                *last = Some(Instant::now());
            }
            due
        };
        if reconcile_due {
            if let Err(e) = self.execution.reconcile().await {
                warn!(cycle_id = %cycle_id, error = %e, "periodic reconciliation failed");
            }
        }

        // --- 2. Fetch bars -------------------------------------------------
        let snapshot = match self.feed.fetch_snapshot().await {
            Ok(s) => s,
            Err(e) => {
                // Bar-feed failure: abort without state mutation; retry next cycle.
                return CycleReport::failed(cycle_id, format!("data fetch failed: {e}"), 0);
            }
        };

        // --- 3. Features ---------------------------------------------------
        let frame = match self
            .generator
            .generate(&snapshot.primary, &snapshot.supporting)
        {
            Ok(frame) => frame,
            Err(e) => {
                // Feature failure yields a HOLD cycle, not a crash.
                warn!(cycle_id = %cycle_id, error = %e, "feature generation failed — holding");
                return CycleReport {
                    cycle_id,
                    status: CycleStatus::Completed,
                    decision: Some(Side::Hold),
                    confidence: Some(0.0),
                    regime: None,
                    rejection: Some(format!("feature_error: {e}")),
                    execution: None,
                    error: None,
                    duration_ms: 0,
                };
            }
        };

        let report = self.feature_manager.validate(&frame);
        if !report.ok {
            warn!(cycle_id = %cycle_id, ?report, "feature schema validation failed — holding");
            return CycleReport {
                cycle_id,
                status: CycleStatus::Completed,
                decision: Some(Side::Hold),
                confidence: Some(0.0),
                regime: None,
                rejection: Some("feature_schema_mismatch".to_string()),
                execution: None,
                error: None,
                duration_ms: 0,
            };
        }

        let latest = frame
            .latest()
            .expect("generated frame is never empty after validation");

        // --- 4. Regime -----------------------------------------------------
        let Some(regime_reading) = self.regime.classify(snapshot.primary.bars()) else {
            warn!(cycle_id = %cycle_id, "regime classification starved — holding");
            return CycleReport {
                cycle_id,
                status: CycleStatus::Completed,
                decision: Some(Side::Hold),
                confidence: Some(0.0),
                regime: None,
                rejection: Some("regime_unavailable".to_string()),
                execution: None,
                error: None,
                duration_ms: 0,
            };
        };

        // --- 5. Strategies -------------------------------------------------
        let signals: Vec<StrategySignal> = self
            .strategies
            .iter()
            .map(|s| s.evaluate(&latest))
            .collect();
        let proposal = self.strategy_manager.combine(&signals, regime_reading.regime);

        // --- 6. Ensemble ---------------------------------------------------
        let ensemble = self.models.current();
        if ensemble.level() == DegradationLevel::Uniform
            && !self.uniform_alerted.swap(true, Ordering::SeqCst)
        {
            self.notifier
                .critical(
                    "ensemble degraded to uniform fallback",
                    "no model artifacts usable; entries are disabled until models reload",
                )
                .await;
        }

        let prediction = match ensemble.predict(latest.values()) {
            Ok(p) => p,
            Err(e @ ModelError::ShapeMismatch { .. }) => {
                // Hard error: surfaced, no trade this cycle.
                error!(cycle_id = %cycle_id, error = %e, "feature shape mismatch at inference");
                return CycleReport::failed(cycle_id, format!("model shape mismatch: {e}"), 0);
            }
            Err(e) => {
                warn!(cycle_id = %cycle_id, error = %e, "ensemble inference failed — holding");
                return CycleReport {
                    cycle_id,
                    status: CycleStatus::Completed,
                    decision: Some(Side::Hold),
                    confidence: Some(0.0),
                    regime: Some(regime_reading.regime.to_string()),
                    rejection: Some(format!("model_error: {e}")),
                    execution: None,
                    error: None,
                    duration_ms: 0,
                };
            }
        };

        // --- 7. Integrate --------------------------------------------------
        let integrated = self.integrator.integrate(&proposal, &prediction);

        // Confidence floor for directional decisions.
        let decision_side = if integrated.side.is_directional()
            && integrated.confidence < self.config.ml.confidence_threshold
        {
            info!(
                cycle_id = %cycle_id,
                confidence = integrated.confidence,
                floor = self.config.ml.confidence_threshold,
                "confidence below floor — holding"
            );
            Side::Hold
        } else {
            integrated.side
        };

        // --- 8. Risk -------------------------------------------------------
        let (ticker, balance) = match tokio::try_join!(
            self.exchange.get_ticker(&self.config.pair),
            self.exchange.get_balance(),
        ) {
            Ok(pair) => pair,
            Err(e) => {
                return CycleReport::failed(cycle_id, format!("account fetch failed: {e}"), 0);
            }
        };

        let prev_close = if frame.len() >= 2 {
            frame
                .value(frame.len() - 2, "close")
                .unwrap_or(ticker.last)
        } else {
            ticker.last
        };
        let atr = latest.get("atr_14").unwrap_or(0.0);
        let anomaly = anomaly_score(&AnomalyInput {
            spread_bps: ticker.spread_bps(),
            last_price: ticker.last,
            prev_close,
            atr,
            volume_zscore: latest.get("volume_zscore_20").unwrap_or(0.0),
        });
        let trend_strength = latest.get("trend_strength").unwrap_or(0.0);
        let cooldown =
            self.stop_manager
                .check(self.tracker.last_close_time(), trend_strength, now);
        if cooldown == CooldownDecision::Bypassed {
            info!(
                cycle_id = %cycle_id,
                trend_strength,
                "cooldown bypassed by trend strength"
            );
        }
        let cooldown_active = cooldown == CooldownDecision::Blocked;

        let mut integrated_for_risk = integrated.clone();
        integrated_for_risk.side = decision_side;

        let risk_input = RiskInput {
            signal: integrated_for_risk,
            regime: regime_reading.regime,
            last_price: ticker.last,
            atr,
            equity: balance.total,
            available_margin: balance.available,
            maintenance_margin_ratio: balance.maintenance_margin_ratio,
            open_positions: self.tracker.open_count(),
            anomaly_score: anomaly,
            ensemble_level: prediction.level,
            cooldown_active,
            trend_strength,
            now,
        };

        let verdict = self.risk.lock().evaluate(&risk_input);

        // --- 9. Execute ----------------------------------------------------
        // A risk rejection is a normal HOLD outcome, not an error.
        let (final_decision, rejection, execution_result) = match &verdict {
            RiskVerdict::Rejected(reason) => {
                if matches!(reason, crate::risk::RejectReason::InsufficientMargin) {
                    self.notifier
                        .warning(
                            "margin below required minimum",
                            &format!(
                                "available margin {:.0} JPY below the configured floor",
                                balance.available
                            ),
                        )
                        .await;
                }
                (Side::Hold, Some(reason.to_string()), None)
            }
            RiskVerdict::Approved(order) => {
                let outcome = self.execution.place(order).await;
                if let ExecutionOutcome::RolledBack { reason } = &outcome {
                    warn!(cycle_id = %cycle_id, reason = %reason, "entry rolled back");
                }
                (decision_side, None, Some(outcome.to_string()))
            }
        };

        // --- 10. Persist + report -----------------------------------------
        if let Err(e) = self.risk.lock().persist() {
            warn!(cycle_id = %cycle_id, error = %e, "drawdown state persist failed");
        }

        CycleReport {
            cycle_id,
            status: CycleStatus::Completed,
            decision: Some(final_decision),
            confidence: Some(integrated.confidence),
            regime: Some(regime_reading.regime.to_string()),
            rejection,
            execution: execution_result,
            error: None,
            duration_ms: 0,
        }
    }
}

impl std::fmt::Debug for TradingCycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradingCycleManager")
            .field("pair", &self.config.pair)
            .field("mode", &self.config.mode)
            .finish()
    }
}
