// =============================================================================
// Shared test harness — synthetic markets, stub models, full-stack wiring
// =============================================================================
// Each integration-test binary compiles this module separately and uses a
// different subset of it.
#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use meridian_bot::config::BotConfig;
use meridian_bot::cycle::TradingCycleManager;
use meridian_bot::errors::ModelError;
use meridian_bot::exchange::PaperExchange;
use meridian_bot::features::FeatureManager;
use meridian_bot::market_data::{Bar, Timeframe};
use meridian_bot::ml::{
    BaseModels, BaseWeights, ClassProbs, DegradationLevel, ModelCache, ProbabilityModel,
    StackingEnsemble,
};
use meridian_bot::notify::Notifier;
use meridian_bot::position::PositionTracker;
use meridian_bot::risk::RiskManager;
use meridian_bot::strategies::{build_strategies, StrategyManager};
use meridian_bot::types::TradeMode;

pub const PAPER_MARGIN_JPY: f64 = 1_000_000.0;

pub fn schema_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/feature_schema.json")
}

pub fn temp_state_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("meridian-e2e-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("temp state dir");
    dir
}

/// Test configuration: fast execution timings, schema resolved from the repo.
pub fn test_config(state_dir: &std::path::Path) -> BotConfig {
    let mut config = BotConfig::default();
    config.mode = TradeMode::Backtest;
    config.state_dir = state_dir.to_string_lossy().to_string();
    config.features.schema_path = schema_path().to_string_lossy().to_string();
    config.execution.maker.wait_seconds = 1;
    config.execution.order_poll_interval_ms = 20;
    config.execution.retry_base_delay_ms = 10;
    config.execution.verify_after_seconds = 1;
    config
}

// -----------------------------------------------------------------------------
// Synthetic markets
// -----------------------------------------------------------------------------

fn series_start(n: usize, timeframe: Timeframe) -> DateTime<Utc> {
    let step = match timeframe {
        Timeframe::M15 => Duration::minutes(15),
        Timeframe::H4 => Duration::hours(4),
    };
    // Last bar closes one minute before now: recent, but never partial.
    Utc::now() - step * (n as i32) - Duration::minutes(1)
}

/// A steady uptrend: +`pct_per_bar` per bar with modest intrabar range.
pub fn trending_bars(n: usize, start_price: f64, pct_per_bar: f64) -> Vec<Bar> {
    let start = series_start(n, Timeframe::M15);
    (0..n)
        .map(|i| {
            let base = start_price * (1.0 + pct_per_bar).powi(i as i32);
            Bar::new(
                start + Duration::minutes(15 * i as i64),
                base,
                base * 1.0025,
                base * 0.9995,
                base * 1.002,
                5.0 + (i as f64 * 0.37).sin().abs(),
            )
        })
        .collect()
}

/// A tight oscillation around `mid`: amplitude `amp_pct` (e.g. 0.001 = ±0.1%).
pub fn oscillating_bars(n: usize, mid: f64, amp_pct: f64) -> Vec<Bar> {
    let start = series_start(n, Timeframe::M15);
    (0..n)
        .map(|i| {
            let phase = i as f64 * 0.53;
            let base = mid * (1.0 + amp_pct * phase.sin());
            Bar::new(
                start + Duration::minutes(15 * i as i64),
                base,
                base * (1.0 + amp_pct * 0.3),
                base * (1.0 - amp_pct * 0.3),
                base,
                4.0 + (i as f64 * 0.29).cos().abs(),
            )
        })
        .collect()
}

/// Supporting 4h bars drifting in the given direction, ending near now.
pub fn supporting_bars(n: usize, start_price: f64, pct_per_bar: f64) -> Vec<Bar> {
    let start = series_start(n, Timeframe::H4);
    (0..n)
        .map(|i| {
            let base = start_price * (1.0 + pct_per_bar).powi(i as i32);
            Bar::new(
                start + Duration::hours(4 * i as i64),
                base,
                base * 1.004,
                base * 0.996,
                base * 1.001,
                40.0,
            )
        })
        .collect()
}

// -----------------------------------------------------------------------------
// Stub models
// -----------------------------------------------------------------------------

pub struct FixedModel {
    probs: ClassProbs,
}

impl ProbabilityModel for FixedModel {
    fn predict_proba(&self, _features: &[f64]) -> Result<ClassProbs, ModelError> {
        Ok(self.probs)
    }
    fn name(&self) -> &str {
        "fixed"
    }
}

/// A stacking ensemble whose every model returns `probs`.
pub fn fixed_ensemble(level: DegradationLevel, probs: ClassProbs) -> StackingEnsemble {
    StackingEnsemble::from_parts(
        BaseModels {
            lightgbm: Box::new(FixedModel { probs }),
            xgboost: Box::new(FixedModel { probs }),
            random_forest: Box::new(FixedModel { probs }),
            meta: Box::new(FixedModel { probs }),
        },
        BaseWeights::default(),
        level,
    )
}

// -----------------------------------------------------------------------------
// Full-stack harness
// -----------------------------------------------------------------------------

pub struct Harness {
    pub manager: Arc<TradingCycleManager>,
    pub exchange: Arc<PaperExchange>,
    pub state_dir: PathBuf,
}

/// Wire the full decision stack against a paper exchange preloaded with the
/// given bars and the given (stubbed) ensemble.
pub fn build_harness(
    mut config: BotConfig,
    ensemble: StackingEnsemble,
    primary: Vec<Bar>,
    supporting: Vec<Bar>,
) -> Harness {
    config.validate().expect("test config must be valid");
    let state_dir = PathBuf::from(&config.state_dir);

    let exchange = Arc::new(PaperExchange::new(PAPER_MARGIN_JPY));
    exchange.set_bars(Timeframe::H4, supporting);
    exchange.set_bars(Timeframe::M15, primary);

    let feature_manager = Arc::new(
        FeatureManager::from_schema_file(&config.features.schema_path).expect("schema loads"),
    );
    let strategies = Arc::new(build_strategies(&config.strategies));
    let strategy_manager =
        StrategyManager::new(&config.dynamic_strategy_selection).expect("weights valid");
    let models = Arc::new(ModelCache::from_ensemble(ensemble));
    let tracker = Arc::new(PositionTracker::new(config.pair.clone()));
    let notifier = Arc::new(Notifier::disabled());

    let risk = RiskManager::new(
        config.risk.clone(),
        config.position.clone(),
        config.balance_alert.clone(),
        config.execution.price_tick,
        config.state_dir.clone(),
        config.mode,
        PAPER_MARGIN_JPY,
        Utc::now(),
    )
    .expect("risk manager builds");

    let manager = Arc::new(TradingCycleManager::new(
        config,
        exchange.clone(),
        feature_manager,
        strategies,
        strategy_manager,
        models,
        risk,
        tracker,
        notifier,
    ));

    Harness {
        manager,
        exchange,
        state_dir,
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.state_dir).ok();
    }
}
