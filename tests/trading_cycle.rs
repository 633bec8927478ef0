// =============================================================================
// End-to-end cycle scenarios: trending entry, tight-range hold, failure safety
// =============================================================================

mod common;

use common::*;
use meridian_bot::cycle::CycleStatus;
use meridian_bot::market_data::Timeframe;
use meridian_bot::ml::DegradationLevel;
use meridian_bot::types::Side;

/// Happy path: a strong uptrend produces a BUY with Kelly-sized entry, SL
/// below entry, TP above it at the trending risk/reward ratio.
#[tokio::test]
async fn trending_market_enters_long_with_protected_stops() {
    let state_dir = temp_state_dir();
    let config = test_config(&state_dir);
    let rr_trending = config.risk.take_profit.risk_reward_ratio["trending"];

    let harness = build_harness(
        config,
        fixed_ensemble(DegradationLevel::Full, [0.1, 0.2, 0.7]), // ML agrees: BUY
        trending_bars(400, 10_000.0, 0.004),
        supporting_bars(120, 9_000.0, 0.003),
    );

    let report = harness.manager.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Completed, "{report:?}");
    assert_eq!(report.decision, Some(Side::Buy), "{report:?}");
    assert_eq!(report.regime.as_deref(), Some("trending"));
    assert!(
        report.confidence.unwrap() >= 0.5,
        "confidence {:?} below 0.5",
        report.confidence
    );
    assert!(
        report.execution.as_deref().unwrap_or("").starts_with("entered"),
        "expected an entry, got {report:?}"
    );

    // Exactly one protected position: entry + live TP + live SL.
    let tracker = harness.manager.tracker();
    assert_eq!(tracker.open_count(), 1);
    let position = &tracker.open_positions()[0];
    assert_eq!(position.side, Side::Buy);
    assert!(position.size > 0.0, "Kelly size must be positive");
    assert!(position.sl_price < position.entry_price);
    assert!(position.tp_price > position.entry_price);

    // (tp - entry) / (entry - sl) tracks the trending risk/reward ratio.
    let rr = (position.tp_price - position.entry_price)
        / (position.entry_price - position.sl_price);
    assert!(
        (rr - rr_trending).abs() < 0.05,
        "expected r:r ≈ {rr_trending}, got {rr}"
    );

    // Both protection orders live on the exchange.
    assert_eq!(harness.exchange.live_order_count(), 2);
}

/// Tight range: the ML leg is confidently neutral, the regime classifies as
/// tight_range, and the cycle ends in HOLD with no order placed.
#[tokio::test]
async fn tight_range_holds_and_places_nothing() {
    let state_dir = temp_state_dir();
    let harness = build_harness(
        test_config(&state_dir),
        fixed_ensemble(DegradationLevel::Full, [0.075, 0.85, 0.075]), // strong HOLD
        oscillating_bars(400, 10_000.0, 0.001),
        supporting_bars(120, 10_000.0, 0.0),
    );

    let report = harness.manager.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Completed, "{report:?}");
    assert_eq!(report.regime.as_deref(), Some("tight_range"), "{report:?}");
    assert_eq!(report.decision, Some(Side::Hold), "{report:?}");
    assert!(report.execution.is_none(), "no order may be placed: {report:?}");

    assert_eq!(harness.manager.tracker().open_count(), 0);
    assert_eq!(harness.exchange.live_order_count(), 0);
    assert!((harness.exchange.net_position()).abs() < 1e-12);
}

/// A broken bar feed fails the cycle with a status; it never panics and
/// never mutates trading state.
#[tokio::test]
async fn missing_market_data_fails_cleanly() {
    let state_dir = temp_state_dir();
    let harness = build_harness(
        test_config(&state_dir),
        fixed_ensemble(DegradationLevel::Full, [0.1, 0.2, 0.7]),
        trending_bars(400, 10_000.0, 0.004),
        supporting_bars(120, 9_000.0, 0.003),
    );
    // Wipe the primary feed after wiring.
    harness.exchange.set_bars(Timeframe::M15, Vec::new());

    let report = harness.manager.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Failed);
    assert_ne!(report.status.code(), 0);
    assert!(report.error.is_some());
    assert_eq!(harness.manager.tracker().open_count(), 0);
    assert_eq!(harness.exchange.live_order_count(), 0);
}

/// Too little history is rejected at the feed boundary before any state is
/// touched; the next cycle simply retries.
#[tokio::test]
async fn short_history_aborts_before_trading_state() {
    let state_dir = temp_state_dir();
    let harness = build_harness(
        test_config(&state_dir),
        fixed_ensemble(DegradationLevel::Full, [0.1, 0.2, 0.7]),
        trending_bars(120, 10_000.0, 0.004), // below the 200-bar minimum
        supporting_bars(120, 9_000.0, 0.003),
    );

    let report = harness.manager.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Failed, "{report:?}");
    assert!(
        report.error.as_deref().unwrap_or("").contains("insufficient"),
        "{report:?}"
    );
}
