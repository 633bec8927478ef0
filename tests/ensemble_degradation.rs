// =============================================================================
// Ensemble degradation ladder — basic keeps trading, uniform disables entries
// =============================================================================

mod common;

use common::*;
use meridian_bot::cycle::CycleStatus;
use meridian_bot::features::FeatureManager;
use meridian_bot::ml::{DegradationLevel, ModelCache, StackingEnsemble};
use meridian_bot::types::Side;

/// Level 1: the 49-feature basic ensemble (strategy-signal columns dropped)
/// still produces entries.
#[tokio::test]
async fn basic_ensemble_continues_trading() {
    let state_dir = temp_state_dir();
    let harness = build_harness(
        test_config(&state_dir),
        fixed_ensemble(DegradationLevel::Basic, [0.1, 0.2, 0.7]),
        trending_bars(400, 10_000.0, 0.004),
        supporting_bars(120, 9_000.0, 0.003),
    );

    let report = harness.manager.run_cycle().await;

    assert_eq!(report.status, CycleStatus::Completed, "{report:?}");
    assert_eq!(report.decision, Some(Side::Buy), "{report:?}");
    assert!(
        report.execution.as_deref().unwrap_or("").starts_with("entered"),
        "level 1 must still trade: {report:?}"
    );
    assert_eq!(harness.manager.tracker().open_count(), 1);
}

/// Level 2: the uniform fallback runs cycles but produces only HOLD —
/// entries are structurally disabled at the risk gate.
#[tokio::test]
async fn uniform_fallback_runs_hold_only_cycles() {
    let state_dir = temp_state_dir();
    let harness = build_harness(
        test_config(&state_dir),
        StackingEnsemble::uniform(),
        trending_bars(400, 10_000.0, 0.004), // a market that would otherwise BUY
        supporting_bars(120, 9_000.0, 0.003),
    );

    for _ in 0..3 {
        let report = harness.manager.run_cycle().await;
        assert_eq!(report.status, CycleStatus::Completed, "{report:?}");
        assert_eq!(report.decision, Some(Side::Hold), "{report:?}");
        assert_eq!(report.rejection.as_deref(), Some("entries_disabled"));
        assert!(report.execution.is_none());
    }

    assert_eq!(harness.manager.tracker().open_count(), 0);
    assert_eq!(harness.exchange.live_order_count(), 0);
}

/// Ladder bottom: with no artifacts on disk the cache starts (and reloads)
/// at the uniform level rather than failing.
#[test]
fn empty_models_dir_falls_to_uniform() {
    let manager = FeatureManager::from_schema_file(schema_path()).unwrap();
    let dir = temp_state_dir();

    let cache = ModelCache::load(&dir, &manager);
    assert_eq!(cache.level(), DegradationLevel::Uniform);
    assert_eq!(cache.reload(&manager), DegradationLevel::Uniform);

    std::fs::remove_dir_all(&dir).ok();
}

/// Metadata whose feature order diverges from the canonical schema must not
/// be trusted — the loader falls through to uniform.
#[test]
fn divergent_metadata_is_rejected() {
    let manager = FeatureManager::from_schema_file(schema_path()).unwrap();
    let dir = temp_state_dir();

    let mut names: Vec<String> = manager.feature_names().to_vec();
    names.swap(0, 1);
    let metadata = serde_json::json!({
        "version": "9.9.9",
        "feature_order": names,
    });
    std::fs::write(
        dir.join("metadata.json"),
        serde_json::to_string_pretty(&metadata).unwrap(),
    )
    .unwrap();

    let cache = ModelCache::load(&dir, &manager);
    assert_eq!(cache.level(), DegradationLevel::Uniform);

    std::fs::remove_dir_all(&dir).ok();
}
