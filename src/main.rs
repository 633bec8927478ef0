// =============================================================================
// Meridian Margin Core — Main Entry Point
// =============================================================================
//
// The engine starts in paper mode unless the configuration explicitly says
// live. Credentials come from the environment; the config file carries no
// secrets.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meridian_bot::config::BotConfig;
use meridian_bot::cycle::TradingCycleManager;
use meridian_bot::exchange::{BitbankClient, ExchangeApi, PaperBridge};
use meridian_bot::features::FeatureManager;
use meridian_bot::ml::ModelCache;
use meridian_bot::notify::Notifier;
use meridian_bot::position::PositionTracker;
use meridian_bot::risk::RiskManager;
use meridian_bot::strategies::{build_strategies, StrategyManager};
use meridian_bot::types::TradeMode;

/// Simulated margin for paper sessions with no persisted state yet.
const DEFAULT_PAPER_MARGIN_JPY: f64 = 1_000_000.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("MERIDIAN_CONFIG").unwrap_or_else(|_| "config/bot_config.json".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        BotConfig::load(&config_path)
            .with_context(|| format!("configuration at {config_path} is invalid"))?
    } else {
        let config = BotConfig::default();
        config.validate().context("default configuration invalid")?;
        config
    };

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║          Meridian Margin Core — Starting Up              ║");
    info!("╚══════════════════════════════════════════════════════════╝");
    info!(mode = %config.mode, pair = %config.pair, "configuration active");

    // ── 2. Feature schema (fatal when unusable) ──────────────────────────
    let feature_manager = Arc::new(
        FeatureManager::from_schema_file(&config.features.schema_path)
            .context("canonical feature schema unusable — refusing to start")?,
    );

    // ── 3. Models ────────────────────────────────────────────────────────
    let models = Arc::new(ModelCache::load(&config.ml.models_dir, &feature_manager));
    info!(level = %models.level(), "ensemble ready");

    // ── 4. Exchange ──────────────────────────────────────────────────────
    let api_key = std::env::var("BITBANK_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("BITBANK_API_SECRET").unwrap_or_default();

    let exchange: Arc<dyn ExchangeApi> = match config.mode {
        TradeMode::Live => {
            if api_key.is_empty() || api_secret.is_empty() {
                anyhow::bail!("live mode requires BITBANK_API_KEY / BITBANK_API_SECRET");
            }
            Arc::new(BitbankClient::new(api_key, api_secret))
        }
        TradeMode::Paper | TradeMode::Backtest => {
            // Market data from the public API, orders simulated locally.
            let market: Arc<dyn ExchangeApi> = Arc::new(BitbankClient::new(api_key, api_secret));
            Arc::new(PaperBridge::new(market, DEFAULT_PAPER_MARGIN_JPY))
        }
    };

    // ── 5. Strategies & weighting ────────────────────────────────────────
    let strategies = Arc::new(build_strategies(&config.strategies));
    let strategy_manager = StrategyManager::new(&config.dynamic_strategy_selection)
        .context("strategy weight mapping invalid")?;

    // ── 6. Risk ──────────────────────────────────────────────────────────
    let initial_balance = match exchange.get_balance().await {
        Ok(balance) if balance.total > 0.0 => balance.total,
        Ok(_) | Err(_) => {
            warn!("balance unavailable at startup — using paper default");
            DEFAULT_PAPER_MARGIN_JPY
        }
    };
    let risk = RiskManager::new(
        config.risk.clone(),
        config.position.clone(),
        config.balance_alert.clone(),
        config.execution.price_tick,
        config.state_dir.clone(),
        config.mode,
        initial_balance,
        chrono::Utc::now(),
    )
    .context("drawdown state unusable")?;

    // ── 7. Assemble the cycle manager ────────────────────────────────────
    let tracker = Arc::new(PositionTracker::new(config.pair.clone()));
    let notifier = Arc::new(Notifier::new(config.notifications.webhook_url.clone()));
    let interval_secs = config.execution.cycle_interval_seconds;

    let manager = Arc::new(TradingCycleManager::new(
        config,
        exchange,
        feature_manager,
        strategies,
        strategy_manager,
        models,
        risk,
        tracker,
        notifier,
    ));

    // ── 8. Scheduler loop ────────────────────────────────────────────────
    info!(interval_secs, "scheduler running — press Ctrl+C to stop");

    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = manager.run_cycle().await;
                if report.status.code() != 0 {
                    warn!(cycle_id = %report.cycle_id, code = report.status.code(), "cycle did not complete");
                }
            }
            _ = shutdown_signal() => {
                break;
            }
        }
    }

    // ── 9. Graceful shutdown ─────────────────────────────────────────────
    warn!("shutdown signal received — stopping gracefully");

    // Cancel any resting maker entry; bounded so shutdown cannot hang on a
    // wedged exchange call.
    match tokio::time::timeout(
        Duration::from_secs(15),
        manager.execution().cancel_pending_entries(),
    )
    .await
    {
        Ok(Ok(())) => info!("pending entries cancelled"),
        Ok(Err(e)) => error!(error = %e, "failed to cancel pending entries"),
        Err(_) => error!("timed out cancelling pending entries"),
    }

    manager.persist_state();
    info!("Meridian Margin Core shut down complete.");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
