// =============================================================================
// Configuration — every tunable of the trading core, externalized
// =============================================================================
//
// No magic numbers live in component code: thresholds, weights, multipliers,
// and limits are all defined here, loaded from a JSON file, and validated once
// at startup. Validation failures are fatal at startup and never occur at
// cycle time.
//
// Persistence uses an atomic tmp + rename pattern. All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file.
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::ConfigError;
use crate::regime::REGIME_KEYS;
use crate::strategies::STRATEGY_NAMES;
use crate::types::TradeMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_pair() -> String {
    "btc_jpy".to_string()
}

fn default_state_dir() -> String {
    "state".to_string()
}

fn default_cycle_interval_seconds() -> u64 {
    300
}

fn default_cycle_budget_seconds() -> u64 {
    120
}

fn default_max_order_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_verify_after_seconds() -> u64 {
    30
}

fn default_reconcile_interval_seconds() -> u64 {
    600
}

fn default_order_poll_interval_ms() -> u64 {
    500
}

fn default_price_tick() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_maker_wait_seconds() -> u64 {
    20
}

fn default_max_improvements() -> u32 {
    2
}

fn default_improvement_ticks() -> f64 {
    1.0
}

fn default_confidence_threshold() -> f64 {
    0.45
}

fn default_min_ml_confidence() -> f64 {
    0.40
}

fn default_high_confidence_threshold() -> f64 {
    0.80
}

fn default_agreement_bonus() -> f64 {
    1.1
}

fn default_disagreement_penalty() -> f64 {
    0.85
}

fn default_hold_conversion_threshold() -> f64 {
    0.35
}

fn default_strategy_weight() -> f64 {
    0.7
}

fn default_ml_weight() -> f64 {
    0.3
}

fn default_models_dir() -> String {
    "models".to_string()
}

fn default_schema_path() -> String {
    "config/feature_schema.json".to_string()
}

fn default_min_primary_bars() -> usize {
    200
}

fn default_fetch_limit() -> usize {
    240
}

fn default_regime_window() -> usize {
    50
}

fn default_adx_trend_threshold() -> f64 {
    25.0
}

fn default_di_diff_threshold() -> f64 {
    5.0
}

fn default_high_vol_threshold() -> f64 {
    0.5
}

fn default_bb_narrow_threshold() -> f64 {
    1.2
}

fn default_narrow_range_threshold() -> f64 {
    1.5
}

fn default_min_profit_rate() -> f64 {
    0.003
}

fn default_kelly_min_trades() -> usize {
    5
}

fn default_kelly_max_position_ratio() -> f64 {
    0.3
}

fn default_kelly_safety_factor() -> f64 {
    0.5
}

fn default_bootstrap_position_ratio() -> f64 {
    0.05
}

fn default_kelly_lookback_trades() -> usize {
    20
}

fn default_conditional_threshold() -> f64 {
    0.5
}

fn default_deny_threshold() -> f64 {
    0.8
}

fn default_max_drawdown_threshold() -> f64 {
    0.2
}

fn default_daily_loss_limit() -> f64 {
    0.05
}

fn default_consecutive_loss_limit() -> u32 {
    5
}

fn default_pause_duration_minutes() -> i64 {
    720
}

fn default_cooldown_seconds() -> i64 {
    3600
}

fn default_cooldown_bypass_strength() -> f64 {
    0.7
}

fn default_min_lot() -> f64 {
    0.0001
}

fn default_amount_precision() -> u32 {
    4
}

fn default_min_required_margin() -> f64 {
    14_000.0
}

fn default_maintenance_margin_ratio() -> f64 {
    5.0
}

// =============================================================================
// Execution
// =============================================================================

/// Maker-preferred order placement policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerConfig {
    /// Submit entries with the post-only flag so they never take liquidity.
    #[serde(default = "default_true")]
    pub post_only: bool,

    /// Seconds to wait for a maker fill before re-pricing or downgrading.
    #[serde(default = "default_maker_wait_seconds")]
    pub wait_seconds: u64,

    /// Bounded number of price-improvement steps when the book moves away.
    #[serde(default = "default_max_improvements")]
    pub max_improvements: u32,

    /// Size of one improvement step, in price ticks.
    #[serde(default = "default_improvement_ticks")]
    pub improvement_ticks: f64,

    /// Downgrade to a taker (market) entry once maker attempts are exhausted.
    #[serde(default = "default_true")]
    pub taker_fallback: bool,
}

impl Default for MakerConfig {
    fn default() -> Self {
        Self {
            post_only: true,
            wait_seconds: default_maker_wait_seconds(),
            max_improvements: default_max_improvements(),
            improvement_ticks: default_improvement_ticks(),
            taker_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_cycle_interval_seconds")]
    pub cycle_interval_seconds: u64,

    /// Hard wall-clock budget for one cycle.
    #[serde(default = "default_cycle_budget_seconds")]
    pub cycle_budget_seconds: u64,

    /// Bounded retry count for transient / auth-class order errors.
    #[serde(default = "default_max_order_retries")]
    pub max_order_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Delay before the post-placement verification probe asserts the TP/SL
    /// pair is live at the expected prices.
    #[serde(default = "default_verify_after_seconds")]
    pub verify_after_seconds: u64,

    /// Interval of the periodic position/order reconciliation pass.
    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,

    #[serde(default = "default_order_poll_interval_ms")]
    pub order_poll_interval_ms: u64,

    /// Exchange price tick (1 JPY for btc_jpy).
    #[serde(default = "default_price_tick")]
    pub price_tick: f64,

    #[serde(default)]
    pub maker: MakerConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cycle_interval_seconds: default_cycle_interval_seconds(),
            cycle_budget_seconds: default_cycle_budget_seconds(),
            max_order_retries: default_max_order_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            verify_after_seconds: default_verify_after_seconds(),
            reconcile_interval_seconds: default_reconcile_interval_seconds(),
            order_poll_interval_ms: default_order_poll_interval_ms(),
            price_tick: default_price_tick(),
            maker: MakerConfig::default(),
        }
    }
}

// =============================================================================
// ML / signal integration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    /// Minimum integrated confidence for a directional decision to survive.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Below this ML confidence the prediction is ignored entirely.
    #[serde(default = "default_min_ml_confidence")]
    pub min_ml_confidence: f64,

    /// At or above this ML confidence a disagreement swings to the ML side.
    #[serde(default = "default_high_confidence_threshold")]
    pub high_confidence_threshold: f64,

    #[serde(default = "default_agreement_bonus")]
    pub agreement_bonus: f64,

    #[serde(default = "default_disagreement_penalty")]
    pub disagreement_penalty: f64,

    /// Integrated confidence below this is converted to HOLD.
    #[serde(default = "default_hold_conversion_threshold")]
    pub hold_conversion_threshold: f64,

    #[serde(default = "default_strategy_weight")]
    pub strategy_weight: f64,

    #[serde(default = "default_ml_weight")]
    pub ml_weight: f64,

    /// Directory holding the ensemble ONNX artifacts and metadata.
    #[serde(default = "default_models_dir")]
    pub models_dir: String,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            min_ml_confidence: default_min_ml_confidence(),
            high_confidence_threshold: default_high_confidence_threshold(),
            agreement_bonus: default_agreement_bonus(),
            disagreement_penalty: default_disagreement_penalty(),
            hold_conversion_threshold: default_hold_conversion_threshold(),
            strategy_weight: default_strategy_weight(),
            ml_weight: default_ml_weight(),
            models_dir: default_models_dir(),
        }
    }
}

// =============================================================================
// Features
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Canonical feature schema file — the single authority for feature
    /// identity and order. Missing or invalid schema is fatal at startup.
    #[serde(default = "default_schema_path")]
    pub schema_path: String,

    /// Minimum contiguous primary-timeframe bars required to initialize.
    #[serde(default = "default_min_primary_bars")]
    pub min_primary_bars: usize,

    /// How many bars to request per timeframe (a little above the minimum so
    /// that dropping the partial current bar never starves the pipeline).
    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            schema_path: default_schema_path(),
            min_primary_bars: default_min_primary_bars(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

// =============================================================================
// Regime classification
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Look-back window (bars) for all regime metrics.
    #[serde(default = "default_regime_window")]
    pub window: usize,

    /// ADX at or above this, with a persistent DI differential, is trending.
    #[serde(default = "default_adx_trend_threshold")]
    pub adx_trend_threshold: f64,

    /// Minimum |+DI − −DI| for the trending rule.
    #[serde(default = "default_di_diff_threshold")]
    pub di_diff_threshold: f64,

    /// Realized per-bar volatility (percent) above this is high-volatility.
    #[serde(default = "default_high_vol_threshold")]
    pub high_vol_threshold: f64,

    /// Bollinger band width (percent of middle) below this is narrow.
    #[serde(default = "default_bb_narrow_threshold")]
    pub bb_narrow_threshold: f64,

    /// Window price range (percent of close) below this is narrow.
    #[serde(default = "default_narrow_range_threshold")]
    pub narrow_range_threshold: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window: default_regime_window(),
            adx_trend_threshold: default_adx_trend_threshold(),
            di_diff_threshold: default_di_diff_threshold(),
            high_vol_threshold: default_high_vol_threshold(),
            bb_narrow_threshold: default_bb_narrow_threshold(),
            narrow_range_threshold: default_narrow_range_threshold(),
        }
    }
}

// =============================================================================
// Strategies
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrBasedConfig {
    /// Fraction of ATR consumed by the current bar that flags depletion.
    #[serde(default = "default_atr_consumption_threshold")]
    pub consumption_threshold: f64,
    #[serde(default = "default_base_confidence_half")]
    pub base_confidence: f64,
}

fn default_atr_consumption_threshold() -> f64 {
    0.7
}

fn default_base_confidence_half() -> f64 {
    0.5
}

fn default_base_confidence_mid() -> f64 {
    0.45
}

impl Default for AtrBasedConfig {
    fn default() -> Self {
        Self {
            consumption_threshold: default_atr_consumption_threshold(),
            base_confidence: default_base_confidence_half(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BbReversalConfig {
    /// Band position at or below this is a lower-band touch.
    #[serde(default = "default_band_lower_threshold")]
    pub lower_threshold: f64,
    #[serde(default = "default_band_upper_threshold")]
    pub upper_threshold: f64,
    #[serde(default = "default_bb_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_bb_rsi_overbought")]
    pub rsi_overbought: f64,
    #[serde(default = "default_base_confidence_half")]
    pub base_confidence: f64,
}

fn default_band_lower_threshold() -> f64 {
    0.05
}

fn default_band_upper_threshold() -> f64 {
    0.95
}

fn default_bb_rsi_oversold() -> f64 {
    35.0
}

fn default_bb_rsi_overbought() -> f64 {
    65.0
}

impl Default for BbReversalConfig {
    fn default() -> Self {
        Self {
            lower_threshold: default_band_lower_threshold(),
            upper_threshold: default_band_upper_threshold(),
            rsi_oversold: default_bb_rsi_oversold(),
            rsi_overbought: default_bb_rsi_overbought(),
            base_confidence: default_base_confidence_half(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StochasticReversalConfig {
    #[serde(default = "default_stoch_oversold")]
    pub oversold: f64,
    #[serde(default = "default_stoch_overbought")]
    pub overbought: f64,
    #[serde(default = "default_stoch_rsi_oversold")]
    pub rsi_oversold: f64,
    #[serde(default = "default_stoch_rsi_overbought")]
    pub rsi_overbought: f64,
    /// Reject reversal entries into a bar moving faster than this (percent).
    #[serde(default = "default_max_abs_price_change_pct")]
    pub max_abs_price_change_pct: f64,
    #[serde(default = "default_base_confidence_mid")]
    pub base_confidence: f64,
}

fn default_stoch_oversold() -> f64 {
    20.0
}

fn default_stoch_overbought() -> f64 {
    80.0
}

fn default_stoch_rsi_oversold() -> f64 {
    40.0
}

fn default_stoch_rsi_overbought() -> f64 {
    60.0
}

fn default_max_abs_price_change_pct() -> f64 {
    1.0
}

impl Default for StochasticReversalConfig {
    fn default() -> Self {
        Self {
            oversold: default_stoch_oversold(),
            overbought: default_stoch_overbought(),
            rsi_oversold: default_stoch_rsi_oversold(),
            rsi_overbought: default_stoch_rsi_overbought(),
            max_abs_price_change_pct: default_max_abs_price_change_pct(),
            base_confidence: default_base_confidence_mid(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DonchianChannelConfig {
    #[serde(default = "default_band_lower_threshold")]
    pub lower_threshold: f64,
    #[serde(default = "default_band_upper_threshold")]
    pub upper_threshold: f64,
    /// RSI beyond these levels adds a confidence bonus to the edge reversal.
    #[serde(default = "default_donchian_rsi_oversold")]
    pub rsi_bonus_oversold: f64,
    #[serde(default = "default_donchian_rsi_overbought")]
    pub rsi_bonus_overbought: f64,
    #[serde(default = "default_base_confidence_mid")]
    pub base_confidence: f64,
}

fn default_donchian_rsi_oversold() -> f64 {
    30.0
}

fn default_donchian_rsi_overbought() -> f64 {
    70.0
}

impl Default for DonchianChannelConfig {
    fn default() -> Self {
        Self {
            lower_threshold: default_band_lower_threshold(),
            upper_threshold: default_band_upper_threshold(),
            rsi_bonus_oversold: default_donchian_rsi_oversold(),
            rsi_bonus_overbought: default_donchian_rsi_overbought(),
            base_confidence: default_base_confidence_mid(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacdEmaConfig {
    #[serde(default = "default_base_confidence_half")]
    pub base_confidence: f64,
}

impl Default for MacdEmaConfig {
    fn default() -> Self {
        Self {
            base_confidence: default_base_confidence_half(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdxTrendConfig {
    #[serde(default = "default_adx_trend_threshold")]
    pub adx_threshold: f64,
    #[serde(default = "default_di_diff_threshold")]
    pub di_diff_threshold: f64,
    #[serde(default = "default_base_confidence_half")]
    pub base_confidence: f64,
}

impl Default for AdxTrendConfig {
    fn default() -> Self {
        Self {
            adx_threshold: default_adx_trend_threshold(),
            di_diff_threshold: default_di_diff_threshold(),
            base_confidence: default_base_confidence_half(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default)]
    pub atr_based: AtrBasedConfig,
    #[serde(default)]
    pub bb_reversal: BbReversalConfig,
    #[serde(default)]
    pub stochastic_reversal: StochasticReversalConfig,
    #[serde(default)]
    pub donchian_channel: DonchianChannelConfig,
    #[serde(default)]
    pub macd_ema: MacdEmaConfig,
    #[serde(default)]
    pub adx_trend: AdxTrendConfig,
}

// =============================================================================
// Regime-aware strategy weighting
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicStrategySelection {
    /// regime name → (strategy name → weight). Weights per regime sum to 1.
    #[serde(default = "default_regime_strategy_mapping")]
    pub regime_strategy_mapping: HashMap<String, HashMap<String, f64>>,
}

fn weights(entries: [(&str, f64); 6]) -> HashMap<String, f64> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn default_regime_strategy_mapping() -> HashMap<String, HashMap<String, f64>> {
    let mut map = HashMap::new();
    map.insert(
        "tight_range".to_string(),
        weights([
            ("atr_based", 0.25),
            ("bb_reversal", 0.25),
            ("stochastic_reversal", 0.20),
            ("donchian_channel", 0.20),
            ("macd_ema", 0.05),
            ("adx_trend", 0.05),
        ]),
    );
    map.insert(
        "normal_range".to_string(),
        weights([
            ("atr_based", 0.20),
            ("bb_reversal", 0.20),
            ("stochastic_reversal", 0.15),
            ("donchian_channel", 0.15),
            ("macd_ema", 0.15),
            ("adx_trend", 0.15),
        ]),
    );
    map.insert(
        "trending".to_string(),
        weights([
            ("atr_based", 0.05),
            ("bb_reversal", 0.05),
            ("stochastic_reversal", 0.05),
            ("donchian_channel", 0.05),
            ("macd_ema", 0.40),
            ("adx_trend", 0.40),
        ]),
    );
    map.insert(
        "high_volatility".to_string(),
        weights([
            ("atr_based", 0.25),
            ("bb_reversal", 0.20),
            ("stochastic_reversal", 0.15),
            ("donchian_channel", 0.10),
            ("macd_ema", 0.15),
            ("adx_trend", 0.15),
        ]),
    );
    map
}

impl Default for DynamicStrategySelection {
    fn default() -> Self {
        Self {
            regime_strategy_mapping: default_regime_strategy_mapping(),
        }
    }
}

// =============================================================================
// Risk
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossConfig {
    #[serde(default = "default_atr_multiplier_low")]
    pub atr_multiplier_low_volatility: f64,
    #[serde(default = "default_atr_multiplier_normal")]
    pub atr_multiplier_normal_volatility: f64,
    #[serde(default = "default_atr_multiplier_high")]
    pub atr_multiplier_high_volatility: f64,
}

fn default_atr_multiplier_low() -> f64 {
    1.2
}

fn default_atr_multiplier_normal() -> f64 {
    1.5
}

fn default_atr_multiplier_high() -> f64 {
    2.0
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            atr_multiplier_low_volatility: default_atr_multiplier_low(),
            atr_multiplier_normal_volatility: default_atr_multiplier_normal(),
            atr_multiplier_high_volatility: default_atr_multiplier_high(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitConfig {
    /// regime name → TP distance as a multiple of the SL distance.
    #[serde(default = "default_risk_reward_ratio")]
    pub risk_reward_ratio: HashMap<String, f64>,

    /// Minimum TP distance as a fraction of the entry price.
    #[serde(default = "default_min_profit_rate")]
    pub min_profit_rate: f64,
}

fn default_risk_reward_ratio() -> HashMap<String, f64> {
    [
        ("tight_range", 1.5),
        ("normal_range", 2.0),
        ("trending", 2.5),
        ("high_volatility", 2.0),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            risk_reward_ratio: default_risk_reward_ratio(),
            min_profit_rate: default_min_profit_rate(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KellyConfig {
    /// Minimum closed-trade sample before Kelly sizing replaces the bootstrap.
    #[serde(default = "default_kelly_min_trades")]
    pub min_trades: usize,

    /// Upper clamp on the raw Kelly fraction.
    #[serde(default = "default_kelly_max_position_ratio")]
    pub max_position_ratio: f64,

    /// Applied after clamping (half-Kelly by default).
    #[serde(default = "default_kelly_safety_factor")]
    pub safety_factor: f64,

    /// Equity fraction used until the minimum sample size is reached.
    #[serde(default = "default_bootstrap_position_ratio")]
    pub bootstrap_position_ratio: f64,

    /// How many recent closed trades feed the win-rate estimate.
    #[serde(default = "default_kelly_lookback_trades")]
    pub lookback_trades: usize,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            min_trades: default_kelly_min_trades(),
            max_position_ratio: default_kelly_max_position_ratio(),
            safety_factor: default_kelly_safety_factor(),
            bootstrap_position_ratio: default_bootstrap_position_ratio(),
            lookback_trades: default_kelly_lookback_trades(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoreConfig {
    /// Anomaly score at or above this halves the position size.
    #[serde(default = "default_conditional_threshold")]
    pub conditional_threshold: f64,

    /// Anomaly score at or above this rejects the entry outright.
    #[serde(default = "default_deny_threshold")]
    pub deny_threshold: f64,
}

impl Default for RiskScoreConfig {
    fn default() -> Self {
        Self {
            conditional_threshold: default_conditional_threshold(),
            deny_threshold: default_deny_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownConfig {
    /// Peak-to-current equity decline that pauses trading.
    #[serde(default = "default_max_drawdown_threshold")]
    pub max_drawdown_threshold: f64,

    /// Daily loss as a fraction of the day's starting balance that pauses
    /// trading for the rest of the day.
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: f64,

    #[serde(default = "default_consecutive_loss_limit")]
    pub consecutive_loss_limit: u32,

    /// How long a pause lasts before trading auto-resumes.
    #[serde(default = "default_pause_duration_minutes")]
    pub pause_duration_minutes: i64,
}

impl Default for DrawdownConfig {
    fn default() -> Self {
        Self {
            max_drawdown_threshold: default_max_drawdown_threshold(),
            daily_loss_limit: default_daily_loss_limit(),
            consecutive_loss_limit: default_consecutive_loss_limit(),
            pause_duration_minutes: default_pause_duration_minutes(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default)]
    pub stop_loss: StopLossConfig,
    #[serde(default)]
    pub take_profit: TakeProfitConfig,
    #[serde(default)]
    pub kelly: KellyConfig,
    #[serde(default)]
    pub risk_score: RiskScoreConfig,
    #[serde(default)]
    pub drawdown: DrawdownConfig,
}

// =============================================================================
// Positions
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    /// regime name → maximum concurrently open positions.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: HashMap<String, u32>,

    /// Cooldown window after any closed trade.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: i64,

    /// Composite trend-strength score at or above this bypasses the cooldown.
    #[serde(default = "default_cooldown_bypass_strength")]
    pub cooldown_bypass_strength: f64,

    /// Exchange minimum order size (BTC).
    #[serde(default = "default_min_lot")]
    pub min_lot: f64,

    /// Decimal places the exchange accepts for order amounts.
    #[serde(default = "default_amount_precision")]
    pub amount_precision: u32,
}

fn default_max_open_positions() -> HashMap<String, u32> {
    [
        ("tight_range", 1),
        ("normal_range", 2),
        ("trending", 3),
        ("high_volatility", 1),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            max_open_positions: default_max_open_positions(),
            cooldown_seconds: default_cooldown_seconds(),
            cooldown_bypass_strength: default_cooldown_bypass_strength(),
            min_lot: default_min_lot(),
            amount_precision: default_amount_precision(),
        }
    }
}

// =============================================================================
// Balance / margin alerts, notifications, logging
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceAlertConfig {
    /// Entries are gated when the available margin (JPY) falls below this.
    #[serde(default = "default_min_required_margin")]
    pub min_required_margin: f64,

    /// Used when the exchange reports a null maintenance margin ratio
    /// (5.0 = 500 %).
    #[serde(default = "default_maintenance_margin_ratio")]
    pub default_maintenance_margin_ratio: f64,
}

impl Default for BalanceAlertConfig {
    fn default() -> Self {
        Self {
            min_required_margin: default_min_required_margin(),
            default_maintenance_margin_ratio: default_maintenance_margin_ratio(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Webhook receiving critical alerts. Disabled when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON-lines records instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

// =============================================================================
// BotConfig
// =============================================================================

/// Top-level configuration for the Meridian trading core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default)]
    pub mode: TradeMode,

    #[serde(default = "default_pair")]
    pub pair: String,

    #[serde(default = "default_state_dir")]
    pub state_dir: String,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub ml: MlConfig,

    #[serde(default)]
    pub features: FeatureConfig,

    #[serde(default)]
    pub regime: RegimeConfig,

    #[serde(default)]
    pub strategies: StrategiesConfig,

    #[serde(default)]
    pub dynamic_strategy_selection: DynamicStrategySelection,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub position: PositionConfig,

    #[serde(default)]
    pub balance_alert: BalanceAlertConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: TradeMode::Paper,
            pair: default_pair(),
            state_dir: default_state_dir(),
            execution: ExecutionConfig::default(),
            ml: MlConfig::default(),
            features: FeatureConfig::default(),
            regime: RegimeConfig::default(),
            strategies: StrategiesConfig::default(),
            dynamic_strategy_selection: DynamicStrategySelection::default(),
            risk: RiskConfig::default(),
            position: PositionConfig::default(),
            balance_alert: BalanceAlertConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from a JSON file and validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;

        info!(
            path = %path.display(),
            mode = %config.mode,
            pair = %config.pair,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Persist the configuration using an atomic write (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, path)?;

        info!(path = %path.display(), "configuration saved (atomic)");
        Ok(())
    }

    /// Validate invariants that component code relies on. Called at startup;
    /// a failure here is fatal and must never surface at cycle time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

        for regime in REGIME_KEYS {
            let weights = self
                .dynamic_strategy_selection
                .regime_strategy_mapping
                .get(regime)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!("missing strategy weights for regime {regime}"))
                })?;

            let mut sum = 0.0;
            for name in STRATEGY_NAMES {
                let w = weights.get(name).ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "regime {regime} is missing a weight for strategy {name}"
                    ))
                })?;
                if !(0.0..=1.0).contains(w) {
                    return Err(ConfigError::Invalid(format!(
                        "weight for {regime}/{name} must be in [0,1], got {w}"
                    )));
                }
                sum += w;
            }
            if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return Err(ConfigError::Invalid(format!(
                    "strategy weights for regime {regime} sum to {sum}, expected 1.0"
                )));
            }

            if !self.risk.take_profit.risk_reward_ratio.contains_key(regime) {
                return Err(ConfigError::Invalid(format!(
                    "missing risk_reward_ratio for regime {regime}"
                )));
            }
            if !self.position.max_open_positions.contains_key(regime) {
                return Err(ConfigError::Invalid(format!(
                    "missing max_open_positions for regime {regime}"
                )));
            }
        }

        for (regime, rr) in &self.risk.take_profit.risk_reward_ratio {
            if *rr <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "risk_reward_ratio for {regime} must be positive, got {rr}"
                )));
            }
        }

        let k = &self.risk.kelly;
        if !(0.0 < k.safety_factor && k.safety_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "kelly.safety_factor must be in (0,1], got {}",
                k.safety_factor
            )));
        }
        if !(0.0 < k.max_position_ratio && k.max_position_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "kelly.max_position_ratio must be in (0,1], got {}",
                k.max_position_ratio
            )));
        }

        let ml = &self.ml;
        if (ml.strategy_weight + ml.ml_weight - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::Invalid(format!(
                "ml.strategy_weight + ml.ml_weight must equal 1.0, got {}",
                ml.strategy_weight + ml.ml_weight
            )));
        }
        if ml.agreement_bonus <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "ml.agreement_bonus must be > 1.0, got {}",
                ml.agreement_bonus
            )));
        }
        if !(0.0..1.0).contains(&ml.disagreement_penalty) {
            return Err(ConfigError::Invalid(format!(
                "ml.disagreement_penalty must be in [0,1), got {}",
                ml.disagreement_penalty
            )));
        }

        if self.execution.cycle_budget_seconds >= self.execution.cycle_interval_seconds {
            return Err(ConfigError::Invalid(format!(
                "cycle_budget_seconds ({}) must be below cycle_interval_seconds ({})",
                self.execution.cycle_budget_seconds, self.execution.cycle_interval_seconds
            )));
        }

        if self.risk.risk_score.deny_threshold < self.risk.risk_score.conditional_threshold {
            return Err(ConfigError::Invalid(
                "risk_score.deny_threshold must be >= conditional_threshold".to_string(),
            ));
        }

        if self.position.min_lot <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "position.min_lot must be positive, got {}",
                self.position.min_lot
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        BotConfig::default().validate().expect("defaults must pass");
    }

    #[test]
    fn default_regime_weights_sum_to_one() {
        let mapping = default_regime_strategy_mapping();
        for regime in REGIME_KEYS {
            let sum: f64 = mapping[regime].values().sum();
            assert!(
                (sum - 1.0).abs() < 1e-9,
                "weights for {regime} sum to {sum}"
            );
        }
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: BotConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.mode, TradeMode::Paper);
        assert_eq!(cfg.pair, "btc_jpy");
        assert_eq!(cfg.execution.cycle_interval_seconds, 300);
        assert_eq!(cfg.execution.cycle_budget_seconds, 120);
        assert_eq!(cfg.risk.kelly.min_trades, 5);
        assert!((cfg.position.cooldown_bypass_strength - 0.7).abs() < f64::EPSILON);
        assert!((cfg.balance_alert.min_required_margin - 14_000.0).abs() < f64::EPSILON);
        cfg.validate().unwrap();
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "mode": "live", "pair": "btc_jpy", "ml": { "strategy_weight": 0.6, "ml_weight": 0.4 } }"#;
        let cfg: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.mode, TradeMode::Live);
        assert!((cfg.ml.strategy_weight - 0.6).abs() < f64::EPSILON);
        assert!((cfg.ml.agreement_bonus - 1.1).abs() < f64::EPSILON);
        cfg.validate().unwrap();
    }

    #[test]
    fn unbalanced_regime_weights_rejected() {
        let mut cfg = BotConfig::default();
        cfg.dynamic_strategy_selection
            .regime_strategy_mapping
            .get_mut("trending")
            .unwrap()
            .insert("macd_ema".to_string(), 0.99);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_regime_weights_rejected() {
        let mut cfg = BotConfig::default();
        cfg.dynamic_strategy_selection
            .regime_strategy_mapping
            .remove("tight_range");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn ml_weights_must_sum_to_one() {
        let mut cfg = BotConfig::default();
        cfg.ml.strategy_weight = 0.8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn budget_must_fit_inside_interval() {
        let mut cfg = BotConfig::default();
        cfg.execution.cycle_budget_seconds = 400;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = BotConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: BotConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.pair, cfg2.pair);
        assert_eq!(
            cfg.execution.cycle_interval_seconds,
            cfg2.execution.cycle_interval_seconds
        );
        cfg2.validate().unwrap();
    }

    #[test]
    fn atomic_save_and_load() {
        let dir = std::env::temp_dir().join(format!("meridian-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bot_config.json");

        let cfg = BotConfig::default();
        cfg.save(&path).unwrap();
        let loaded = BotConfig::load(&path).unwrap();
        assert_eq!(loaded.pair, cfg.pair);

        std::fs::remove_dir_all(&dir).ok();
    }
}
