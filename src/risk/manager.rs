// =============================================================================
// RiskManager — gates, Kelly sizing, and stop/target computation
// =============================================================================
//
// Pipeline per integrated signal:
//   1. Gate checks, in order — any failure returns Rejected with a reason.
//      A rejection is a normal HOLD outcome, not an error.
//   2. Kelly sizing from recent closed trades (bootstrap below the minimum
//      sample), halved when the anomaly score crosses the conditional
//      threshold.
//   3. SL from the regime's ATR multiplier; TP from SL times the regime's
//      risk/reward ratio with the minimum-profit floor enforced. Prices are
//      rounded away from entry so rounding can never flip sides.
//
// The manager is the sole owner and writer of the DrawdownState.
// =============================================================================

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{BalanceAlertConfig, PositionConfig, RiskConfig};
use crate::errors::ConfigError;
use crate::ml::DegradationLevel;
use crate::regime::{MarketRegime, VolatilityBucket};
use crate::risk::drawdown::DrawdownState;
use crate::risk::kelly::kelly_fraction;
use crate::signal::IntegratedSignal;
use crate::types::{Side, TradeMode, TradingStatus};

/// A fully specified order the execution layer may place as-is.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovedOrder {
    pub side: Side,
    /// Base-currency size, rounded to the exchange lot.
    pub size: f64,
    pub entry_price_ref: f64,
    pub sl_price: f64,
    pub tp_price: f64,
    /// Anomaly score carried through for audit.
    pub risk_score: f64,
    pub kelly_fraction: f64,
    pub rationale: String,
}

/// Why an entry was rejected. Displayed as a stable snake_case token in logs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RejectReason {
    TradingPaused(TradingStatus),
    ConsecutiveLossCap,
    DailyLossCap,
    EntriesDisabled,
    NotDirectional,
    CooldownActive,
    PositionLimit,
    AnomalyDeny,
    InsufficientMargin,
    BelowMinimumLot,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TradingPaused(status) => write!(f, "trading_paused:{status}"),
            Self::ConsecutiveLossCap => write!(f, "consecutive_loss_cap"),
            Self::DailyLossCap => write!(f, "daily_loss_cap"),
            Self::EntriesDisabled => write!(f, "entries_disabled"),
            Self::NotDirectional => write!(f, "not_directional"),
            Self::CooldownActive => write!(f, "cooldown_active"),
            Self::PositionLimit => write!(f, "position_limit"),
            Self::AnomalyDeny => write!(f, "anomaly_deny"),
            Self::InsufficientMargin => write!(f, "insufficient_margin"),
            Self::BelowMinimumLot => write!(f, "below_minimum_lot"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum RiskVerdict {
    Approved(ApprovedOrder),
    Rejected(RejectReason),
}

impl RiskVerdict {
    pub fn approved(&self) -> Option<&ApprovedOrder> {
        match self {
            Self::Approved(order) => Some(order),
            Self::Rejected(_) => None,
        }
    }
}

/// Everything the risk pipeline needs to judge one signal.
#[derive(Debug, Clone)]
pub struct RiskInput {
    pub signal: IntegratedSignal,
    pub regime: MarketRegime,
    pub last_price: f64,
    pub atr: f64,
    /// Account equity in JPY.
    pub equity: f64,
    /// Available margin in JPY.
    pub available_margin: f64,
    /// Null from the exchange is normal; the configured default fills in.
    pub maintenance_margin_ratio: Option<f64>,
    pub open_positions: u32,
    pub anomaly_score: f64,
    pub ensemble_level: DegradationLevel,
    pub cooldown_active: bool,
    pub trend_strength: f64,
    pub now: DateTime<Utc>,
}

pub struct RiskManager {
    config: RiskConfig,
    position_config: PositionConfig,
    balance_config: BalanceAlertConfig,
    price_tick: f64,
    state: DrawdownState,
    recent_pnls: VecDeque<f64>,
    state_dir: PathBuf,
    mode: TradeMode,
}

impl RiskManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RiskConfig,
        position_config: PositionConfig,
        balance_config: BalanceAlertConfig,
        price_tick: f64,
        state_dir: impl Into<PathBuf>,
        mode: TradeMode,
        initial_balance: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let state_dir = state_dir.into();
        let state = DrawdownState::load_or_create(&state_dir, mode, initial_balance, now)?;
        Ok(Self {
            config,
            position_config,
            balance_config,
            price_tick,
            state,
            recent_pnls: VecDeque::new(),
            state_dir,
            mode,
        })
    }

    pub fn state(&self) -> &DrawdownState {
        &self.state
    }

    /// Record a closed trade, run pause transitions, persist the state.
    /// Returns the pause status when this trade tripped one.
    pub fn record_closed_trade(&mut self, pnl: f64, now: DateTime<Utc>) -> Option<TradingStatus> {
        let transition = self.state.record_trade(pnl, &self.config.drawdown, now);

        self.recent_pnls.push_back(pnl);
        while self.recent_pnls.len() > self.config.kelly.lookback_trades {
            self.recent_pnls.pop_front();
        }

        if let Err(e) = self.persist() {
            warn!(error = %e, "failed to persist drawdown state");
        }
        transition
    }

    pub fn persist(&self) -> Result<(), ConfigError> {
        self.state.save(&self.state_dir, self.mode)
    }

    /// Judge one integrated signal. `&mut self` because expired pauses are
    /// resumed in place.
    pub fn evaluate(&mut self, input: &RiskInput) -> RiskVerdict {
        self.state.refresh(input.now);

        if let Some(reason) = self.gate(input) {
            info!(reason = %reason, side = %input.signal.side, "entry rejected");
            return RiskVerdict::Rejected(reason);
        }

        let sizing = kelly_fraction(self.recent_pnls.make_contiguous(), &self.config.kelly);
        let conditional = input.anomaly_score >= self.config.risk_score.conditional_threshold;
        let fraction = if conditional {
            sizing.fraction / 2.0
        } else {
            sizing.fraction
        };

        let size = self.round_size(input.equity * fraction / input.last_price);
        if size < self.position_config.min_lot {
            info!(
                size,
                min_lot = self.position_config.min_lot,
                fraction,
                "entry rejected — size below exchange minimum"
            );
            return RiskVerdict::Rejected(RejectReason::BelowMinimumLot);
        }

        let (sl_price, tp_price) = self.stops_for(input);

        let rationale = format!(
            "regime={} kelly={:.4}{}{} atr={:.1} anomaly={:.2}",
            input.regime,
            sizing.fraction,
            if sizing.bootstrap { " (bootstrap)" } else { "" },
            if conditional { " (anomaly-halved)" } else { "" },
            input.atr,
            input.anomaly_score,
        );

        let order = ApprovedOrder {
            side: input.signal.side,
            size,
            entry_price_ref: input.last_price,
            sl_price,
            tp_price,
            risk_score: input.anomaly_score,
            kelly_fraction: fraction,
            rationale,
        };

        info!(
            side = %order.side,
            size = order.size,
            entry = order.entry_price_ref,
            sl = order.sl_price,
            tp = order.tp_price,
            kelly = order.kelly_fraction,
            "entry approved"
        );

        RiskVerdict::Approved(order)
    }

    /// Ordered gate checks. First failure wins.
    fn gate(&self, input: &RiskInput) -> Option<RejectReason> {
        if self.state.trading_status != TradingStatus::Active {
            return Some(RejectReason::TradingPaused(self.state.trading_status));
        }

        if self.state.consecutive_losses >= self.config.drawdown.consecutive_loss_limit {
            return Some(RejectReason::ConsecutiveLossCap);
        }

        if self.state.daily_loss_fraction() >= self.config.drawdown.daily_loss_limit {
            return Some(RejectReason::DailyLossCap);
        }

        // Under the uniform ensemble fallback the core trades HOLD only.
        if input.ensemble_level == DegradationLevel::Uniform {
            return Some(RejectReason::EntriesDisabled);
        }

        if !input.signal.side.is_directional() {
            return Some(RejectReason::NotDirectional);
        }

        if input.cooldown_active
            && input.trend_strength < self.position_config.cooldown_bypass_strength
        {
            return Some(RejectReason::CooldownActive);
        }

        let max_positions = self
            .position_config
            .max_open_positions
            .get(input.regime.as_str())
            .copied()
            .unwrap_or(1);
        if input.open_positions >= max_positions {
            return Some(RejectReason::PositionLimit);
        }

        if input.anomaly_score >= self.config.risk_score.deny_threshold {
            return Some(RejectReason::AnomalyDeny);
        }

        // Maintenance margin may be reported as null; fall back to the
        // configured default ratio and keep trading on the margin floor.
        let _margin_ratio = input
            .maintenance_margin_ratio
            .unwrap_or(self.balance_config.default_maintenance_margin_ratio);
        if input.available_margin < self.balance_config.min_required_margin {
            return Some(RejectReason::InsufficientMargin);
        }

        None
    }

    /// SL/TP prices with per-regime tables and rounding away from entry.
    fn stops_for(&self, input: &RiskInput) -> (f64, f64) {
        let sl_config = &self.config.stop_loss;
        let atr_multiplier = match input.regime.volatility_bucket() {
            VolatilityBucket::Low => sl_config.atr_multiplier_low_volatility,
            VolatilityBucket::Normal => sl_config.atr_multiplier_normal_volatility,
            VolatilityBucket::High => sl_config.atr_multiplier_high_volatility,
        };

        let rr = self
            .config
            .take_profit
            .risk_reward_ratio
            .get(input.regime.as_str())
            .copied()
            .unwrap_or(2.0);

        let entry = input.last_price;
        let sl_distance = atr_multiplier * input.atr;
        let tp_distance =
            (sl_distance * rr).max(self.config.take_profit.min_profit_rate * entry);

        let tick = self.price_tick;
        match input.signal.side {
            Side::Buy => {
                let sl = round_to_tick(entry - sl_distance, tick, RoundDirection::Down)
                    .min(entry - tick);
                let tp = round_to_tick(entry + tp_distance, tick, RoundDirection::Up)
                    .max(entry + tick);
                (sl, tp)
            }
            Side::Sell => {
                let sl = round_to_tick(entry + sl_distance, tick, RoundDirection::Up)
                    .max(entry + tick);
                let tp = round_to_tick(entry - tp_distance, tick, RoundDirection::Down)
                    .min(entry - tick);
                (sl, tp)
            }
            Side::Hold => (entry, entry), // unreachable behind the gates
        }
    }

    fn round_size(&self, size: f64) -> f64 {
        let factor = 10_f64.powi(self.position_config.amount_precision as i32);
        (size * factor).floor() / factor
    }
}

enum RoundDirection {
    Up,
    Down,
}

fn round_to_tick(price: f64, tick: f64, direction: RoundDirection) -> f64 {
    if tick <= 0.0 {
        return price;
    }
    match direction {
        RoundDirection::Up => (price / tick).ceil() * tick,
        RoundDirection::Down => (price / tick).floor() * tick,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::DegradationLevel;
    use crate::signal::{IntegratedSignal, IntegrationComponents};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    fn signal(side: Side, confidence: f64) -> IntegratedSignal {
        IntegratedSignal {
            side,
            confidence,
            components: IntegrationComponents {
                strategy_side: side,
                strategy_confidence: confidence,
                ml_side: side,
                ml_confidence: confidence,
                ml_level: DegradationLevel::Full,
                ml_used: true,
                agreement: true,
                swung_to_ml: false,
                applied_multiplier: 1.0,
                forced_hold: false,
                strategy_weight: 0.7,
                ml_weight: 0.3,
            },
        }
    }

    fn input(side: Side) -> RiskInput {
        RiskInput {
            signal: signal(side, 0.7),
            regime: MarketRegime::Trending,
            last_price: 10_000_000.0,
            atr: 40_000.0,
            equity: 1_000_000.0,
            available_margin: 500_000.0,
            maintenance_margin_ratio: Some(6.0),
            open_positions: 0,
            anomaly_score: 0.1,
            ensemble_level: DegradationLevel::Full,
            cooldown_active: false,
            trend_strength: 0.8,
            now: now(),
        }
    }

    fn manager() -> RiskManager {
        let dir = std::env::temp_dir().join(format!("meridian-risk-{}", uuid::Uuid::new_v4()));
        RiskManager::new(
            RiskConfig::default(),
            PositionConfig::default(),
            BalanceAlertConfig::default(),
            1.0,
            dir,
            TradeMode::Backtest,
            1_000_000.0,
            now(),
        )
        .unwrap()
    }

    #[test]
    fn healthy_buy_is_approved_with_correct_stop_sides() {
        let mut rm = manager();
        let verdict = rm.evaluate(&input(Side::Buy));
        let order = verdict.approved().expect("should approve");

        // SL on the loss side, TP on the profit side.
        assert!(order.sl_price < order.entry_price_ref);
        assert!(order.tp_price > order.entry_price_ref);
        assert!(order.size >= 0.0001);

        // TP distance respects the trending R:R of the default table (2.5).
        let rr = (order.tp_price - order.entry_price_ref)
            / (order.entry_price_ref - order.sl_price);
        assert!((rr - 2.5).abs() < 0.01, "r:r was {rr}");
    }

    #[test]
    fn sell_mirrors_stop_sides() {
        let mut rm = manager();
        let order = rm.evaluate(&input(Side::Sell)).approved().cloned().unwrap();
        assert!(order.sl_price > order.entry_price_ref);
        assert!(order.tp_price < order.entry_price_ref);

        // Same sign on both sides of the entry.
        let entry = order.entry_price_ref;
        assert_eq!(
            (entry - order.sl_price).signum(),
            (order.tp_price - entry).signum()
        );
    }

    #[test]
    fn min_profit_floor_enforced() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.atr = 100.0; // tiny ATR → floor dominates
        let order = rm.evaluate(&i).approved().cloned().unwrap();
        let min_profit = rm.config.take_profit.min_profit_rate * i.last_price;
        assert!(order.tp_price - i.last_price >= min_profit - 1.0);
    }

    #[test]
    fn paused_state_rejects_everything() {
        let mut rm = manager();
        // Trip the consecutive-loss pause.
        for _ in 0..rm.config.drawdown.consecutive_loss_limit {
            rm.record_closed_trade(-100.0, now());
        }
        for side in [Side::Buy, Side::Sell, Side::Hold] {
            match rm.evaluate(&input(side)) {
                RiskVerdict::Rejected(RejectReason::TradingPaused(_)) => {}
                other => panic!("expected TradingPaused, got {other:?}"),
            }
        }
    }

    #[test]
    fn uniform_ensemble_disables_entries() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.ensemble_level = DegradationLevel::Uniform;
        assert!(matches!(
            rm.evaluate(&i),
            RiskVerdict::Rejected(RejectReason::EntriesDisabled)
        ));
    }

    #[test]
    fn cooldown_without_trend_strength_rejects() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.cooldown_active = true;
        i.trend_strength = 0.5;
        assert!(matches!(
            rm.evaluate(&i),
            RiskVerdict::Rejected(RejectReason::CooldownActive)
        ));
    }

    #[test]
    fn cooldown_bypassed_by_strong_trend() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.cooldown_active = true;
        i.trend_strength = 0.75;
        assert!(rm.evaluate(&i).approved().is_some());
    }

    #[test]
    fn position_limit_per_regime() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.open_positions = 3; // trending limit is 3
        assert!(matches!(
            rm.evaluate(&i),
            RiskVerdict::Rejected(RejectReason::PositionLimit)
        ));
    }

    #[test]
    fn anomaly_deny_rejects() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.anomaly_score = 0.9;
        assert!(matches!(
            rm.evaluate(&i),
            RiskVerdict::Rejected(RejectReason::AnomalyDeny)
        ));
    }

    #[test]
    fn conditional_anomaly_halves_size() {
        let mut rm = manager();
        let normal = rm.evaluate(&input(Side::Buy)).approved().cloned().unwrap();

        let mut i = input(Side::Buy);
        i.anomaly_score = 0.6; // above conditional (0.5), below deny (0.8)
        let halved = rm.evaluate(&i).approved().cloned().unwrap();
        assert!(halved.size <= normal.size / 2.0 + 1e-9);
    }

    #[test]
    fn insufficient_margin_rejects() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.available_margin = 10_000.0; // below the 14 000 JPY floor
        assert!(matches!(
            rm.evaluate(&i),
            RiskVerdict::Rejected(RejectReason::InsufficientMargin)
        ));
    }

    #[test]
    fn null_maintenance_margin_uses_default_and_trades() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.maintenance_margin_ratio = None;
        assert!(rm.evaluate(&i).approved().is_some());
    }

    #[test]
    fn hold_signal_rejected_as_not_directional() {
        let mut rm = manager();
        assert!(matches!(
            rm.evaluate(&input(Side::Hold)),
            RiskVerdict::Rejected(RejectReason::NotDirectional)
        ));
    }

    #[test]
    fn kelly_fraction_stays_within_cap() {
        // The final fraction can never leave [0, max_position_ratio * safety_factor].
        let mut rm = manager();
        for _ in 0..10 {
            rm.record_closed_trade(500.0, now());
        }
        let order = rm.evaluate(&input(Side::Buy)).approved().cloned().unwrap();
        let cap = rm.config.kelly.max_position_ratio * rm.config.kelly.safety_factor;
        assert!(order.kelly_fraction >= 0.0);
        assert!(order.kelly_fraction <= cap + 1e-12);
    }

    #[test]
    fn tiny_equity_rejected_below_min_lot() {
        let mut rm = manager();
        let mut i = input(Side::Buy);
        i.equity = 1_000.0; // 5% bootstrap of 1000 JPY ≈ 0.000005 BTC
        assert!(matches!(
            rm.evaluate(&i),
            RiskVerdict::Rejected(RejectReason::BelowMinimumLot)
        ));
    }
}
