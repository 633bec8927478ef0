// =============================================================================
// DrawdownState — persisted account health and trading pauses
// =============================================================================
//
// Created at session start, mutated only by the RiskManager after each closed
// trade, and persisted per mode (paper / live / backtest) in separate files —
// never cross-contaminated. Persistence uses the atomic tmp + rename pattern.
//
// Pause transitions:
//   - consecutive losses at the limit      → paused_consecutive_loss
//   - peak-to-current drawdown at the limit → paused_drawdown
//   - daily loss at the limit               → paused_drawdown
//
// A pause auto-expires once `pause_until` passes; the loss streak resets on
// resume.
// =============================================================================

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DrawdownConfig;
use crate::errors::ConfigError;
use crate::types::{TradeMode, TradingStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownState {
    pub current_balance: f64,
    pub peak_balance: f64,
    #[serde(default)]
    pub consecutive_losses: u32,
    #[serde(default)]
    pub last_loss_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trading_status: TradingStatus,
    #[serde(default)]
    pub pause_until: Option<DateTime<Utc>>,
    /// Session id, rolled at process start.
    pub current_session: String,
    pub session_start: DateTime<Utc>,
    /// UTC date the daily counters belong to.
    #[serde(default)]
    pub daily_date: String,
    #[serde(default)]
    pub daily_start_balance: f64,
    #[serde(default)]
    pub daily_pnl: f64,
    pub last_updated: DateTime<Utc>,
}

impl DrawdownState {
    pub fn new(initial_balance: f64, now: DateTime<Utc>) -> Self {
        Self {
            current_balance: initial_balance,
            peak_balance: initial_balance,
            consecutive_losses: 0,
            last_loss_time: None,
            trading_status: TradingStatus::Active,
            pause_until: None,
            current_session: uuid::Uuid::new_v4().to_string(),
            session_start: now,
            daily_date: now.format("%Y-%m-%d").to_string(),
            daily_start_balance: initial_balance,
            daily_pnl: 0.0,
            last_updated: now,
        }
    }

    /// Path of the per-mode state file. One file per mode, no sharing.
    pub fn state_path(dir: &Path, mode: TradeMode) -> PathBuf {
        dir.join(format!("drawdown_state_{}.json", mode.state_suffix()))
    }

    /// Load the persisted state for `mode`, or create a fresh one. A new
    /// session id is issued either way.
    pub fn load_or_create(
        dir: &Path,
        mode: TradeMode,
        initial_balance: f64,
        now: DateTime<Utc>,
    ) -> Result<Self, ConfigError> {
        let path = Self::state_path(dir, mode);
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let mut state: Self = serde_json::from_str(&content)?;
            state.current_session = uuid::Uuid::new_v4().to_string();
            state.session_start = now;
            info!(
                path = %path.display(),
                balance = state.current_balance,
                status = %state.trading_status,
                "drawdown state loaded"
            );
            Ok(state)
        } else {
            info!(path = %path.display(), initial_balance, "drawdown state created");
            Ok(Self::new(initial_balance, now))
        }
    }

    /// Persist atomically (tmp + rename).
    pub fn save(&self, dir: &Path, mode: TradeMode) -> Result<(), ConfigError> {
        std::fs::create_dir_all(dir)?;
        let path = Self::state_path(dir, mode);
        let content = serde_json::to_string_pretty(self)?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Reset daily counters when the UTC date rolls over.
    pub fn roll_daily(&mut self, now: DateTime<Utc>) {
        let today = now.format("%Y-%m-%d").to_string();
        if self.daily_date != today {
            info!(
                old_date = %self.daily_date,
                new_date = %today,
                "date rolled — resetting daily counters"
            );
            self.daily_date = today;
            self.daily_start_balance = self.current_balance;
            self.daily_pnl = 0.0;
        }
    }

    /// Auto-resume when a pause has expired.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.roll_daily(now);
        if self.trading_status != TradingStatus::Active {
            if let Some(until) = self.pause_until {
                if now >= until {
                    info!(
                        resumed_from = %self.trading_status,
                        "trading pause expired — resuming"
                    );
                    self.trading_status = TradingStatus::Active;
                    self.pause_until = None;
                    self.consecutive_losses = 0;
                    self.last_updated = now;
                }
            }
        }
    }

    /// Record a closed trade's PnL and apply pause transitions. Returns the
    /// new status when a pause was entered by this trade.
    pub fn record_trade(
        &mut self,
        pnl: f64,
        config: &DrawdownConfig,
        now: DateTime<Utc>,
    ) -> Option<TradingStatus> {
        self.roll_daily(now);

        self.current_balance += pnl;
        self.daily_pnl += pnl;
        if self.current_balance > self.peak_balance {
            self.peak_balance = self.current_balance;
        }

        if pnl < 0.0 {
            self.consecutive_losses += 1;
            self.last_loss_time = Some(now);
        } else {
            self.consecutive_losses = 0;
        }
        self.last_updated = now;

        if self.trading_status != TradingStatus::Active {
            return None;
        }

        let pause_until = now + Duration::minutes(config.pause_duration_minutes);

        if self.consecutive_losses >= config.consecutive_loss_limit {
            self.trading_status = TradingStatus::PausedConsecutiveLoss;
            self.pause_until = Some(pause_until);
            warn!(
                consecutive_losses = self.consecutive_losses,
                limit = config.consecutive_loss_limit,
                pause_until = %pause_until,
                "consecutive-loss pause entered"
            );
            return Some(self.trading_status);
        }

        if self.drawdown_fraction() >= config.max_drawdown_threshold {
            self.trading_status = TradingStatus::PausedDrawdown;
            self.pause_until = Some(pause_until);
            warn!(
                drawdown = format!("{:.4}", self.drawdown_fraction()),
                limit = config.max_drawdown_threshold,
                "max-drawdown pause entered"
            );
            return Some(self.trading_status);
        }

        if self.daily_loss_fraction() >= config.daily_loss_limit {
            self.trading_status = TradingStatus::PausedDrawdown;
            self.pause_until = Some(pause_until);
            warn!(
                daily_loss = format!("{:.4}", self.daily_loss_fraction()),
                limit = config.daily_loss_limit,
                "daily-loss pause entered"
            );
            return Some(self.trading_status);
        }

        None
    }

    /// Peak-to-current equity decline as a fraction of the peak.
    pub fn drawdown_fraction(&self) -> f64 {
        if self.peak_balance > 0.0 {
            ((self.peak_balance - self.current_balance) / self.peak_balance).max(0.0)
        } else {
            0.0
        }
    }

    /// Today's loss as a fraction of the day's starting balance.
    pub fn daily_loss_fraction(&self) -> f64 {
        if self.daily_start_balance > 0.0 {
            (-self.daily_pnl / self.daily_start_balance).max(0.0)
        } else {
            0.0
        }
    }

    pub fn is_active(&self) -> bool {
        self.trading_status == TradingStatus::Active
    }
}
