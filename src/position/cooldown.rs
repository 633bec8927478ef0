// =============================================================================
// StopManager — flexible post-trade cooldown
// =============================================================================
//
// After any closed trade a cooldown timer starts. Entries inside the window
// are rejected unless the composite trend-strength score (weighted ADX + DI
// differential + EMA alignment, computed by the feature pipeline) reaches
// the bypass threshold — a strong trend is exactly the situation a blanket
// cooldown would make the engine miss.
// =============================================================================

use chrono::{DateTime, Duration, Utc};

use crate::config::PositionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownDecision {
    /// No cooldown running.
    Clear,
    /// Cooldown running and trend strength below the bypass threshold.
    Blocked,
    /// Cooldown running but bypassed by trend strength.
    Bypassed,
}

pub struct StopManager {
    cooldown_seconds: i64,
    bypass_strength: f64,
}

impl StopManager {
    pub fn new(config: &PositionConfig) -> Self {
        Self {
            cooldown_seconds: config.cooldown_seconds,
            bypass_strength: config.cooldown_bypass_strength,
        }
    }

    /// Whether the cooldown window is currently running.
    pub fn cooldown_active(&self, last_close: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        match last_close {
            Some(closed_at) => now < closed_at + Duration::seconds(self.cooldown_seconds),
            None => false,
        }
    }

    /// Full decision including the trend-strength bypass.
    pub fn check(
        &self,
        last_close: Option<DateTime<Utc>>,
        trend_strength: f64,
        now: DateTime<Utc>,
    ) -> CooldownDecision {
        if !self.cooldown_active(last_close, now) {
            return CooldownDecision::Clear;
        }
        if trend_strength >= self.bypass_strength {
            CooldownDecision::Bypassed
        } else {
            CooldownDecision::Blocked
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn manager() -> StopManager {
        StopManager::new(&PositionConfig::default())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn no_close_means_no_cooldown() {
        assert!(!manager().cooldown_active(None, now()));
        assert_eq!(manager().check(None, 0.0, now()), CooldownDecision::Clear);
    }

    #[test]
    fn fresh_close_blocks_weak_trend() {
        let closed = now() - Duration::minutes(10);
        assert_eq!(
            manager().check(Some(closed), 0.3, now()),
            CooldownDecision::Blocked
        );
    }

    #[test]
    fn strong_trend_bypasses_cooldown() {
        let closed = now() - Duration::minutes(10);
        assert_eq!(
            manager().check(Some(closed), 0.75, now()),
            CooldownDecision::Bypassed
        );
    }

    #[test]
    fn exact_threshold_bypasses() {
        let closed = now() - Duration::minutes(10);
        assert_eq!(
            manager().check(Some(closed), 0.7, now()),
            CooldownDecision::Bypassed
        );
    }

    #[test]
    fn expired_window_clears() {
        let closed = now() - Duration::seconds(3601);
        assert_eq!(
            manager().check(Some(closed), 0.0, now()),
            CooldownDecision::Clear
        );
    }
}
