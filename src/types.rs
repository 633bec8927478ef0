// =============================================================================
// Shared types used across the Meridian trading core
// =============================================================================

use serde::{Deserialize, Serialize};

/// Ternary trading decision. Also used as the order side, in which case only
/// `Buy` and `Sell` are ever valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Hold,
    Sell,
}

impl Side {
    /// Class index used by the ensemble target encoding: SELL=0, HOLD=1, BUY=2.
    pub fn class_index(self) -> usize {
        match self {
            Self::Sell => 0,
            Self::Hold => 1,
            Self::Buy => 2,
        }
    }

    /// Inverse of [`Side::class_index`]. Returns `None` for out-of-range indices.
    pub fn from_class_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::Sell),
            1 => Some(Self::Hold),
            2 => Some(Self::Buy),
            _ => None,
        }
    }

    pub fn is_directional(self) -> bool {
        self != Self::Hold
    }

    /// The closing side for an entry on this side (a Buy entry closes with Sell).
    pub fn flip(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
            Self::Hold => Self::Hold,
        }
    }

    /// Signed direction: +1 for Buy, -1 for Sell, 0 for Hold.
    pub fn direction(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Hold => 0.0,
            Self::Sell => -1.0,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Hold => write!(f, "HOLD"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Which environment the engine is running against. State files are kept
/// strictly separate per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
    Backtest,
}

impl TradeMode {
    /// Suffix used to separate per-mode state files on disk.
    pub fn state_suffix(self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Live => "live",
            Self::Backtest => "backtest",
        }
    }
}

impl Default for TradeMode {
    fn default() -> Self {
        Self::Paper
    }
}

impl std::fmt::Display for TradeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.state_suffix())
    }
}

/// Whether the risk layer currently allows new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingStatus {
    Active,
    PausedDrawdown,
    PausedConsecutiveLoss,
}

impl Default for TradingStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for TradingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::PausedDrawdown => write!(f, "paused_drawdown"),
            Self::PausedConsecutiveLoss => write!(f, "paused_consecutive_loss"),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_index_roundtrip() {
        for side in [Side::Sell, Side::Hold, Side::Buy] {
            assert_eq!(Side::from_class_index(side.class_index()), Some(side));
        }
        assert!(Side::from_class_index(3).is_none());
    }

    #[test]
    fn side_display_matches_wire_format() {
        assert_eq!(Side::Buy.to_string(), "BUY");
        assert_eq!(Side::Hold.to_string(), "HOLD");
        assert_eq!(Side::Sell.to_string(), "SELL");
    }

    #[test]
    fn flip_is_involutive_for_directional_sides() {
        assert_eq!(Side::Buy.flip(), Side::Sell);
        assert_eq!(Side::Sell.flip(), Side::Buy);
        assert_eq!(Side::Hold.flip(), Side::Hold);
    }

    #[test]
    fn mode_suffixes_are_distinct() {
        assert_eq!(TradeMode::Paper.state_suffix(), "paper");
        assert_eq!(TradeMode::Live.state_suffix(), "live");
        assert_eq!(TradeMode::Backtest.state_suffix(), "backtest");
    }

    #[test]
    fn trading_status_serde_snake_case() {
        let json = serde_json::to_string(&TradingStatus::PausedConsecutiveLoss).unwrap();
        assert_eq!(json, "\"paused_consecutive_loss\"");
        let back: TradingStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TradingStatus::PausedConsecutiveLoss);
    }
}
