// =============================================================================
// Market anomaly scoring — reject entries into broken tape
// =============================================================================
//
// Three observable symptoms, each normalized to [0, 1] and blended into one
// score:
//   - spread blow-out (bid/ask spread in basis points),
//   - price dislocation (last trade vs previous close, in ATR units),
//   - volume shock (trailing z-score).
//
// The RiskManager compares the score against the configured conditional and
// deny thresholds: conditional halves the position, deny rejects it.
// =============================================================================

use serde::Serialize;

/// Spread at which the spread term saturates at 1.0.
const SPREAD_SATURATION_BPS: f64 = 50.0;
/// Price dislocation (in ATRs) at which the jump term saturates.
const JUMP_SATURATION_ATR: f64 = 3.0;
/// |volume z-score| at which the volume term saturates.
const VOLUME_SATURATION_Z: f64 = 4.0;

const SPREAD_WEIGHT: f64 = 0.4;
const JUMP_WEIGHT: f64 = 0.4;
const VOLUME_WEIGHT: f64 = 0.2;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AnomalyInput {
    /// Bid/ask spread in basis points of the mid price.
    pub spread_bps: f64,
    /// Last traded price against the previous bar close.
    pub last_price: f64,
    pub prev_close: f64,
    /// Current ATR in price units.
    pub atr: f64,
    /// Trailing volume z-score of the latest bar.
    pub volume_zscore: f64,
}

/// Blend the three symptoms into a score in [0, 1].
pub fn anomaly_score(input: &AnomalyInput) -> f64 {
    let spread_term = (input.spread_bps / SPREAD_SATURATION_BPS).clamp(0.0, 1.0);

    let jump_term = if input.atr > 0.0 && input.prev_close > 0.0 {
        ((input.last_price - input.prev_close).abs() / input.atr / JUMP_SATURATION_ATR)
            .clamp(0.0, 1.0)
    } else {
        0.0
    };

    let volume_term = (input.volume_zscore.abs() / VOLUME_SATURATION_Z).clamp(0.0, 1.0);

    SPREAD_WEIGHT * spread_term + JUMP_WEIGHT * jump_term + VOLUME_WEIGHT * volume_term
}
