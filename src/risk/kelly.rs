// =============================================================================
// Kelly sizing — position fraction from recent closed-trade statistics
// =============================================================================
//
//   f* = p - q / b      (p win rate, q = 1 - p, b payoff ratio)
//
// The raw fraction is clamped to [0, max_position_ratio] and multiplied by
// the safety factor (half-Kelly by default). Below the minimum sample size a
// configured bootstrap fraction is used instead, so a fresh account can trade
// without a statistical base.
// =============================================================================

use serde::Serialize;

use crate::config::KellyConfig;

/// Win/loss statistics over the recent closed trades.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TradeStats {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
}

pub fn compute_stats(pnls: &[f64]) -> TradeStats {
    let mut wins = 0;
    let mut losses = 0;
    let mut total_win = 0.0;
    let mut total_loss = 0.0;

    for &pnl in pnls {
        if pnl > 0.0 {
            wins += 1;
            total_win += pnl;
        } else if pnl < 0.0 {
            losses += 1;
            total_loss += pnl.abs();
        }
        // Exactly-zero trades count toward neither side.
    }

    let trades = pnls.len();
    TradeStats {
        trades,
        wins,
        losses,
        win_rate: if trades > 0 {
            wins as f64 / trades as f64
        } else {
            0.0
        },
        avg_win: if wins > 0 { total_win / wins as f64 } else { 0.0 },
        avg_loss: if losses > 0 {
            total_loss / losses as f64
        } else {
            0.0
        },
    }
}

/// Resolved position fraction for the next entry.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KellySizing {
    /// Equity fraction to commit, already clamped and safety-factored.
    pub fraction: f64,
    /// True while the bootstrap fraction substitutes for real statistics.
    pub bootstrap: bool,
    pub win_rate: f64,
    pub payoff_ratio: f64,
}

pub fn kelly_fraction(pnls: &[f64], config: &KellyConfig) -> KellySizing {
    let cap = config.max_position_ratio * config.safety_factor;

    if pnls.len() < config.min_trades {
        return KellySizing {
            fraction: config.bootstrap_position_ratio.clamp(0.0, cap),
            bootstrap: true,
            win_rate: 0.0,
            payoff_ratio: 0.0,
        };
    }

    let stats = compute_stats(pnls);
    let p = stats.win_rate;
    let q = 1.0 - p;

    // Degenerate payoff ratios: no losses means the q/b term vanishes; no
    // wins means there is no edge at all.
    let (raw, b) = if stats.avg_win <= 0.0 {
        (0.0, 0.0)
    } else if stats.avg_loss <= 0.0 {
        (p, f64::INFINITY)
    } else {
        let b = stats.avg_win / stats.avg_loss;
        (p - q / b, b)
    };

    let fraction = raw.clamp(0.0, config.max_position_ratio) * config.safety_factor;

    KellySizing {
        fraction,
        bootstrap: false,
        win_rate: p,
        payoff_ratio: b,
    }
}
