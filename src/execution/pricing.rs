// =============================================================================
// Maker-first pricing policy
// =============================================================================
//
// Entries peg the touch (bid for buys, ask for sells) with the post-only
// flag. When the book moves away the price may be improved by a bounded
// number of tick steps; once improvements are exhausted the entry downgrades
// to a taker market order (if configured).
// =============================================================================

use crate::config::MakerConfig;
use crate::exchange::Ticker;
use crate::types::Side;

pub struct MakerPricer {
    config: MakerConfig,
    tick: f64,
}

impl MakerPricer {
    pub fn new(config: MakerConfig, tick: f64) -> Self {
        Self { config, tick }
    }

    pub fn post_only(&self) -> bool {
        self.config.post_only
    }

    pub fn max_improvements(&self) -> u32 {
        self.config.max_improvements
    }

    pub fn taker_fallback(&self) -> bool {
        self.config.taker_fallback
    }

    pub fn wait_seconds(&self) -> u64 {
        self.config.wait_seconds
    }

    /// Initial maker price: join the touch.
    pub fn entry_price(&self, side: Side, ticker: &Ticker) -> f64 {
        match side {
            Side::Buy => ticker.bid,
            Side::Sell => ticker.ask,
            Side::Hold => ticker.last,
        }
    }

    /// One bounded improvement step toward the current touch. Returns `None`
    /// when the current price is already at (or past) the improved level, in
    /// which case re-pricing would not help.
    pub fn improved_price(&self, side: Side, current: f64, ticker: &Ticker) -> Option<f64> {
        let step = self.config.improvement_ticks * self.tick;
        match side {
            Side::Buy => {
                let target = (current + step).min(ticker.bid);
                (target > current).then_some(target)
            }
            Side::Sell => {
                let target = (current - step).max(ticker.ask);
                (target < current).then_some(target)
            }
            Side::Hold => None,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn ticker(bid: f64, ask: f64) -> Ticker {
        Ticker {
            bid,
            ask,
            last: (bid + ask) / 2.0,
            ts: Utc::now(),
        }
    }

    fn pricer() -> MakerPricer {
        MakerPricer::new(MakerConfig::default(), 1.0)
    }

    #[test]
    fn entry_joins_the_touch() {
        let t = ticker(9_999_000.0, 10_001_000.0);
        assert_eq!(pricer().entry_price(Side::Buy, &t), 9_999_000.0);
        assert_eq!(pricer().entry_price(Side::Sell, &t), 10_001_000.0);
    }

    #[test]
    fn improvement_steps_toward_moved_bid() {
        let t = ticker(10_000_000.0, 10_002_000.0);
        // Our stale buy sits below the new bid: step up by one tick.
        let improved = pricer().improved_price(Side::Buy, 9_999_000.0, &t).unwrap();
        assert!(improved > 9_999_000.0);
        assert!(improved <= t.bid);
    }

    #[test]
    fn improvement_capped_at_touch() {
        let t = ticker(9_999_000.5, 10_001_000.0);
        // One tick above current would cross the bid — clamp to the bid.
        let improved = pricer().improved_price(Side::Buy, 9_999_000.0, &t).unwrap();
        assert!((improved - t.bid).abs() < 1e-9);
    }

    #[test]
    fn no_improvement_when_already_at_touch() {
        let t = ticker(9_999_000.0, 10_001_000.0);
        assert!(pricer().improved_price(Side::Buy, 9_999_000.0, &t).is_none());
    }

    #[test]
    fn sell_improvement_steps_down() {
        let t = ticker(9_999_000.0, 10_000_000.0);
        let improved = pricer()
            .improved_price(Side::Sell, 10_001_000.0, &t)
            .unwrap();
        assert!(improved < 10_001_000.0);
        assert!(improved >= t.ask);
    }
}
