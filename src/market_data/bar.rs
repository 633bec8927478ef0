// =============================================================================
// OHLCV bars and validated bar series
// =============================================================================
//
// The feature pipeline demands strictly monotone, gap-less timestamps. Any
// batch violating that is rejected wholesale rather than silently repaired:
// a single missing bar shifts every rolling window after it and would break
// training/inference parity.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DataError;

/// A single OHLCV bar. Timestamps mark the bar *open* time, UTC.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(ts: DateTime<Utc>, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            ts,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// All prices finite and positive, volume finite and non-negative,
    /// high/low bracket open/close.
    pub fn is_valid(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0)
            && self.volume.is_finite()
            && self.volume >= 0.0
            && self.high >= self.low
            && self.high >= self.open.max(self.close)
            && self.low <= self.open.min(self.close)
    }

    /// Close time of the bar given its timeframe.
    pub fn close_time(&self, timeframe: Timeframe) -> DateTime<Utc> {
        self.ts + timeframe.duration()
    }
}

/// The two timeframes the core consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    /// Primary decision timeframe.
    M15,
    /// Supporting higher timeframe.
    H4,
}

impl Timeframe {
    pub fn duration(self) -> Duration {
        match self {
            Self::M15 => Duration::minutes(15),
            Self::H4 => Duration::hours(4),
        }
    }

    /// Candle type string used by the Bitbank candlestick endpoint.
    pub fn exchange_code(self) -> &'static str {
        match self {
            Self::M15 => "15min",
            Self::H4 => "4hour",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.exchange_code())
    }
}

/// A validated, contiguous series of bars for one timeframe (oldest first).
#[derive(Debug, Clone)]
pub struct BarSeries {
    timeframe: Timeframe,
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Validate and wrap a batch of bars.
    ///
    /// Rejects the whole batch when:
    /// - any bar carries non-finite / non-positive prices or negative volume;
    /// - timestamps are not strictly increasing;
    /// - consecutive timestamps are not exactly one timeframe apart.
    pub fn new(timeframe: Timeframe, bars: Vec<Bar>) -> Result<Self, DataError> {
        for (i, bar) in bars.iter().enumerate() {
            if !bar.is_valid() {
                return Err(DataError::InvalidBar { index: i });
            }
        }

        let step = timeframe.duration();
        for i in 1..bars.len() {
            let expected = bars[i - 1].ts + step;
            if bars[i].ts <= bars[i - 1].ts {
                return Err(DataError::NonMonotonic { index: i });
            }
            if bars[i].ts != expected {
                return Err(DataError::Gap {
                    index: i,
                    expected: expected.to_rfc3339(),
                    got: bars[i].ts.to_rfc3339(),
                });
            }
        }

        Ok(Self { timeframe, bars })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    /// The trailing `n` bars (or the whole series if shorter).
    pub fn tail(&self, n: usize) -> &[Bar] {
        let start = self.bars.len().saturating_sub(n);
        &self.bars[start..]
    }

    /// A new series holding only the first `n` bars. Used to verify that
    /// feature rows are identical whether computed from a prefix or the full
    /// history.
    pub fn prefix(&self, n: usize) -> Self {
        Self {
            timeframe: self.timeframe,
            bars: self.bars[..n.min(self.bars.len())].to_vec(),
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

    fn ts(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn bar(minutes: i64, close: f64) -> Bar {
        Bar::new(ts(minutes), close, close + 1.0, close - 1.0, close, 10.0)
    }

    #[test]
    fn valid_contiguous_series_accepted() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i * 15, 100.0 + i as f64)).collect();
        let series = BarSeries::new(Timeframe::M15, bars).unwrap();
        assert_eq!(series.len(), 10);
        assert_eq!(series.timeframe(), Timeframe::M15);
    }

    #[test]
    fn gap_rejected() {
        let mut bars: Vec<Bar> = (0..5).map(|i| bar(i * 15, 100.0)).collect();
        bars.push(bar(90, 100.0)); // skips the 75-minute bar
        let err = BarSeries::new(Timeframe::M15, bars).unwrap_err();
        assert!(matches!(err, DataError::Gap { index: 5, .. }));
    }

    #[test]
    fn duplicate_timestamp_rejected() {
        let bars = vec![bar(0, 100.0), bar(0, 101.0)];
        let err = BarSeries::new(Timeframe::M15, bars).unwrap_err();
        assert!(matches!(err, DataError::NonMonotonic { index: 1 }));
    }

    #[test]
    fn nan_price_rejected() {
        let mut b = bar(0, 100.0);
        b.high = f64::NAN;
        let err = BarSeries::new(Timeframe::M15, vec![b]).unwrap_err();
        assert!(matches!(err, DataError::InvalidBar { index: 0 }));
    }

    #[test]
    fn negative_volume_rejected() {
        let mut b = bar(0, 100.0);
        b.volume = -1.0;
        assert!(BarSeries::new(Timeframe::M15, vec![b]).is_err());
    }

    #[test]
    fn inconsistent_high_low_rejected() {
        let mut b = bar(0, 100.0);
        b.high = 95.0; // below close
        assert!(BarSeries::new(Timeframe::M15, vec![b]).is_err());
    }

    #[test]
    fn prefix_preserves_timeframe_and_order() {
        let bars: Vec<Bar> = (0..20).map(|i| bar(i * 15, 100.0 + i as f64)).collect();
        let series = BarSeries::new(Timeframe::M15, bars).unwrap();
        let prefix = series.prefix(7);
        assert_eq!(prefix.len(), 7);
        assert_eq!(prefix.bars()[6], series.bars()[6]);
    }

    #[test]
    fn tail_returns_trailing_window() {
        let bars: Vec<Bar> = (0..20).map(|i| bar(i * 15, 100.0 + i as f64)).collect();
        let series = BarSeries::new(Timeframe::M15, bars).unwrap();
        let tail = series.tail(5);
        assert_eq!(tail.len(), 5);
        assert_eq!(tail[4], *series.last().unwrap());
        assert_eq!(series.tail(100).len(), 20);
    }

    #[test]
    fn close_time_adds_timeframe() {
        let b = bar(0, 100.0);
        assert_eq!(b.close_time(Timeframe::M15), ts(15));
        assert_eq!(b.close_time(Timeframe::H4), ts(240));
    }
}
