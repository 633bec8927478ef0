// =============================================================================
// Market feed — fetch and validate the two-timeframe bar window
// =============================================================================

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::errors::DataError;
use crate::exchange::ExchangeApi;
use crate::market_data::{Bar, BarSeries, Timeframe};

/// One cycle's immutable market snapshot.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub primary: BarSeries,
    pub supporting: BarSeries,
}

/// Fetches OHLCV windows through the exchange façade and turns them into
/// validated [`BarSeries`]. The partial (still-forming) current bar is always
/// dropped so that every downstream computation sees only closed bars.
pub struct MarketFeed {
    exchange: Arc<dyn ExchangeApi>,
    pair: String,
    fetch_limit: usize,
    min_primary_bars: usize,
}

impl MarketFeed {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        pair: impl Into<String>,
        fetch_limit: usize,
        min_primary_bars: usize,
    ) -> Self {
        Self {
            exchange,
            pair: pair.into(),
            fetch_limit,
            min_primary_bars,
        }
    }

    /// Fetch the 15m and 4h windows for the current cycle.
    pub async fn fetch_snapshot(&self) -> Result<MarketSnapshot, DataError> {
        let primary = self.fetch_series(Timeframe::M15).await?;
        if primary.len() < self.min_primary_bars {
            return Err(DataError::InsufficientBars {
                have: primary.len(),
                need: self.min_primary_bars,
            });
        }

        let supporting = self.fetch_series(Timeframe::H4).await?;

        debug!(
            primary_bars = primary.len(),
            supporting_bars = supporting.len(),
            "market snapshot fetched"
        );

        Ok(MarketSnapshot {
            primary,
            supporting,
        })
    }

    async fn fetch_series(&self, timeframe: Timeframe) -> Result<BarSeries, DataError> {
        let mut bars = self
            .exchange
            .get_ohlcv(&self.pair, timeframe, self.fetch_limit)
            .await
            .map_err(|e| DataError::Fetch(e.to_string()))?;

        drop_partial_bar(&mut bars, timeframe);
        BarSeries::new(timeframe, bars)
    }
}

/// Remove the trailing bar when it has not closed yet. Exchanges return the
/// in-progress candle as the last element; trading on it would leak intra-bar
/// state into the features.
pub fn drop_partial_bar(bars: &mut Vec<Bar>, timeframe: Timeframe) {
    let now = Utc::now();
    while let Some(last) = bars.last() {
        if last.close_time(timeframe) > now {
            bars.pop();
        } else {
            break;
        }
    }
}
