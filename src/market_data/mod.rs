pub mod bar;
pub mod feed;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Bar`).
pub use bar::{Bar, BarSeries, Timeframe};
pub use feed::{MarketFeed, MarketSnapshot};
