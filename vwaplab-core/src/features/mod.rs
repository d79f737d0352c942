//! Feature engineering: per-bar day-to-date features and the daily
//! cutoff aggregation built on top of them.

pub mod accumulator;
pub mod aggregate;
pub mod intraday;

pub use accumulator::{DayAccumulator, DayBoundaryError, Welford};
pub use aggregate::{AggregationConfig, DailyAggregator, DailyDataset, InsufficientData};
pub use intraday::{split_enriched_days, FeatureConfig, IntradayEngine};
