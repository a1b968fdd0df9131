//! rollgate-metrics — health data backends.
//!
//! The [`MetricsProvider`] trait exposes the three measurements the health
//! diagnoser consumes: latency at a percentile, server-error rate and request
//! count, each over a lookback window. Two backends implement it:
//!
//! - [`TimeSeriesProvider`] — a monitoring time-series API with
//!   aligner/reducer aggregation.
//! - [`SheetProvider`] — a tabular sheet, one row per (region, service);
//!   useful for demos and canary dry-runs.
//!
//! The query scope (project, region, service, candidate revision) is bound to
//! the provider, not passed per call.

pub mod mock;
mod provider;
pub mod sheet;
pub mod timeseries;

pub use provider::{
    percentile_to_align_reduce, AlignReduce, MetricsError, MetricsProvider,
};
pub use sheet::SheetProvider;
pub use timeseries::TimeSeriesProvider;
