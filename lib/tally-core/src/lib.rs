//! Aggregation-and-flush engine.
//!
//! Samples are written into a shared [`MetricStore`](store::MetricStore) as they arrive. Once per flush cycle, a
//! [`Backend`](backend::Backend) drains the store through the per-kind flush procedures in [`flush`], which summarize
//! every bucket into kind-agnostic [`MetricRecord`](record::MetricRecord)s that the backend then serializes and
//! transmits.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod flush;
pub mod percentile;
pub mod record;
pub mod store;

mod telemetry;
