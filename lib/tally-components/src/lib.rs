//! Component implementations.
//!
//! This crate contains the statsd ingestion source and the backends that flushed metrics are sent to.

#![deny(warnings)]
#![deny(missing_docs)]

pub mod backends;
pub mod sources;
