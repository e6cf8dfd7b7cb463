//! Common helpers shared by the aggregation engine and its outer layers.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod collections;
pub mod time;
