//! Wire codecs for metric ingestion.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod statsd;
