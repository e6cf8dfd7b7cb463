//! Flush-side view over the shared store.

use std::{sync::Arc, time::Instant};

use tally_common::time::get_unix_timestamp;
use tracing::{debug, info};

use crate::{config::FlushConfiguration, record::MetricRecord, store::MetricStore, telemetry::Telemetry};

/// Drains a [`MetricStore`] into records on behalf of a backend.
///
/// Every backend holds one of these and calls [`Aggregator::flush`] at the start of `submit`. The store itself may be
/// shared with any number of writers.
#[derive(Clone)]
pub struct Aggregator {
    store: Arc<MetricStore>,
    config: FlushConfiguration,
    debug: bool,
    telemetry: Telemetry,
}

impl Aggregator {
    /// Creates a new `Aggregator` over `store`.
    pub fn new(store: Arc<MetricStore>, config: FlushConfiguration) -> Self {
        Self {
            store,
            config,
            debug: false,
            telemetry: Telemetry::new(),
        }
    }

    /// Sets whether every flushed record is logged.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Returns a reference to the underlying store.
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    /// Returns the flush configuration.
    pub fn config(&self) -> &FlushConfiguration {
        &self.config
    }

    /// Returns `true` if debug logging of records is enabled.
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Drains the store, stamping every record with the current Unix time.
    pub fn flush(&self) -> Vec<MetricRecord> {
        self.flush_at(get_unix_timestamp())
    }

    /// Drains the store, stamping every record with `now`.
    pub fn flush_at(&self, now: u64) -> Vec<MetricRecord> {
        let started = Instant::now();
        let (records, counts) = self.store.flush(now, &self.config);
        self.telemetry.record_flush(&counts, records.len(), started.elapsed());

        debug!(
            records = records.len(),
            counters = counts.counters,
            gauges = counts.gauges,
            timers = counts.timers,
            sets = counts.sets,
            "Flushed metric store."
        );

        if self.debug {
            for record in &records {
                info!(
                    metric = record.name(),
                    value = record.value(),
                    timestamp = record.timestamp(),
                    "Flushing record."
                );
            }
        }

        records
    }
}
