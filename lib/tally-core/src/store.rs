//! Shared metric state.

use std::sync::{Mutex, MutexGuard};

use tally_common::collections::FastHashMap;

use crate::{
    config::FlushConfiguration,
    flush::{flush_counters, flush_gauges, flush_sets, flush_timers},
    record::MetricRecord,
};

/// A single value written into the store.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleValue {
    /// Counter delta, already scaled for any client-side sampling.
    Counter(f64),

    /// Absolute gauge value.
    Gauge(f64),

    /// Signed adjustment to the current gauge value.
    GaugeDelta(f64),

    /// Timer sample.
    Timer(f64),

    /// Raw set member.
    Set(String),
}

/// Number of buckets currently held, per kind.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BucketCounts {
    /// Counters with unflushed data.
    pub counters: usize,

    /// Counters being zero-filled after going inactive.
    pub inactive_counters: usize,

    /// Gauges.
    pub gauges: usize,

    /// Timers.
    pub timers: usize,

    /// Sets.
    pub sets: usize,
}

/// Per-record breakdown of a single drain.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlushCounts {
    /// Counter records, including zero-filled ones.
    pub counters: usize,

    /// Gauge records.
    pub gauges: usize,

    /// Timers summarized.
    pub timers: usize,

    /// Set records.
    pub sets: usize,
}

#[derive(Default)]
struct StoreState {
    counters: FastHashMap<String, f64>,
    inactive_counters: FastHashMap<String, u64>,
    gauges: FastHashMap<String, f64>,
    timers: FastHashMap<String, Vec<f64>>,
    sets: FastHashMap<String, Vec<String>>,
}

impl StoreState {
    fn insert(&mut self, key: &str, value: SampleValue) {
        match value {
            SampleValue::Counter(delta) => *self.counters.entry_ref(key).or_insert(0.0) += delta,
            SampleValue::Gauge(value) => {
                self.gauges.insert(key.to_string(), value);
            }
            SampleValue::GaugeDelta(delta) => *self.gauges.entry_ref(key).or_insert(0.0) += delta,
            SampleValue::Timer(sample) => self.timers.entry_ref(key).or_default().push(sample),
            SampleValue::Set(member) => self.sets.entry_ref(key).or_default().push(member),
        }
    }
}

/// Process-wide metric state.
///
/// Holds the counter, gauge, timer, and set buckets along with the inactivity tracking for counters, all behind a
/// single lock. Ingestion writes and flush drains both take that lock, so a drain observes every bucket either entirely
/// before or entirely after any given write, and no sample can slip in between a bucket being read and being cleared.
///
/// The store is meant to be shared behind an `Arc` between the ingestion path and the flush scheduler.
#[derive(Default)]
pub struct MetricStore {
    state: Mutex<StoreState>,
}

impl MetricStore {
    /// Creates an empty `MetricStore`.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic while holding the lock can at worst leave a bucket partially updated, which is no worse than losing
        // the sample that caused it, so keep going with whatever state is there.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes a single sample into the bucket named `key`.
    pub fn insert(&self, key: &str, value: SampleValue) {
        self.lock().insert(key, value);
    }

    /// Writes a batch of samples while holding the lock once.
    pub fn insert_many<K, I>(&self, samples: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = (K, SampleValue)>,
    {
        let mut state = self.lock();
        for (key, value) in samples {
            state.insert(key.as_ref(), value);
        }
    }

    /// Adds `delta` to the counter named `key`.
    pub fn increment_counter(&self, key: &str, delta: f64) {
        self.insert(key, SampleValue::Counter(delta));
    }

    /// Sets the gauge named `key` to `value`.
    pub fn set_gauge(&self, key: &str, value: f64) {
        self.insert(key, SampleValue::Gauge(value));
    }

    /// Adjusts the gauge named `key` by `delta`, starting from zero if the gauge does not exist.
    pub fn adjust_gauge(&self, key: &str, delta: f64) {
        self.insert(key, SampleValue::GaugeDelta(delta));
    }

    /// Appends a sample to the timer named `key`.
    pub fn record_timing(&self, key: &str, sample: f64) {
        self.insert(key, SampleValue::Timer(sample));
    }

    /// Appends a member to the set named `key`.
    pub fn add_set_member(&self, key: &str, member: impl Into<String>) {
        self.insert(key, SampleValue::Set(member.into()));
    }

    /// Returns the number of buckets currently held, per kind.
    pub fn bucket_counts(&self) -> BucketCounts {
        let state = self.lock();
        BucketCounts {
            counters: state.counters.len(),
            inactive_counters: state.inactive_counters.len(),
            gauges: state.gauges.len(),
            timers: state.timers.len(),
            sets: state.sets.len(),
        }
    }

    /// Drains every bucket into summarized records stamped with `now`.
    ///
    /// Runs the counter, gauge, timer, and set flush procedures, in that order, within one critical section. The
    /// returned records are owned by the caller, so serializing and transmitting them happens without the lock held.
    pub fn flush(&self, now: u64, config: &FlushConfiguration) -> (Vec<MetricRecord>, FlushCounts) {
        let mut records = Vec::new();
        let mut state = self.lock();
        let state = &mut *state;

        let counts = FlushCounts {
            counters: flush_counters(
                &mut state.counters,
                &mut state.inactive_counters,
                now,
                config.persist_count_keys(),
                &mut records,
            ),
            gauges: flush_gauges(&mut state.gauges, now, config.delete_gauges(), &mut records),
            timers: flush_timers(
                &mut state.timers,
                now,
                config.percentiles(),
                config.postfix(),
                &mut records,
            ),
            sets: flush_sets(&mut state.sets, now, &mut records),
        };

        (records, counts)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use similar_asserts::assert_eq;

    use super::*;

    const TS: u64 = 1_700_000_000;

    fn flush_sorted(store: &MetricStore, now: u64, config: &FlushConfiguration) -> Vec<MetricRecord> {
        let (mut records, _) = store.flush(now, config);
        records.sort_by(|a, b| a.name().cmp(b.name()));
        records
    }

    #[test]
    fn counters_sum_between_flushes() {
        let store = MetricStore::new();
        let config = FlushConfiguration::with_defaults().with_persist_count_keys(1);

        store.increment_counter("hits", 3.0);
        store.increment_counter("hits", 2.0);

        assert_eq!(flush_sorted(&store, TS, &config), vec![MetricRecord::new("hits", 5.0, TS)]);
        assert_eq!(store.bucket_counts().counters, 0);
        assert_eq!(store.bucket_counts().inactive_counters, 1);

        assert_eq!(
            flush_sorted(&store, TS + 10, &config),
            vec![MetricRecord::new("hits", 0.0, TS + 10)]
        );
        assert!(flush_sorted(&store, TS + 20, &config).is_empty());
    }

    #[test]
    fn relative_gauges() {
        let store = MetricStore::new();
        let config = FlushConfiguration::with_defaults().with_delete_gauges(false);

        store.adjust_gauge("queue", 4.0);
        store.adjust_gauge("queue", -1.5);
        assert_eq!(flush_sorted(&store, TS, &config), vec![MetricRecord::new("queue", 2.5, TS)]);

        store.set_gauge("queue", 10.0);
        store.adjust_gauge("queue", 1.0);
        assert_eq!(flush_sorted(&store, TS, &config), vec![MetricRecord::new("queue", 11.0, TS)]);

        // Sticky: still there without any new write.
        assert_eq!(flush_sorted(&store, TS, &config), vec![MetricRecord::new("queue", 11.0, TS)]);
    }

    #[test]
    fn deleted_gauge_reappears_after_write() {
        let store = MetricStore::new();
        let config = FlushConfiguration::with_defaults().with_delete_gauges(true);

        store.set_gauge("temp", 20.0);
        assert_eq!(flush_sorted(&store, TS, &config).len(), 1);
        assert!(flush_sorted(&store, TS, &config).is_empty());

        store.set_gauge("temp", 21.0);
        assert_eq!(flush_sorted(&store, TS, &config), vec![MetricRecord::new("temp", 21.0, TS)]);
    }

    #[test]
    fn all_kinds_drain_in_one_flush() {
        let store = MetricStore::new();
        let config = FlushConfiguration::with_defaults()
            .with_percentiles(vec![crate::config::Percentile::try_from("50").unwrap()])
            .with_persist_count_keys(0);

        store.insert_many([
            ("c", SampleValue::Counter(1.0)),
            ("g", SampleValue::Gauge(2.0)),
            ("t", SampleValue::Timer(3.0)),
            ("s", SampleValue::Set("x".into())),
        ]);

        let (records, counts) = store.flush(TS, &config);
        assert_eq!(
            counts,
            FlushCounts {
                counters: 1,
                gauges: 1,
                timers: 1,
                sets: 1
            }
        );
        // 1 counter, 1 gauge, 1 set, and 1 percentile plus 4 summary records for the timer.
        assert_eq!(records.len(), 8);
        assert_eq!(store.bucket_counts(), BucketCounts::default());

        let (records, _) = store.flush(TS, &config);
        assert!(records.is_empty());
    }

    #[test]
    fn concurrent_ingestion_loses_nothing() {
        const WRITERS: usize = 4;
        const WRITES_PER_WRITER: usize = 2_500;

        let store = Arc::new(MetricStore::new());
        let config = FlushConfiguration::with_defaults().with_persist_count_keys(0);

        let writers = (0..WRITERS)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..WRITES_PER_WRITER {
                        store.increment_counter("hits", 1.0);
                    }
                })
            })
            .collect::<Vec<_>>();

        // Flush repeatedly while the writers run; every increment must land in exactly one flush.
        let mut total = 0.0;
        while writers.iter().any(|w| !w.is_finished()) {
            let (records, _) = store.flush(TS, &config);
            total += records.iter().map(MetricRecord::value).sum::<f64>();
        }
        for writer in writers {
            writer.join().unwrap();
        }
        let (records, _) = store.flush(TS, &config);
        total += records.iter().map(MetricRecord::value).sum::<f64>();

        assert_eq!(total, (WRITERS * WRITES_PER_WRITER) as f64);
    }
}
