use std::time::Duration;

use metrics::{counter, histogram, Counter, Histogram};

use crate::store::FlushCounts;

#[derive(Clone)]
struct KindCounter {
    for_counter: Counter,
    for_gauge: Counter,
    for_timer: Counter,
    for_set: Counter,
}

impl KindCounter {
    fn new(name: &'static str) -> Self {
        Self {
            for_counter: counter!(name, "metric_type" => "counter"),
            for_gauge: counter!(name, "metric_type" => "gauge"),
            for_timer: counter!(name, "metric_type" => "timer"),
            for_set: counter!(name, "metric_type" => "set"),
        }
    }

    #[cfg(test)]
    fn noop() -> Self {
        Self {
            for_counter: Counter::noop(),
            for_gauge: Counter::noop(),
            for_timer: Counter::noop(),
            for_set: Counter::noop(),
        }
    }

    fn increment(&self, counts: &FlushCounts) {
        self.for_counter.increment(counts.counters as u64);
        self.for_gauge.increment(counts.gauges as u64);
        self.for_timer.increment(counts.timers as u64);
        self.for_set.increment(counts.sets as u64);
    }
}

#[derive(Clone)]
pub struct Telemetry {
    flushes: Counter,
    flushed_by_kind: KindCounter,
    records_flushed: Counter,
    flush_duration: Histogram,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            flushes: counter!("tally_flushes_total"),
            flushed_by_kind: KindCounter::new("tally_flushed_buckets_total"),
            records_flushed: counter!("tally_flushed_records_total"),
            flush_duration: histogram!("tally_flush_duration_secs"),
        }
    }

    #[cfg(test)]
    pub fn noop() -> Self {
        Self {
            flushes: Counter::noop(),
            flushed_by_kind: KindCounter::noop(),
            records_flushed: Counter::noop(),
            flush_duration: Histogram::noop(),
        }
    }

    pub fn record_flush(&self, counts: &FlushCounts, records: usize, elapsed: Duration) {
        self.flushes.increment(1);
        self.flushed_by_kind.increment(counts);
        self.records_flushed.increment(records as u64);
        self.flush_duration.record(elapsed.as_secs_f64());
    }
}
