//! Per-kind flush procedures.
//!
//! Each procedure drains one kind of bucket, applies that kind's retention policy, and appends the summarized
//! [`MetricRecord`]s to the given output vector. They operate on plain maps so that callers decide how the maps are
//! guarded; [`MetricStore`](crate::store::MetricStore) runs all of them under a single lock.

use tally_common::collections::{FastHashMap, FastHashSet};

use crate::{config::Percentile, percentile::threshold, record::MetricRecord};

/// Flushes counters, zero-filling recently active counters that received no data this cycle.
///
/// Every counter with accumulated data is emitted, removed, and has its inactivity count reset to zero. Afterwards,
/// every tracked counter is visited exactly once: those with a non-zero inactivity count are emitted with a value of
/// zero, and all counts are incremented. A counter whose count exceeds `persist_count_keys` stops being tracked.
///
/// Returns the number of records emitted.
pub fn flush_counters(
    counters: &mut FastHashMap<String, f64>, inactivity: &mut FastHashMap<String, u64>, now: u64,
    persist_count_keys: u64, records: &mut Vec<MetricRecord>,
) -> usize {
    let start_len = records.len();

    for (key, value) in counters.drain() {
        records.push(MetricRecord::new(key.as_str(), value, now));
        inactivity.insert(key, 0);
    }

    inactivity.retain(|key, flushes_inactive| {
        if *flushes_inactive > 0 {
            records.push(MetricRecord::new(key.as_str(), 0.0, now));
        }

        *flushes_inactive += 1;
        *flushes_inactive <= persist_count_keys
    });

    records.len() - start_len
}

/// Flushes gauges.
///
/// Every gauge is emitted with its current value. When `delete_gauges` is set, gauges are removed once emitted;
/// otherwise they are left in place and emitted again on the next flush.
///
/// Returns the number of records emitted.
pub fn flush_gauges(
    gauges: &mut FastHashMap<String, f64>, now: u64, delete_gauges: bool, records: &mut Vec<MetricRecord>,
) -> usize {
    let start_len = records.len();

    if delete_gauges {
        records.extend(gauges.drain().map(|(key, value)| MetricRecord::new(key, value, now)));
    } else {
        records.extend(
            gauges
                .iter()
                .map(|(key, value)| MetricRecord::new(key.as_str(), *value, now)),
        );
    }

    records.len() - start_len
}

/// Flushes sets, emitting the number of distinct members in each.
///
/// Sets are always cleared.
///
/// Returns the number of records emitted.
pub fn flush_sets(sets: &mut FastHashMap<String, Vec<String>>, now: u64, records: &mut Vec<MetricRecord>) -> usize {
    let start_len = records.len();

    for (key, members) in sets.drain() {
        let distinct = members.iter().map(String::as_str).collect::<FastHashSet<_>>().len();
        records.push(MetricRecord::new(key, distinct as f64, now));
    }

    records.len() - start_len
}

/// Flushes timers, summarizing each into its percentile thresholds, mean, maximum, minimum, and count.
///
/// For a bucket named `<stem><postfix>`, emits `<stem>.upper_<label><postfix>` / `<stem>.lower_<label><postfix>` per
/// percentile, followed by `<stem>.mean<postfix>`, `<stem>.upper<postfix>`, `<stem>.lower<postfix>`, and
/// `<stem>.count<postfix>`. Timers are always cleared.
///
/// Returns the number of timers summarized.
pub fn flush_timers(
    timers: &mut FastHashMap<String, Vec<f64>>, now: u64, percentiles: &[Percentile], postfix: &str,
    records: &mut Vec<MetricRecord>,
) -> usize {
    let mut flushed = 0;

    for (key, mut samples) in timers.drain() {
        if samples.is_empty() {
            continue;
        }
        flushed += 1;

        samples.sort_by(f64::total_cmp);

        let count = samples.len();
        let min = samples[0];
        let max = samples[count - 1];
        let mean = samples.iter().sum::<f64>() / count as f64;

        // Bucket names carry the postfix since ingestion appends it, so stripping it recovers the bare metric name.
        let stem = key.strip_suffix(postfix).unwrap_or(&key);

        for percentile in percentiles {
            records.push(MetricRecord::new(
                format!("{}.{}{}", stem, percentile.suffix(), postfix),
                threshold(&samples, percentile),
                now,
            ));
        }

        records.push(MetricRecord::new(format!("{}.mean{}", stem, postfix), mean, now));
        records.push(MetricRecord::new(format!("{}.upper{}", stem, postfix), max, now));
        records.push(MetricRecord::new(format!("{}.lower{}", stem, postfix), min, now));
        records.push(MetricRecord::new(format!("{}.count{}", stem, postfix), count as f64, now));
    }

    flushed
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*};
    use similar_asserts::assert_eq;

    use super::*;

    const TS: u64 = 1_700_000_000;

    fn sorted(mut records: Vec<MetricRecord>) -> Vec<MetricRecord> {
        records.sort_by(|a, b| a.name().cmp(b.name()));
        records
    }

    fn pcts(raw: &[&str]) -> Vec<Percentile> {
        raw.iter().map(|r| Percentile::try_from(*r).unwrap()).collect()
    }

    #[test]
    fn counter_emitted_then_zero_filled_then_purged() {
        let mut counters = FastHashMap::default();
        let mut inactivity = FastHashMap::default();
        let persist = 2;

        counters.insert("hits".to_string(), 5.0);

        let mut records = Vec::new();
        assert_eq!(flush_counters(&mut counters, &mut inactivity, TS, persist, &mut records), 1);
        assert_eq!(records, vec![MetricRecord::new("hits", 5.0, TS)]);
        assert!(counters.is_empty());

        // Exactly `persist` zero-fill cycles.
        for cycle in 1..=persist {
            let mut records = Vec::new();
            flush_counters(&mut counters, &mut inactivity, TS + cycle, persist, &mut records);
            assert_eq!(records, vec![MetricRecord::new("hits", 0.0, TS + cycle)]);
        }

        let mut records = Vec::new();
        flush_counters(&mut counters, &mut inactivity, TS + 10, persist, &mut records);
        assert!(records.is_empty());
        assert!(inactivity.is_empty());
    }

    #[test]
    fn counter_without_persistence_is_never_zero_filled() {
        let mut counters = FastHashMap::default();
        let mut inactivity = FastHashMap::default();

        counters.insert("hits".to_string(), 1.0);
        let mut records = Vec::new();
        flush_counters(&mut counters, &mut inactivity, TS, 0, &mut records);
        assert_eq!(records.len(), 1);
        assert!(inactivity.is_empty());

        let mut records = Vec::new();
        flush_counters(&mut counters, &mut inactivity, TS, 0, &mut records);
        assert!(records.is_empty());
    }

    #[test]
    fn reactivated_counter_is_not_zero_filled_in_same_cycle() {
        let mut counters = FastHashMap::default();
        let mut inactivity = FastHashMap::default();

        counters.insert("hits".to_string(), 1.0);
        flush_counters(&mut counters, &mut inactivity, TS, 5, &mut Vec::new());
        flush_counters(&mut counters, &mut inactivity, TS, 5, &mut Vec::new());

        // Mid zero-fill, new data arrives: only the real value is emitted, and the inactivity count starts over.
        counters.insert("hits".to_string(), 3.0);
        let mut records = Vec::new();
        flush_counters(&mut counters, &mut inactivity, TS, 5, &mut records);
        assert_eq!(records, vec![MetricRecord::new("hits", 3.0, TS)]);
        assert_eq!(inactivity.get("hits"), Some(&1));
    }

    #[test]
    fn sticky_gauges_are_reemitted() {
        let mut gauges = FastHashMap::default();
        gauges.insert("temp".to_string(), 21.5);

        for _ in 0..3 {
            let mut records = Vec::new();
            assert_eq!(flush_gauges(&mut gauges, TS, false, &mut records), 1);
            assert_eq!(records, vec![MetricRecord::new("temp", 21.5, TS)]);
        }
    }

    #[test]
    fn deleted_gauges_are_emitted_once() {
        let mut gauges = FastHashMap::default();
        gauges.insert("temp".to_string(), 21.5);

        let mut records = Vec::new();
        assert_eq!(flush_gauges(&mut gauges, TS, true, &mut records), 1);
        assert!(gauges.is_empty());

        let mut records = Vec::new();
        assert_eq!(flush_gauges(&mut gauges, TS, true, &mut records), 0);
        assert!(records.is_empty());
    }

    #[test]
    fn set_cardinality_deduplicates() {
        let mut sets = FastHashMap::default();
        sets.insert("users".to_string(), vec!["a".to_string(), "a".to_string(), "b".to_string()]);

        let mut records = Vec::new();
        flush_sets(&mut sets, TS, &mut records);
        assert_eq!(records, vec![MetricRecord::new("users", 2.0, TS)]);
        assert!(sets.is_empty());

        let mut records = Vec::new();
        flush_sets(&mut sets, TS, &mut records);
        assert!(records.is_empty());
    }

    #[test]
    fn timer_summary() {
        let mut timers = FastHashMap::default();
        timers.insert("api.latency".to_string(), vec![5.0, 1.0, 4.0, 2.0, 3.0]);

        let mut records = Vec::new();
        assert_eq!(flush_timers(&mut timers, TS, &pcts(&["50", "-50"]), "", &mut records), 1);

        let expected = vec![
            MetricRecord::new("api.latency.count", 5.0, TS),
            MetricRecord::new("api.latency.lower", 1.0, TS),
            MetricRecord::new("api.latency.lower_50", 4.0, TS),
            MetricRecord::new("api.latency.mean", 3.0, TS),
            MetricRecord::new("api.latency.upper", 5.0, TS),
            MetricRecord::new("api.latency.upper_50", 3.0, TS),
        ];
        assert_eq!(sorted(records), expected);
        assert!(timers.is_empty());
    }

    #[test]
    fn single_sample_timer() {
        let mut timers = FastHashMap::default();
        timers.insert("t".to_string(), vec![7.0]);

        let mut records = Vec::new();
        flush_timers(&mut timers, TS, &pcts(&["90", "-10"]), "", &mut records);

        let expected = vec![
            MetricRecord::new("t.count", 1.0, TS),
            MetricRecord::new("t.lower", 7.0, TS),
            MetricRecord::new("t.lower_10", 7.0, TS),
            MetricRecord::new("t.mean", 7.0, TS),
            MetricRecord::new("t.upper", 7.0, TS),
            MetricRecord::new("t.upper_90", 7.0, TS),
        ];
        assert_eq!(sorted(records), expected);
    }

    #[test]
    fn timer_names_keep_postfix_at_the_end() {
        let mut timers = FastHashMap::default();
        timers.insert("db.query.srv1".to_string(), vec![1.0, 2.0]);

        let mut records = Vec::new();
        flush_timers(&mut timers, TS, &pcts(&["99.9"]), ".srv1", &mut records);

        let names = sorted(records).into_iter().map(|r| r.name().to_string()).collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "db.query.count.srv1",
                "db.query.lower.srv1",
                "db.query.mean.srv1",
                "db.query.upper.srv1",
                "db.query.upper_99_9.srv1",
            ]
        );
    }

    #[test]
    fn empty_timer_is_skipped() {
        let mut timers = FastHashMap::default();
        timers.insert("t".to_string(), Vec::new());

        let mut records = Vec::new();
        assert_eq!(flush_timers(&mut timers, TS, &pcts(&["90"]), "", &mut records), 0);
        assert!(records.is_empty());
        assert!(timers.is_empty());
    }

    proptest! {
        #[test]
        fn counter_value_is_sum_of_increments(deltas in arb_vec(-1_000i32..1_000, 1..50)) {
            let mut counters = FastHashMap::default();
            let mut inactivity = FastHashMap::default();

            for delta in &deltas {
                *counters.entry("c".to_string()).or_insert(0.0) += f64::from(*delta);
            }

            let mut records = Vec::new();
            flush_counters(&mut counters, &mut inactivity, TS, 1, &mut records);

            let expected = deltas.iter().map(|d| f64::from(*d)).sum::<f64>();
            prop_assert_eq!(records, vec![MetricRecord::new("c", expected, TS)]);
            prop_assert!(counters.is_empty());
        }

        #[test]
        fn set_count_is_distinct_member_count(members in arb_vec("[a-e]{1,2}", 0..40)) {
            let mut sets = FastHashMap::default();
            if !members.is_empty() {
                sets.insert("s".to_string(), members.clone());
            }

            let mut records = Vec::new();
            flush_sets(&mut sets, TS, &mut records);

            let mut distinct = members.clone();
            distinct.sort();
            distinct.dedup();

            if members.is_empty() {
                prop_assert!(records.is_empty());
            } else {
                prop_assert_eq!(records, vec![MetricRecord::new("s", distinct.len() as f64, TS)]);
            }
        }

        #[test]
        fn timer_summary_bounds(samples in arb_vec(-1.0e6f64..1.0e6, 1..200)) {
            let mut timers = FastHashMap::default();
            timers.insert("t".to_string(), samples.clone());

            let mut records = Vec::new();
            flush_timers(&mut timers, TS, &pcts(&["90", "-10", "50"]), "", &mut records);

            let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
            let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);

            for record in &records {
                match record.name() {
                    "t.count" => {
                        prop_assert_eq!(record.value(), samples.len() as f64);
                    }
                    "t.lower" => {
                        prop_assert_eq!(record.value(), min);
                    }
                    "t.upper" => {
                        prop_assert_eq!(record.value(), max);
                    }
                    _ => {
                        prop_assert!(record.value() >= min - 1e-6);
                        prop_assert!(record.value() <= max + 1e-6);
                    }
                }
            }
            prop_assert_eq!(records.len(), 3 + 4);
        }
    }
}
