//! Summarized metric records.

/// A single summarized data point, ready to be serialized by a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricRecord {
    name: String,
    value: f64,
    timestamp: u64,
}

impl MetricRecord {
    /// Creates a new `MetricRecord`.
    pub fn new(name: impl Into<String>, value: f64, timestamp: u64) -> Self {
        Self {
            name: name.into(),
            value,
            timestamp,
        }
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Returns the timestamp, in seconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}
