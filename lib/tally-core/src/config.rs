//! Flush configuration.

use std::fmt;

use serde::Deserialize;
use tally_config::GenericConfiguration;
use tally_error::GenericError;

const fn default_persist_count_keys() -> u64 {
    60
}

const fn default_delete_gauges() -> bool {
    true
}

fn default_percentiles() -> Vec<RawPercentile> {
    vec![RawPercentile::Text("90".into())]
}

/// Which end of the sorted sample sequence a percentile threshold is measured from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Tail {
    /// Measured from the high end: `upper_90` is the value 90% of samples are at or below.
    Upper,

    /// Measured from the low end. Written with a leading `-` (`-10`).
    Lower,
}

/// A percentile to calculate over timer samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Percentile {
    magnitude: f64,
    label: String,
}

impl Percentile {
    /// Returns the tail this percentile is measured from.
    pub fn tail(&self) -> Tail {
        if self.magnitude < 0.0 {
            Tail::Lower
        } else {
            Tail::Upper
        }
    }

    /// Returns the signed magnitude, as configured.
    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    /// Returns the position of the threshold in the sorted samples, as a percentage from the low end.
    ///
    /// Upper-tail percentiles are already expressed this way. Lower-tail percentiles are stored negated, so `-10`
    /// becomes `90`.
    pub fn absolute(&self) -> f64 {
        match self.tail() {
            Tail::Upper => self.magnitude,
            Tail::Lower => 100.0 + self.magnitude,
        }
    }

    /// Returns the label used in metric names, without any leading sign.
    ///
    /// Periods in the configured value are replaced with underscores, so `99.9` is labeled `99_9`.
    pub fn label(&self) -> &str {
        self.label.strip_prefix('-').unwrap_or(&self.label)
    }

    /// Returns the metric name suffix for this percentile: `upper_<label>` or `lower_<label>`.
    pub fn suffix(&self) -> String {
        match self.tail() {
            Tail::Upper => format!("upper_{}", self.label()),
            Tail::Lower => format!("lower_{}", self.label()),
        }
    }
}

impl TryFrom<&str> for Percentile {
    type Error = String;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        let raw = raw.trim();
        let magnitude = raw
            .parse::<f64>()
            .map_err(|_| format!("Invalid percentile: {}", raw))?;

        // Magnitudes live in (0, 100] for either tail.
        if !magnitude.is_finite() || magnitude == 0.0 || magnitude.abs() > 100.0 {
            return Err(format!("Percentile out of range: {}", raw));
        }

        Ok(Self {
            magnitude,
            label: raw.replace('.', "_"),
        })
    }
}

impl fmt::Display for Percentile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix())
    }
}

/// A percentile as it appears in configuration.
///
/// YAML and environment variables hand back bare numbers (`90`, `-10`), while quoted values arrive as strings. Both are
/// accepted, but only strings keep their exact spelling in the label: the bare number `99.0` is labeled `99`, while the
/// string `"99.0"` is labeled `99_0`.
#[derive(Clone, Deserialize)]
#[serde(untagged)]
enum RawPercentile {
    Text(String),
    Number(f64),
}

impl RawPercentile {
    fn to_percentile(&self) -> Result<Percentile, String> {
        match self {
            RawPercentile::Text(s) => Percentile::try_from(s.as_str()),
            RawPercentile::Number(n) => Percentile::try_from(n.to_string().as_str()),
        }
    }
}

#[derive(Deserialize)]
struct RawFlushConfiguration {
    #[serde(default = "default_percentiles")]
    percentiles: Vec<RawPercentile>,

    #[serde(default = "default_persist_count_keys")]
    persist_count_keys: u64,

    #[serde(default = "default_delete_gauges")]
    delete_gauges: bool,

    #[serde(default)]
    postfix: String,
}

/// Flush configuration.
///
/// Controls how each metric kind is summarized and which buckets survive a flush.
///
/// ## Counter inactivity
///
/// Once a counter has been flushed, it keeps being reported with a value of zero on every subsequent flush in which it
/// received no data, for up to `persist_count_keys` flushes. After that it is forgotten until written to again. This
/// keeps sparse counters visible in dashboards without reporting dead counters forever.
///
/// ## Gauges
///
/// By default (`delete_gauges: true`) a gauge is reported once per write and then removed. When disabled, the last
/// value is re-reported on every flush until it changes.
#[derive(Clone, Debug, Deserialize)]
#[serde(try_from = "RawFlushConfiguration")]
pub struct FlushConfiguration {
    percentiles: Vec<Percentile>,
    persist_count_keys: u64,
    delete_gauges: bool,
    postfix: String,
}

impl FlushConfiguration {
    /// Creates a new `FlushConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If any configured percentile is unparsable or outside of (0, 100], an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Creates a new `FlushConfiguration` with default values.
    pub fn with_defaults() -> Self {
        Self {
            percentiles: vec![Percentile {
                magnitude: 90.0,
                label: "90".into(),
            }],
            persist_count_keys: default_persist_count_keys(),
            delete_gauges: default_delete_gauges(),
            postfix: String::new(),
        }
    }

    /// Sets the percentiles to calculate over timers.
    pub fn with_percentiles(mut self, percentiles: Vec<Percentile>) -> Self {
        self.percentiles = percentiles;
        self
    }

    /// Sets the number of flushes an inactive counter keeps being zero-filled for.
    pub fn with_persist_count_keys(mut self, persist_count_keys: u64) -> Self {
        self.persist_count_keys = persist_count_keys;
        self
    }

    /// Sets whether gauges are removed after being flushed.
    pub fn with_delete_gauges(mut self, delete_gauges: bool) -> Self {
        self.delete_gauges = delete_gauges;
        self
    }

    /// Sets the bucket name postfix.
    pub fn with_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = postfix.into();
        self
    }

    /// Returns the percentiles to calculate over timers.
    pub fn percentiles(&self) -> &[Percentile] {
        &self.percentiles
    }

    /// Returns the number of flushes an inactive counter keeps being zero-filled for.
    pub fn persist_count_keys(&self) -> u64 {
        self.persist_count_keys
    }

    /// Returns `true` if gauges are removed after being flushed.
    pub fn delete_gauges(&self) -> bool {
        self.delete_gauges
    }

    /// Returns the postfix carried by every bucket name.
    pub fn postfix(&self) -> &str {
        &self.postfix
    }
}

impl TryFrom<RawFlushConfiguration> for FlushConfiguration {
    type Error = String;

    fn try_from(raw: RawFlushConfiguration) -> Result<Self, Self::Error> {
        let percentiles = raw
            .percentiles
            .iter()
            .map(RawPercentile::to_percentile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            percentiles,
            persist_count_keys: raw.persist_count_keys,
            delete_gauges: raw.delete_gauges,
            postfix: raw.postfix,
        })
    }
}
