use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use serde::{Deserialize, Serialize};
use snafu::{ensure, ResultExt as _, Snafu};
use tally_config::GenericConfiguration;
use tally_core::{
    aggregator::Aggregator,
    backend::{Backend, SubmitSummary},
    record::MetricRecord,
};
use tally_error::GenericError;
use tokio::time::Instant;
use tracing::info;

use super::{telemetry::Telemetry, RemoteAddress};

const BACKEND_NAME: &str = "open_falcon";
const COUNTER_TYPE: &str = "GAUGE";

fn default_open_falcon_address() -> RemoteAddress {
    RemoteAddress("127.0.0.1:1988".to_string())
}

fn default_open_falcon_endpoint() -> String {
    "statsd".to_string()
}

const fn default_flush_interval() -> u64 {
    10
}

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
enum OpenFalconError {
    #[snafu(display("failed to serialize metrics payload"))]
    Encode { source: serde_json::Error },

    #[snafu(display("timed out sending metrics to {}", url))]
    DeadlineExceeded { url: String },

    #[snafu(display("failed to send metrics to {}", url))]
    Request { url: String, source: reqwest::Error },

    #[snafu(display("{} responded with unexpected status {}", url, status))]
    UnexpectedStatus { url: String, status: StatusCode },
}

/// A single data point, as accepted by the Open-Falcon agent push API.
#[derive(Debug, Serialize)]
struct OpenFalconMessage<'a> {
    metric: &'a str,
    endpoint: &'a str,
    tags: &'a str,
    value: f64,
    timestamp: u64,
    #[serde(rename = "counterType")]
    counter_type: &'static str,
    step: u64,
}

/// Splits a record name into the metric name and its tag string at the last `/`.
///
/// A name without any `/` has no tags.
fn split_metric_name(name: &str) -> (&str, &str) {
    match name.rsplit_once('/') {
        Some((metric, tags)) => (metric, tags),
        None => (name, ""),
    }
}

/// Open-Falcon backend.
///
/// Sends flushed metrics as a single JSON array to the push API of an Open-Falcon agent. Every data point is reported
/// with a counter type of `GAUGE`, since values are already aggregated by the time they are sent.
///
/// Record names may carry tags after their last `/`: `api.requests/service=web,region=us` is sent as the metric
/// `api.requests` with tags `service=web,region=us`.
#[derive(Clone, Debug, Deserialize)]
pub struct OpenFalconConfiguration {
    /// Address of the Open-Falcon agent, as `host:port`.
    ///
    /// Defaults to `127.0.0.1:1988`.
    #[serde(default = "default_open_falcon_address")]
    open_falcon_address: RemoteAddress,

    /// The `endpoint` reported for every data point.
    ///
    /// Defaults to `statsd`.
    #[serde(default = "default_open_falcon_endpoint")]
    open_falcon_endpoint: String,

    /// The flush interval, in seconds, reported as the `step` of every data point.
    ///
    /// Defaults to 10 seconds.
    #[serde(default = "default_flush_interval")]
    flush_interval: u64,
}

impl OpenFalconConfiguration {
    /// Creates a new `OpenFalconConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Creates a new `OpenFalconConfiguration` targeting `address`, with default values for everything else.
    pub fn from_address(address: RemoteAddress) -> Self {
        Self {
            open_falcon_address: address,
            open_falcon_endpoint: default_open_falcon_endpoint(),
            flush_interval: default_flush_interval(),
        }
    }

    /// Sets the `endpoint` reported for every data point.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.open_falcon_endpoint = endpoint.into();
        self
    }

    /// Sets the flush interval reported as the `step` of every data point.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval.as_secs();
        self
    }

    /// Builds an [`OpenFalconBackend`] that drains `aggregator`.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be created, an error is returned.
    pub fn build(&self, aggregator: Aggregator) -> Result<OpenFalconBackend, GenericError> {
        let client = Client::builder().build()?;

        Ok(OpenFalconBackend {
            client,
            push_url: format!("http://{}/v1/push", self.open_falcon_address),
            endpoint: self.open_falcon_endpoint.clone(),
            step: self.flush_interval,
            aggregator,
            telemetry: Telemetry::new(BACKEND_NAME),
        })
    }
}

/// Open-Falcon HTTP backend.
pub struct OpenFalconBackend {
    client: Client,
    push_url: String,
    endpoint: String,
    step: u64,
    aggregator: Aggregator,
    telemetry: Telemetry,
}

impl OpenFalconBackend {
    fn encode(&self, records: &[MetricRecord]) -> Result<Vec<u8>, OpenFalconError> {
        let messages = records
            .iter()
            .map(|record| {
                let (metric, tags) = split_metric_name(record.name());
                OpenFalconMessage {
                    metric,
                    endpoint: &self.endpoint,
                    tags,
                    value: record.value(),
                    timestamp: record.timestamp(),
                    counter_type: COUNTER_TYPE,
                    step: self.step,
                }
            })
            .collect::<Vec<_>>();

        serde_json::to_vec(&messages).context(Encode)
    }

    async fn transmit(&self, payload: Vec<u8>, deadline: Instant) -> Result<(), OpenFalconError> {
        let url = self.push_url.as_str();

        let remaining = deadline.saturating_duration_since(Instant::now());
        ensure!(!remaining.is_zero(), DeadlineExceeded { url });

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .timeout(remaining)
            .send()
            .await
            .context(Request { url })?;

        let status = response.status();
        ensure!(status.is_success(), UnexpectedStatus { url, status });

        Ok(())
    }

    async fn encode_and_transmit(&self, records: &[MetricRecord], deadline: Instant) -> Result<(), OpenFalconError> {
        let payload = self.encode(records)?;
        if self.aggregator.is_debug() {
            info!(payload = %String::from_utf8_lossy(&payload), "Open-Falcon payload.");
        }

        self.transmit(payload, deadline).await
    }
}

#[async_trait]
impl Backend for OpenFalconBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn submit(&self, deadline: Instant) -> Result<SubmitSummary, GenericError> {
        let records = self.aggregator.flush();
        if records.is_empty() {
            return Ok(SubmitSummary::default());
        }

        if let Err(e) = self.encode_and_transmit(&records, deadline).await {
            self.telemetry.record_failure(records.len());
            return Err(e.into());
        }

        info!(url = %self.push_url, records = records.len(), "Sent metrics to Open-Falcon.");
        self.telemetry.record_success(records.len());

        Ok(SubmitSummary {
            records_sent: records.len(),
        })
    }
}
