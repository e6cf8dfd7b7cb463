use std::fmt::Write as _;

use async_trait::async_trait;
use serde::Deserialize;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tally_config::GenericConfiguration;
use tally_core::{
    aggregator::Aggregator,
    backend::{Backend, SubmitSummary},
    record::MetricRecord,
};
use tally_error::GenericError;
use tokio::{
    io::AsyncWriteExt as _,
    net::TcpStream,
    time::{timeout_at, Instant},
};
use tracing::{debug, info};

use super::{telemetry::Telemetry, RemoteAddress};

const BACKEND_NAME: &str = "graphite";

fn default_graphite_address() -> RemoteAddress {
    RemoteAddress("127.0.0.1:2003".to_string())
}

#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
enum GraphiteError {
    #[snafu(display("failed to connect to Graphite at {}", address))]
    Connect { address: String, source: std::io::Error },

    #[snafu(display("failed to write metrics to Graphite at {}", address))]
    Write { address: String, source: std::io::Error },

    #[snafu(display("timed out sending metrics to Graphite at {}", address))]
    DeadlineExceeded { address: String },
}

/// Graphite backend.
///
/// Sends flushed metrics over the Graphite plaintext protocol, one `<name> <value> <timestamp>` line per record, using a
/// fresh TCP connection for every flush.
#[derive(Clone, Debug, Deserialize)]
pub struct GraphiteConfiguration {
    /// Address of the Graphite plaintext listener, as `host:port`.
    ///
    /// Defaults to `127.0.0.1:2003`.
    #[serde(default = "default_graphite_address")]
    graphite_address: RemoteAddress,
}

impl GraphiteConfiguration {
    /// Creates a new `GraphiteConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Creates a new `GraphiteConfiguration` targeting `address`.
    pub fn from_address(address: RemoteAddress) -> Self {
        Self {
            graphite_address: address,
        }
    }

    /// Builds a [`GraphiteBackend`] that drains `aggregator`.
    pub fn build(&self, aggregator: Aggregator) -> GraphiteBackend {
        GraphiteBackend {
            address: self.graphite_address.clone(),
            aggregator,
            telemetry: Telemetry::new(BACKEND_NAME),
        }
    }
}

/// Graphite plaintext backend.
pub struct GraphiteBackend {
    address: RemoteAddress,
    aggregator: Aggregator,
    telemetry: Telemetry,
}

impl GraphiteBackend {
    async fn transmit(&self, payload: &[u8], deadline: Instant) -> Result<(), GraphiteError> {
        let address = self.address.as_str();

        let mut stream = timeout_at(deadline, TcpStream::connect(address))
            .await
            .ok()
            .context(DeadlineExceeded { address })?
            .context(Connect { address })?;

        timeout_at(deadline, stream.write_all(payload))
            .await
            .ok()
            .context(DeadlineExceeded { address })?
            .context(Write { address })?;

        // The payload has already been handed to the kernel, so a failed shutdown does not fail the flush.
        match timeout_at(deadline, stream.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(address, error = %e, "Failed to shut down Graphite connection."),
            Err(_) => debug!(address, "Timed out shutting down Graphite connection."),
        }

        Ok(())
    }
}

#[async_trait]
impl Backend for GraphiteBackend {
    fn name(&self) -> &'static str {
        BACKEND_NAME
    }

    async fn submit(&self, deadline: Instant) -> Result<SubmitSummary, GenericError> {
        let records = self.aggregator.flush();
        if records.is_empty() {
            return Ok(SubmitSummary::default());
        }

        let payload = encode_lines(&records);
        if let Err(e) = self.transmit(payload.as_bytes(), deadline).await {
            self.telemetry.record_failure(records.len());
            return Err(e.into());
        }

        info!(address = %self.address, records = records.len(), "Sent metrics to Graphite.");
        self.telemetry.record_success(records.len());

        Ok(SubmitSummary {
            records_sent: records.len(),
        })
    }
}

/// Encodes records as Graphite plaintext lines.
///
/// Values use the shortest decimal representation that round-trips, without an exponent or trailing zeros.
fn encode_lines(records: &[MetricRecord]) -> String {
    let mut payload = String::with_capacity(records.len() * 64);
    for record in records {
        // Writing into a `String` cannot fail.
        let _ = writeln!(payload, "{} {} {}", record.name(), record.value(), record.timestamp());
    }
    payload
}
