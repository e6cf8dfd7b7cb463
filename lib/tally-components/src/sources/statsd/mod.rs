use std::{future::Future, net::SocketAddr, sync::Arc};

use serde::Deserialize;
use tally_config::GenericConfiguration;
use tally_core::store::MetricStore;
use tally_error::{ErrorContext as _, GenericError};
use tally_io::statsd::{parse_statsd_line, StatsdLines};
use tokio::{net::UdpSocket, pin, select};
use tracing::{debug, info, warn};

mod telemetry;
use self::telemetry::Telemetry;

fn default_listen_address() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8125))
}

const fn default_max_udp_packet_size() -> usize {
    1472
}

/// Statsd source.
///
/// Receives statsd lines over UDP and writes them into the shared metric store.
#[derive(Clone, Debug, Deserialize)]
pub struct StatsdConfiguration {
    /// Address to listen on for statsd datagrams.
    ///
    /// Defaults to `127.0.0.1:8125`.
    #[serde(default = "default_listen_address")]
    listen_address: SocketAddr,

    /// Size of the receive buffer, in bytes.
    ///
    /// Datagrams larger than this are truncated, which usually leaves their last line unparsable.
    ///
    /// Defaults to 1472 bytes.
    #[serde(default = "default_max_udp_packet_size")]
    max_udp_packet_size: usize,

    /// Prefix prepended to every bucket name.
    #[serde(default)]
    prefix: String,

    /// Postfix appended to every bucket name.
    #[serde(default)]
    postfix: String,
}

impl StatsdConfiguration {
    /// Creates a new `StatsdConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Returns the address to listen on.
    pub fn listen_address(&self) -> SocketAddr {
        self.listen_address
    }

    /// Sets the address to listen on.
    pub fn with_listen_address(mut self, listen_address: SocketAddr) -> Self {
        self.listen_address = listen_address;
        self
    }

    /// Binds the listening socket and returns a source that writes into `store`.
    ///
    /// # Errors
    ///
    /// If the socket cannot be bound, an error is returned.
    pub async fn build(&self, store: Arc<MetricStore>) -> Result<StatsdSource, GenericError> {
        let socket = UdpSocket::bind(self.listen_address)
            .await
            .with_error_context(|| format!("Failed to bind statsd listener to {}.", self.listen_address))?;

        Ok(StatsdSource {
            socket,
            buffer_size: self.max_udp_packet_size,
            ingestor: Ingestor {
                store,
                prefix: self.prefix.clone(),
                postfix: self.postfix.clone(),
                telemetry: Telemetry::new(),
            },
        })
    }
}

/// Writes the lines of a datagram into the store.
struct Ingestor {
    store: Arc<MetricStore>,
    prefix: String,
    postfix: String,
    telemetry: Telemetry,
}

impl Ingestor {
    /// Returns the number of lines written.
    fn ingest(&self, datagram: &[u8]) -> usize {
        self.telemetry.record_packet(datagram.len());

        let mut samples = Vec::new();
        for line in StatsdLines::new(datagram) {
            match parse_statsd_line(line) {
                Ok(sample) => {
                    let key = format!("{}{}{}", self.prefix, sample.name, self.postfix);
                    samples.push((key, sample.value.into_sample_value()));
                }
                Err(e) => {
                    debug!(error = %e, line = %String::from_utf8_lossy(line), "Failed to parse statsd line.");
                    self.telemetry.record_parse_failure();
                }
            }
        }

        let ingested = samples.len();
        self.store.insert_many(samples);
        self.telemetry.record_ingested(ingested);
        ingested
    }
}

/// UDP statsd listener.
pub struct StatsdSource {
    socket: UdpSocket,
    buffer_size: usize,
    ingestor: Ingestor,
}

impl StatsdSource {
    /// Returns the address the source is bound to.
    ///
    /// # Errors
    ///
    /// If the address cannot be queried from the socket, an error is returned.
    pub fn local_addr(&self) -> Result<SocketAddr, GenericError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receives datagrams until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        pin!(shutdown);

        let listen_address = self.local_addr().ok();
        info!(address = ?listen_address, "Statsd listener started.");

        let mut buffer = vec![0u8; self.buffer_size];
        loop {
            select! {
                _ = &mut shutdown => break,
                result = self.socket.recv_from(&mut buffer) => match result {
                    Ok((len, _peer)) => {
                        self.ingestor.ingest(&buffer[..len]);
                    }
                    Err(e) => warn!(error = %e, "Failed to receive statsd datagram."),
                },
            }
        }

        info!(address = ?listen_address, "Statsd listener stopped.");
    }
}
