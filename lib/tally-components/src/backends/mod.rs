//! Backend implementations.

use std::fmt;

use serde::Deserialize;
use tally_config::GenericConfiguration;
use tally_core::{aggregator::Aggregator, backend::Backend};
use tally_error::GenericError;

mod graphite;
pub use self::graphite::{GraphiteBackend, GraphiteConfiguration};

mod open_falcon;
pub use self::open_falcon::{OpenFalconBackend, OpenFalconConfiguration};

mod telemetry;

/// A remote `host:port` pair.
///
/// The host may be a name or an address literal, and is resolved at connect time. The port must be a valid TCP port.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(try_from = "String")]
pub struct RemoteAddress(String);

impl RemoteAddress {
    /// Returns the address as `host:port`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RemoteAddress {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| format!("Invalid address '{}': expected host:port", raw))?;

        if host.is_empty() {
            return Err(format!("Invalid address '{}': missing host", raw));
        }
        if port.parse::<u16>().is_err() {
            return Err(format!("Invalid address '{}': invalid port", raw));
        }

        Ok(Self(raw))
    }
}

impl TryFrom<&str> for RemoteAddress {
    type Error = String;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::try_from(raw.to_string())
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which backend flushed metrics are sent to.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Graphite plaintext protocol over TCP.
    #[default]
    Graphite,

    /// Open-Falcon agent push API over HTTP.
    OpenFalcon,
}

/// Backend selection.
#[derive(Clone, Debug, Deserialize)]
pub struct BackendConfiguration {
    /// The backend to send flushed metrics to.
    ///
    /// Defaults to `graphite`.
    #[serde(default)]
    backend: BackendKind,
}

impl BackendConfiguration {
    /// Creates a new `BackendConfiguration` from the given configuration.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        Ok(config.as_typed()?)
    }

    /// Returns the selected backend kind.
    pub fn kind(&self) -> BackendKind {
        self.backend
    }

    /// Builds the selected backend on top of `aggregator`.
    ///
    /// # Errors
    ///
    /// If the selected backend's configuration is invalid, or its transport cannot be created, an error is returned.
    pub fn build(&self, config: &GenericConfiguration, aggregator: Aggregator) -> Result<Box<dyn Backend>, GenericError> {
        match self.backend {
            BackendKind::Graphite => {
                let backend = GraphiteConfiguration::from_configuration(config)?.build(aggregator);
                Ok(Box::new(backend))
            }
            BackendKind::OpenFalcon => {
                let backend = OpenFalconConfiguration::from_configuration(config)?.build(aggregator)?;
                Ok(Box::new(backend))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write as _, sync::Arc};

    use tally_config::ConfigurationLoader;
    use tally_core::{config::FlushConfiguration, store::MetricStore};

    use super::*;

    fn config_from_yaml(contents: &str) -> GenericConfiguration {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        ConfigurationLoader::default().from_yaml(file.path()).unwrap().into_generic()
    }

    fn aggregator() -> Aggregator {
        Aggregator::new(Arc::new(MetricStore::new()), FlushConfiguration::with_defaults())
    }

    #[test]
    fn remote_address_validation() {
        assert!(RemoteAddress::try_from("127.0.0.1:2003").is_ok());
        assert!(RemoteAddress::try_from("graphite.internal:2003").is_ok());
        assert!(RemoteAddress::try_from("[::1]:2003").is_ok());

        for raw in ["", "localhost", ":2003", "localhost:", "localhost:http", "localhost:70000"] {
            assert!(RemoteAddress::try_from(raw).is_err(), "expected '{}' to be rejected", raw);
        }
    }

    #[test]
    fn defaults_to_graphite() {
        let config = config_from_yaml("{}\n");
        let backend_config = BackendConfiguration::from_configuration(&config).unwrap();
        assert_eq!(backend_config.kind(), BackendKind::Graphite);

        let backend = backend_config.build(&config, aggregator()).unwrap();
        assert_eq!(backend.name(), "graphite");
    }

    #[test]
    fn selects_open_falcon() {
        let config = config_from_yaml("backend: open_falcon\nopen_falcon_address: \"10.0.0.5:1988\"\n");
        let backend = BackendConfiguration::from_configuration(&config)
            .unwrap()
            .build(&config, aggregator())
            .unwrap();
        assert_eq!(backend.name(), "open_falcon");
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let config = config_from_yaml("backend: carbon\n");
        assert!(BackendConfiguration::from_configuration(&config).is_err());
    }

    #[test]
    fn invalid_backend_address_is_rejected() {
        let config = config_from_yaml("backend: graphite\ngraphite_address: \"no-port\"\n");
        let backend_config = BackendConfiguration::from_configuration(&config).unwrap();
        assert!(backend_config.build(&config, aggregator()).is_err());
    }
}
