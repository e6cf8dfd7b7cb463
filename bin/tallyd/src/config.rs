use std::time::Duration;

use serde::Deserialize;
use tally_config::GenericConfiguration;
use tally_error::{generic_error, GenericError};

const fn default_flush_interval() -> u64 {
    10
}

/// Daemon-level configuration.
#[derive(Clone, Debug, Deserialize)]
pub struct TallydConfiguration {
    /// How often the store is flushed to the backend, in seconds.
    ///
    /// Also bounds how long a single flush may spend transmitting.
    ///
    /// Defaults to 10 seconds.
    #[serde(default = "default_flush_interval")]
    flush_interval: u64,

    /// Whether every flushed record is logged.
    #[serde(default)]
    debug: bool,
}

impl TallydConfiguration {
    /// Creates a new `TallydConfiguration` from the given configuration.
    ///
    /// # Errors
    ///
    /// If the flush interval is zero, an error is returned.
    pub fn from_configuration(config: &GenericConfiguration) -> Result<Self, GenericError> {
        let daemon_config: Self = config.as_typed()?;
        if daemon_config.flush_interval == 0 {
            return Err(generic_error!("flush_interval must be at least 1 second."));
        }

        Ok(daemon_config)
    }

    /// Returns the flush interval.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }

    /// Returns `true` if every flushed record should be logged.
    pub fn debug(&self) -> bool {
        self.debug
    }
}
