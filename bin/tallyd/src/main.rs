//! Statsd aggregation daemon.
//!
//! Listens for statsd metrics over UDP, aggregates them in memory, and flushes the summarized values to Graphite or
//! Open-Falcon on a fixed interval.

#![deny(warnings)]
#![deny(missing_docs)]

use std::path::PathBuf;

use clap::Parser;
use tally_app::prelude::*;
use tally_config::{ConfigurationLoader, GenericConfiguration};
use tally_error::{ErrorContext as _, GenericError};
use tracing::{error, info};

mod config;

mod run;
use self::run::run;

const ENV_PREFIX: &str = "TALLY";

/// Statsd aggregation daemon.
#[derive(Debug, Parser)]
#[command(name = "tallyd", version, about)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Log every record before it is sent to the backend.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = load_configuration(&cli)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {:?}", e)));

    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("invalid logging configuration: {:?}", e)));

    let _guard = initialize_logging(&logging_config)
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {}", e)));

    match run(configuration).await {
        Ok(()) => info!("tallyd stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

/// Loads configuration from the optional configuration file and the environment, then applies command-line overrides.
fn load_configuration(cli: &Cli) -> Result<GenericConfiguration, GenericError> {
    let mut loader = ConfigurationLoader::default();
    if let Some(path) = &cli.config {
        loader = loader
            .from_yaml(path)
            .with_error_context(|| format!("Failed to load configuration file '{}'.", path.display()))?;
    }

    let mut loader = loader.from_environment(ENV_PREFIX)?;
    if cli.debug {
        loader = loader.with_override("debug", true);
    }

    Ok(loader.into_generic())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;

    #[test]
    fn cli_parsing() {
        let cli = Cli::try_parse_from(["tallyd", "--config", "/etc/tally.yaml", "--debug"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tally.yaml")));
        assert!(cli.debug);

        let cli = Cli::try_parse_from(["tallyd"]).unwrap();
        assert_eq!(cli.config, None);
        assert!(!cli.debug);
    }

    #[test]
    fn debug_flag_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(b"debug: false\nflush_interval: 5\n").unwrap();

        let cli = Cli {
            config: Some(file.path().to_path_buf()),
            debug: true,
        };
        let configuration = load_configuration(&cli).unwrap();
        assert!(configuration.get_typed::<bool>("debug").unwrap());
        assert_eq!(configuration.get_typed::<u64>("flush_interval").unwrap(), 5);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli {
            config: Some(PathBuf::from("/nonexistent/tally.yaml")),
            debug: false,
        };
        assert!(load_configuration(&cli).is_err());
    }
}
