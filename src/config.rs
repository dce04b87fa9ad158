
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;
use tracing_subscriber::{filter::ParseError, EnvFilter};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("threshold deviation must be a finite, non-negative number (got {0})")]
    Threshold(f64),

    #[error("invalid log level {directive:?}: {source}")]
    LogLevel {
        directive: String,
        #[source]
        source: ParseError,
    },
}

/// Serial scale to HTTP bridge
#[derive(Debug, Clone, Parser)]
#[command(name = "weightd", version, long_about = None)]
pub struct Config {
    /// Serial device the scale is attached to
    #[arg(short, long, env = "WEIGHTD_DEVICE", default_value = "/dev/ttyACM0")]
    pub device: PathBuf,

    /// Address the HTTP endpoint listens on
    #[arg(short, long, env = "WEIGHTD_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Readings kept before the oldest is dropped (one more is retained)
    #[arg(long, env = "WEIGHTD_MAX_SIZE", default_value_t = 30)]
    pub max_size: usize,

    /// Largest distance from the middle reading still counted in the average
    #[arg(long, env = "WEIGHTD_THRESHOLD", default_value_t = 20.0)]
    pub threshold_deviation: f64,

    /// Pause before reopening the device or retrying a failed read
    #[arg(long, env = "WEIGHTD_RECONNECT_DELAY", default_value_t = 1000)]
    pub reconnect_delay_ms: u64,

    /// Log level, overridden by RUST_LOG
    #[arg(long, env = "WEIGHTD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "WEIGHTD_LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if !self.threshold_deviation.is_finite() || self.threshold_deviation < 0.0 {
            return Err(ConfigError::Threshold(self.threshold_deviation));
        }
        if let Err(source) = EnvFilter::try_new(&self.log_level) {
            return Err(ConfigError::LogLevel {
                directive: self.log_level,
                source,
            });
        }
        Ok(self)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Parses the full argument list (including the command name) into a
/// validated configuration.
pub fn parse_config(args: &[String]) -> Result<Config, ConfigError> {
    Config::try_parse_from(args)?.validate()
}
