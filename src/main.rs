use anyhow::Context;
use std::{env, sync::Arc, thread};
use tokio::{net::TcpListener, sync::mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod payload;
mod readings;
mod serial;
mod webserver;

use config::{Config, ConfigError};
use readings::WeightReadings;
use serial::WeightSerial;

// at most one reading waits between the serial thread and the ingest task
const HAND_OFF_DEPTH: usize = 1;

fn init_tracing(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();
    let config = match config::parse_config(&args) {
        Ok(config) => config,
        // --help, --version and usage errors print and exit the clap way
        Err(ConfigError::Cli(e)) => e.exit(),
        Err(e) => return Err(e.into()),
    };

    init_tracing(&config);
    let readings = Arc::new(WeightReadings::new(
        config.max_size,
        config.threshold_deviation,
    ));

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        device = %config.device.display(),
        max_size = readings.max_size(),
        threshold_deviation = readings.threshold_deviation(),
        "weightd starting"
    );

    let port = WeightSerial::open(&config.device)?;
    let (tx, rx) = mpsc::channel(HAND_OFF_DEPTH);

    let device = config.device.clone();
    let reconnect_delay = config.reconnect_delay();
    thread::Builder::new()
        .name("serial".into())
        .spawn(move || serial::sampling_context(device, port, tx, reconnect_delay))
        .context("failed to spawn serial thread")?;

    tokio::spawn(readings::ingest(rx, readings.clone()));

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;

    webserver::serve(listener, readings)
        .await
        .context("http server failed")?;

    Ok(())
}
