
use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::readings::WeightReadings;

pub const WEIGHT_PATH: &str = "/api/v1/weight";

/// Smoothed weight at the moment of the request. `Value` is `null` while
/// there are no readings to average.
#[derive(Debug, Serialize, Deserialize)]
pub struct WeightReading {
    #[serde(rename = "Value")]
    pub value: Option<f64>,
    #[serde(rename = "Time")]
    pub time: DateTime<Local>,
}

async fn latest_weight(State(readings): State<Arc<WeightReadings>>) -> Json<WeightReading> {
    let value = readings.smoothed_value();
    if value.is_none() {
        tracing::debug!("weight requested with nothing to average");
    }

    Json(WeightReading {
        value,
        time: Local::now(),
    })
}

pub fn router(readings: Arc<WeightReadings>) -> Router {
    Router::new()
        .route(WEIGHT_PATH, get(latest_weight))
        .layer(TraceLayer::new_for_http())
        .with_state(readings)
}

/// Serves the weight endpoint on `listener` until Ctrl-C or SIGTERM.
pub async fn serve(listener: TcpListener, readings: Arc<WeightReadings>) -> std::io::Result<()> {
    let app = router(readings);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, path = WEIGHT_PATH, "http server listening");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("http server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
