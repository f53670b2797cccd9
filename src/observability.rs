//! Observability module for centralized metrics and logging setup.
//!
//! This module provides:
//! - Structured logging with configurable levels and optional JSON output
//! - Metrics collection and Prometheus export
//! - Liveness endpoint for monitoring

use std::net::SocketAddr;

use anyhow::Result;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::net::TcpListener;
use tracing_subscriber::prelude::*;

use crate::config::ObservabilityConfig;

/// Initialize the tracing subscriber.
///
/// Respects `RUST_LOG` through the env filter, defaulting to `info`.
pub fn init_logging(config: &ObservabilityConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

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

/// Install the Prometheus metrics recorder and serve `/metrics` and
/// `/health/live` on the configured port. A port of 0 disables the server.
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if config.metrics_port == 0 {
        tracing::info!("Metrics server disabled");
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    start_metrics_server(handle, config.metrics_port).await
}

async fn start_metrics_server(metrics_handle: PrometheusHandle, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on {}", addr);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let metrics_handle = metrics_handle.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);

                        let service = hyper::service::service_fn(
                            move |req: hyper::Request<hyper::body::Incoming>| {
                                let metrics_handle = metrics_handle.clone();
                                async move {
                                    match (req.method(), req.uri().path()) {
                                        (&hyper::Method::GET, "/metrics") => {
                                            let metrics = metrics_handle.render();
                                            Ok::<_, std::convert::Infallible>(hyper::Response::new(
                                                metrics,
                                            ))
                                        }
                                        (&hyper::Method::GET, "/health/live") => {
                                            Ok(hyper::Response::new("OK".to_string()))
                                        }
                                        _ => {
                                            let mut response =
                                                hyper::Response::new("Not Found".to_string());
                                            *response.status_mut() = hyper::StatusCode::NOT_FOUND;
                                            Ok(response)
                                        }
                                    }
                                }
                            },
                        );

                        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                            tracing::debug!("Metrics connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!("Metrics server accept failed: {}", e);
                }
            }
        }
    });

    Ok(())
}

/// Record one handled admin-console request
pub fn record_admin_request(path_group: &'static str, status: u16) {
    metrics::counter!(
        "admin_requests_total",
        "path" => path_group,
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record one inbound chat message
pub fn record_chat_message(outcome: &'static str) {
    metrics::counter!("chat_messages_total", "outcome" => outcome).increment(1);
}
