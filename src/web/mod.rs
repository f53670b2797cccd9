//! # Admin Web Console
//!
//! A small HTTP console for editing the entry store: password login with
//! rate limiting, session cookies, CSRF-protected mutations and
//! content-addressed image management.
//!
//! The server serves each connection with hyper's HTTP/1 stack. A
//! per-request timeout guards against slow clients and a body size cap
//! bounds memory per request. Requests are dispatched through
//! [`router::route_request`], which owns all console behavior.

pub mod auth;
pub mod multipart;
pub mod pages;
pub mod router;

use crate::config::WebConfig;
use crate::images::ImageStore;
use crate::store::SharedStore;
use crate::web::auth::{CsrfStore, LoginRateLimiter, PasswordFile, SessionStore};
use crate::web::router::{AdminState, route_request};
use anyhow::Result;
use http_body_util::BodyExt;
use hyper::body::Body as _;
use hyper::server::conn::http1;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// How many successive ports are tried when the configured one is taken
const PORT_RETRY_LIMIT: u16 = 20;

/// Admin console server
pub struct AdminServer {
    config: WebConfig,
    state: Arc<AdminState>,
}

impl AdminServer {
    /// Assemble the console over the shared store and image directory
    pub fn new(
        config: WebConfig,
        store: SharedStore,
        images: ImageStore,
        password: PasswordFile,
    ) -> Self {
        let state = Arc::new(AdminState {
            store,
            images,
            sessions: SessionStore::new(Duration::from_secs(config.session_timeout_secs)),
            csrf: CsrfStore::new(),
            limiter: LoginRateLimiter::new(),
            password,
        });
        Self { config, state }
    }

    /// Bind and serve until the process exits.
    ///
    /// When the configured port is in use, the next ports are tried, up to
    /// [`PORT_RETRY_LIMIT`].
    pub async fn run(self) -> Result<()> {
        let listener = self.bind().await?;

        if !self.state.password.has_password() {
            warn!(
                "No admin password set; console logins will be rejected. \
                 Run with --set-admin-password to create one."
            );
        }

        let request_timeout = Duration::from_secs(self.config.request_timeout_secs);
        let max_body_bytes = self.config.max_body_bytes;

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "Admin server accept failed");
                    continue;
                }
            };

            let state = Arc::clone(&self.state);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let client_ip = peer.ip().to_string();

                let service = hyper::service::service_fn(move |req| {
                    let state = Arc::clone(&state);
                    let client_ip = client_ip.clone();
                    async move { handle_request(state, req, &client_ip, max_body_bytes).await }
                });

                // A slow or stalled client aborts only its own connection
                let served = tokio::time::timeout(
                    request_timeout,
                    http1::Builder::new().serve_connection(io, service),
                )
                .await;
                match served {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => debug!(peer = %peer, error = %e, "Admin connection error"),
                    Err(_) => debug!(peer = %peer, "Admin connection timed out"),
                }
            });
        }
    }

    async fn bind(&self) -> Result<TcpListener> {
        let base_port = self.config.port;
        for offset in 0..PORT_RETRY_LIMIT {
            let port = match base_port.checked_add(offset) {
                Some(p) => p,
                None => break,
            };
            let addr: SocketAddr = format!("{}:{}", self.config.bind_addr, port)
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid admin bind address: {}", e))?;
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    info!("Admin console listening on http://{}", addr);
                    return Ok(listener);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    warn!(port, "Admin port in use, trying the next one");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(anyhow::anyhow!(
            "No free admin port in {}..{}",
            base_port,
            base_port.saturating_add(PORT_RETRY_LIMIT)
        ))
    }
}

async fn handle_request(
    state: Arc<AdminState>,
    req: hyper::Request<hyper::body::Incoming>,
    client_ip: &str,
    max_body_bytes: usize,
) -> std::result::Result<router::AdminResponse, std::convert::Infallible> {
    let (parts, body) = req.into_parts();

    let declared_len = body.size_hint().exact().unwrap_or(0) as usize;
    if declared_len > max_body_bytes {
        let mut response = router::AdminResponse::new(http_body_util::Full::new(
            bytes::Bytes::from_static(b"Payload Too Large"),
        ));
        *response.status_mut() = StatusCode::PAYLOAD_TOO_LARGE;
        return Ok(response);
    }

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            debug!(error = %e, "Failed to read request body");
            bytes::Bytes::new()
        }
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    Ok(route_request(
        &state,
        &parts.method,
        path,
        &parts.headers,
        &body,
        client_ip,
    ))
}
