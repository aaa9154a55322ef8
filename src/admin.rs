//! Admin and metrics HTTP server.
//!
//! Exposes channel administration for operators and the Prometheus endpoint.
//! Channel creation is idempotent at the database level; duplicates and
//! unresolvable channels surface as 400 with a descriptive body.

use std::net::SocketAddr;
use std::sync::Arc;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::AdminError;
use crate::library::Library;
use crate::metrics::Metrics;

/// Form field carrying the channel handle.
const CHANNEL_FIELD: &str = "channel";

/// HTTP server for channel administration and metrics.
pub struct AdminServer {
    library: Arc<Library>,
    metrics: Arc<Metrics>,
    token: String,
    bind: String,
}

impl AdminServer {
    pub fn new(library: Arc<Library>, metrics: Arc<Metrics>, token: &str, bind: &str) -> Self {
        Self {
            library,
            metrics,
            token: token.to_string(),
            bind: bind.to_string(),
        }
    }

    /// Binds the listener and spawns the accept loop. Returns the bound
    /// address, so callers may bind port zero.
    pub async fn start(self, stop: CancellationToken) -> Result<SocketAddr, AdminError> {
        let listener =
            tokio::net::TcpListener::bind(&self.bind)
                .await
                .map_err(|e| AdminError::BindFailed {
                    addr: self.bind.clone(),
                    message: e.to_string(),
                })?;
        let addr = listener.local_addr().map_err(|e| AdminError::BindFailed {
            addr: self.bind.clone(),
            message: e.to_string(),
        })?;

        info!(addr = %addr, "starting admin http server");

        let library = self.library;
        let metrics = self.metrics;
        let token = Arc::new(self.token);

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    accepted = listener.accept() => accepted,
                    _ = stop.cancelled() => {
                        info!("admin http server stopped");
                        return;
                    }
                };
                let (stream, _) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "admin accept failed");
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let library = library.clone();
                let metrics = metrics.clone();
                let token = token.clone();

                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        let library = library.clone();
                        let metrics = metrics.clone();
                        let token = token.clone();
                        async move { handle(req, library, metrics, &token).await }
                    });

                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        error!(error = %e, "error serving admin connection");
                    }
                });
            }
        });

        Ok(addr)
    }
}

async fn handle(
    req: Request<Incoming>,
    library: Arc<Library>,
    metrics: Arc<Metrics>,
    token: &str,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path();
    if req.method() == Method::GET && path == "/metrics" {
        Ok(text(StatusCode::OK, metrics.gather()))
    } else if req.method() == Method::POST && path == "/api/v1/channel" {
        add_channel(req, library, token).await
    } else {
        Ok(text(StatusCode::NOT_FOUND, "Not Found".to_string()))
    }
}

async fn add_channel(
    req: Request<Incoming>,
    library: Arc<Library>,
    token: &str,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    if !authorized(&req, token) {
        return Ok(text(
            StatusCode::UNAUTHORIZED,
            "invalid authentication token".to_string(),
        ));
    }

    let body = req.into_body().collect().await?.to_bytes();
    let channel = url::form_urlencoded::parse(&body)
        .find(|(k, _)| k == CHANNEL_FIELD)
        .map(|(_, v)| v.into_owned());
    let Some(channel) = channel.filter(|c| !c.trim().is_empty()) else {
        return Ok(text(
            StatusCode::BAD_REQUEST,
            format!("{CHANNEL_FIELD} field is required"),
        ));
    };

    match library.add_channel(&channel, "").await {
        Ok(created) => {
            let body = serde_json::to_string(&created).unwrap_or_default();
            Ok(text(StatusCode::CREATED, body))
        }
        Err(e) => {
            warn!(channel = %channel, error = %e, "channel creation rejected");
            Ok(text(StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}

fn authorized(req: &Request<Incoming>, token: &str) -> bool {
    req.headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|presented| presented == token)
        .unwrap_or(false)
}

fn text(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}
