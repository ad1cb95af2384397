//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. The only routes are a
//! liveness probe and the realtime WebSocket upgrade; everything else in
//! the request lifecycle belongs to the host application.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::auth::SessionProvider;
use crate::config::Args;
use crate::core::CaseCore;
use crate::db::Store;
use crate::server::websocket;
use crate::types::CaseguardError;

/// Shared application state
pub struct AppState<S: Store> {
    pub args: Args,
    pub core: Arc<CaseCore<S>>,
    /// Resolves the request actor from a session token
    pub sessions: Arc<dyn SessionProvider>,
}

impl<S: Store> AppState<S> {
    pub fn new(args: Args, core: Arc<CaseCore<S>>, sessions: Arc<dyn SessionProvider>) -> Self {
        Self {
            args,
            core,
            sessions,
        }
    }
}

/// Start the HTTP server
pub async fn run<S: Store>(state: Arc<AppState<S>>) -> Result<(), CaseguardError> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!("Caseguard listening on {}", state.args.listen);
    if state.args.dev_mode {
        warn!("Development mode enabled - in-memory store and fallback JWT secret");
    }

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .serve_connection(io, service)
                        .with_upgrades()
                        .await
                    {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request<S: Store>(
    state: Arc<AppState<S>>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        (Method::GET, "/health") | (Method::GET, "/healthz") => health_check(&state),

        (Method::GET, "/realtime") if hyper_tungstenite::is_upgrade_request(&req) => {
            websocket::handle_realtime_upgrade(Arc::clone(&state), req).await
        }

        (Method::GET, "/realtime") => {
            bad_request_response("Realtime endpoint requires WebSocket upgrade")
        }

        _ => not_found_response(&path),
    };

    Ok(response)
}

fn health_check<S: Store>(state: &AppState<S>) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "status": "ok",
        "connections": state.core.dispatcher().connection_count(),
    });
    json_response(StatusCode::OK, &body)
}

/// JSON response with the given status
pub(crate) fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Error response carrying only the error's public text
pub(crate) fn error_response(err: &CaseguardError) -> Response<Full<Bytes>> {
    json_response(
        err.status_code(),
        &serde_json::json!({ "error": err.to_string() }),
    )
}

fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
        "hint": "Use a WebSocket connection to /realtime?token=..."
    });
    json_response(StatusCode::NOT_FOUND, &body)
}

fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Bad Request",
        "message": message
    });
    json_response(StatusCode::BAD_REQUEST, &body)
}
