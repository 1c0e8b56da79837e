//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. The accept loop stops on
//! shutdown, live connections are asked to finish their current request, and
//! `run` returns once they drain (or the drain timeout passes).

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::claims::RenderOptions;
use crate::config::Args;
use crate::db::ClaimSource;
use crate::routes;
use crate::shutdown::ShutdownSignal;
use crate::types::Result;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Claim store behind its read seam
    pub claims: Arc<dyn ClaimSource>,
    /// Map widget token, resolved once at startup
    pub map_token: String,
    pub render: RenderOptions,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(args: Args, claims: Arc<dyn ClaimSource>, map_token: String) -> Self {
        let render = args.render_options();
        Self {
            args,
            claims,
            map_token,
            render,
            started_at: Instant::now(),
        }
    }
}

/// Bind `state.args.listen` and serve until `shutdown` fires
pub async fn run(state: Arc<AppState>, shutdown: ShutdownSignal) -> Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;
    serve(listener, state, shutdown).await
}

/// Serve on an already bound listener until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: ShutdownSignal,
) -> Result<()> {
    info!(
        "presence-map listening on {} as node {}",
        listener.local_addr()?,
        state.args.node_id
    );

    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.triggered() => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    let shutdown = shutdown.clone();
                    connections.spawn(serve_connection(stream, addr, state, shutdown));
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            }
        }
    }

    if !connections.is_empty() {
        info!(open = connections.len(), "Draining connections");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(open = connections.len(), "Drain timed out, aborting connections");
            connections.abort_all();
        }
    }

    Ok(())
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    state: Arc<AppState>,
    mut shutdown: ShutdownSignal,
) {
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        async move { handle_request(state, addr, req).await }
    });

    let conn = http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown.triggered() => {
            conn.as_mut().graceful_shutdown();
            conn.as_mut().await
        }
    };

    if let Err(err) = result {
        error!("Error serving connection from {}: {:?}", addr, err);
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!("[{}] {} {}", addr, method, path);

    Ok(route(&state, &method, &path).await)
}

/// Dispatch a request line to its handler
pub async fn route(state: &AppState, method: &Method, path: &str) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            routes::health_check(state).await
        }

        (&Method::GET, "/api/markers") => routes::handle_markers(state).await,

        (&Method::GET, "/api/features") => routes::handle_features(state).await,

        (&Method::GET, "/token") => routes::handle_token(state),

        // CORS preflight
        (&Method::OPTIONS, _) => preflight_response(),

        _ => not_found_response(path),
    }
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// Not found response
fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    routes::json_response(StatusCode::NOT_FOUND, &body)
}
