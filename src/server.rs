//! The dev server: accept loop, request routing and proxy forwarding
//!
//! Per request: the route table is consulted first; a matched request is
//! forwarded to its target (Host rewritten iff the route has
//! `change_origin`), everything else goes through the static pipeline with
//! the configured plugins applied.

use crate::assets::AssetServer;
use crate::error::{json_error_response, DevErrorCode};
use crate::plugin::DevPlugin;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::router::{Route, Router};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded-for
const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Header name for forwarded host
const X_FORWARDED_HOST: &str = "x-forwarded-host";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Shared per-request state
struct ServerState {
    router: Router,
    pool: ConnectionPool,
    assets: AssetServer,
    plugins: Vec<Arc<dyn DevPlugin>>,
    request_timeout: Duration,
}

/// The dev server
pub struct DevServer {
    bind_addr: SocketAddr,
    router: Router,
    assets: AssetServer,
    plugins: Vec<Arc<dyn DevPlugin>>,
    pool_config: PoolConfig,
    request_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl DevServer {
    pub fn new(
        bind_addr: SocketAddr,
        router: Router,
        assets: AssetServer,
        plugins: Vec<Arc<dyn DevPlugin>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            router,
            assets,
            plugins,
            pool_config: PoolConfig::default(),
            request_timeout: Duration::from_secs(30),
            shutdown_rx,
        }
    }

    /// Set the connection pool configuration (builder pattern)
    pub fn with_pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    /// Set the per-forward timeout (builder pattern)
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(
            addr = %self.bind_addr,
            routes = self.router.len(),
            "Dev server listening (HTTP/1.1 and HTTP/2)"
        );

        let state = Arc::new(ServerState {
            router: self.router,
            pool: ConnectionPool::new(self.pool_config),
            assets: self.assets,
            plugins: self.plugins,
            request_timeout: self.request_timeout,
        });

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let state = Arc::clone(&state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, state).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Dev server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { handle_request(req, state, addr).await }
    });

    // auto::Builder supports both HTTP/1.1 (with WebSocket upgrades) and h2c
    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    state: Arc<ServerState>,
    client_addr: SocketAddr,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let path = req.uri().path().to_string();

    let route = match state.router.match_path(&path) {
        Some(route) => route.clone(),
        None => return Ok(serve_static(req, &state).await),
    };

    // Generate or propagate request ID
    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Add forwarding headers before any forward, tunneled upgrades included
    // Security: X-Forwarded-* are overwritten rather than appended so clients
    // cannot spoof them; this server is the first trusted hop.
    let headers = req.headers_mut();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    // Original Host goes in X-Forwarded-Host before any change_origin rewrite
    if let Some(host) = headers.get(hyper::header::HOST).cloned() {
        headers.insert(X_FORWARDED_HOST, host);
    }

    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    if route.ws && is_upgrade_request(&req) {
        return handle_upgrade(req, route, request_id).await;
    }

    debug!(
        method = %req.method(),
        uri = %req.uri(),
        prefix = %route.prefix,
        target = %route.authority,
        change_origin = route.change_origin,
        request_id,
        "Forwarding request to proxy target"
    );

    let result = tokio::time::timeout(
        state.request_timeout,
        state.pool.send_request(req, &route),
    )
    .await;

    match result {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => {
            error!(target = %route.authority, error = %e, "Failed to forward request");
            Ok(json_error_response(
                DevErrorCode::ConnectionFailed,
                "Failed to connect to proxy target",
            ))
        }
        Err(_) => {
            warn!(
                target = %route.authority,
                timeout_secs = state.request_timeout.as_secs(),
                "Proxy request timed out"
            );
            Ok(json_error_response(
                DevErrorCode::RequestTimeout,
                format!(
                    "Proxy target did not respond within {} seconds",
                    state.request_timeout.as_secs()
                ),
            ))
        }
    }
}

/// Serve a request through the static pipeline with plugins applied
async fn serve_static(
    req: Request<Incoming>,
    state: &ServerState,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    for plugin in &state.plugins {
        if let Some(response) = plugin.on_request(req.method(), req.headers()) {
            debug!(plugin = plugin.name(), uri = %req.uri(), "Plugin answered request");
            return response;
        }
    }

    let prefers_html = accepts_html(&req);
    let mut response = state
        .assets
        .serve(req.method(), req.uri().path(), prefers_html)
        .await;

    for plugin in &state.plugins {
        plugin.on_response(response.headers_mut());
    }

    response
}

/// Whether the request's Accept header prefers an HTML document
fn accepts_html(req: &Request<Incoming>) -> bool {
    req.headers()
        .get(hyper::header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/html"))
        .unwrap_or(false)
}

/// Check if a request is a WebSocket upgrade request
fn is_upgrade_request(req: &Request<Incoming>) -> bool {
    let has_upgrade_connection = req
        .headers()
        .get(hyper::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase().contains("upgrade"))
        .unwrap_or(false);

    let has_upgrade_header = req.headers().contains_key(hyper::header::UPGRADE);

    has_upgrade_connection && has_upgrade_header
}

/// Get the value of the Upgrade header
fn get_upgrade_type(req: &Request<Incoming>) -> Option<String> {
    req.headers()
        .get(hyper::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_lowercase())
}

/// Target address for a raw TCP connect, defaulting the port
fn connect_addr(authority: &str) -> String {
    if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{}:80", authority)
    }
}

/// Build the raw HTTP upgrade request to replay to the target
fn build_upgrade_request(req: &Request<Incoming>, route: &Route) -> Vec<u8> {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut request = format!("{} {} HTTP/1.1\r\n", req.method(), path);

    // Forward all headers except Host, which is written last
    for (name, value) in req.headers() {
        if name == hyper::header::HOST {
            continue;
        }
        if let Ok(v) = value.to_str() {
            request.push_str(&format!("{}: {}\r\n", name, v));
        }
    }

    let host = if route.change_origin {
        route.authority.clone()
    } else {
        req.headers()
            .get(hyper::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(&route.authority)
            .to_string()
    };
    request.push_str(&format!("Host: {}\r\n", host));
    request.push_str("\r\n");

    request.into_bytes()
}

/// Parse the HTTP response from the target to check for 101 Switching Protocols
fn parse_upgrade_response(data: &[u8]) -> Option<(StatusCode, Vec<(String, String)>)> {
    let response_str = std::str::from_utf8(data).ok()?;
    let mut lines = response_str.lines();

    // Status line: HTTP/1.1 101 Switching Protocols
    let status_line = lines.next()?;
    let parts: Vec<&str> = status_line.splitn(3, ' ').collect();
    if parts.len() < 2 {
        return None;
    }

    let status_code: u16 = parts[1].parse().ok()?;
    let status = StatusCode::from_u16(status_code).ok()?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    Some((status, headers))
}

/// Forward bytes bidirectionally between client and target connections
async fn forward_bidirectional(client: Upgraded, target: TcpStream, prefix: &str, request_id: &str) {
    let mut client_io = TokioIo::new(client);
    let mut target_io = target;

    match tokio::io::copy_bidirectional(&mut client_io, &mut target_io).await {
        Ok((client_to_target, target_to_client)) => {
            debug!(
                prefix,
                request_id,
                client_to_target,
                target_to_client,
                "WebSocket connection closed normally"
            );
        }
        Err(e) => {
            debug!(prefix, request_id, error = %e, "WebSocket connection closed with error");
        }
    }
}

/// Tunnel a WebSocket upgrade request to the route's target
async fn handle_upgrade(
    req: Request<Incoming>,
    route: Route,
    request_id: String,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
    let upgrade_type = get_upgrade_type(&req).unwrap_or_else(|| "unknown".to_string());
    debug!(prefix = %route.prefix, request_id, upgrade_type, "Handling upgrade request");

    let raw_request = build_upgrade_request(&req, &route);

    let target_addr = connect_addr(&route.authority);
    let mut target_stream = match TcpStream::connect(&target_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(target = %target_addr, error = %e, "Failed to connect to target for upgrade");
            return Ok(json_error_response(
                DevErrorCode::UpgradeFailed,
                format!("Failed to connect to proxy target: {}", e),
            ));
        }
    };

    if let Err(e) = target_stream.write_all(&raw_request).await {
        error!(target = %target_addr, error = %e, "Failed to send upgrade request to target");
        return Ok(json_error_response(
            DevErrorCode::UpgradeFailed,
            format!("Failed to send upgrade request: {}", e),
        ));
    }

    let mut response_buf = vec![0u8; 4096];
    let n = match target_stream.read(&mut response_buf).await {
        Ok(n) if n > 0 => n,
        Ok(_) => {
            error!(target = %target_addr, "Target closed connection before responding to upgrade");
            return Ok(json_error_response(
                DevErrorCode::UpgradeFailed,
                "Proxy target closed connection",
            ));
        }
        Err(e) => {
            error!(target = %target_addr, error = %e, "Failed to read upgrade response from target");
            return Ok(json_error_response(
                DevErrorCode::UpgradeFailed,
                format!("Failed to read target response: {}", e),
            ));
        }
    };

    let (status, response_headers) = match parse_upgrade_response(&response_buf[..n]) {
        Some(parsed) => parsed,
        None => {
            error!(target = %target_addr, "Failed to parse target upgrade response");
            return Ok(json_error_response(
                DevErrorCode::UpgradeFailed,
                "Invalid upgrade response from proxy target",
            ));
        }
    };

    if status != StatusCode::SWITCHING_PROTOCOLS {
        warn!(target = %target_addr, status = %status, "Target rejected upgrade request");
        // Relay the target's rejection, minus body framing headers: the body
        // is not relayed, so advertising one would stall the client
        let mut response = Response::builder().status(status);
        for (name, value) in &response_headers {
            let name_lower = name.to_lowercase();
            if name_lower == "content-length" || name_lower == "transfer-encoding" {
                continue;
            }
            if let Ok(hv) = HeaderValue::from_str(value) {
                response = response.header(name.as_str(), hv);
            }
        }
        return Ok(response
            .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
            .expect("valid response builder"));
    }

    info!(prefix = %route.prefix, request_id, upgrade_type, "WebSocket upgrade successful");

    // Build the 101 response to send to the client
    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    for (name, value) in &response_headers {
        // Skip hop-by-hop headers that hyper handles
        let name_lower = name.to_lowercase();
        if name_lower == "content-length" || name_lower == "transfer-encoding" {
            continue;
        }
        if let Ok(hv) = HeaderValue::from_str(value) {
            response = response.header(name.as_str(), hv);
        }
    }

    let response = response
        .body(Empty::<Bytes>::new().map_err(|never| match never {}).boxed())
        .expect("valid response builder");

    // Spawn the bidirectional forwarding task
    tokio::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                debug!(prefix = %route.prefix, request_id, "Client upgrade complete, starting forwarding");
                forward_bidirectional(upgraded, target_stream, &route.prefix, &request_id).await;
            }
            Err(e) => {
                error!(prefix = %route.prefix, error = %e, "Failed to upgrade client connection");
            }
        }
    });

    Ok(response)
}
