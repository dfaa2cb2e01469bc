use crate::allowlist::{ClientAddr, X_FORWARDED_FOR};
use crate::error::{json_error_response, GatewayErrorCode};
use crate::middleware::Wrenchmode;
use crate::upstream::UpstreamClient;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header name for request ID
const X_REQUEST_ID: &str = "x-request-id";
/// Header name for forwarded proto
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// HTTP server that runs every request through the maintenance middleware
/// and forwards pass-through traffic to the wrapped application
pub struct GatewayServer {
    bind_addr: SocketAddr,
    middleware: Arc<Wrenchmode>,
    upstream: Arc<UpstreamClient>,
    request_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        middleware: Arc<Wrenchmode>,
        upstream: Arc<UpstreamClient>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            middleware,
            upstream,
            request_timeout: Duration::from_secs(30),
            shutdown_rx,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.run_with_listener(listener).await
    }

    /// Serve on an already bound listener
    pub async fn run_with_listener(self, listener: TcpListener) -> anyhow::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(
            addr = %local_addr,
            upstream = %self.upstream.config().address,
            maintenance_enabled = self.middleware.is_enabled(),
            "Gateway listening (HTTP/1.1 and HTTP/2)"
        );

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let middleware = Arc::clone(&self.middleware);
                            let upstream = Arc::clone(&self.upstream);
                            let request_timeout = self.request_timeout;

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, middleware, upstream, request_timeout).await {
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
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    middleware: Arc<Wrenchmode>,
    upstream: Arc<UpstreamClient>,
    request_timeout: Duration,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let middleware = Arc::clone(&middleware);
        let upstream = Arc::clone(&upstream);
        async move {
            Ok::<_, hyper::Error>(handle_request(req, middleware, upstream, addr, request_timeout).await)
        }
    });

    AutoBuilder::new(TokioExecutor::new())
        .http1()
        .preserve_header_case(true)
        .http2()
        .max_concurrent_streams(250)
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    mut req: Request<Incoming>,
    middleware: Arc<Wrenchmode>,
    upstream: Arc<UpstreamClient>,
    client_addr: SocketAddr,
    request_timeout: Duration,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    req.extensions_mut().insert(ClientAddr(client_addr));

    let request_id = req
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    debug!(method = %req.method(), uri = %req.uri(), request_id, "Incoming request");

    let mut forwarded = false;
    let response = middleware
        .call(req, |req| {
            forwarded = true;
            forward(req, &upstream, client_addr, &request_id, request_timeout)
        })
        .await;

    if !forwarded {
        debug!(request_id, status = %response.status(), "Request diverted by maintenance mode");
    }

    response
}

/// Send a pass-through request on to the application
async fn forward(
    mut req: Request<Incoming>,
    upstream: &UpstreamClient,
    client_addr: SocketAddr,
    request_id: &str,
    request_timeout: Duration,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    // Added after the maintenance decision so allow-list resolution sees the
    // headers the client actually sent
    let headers = req.headers_mut();

    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));

    match tokio::time::timeout(request_timeout, upstream.send_request(req)).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            // Log detailed error internally, return generic message externally
            error!(upstream = %upstream.config().address, error = %e, "Failed to forward request");
            json_error_response(
                GatewayErrorCode::UpstreamUnavailable,
                "Failed to connect to application",
            )
        }
        Err(_) => {
            warn!(
                upstream = %upstream.config().address,
                timeout_secs = request_timeout.as_secs(),
                "Request timed out"
            );
            json_error_response(
                GatewayErrorCode::UpstreamTimeout,
                format!(
                    "Request timed out after {} seconds",
                    request_timeout.as_secs()
                ),
            )
        }
    }
}
