//! Pooled client for the wrapped application
//!
//! Requests the middleware lets through are forwarded here, reusing
//! connections to the upstream across requests.

use http_body_util::{combinators::BoxBody, BodyExt};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;

/// Configuration for the upstream connection pool
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Upstream address as host:port
    pub address: String,
    /// Maximum idle connections kept to the upstream
    pub max_idle_per_host: usize,
    /// Idle connection timeout
    pub idle_timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_idle_per_host: 10,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

pub struct UpstreamClient {
    client: Client<HttpConnector, Incoming>,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.enforce_http(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build(connector);

        debug!(
            upstream = %config.address,
            max_idle = config.max_idle_per_host,
            idle_timeout_secs = config.idle_timeout.as_secs(),
            "Upstream pool initialized"
        );

        Self { client, config }
    }

    pub fn config(&self) -> &UpstreamConfig {
        &self.config
    }

    /// URI of the request as seen by the upstream
    pub fn upstream_uri(&self, path_and_query: Option<&str>) -> String {
        format!(
            "http://{}{}",
            self.config.address,
            path_and_query.unwrap_or("/")
        )
    }

    /// Forward a request to the upstream application
    pub async fn send_request(
        &self,
        req: Request<Incoming>,
    ) -> anyhow::Result<Response<BoxBody<Bytes, hyper::Error>>> {
        let uri = self.upstream_uri(req.uri().path_and_query().map(|pq| pq.as_str()));

        let (mut parts, body) = req.into_parts();
        parts.uri = uri.parse()?;
        // The pool speaks HTTP/1.1 to the upstream whatever the client used
        parts.version = hyper::Version::HTTP_11;

        let response = self.client.request(Request::from_parts(parts, body)).await?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed()))
    }
}
