//! Maintenance-mode middleware entry point
//!
//! One [`Wrenchmode`] instance sits in front of an application. The first
//! request starts the background poller; until the poller has made its first
//! attempt, requests wait. After that every request drains any pending status
//! update and is either passed through, redirected, or answered with the
//! canned reverse-proxy response.

use crate::allowlist::resolve_client_ips;
use crate::cache::StatusCache;
use crate::config::MaintenanceConfig;
use crate::decision::{decide, Decision};
use crate::error::ConfigError;
use crate::fetcher::{StatusFetcher, StatusSource};
use crate::poller::{Poller, PollerConfig};
use crate::status::{InterpretOptions, StatusSnapshot};
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use hyper::{Request, Response};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// The middleware instance.
///
/// Designed to be shared behind an `Arc` by every connection of a server.
pub struct Wrenchmode<S = StatusFetcher> {
    config: MaintenanceConfig,
    /// `None` when no credential is configured; the middleware is then inert
    source: Option<Arc<S>>,
    cache: Arc<StatusCache>,
    /// Poll loop task, started by the first request
    poller: OnceLock<JoinHandle<()>>,
}

impl Wrenchmode<StatusFetcher> {
    /// Create the middleware polling the configured control plane.
    ///
    /// A missing credential is not an error here: the instance is created
    /// inert and passes every request through.
    pub fn new(config: MaintenanceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let source = match StatusFetcher::new(&config) {
            Ok(fetcher) => Some(fetcher),
            Err(ConfigError::MissingCredential) => None,
            Err(e) => return Err(e),
        };
        Ok(Self::build(config, source))
    }
}

impl<S: StatusSource> Wrenchmode<S> {
    /// Create the middleware with a custom status source
    pub fn with_source(config: MaintenanceConfig, source: S) -> Self {
        let source = config.credential().is_ok().then_some(source);
        Self::build(config, source)
    }

    fn build(config: MaintenanceConfig, source: Option<S>) -> Self {
        Self {
            config,
            source: source.map(Arc::new),
            cache: Arc::new(StatusCache::new()),
            poller: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Whether a credential is configured and the middleware is active
    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    pub fn poller_started(&self) -> bool {
        self.poller.get().is_some()
    }

    /// Run one request through the middleware.
    ///
    /// `next` is only called for pass-through requests; redirect and
    /// reverse-proxy responses are produced here.
    pub async fn call<B, F, Fut>(&self, req: Request<B>, next: F) -> Response<BoxBody<Bytes, hyper::Error>>
    where
        F: FnOnce(Request<B>) -> Fut,
        Fut: Future<Output = Response<BoxBody<Bytes, hyper::Error>>>,
    {
        let decision = match self.ready_snapshot().await {
            Some(snapshot) => self.decide_for(&req, &snapshot),
            None => Decision::PassThrough,
        };

        match decision.into_response() {
            Some(response) => response,
            None => next(req).await,
        }
    }

    /// Decision the middleware would make for this request right now
    pub async fn evaluate<B>(&self, req: &Request<B>) -> Decision {
        match self.ready_snapshot().await {
            Some(snapshot) => self.decide_for(req, &snapshot),
            None => Decision::PassThrough,
        }
    }

    /// Start the poller if needed, wait for first contact, and apply any
    /// pending update. `None` when the middleware is inert.
    async fn ready_snapshot(&self) -> Option<Arc<StatusSnapshot>> {
        let Some(source) = &self.source else {
            if self.config.logging {
                error!("No JWT configured, bypassing maintenance mode. Configure a JWT to enable it.");
            }
            return None;
        };

        self.ensure_poller(source);
        self.cache.wait_for_first_contact().await;
        Some(self.cache.apply_pending())
    }

    fn ensure_poller(&self, source: &Arc<S>) {
        self.poller.get_or_init(|| {
            let config = PollerConfig {
                interval: self.config.check_delay(),
                options: InterpretOptions {
                    ignore_test_mode: self.config.ignore_test_mode,
                    disable_reverse_proxy: self.config.disable_reverse_proxy,
                },
                logging: self.config.logging,
            };
            if self.config.logging {
                info!(url = %self.config.status_url(), "Starting maintenance status poller");
            }
            let poller = Poller::new(Arc::clone(source), Arc::clone(&self.cache), config);
            tokio::spawn(poller.run())
        });
    }

    fn decide_for<B>(&self, req: &Request<B>, snapshot: &StatusSnapshot) -> Decision {
        // Addresses only matter while switched
        let client_ips = if snapshot.switched {
            resolve_client_ips(req, self.config.trust_remote_ip)
        } else {
            Vec::new()
        };

        let decision = decide(snapshot, self.config.force_open, &client_ips);
        if self.config.logging {
            debug!(
                method = %req.method(),
                uri = %req.uri(),
                client_ips = ?client_ips,
                decision = decision.as_str(),
                "Maintenance decision"
            );
        }
        decision
    }
}

impl<S> Drop for Wrenchmode<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get() {
            handle.abort();
        }
    }
}
