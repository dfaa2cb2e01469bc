//! Background loop that keeps the status cache fresh
//!
//! Polls the control plane at a fixed interval, forever. A failed poll never
//! stops the loop; it publishes the last known snapshot with maintenance
//! forced off so traffic keeps flowing.

use crate::cache::StatusCache;
use crate::fetcher::StatusSource;
use crate::status::{InterpretOptions, StatusSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Poller configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between the end of one poll and the start of the next
    pub interval: Duration,
    pub options: InterpretOptions,
    pub logging: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            options: InterpretOptions::default(),
            logging: false,
        }
    }
}

pub struct Poller<S> {
    source: Arc<S>,
    cache: Arc<StatusCache>,
    config: PollerConfig,
    /// Last snapshot handed to the cache
    last: Option<StatusSnapshot>,
}

impl<S: StatusSource> Poller<S> {
    pub fn new(source: Arc<S>, cache: Arc<StatusCache>, config: PollerConfig) -> Self {
        Self {
            source,
            cache,
            config,
            last: None,
        }
    }

    /// Run the poll loop
    pub async fn run(mut self) {
        if self.config.logging {
            info!(
                interval_secs = self.config.interval.as_secs(),
                "Status poller started"
            );
        }

        loop {
            self.poll_once().await;
            tokio::time::sleep(self.config.interval).await;
        }
    }

    /// Make one poll attempt and publish its outcome
    pub async fn poll_once(&mut self) {
        let snapshot = match self.source.fetch().await {
            Ok(raw) => StatusSnapshot::interpret(raw, self.config.options),
            Err(e) => {
                if self.config.logging {
                    warn!(kind = e.kind(), error = %e, "Status check failed, assuming not switched");
                }
                self.last
                    .as_ref()
                    .map(StatusSnapshot::fail_open)
                    .unwrap_or_default()
            }
        };

        self.log_transition(&snapshot);
        self.last = Some(snapshot.clone());
        self.cache.publish(snapshot);
        self.cache.mark_contacted();
    }

    fn log_transition(&self, next: &StatusSnapshot) {
        if !self.config.logging {
            return;
        }
        let was_switched = self.last.as_ref().map(|s| s.switched).unwrap_or(false);
        match (was_switched, next.switched) {
            (false, true) => info!(
                switch_url = %next.switch_url,
                allow_list = next.ip_allow_list.len(),
                reverse_proxy = next.active_reverse_proxy().is_some(),
                "Maintenance mode switched on"
            ),
            (true, false) => info!("Maintenance mode switched off"),
            _ => debug!(switched = next.switched, "Status unchanged"),
        }
    }
}
