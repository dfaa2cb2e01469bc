//! Hand-off of status snapshots from the poller to request handlers
//!
//! The poller writes into a single pending slot; a newer publish overwrites
//! anything not yet consumed. Request handlers drain the slot into the
//! applied snapshot before they make a decision, so an update only ever
//! affects requests that start after it was drained.

use crate::status::StatusSnapshot;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::watch;

pub struct StatusCache {
    /// Latest published snapshot that no request has applied yet
    pending: Mutex<Option<StatusSnapshot>>,
    /// Snapshot requests currently decide on
    applied: RwLock<Arc<StatusSnapshot>>,
    /// Flips to true once after the first poll attempt, never back
    contacted: watch::Sender<bool>,
}

impl StatusCache {
    pub fn new() -> Self {
        let (contacted, _) = watch::channel(false);
        Self {
            pending: Mutex::new(None),
            applied: RwLock::new(Arc::new(StatusSnapshot::default())),
            contacted,
        }
    }

    /// Offer a new snapshot, replacing any that has not been consumed
    pub fn publish(&self, snapshot: StatusSnapshot) {
        *self.pending.lock() = Some(snapshot);
    }

    /// Take the pending snapshot, if any. Never blocks on the poller.
    pub fn try_consume_pending(&self) -> Option<StatusSnapshot> {
        self.pending.lock().take()
    }

    /// Snapshot requests are currently deciding on
    pub fn current(&self) -> Arc<StatusSnapshot> {
        self.applied.read().clone()
    }

    /// Apply any pending snapshot and return the one now in effect
    pub fn apply_pending(&self) -> Arc<StatusSnapshot> {
        // Hold the slot until the write lands so an older take cannot
        // overwrite a newer one applied by another request
        let mut pending = self.pending.lock();
        match pending.take() {
            Some(snapshot) => {
                let snapshot = Arc::new(snapshot);
                *self.applied.write() = Arc::clone(&snapshot);
                snapshot
            }
            None => {
                drop(pending);
                self.current()
            }
        }
    }

    /// Record that the first poll attempt has finished
    pub fn mark_contacted(&self) {
        self.contacted.send_if_modified(|made| {
            if *made {
                false
            } else {
                *made = true;
                true
            }
        });
    }

    pub fn has_contacted(&self) -> bool {
        *self.contacted.borrow()
    }

    /// Wait until the first poll attempt has finished
    pub async fn wait_for_first_contact(&self) {
        let mut rx = self.contacted.subscribe();
        // The sender lives as long as self, so this only returns once contacted
        let _ = rx.wait_for(|made| *made).await;
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}
