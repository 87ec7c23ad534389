//! [`TimelineFeed`] – periodic event-log fetch + reconcile.
//!
//! Owns the [`Reconciler`] (single writer) and publishes each projection on a
//! [`watch`] channel.  A new value is sent only when the reconciler returns a
//! projection with a different identity, so subscribers are not woken by
//! polls that changed nothing.

use std::sync::Arc;

use stagehand_timeline::{Reconciler, Timeline};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::endpoints::EventLogSource;

pub struct TimelineFeed {
    source: Arc<dyn EventLogSource>,
    reconciler: Reconciler,
    tx: watch::Sender<Arc<Timeline>>,
}

impl TimelineFeed {
    pub fn new(source: Arc<dyn EventLogSource>) -> Self {
        let reconciler = Reconciler::new();
        let (tx, _) = watch::channel(reconciler.current());
        Self {
            source,
            reconciler,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Timeline>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Arc<Timeline> {
        self.reconciler.current()
    }

    /// Fetch and fold the log once.  Returns `true` when subscribers were
    /// notified of a new projection.
    ///
    /// A failed fetch keeps the previous projection; the next poll retries.
    pub async fn poll_once(&mut self) -> bool {
        let snapshot = match self.source.fetch_events().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "event log fetch failed; keeping previous timeline");
                return false;
            }
        };

        let next = self.reconciler.apply(&snapshot);
        let changed = self.tx.send_if_modified(|current| {
            if Arc::ptr_eq(current, &next) {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!("timeline published");
        }
        changed
    }
}
