//! [`Reconciler`] – keeps the last good [`Timeline`] between polls.
//!
//! The owner calls [`Reconciler::apply`] with every fresh snapshot.  A
//! malformed snapshot leaves the previous projection in place, and a snapshot
//! that folds to the same projection hands back the *same* `Arc`, so callers
//! can detect change with [`Arc::ptr_eq`] instead of deep comparison.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::projection::Timeline;
use crate::reconcile::reconcile;

/// Single-writer holder of the current projection.
#[derive(Debug, Default)]
pub struct Reconciler {
    current: Arc<Timeline>,
    applied: u64,
    rejected: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent projection.
    pub fn current(&self) -> Arc<Timeline> {
        Arc::clone(&self.current)
    }

    /// Number of snapshots folded successfully.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Number of snapshots discarded as malformed.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Fold `snapshot` and return the resulting projection.
    ///
    /// * Not an array → the previous projection is returned untouched.
    /// * Thought list equal to the previous one → the previous thought list
    ///   `Arc` is reused.
    /// * Projection equal to the previous one → the previous `Arc<Timeline>`
    ///   is returned.
    pub fn apply(&mut self, snapshot: &Value) -> Arc<Timeline> {
        let Some(mut next) = reconcile(snapshot) else {
            self.rejected += 1;
            warn!("event log snapshot is not a sequence; keeping previous timeline");
            return self.current();
        };
        self.applied += 1;

        if thought_tail_matches(&self.current, &next) {
            next.thoughts = Arc::clone(&self.current.thoughts);
        }

        if *self.current == next {
            debug!("timeline unchanged");
            return self.current();
        }

        debug!(
            speaks = next.speaks.len(),
            directors = next.directors.len(),
            thoughts = next.thoughts.len(),
            "timeline updated"
        );
        self.current = Arc::new(next);
        self.current()
    }
}

/// Count and final timestamp are a cheap pre-filter; the full comparison
/// decides.
fn thought_tail_matches(previous: &Timeline, next: &Timeline) -> bool {
    previous.thoughts.len() == next.thoughts.len()
        && previous.thoughts.last().map(|t| &t.timestamp)
            == next.thoughts.last().map(|t| &t.timestamp)
        && previous.thoughts == next.thoughts
}
