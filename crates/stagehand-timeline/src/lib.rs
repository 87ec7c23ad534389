//! `stagehand-timeline` – Event Aggregator
//!
//! Folds the remote event log into a per-turn projection.  Nothing in this
//! crate performs I/O; callers fetch the log and hand the raw JSON snapshot
//! over.
//!
//! # Modules
//!
//! - [`projection`] – [`Timeline`][projection::Timeline] and the borrowed
//!   [`TurnView`][projection::TurnView] that joins every event kind for one
//!   turn.
//! - [`reconcile`] – [`reconcile`][reconcile::reconcile]: the pure, single
//!   pass fold from snapshot to [`Timeline`][projection::Timeline].
//! - [`reconciler`] – [`Reconciler`][reconciler::Reconciler]: keeps the
//!   previous result so malformed snapshots are ignored and unchanged
//!   projections keep their identity.

pub mod projection;
pub mod reconcile;
pub mod reconciler;

pub use projection::{Timeline, TurnView};
pub use reconcile::reconcile;
pub use reconciler::Reconciler;
