//! `stagehand-gate` – Intervention Gate
//!
//! An external state machine decides whether automated dialogue generation
//! may proceed.  This crate polls it and combines its answer with the
//! operator's local pause flag.
//!
//! # Modules
//!
//! - [`gate_client`] – [`GateClient`][gate_client::GateClient]: fail-open
//!   poller that publishes the latest [`InterventionState`] on a watch
//!   channel, plus the [`gate_allows`][gate_client::gate_allows] predicate.
//!
//! [`InterventionState`]: stagehand_types::InterventionState

pub mod gate_client;

pub use gate_client::{GateClient, GateSource, gate_allows};
