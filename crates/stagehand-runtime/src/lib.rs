//! `stagehand-runtime` – the live dialogue control loop and its plumbing.
//!
//! # Modules
//!
//! - [`live_loop`] – [`LiveLoop`][live_loop::LiveLoop]: connects a sensor,
//!   polls the intervention gate, asks for silence or dialogue and commits
//!   generated turns to a bounded history, one cancellable tick at a time.
//! - [`guards`] – [`RunFlag`], [`PauseFlag`] and the [`InFlight`] re-entrancy
//!   guard shared by the loop and its drivers.
//! - [`endpoints`] – the async transport seams ([`SensorLink`],
//!   [`DialogueService`], [`EventLogSource`]).
//! - [`http_backend`] – [`HttpBackend`]: `reqwest` implementation of every
//!   seam, including the gate's [`GateSource`][stagehand_gate::GateSource].
//! - [`timeline_feed`] – [`TimelineFeed`]: fetches the event log and
//!   publishes reconciled [`Timeline`][stagehand_timeline::Timeline]s on a
//!   `watch` channel.
//! - [`scheduler`] – fixed-period Tokio tasks driving ticks, gate polls and
//!   the timeline feed.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console
//!   logging plus optional OTLP span export.

pub mod endpoints;
pub mod guards;
pub mod http_backend;
pub mod live_loop;
pub mod scheduler;
pub mod telemetry;
pub mod timeline_feed;

pub use endpoints::{DialogueService, EventLogSource, SensorLink};
pub use guards::{InFlight, PauseFlag, RunFlag};
pub use http_backend::HttpBackend;
pub use live_loop::{Checkpoint, LiveLoop, LiveLoopConfig, LoopState, LoopStatus, TickOutcome};
pub use scheduler::{spawn_gate_poller, spawn_tick_driver, spawn_timeline_feed};
pub use telemetry::{TracerProviderGuard, init_tracing};
pub use timeline_feed::TimelineFeed;
