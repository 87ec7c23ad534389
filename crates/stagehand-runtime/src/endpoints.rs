//! Transport seams for the sensor, generation and event-log services.
//!
//! The gate has its own seam, [`GateSource`][stagehand_gate::GateSource].
//! [`HttpBackend`][crate::http_backend::HttpBackend] implements all of them.

use async_trait::async_trait;
use serde_json::Value;
use stagehand_types::{
    GenerationReply, GenerationRequest, SensorFrame, SensorMode, SignalsState, SilenceCheck,
    StageError,
};

/// The external sensor / robot endpoint.
#[async_trait]
pub trait SensorLink: Send + Sync {
    /// Establish a logical session with the sensor at `endpoint`.
    async fn connect(&self, endpoint: &str, mode: SensorMode) -> Result<(), StageError>;

    /// Fetch one frame.  A response without the success marker is an error.
    async fn fetch_frame(&self) -> Result<SensorFrame, StageError>;

    /// Fetch the auxiliary signals snapshot.
    async fn fetch_signals(&self) -> Result<SignalsState, StageError>;
}

/// The silence policy and the dialogue generator.
#[async_trait]
pub trait DialogueService: Send + Sync {
    async fn check_silence(&self) -> Result<SilenceCheck, StageError>;

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, StageError>;
}

/// Read access to the remote append-only event log.
#[async_trait]
pub trait EventLogSource: Send + Sync {
    /// Fetch the whole log as raw JSON.  Shape validation is left to the
    /// reconciler.
    async fn fetch_events(&self) -> Result<Value, StageError>;
}
