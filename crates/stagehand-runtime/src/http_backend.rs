//! [`HttpBackend`] – JSON-over-HTTP client for every external service.
//!
//! One base URL serves all endpoints:
//!
//! | Path | Used by |
//! |---|---|
//! | `GET  /api/intervention/status` | [`GateSource::fetch_state`] |
//! | `POST /api/sensor/connect` | [`SensorLink::connect`] |
//! | `GET  /api/sensor/frame` | [`SensorLink::fetch_frame`] |
//! | `GET  /api/signals` | [`SensorLink::fetch_signals`] |
//! | `GET  /api/silence/check` | [`DialogueService::check_silence`] |
//! | `POST /api/dialogue/generate` | [`DialogueService::generate`] |
//! | `GET  /api/events` | [`EventLogSource::fetch_events`] |
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stagehand_runtime::http_backend::HttpBackend;
//!
//! let backend = HttpBackend::new("http://localhost:8000")
//!     .with_timeout(Duration::from_secs(5));
//! assert_eq!(backend.base_url(), "http://localhost:8000");
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagehand_gate::GateSource;
use stagehand_types::{
    GenerationReply, GenerationRequest, InterventionState, SensorFrame, SensorMode, SignalsState,
    SilenceCheck, StageError,
};
use thiserror::Error;
use tracing::debug;

use crate::endpoints::{DialogueService, EventLogSource, SensorLink};

pub const GATE_STATUS_PATH: &str = "/api/intervention/status";
pub const SENSOR_CONNECT_PATH: &str = "/api/sensor/connect";
pub const SENSOR_FRAME_PATH: &str = "/api/sensor/frame";
pub const SIGNALS_PATH: &str = "/api/signals";
pub const SILENCE_CHECK_PATH: &str = "/api/silence/check";
pub const GENERATE_PATH: &str = "/api/dialogue/generate";
pub const EVENTS_PATH: &str = "/api/events";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while talking to the backend, before they are tagged with
/// the endpoint they came from.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected response format: {0}")]
    BadResponse(#[from] serde_json::Error),
}

impl BackendError {
    /// Convert into a [`StageError`] attributed to `endpoint`.
    pub fn at(self, endpoint: &str) -> StageError {
        match self {
            BackendError::Http(e) => StageError::Transport {
                endpoint: endpoint.to_string(),
                details: e.to_string(),
            },
            BackendError::BadResponse(e) => StageError::BadResponse {
                endpoint: endpoint.to_string(),
                details: e.to_string(),
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GateStatusBody {
    state: InterventionState,
}

#[derive(Serialize)]
struct ConnectRequest<'a> {
    endpoint: &'a str,
    mode: SensorMode,
}

#[derive(Deserialize)]
struct StatusBody {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FrameBody {
    status: String,
    #[serde(default)]
    frame_description: String,
}

#[derive(Deserialize)]
struct SignalsBody {
    state: SignalsState,
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BackendError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Reject any status other than `"ok"`.
fn ensure_ok(endpoint: &str, status: &str, message: Option<&str>) -> Result<(), StageError> {
    if status.eq_ignore_ascii_case("ok") {
        return Ok(());
    }
    Err(StageError::Rejected {
        endpoint: endpoint.to_string(),
        status: match message {
            Some(m) => format!("{status}: {m}"),
            None => status.to_string(),
        },
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// HttpBackend
// ─────────────────────────────────────────────────────────────────────────────

/// Async client for the session backend.  Construct once and share behind an
/// `Arc`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a client for `base_url` (e.g. `"http://localhost:8000"`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    /// Override the per-request timeout (builder-style).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, StageError> {
        self.fetch(self.client.get(self.url(path)))
            .await
            .map_err(|e| e.at(path))
    }

    async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, StageError> {
        self.fetch(self.client.post(self.url(path)).json(body))
            .await
            .map_err(|e| e.at(path))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, BackendError> {
        let bytes = request
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        decode(&bytes)
    }
}

#[async_trait]
impl GateSource for HttpBackend {
    async fn fetch_state(&self) -> Result<InterventionState, StageError> {
        let body: GateStatusBody = self.get_json(GATE_STATUS_PATH).await?;
        Ok(body.state)
    }
}

#[async_trait]
impl SensorLink for HttpBackend {
    async fn connect(&self, endpoint: &str, mode: SensorMode) -> Result<(), StageError> {
        let body: StatusBody = self
            .post_json(SENSOR_CONNECT_PATH, &ConnectRequest { endpoint, mode })
            .await?;
        ensure_ok(SENSOR_CONNECT_PATH, &body.status, body.message.as_deref())
    }

    async fn fetch_frame(&self) -> Result<SensorFrame, StageError> {
        let body: FrameBody = self.get_json(SENSOR_FRAME_PATH).await?;
        ensure_ok(SENSOR_FRAME_PATH, &body.status, None)?;
        debug!(len = body.frame_description.len(), "frame fetched");
        Ok(SensorFrame {
            description: body.frame_description,
        })
    }

    async fn fetch_signals(&self) -> Result<SignalsState, StageError> {
        let body: SignalsBody = self.get_json(SIGNALS_PATH).await?;
        Ok(body.state)
    }
}

#[async_trait]
impl DialogueService for HttpBackend {
    async fn check_silence(&self) -> Result<SilenceCheck, StageError> {
        self.get_json(SILENCE_CHECK_PATH).await
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationReply, StageError> {
        self.post_json(GENERATE_PATH, request).await
    }
}

#[async_trait]
impl EventLogSource for HttpBackend {
    async fn fetch_events(&self) -> Result<Value, StageError> {
        self.get_json(EVENTS_PATH).await
    }
}
