//! `stagehand-types` – shared data model for the Stagehand workspace.
//!
//! Holds the records found in the remote event log, the wire shapes exchanged
//! with the sensor, gate and generation endpoints, and the global
//! [`StageError`] type.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Index of one exchange step in the dialogue session.  Join key across all
/// event kinds.
pub type TurnIndex = u32;

// ─────────────────────────────────────────────────────────────────────────────
// Event log records
// ─────────────────────────────────────────────────────────────────────────────

/// Generation diagnostics attached to a spoken turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnDebug {
    #[serde(default)]
    pub loop_detected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    #[serde(default)]
    pub few_shot_used: bool,
}

/// A line spoken by one of the session's speakers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakEvent {
    pub turn: TurnIndex,
    #[serde(default, alias = "speaker_id")]
    pub speaker: String,
    #[serde(default)]
    pub text: String,
    /// Director beat, present only on enriched transmissions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat: Option<String>,
    #[serde(default)]
    pub debug: TurnDebug,
}

impl SpeakEvent {
    /// `true` when the record carries a non-empty beat tag.
    pub fn has_beat(&self) -> bool {
        self.beat.as_deref().is_some_and(|b| !b.is_empty())
    }
}

/// The director's dramaturgical decision for a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorEvent {
    pub turn: TurnIndex,
    /// Beat tag, e.g. `"SETUP"` or `"PAYOFF"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut_cue: Option<String>,
}

/// Preview snippets for the three retrieval sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RagPreviews {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub few_shot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge: Option<String>,
}

/// Which retrieval results were selected for a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RagSelectEvent {
    pub turn: TurnIndex,
    #[serde(default)]
    pub previews: RagPreviews,
}

/// Tail of the prompt that was sent to the generator for a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDebugEvent {
    pub turn: TurnIndex,
    #[serde(default)]
    pub prompt_tail: String,
}

/// A free-form reasoning note.  Not keyed by turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThoughtEvent {
    /// ISO-8601 timestamp; lexicographic order equals chronological order.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn: Option<TurnIndex>,
    #[serde(default)]
    pub content: String,
}

/// One tagged record of the remote event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventRecord {
    Director(DirectorEvent),
    RagSelect(RagSelectEvent),
    Speak(SpeakEvent),
    PromptDebug(PromptDebugEvent),
    Thought(ThoughtEvent),
}

// ─────────────────────────────────────────────────────────────────────────────
// Gate
// ─────────────────────────────────────────────────────────────────────────────

/// State of the external intervention gate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionState {
    #[default]
    Running,
    Paused,
    Processing,
    QueryBack,
    Resuming,
}

impl InterventionState {
    /// `true` for the states in which automated generation may proceed.
    pub fn allows_generation(self) -> bool {
        matches!(self, Self::Running | Self::Resuming)
    }
}

impl std::fmt::Display for InterventionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Processing => "processing",
            Self::QueryBack => "query_back",
            Self::Resuming => "resuming",
        };
        f.write_str(label)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensor, silence and generation wire shapes
// ─────────────────────────────────────────────────────────────────────────────

/// How the sensor endpoint should be driven.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    /// A physical robot or camera.
    #[default]
    Robot,
    /// A simulated feed.
    Simulated,
}

impl std::fmt::Display for SensorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Robot => f.write_str("robot"),
            Self::Simulated => f.write_str("simulated"),
        }
    }
}

impl std::str::FromStr for SensorMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "robot" => Ok(Self::Robot),
            "simulated" | "sim" => Ok(Self::Simulated),
            other => Err(format!("unknown sensor mode `{other}`")),
        }
    }
}

/// One frame fetched from the sensor endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Natural-language description of what the sensor currently sees.
    pub description: String,
}

/// Why and for how long generation is suppressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilenceInfo {
    #[serde(rename = "type")]
    pub kind: String,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
}

/// Response of the silence-policy endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SilenceCheck {
    pub should_silence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub silence: Option<SilenceInfo>,
}

/// Opaque auxiliary signals snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignalsState(pub Map<String, Value>);

impl SignalsState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One committed line of dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub speaker: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<TurnDebug>,
}

impl DialogueTurn {
    pub fn new(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            content: content.into(),
            debug: None,
        }
    }
}

/// Body of a dialogue generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub frame_description: String,
    /// Most recent committed turns, oldest first.
    pub history: Vec<DialogueTurn>,
    pub turn_count: u32,
}

/// Reply of the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GenerationReply {
    Dialogue {
        #[serde(default)]
        dialogue: Vec<DialogueTurn>,
    },
    /// The generator declined because an intervention is under way.
    Paused,
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Global error type spanning transport failures, malformed responses and
/// lifecycle misuse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("Transport error on {endpoint}: {details}")]
    Transport { endpoint: String, details: String },

    #[error("Unexpected response from {endpoint}: {details}")]
    BadResponse { endpoint: String, details: String },

    #[error("{endpoint} reported status `{status}`")]
    Rejected { endpoint: String, status: String },

    #[error("Sensor link is not connected")]
    NotConnected,

    #[error("A connect attempt is already in flight")]
    ConnectInFlight,
}

impl StageError {
    /// `true` for failures of the network round trip itself, as opposed to a
    /// reachable endpoint that answered with something unusable.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
