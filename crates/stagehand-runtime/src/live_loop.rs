//! [`LiveLoop`] – the polling/intervention control loop.
//!
//! Drives one dialogue session against an external sensor, the intervention
//! gate and the generation service.  Each [`LiveLoop::tick`]:
//!
//! 1. **Scheduled** checkpoint – abort if the loop was stopped (or never
//!    connected).
//! 2. **Gate** – poll the [`GateClient`]; proceed only when the operator has
//!    not paused and the gate reports `running` or `resuming`.
//! 3. **AfterGate** checkpoint.
//! 4. **Frame** – fetch one sensor frame.
//! 5. **AfterFrame** checkpoint.
//! 6. **Signals** – best-effort refresh of the auxiliary snapshot.
//! 7. **Silence** – ask the silence policy; an active silence is recorded and
//!    ends the tick without generation.
//! 8. **Generate** – request dialogue with the frame description and the most
//!    recent committed turns.
//! 9. **BeforeCommit** checkpoint, taken while holding the history lock.
//! 10. **Commit** – append every generated turn at once.
//!
//! Cancellation is cooperative: `stop()`, the external pause flag and the
//! gate's latest state are re-read at every checkpoint, and an in-flight
//! request is allowed to finish before its result is thrown away.  History
//! therefore grows by whole ticks or not at all.
//!
//! Two ticks never overlap.  A tick started while another is still waiting
//! on the network returns [`TickOutcome::Overlapping`] immediately.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stagehand_gate::GateClient;
//! use stagehand_runtime::http_backend::HttpBackend;
//! use stagehand_runtime::live_loop::{LiveLoop, LiveLoopConfig};
//! use stagehand_types::SensorMode;
//!
//! # async fn run() -> Result<(), stagehand_types::StageError> {
//! let backend = Arc::new(HttpBackend::new("http://localhost:8000"));
//! let gate = Arc::new(GateClient::new(backend.clone()));
//! let live = LiveLoop::new(backend.clone(), backend, gate, LiveLoopConfig::default());
//!
//! live.connect("rtsp://robot.local/stream", SensorMode::Robot).await?;
//! live.start()?;
//! let outcome = live.tick().await?;
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use stagehand_gate::{GateClient, gate_allows};
use stagehand_types::{
    DialogueTurn, GenerationReply, GenerationRequest, InterventionState, SensorMode,
    SignalsState, SilenceInfo, StageError,
};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::endpoints::{DialogueService, SensorLink};
use crate::guards::{InFlight, PauseFlag, RunFlag};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default period between ticks.
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(3);

/// Default period between background gate polls.
pub const DEFAULT_GATE_POLL_PERIOD: Duration = Duration::from_secs(1);

/// Default number of committed turns kept in memory.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Default number of recent turns sent with each generation request.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Default number of exchanges requested per generation call.
pub const DEFAULT_EXCHANGES_PER_TICK: u32 = 2;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`LiveLoop`].
#[derive(Debug, Clone)]
pub struct LiveLoopConfig {
    /// Maximum number of committed turns; the oldest are evicted first.
    pub history_capacity: usize,
    /// Number of most recent turns included in each generation request.
    pub history_window: usize,
    /// Exchanges requested from the generator per tick.
    pub exchanges_per_tick: u32,
}

impl Default for LiveLoopConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_window: DEFAULT_HISTORY_WINDOW,
            exchanges_per_tick: DEFAULT_EXCHANGES_PER_TICK,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public state types
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle label of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Disconnected,
    Connected,
    Running,
    Stopped,
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Points inside a tick at which cancellation is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Scheduled,
    AfterGate,
    AfterFrame,
    AfterSilenceCheck,
    BeforeCommit,
}

/// What a tick did.  Transport and format failures are reported as `Err`
/// instead.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Another tick was still in flight; nothing was done.
    Overlapping,
    /// The gating predicate refused this tick.
    Gated {
        state: InterventionState,
        external_pause: bool,
    },
    /// A stop, pause or gate transition was observed at `at`; nothing was
    /// committed.
    Cancelled { at: Checkpoint },
    /// The silence policy suppressed generation.
    Silenced(SilenceInfo),
    /// The generator answered `paused`.
    GenerationPaused,
    /// `appended` turns were added to history.
    Committed { appended: usize },
}

impl std::fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Overlapping => write!(f, "skipped (previous tick in flight)"),
            Self::Gated {
                state,
                external_pause,
            } => write!(f, "gated (gate={state}, external_pause={external_pause})"),
            Self::Cancelled { at } => write!(f, "cancelled at {at:?}"),
            Self::Silenced(info) => write!(f, "silenced ({}, {:.1}s)", info.kind, info.duration),
            Self::GenerationPaused => write!(f, "generator paused"),
            Self::Committed { appended } => write!(f, "committed {appended} turn(s)"),
        }
    }
}

/// Point-in-time summary for display.
#[derive(Debug, Clone)]
pub struct LoopStatus {
    pub state: LoopState,
    pub endpoint: Option<String>,
    pub mode: Option<SensorMode>,
    pub gate: InterventionState,
    pub external_pause: bool,
    pub history_len: usize,
    pub silence: Option<SilenceInfo>,
    pub signals: Option<SignalsState>,
    pub ticks: u64,
    pub overlapping_ticks: u64,
    pub last_outcome: Option<TickOutcome>,
    pub last_error: Option<String>,
    pub last_commit_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal state
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Session {
    /// `Some` once a connect attempt has succeeded.
    link: Option<(String, SensorMode)>,
    /// `true` once `start()` has been called at least once.
    started: bool,
}

#[derive(Debug, Default)]
struct TickStats {
    ticks: u64,
    last_outcome: Option<TickOutcome>,
    last_error: Option<String>,
    last_commit_at: Option<DateTime<Utc>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// LiveLoop
// ─────────────────────────────────────────────────────────────────────────────

/// The control loop.  Share it behind an `Arc`; every method takes `&self`.
pub struct LiveLoop {
    sensor: Arc<dyn SensorLink>,
    dialogue: Arc<dyn DialogueService>,
    gate: Arc<GateClient>,
    config: LiveLoopConfig,
    run: RunFlag,
    pause: PauseFlag,
    tick_guard: InFlight,
    connect_guard: InFlight,
    session: Mutex<Session>,
    history: Mutex<VecDeque<DialogueTurn>>,
    silence: Mutex<Option<SilenceInfo>>,
    signals: Mutex<Option<SignalsState>>,
    stats: Mutex<TickStats>,
}

impl LiveLoop {
    pub fn new(
        sensor: Arc<dyn SensorLink>,
        dialogue: Arc<dyn DialogueService>,
        gate: Arc<GateClient>,
        config: LiveLoopConfig,
    ) -> Self {
        Self {
            sensor,
            dialogue,
            gate,
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity)),
            config,
            run: RunFlag::new(),
            pause: PauseFlag::new(),
            tick_guard: InFlight::new(),
            connect_guard: InFlight::new(),
            session: Mutex::new(Session::default()),
            silence: Mutex::new(None),
            signals: Mutex::new(None),
            stats: Mutex::new(TickStats::default()),
        }
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Establish the sensor session.
    ///
    /// Succeeds immediately when already connected to the same endpoint and
    /// mode.  On failure the state is left unchanged and the caller may retry.
    ///
    /// # Errors
    ///
    /// - [`StageError::ConnectInFlight`] – another attempt is outstanding.
    /// - Any error reported by the [`SensorLink`].
    pub async fn connect(&self, endpoint: &str, mode: SensorMode) -> Result<(), StageError> {
        let Some(_permit) = self.connect_guard.try_enter() else {
            return Err(StageError::ConnectInFlight);
        };

        if let Some((current, current_mode)) = &lock(&self.session).link
            && current == endpoint
            && *current_mode == mode
        {
            debug!(endpoint, %mode, "already connected");
            return Ok(());
        }

        info!(endpoint, %mode, "connecting to sensor");
        match self.sensor.connect(endpoint, mode).await {
            Ok(()) => {
                lock(&self.session).link = Some((endpoint.to_string(), mode));
                info!(endpoint, "sensor connected");
                Ok(())
            }
            Err(e) => {
                warn!(endpoint, error = %e, "sensor connect failed");
                Err(e)
            }
        }
    }

    /// Set the running flag.
    ///
    /// # Errors
    ///
    /// [`StageError::NotConnected`] if no sensor session exists yet.
    pub fn start(&self) -> Result<(), StageError> {
        let mut session = lock(&self.session);
        if session.link.is_none() {
            return Err(StageError::NotConnected);
        }
        session.started = true;
        self.run.start();
        info!("live loop started");
        Ok(())
    }

    /// Clear the running flag.  A tick in flight discards its result at the
    /// next checkpoint.
    pub fn stop(&self) {
        self.run.stop();
        info!("live loop stopped");
    }

    /// Current lifecycle label.
    pub fn state(&self) -> LoopState {
        let session = lock(&self.session);
        match (session.link.is_some(), self.run.is_running(), session.started) {
            (false, _, _) => LoopState::Disconnected,
            (true, true, _) => LoopState::Running,
            (true, false, true) => LoopState::Stopped,
            (true, false, false) => LoopState::Connected,
        }
    }

    /// Clone of the shared running flag.
    pub fn run_handle(&self) -> RunFlag {
        self.run.clone()
    }

    /// Clone of the shared external pause flag.
    pub fn pause_handle(&self) -> PauseFlag {
        self.pause.clone()
    }

    pub fn set_external_pause(&self, paused: bool) {
        self.pause.set(paused);
        info!(paused, "external pause updated");
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn gate(&self) -> &Arc<GateClient> {
        &self.gate
    }

    pub fn gate_state(&self) -> InterventionState {
        self.gate.latest()
    }

    /// Snapshot of the committed history, oldest first.
    pub fn history(&self) -> Vec<DialogueTurn> {
        lock(&self.history).iter().cloned().collect()
    }

    /// Silence recorded by the most recent silenced tick, if still active.
    pub fn silence(&self) -> Option<SilenceInfo> {
        lock(&self.silence).clone()
    }

    pub fn signals(&self) -> Option<SignalsState> {
        lock(&self.signals).clone()
    }

    pub fn last_outcome(&self) -> Option<TickOutcome> {
        lock(&self.stats).last_outcome.clone()
    }

    pub fn is_tick_in_flight(&self) -> bool {
        self.tick_guard.is_busy()
    }

    pub fn status(&self) -> LoopStatus {
        let (endpoint, mode) = match &lock(&self.session).link {
            Some((endpoint, mode)) => (Some(endpoint.clone()), Some(*mode)),
            None => (None, None),
        };
        let stats = lock(&self.stats);
        LoopStatus {
            state: self.state(),
            endpoint,
            mode,
            gate: self.gate.latest(),
            external_pause: self.pause.is_paused(),
            history_len: lock(&self.history).len(),
            silence: self.silence(),
            signals: self.signals(),
            ticks: stats.ticks,
            overlapping_ticks: self.tick_guard.refused(),
            last_outcome: stats.last_outcome.clone(),
            last_error: stats.last_error.clone(),
            last_commit_at: stats.last_commit_at,
        }
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Run one tick.
    ///
    /// # Errors
    ///
    /// Transport failures, responses missing their success marker and
    /// undecodable replies from the frame, silence or generation endpoints.
    /// Nothing is committed when an error is returned.
    #[instrument(name = "tick", skip(self), fields(tick_id = %Uuid::new_v4()))]
    pub async fn tick(&self) -> Result<TickOutcome, StageError> {
        let Some(_permit) = self.tick_guard.try_enter() else {
            warn!("previous tick still in flight; skipping");
            return Ok(TickOutcome::Overlapping);
        };

        let result = self.run_tick().await;

        let mut stats = lock(&self.stats);
        stats.ticks += 1;
        match &result {
            Ok(outcome) => {
                stats.last_outcome = Some(outcome.clone());
                stats.last_error = None;
            }
            Err(e) => stats.last_error = Some(e.to_string()),
        }
        result
    }

    async fn run_tick(&self) -> Result<TickOutcome, StageError> {
        // ── 1. Scheduled ──────────────────────────────────────────────────────
        if let Some(cancelled) = self.checkpoint(Checkpoint::Scheduled) {
            return Ok(cancelled);
        }

        // ── 2. Gate ───────────────────────────────────────────────────────────
        let state = self.gate.poll().await;
        let external_pause = self.pause.is_paused();
        if !gate_allows(external_pause, state) {
            debug!(%state, external_pause, "tick gated");
            return Ok(TickOutcome::Gated {
                state,
                external_pause,
            });
        }

        // ── 3. AfterGate ──────────────────────────────────────────────────────
        if let Some(cancelled) = self.checkpoint(Checkpoint::AfterGate) {
            return Ok(cancelled);
        }

        // ── 4. Frame ──────────────────────────────────────────────────────────
        let frame = self.sensor.fetch_frame().await?;

        // ── 5. AfterFrame ─────────────────────────────────────────────────────
        if let Some(cancelled) = self.checkpoint(Checkpoint::AfterFrame) {
            return Ok(cancelled);
        }

        // ── 6. Signals (best effort) ──────────────────────────────────────────
        match self.sensor.fetch_signals().await {
            Ok(signals) => *lock(&self.signals) = Some(signals),
            Err(e) => warn!(error = %e, "signals refresh failed; continuing"),
        }

        // ── 7. Silence ────────────────────────────────────────────────────────
        let check = self.dialogue.check_silence().await?;
        if let Some(cancelled) = self.checkpoint(Checkpoint::AfterSilenceCheck) {
            return Ok(cancelled);
        }
        if check.should_silence {
            let info = check.silence.unwrap_or_else(|| SilenceInfo {
                kind: "unspecified".to_string(),
                duration: 0.0,
            });
            info!(
                kind = %info.kind,
                duration = info.duration,
                "silence active; skipping generation"
            );
            *lock(&self.silence) = Some(info.clone());
            return Ok(TickOutcome::Silenced(info));
        }
        if lock(&self.silence).take().is_some() {
            info!("silence lifted");
        }

        // ── 8. Generate ───────────────────────────────────────────────────────
        let request = GenerationRequest {
            frame_description: frame.description,
            history: self.recent_history(),
            turn_count: self.config.exchanges_per_tick,
        };
        let reply = self.dialogue.generate(&request).await?;

        // ── 9./10. Commit ─────────────────────────────────────────────────────
        match reply {
            GenerationReply::Paused => {
                if let Some(cancelled) = self.checkpoint(Checkpoint::BeforeCommit) {
                    return Ok(cancelled);
                }
                info!("generator reported paused; nothing to commit");
                Ok(TickOutcome::GenerationPaused)
            }
            GenerationReply::Dialogue { dialogue } => Ok(self.commit(dialogue)),
        }
    }

    /// Return a cancellation outcome if the tick must not go past `at`.
    ///
    /// Every checkpoint observes the running flag and the connection.  All
    /// but the first also observe the external pause and the gate's latest
    /// state, since those were already vetted by step 2.
    fn checkpoint(&self, at: Checkpoint) -> Option<TickOutcome> {
        let connected = lock(&self.session).link.is_some();
        if !connected || !self.run.is_running() {
            debug!(?at, connected, "tick cancelled: loop not running");
            return Some(TickOutcome::Cancelled { at });
        }
        if at != Checkpoint::Scheduled && !self.gate.allows(self.pause.is_paused()) {
            debug!(?at, gate = %self.gate.latest(), "tick cancelled: paused or gated");
            return Some(TickOutcome::Cancelled { at });
        }
        None
    }

    fn recent_history(&self) -> Vec<DialogueTurn> {
        let history = lock(&self.history);
        let skip = history.len().saturating_sub(self.config.history_window);
        history.iter().skip(skip).cloned().collect()
    }

    /// Append `turns` as one unit, or not at all.
    fn commit(&self, turns: Vec<DialogueTurn>) -> TickOutcome {
        let mut history = lock(&self.history);
        if let Some(cancelled) = self.checkpoint(Checkpoint::BeforeCommit) {
            return cancelled;
        }

        let appended = turns.len();
        history.extend(turns);
        while history.len() > self.config.history_capacity {
            history.pop_front();
        }
        let total = history.len();
        drop(history);

        lock(&self.stats).last_commit_at = Some(Utc::now());
        info!(appended, total, "dialogue committed");
        TickOutcome::Committed { appended }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use stagehand_gate::GateSource;
    use stagehand_types::{SensorFrame, SilenceCheck};
    use tokio::sync::Notify;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Gate,
        Frame,
        Signals,
        Silence,
        Generate,
    }

    /// Scripted stand-in for every external service.
    struct Backend {
        gate_state: Mutex<Result<InterventionState, StageError>>,
        connect: Mutex<Result<(), StageError>>,
        frame: Mutex<Result<SensorFrame, StageError>>,
        signals_fail: bool,
        silence: Mutex<SilenceCheck>,
        reply: Mutex<Result<GenerationReply, StageError>>,
        connect_calls: AtomicUsize,
        generate_calls: AtomicUsize,
        last_request: Mutex<Option<GenerationRequest>>,
        /// Invoked when the named step runs.
        on_step: Mutex<Option<(Step, Box<dyn Fn() + Send>)>>,
        /// When set, `generate` waits for a notification before replying.
        hold_generate: Option<Arc<Notify>>,
        /// When set, `connect` waits for a notification before replying.
        hold_connect: Option<Arc<Notify>>,
    }

    impl Backend {
        fn happy() -> Self {
            Self {
                gate_state: Mutex::new(Ok(InterventionState::Running)),
                connect: Mutex::new(Ok(())),
                frame: Mutex::new(Ok(SensorFrame {
                    description: "two people at a table".into(),
                })),
                signals_fail: false,
                silence: Mutex::new(SilenceCheck::default()),
                reply: Mutex::new(Ok(GenerationReply::Dialogue {
                    dialogue: vec![
                        DialogueTurn::new("amy", "hello"),
                        DialogueTurn::new("bob", "hi there"),
                    ],
                })),
                connect_calls: AtomicUsize::new(0),
                generate_calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
                on_step: Mutex::new(None),
                hold_generate: None,
                hold_connect: None,
            }
        }

        fn on(&self, step: Step, f: impl Fn() + Send + 'static) {
            *self.on_step.lock().unwrap() = Some((step, Box::new(f)));
        }

        fn fire(&self, step: Step) {
            if let Some((s, f)) = &*self.on_step.lock().unwrap()
                && *s == step
            {
                f();
            }
        }
    }

    fn transport(endpoint: &str) -> StageError {
        StageError::Transport {
            endpoint: endpoint.into(),
            details: "connection refused".into(),
        }
    }

    #[async_trait]
    impl GateSource for Backend {
        async fn fetch_state(&self) -> Result<InterventionState, StageError> {
            self.fire(Step::Gate);
            self.gate_state.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SensorLink for Backend {
        async fn connect(&self, _endpoint: &str, _mode: SensorMode) -> Result<(), StageError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(release) = &self.hold_connect {
                release.notified().await;
            }
            self.connect.lock().unwrap().clone()
        }

        async fn fetch_frame(&self) -> Result<SensorFrame, StageError> {
            self.fire(Step::Frame);
            self.frame.lock().unwrap().clone()
        }

        async fn fetch_signals(&self) -> Result<SignalsState, StageError> {
            self.fire(Step::Signals);
            if self.signals_fail {
                Err(transport("signals"))
            } else {
                let mut map = serde_json::Map::new();
                map.insert("faces".into(), serde_json::json!(2));
                Ok(SignalsState(map))
            }
        }
    }

    #[async_trait]
    impl DialogueService for Backend {
        async fn check_silence(&self) -> Result<SilenceCheck, StageError> {
            self.fire(Step::Silence);
            Ok(self.silence.lock().unwrap().clone())
        }

        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GenerationReply, StageError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock().unwrap() = Some(request.clone());
            if let Some(release) = &self.hold_generate {
                release.notified().await;
            }
            self.fire(Step::Generate);
            self.reply.lock().unwrap().clone()
        }
    }

    fn live_with(backend: Arc<Backend>, config: LiveLoopConfig) -> Arc<LiveLoop> {
        let gate = Arc::new(GateClient::new(backend.clone()));
        Arc::new(LiveLoop::new(backend.clone(), backend, gate, config))
    }

    async fn running_loop(backend: Arc<Backend>) -> Arc<LiveLoop> {
        let live = live_with(backend, LiveLoopConfig::default());
        live.connect("ws://robot", SensorMode::Robot).await.unwrap();
        live.start().unwrap();
        live
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn lifecycle_transitions() {
        let live = live_with(Arc::new(Backend::happy()), LiveLoopConfig::default());
        assert_eq!(live.state(), LoopState::Disconnected);
        assert_eq!(live.start(), Err(StageError::NotConnected));

        live.connect("ws://robot", SensorMode::Robot).await.unwrap();
        assert_eq!(live.state(), LoopState::Connected);
        live.start().unwrap();
        assert_eq!(live.state(), LoopState::Running);
        live.stop();
        assert_eq!(live.state(), LoopState::Stopped);
        live.start().unwrap();
        assert_eq!(live.state(), LoopState::Running);
    }

    #[tokio::test]
    async fn connect_is_idempotent_for_same_endpoint() {
        let backend = Arc::new(Backend::happy());
        let live = live_with(backend.clone(), LiveLoopConfig::default());
        live.connect("ws://robot", SensorMode::Robot).await.unwrap();
        live.connect("ws://robot", SensorMode::Robot).await.unwrap();
        assert_eq!(backend.connect_calls.load(Ordering::SeqCst), 1);
        live.connect("ws://robot", SensorMode::Simulated).await.unwrap();
        assert_eq!(backend.connect_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_connect_leaves_state_unchanged() {
        let backend = Arc::new(Backend::happy());
        *backend.connect.lock().unwrap() = Err(StageError::Rejected {
            endpoint: "sensor/connect".into(),
            status: "error".into(),
        });
        let live = live_with(backend.clone(), LiveLoopConfig::default());
        assert!(live.connect("ws://robot", SensorMode::Robot).await.is_err());
        assert_eq!(live.state(), LoopState::Disconnected);

        *backend.connect.lock().unwrap() = Ok(());
        live.connect("ws://robot", SensorMode::Robot).await.unwrap();
        assert_eq!(live.state(), LoopState::Connected);
    }

    #[tokio::test]
    async fn concurrent_connect_is_refused() {
        let release = Arc::new(Notify::new());
        let mut backend = Backend::happy();
        backend.hold_connect = Some(release.clone());
        let backend = Arc::new(backend);
        let live = live_with(backend.clone(), LiveLoopConfig::default());

        let (first, second) = tokio::join!(
            live.connect("ws://robot", SensorMode::Robot),
            async {
                let outcome = live.connect("ws://robot", SensorMode::Robot).await;
                release.notify_one();
                outcome
            }
        );

        assert_eq!(first, Ok(()));
        assert_eq!(second, Err(StageError::ConnectInFlight));
        assert_eq!(backend.connect_calls.load(Ordering::SeqCst), 1);
        assert_eq!(live.state(), LoopState::Connected);
    }

    // ── Happy path ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tick_commits_generated_dialogue() {
        let backend = Arc::new(Backend::happy());
        let live = running_loop(backend.clone()).await;

        let outcome = live.tick().await.unwrap();
        assert_eq!(outcome, TickOutcome::Committed { appended: 2 });
        assert_eq!(live.history().len(), 2);
        assert_eq!(live.signals().unwrap().get("faces"), Some(&serde_json::json!(2)));

        let request = backend.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.frame_description, "two people at a table");
        assert_eq!(request.turn_count, DEFAULT_EXCHANGES_PER_TICK);
        assert!(request.history.is_empty());
        let status = live.status();
        assert!(status.last_commit_at.is_some());
        assert!(!status.signals.unwrap().is_empty());
    }

    #[tokio::test]
    async fn generation_request_carries_last_ten_turns() {
        let backend = Arc::new(Backend::happy());
        let live = running_loop(backend.clone()).await;
        for _ in 0..7 {
            live.tick().await.unwrap();
        }
        assert_eq!(live.history().len(), 14);
        live.tick().await.unwrap();

        let request = backend.last_request.lock().unwrap().clone().unwrap();
        assert_eq!(request.history.len(), DEFAULT_HISTORY_WINDOW);
        assert_eq!(request.history, live.history()[4..14].to_vec());
    }

    #[tokio::test]
    async fn history_is_capped() {
        let backend = Arc::new(Backend::happy());
        let live = live_with(
            backend,
            LiveLoopConfig {
                history_capacity: 5,
                ..LiveLoopConfig::default()
            },
        );
        live.connect("ws://robot", SensorMode::Robot).await.unwrap();
        live.start().unwrap();
        for _ in 0..4 {
            live.tick().await.unwrap();
        }
        let history = live.history();
        assert_eq!(history.len(), 5);
        assert_eq!(history.last().unwrap().content, "hi there");
    }

    #[tokio::test]
    async fn paused_reply_is_a_no_op() {
        let backend = Arc::new(Backend::happy());
        *backend.reply.lock().unwrap() = Ok(GenerationReply::Paused);
        let live = running_loop(backend).await;
        assert_eq!(live.tick().await.unwrap(), TickOutcome::GenerationPaused);
        assert!(live.history().is_empty());
        assert!(live.status().last_error.is_none());
    }

    // ── Gating ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tick_does_nothing_when_not_running() {
        let backend = Arc::new(Backend::happy());
        let live = live_with(backend.clone(), LiveLoopConfig::default());
        live.connect("ws://robot", SensorMode::Robot).await.unwrap();
        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Cancelled {
                at: Checkpoint::Scheduled
            }
        );
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn external_pause_gates_tick() {
        let backend = Arc::new(Backend::happy());
        let live = running_loop(backend.clone()).await;
        live.set_external_pause(true);
        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Gated {
                state: InterventionState::Running,
                external_pause: true
            }
        );
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_running_gate_state_gates_tick() {
        for state in [
            InterventionState::Paused,
            InterventionState::Processing,
            InterventionState::QueryBack,
        ] {
            let backend = Arc::new(Backend::happy());
            *backend.gate_state.lock().unwrap() = Ok(state);
            let live = running_loop(backend.clone()).await;
            assert!(matches!(
                live.tick().await.unwrap(),
                TickOutcome::Gated { external_pause: false, .. }
            ));
            assert!(live.history().is_empty());
        }
    }

    #[tokio::test]
    async fn resuming_gate_state_allows_tick() {
        let backend = Arc::new(Backend::happy());
        *backend.gate_state.lock().unwrap() = Ok(InterventionState::Resuming);
        let live = running_loop(backend).await;
        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Committed { appended: 2 }
        );
    }

    #[tokio::test]
    async fn gate_transport_failure_fails_open() {
        let backend = Arc::new(Backend::happy());
        *backend.gate_state.lock().unwrap() = Err(transport("intervention/status"));
        let live = running_loop(backend).await;
        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Committed { appended: 2 }
        );
        assert_eq!(live.gate_state(), InterventionState::Running);
    }

    // ── Atomicity ─────────────────────────────────────────────────────────────

    async fn assert_stop_during(step: Step) {
        let backend = Arc::new(Backend::happy());
        let live = running_loop(backend.clone()).await;
        let run = live.run_handle();
        backend.on(step, move || run.stop());

        let outcome = live.tick().await.unwrap();
        assert!(
            matches!(outcome, TickOutcome::Cancelled { .. }),
            "stop during {step:?} should cancel, got {outcome:?}"
        );
        assert!(live.history().is_empty(), "stop during {step:?} appended history");
        assert!(live.silence().is_none());
    }

    #[tokio::test]
    async fn stop_at_any_step_commits_nothing() {
        for step in [
            Step::Gate,
            Step::Frame,
            Step::Signals,
            Step::Silence,
            Step::Generate,
        ] {
            assert_stop_during(step).await;
        }
    }

    #[tokio::test]
    async fn stop_during_generation_discards_result() {
        let backend = Arc::new(Backend::happy());
        let live = running_loop(backend.clone()).await;
        let run = live.run_handle();
        backend.on(Step::Generate, move || run.stop());

        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Cancelled {
                at: Checkpoint::BeforeCommit
            }
        );
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);
        assert!(live.history().is_empty());
    }

    #[tokio::test]
    async fn external_pause_during_generation_discards_result() {
        let backend = Arc::new(Backend::happy());
        let live = running_loop(backend.clone()).await;
        let pause = live.pause_handle();
        backend.on(Step::Generate, move || pause.set(true));

        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Cancelled {
                at: Checkpoint::BeforeCommit
            }
        );
        assert!(live.history().is_empty());
    }

    #[tokio::test]
    async fn gate_transition_during_generation_discards_result() {
        for state in [InterventionState::Paused, InterventionState::Processing] {
            let release = Arc::new(Notify::new());
            let mut backend = Backend::happy();
            backend.hold_generate = Some(release.clone());
            let backend = Arc::new(backend);
            let live = running_loop(backend.clone()).await;

            let (outcome, _) = tokio::join!(live.tick(), async {
                *backend.gate_state.lock().unwrap() = Ok(state);
                live.gate().poll().await;
                release.notify_one();
            });

            assert_eq!(
                outcome.unwrap(),
                TickOutcome::Cancelled {
                    at: Checkpoint::BeforeCommit
                },
                "gate moved to {state}"
            );
            assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);
            assert!(live.history().is_empty());
        }
    }

    #[tokio::test]
    async fn transport_error_aborts_without_commit() {
        let backend = Arc::new(Backend::happy());
        *backend.frame.lock().unwrap() = Err(StageError::Rejected {
            endpoint: "sensor/frame".into(),
            status: "error".into(),
        });
        let live = running_loop(backend.clone()).await;
        assert!(live.tick().await.is_err());
        assert!(live.history().is_empty());
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 0);
        assert!(live.status().last_error.unwrap().contains("sensor/frame"));

        *backend.frame.lock().unwrap() = Ok(SensorFrame::default());
        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Committed { appended: 2 }
        );
    }

    #[tokio::test]
    async fn generation_failure_commits_nothing() {
        let backend = Arc::new(Backend::happy());
        *backend.reply.lock().unwrap() = Err(transport("dialogue/generate"));
        let live = running_loop(backend).await;
        let err = live.tick().await.unwrap_err();
        assert!(err.is_transport());
        assert!(live.history().is_empty());
    }

    #[tokio::test]
    async fn signals_failure_does_not_abort_tick() {
        let mut backend = Backend::happy();
        backend.signals_fail = true;
        let live = running_loop(Arc::new(backend)).await;
        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Committed { appended: 2 }
        );
        assert!(live.signals().is_none());
    }

    // ── Silence ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn silence_suppresses_generation_and_clears_later() {
        let backend = Arc::new(Backend::happy());
        *backend.silence.lock().unwrap() = SilenceCheck {
            should_silence: true,
            silence: Some(SilenceInfo {
                kind: "listening".into(),
                duration: 2.0,
            }),
        };
        let live = running_loop(backend.clone()).await;

        let outcome = live.tick().await.unwrap();
        assert!(matches!(outcome, TickOutcome::Silenced(ref info) if info.kind == "listening"));
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 0);
        assert_eq!(live.silence().unwrap().kind, "listening");
        assert!(live.history().is_empty());

        *backend.silence.lock().unwrap() = SilenceCheck::default();
        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Committed { appended: 2 }
        );
        assert!(live.silence().is_none());
    }

    #[tokio::test]
    async fn stop_during_silence_check_records_no_silence() {
        let backend = Arc::new(Backend::happy());
        *backend.silence.lock().unwrap() = SilenceCheck {
            should_silence: true,
            silence: Some(SilenceInfo {
                kind: "listening".into(),
                duration: 2.0,
            }),
        };
        let live = running_loop(backend.clone()).await;
        let run = live.run_handle();
        backend.on(Step::Silence, move || run.stop());

        assert_eq!(
            live.tick().await.unwrap(),
            TickOutcome::Cancelled {
                at: Checkpoint::AfterSilenceCheck
            }
        );
        assert!(live.silence().is_none());
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 0);
    }

    // ── Overlap guard ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn overlapping_tick_is_refused() {
        let release = Arc::new(Notify::new());
        let mut backend = Backend::happy();
        backend.hold_generate = Some(release.clone());
        let backend = Arc::new(backend);
        let live = running_loop(backend.clone()).await;

        let (first, second) = tokio::join!(live.tick(), async {
            let outcome = live.tick().await;
            release.notify_one();
            outcome
        });

        assert_eq!(first.unwrap(), TickOutcome::Committed { appended: 2 });
        assert_eq!(second.unwrap(), TickOutcome::Overlapping);
        assert_eq!(backend.generate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(live.history().len(), 2);
        assert_eq!(live.status().overlapping_ticks, 1);
        assert!(!live.is_tick_in_flight());
    }
}
