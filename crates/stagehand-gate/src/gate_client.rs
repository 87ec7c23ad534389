//! [`GateClient`] – fail-open poller for the intervention gate.
//!
//! Every call to [`GateClient::poll`] asks the [`GateSource`] for the current
//! [`InterventionState`].  A transport failure never propagates: the client
//! answers [`InterventionState::Running`] instead, so a transient network blip
//! cannot stall the control loop.
//!
//! Generation may proceed only when both checks pass:
//!
//! 1. the operator has not paused the session locally, and
//! 2. the gate reports `running` or `resuming`.
//!
//! # Example
//!
//! ```
//! use stagehand_gate::gate_allows;
//! use stagehand_types::InterventionState;
//!
//! assert!(gate_allows(false, InterventionState::Resuming));
//! assert!(!gate_allows(true, InterventionState::Running));
//! assert!(!gate_allows(false, InterventionState::QueryBack));
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use stagehand_types::{InterventionState, StageError};
use tokio::sync::watch;
use tracing::{info, warn};

/// Transport seam for the gate status endpoint.
#[async_trait]
pub trait GateSource: Send + Sync {
    /// Fetch the gate's current state.
    async fn fetch_state(&self) -> Result<InterventionState, StageError>;
}

/// The combined gating predicate.
pub fn gate_allows(external_pause: bool, state: InterventionState) -> bool {
    !external_pause && state.allows_generation()
}

/// Polls a [`GateSource`] and remembers the latest answer.
pub struct GateClient {
    source: Arc<dyn GateSource>,
    latest: watch::Sender<InterventionState>,
}

impl GateClient {
    /// Construct a client; the latest state starts as
    /// [`InterventionState::Running`].
    pub fn new(source: Arc<dyn GateSource>) -> Self {
        let (latest, _) = watch::channel(InterventionState::default());
        Self { source, latest }
    }

    /// Query the gate once.
    ///
    /// Never fails: a transport or format error yields
    /// [`InterventionState::Running`].
    pub async fn poll(&self) -> InterventionState {
        let state = match self.source.fetch_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "gate poll failed; failing open to `running`");
                InterventionState::Running
            }
        };

        let previous = self.latest.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "gate state changed");
        }
        state
    }

    /// The most recently observed state.
    pub fn latest(&self) -> InterventionState {
        *self.latest.borrow()
    }

    /// Watch the observed state.
    pub fn subscribe(&self) -> watch::Receiver<InterventionState> {
        self.latest.subscribe()
    }

    /// Evaluate [`gate_allows`] against the most recently observed state.
    pub fn allows(&self, external_pause: bool) -> bool {
        gate_allows(external_pause, self.latest())
    }
}
