//! Cooperative cancellation and re-entrancy guards for the live loop.
//!
//! * [`RunFlag`] – the running/stopped switch.  Clones share one flag, so a
//!   `stop()` from any handle is observed by a tick already in flight the next
//!   time it reaches a checkpoint.
//! * [`PauseFlag`] – the presentation layer's pause switch.
//! * [`InFlight`] – admits one holder at a time; used to refuse overlapping
//!   ticks and concurrent connect attempts.
//!
//! # Example
//!
//! ```rust
//! use stagehand_runtime::guards::{InFlight, RunFlag};
//!
//! let run = RunFlag::new();
//! let handle = run.clone();
//! run.start();
//! handle.stop();
//! assert!(!run.is_running());
//!
//! let guard = InFlight::new();
//! let permit = guard.try_enter().expect("first entry");
//! assert!(guard.try_enter().is_none()); // busy
//! drop(permit);
//! assert!(guard.try_enter().is_some());
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// ─────────────────────────────────────────────────────────────────────────────
// Flags
// ─────────────────────────────────────────────────────────────────────────────

/// Shared running flag.  Starts stopped.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Shared external pause flag.  Starts unpaused.
#[derive(Debug, Clone, Default)]
pub struct PauseFlag(Arc<AtomicBool>);

impl PauseFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, paused: bool) {
        self.0.store(paused, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// InFlight
// ─────────────────────────────────────────────────────────────────────────────

/// Single-occupancy guard.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
    /// Number of entries refused because the guard was occupied.
    refused: AtomicU64,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Occupy the guard, or return `None` if it is already occupied.
    pub fn try_enter(&self) -> Option<InFlightPermit<'_>> {
        match self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(InFlightPermit(self)),
            Err(_) => {
                self.refused.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn refused(&self) -> u64 {
        self.refused.load(Ordering::Relaxed)
    }
}

/// Releases its [`InFlight`] guard on drop.
#[derive(Debug)]
pub struct InFlightPermit<'a>(&'a InFlight);

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        self.0.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flag_starts_stopped() {
        assert!(!RunFlag::new().is_running());
    }

    #[test]
    fn run_flag_clones_share_state() {
        let a = RunFlag::new();
        let b = a.clone();
        a.start();
        assert!(b.is_running());
        b.stop();
        assert!(!a.is_running());
    }

    #[test]
    fn pause_flag_toggles() {
        let p = PauseFlag::new();
        assert!(!p.is_paused());
        p.clone().set(true);
        assert!(p.is_paused());
        p.set(false);
        assert!(!p.is_paused());
    }

    #[test]
    fn in_flight_refuses_second_entry() {
        let guard = InFlight::new();
        let _permit = guard.try_enter().unwrap();
        assert!(guard.is_busy());
        assert!(guard.try_enter().is_none());
        assert!(guard.try_enter().is_none());
        assert_eq!(guard.refused(), 2);
    }

    #[test]
    fn permit_drop_releases_guard() {
        let guard = InFlight::new();
        {
            let _permit = guard.try_enter().unwrap();
        }
        assert!(!guard.is_busy());
        assert!(guard.try_enter().is_some());
        assert_eq!(guard.refused(), 0);
    }
}
