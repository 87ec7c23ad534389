//! Fixed-period background drivers.
//!
//! Each driver is a Tokio task around [`tokio::time::interval`] with
//! [`MissedTickBehavior::Skip`], so a slow round trip delays the next run
//! instead of queueing a burst.  All drivers exit once the shared `shutdown`
//! flag is set.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use stagehand_gate::GateClient;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::live_loop::{LiveLoop, TickOutcome};
use crate::timeline_feed::TimelineFeed;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Run [`LiveLoop::tick`] every `period` while the loop is running.
///
/// Tick errors are logged and never end the driver.
pub fn spawn_tick_driver(
    live: Arc<LiveLoop>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        let run = live.run_handle();
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            if !run.is_running() {
                continue;
            }
            match live.tick().await {
                Ok(outcome @ TickOutcome::Committed { .. }) => info!(%outcome, "tick finished"),
                Ok(outcome) => debug!(%outcome, "tick finished"),
                Err(e) => warn!(error = %e, transport = e.is_transport(), "tick aborted"),
            }
        }
        info!("tick driver stopped");
    })
}

/// Poll the gate every `period`, independently of the running flag.
pub fn spawn_gate_poller(
    gate: Arc<GateClient>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            gate.poll().await;
        }
        info!("gate poller stopped");
    })
}

/// Refresh `feed` every `period`.
pub fn spawn_timeline_feed(
    mut feed: TimelineFeed,
    period: Duration,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = ticker(period);
        loop {
            ticker.tick().await;
            if shutdown.load(Ordering::SeqCst) {
                break;
            }
            feed.poll_once().await;
        }
        info!("timeline feed stopped");
    })
}
