//! Server ping supervision.
//!
//! A healthy Socket Mode server pings on a fixed cadence. Every observed
//! ping re-arms a single-shot timer; if the timer ever fires, the server has
//! gone quiet and the session refreshes its connection. Each armed timer
//! carries a generation number so that a timeout racing a cancellation is
//! recognized as stale and ignored.

use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle, time::sleep};
use tracing::trace;

use crate::driver::SessionInput;

pub(crate) struct HeartbeatMonitor {
    timeout: Duration,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    input_tx: mpsc::Sender<SessionInput>,
}

impl HeartbeatMonitor {
    pub(crate) fn new(timeout: Duration, input_tx: mpsc::Sender<SessionInput>) -> Self {
        Self {
            timeout,
            generation: 0,
            timer: None,
            input_tx,
        }
    }

    /// Arm (or re-arm) the single-shot timer under a fresh generation.
    pub(crate) fn arm(&mut self) {
        self.cancel();
        self.generation += 1;
        let generation = self.generation;
        let timeout = self.timeout;
        let input_tx = self.input_tx.clone();
        trace!(generation, "arming heartbeat timer");
        self.timer = Some(tokio::spawn(async move {
            sleep(timeout).await;
            let _ = input_tx
                .send(SessionInput::HeartbeatTimeout { generation })
                .await;
        }));
    }

    /// Cancel the armed timer, if any.
    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Whether a timeout bearing `generation` came from the currently armed
    /// timer. Stale generations belong to timers cancelled after the
    /// timeout was already in flight.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.timer.is_some() && generation == self.generation
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.cancel();
    }
}
