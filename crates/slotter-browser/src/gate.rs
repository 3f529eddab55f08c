use std::sync::{Condvar, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use slotter_core::OperatorEvent;

/// How a blocked pause ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateWait {
    Resumed,
    Stopped,
}

#[derive(Default)]
struct GateState {
    /// True only while a pause is actually blocking.
    closed: bool,
    resumed: bool,
    stopped: bool,
}

/// Manual-intervention checkpoint. One instance per worker lifetime.
///
/// The resumed flag is cleared before the operator is notified, so a resume
/// issued for an earlier, already-finished pause can never satisfy a new one.
pub struct PauseGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::default()),
            cv: Condvar::new(),
        }
    }

    /// Block the calling worker thread until an operator resumes it or the
    /// worker is stopped. No timeout.
    pub fn wait_for_resume(
        &self,
        events: &UnboundedSender<OperatorEvent>,
        kind: &str,
        message: &str,
        url: &str,
    ) -> GateWait {
        {
            let mut state = self.lock();
            if state.stopped {
                return GateWait::Stopped;
            }
            state.resumed = false;
            state.closed = true;
        }

        debug!(kind, "pausing for manual intervention");
        if events
            .send(OperatorEvent::new(kind, message, url))
            .is_err()
        {
            // Nobody listening; an operator can still resume via the gate.
            warn!("operator event channel closed while pausing");
        }

        let mut state = self.lock();
        while !state.resumed && !state.stopped {
            state = self
                .cv
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }
        state.closed = false;
        if state.stopped {
            GateWait::Stopped
        } else {
            GateWait::Resumed
        }
    }

    /// Release a blocked pause. Returns false (no side effect) when the gate
    /// is not closed, letting callers detect "nothing to resume".
    pub fn resume(&self) -> bool {
        let mut state = self.lock();
        if !state.closed {
            return false;
        }
        state.resumed = true;
        self.cv.notify_all();
        true
    }

    /// Wake any blocked pause permanently; part of the worker stop protocol.
    pub fn release_for_stop(&self) {
        let mut state = self.lock();
        state.stopped = true;
        self.cv.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}
