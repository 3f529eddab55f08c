//! The worker thread: one dedicated OS thread owning one browser session for
//! its whole lifetime, executing bridge commands strictly in order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use slotter_core::OperatorEvent;

use crate::bridge::{Command, CommandBridge};
use crate::error::{Error, Result, WorkerError};
use crate::flow::{self, FlowConfig};
use crate::gate::PauseGate;
use crate::session::{Session, SessionFactory};

pub struct Worker {
    bridge: CommandBridge,
    gate: Arc<PauseGate>,
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
    done_rx: mpsc::Receiver<()>,
    join_bound: Duration,
}

impl Worker {
    /// Spawn the worker thread. The session is built by `factory` on the
    /// worker thread itself; a failed build does not kill the worker, it
    /// turns every command into a `SessionUnavailable` rejection. Only a
    /// failure to start the thread at all is an error here.
    pub fn spawn(
        factory: SessionFactory,
        events: UnboundedSender<OperatorEvent>,
        flow_cfg: FlowConfig,
        join_bound: Duration,
    ) -> Result<Worker> {
        let (bridge, commands) = CommandBridge::channel();
        let gate = Arc::new(PauseGate::new());
        let stop = Arc::new(AtomicBool::new(false));
        let (done_tx, done_rx) = mpsc::channel();

        let handle = {
            let gate = gate.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("booking-worker".into())
                .spawn(move || {
                    run_loop(factory, commands, &gate, &stop, &events, &flow_cfg);
                    let _ = done_tx.send(());
                })
                .map_err(|e| Error::Transport(format!("worker thread spawn failed: {e}")))?
        };

        Ok(Worker {
            bridge,
            gate,
            stop,
            handle: Some(handle),
            done_rx,
            join_bound,
        })
    }

    pub fn bridge(&self) -> CommandBridge {
        self.bridge.clone()
    }

    /// Release a pending manual pause. False when nothing was paused.
    pub fn resume(&self) -> bool {
        self.gate.resume()
    }

    /// Stop protocol: raise the stop flag, wake any blocked pause, push the
    /// shutdown sentinel, then wait a bounded time for the thread to finish.
    /// A thread that misses the bound is detached with a warning rather than
    /// blocking the caller forever.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.gate.release_for_stop();
        self.bridge.push_shutdown();
        match self.done_rx.recv_timeout(self.join_bound) {
            Ok(()) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                info!("worker stopped");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("worker did not stop within the bound, detaching");
                self.handle = None;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // Already stopped on an earlier call.
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
            }
        }
    }
}

fn run_loop(
    factory: SessionFactory,
    commands: mpsc::Receiver<Command>,
    gate: &PauseGate,
    stop: &AtomicBool,
    events: &UnboundedSender<OperatorEvent>,
    flow_cfg: &FlowConfig,
) {
    let (mut session, session_err): (Option<Box<dyn Session>>, Option<String>) = match factory() {
        Ok(session) => (Some(session), None),
        Err(e) => {
            warn!(error = %e, "session build failed, worker will reject commands");
            (None, Some(e.to_string()))
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            Command::Booking { request, reply } => {
                let result = if stop.load(Ordering::Acquire) {
                    Err(WorkerError::Cancelled)
                } else {
                    match session.as_deref_mut() {
                        Some(session) => flow::run(session, gate, stop, events, flow_cfg, &request),
                        None => Err(WorkerError::SessionUnavailable(
                            session_err.clone().unwrap_or_else(|| "no session".into()),
                        )),
                    }
                };
                // The caller may have abandoned the wait; that is fine.
                let _ = reply.send(result);
            }
            Command::Shutdown => {
                debug!("worker received shutdown sentinel");
                break;
            }
        }
    }

    // Teardown happens on the owning thread, unconditionally.
    if let Some(mut session) = session.take() {
        if let Err(e) = session.close() {
            warn!(error = %e, "session close failed");
        }
    }
}
