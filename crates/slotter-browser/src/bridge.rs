use std::sync::mpsc;

use tokio::sync::oneshot;

use slotter_core::{BookingOutcome, BookingRequest};

use crate::error::WorkerError;

/// The closed set of requests a worker executes. Dispatch is an exhaustive
/// match, so adding a variant is a compile-time event.
pub enum Command {
    Booking {
        request: BookingRequest,
        reply: oneshot::Sender<std::result::Result<BookingOutcome, WorkerError>>,
    },
    /// Sentinel used by the stop protocol to unblock the queue wait.
    Shutdown,
}

/// Cross-thread request/response channel between the orchestration domain
/// and the worker. Commands are dispatched strictly in submission order,
/// exactly once; replies resolve in the caller's execution context.
#[derive(Clone)]
pub struct CommandBridge {
    tx: mpsc::Sender<Command>,
}

impl CommandBridge {
    pub fn channel() -> (CommandBridge, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel();
        (CommandBridge { tx }, rx)
    }

    /// Queue a booking attempt and return the future for its result.
    ///
    /// Dropping the receiver abandons the wait without cancelling the work;
    /// the command keeps running inside the worker.
    pub fn submit_booking(
        &self,
        request: BookingRequest,
    ) -> oneshot::Receiver<std::result::Result<BookingOutcome, WorkerError>> {
        let (reply, rx) = oneshot::channel();
        // A send failure means the worker is gone; the dropped reply sender
        // surfaces to the caller as a closed channel.
        let _ = self.tx.send(Command::Booking { request, reply });
        rx
    }

    pub fn push_shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}
