use thiserror::Error;

/// Faults raised by a browser session backend.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Click intercepted by an overlay")]
    ClickIntercepted,

    #[error("Stale element reference")]
    Stale,
}

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Rejections delivered to a command's caller instead of an outcome.
///
/// Step-level faults inside the booking flow are folded into
/// `BookingOutcome::Failure`; only infrastructure conditions reject.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker stop requested; command abandoned at a checkpoint")]
    Cancelled,

    #[error("Browser session unavailable: {0}")]
    SessionUnavailable(String),
}
