pub mod bridge;
pub mod cdp;
pub mod error;
pub mod fixtures;
pub mod flow;
pub mod gate;
pub mod scan;
pub mod scripted;
pub mod session;
pub mod worker;

pub use bridge::{Command, CommandBridge};
pub use cdp::{CdpConfig, CdpSession};
pub use error::{Error, Result, WorkerError};
pub use flow::FlowConfig;
pub use gate::{GateWait, PauseGate};
pub use session::{Element, ElementHandle, Session, SessionFactory};
pub use worker::Worker;
