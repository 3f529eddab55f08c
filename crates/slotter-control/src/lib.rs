pub mod controller;
pub mod notify;

pub use controller::{Controller, ControllerConfig, SessionBuilder};
pub use notify::{DeliveryReport, Messenger, Notifier, SendError};
