pub mod carousel;
pub mod error;
pub mod store;
pub mod types;

pub use carousel::{Allocation, Carousel};
pub use error::{Error, Result};
pub use store::{MemoryStore, SqliteStore, Store};
pub use types::{
    BookingOutcome, BookingRequest, JobRecord, JobStatus, NewJobRecord, NewUser, OperatorEvent,
    User, UserId, UserStatus,
};
