use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid registration input: {0}")]
    Validation(String),

    #[error("Conflicting identity: {0}")]
    Conflict(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Unknown user: {0}")]
    UnknownUser(i64),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
