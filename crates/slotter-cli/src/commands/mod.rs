pub mod once;
pub mod register;
pub mod run;
pub mod users;

mod console;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use slotter_core::SqliteStore;

pub(crate) use console::{ConsoleMessenger, stdin_lines};

/// Open the user database, creating the file and its directory on first use.
pub(crate) fn open_store(db: Option<PathBuf>) -> Result<Arc<SqliteStore>> {
    let path = match db {
        Some(path) => path,
        None => dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine the platform data directory"))?
            .join("slotter")
            .join("slotter.db"),
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Arc::new(SqliteStore::open(&path)?))
}
