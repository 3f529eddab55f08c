use std::path::PathBuf;

use anyhow::Result;

use slotter_core::{NewUser, Store};

use super::open_store;

pub fn execute(
    db: Option<PathBuf>,
    login: Option<String>,
    password: Option<String>,
    chat_handle: Option<String>,
    chat_id: Option<i64>,
    city: Option<String>,
) -> Result<()> {
    let store = open_store(db)?;

    // A handle+id pair without credentials is a chat subscriber; re-running
    // the command re-binds the chat id instead of conflicting.
    let user = match (&login, &chat_handle, chat_id) {
        (None, Some(handle), Some(id)) => store.upsert_chat_user(handle, id)?,
        _ => store.register_user(NewUser {
            login,
            password,
            chat_handle,
            chat_id,
            city,
            status: None,
        })?,
    };

    println!(
        "✅ Registered user {} as {}",
        user.id,
        user.status.as_str()
    );
    Ok(())
}
