mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::{Error, Result};
use crate::types::{JobRecord, NewJobRecord, NewUser, User, UserId, UserStatus};

/// Persistence operations the core needs.
///
/// Every call is its own transaction; nothing spans a whole booking attempt.
/// The store is the sole cross-run consistency mechanism.
pub trait Store: Send + Sync {
    /// Register a user with a credential pair. Fails with `Conflict` when the
    /// login or chat handle is already taken.
    fn register_user(&self, new: NewUser) -> Result<User>;

    /// Register or re-bind a chat-only subscriber by handle. An existing
    /// handle or chat id gets its binding refreshed instead of conflicting.
    fn upsert_chat_user(&self, chat_handle: &str, chat_id: i64) -> Result<User>;

    fn user(&self, id: UserId) -> Result<Option<User>>;

    /// Users with the given status, ascending by id.
    fn users_by_status(&self, status: UserStatus) -> Result<Vec<User>>;

    /// Compare-and-set status transition. Returns false (and changes nothing)
    /// when the user's current status is not `from`.
    fn set_status_if(&self, id: UserId, from: UserStatus, to: UserStatus) -> Result<bool>;

    /// Atomic token handover: `from` (when present) goes back to `waiting`
    /// and `to` becomes `in_progress` in a single step.
    fn hand_over(&self, from: Option<UserId>, to: UserId) -> Result<()>;

    /// Non-null chat ids of users with the given status.
    fn chat_ids_by_status(&self, status: UserStatus) -> Result<Vec<i64>>;

    /// Append one job record. Records are never updated.
    fn append_job(&self, rec: NewJobRecord) -> Result<JobRecord>;

    fn last_job(&self) -> Result<Option<JobRecord>>;
}

/// Validate registration input before it reaches a store.
pub(crate) fn validate_registration(new: &NewUser) -> Result<()> {
    if let Some(login) = &new.login {
        if login.trim().is_empty() {
            return Err(Error::Validation("login must not be blank".into()));
        }
        if new.password.as_deref().is_none_or(|p| p.trim().is_empty()) {
            return Err(Error::Validation("credential pair is incomplete".into()));
        }
    } else if new.password.is_some() {
        return Err(Error::Validation("password given without a login".into()));
    }
    if new.login.is_none() && new.chat_handle.is_none() {
        return Err(Error::Validation(
            "registration needs a login or a chat handle".into(),
        ));
    }
    if let Some(handle) = &new.chat_handle {
        if handle.trim().is_empty() {
            return Err(Error::Validation("chat handle must not be blank".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentialed() -> NewUser {
        NewUser {
            login: Some("alice@example.com".into()),
            password: Some("secret".into()),
            ..NewUser::default()
        }
    }

    #[test]
    fn test_validation_rejects_blank_login() {
        let new = NewUser {
            login: Some("   ".into()),
            password: Some("secret".into()),
            ..NewUser::default()
        };
        assert!(matches!(
            validate_registration(&new),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_validation_rejects_half_credential_pair() {
        let new = NewUser {
            login: Some("alice".into()),
            password: None,
            ..NewUser::default()
        };
        assert!(matches!(
            validate_registration(&new),
            Err(Error::Validation(_))
        ));

        let new = NewUser {
            password: Some("secret".into()),
            chat_handle: Some("@alice".into()),
            ..NewUser::default()
        };
        assert!(matches!(
            validate_registration(&new),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_validation_accepts_credentialed_and_chat_only() {
        assert!(validate_registration(&credentialed()).is_ok());
        let chat_only = NewUser {
            chat_handle: Some("@bob".into()),
            chat_id: Some(42),
            ..NewUser::default()
        };
        assert!(validate_registration(&chat_only).is_ok());
    }
}
