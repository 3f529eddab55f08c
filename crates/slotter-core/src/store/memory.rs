use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::store::{Store, validate_registration};
use crate::types::{JobRecord, NewJobRecord, NewUser, User, UserId, UserStatus};

/// In-memory store used by tests and dry runs.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    users: BTreeMap<UserId, User>,
    jobs: Vec<JobRecord>,
    next_user_id: i64,
    next_job_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_user_id: 1,
                next_job_id: 1,
                ..Inner::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panicked test thread; carry on with the data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn register_user(&self, new: NewUser) -> Result<User> {
        validate_registration(&new)?;
        let mut inner = self.lock();

        for user in inner.users.values() {
            if new.login.is_some() && user.login == new.login {
                return Err(Error::Conflict("login already taken".into()));
            }
            if new.chat_handle.is_some() && user.chat_handle == new.chat_handle {
                return Err(Error::Conflict("chat handle already taken".into()));
            }
        }

        let id = inner.next_user_id;
        inner.next_user_id += 1;
        let user = User {
            id,
            login: new.login,
            password: new.password,
            chat_handle: new.chat_handle,
            chat_id: new.chat_id,
            city: new.city,
            status: new.status.unwrap_or(UserStatus::Waiting),
        };
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    fn upsert_chat_user(&self, chat_handle: &str, chat_id: i64) -> Result<User> {
        let handle = chat_handle.trim();
        if handle.is_empty() {
            return Err(Error::Validation("chat handle must not be blank".into()));
        }
        let mut inner = self.lock();

        let existing = inner
            .users
            .values()
            .find(|u| u.chat_handle.as_deref() == Some(handle) || u.chat_id == Some(chat_id))
            .map(|u| u.id);
        if let Some(id) = existing {
            let user = inner.users.get_mut(&id).ok_or(Error::UnknownUser(id))?;
            user.chat_handle = Some(handle.to_string());
            user.chat_id = Some(chat_id);
            user.status = UserStatus::Registered;
            return Ok(user.clone());
        }

        let id = inner.next_user_id;
        inner.next_user_id += 1;
        let user = User {
            id,
            login: None,
            password: None,
            chat_handle: Some(handle.to_string()),
            chat_id: Some(chat_id),
            city: None,
            status: UserStatus::Registered,
        };
        inner.users.insert(id, user.clone());
        Ok(user)
    }

    fn user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.lock().users.get(&id).cloned())
    }

    fn users_by_status(&self, status: UserStatus) -> Result<Vec<User>> {
        Ok(self
            .lock()
            .users
            .values()
            .filter(|u| u.status == status)
            .cloned()
            .collect())
    }

    fn set_status_if(&self, id: UserId, from: UserStatus, to: UserStatus) -> Result<bool> {
        let mut inner = self.lock();
        let Some(user) = inner.users.get_mut(&id) else {
            return Ok(false);
        };
        if user.status != from {
            return Ok(false);
        }
        user.status = to;
        Ok(true)
    }

    fn hand_over(&self, from: Option<UserId>, to: UserId) -> Result<()> {
        let mut inner = self.lock();
        if !inner.users.contains_key(&to) {
            return Err(Error::UnknownUser(to));
        }
        if let Some(from) = from {
            if let Some(user) = inner.users.get_mut(&from) {
                user.status = UserStatus::Waiting;
            }
        }
        if let Some(user) = inner.users.get_mut(&to) {
            user.status = UserStatus::InProgress;
        }
        Ok(())
    }

    fn chat_ids_by_status(&self, status: UserStatus) -> Result<Vec<i64>> {
        Ok(self
            .lock()
            .users
            .values()
            .filter(|u| u.status == status)
            .filter_map(|u| u.chat_id)
            .collect())
    }

    fn append_job(&self, rec: NewJobRecord) -> Result<JobRecord> {
        let mut inner = self.lock();
        let id = inner.next_job_id;
        inner.next_job_id += 1;
        let record = JobRecord {
            id,
            user_id: rec.user_id,
            status: rec.status,
            url: rec.url,
            payload: rec.payload,
            created_at: Utc::now(),
        };
        inner.jobs.push(record.clone());
        Ok(record)
    }

    fn last_job(&self) -> Result<Option<JobRecord>> {
        Ok(self.lock().jobs.last().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;

    fn store_with_waiting(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            store
                .register_user(NewUser {
                    login: Some(format!("user{i}")),
                    password: Some("pw".into()),
                    ..NewUser::default()
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn test_register_rejects_duplicate_login() {
        let store = store_with_waiting(1);
        let err = store
            .register_user(NewUser {
                login: Some("user0".into()),
                password: Some("pw".into()),
                ..NewUser::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_upsert_chat_user_rebinds_existing_handle() {
        let store = MemoryStore::new();
        let first = store.upsert_chat_user("@carol", 100).unwrap();
        let second = store.upsert_chat_user("@carol", 200).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.chat_id, Some(200));
        assert_eq!(second.status, UserStatus::Registered);
    }

    #[test]
    fn test_set_status_if_requires_exact_current_status() {
        let store = store_with_waiting(1);
        assert!(
            !store
                .set_status_if(1, UserStatus::InProgress, UserStatus::Waiting)
                .unwrap()
        );
        assert!(
            store
                .set_status_if(1, UserStatus::Waiting, UserStatus::InProgress)
                .unwrap()
        );
        assert!(
            store
                .set_status_if(1, UserStatus::InProgress, UserStatus::Applied)
                .unwrap()
        );
    }

    #[test]
    fn test_chat_ids_skip_users_without_chat_id() {
        let store = store_with_waiting(1);
        store.upsert_chat_user("@dave", 7).unwrap();
        assert_eq!(
            store.chat_ids_by_status(UserStatus::Registered).unwrap(),
            vec![7]
        );
        assert!(
            store
                .chat_ids_by_status(UserStatus::Waiting)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn test_jobs_are_append_only_and_ordered() {
        let store = store_with_waiting(1);
        for i in 0..3 {
            store
                .append_job(NewJobRecord {
                    user_id: 1,
                    status: JobStatus::Fail,
                    url: None,
                    payload: serde_json::json!({ "attempt": i }),
                })
                .unwrap();
        }
        let last = store.last_job().unwrap().unwrap();
        assert_eq!(last.payload["attempt"], 2);
        assert_eq!(last.id, 3);
    }
}
