use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::error::{Error, Result};
use crate::store::{Store, validate_registration};
use crate::types::{JobRecord, JobStatus, NewJobRecord, NewUser, User, UserId, UserStatus};

/// SQLite-backed store. One short transaction per call.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             login TEXT UNIQUE,
             password TEXT,
             chat_handle TEXT UNIQUE,
             chat_id INTEGER,
             city TEXT,
             status TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS jobs (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             user_id INTEGER NOT NULL REFERENCES users(id),
             status TEXT NOT NULL,
             url TEXT,
             payload TEXT NOT NULL,
             created_at TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_users_status ON users(status);",
    )?;
    Ok(())
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let status: String = row.get("status")?;
    Ok(User {
        id: row.get("id")?,
        login: row.get("login")?,
        password: row.get("password")?,
        chat_handle: row.get("chat_handle")?,
        chat_id: row.get("chat_id")?,
        city: row.get("city")?,
        status: UserStatus::parse(&status).unwrap_or(UserStatus::Waiting),
    })
}

fn map_job(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status: String = row.get("status")?;
    let payload: String = row.get("payload")?;
    let created_at: String = row.get("created_at")?;
    Ok(JobRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        status: if status == "ok" {
            JobStatus::Ok
        } else {
            JobStatus::Fail
        },
        url: row.get("url")?,
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

fn conflict_or_backend(err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(e, _) = &err {
        if e.code == rusqlite::ErrorCode::ConstraintViolation {
            return Error::Conflict("login or chat handle already taken".into());
        }
    }
    Error::Backend(err.to_string())
}

impl Store for SqliteStore {
    fn register_user(&self, new: NewUser) -> Result<User> {
        validate_registration(&new)?;
        let conn = self.lock();
        let status = new.status.unwrap_or(UserStatus::Waiting);
        conn.execute(
            "INSERT INTO users (login, password, chat_handle, chat_id, city, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                new.login.as_deref().map(str::trim),
                new.password.as_deref().map(str::trim),
                new.chat_handle.as_deref().map(str::trim),
                new.chat_id,
                new.city,
                status.as_str(),
            ],
        )
        .map_err(conflict_or_backend)?;
        let id = conn.last_insert_rowid();
        let user = conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], map_user)?;
        Ok(user)
    }

    fn upsert_chat_user(&self, chat_handle: &str, chat_id: i64) -> Result<User> {
        let handle = chat_handle.trim();
        if handle.is_empty() {
            return Err(Error::Validation("chat handle must not be blank".into()));
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM users WHERE chat_handle = ?1 OR chat_id = ?2 LIMIT 1",
                params![handle, chat_id],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => {
                tx.execute(
                    "UPDATE users SET chat_handle = ?1, chat_id = ?2, status = ?3 WHERE id = ?4",
                    params![handle, chat_id, UserStatus::Registered.as_str(), id],
                )?;
                id
            }
            None => {
                tx.execute(
                    "INSERT INTO users (chat_handle, chat_id, status) VALUES (?1, ?2, ?3)",
                    params![handle, chat_id, UserStatus::Registered.as_str()],
                )
                .map_err(conflict_or_backend)?;
                tx.last_insert_rowid()
            }
        };
        let user = tx.query_row("SELECT * FROM users WHERE id = ?1", params![id], map_user)?;
        tx.commit()?;
        Ok(user)
    }

    fn user(&self, id: UserId) -> Result<Option<User>> {
        let conn = self.lock();
        let user = conn
            .query_row("SELECT * FROM users WHERE id = ?1", params![id], map_user)
            .optional()?;
        Ok(user)
    }

    fn users_by_status(&self, status: UserStatus) -> Result<Vec<User>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT * FROM users WHERE status = ?1 ORDER BY id ASC")?;
        let users = stmt
            .query_map(params![status.as_str()], map_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn set_status_if(&self, id: UserId, from: UserStatus, to: UserStatus) -> Result<bool> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE users SET status = ?1 WHERE id = ?2 AND status = ?3",
            params![to.as_str(), id, from.as_str()],
        )?;
        Ok(changed == 1)
    }

    fn hand_over(&self, from: Option<UserId>, to: UserId) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        if let Some(from) = from {
            tx.execute(
                "UPDATE users SET status = ?1 WHERE id = ?2",
                params![UserStatus::Waiting.as_str(), from],
            )?;
        }
        let changed = tx.execute(
            "UPDATE users SET status = ?1 WHERE id = ?2",
            params![UserStatus::InProgress.as_str(), to],
        )?;
        if changed != 1 {
            return Err(Error::UnknownUser(to));
        }
        tx.commit()?;
        Ok(())
    }

    fn chat_ids_by_status(&self, status: UserStatus) -> Result<Vec<i64>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT chat_id FROM users WHERE status = ?1 AND chat_id IS NOT NULL ORDER BY id ASC",
        )?;
        let ids = stmt
            .query_map(params![status.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }

    fn append_job(&self, rec: NewJobRecord) -> Result<JobRecord> {
        let conn = self.lock();
        let payload =
            serde_json::to_string(&rec.payload).map_err(|e| Error::Backend(e.to_string()))?;
        conn.execute(
            "INSERT INTO jobs (user_id, status, url, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                rec.user_id,
                rec.status.as_str(),
                rec.url,
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        let job = conn.query_row("SELECT * FROM jobs WHERE id = ?1", params![id], map_job)?;
        Ok(job)
    }

    fn last_job(&self) -> Result<Option<JobRecord>> {
        let conn = self.lock();
        let job = conn
            .query_row("SELECT * FROM jobs ORDER BY id DESC LIMIT 1", [], map_job)
            .optional()?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        for name in ["alpha", "bravo"] {
            store
                .register_user(NewUser {
                    login: Some(name.into()),
                    password: Some("pw".into()),
                    city: Some("Moscow".into()),
                    ..NewUser::default()
                })
                .unwrap();
        }
        store
    }

    #[test]
    fn test_register_and_fetch_roundtrip() {
        let store = seeded();
        let user = store.user(1).unwrap().unwrap();
        assert_eq!(user.login.as_deref(), Some("alpha"));
        assert_eq!(user.status, UserStatus::Waiting);
        assert_eq!(user.city.as_deref(), Some("Moscow"));
    }

    #[test]
    fn test_duplicate_login_is_a_conflict() {
        let store = seeded();
        let err = store
            .register_user(NewUser {
                login: Some("alpha".into()),
                password: Some("pw".into()),
                ..NewUser::default()
            })
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn test_hand_over_is_atomic_pairwise_update() {
        let store = seeded();
        store.hand_over(None, 1).unwrap();
        assert_eq!(store.user(1).unwrap().unwrap().status, UserStatus::InProgress);
        store.hand_over(Some(1), 2).unwrap();
        assert_eq!(store.user(1).unwrap().unwrap().status, UserStatus::Waiting);
        assert_eq!(store.user(2).unwrap().unwrap().status, UserStatus::InProgress);
    }

    #[test]
    fn test_job_payload_survives_roundtrip() {
        let store = seeded();
        store
            .append_job(NewJobRecord {
                user_id: 1,
                status: JobStatus::Fail,
                url: Some("https://example.com/x".into()),
                payload: serde_json::json!({ "error": "timeout" }),
            })
            .unwrap();
        let job = store.last_job().unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Fail);
        assert_eq!(job.payload["error"], "timeout");
        assert_eq!(job.url.as_deref(), Some("https://example.com/x"));
    }

    #[test]
    fn test_open_on_disk_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slotter.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .register_user(NewUser {
                    login: Some("disk".into()),
                    password: Some("pw".into()),
                    ..NewUser::default()
                })
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert!(store.user(1).unwrap().is_some());
    }
}
