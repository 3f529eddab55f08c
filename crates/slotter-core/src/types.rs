use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;

/// Position of a user in the booking rotation.
///
/// At most one user holds `InProgress` at any instant - that user owns the
/// carousel token and is the one whose booking attempts run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    /// Queued for a turn.
    Waiting,
    /// Current token holder.
    InProgress,
    /// An application was completed for this user; out of the rotation.
    Applied,
    /// Chat-only subscriber: receives result broadcasts, never booked for.
    Registered,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Waiting => "waiting",
            UserStatus::InProgress => "in_progress",
            UserStatus::Applied => "applied",
            UserStatus::Registered => "registered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(UserStatus::Waiting),
            "in_progress" => Some(UserStatus::InProgress),
            "applied" => Some(UserStatus::Applied),
            "registered" => Some(UserStatus::Registered),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: Option<String>,
    pub password: Option<String>,
    pub chat_handle: Option<String>,
    pub chat_id: Option<i64>,
    pub city: Option<String>,
    pub status: UserStatus,
}

/// Registration input. Validated before it touches a store.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub login: Option<String>,
    pub password: Option<String>,
    pub chat_handle: Option<String>,
    pub chat_id: Option<i64>,
    pub city: Option<String>,
    pub status: Option<UserStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    Fail,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Ok => "ok",
            JobStatus::Fail => "fail",
        }
    }
}

/// Append-only record of one completed booking attempt. Never updated.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub user_id: UserId,
    pub status: JobStatus,
    pub url: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewJobRecord {
    pub user_id: UserId,
    pub status: JobStatus,
    pub url: Option<String>,
    pub payload: serde_json::Value,
}

/// Input to one booking attempt, handed to the worker over the bridge.
#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub user_id: UserId,
    pub login: String,
    pub password: String,
    pub city: String,
}

/// Classified terminal result of one booking attempt.
///
/// `NoSlots` and `Blocked` are part of the normal business result space, not
/// errors; only infrastructural faults surface as `Failure`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingOutcome {
    Success { url: String },
    NoSlots { url: String },
    Blocked { url: String },
    Failure { reason: String, url: Option<String> },
}

impl BookingOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, BookingOutcome::Success { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            BookingOutcome::Success { .. } => "success",
            BookingOutcome::NoSlots { .. } => "no_slots",
            BookingOutcome::Blocked { .. } => "blocked",
            BookingOutcome::Failure { .. } => "failure",
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            BookingOutcome::Success { url }
            | BookingOutcome::NoSlots { url }
            | BookingOutcome::Blocked { url } => Some(url),
            BookingOutcome::Failure { url, .. } => url.as_deref(),
        }
    }
}

/// Event pushed from the worker domain to the human operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorEvent {
    pub kind: String,
    pub message: String,
    pub url: String,
}

impl OperatorEvent {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            url: url.into(),
        }
    }
}
