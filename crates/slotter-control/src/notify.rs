//! Notification fan-out.
//!
//! The [`Messenger`] trait is the seam to whatever chat service carries the
//! messages; everything above it is transport-agnostic. Delivery is always
//! best-effort: a failed send is reported, never escalated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use slotter_core::OperatorEvent;

#[derive(Error, Debug)]
pub enum SendError {
    /// The service asked us to back off for the given duration.
    #[error("rate limited for {0:?}")]
    RateLimited(Duration),

    #[error("{0}")]
    Other(String),
}

/// One chat transport. Implementations must be safe to call concurrently.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendError>;
}

/// Outcome of one broadcast. Failures carry the reason per recipient.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: Vec<(i64, String)>,
}

impl DeliveryReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Notifier {
    messenger: Arc<dyn Messenger>,
    /// Delay between consecutive sends of one broadcast.
    pacing: Duration,
}

impl Notifier {
    pub fn new(messenger: Arc<dyn Messenger>, pacing: Duration) -> Self {
        Self { messenger, pacing }
    }

    /// Deliver `text` to every chat, paced, honoring one rate-limit retry
    /// per recipient.
    pub async fn broadcast(&self, chat_ids: &[i64], text: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for (i, &chat_id) in chat_ids.iter().enumerate() {
            if i > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            match self.send_with_retry(chat_id, text).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(chat_id, error = %e, "message delivery failed");
                    report.failed.push((chat_id, e.to_string()));
                }
            }
        }
        report
    }

    /// Forward a worker pause/notice to the operator chats.
    pub async fn operator_event(&self, chat_ids: &[i64], event: &OperatorEvent) -> DeliveryReport {
        let text = if event.url.is_empty() {
            format!("[{}] {}", event.kind, event.message)
        } else {
            format!("[{}] {}\n{}", event.kind, event.message, event.url)
        };
        self.broadcast(chat_ids, &text).await
    }

    async fn send_with_retry(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
        match self.messenger.send(chat_id, text).await {
            Err(SendError::RateLimited(wait)) => {
                debug!(chat_id, ?wait, "rate limited, retrying once");
                tokio::time::sleep(wait).await;
                self.messenger.send(chat_id, text).await
            }
            other => other,
        }
    }
}
