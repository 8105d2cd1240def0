//! Outbox message: one domain event waiting to be relayed to the broker.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::MessageId;

/// Delivery state of an outbox message.
///
/// `Pending` is the only state readers return. `Published` and `Failed` are
/// terminal for the automatic relay loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Published,
    Failed,
}

impl OutboxStatus {
    /// Storage form, as written to the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Published => "published",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown outbox status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OutboxStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "published" => Ok(Self::Published),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

/// Durable record of one domain event pending delivery.
///
/// Rows are created by the owning module inside its business transaction;
/// the relay only ever moves `status` forward and bumps `attempt_count`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: MessageId,
    pub occurred_at: DateTime<Utc>,
    /// Logical event kind; doubles as the broker routing key.
    pub event_type: String,
    /// Serialized event body, opaque to the relay.
    pub payload: String,
    pub status: OutboxStatus,
    pub attempt_count: u32,
    pub source_module: String,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl OutboxMessage {
    /// A fresh `Pending` message stamped with the current time.
    pub fn new(
        source_module: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            occurred_at: Utc::now(),
            event_type: event_type.into(),
            payload: payload.into(),
            status: OutboxStatus::Pending,
            attempt_count: 0,
            source_module: source_module.into(),
            last_error: None,
            published_at: None,
            failed_at: None,
        }
    }

    /// Override the recorded time (replays, imports, tests).
    pub fn occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == OutboxStatus::Pending
    }

    /// Broker acknowledged delivery. Returns `false` (and changes nothing) if the
    /// message had already left `Pending`.
    pub fn mark_published(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.attempt_count += 1;
        self.status = OutboxStatus::Published;
        self.published_at = Some(now);
        true
    }

    /// Delivery attempt failed. Quarantines the message once
    /// `attempt_count >= max_attempts`; returns `true` exactly when this call
    /// moved it to `Failed`.
    pub fn record_failed_attempt(
        &mut self,
        error: &str,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.attempt_count += 1;
        self.last_error = Some(error.to_owned());
        if self.attempt_count >= max_attempts {
            self.status = OutboxStatus::Failed;
            self.failed_at = Some(now);
            return true;
        }
        false
    }
}
