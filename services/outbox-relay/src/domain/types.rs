use clinic_domain::id::MessageId;

use crate::error::{OutboxError, PublishError};

/// Broker verdict for one message of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Broker confirmed the message; safe to mark Published.
    Acknowledged,
    /// Broker (or local validation) refused this message only.
    Rejected { reason: String },
}

/// Per-message publish result, in batch order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: MessageId,
    pub outcome: DeliveryOutcome,
}

impl Delivery {
    pub fn acknowledged(id: MessageId) -> Self {
        Self {
            id,
            outcome: DeliveryOutcome::Acknowledged,
        }
    }

    pub fn rejected(id: MessageId, reason: impl Into<String>) -> Self {
        Self {
            id,
            outcome: DeliveryOutcome::Rejected {
                reason: reason.into(),
            },
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        self.outcome == DeliveryOutcome::Acknowledged
    }
}

/// A delivery attempt that did not end in an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAttempt {
    pub id: MessageId,
    pub error: String,
}

/// Stage at which a module's pipeline stopped during a tick.
#[derive(Debug, thiserror::Error)]
pub enum ModuleFailure {
    #[error("fetch pending failed: {0}")]
    Fetch(OutboxError),
    #[error("publish failed: {0}")]
    Publish(PublishError),
    #[error("mark processed failed: {0}")]
    MarkProcessed(OutboxError),
    #[error("recording failed attempts failed: {0}")]
    RecordAttempts(OutboxError),
}

impl ModuleFailure {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::Publish(_) => "publish",
            Self::MarkProcessed(_) => "mark_processed",
            Self::RecordAttempts(_) => "record_attempts",
        }
    }
}

/// What one tick did for one module.
#[derive(Debug)]
pub struct ModuleReport {
    pub module: String,
    /// Messages handed to the publisher.
    pub fetched: usize,
    /// Messages acknowledged and marked Published.
    pub published: usize,
    /// Messages left Pending with one more attempt recorded.
    pub retried: usize,
    /// Messages moved to Failed during this tick.
    pub quarantined: Vec<MessageId>,
    pub failure: Option<ModuleFailure>,
}

impl ModuleReport {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            fetched: 0,
            published: 0,
            retried: 0,
            quarantined: Vec::new(),
            failure: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }
}

/// Result of one tick across every registered reader.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Modules processed this tick, in registration order.
    pub modules: Vec<ModuleReport>,
    /// Modules not reached because shutdown was requested mid-tick.
    pub deferred: Vec<String>,
}

impl TickReport {
    pub fn module(&self, name: &str) -> Option<&ModuleReport> {
        self.modules.iter().find(|m| m.module == name)
    }

    pub fn published(&self) -> usize {
        self.modules.iter().map(|m| m.published).sum()
    }

    pub fn quarantined(&self) -> usize {
        self.modules.iter().map(|m| m.quarantined.len()).sum()
    }

    pub fn failed_modules(&self) -> impl Iterator<Item = &ModuleReport> {
        self.modules.iter().filter(|m| !m.is_ok())
    }

    pub fn was_interrupted(&self) -> bool {
        !self.deferred.is_empty()
    }
}
