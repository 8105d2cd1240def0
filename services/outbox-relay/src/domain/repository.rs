use async_trait::async_trait;

use clinic_domain::id::MessageId;
use clinic_domain::outbox::OutboxMessage;

use crate::domain::types::{Delivery, FailedAttempt};
use crate::error::{OutboxError, PublishError};

/// Port onto one module's outbox table.
///
/// The relay holds these as trait objects, one per module, and never learns
/// which store backs each.
#[async_trait]
pub trait OutboxReader: Send + Sync {
    /// Module this reader drains (matches `source_module` on its rows).
    fn source_module(&self) -> &str;

    /// Up to `max_batch_size` `Pending` messages, oldest `occurred_at` first
    /// (ties by id). Must not mutate anything.
    async fn fetch_pending(&self, max_batch_size: usize)
    -> Result<Vec<OutboxMessage>, OutboxError>;

    /// Atomically move `ids` from `Pending` to `Published`, counting the
    /// successful attempt. Ids no longer `Pending` are left untouched, so
    /// repeating the call is a no-op. Returns how many rows changed.
    async fn mark_processed(&self, ids: &[MessageId]) -> Result<u64, OutboxError>;

    /// Count one failed attempt per still-`Pending` id and quarantine
    /// (`Failed`) every one that reached `max_attempts`. Returns the ids this
    /// call quarantined.
    async fn record_failed_attempts(
        &self,
        failures: &[FailedAttempt],
        max_attempts: u32,
    ) -> Result<Vec<MessageId>, OutboxError>;
}

/// Port onto the message broker.
#[async_trait]
pub trait OutboxPublisher: Send + Sync {
    /// Send every message, in batch order, addressed by `event_type`.
    ///
    /// `Ok` carries one [`Delivery`] per message. `Err` means the broker could
    /// not be reached at all and nothing in the batch counts as delivered.
    async fn publish(&self, batch: &[OutboxMessage]) -> Result<Vec<Delivery>, PublishError>;
}
