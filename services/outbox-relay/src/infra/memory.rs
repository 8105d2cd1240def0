use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use clinic_domain::id::MessageId;
use clinic_domain::outbox::OutboxMessage;

use crate::domain::repository::OutboxReader;
use crate::domain::types::FailedAttempt;
use crate::error::OutboxError;

/// Process-local outbox for a module running without a database
/// (`<MODULE>_DATABASE_URL=memory`). Same contract as the sea-orm reader.
pub struct InMemoryOutboxStore {
    module: String,
    messages: Mutex<Vec<OutboxMessage>>,
}

impl InMemoryOutboxStore {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Producer side: append a message as the module's transaction would.
    pub fn insert(&self, message: OutboxMessage) {
        self.lock().push(message);
    }

    pub fn get(&self, id: MessageId) -> Option<OutboxMessage> {
        self.lock().iter().find(|m| m.id == id).cloned()
    }

    /// Every stored message, in insertion order.
    pub fn snapshot(&self) -> Vec<OutboxMessage> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<OutboxMessage>> {
        // Every mutation below completes before releasing the lock, so a
        // poisoned guard still holds consistent rows.
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OutboxReader for InMemoryOutboxStore {
    fn source_module(&self) -> &str {
        &self.module
    }

    async fn fetch_pending(
        &self,
        max_batch_size: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let mut pending: Vec<OutboxMessage> =
            self.lock().iter().filter(|m| m.is_pending()).cloned().collect();
        pending.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at).then(a.id.cmp(&b.id)));
        pending.truncate(max_batch_size);
        Ok(pending)
    }

    async fn mark_processed(&self, ids: &[MessageId]) -> Result<u64, OutboxError> {
        let now = Utc::now();
        let mut messages = self.lock();
        let changed = messages
            .iter_mut()
            .filter(|m| ids.contains(&m.id))
            .map(|m| m.mark_published(now))
            .filter(|changed| *changed)
            .count();
        Ok(changed as u64)
    }

    async fn record_failed_attempts(
        &self,
        failures: &[FailedAttempt],
        max_attempts: u32,
    ) -> Result<Vec<MessageId>, OutboxError> {
        let now = Utc::now();
        let mut messages = self.lock();
        let mut quarantined = Vec::new();
        for failure in failures {
            let Some(message) = messages.iter_mut().find(|m| m.id == failure.id) else {
                continue;
            };
            if message.record_failed_attempt(&failure.error, max_attempts, now) {
                quarantined.push(message.id);
            }
        }
        Ok(quarantined)
    }
}
