/// Outbox store failure (fetch, mark, or attempt bookkeeping).
///
/// Always transient from the relay's point of view: the reader is skipped for
/// this tick and retried on the next one, with no state change to messages.
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox store error: {0}")]
    Store(#[from] anyhow::Error),
    #[error("corrupt outbox row {id}: {reason}")]
    CorruptRow { id: String, reason: String },
}

impl OutboxError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "STORE",
            Self::CorruptRow { .. } => "CORRUPT_ROW",
        }
    }
}

/// Publisher-level failure: the whole batch is unacknowledged.
///
/// Per-message broker rejections are not errors at this level; they are
/// reported through [`crate::domain::types::DeliveryOutcome::Rejected`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
}
