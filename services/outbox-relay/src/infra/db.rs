use std::fmt::Display;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait, sea_query::Expr,
};
use uuid::Uuid;

use clinic_domain::id::MessageId;
use clinic_domain::outbox::{OutboxMessage, OutboxStatus};
use clinic_outbox_schema::outbox_messages::{self, Column};

use crate::domain::repository::OutboxReader;
use crate::domain::types::FailedAttempt;
use crate::error::OutboxError;

/// Ids bound per `IN (...)` list. Keeps any batch size under the backend's
/// bind-parameter limit (32766 on SQLite, 65535 on Postgres).
pub const DEFAULT_ID_CHUNK_SIZE: usize = 1000;

// ── Outbox reader ────────────────────────────────────────────────────────────

/// `outbox_messages` table of one module database.
///
/// Only rows whose `source_module` matches are touched, so several modules
/// may share one database.
#[derive(Clone)]
pub struct DbOutboxReader {
    pub module: String,
    pub db: DatabaseConnection,
    chunk_size: usize,
}

impl DbOutboxReader {
    pub fn new(module: impl Into<String>, db: DatabaseConnection) -> Self {
        Self {
            module: module.into(),
            db,
            chunk_size: DEFAULT_ID_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }
}

#[async_trait]
impl OutboxReader for DbOutboxReader {
    fn source_module(&self) -> &str {
        &self.module
    }

    async fn fetch_pending(
        &self,
        max_batch_size: usize,
    ) -> Result<Vec<OutboxMessage>, OutboxError> {
        let models = outbox_messages::Entity::find()
            .filter(Column::SourceModule.eq(self.module.as_str()))
            .filter(Column::Status.eq(OutboxStatus::Pending.as_str()))
            .order_by_asc(Column::OccurredAt)
            .order_by_asc(Column::Id)
            .limit(max_batch_size as u64)
            .all(&self.db)
            .await
            .map_err(store_err("fetch pending outbox messages"))?;
        models.into_iter().map(message_from_model).collect()
    }

    async fn mark_processed(&self, ids: &[MessageId]) -> Result<u64, OutboxError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids = raw_ids(ids);
        let module = self.module.clone();
        let chunk_size = self.chunk_size;
        let now = Utc::now();

        // One transaction over all chunks: all-or-nothing, and the status
        // guard makes repeats no-ops.
        let changed = self
            .db
            .transaction::<_, u64, DbErr>(move |txn| {
                Box::pin(async move {
                    let mut changed = 0;
                    for chunk in ids.chunks(chunk_size) {
                        changed += publish_chunk(txn, &module, chunk, now).await?;
                    }
                    Ok(changed)
                })
            })
            .await
            .map_err(store_err("mark outbox messages published"))?;
        Ok(changed)
    }

    async fn record_failed_attempts(
        &self,
        failures: &[FailedAttempt],
        max_attempts: u32,
    ) -> Result<Vec<MessageId>, OutboxError> {
        if failures.is_empty() {
            return Ok(Vec::new());
        }
        let failures = failures.to_vec();
        let module = self.module.clone();
        let chunk_size = self.chunk_size;
        let max_attempts = i32::try_from(max_attempts).unwrap_or(i32::MAX);

        let quarantined = self
            .db
            .transaction::<_, Vec<Uuid>, DbErr>(move |txn| {
                Box::pin(async move {
                    for failure in &failures {
                        bump_attempt(txn, &module, failure).await?;
                    }
                    let ids: Vec<Uuid> = failures.iter().map(|f| f.id.0).collect();
                    let mut quarantined = Vec::new();
                    for chunk in ids.chunks(chunk_size) {
                        quarantined.extend(
                            quarantine_exhausted(txn, &module, chunk, max_attempts, Utc::now())
                                .await?,
                        );
                    }
                    Ok(quarantined)
                })
            })
            .await
            .map_err(store_err("record failed outbox delivery attempts"))?;

        Ok(quarantined.into_iter().map(MessageId).collect())
    }
}

/// Flatten a store error into one message. `DbErr` already renders its
/// driver cause, so the chain stops here.
fn store_err<E: Display>(what: &'static str) -> impl FnOnce(E) -> anyhow::Error {
    move |e| anyhow::anyhow!("{what}: {e}")
}

async fn publish_chunk<C: ConnectionTrait>(
    conn: &C,
    module: &str,
    ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<u64, DbErr> {
    let result = outbox_messages::Entity::update_many()
        .col_expr(Column::Status, Expr::value(OutboxStatus::Published.as_str()))
        .col_expr(Column::AttemptCount, Expr::col(Column::AttemptCount).add(1))
        .col_expr(Column::PublishedAt, Expr::value(now))
        .filter(Column::SourceModule.eq(module))
        .filter(Column::Id.is_in(ids.to_vec()))
        .filter(Column::Status.eq(OutboxStatus::Pending.as_str()))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

async fn bump_attempt<C: ConnectionTrait>(
    conn: &C,
    module: &str,
    failure: &FailedAttempt,
) -> Result<(), DbErr> {
    outbox_messages::Entity::update_many()
        .col_expr(Column::AttemptCount, Expr::col(Column::AttemptCount).add(1))
        .col_expr(Column::LastError, Expr::value(failure.error.clone()))
        .filter(Column::SourceModule.eq(module))
        .filter(Column::Id.eq(failure.id.0))
        .filter(Column::Status.eq(OutboxStatus::Pending.as_str()))
        .exec(conn)
        .await?;
    Ok(())
}

/// Move every still-pending row among `ids` with `attempt_count >= max_attempts`
/// to `failed`. Returns the ids it moved.
async fn quarantine_exhausted<C: ConnectionTrait>(
    conn: &C,
    module: &str,
    ids: &[Uuid],
    max_attempts: i32,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, DbErr> {
    let exhausted: Vec<Uuid> = outbox_messages::Entity::find()
        .select_only()
        .column(Column::Id)
        .filter(Column::SourceModule.eq(module))
        .filter(Column::Id.is_in(ids.to_vec()))
        .filter(Column::Status.eq(OutboxStatus::Pending.as_str()))
        .filter(Column::AttemptCount.gte(max_attempts))
        .into_tuple()
        .all(conn)
        .await?;

    if !exhausted.is_empty() {
        outbox_messages::Entity::update_many()
            .col_expr(Column::Status, Expr::value(OutboxStatus::Failed.as_str()))
            .col_expr(Column::FailedAt, Expr::value(now))
            .filter(Column::Id.is_in(exhausted.clone()))
            .exec(conn)
            .await?;
    }
    Ok(exhausted)
}

// ── Producer side ────────────────────────────────────────────────────────────

/// Insert one outbox row. Business modules call this with the same
/// `DatabaseTransaction` as their domain write; the relay never does.
pub async fn insert_outbox_message<C: ConnectionTrait>(
    conn: &C,
    message: &OutboxMessage,
) -> Result<(), DbErr> {
    outbox_messages::ActiveModel {
        id: Set(message.id.0),
        source_module: Set(message.source_module.clone()),
        event_type: Set(message.event_type.clone()),
        payload: Set(message.payload.clone()),
        status: Set(message.status.as_str().to_owned()),
        attempt_count: Set(i32::try_from(message.attempt_count).unwrap_or(i32::MAX)),
        last_error: Set(message.last_error.clone()),
        occurred_at: Set(message.occurred_at),
        published_at: Set(message.published_at),
        failed_at: Set(message.failed_at),
    }
    .insert(conn)
    .await?;
    Ok(())
}

fn raw_ids(ids: &[MessageId]) -> Vec<Uuid> {
    ids.iter().map(|id| id.0).collect()
}

fn message_from_model(model: outbox_messages::Model) -> Result<OutboxMessage, OutboxError> {
    let status = model
        .status
        .parse::<OutboxStatus>()
        .map_err(|e| OutboxError::CorruptRow {
            id: model.id.to_string(),
            reason: e.to_string(),
        })?;
    let attempt_count =
        u32::try_from(model.attempt_count).map_err(|_| OutboxError::CorruptRow {
            id: model.id.to_string(),
            reason: format!("negative attempt_count {}", model.attempt_count),
        })?;
    Ok(OutboxMessage {
        id: MessageId(model.id),
        occurred_at: model.occurred_at,
        event_type: model.event_type,
        payload: model.payload,
        status,
        attempt_count,
        source_module: model.source_module,
        last_error: model.last_error,
        published_at: model.published_at,
        failed_at: model.failed_at,
    })
}
