//! Redis Streams publisher.
//!
//! Each message is `XADD`ed to `<prefix>:<event_type>`; the returned entry id
//! is the broker acknowledgement. Connections come from a deadpool pool and
//! are reused across ticks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_redis::Pool;
use deadpool_redis::redis::{RedisError, cmd};
use serde::Serialize;
use tracing::debug;

use clinic_core::serde::to_rfc3339_ms;
use clinic_domain::id::MessageId;
use clinic_domain::outbox::OutboxMessage;

use crate::domain::repository::OutboxPublisher;
use crate::domain::types::Delivery;
use crate::error::PublishError;

/// What consumers read from the `envelope` field of each stream entry.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: MessageId,
    source_module: &'a str,
    event_type: &'a str,
    #[serde(serialize_with = "to_rfc3339_ms")]
    occurred_at: DateTime<Utc>,
    /// 1-based delivery attempt; >1 means consumers may have seen it before.
    attempt: u32,
    payload: &'a str,
}

#[derive(Clone)]
pub struct RedisStreamPublisher {
    pool: Pool,
    stream_prefix: String,
    max_len: usize,
}

impl RedisStreamPublisher {
    pub fn new(pool: Pool, stream_prefix: impl Into<String>, max_len: usize) -> Self {
        Self {
            pool,
            stream_prefix: stream_prefix.into(),
            max_len,
        }
    }

    pub fn stream_key(&self, event_type: &str) -> String {
        stream_key(&self.stream_prefix, event_type)
    }
}

pub fn stream_key(prefix: &str, event_type: &str) -> String {
    format!("{prefix}:{event_type}")
}

/// Connection-level failures abort the batch; anything else the server
/// answers with is a verdict on that one message.
fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// Local checks a message must pass before it is worth sending.
fn validate(message: &OutboxMessage) -> Result<String, String> {
    if message.event_type.trim().is_empty() {
        return Err("empty event type".to_owned());
    }
    let envelope = Envelope {
        id: message.id,
        source_module: &message.source_module,
        event_type: &message.event_type,
        occurred_at: message.occurred_at,
        attempt: message.attempt_count + 1,
        payload: &message.payload,
    };
    serde_json::to_string(&envelope).map_err(|e| format!("envelope serialization failed: {e}"))
}

#[async_trait]
impl OutboxPublisher for RedisStreamPublisher {
    async fn publish(&self, batch: &[OutboxMessage]) -> Result<Vec<Delivery>, PublishError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| PublishError::Unavailable(e.to_string()))?;

        let mut deliveries = Vec::with_capacity(batch.len());
        for message in batch {
            let envelope = match validate(message) {
                Ok(envelope) => envelope,
                Err(reason) => {
                    deliveries.push(Delivery::rejected(message.id, reason));
                    continue;
                }
            };

            let stream = self.stream_key(&message.event_type);
            let sent: Result<String, RedisError> = cmd("XADD")
                .arg(&stream)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.max_len)
                .arg("*")
                .arg("message_id")
                .arg(message.id.to_string())
                .arg("event_type")
                .arg(&message.event_type)
                .arg("source_module")
                .arg(&message.source_module)
                .arg("envelope")
                .arg(&envelope)
                .query_async(&mut conn)
                .await;

            match sent {
                Ok(entry_id) => {
                    debug!(
                        message_id = %message.id,
                        stream = %stream,
                        entry_id = %entry_id,
                        "outbox message acknowledged by broker"
                    );
                    deliveries.push(Delivery::acknowledged(message.id));
                }
                // Earlier acks in this batch are dropped too; they will be resent.
                Err(e) if is_connection_error(&e) => {
                    return Err(PublishError::Unavailable(e.to_string()));
                }
                Err(e) => deliveries.push(Delivery::rejected(message.id, e.to_string())),
            }
        }

        Ok(deliveries)
    }
}
