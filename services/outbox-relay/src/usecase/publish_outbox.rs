use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use clinic_core::shutdown::ShutdownSignal;
use clinic_domain::id::MessageId;

use crate::domain::repository::{OutboxPublisher, OutboxReader};
use crate::domain::types::{
    DeliveryOutcome, FailedAttempt, ModuleFailure, ModuleReport, TickReport,
};

/// Default cap on messages fetched per module per tick.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

/// Default number of delivery attempts before a message is quarantined.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Reason recorded when the publisher returns no verdict for a message.
const MISSING_VERDICT: &str = "no delivery result from publisher";

// ── OutboxPublishingJob ──────────────────────────────────────────────────────

/// One tick of the relay: drain every registered reader into the publisher.
///
/// Readers are processed one after another. Each reader's pipeline
/// (fetch → publish → mark / record attempts) is isolated: its failure ends
/// up in that module's [`ModuleReport`] and the next reader still runs.
pub struct OutboxPublishingJob {
    readers: Vec<Arc<dyn OutboxReader>>,
    publisher: Arc<dyn OutboxPublisher>,
    max_batch_size: usize,
    max_attempts: u32,
}

impl OutboxPublishingJob {
    pub fn new(publisher: Arc<dyn OutboxPublisher>) -> Self {
        Self {
            readers: Vec::new(),
            publisher,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Register one module's reader. Readers run in registration order.
    pub fn with_reader(mut self, reader: Arc<dyn OutboxReader>) -> Self {
        self.readers.push(reader);
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.readers.iter().map(|r| r.source_module())
    }

    /// Run one tick. Never fails: every problem is recorded in the report.
    ///
    /// `shutdown` is checked before each reader, never inside a batch.
    pub async fn execute(&self, shutdown: &ShutdownSignal) -> TickReport {
        let mut report = TickReport::default();

        for (idx, reader) in self.readers.iter().enumerate() {
            if shutdown.is_triggered() {
                report.deferred = self.readers[idx..]
                    .iter()
                    .map(|r| r.source_module().to_owned())
                    .collect();
                info!(
                    deferred = ?report.deferred,
                    "shutdown requested, deferring remaining modules"
                );
                break;
            }

            let module_report = self.drain(reader.as_ref()).await;
            if let Some(failure) = &module_report.failure {
                warn!(
                    module = %module_report.module,
                    stage = failure.stage(),
                    error = %failure,
                    "outbox drain failed for module"
                );
            }
            report.modules.push(module_report);
        }

        report
    }

    async fn drain(&self, reader: &dyn OutboxReader) -> ModuleReport {
        let module = reader.source_module();
        let mut report = ModuleReport::new(module);

        // 1. Fetch (read-only; nothing changes if we crash after this).
        let batch = match reader.fetch_pending(self.max_batch_size).await {
            Ok(batch) => batch,
            Err(e) => {
                report.failure = Some(ModuleFailure::Fetch(e));
                return report;
            }
        };

        // 2. Nothing to do.
        if batch.is_empty() {
            debug!(module, "no pending outbox messages");
            return report;
        }
        report.fetched = batch.len();

        // 3. Publish. Rows are still Pending here; a crash now means redelivery.
        let (acked, failed) = match self.publisher.publish(&batch).await {
            Ok(deliveries) => {
                let mut verdicts: HashMap<MessageId, DeliveryOutcome> = deliveries
                    .into_iter()
                    .map(|d| (d.id, d.outcome))
                    .collect();
                let mut acked = Vec::new();
                let mut failed = Vec::new();
                for message in &batch {
                    match verdicts.remove(&message.id) {
                        Some(DeliveryOutcome::Acknowledged) => acked.push(message.id),
                        Some(DeliveryOutcome::Rejected { reason }) => {
                            warn!(
                                module,
                                message_id = %message.id,
                                event_type = %message.event_type,
                                attempt = message.attempt_count + 1,
                                reason = %reason,
                                "broker rejected outbox message"
                            );
                            failed.push(FailedAttempt {
                                id: message.id,
                                error: reason,
                            });
                        }
                        None => failed.push(FailedAttempt {
                            id: message.id,
                            error: MISSING_VERDICT.to_owned(),
                        }),
                    }
                }
                (acked, failed)
            }
            Err(e) => {
                // Whole batch unacknowledged: every message gets an attempt recorded.
                let failed: Vec<FailedAttempt> = batch
                    .iter()
                    .map(|m| FailedAttempt {
                        id: m.id,
                        error: e.to_string(),
                    })
                    .collect();
                report.failure = Some(ModuleFailure::Publish(e));
                (Vec::new(), failed)
            }
        };

        // 4. Mark acknowledged messages. Only ever after the broker confirmed.
        if !acked.is_empty() {
            match reader.mark_processed(&acked).await {
                Ok(_) => {
                    report.published = acked.len();
                    info!(module, published = acked.len(), "published outbox messages");
                }
                Err(e) => {
                    // Left Pending: they will be delivered again next tick.
                    report.failure = Some(ModuleFailure::MarkProcessed(e));
                }
            }
        }

        // 5. Count failed attempts; quarantine exhausted messages.
        if !failed.is_empty() {
            match reader
                .record_failed_attempts(&failed, self.max_attempts)
                .await
            {
                Ok(quarantined) => {
                    report.retried = failed.len().saturating_sub(quarantined.len());
                    for id in &quarantined {
                        let event_type = batch
                            .iter()
                            .find(|m| m.id == *id)
                            .map(|m| m.event_type.as_str())
                            .unwrap_or_default();
                        error!(
                            module,
                            message_id = %id,
                            event_type,
                            max_attempts = self.max_attempts,
                            "outbox message quarantined after exhausting delivery attempts"
                        );
                    }
                    report.quarantined = quarantined;
                }
                Err(e) => {
                    // An earlier failure (publish) is the more useful one to surface.
                    if report.failure.is_none() {
                        report.failure = Some(ModuleFailure::RecordAttempts(e));
                    } else {
                        warn!(module, error = %e, "could not record failed delivery attempts");
                    }
                }
            }
        }

        report
    }
}
