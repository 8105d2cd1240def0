use std::sync::Arc;

use clinic_core::shutdown::ShutdownSignal;
use clinic_domain::id::MessageId;
use clinic_domain::outbox::OutboxStatus;
use clinic_outbox_relay::domain::repository::OutboxReader;
use clinic_outbox_relay::usecase::publish_outbox::OutboxPublishingJob;

use crate::helpers::{
    CrashOnMarkReader, FailingReader, Script, ScriptedPublisher, message_at, store_with,
};

fn job(publisher: &Arc<ScriptedPublisher>) -> OutboxPublishingJob {
    OutboxPublishingJob::new(publisher.clone())
}

// ── Ordering and batching ────────────────────────────────────────────────────

#[tokio::test]
async fn should_publish_oldest_first_in_batches() {
    let (t1, t2, t3) = (
        message_at("patients", 1),
        message_at("patients", 2),
        message_at("patients", 3),
    );
    let store = store_with("patients", &[t3.clone(), t1.clone(), t2.clone()]);
    let publisher = Arc::new(ScriptedPublisher::ack_all());
    let job = job(&publisher).with_reader(store.clone()).with_max_batch_size(2);
    let shutdown = ShutdownSignal::new();

    let first = job.execute(&shutdown).await;
    let second = job.execute(&shutdown).await;

    assert_eq!(publisher.batches(), vec![vec![t1.id, t2.id], vec![t3.id]]);
    assert_eq!(first.published(), 2);
    assert_eq!(second.published(), 1);
    assert!(store.snapshot().iter().all(|m| m.status == OutboxStatus::Published));
}

#[tokio::test]
async fn should_report_nothing_for_empty_outbox() {
    let publisher = Arc::new(ScriptedPublisher::ack_all());
    let job = job(&publisher).with_reader(store_with("patients", &[]));

    let report = job.execute(&ShutdownSignal::new()).await;

    let patients = report.module("patients").unwrap();
    assert!(patients.is_ok());
    assert_eq!(patients.fetched, 0);
    assert!(publisher.batches().is_empty(), "empty batch must not reach the broker");
}

// ── Retries and quarantine ───────────────────────────────────────────────────

#[tokio::test]
async fn should_publish_after_broker_recovers() {
    let msg = message_at("appointments", 1);
    let store = store_with("appointments", &[msg.clone()]);
    let publisher = Arc::new(ScriptedPublisher::new(vec![
        Script::Unavailable,
        Script::Unavailable,
        Script::AckAll,
    ]));
    let job = job(&publisher).with_reader(store.clone()).with_max_attempts(5);
    let shutdown = ShutdownSignal::new();

    let first = job.execute(&shutdown).await;
    assert_eq!(
        first.module("appointments").unwrap().failure.as_ref().map(|f| f.stage()),
        Some("publish")
    );
    assert_eq!(first.module("appointments").unwrap().retried, 1);
    job.execute(&shutdown).await;
    job.execute(&shutdown).await;

    let stored = store.get(msg.id).unwrap();
    assert_eq!(stored.status, OutboxStatus::Published);
    assert_eq!(stored.attempt_count, 3);
    assert!(stored.published_at.is_some());
}

#[tokio::test]
async fn should_publish_on_last_allowed_attempt() {
    let max_attempts = 3;
    let msg = message_at("patients", 1);
    let store = store_with("patients", &[msg.clone()]);
    let publisher = Arc::new(ScriptedPublisher::new(vec![
        Script::Reject(vec![msg.id]),
        Script::Reject(vec![msg.id]),
    ]));
    let job = job(&publisher)
        .with_reader(store.clone())
        .with_max_attempts(max_attempts);
    let shutdown = ShutdownSignal::new();

    for _ in 0..max_attempts {
        job.execute(&shutdown).await;
    }

    let stored = store.get(msg.id).unwrap();
    assert_eq!(stored.status, OutboxStatus::Published);
    assert_eq!(stored.attempt_count, max_attempts);
}

#[tokio::test]
async fn should_quarantine_after_max_attempts() {
    let max_attempts = 3;
    let poison = message_at("prescriptions", 1);
    let store = store_with("prescriptions", &[poison.clone()]);
    let rejects = vec![Script::Reject(vec![poison.id]); max_attempts as usize];
    let publisher = Arc::new(ScriptedPublisher::new(rejects));
    let job = job(&publisher)
        .with_reader(store.clone())
        .with_max_attempts(max_attempts);
    let shutdown = ShutdownSignal::new();

    let mut quarantined = Vec::new();
    for _ in 0..max_attempts {
        let report = job.execute(&shutdown).await;
        quarantined.extend(report.module("prescriptions").unwrap().quarantined.clone());
    }

    assert_eq!(quarantined, vec![poison.id]);
    let stored = store.get(poison.id).unwrap();
    assert_eq!(stored.status, OutboxStatus::Failed);
    assert_eq!(stored.attempt_count, max_attempts);
    assert_eq!(stored.last_error.as_deref(), Some("malformed payload"));
    assert!(stored.failed_at.is_some());

    // Never handed to the broker again.
    job.execute(&shutdown).await;
    assert_eq!(publisher.times_sent(poison.id), max_attempts as usize);
}

#[tokio::test]
async fn should_not_let_poison_message_block_the_rest() {
    let poison = message_at("patients", 1);
    let healthy = message_at("patients", 2);
    let store = store_with("patients", &[poison.clone(), healthy.clone()]);
    let publisher = Arc::new(ScriptedPublisher::new(vec![Script::Reject(vec![poison.id])]));
    let job = job(&publisher).with_reader(store.clone());

    let report = job.execute(&ShutdownSignal::new()).await;

    let patients = report.module("patients").unwrap();
    assert!(patients.is_ok());
    assert_eq!(patients.published, 1);
    assert_eq!(patients.retried, 1);
    assert_eq!(store.get(healthy.id).unwrap().status, OutboxStatus::Published);
    let poison_row = store.get(poison.id).unwrap();
    assert_eq!(poison_row.status, OutboxStatus::Pending);
    assert_eq!(poison_row.attempt_count, 1);
}

#[tokio::test]
async fn should_count_missing_verdict_as_failed_attempt() {
    let lost = message_at("patients", 1);
    let store = store_with("patients", &[lost.clone()]);
    let publisher = Arc::new(ScriptedPublisher::new(vec![Script::Omit(vec![lost.id])]));
    let job = job(&publisher).with_reader(store.clone());

    job.execute(&ShutdownSignal::new()).await;

    let stored = store.get(lost.id).unwrap();
    assert_eq!(stored.status, OutboxStatus::Pending);
    assert_eq!(stored.attempt_count, 1);
    assert!(stored.last_error.is_some());
}

// ── At-least-once ────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_redeliver_when_mark_processed_is_lost() {
    let msg = message_at("appointments", 1);
    let store = store_with("appointments", &[msg.clone()]);
    let reader = Arc::new(CrashOnMarkReader::new(store.clone()));
    let publisher = Arc::new(ScriptedPublisher::ack_all());
    let job = job(&publisher).with_reader(reader);
    let shutdown = ShutdownSignal::new();

    let first = job.execute(&shutdown).await;
    let appointments = first.module("appointments").unwrap();
    assert_eq!(
        appointments.failure.as_ref().map(|f| f.stage()),
        Some("mark_processed")
    );
    assert_eq!(appointments.published, 0);
    assert_eq!(store.get(msg.id).unwrap().status, OutboxStatus::Pending);

    job.execute(&shutdown).await;

    assert_eq!(publisher.times_sent(msg.id), 2);
    assert_eq!(store.get(msg.id).unwrap().status, OutboxStatus::Published);
}

#[tokio::test]
async fn should_never_mark_unacknowledged_messages() {
    let msgs: Vec<_> = (1..=4).map(|s| message_at("patients", s)).collect();
    let store = store_with("patients", &msgs);
    let publisher = Arc::new(ScriptedPublisher::new(vec![Script::Unavailable]));
    let job = job(&publisher).with_reader(store.clone());

    job.execute(&ShutdownSignal::new()).await;

    assert!(store.snapshot().iter().all(|m| m.status == OutboxStatus::Pending));
    assert!(store.snapshot().iter().all(|m| m.published_at.is_none()));
}

// ── Isolation between modules ────────────────────────────────────────────────

#[tokio::test]
async fn should_isolate_failing_module() {
    let appointment = message_at("appointments", 1);
    let appointments = store_with("appointments", &[appointment.clone()]);
    let publisher = Arc::new(ScriptedPublisher::ack_all());
    let job = job(&publisher)
        .with_reader(Arc::new(FailingReader::new("patients")))
        .with_reader(appointments.clone());

    let report = job.execute(&ShutdownSignal::new()).await;

    let patients = report.module("patients").unwrap();
    assert_eq!(patients.failure.as_ref().map(|f| f.stage()), Some("fetch"));
    assert_eq!(report.module("appointments").unwrap().published, 1);
    assert_eq!(
        appointments.get(appointment.id).unwrap().status,
        OutboxStatus::Published
    );
    let failed: Vec<&str> = report.failed_modules().map(|m| m.module.as_str()).collect();
    assert_eq!(failed, ["patients"]);
}

#[tokio::test]
async fn should_continue_to_next_module_when_broker_drops_one_batch() {
    let p = message_at("patients", 1);
    let a = message_at("appointments", 1);
    let patients = store_with("patients", &[p.clone()]);
    let appointments = store_with("appointments", &[a.clone()]);
    let publisher = Arc::new(ScriptedPublisher::new(vec![Script::Unavailable]));
    let job = job(&publisher)
        .with_reader(patients.clone())
        .with_reader(appointments.clone());

    let report = job.execute(&ShutdownSignal::new()).await;

    assert_eq!(report.modules.len(), 2);
    assert_eq!(patients.get(p.id).unwrap().attempt_count, 1);
    assert_eq!(
        appointments.get(a.id).unwrap().status,
        OutboxStatus::Published
    );
}

#[tokio::test]
async fn should_only_touch_own_module_rows() {
    let mine = message_at("patients", 1);
    let store = store_with("patients", &[mine.clone()]);
    let publisher = Arc::new(ScriptedPublisher::ack_all());
    let job = job(&publisher).with_reader(store.clone());

    let report = job.execute(&ShutdownSignal::new()).await;

    let modules: Vec<&str> = job.modules().collect();
    assert_eq!(modules, ["patients"]);
    assert_eq!(report.modules.len(), 1);
    assert_eq!(store.source_module(), "patients");
}

// ── Liveness ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_leave_no_message_pending_forever() {
    let max_attempts = 2;
    let msgs: Vec<_> = (1..=5).map(|s| message_at("patients", s)).collect();
    let store = store_with("patients", &msgs);
    let rejected: Vec<MessageId> = vec![msgs[1].id, msgs[3].id];
    let publisher = Arc::new(ScriptedPublisher::new(vec![
        Script::Unavailable,
        Script::Reject(rejected.clone()),
        Script::Reject(rejected.clone()),
        Script::Reject(rejected.clone()),
    ]));
    let job = job(&publisher)
        .with_reader(store.clone())
        .with_max_attempts(max_attempts)
        .with_max_batch_size(2);
    let shutdown = ShutdownSignal::new();

    for _ in 0..10 {
        job.execute(&shutdown).await;
    }

    assert!(store.snapshot().iter().all(|m| !m.is_pending()));
    for id in &rejected {
        assert_eq!(store.get(*id).unwrap().status, OutboxStatus::Failed);
    }
}

// ── Shutdown ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn should_defer_all_modules_when_shutdown_already_requested() {
    let msg = message_at("patients", 1);
    let store = store_with("patients", &[msg.clone()]);
    let publisher = Arc::new(ScriptedPublisher::ack_all());
    let job = job(&publisher)
        .with_reader(store.clone())
        .with_reader(store_with("appointments", &[]));
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();

    let report = job.execute(&shutdown).await;

    assert!(report.was_interrupted());
    assert_eq!(report.deferred, ["patients", "appointments"]);
    assert!(report.modules.is_empty());
    assert_eq!(store.get(msg.id).unwrap().status, OutboxStatus::Pending);
}

#[test]
fn should_clamp_limits_to_at_least_one() {
    let publisher = Arc::new(ScriptedPublisher::ack_all());
    let job = job(&publisher).with_max_batch_size(0).with_max_attempts(0);

    assert_eq!(job.max_batch_size(), 1);
    assert_eq!(job.max_attempts(), 1);
}
