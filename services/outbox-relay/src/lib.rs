//! Outbox relay: drains every module's `outbox_messages` table on a fixed
//! schedule and publishes the events to the broker, at least once and in
//! `occurred_at` order per module.

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod scheduler;
pub mod usecase;
