//! Domain types shared across all Clinic modules and the outbox relay.
//!
//! This crate contains only pure types with no framework dependencies.
//! Business modules use it to build outbox rows; the relay uses it to read them.

pub mod id;
pub mod outbox;
