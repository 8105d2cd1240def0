//! sea-orm entities for the outbox table every Clinic module database carries.

pub mod outbox_messages;
