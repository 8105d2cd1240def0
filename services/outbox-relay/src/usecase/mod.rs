pub mod publish_outbox;
