//! Process-level plumbing shared by every Clinic binary.
//!
//! - [`tracing`]: structured JSON logging setup
//! - [`shutdown`]: cooperative shutdown signal
//! - [`serde`]: wire-format helpers

pub mod serde;
pub mod shutdown;
pub mod tracing;
