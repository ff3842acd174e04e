//! Tracing/logging setup shared by the platform binaries.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use crate::tracing::{TracingOptions, init};
