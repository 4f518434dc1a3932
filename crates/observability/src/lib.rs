//! Process-wide logging setup shared by the three service binaries.

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::{DEFAULT_FILTER, init, init_with};
