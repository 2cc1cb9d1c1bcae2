//! Shared foundation for the codex gateway
//!
//! Cross-cutting services used by every other crate: the error taxonomy,
//! secret redaction for log output, the process-wide correlation ID slot,
//! the wall-clock abstraction, and the `Secret` wrapper for token material
//! held in memory.

pub mod clock;
pub mod correlation;
pub mod error;
pub mod logging;
pub mod redact;
pub mod secret;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, system_clock};
pub use correlation::{
    clear_correlation_id, current_correlation_id, new_correlation_id, set_correlation_id,
};
pub use error::{
    AuthRateLimitError, CircuitOpenError, Error, Result, StorageCode, StorageError,
};
pub use secret::Secret;
