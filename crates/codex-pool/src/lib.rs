//! Account selection and failure isolation
//!
//! In-memory trackers keyed by (account index, quota key), the circuit
//! breaker registry, the hybrid selection engine, and the parallel prober.
//! Trackers are pure state machines: they never raise and never suspend,
//! and they carry no internal synchronization; the owner serializes
//! access. Time enters only through the injected clock.
//!
//! Request lifecycle:
//! 1. Selection pulls a pool snapshot, filters rate-limited and cooling
//!    accounts, and ranks the rest by hybrid score
//! 2. The prober races the top candidates; first success wins and the
//!    losers are cancelled
//! 3. The caller reports the outcome back into the health tracker, token
//!    bucket, backoff tracker, and circuit breaker

pub mod backoff;
pub mod breaker;
pub mod bucket;
pub mod health;
pub mod probe;
pub mod select;

pub use backoff::{
    BackoffConfig, BackoffDecision, RateLimitBackoff, RateLimitReason, parse_rate_limit_reason,
};
pub use breaker::{BreakerConfig, BreakerRegistry, BreakerState, CircuitBreaker};
pub use bucket::{BucketConfig, TokenBucketTracker};
pub use health::{HealthConfig, HealthTracker};
pub use probe::{ProbeCandidate, ProbeWinner, race};
pub use select::{Selection, SelectionEngine, SelectionWeights};
