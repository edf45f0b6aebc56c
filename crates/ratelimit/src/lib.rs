//! Abuse control for the Vetline API.
//!
//! Fixed-window counters per client key and named policy, stored either in
//! process memory or in Redis so several instances share the same limits.

pub mod backend;
pub mod limiter;
pub mod policy;

pub use backend::{BackendError, MemoryBackend, RateLimitBackend, RedisBackend, WindowState};
pub use limiter::{Admission, RateLimiter};
pub use policy::{Policies, Policy, PolicyName};
