//! Vulcan Sync - Rate-limited, retrying synchronization of remote resources.
//!
//! The pieces compose outside-in: a [`BatchRunner`] plans and walks a batch,
//! the [`SyncEngine`] reconciles each resource, and every remote call passes
//! through the shared [`RateLimiter`] and the [`RetryPolicy`].

pub mod engine;
pub mod limiter;
pub mod retry;
pub mod runner;

pub use engine::SyncEngine;
pub use limiter::{LimiterConfig, RateLimiter, UsageStats};
pub use retry::RetryPolicy;
pub use runner::BatchRunner;
