//! # toolmesh — a request-scoped tool-dispatch runtime
//!
//! `toolmesh` mediates between untrusted callers and a set of registered
//! "tools": side-effecting operations declared with an input schema,
//! concurrency profile, rate-limit budget, cache policy, and lifecycle
//! hooks. Given `(tool_id, args, caller_context)` the [`Executor`] runs a
//! deterministic pipeline — hook, validate, security-scan, breaker-gate,
//! rate-limit, cache, execute, cache-put, metrics, after-hook — and returns
//! a structured [`ExecutionResult`] that never panics or throws past the
//! call boundary.
//!
//! ## Components
//!
//! - [`registry::ToolRegistry`] — a versioned, hot-reloadable catalog of
//!   [`descriptor::ToolDescriptor`]s with category/capability/tag indices.
//! - [`executor::Executor`] — the per-call pipeline plus batched concurrent
//!   dispatch.
//! - [`breaker::CircuitBreakerRegistry`] — per-tool CLOSED/OPEN/HALF_OPEN
//!   state with windowed failure counting.
//! - [`cache::Cache`] — a bounded in-memory LRU tier plus an optional remote
//!   key/value tier, TTL, and pattern invalidation.
//! - [`rate_limiter::RateLimiter`] — per-(subject, tool) fixed-window
//!   admission.
//! - [`validator::Validator`] / [`security`] — JSON-schema validation and
//!   injection/XSS/traversal scanning.
//! - [`metrics::MetricsSink`] — append-and-aggregate per-call records.
//!
//! Transports, concrete tool bodies, persistent stores, and auth are
//! external collaborators the runtime consumes through [`descriptor::ToolHandler`]
//! and [`executor::CallerContext`] — this crate does not implement them.
//!
//! ## Quickstart
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use toolmesh::{clock, breaker::{BreakerConfig, CircuitBreakerRegistry}, cache::Cache,
//!     executor::Executor, metrics::MetricsSink, rate_limiter::RateLimiter, registry::ToolRegistry};
//!
//! let clock = clock::system_clock();
//! let executor = Executor::new(
//!     ToolRegistry::new(),
//!     CircuitBreakerRegistry::new(BreakerConfig::default(), Arc::clone(&clock)),
//!     RateLimiter::new(Arc::clone(&clock)),
//!     Cache::new(10_000, Arc::clone(&clock)),
//!     MetricsSink::new(30),
//!     clock,
//!     std::time::Duration::from_secs(300),
//! );
//! ```

pub mod breaker;
pub mod builder;
pub mod cache;
pub mod clock;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod metrics;
pub mod plugin;
pub mod rate_limiter;
pub mod registry;
pub mod result;
pub mod security;
pub mod validator;

pub use breaker::{BreakerConfig, CircuitBreakerRegistry, CircuitState};
pub use builder::ExecutionResultBuilder;
pub use cache::Cache;
pub use clock::{Clock, SharedClock};
pub use config::RuntimeConfig;
pub use descriptor::{Category, ToolDescriptor, ToolHandler};
pub use error::{DispatchError, RegistryError};
pub use executor::{BatchRequest, CallerContext, ExecuteOptions, Executor};
pub use metrics::MetricsSink;
pub use plugin::Plugin;
pub use rate_limiter::RateLimiter;
pub use registry::ToolRegistry;
pub use result::{ExecutionResult, ToolMetrics, ToolOutcome, ValidationResult};
pub use validator::Validator;
