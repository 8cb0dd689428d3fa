//! Crate-wide error taxonomy for the dispatch pipeline.
//!
//! Mirrors the kinds in the error-handling design: every variant here maps to
//! exactly one row of the executor's error table and carries the wall-clock
//! spent before the failure was observed.

use std::time::Duration;
use thiserror::Error;

use crate::result::ValidationError;

/// The canonical error surfaced by a single `Executor::execute` call.
///
/// Every variant here corresponds to a row in the executor's error table.
/// `execution_time_ms` is attached by the caller when building the
/// `ExecutionResult`, not carried on the error itself, since the clock lives
/// with the executor and not with whichever step raised the failure.
#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    #[error("schema validation failed")]
    InvalidInput { errors: Vec<ValidationError> },

    #[error("security scan rejected the request")]
    SecurityRejected { errors: Vec<ValidationError> },

    #[error("circuit open for {key}, retry after {retry_after:?}")]
    CircuitOpen { key: String, retry_after: Duration },

    #[error("rate limit exceeded for {key}, retry after {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    #[error("tool reported failure: {message}")]
    ToolError { message: String },

    #[error("internal error: {message}")]
    InternalError { message: String },

    #[error("call exceeded its deadline")]
    Timeout,

    #[error("no tool registered with id '{0}'")]
    UnknownTool(String),
}

impl DispatchError {
    /// The HTTP-style status an API wrapper should report for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput { .. } => 400,
            Self::SecurityRejected { .. } => 409,
            Self::CircuitOpen { .. } => 503,
            Self::RateLimited { .. } => 429,
            Self::ToolError { .. } => 500,
            Self::InternalError { .. } => 500,
            Self::Timeout => 504,
            Self::UnknownTool(_) => 404,
        }
    }

    /// Short machine-readable tag used in metrics records and logs. Never
    /// carries any of the offending argument data.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "InvalidInput",
            Self::SecurityRejected { .. } => "SecurityRejected",
            Self::CircuitOpen { .. } => "CircuitOpen",
            Self::RateLimited { .. } => "RateLimited",
            Self::ToolError { .. } => "ToolError",
            Self::InternalError { .. } => "InternalError",
            Self::Timeout => "Timeout",
            Self::UnknownTool(_) => "UnknownTool",
        }
    }

    /// Whether recording this outcome should count as a breaker failure.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            Self::ToolError { .. } | Self::InternalError { .. } | Self::Timeout
        )
    }
}

/// Registry- and plugin-level failures: setup/config concerns rather than
/// per-call outcomes, so they are a separate, smaller enum surfaced by
/// `ToolRegistry` rather than by the executor.
#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    AlreadyExists(String),

    #[error("registry is at capacity ({0})")]
    RegistryFull(usize),

    #[error("descriptor '{id}' is invalid: {reason}")]
    InvalidDescriptor { id: String, reason: String },

    #[error("no tool registered with id '{0}'")]
    UnknownTool(String),

    #[error("plugin '{0}' is already loaded")]
    PluginExists(String),

    #[error("plugin '{plugin}' declares missing dependency '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },

    #[error("no plugin registered with id '{0}'")]
    UnknownPlugin(String),
}
