//! Value types returned across the pipeline boundary: validation outcomes,
//! execution results, and the per-call metrics record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single `{path, message}` validation failure, dotted-path with
/// bracketed array indices (e.g. `items[2].email`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Outcome of `descriptor.validate(args)` or the security scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationError>>,
}

impl ValidationResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            errors: None,
        }
    }

    pub fn fail(errors: Vec<ValidationError>) -> Self {
        Self {
            success: false,
            data: None,
            errors: Some(errors),
        }
    }
}

/// What a tool body reports back to the pipeline: the raw success/failure
/// the tool itself observed, before the pipeline wraps it into an
/// `ExecutionResult` with timing and cache metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl ToolOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            cost: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Metadata attached to every `ExecutionResult`, win or lose.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionMetadata {
    pub execution_time_ms: u64,
    pub cache_hit: bool,
    pub api_calls_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// The structured envelope every `Executor::execute` call returns. Never
/// throws past this boundary: failures are `success: false` plus a
/// machine-readable `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    pub metadata: ExecutionMetadata,
}

/// The machine-readable error shape carried in a failed `ExecutionResult`.
/// No stack traces, just a kind tag plus whatever structured detail the
/// kind supports (validation/security errors carry `errors`; breaker/rate
/// limit failures carry `retry_after_ms`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<ValidationError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.success
    }
}

/// One record per call, fed to the metrics sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub tool_id: String,
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub cache_hit: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub api_calls_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_estimate: Option<f64>,
}
