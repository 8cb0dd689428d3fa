//! Fluent construction of `ExecutionResult`, mirroring the tool-response
//! builder the pipeline's teacher crate uses: small setters, `build()` at
//! the end, no partially-built state leaks out.

use serde_json::Value;

use crate::error::DispatchError;
use crate::result::{ExecutionError, ExecutionMetadata, ExecutionResult, ValidationError};

pub struct ExecutionResultBuilder {
    success: bool,
    data: Option<Value>,
    error: Option<ExecutionError>,
    metadata: ExecutionMetadata,
}

impl ExecutionResultBuilder {
    pub fn success(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ExecutionMetadata::default(),
        }
    }

    pub fn failure(err: &DispatchError) -> Self {
        let (errors, retry_after_ms) = match err {
            DispatchError::InvalidInput { errors } | DispatchError::SecurityRejected { errors } => {
                (Some(errors.clone()), None)
            }
            DispatchError::CircuitOpen { retry_after, .. }
            | DispatchError::RateLimited { retry_after, .. } => {
                (None, Some(retry_after.as_millis() as u64))
            }
            _ => (None, None),
        };
        Self {
            success: false,
            data: None,
            error: Some(ExecutionError {
                kind: err.kind().to_string(),
                message: err.to_string(),
                errors,
                retry_after_ms,
            }),
            metadata: ExecutionMetadata::default(),
        }
    }

    pub fn validation_errors(kind: &'static str, message: impl Into<String>, errors: Vec<ValidationError>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ExecutionError {
                kind: kind.to_string(),
                message: message.into(),
                errors: Some(errors),
                retry_after_ms: None,
            }),
            metadata: ExecutionMetadata::default(),
        }
    }

    pub fn execution_time_ms(mut self, ms: u64) -> Self {
        self.metadata.execution_time_ms = ms;
        self
    }

    pub fn cache_hit(mut self, hit: bool) -> Self {
        self.metadata.cache_hit = hit;
        self
    }

    pub fn api_calls_count(mut self, count: u32) -> Self {
        self.metadata.api_calls_count = count;
        self
    }

    pub fn cost(mut self, cost: Option<f64>) -> Self {
        self.metadata.cost = cost;
        self
    }

    pub fn build(self) -> ExecutionResult {
        ExecutionResult {
            success: self.success,
            data: self.data,
            error: self.error,
            metadata: self.metadata,
        }
    }
}
