//! The execution pipeline: hook → validate → security scan → breaker gate →
//! rate-limit → cache → run → cache-put → metrics → after-hook, plus the
//! batched concurrent dispatch entrypoint.
//!
//! Grounded on the teacher's `tools/async_pipeline.rs` for the batch half
//! (a `tokio::sync::Semaphore` bounding in-flight concurrency, spawned tasks
//! collected back in submission order) and on `circuit_breaker.rs`'s
//! span-per-transition logging density for the single-call half.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::breaker::CircuitBreakerRegistry;
use crate::builder::ExecutionResultBuilder;
use crate::cache::Cache;
use crate::descriptor::ToolDescriptor;
use crate::error::DispatchError;
use crate::metrics::MetricsSink;
use crate::rate_limiter::{RateLimitWindow, RateLimiter};
use crate::registry::ToolRegistry;
use crate::result::{ExecutionResult, ToolMetrics};
use crate::security::{redact_secrets, security_validate};
use crate::clock::SharedClock;

/// Per-call overrides (spec.md §4.2's `options`).
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub skip_cache: bool,
    pub cache_key_override: Option<String>,
    pub skip_rate_limit: bool,
    pub skip_security: bool,
    /// Caller-scoped deadline; defaults to the executor's hard timeout when
    /// absent. Never raises it past the hard cap.
    pub deadline: Option<Duration>,
}

/// The caller context a transport resolves before calling `dispatch`
/// (spec.md §6). The pipeline itself only consumes `subject_id`; the rest
/// travels with the call for tools/transports that want to read it back out
/// of `config`.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub subject_id: Option<String>,
    pub subject_tier: Option<String>,
    pub declared_rate_limit: Option<u32>,
    pub permissions: Vec<String>,
}

impl CallerContext {
    fn subject_key(&self) -> String {
        self.subject_id.clone().unwrap_or_else(|| "anonymous".to_string())
    }
}

/// One entry of a batch dispatch call.
pub struct BatchRequest {
    pub tool_id: String,
    pub args: Value,
    pub config: Value,
    pub caller: CallerContext,
    pub options: ExecuteOptions,
}

struct Inner {
    registry: ToolRegistry,
    breakers: CircuitBreakerRegistry,
    rate_limiter: RateLimiter,
    cache: Cache,
    metrics: MetricsSink,
    clock: SharedClock,
    hard_timeout: Duration,
}

/// Orchestrates the pipeline; single-call and batched entry points.
/// Cheap to clone — every field is already reference-counted internally or
/// held behind the single shared `Arc<Inner>`.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    pub fn new(
        registry: ToolRegistry,
        breakers: CircuitBreakerRegistry,
        rate_limiter: RateLimiter,
        cache: Cache,
        metrics: MetricsSink,
        clock: SharedClock,
        hard_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                breakers,
                rate_limiter,
                cache,
                metrics,
                clock,
                hard_timeout,
            }),
        }
    }

    pub fn metrics(&self) -> &MetricsSink {
        &self.inner.metrics
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.inner.breakers
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// Transport-facing entrypoint: resolves `tool_id` against the registry,
    /// then runs the pipeline. Returns `UnknownTool` (404-equivalent) if the
    /// id isn't registered.
    pub async fn dispatch(
        &self,
        tool_id: &str,
        args: Value,
        config: Value,
        caller: CallerContext,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, DispatchError> {
        let descriptor = self
            .inner
            .registry
            .get(tool_id)
            .ok_or_else(|| DispatchError::UnknownTool(tool_id.to_string()))?;
        Ok(self.execute(&descriptor, args, config, &caller, options).await)
    }

    /// The per-call pipeline (spec.md §4.2 steps 1-12). Never returns an
    /// `Err` out of this boundary — every failure is folded into a failed
    /// `ExecutionResult`.
    pub async fn execute(
        &self,
        descriptor: &ToolDescriptor,
        args: Value,
        config: Value,
        caller: &CallerContext,
        options: ExecuteOptions,
    ) -> ExecutionResult {
        let start = self.inner.clock.now();
        let subject_key = caller.subject_key();

        // Step 1: before hook.
        let args = descriptor.handler.before(args);

        // Step 2: schema validation.
        let validation = descriptor.handler.validate(&args);
        if !validation.success {
            let errors = validation.errors.unwrap_or_default();
            return self.finish_failure(
                descriptor,
                &subject_key,
                start,
                false,
                ExecutionResultBuilder::validation_errors("InvalidInput", "schema validation failed", errors),
            );
        }

        // Step 3: security scan.
        if !options.skip_security {
            if let Err(errors) = security_validate(&args) {
                return self.finish_failure(
                    descriptor,
                    &subject_key,
                    start,
                    false,
                    ExecutionResultBuilder::validation_errors(
                        "SecurityRejected",
                        "security scan rejected the request",
                        errors,
                    ),
                );
            }
        }

        // Step 4: circuit-breaker admission.
        let breaker_key = descriptor.id.as_str();
        if !self.inner.breakers.allow_request(breaker_key) {
            let err = DispatchError::CircuitOpen {
                key: breaker_key.to_string(),
                retry_after: self
                    .inner
                    .breakers
                    .get_diagnostics(breaker_key)
                    .and_then(|d| d.remaining_backoff_ms)
                    .map(Duration::from_millis)
                    .unwrap_or_default(),
            };
            warn!(tool_id = %descriptor.id, "circuit open, admission denied");
            return self.finish_failure(descriptor, &subject_key, start, false, ExecutionResultBuilder::failure(&err));
        }

        // Step 5: rate limiting.
        if !options.skip_rate_limit {
            if let Some(spec) = &descriptor.rate_limit {
                let key = format!("subject:{}:tool:{}", subject_key, descriptor.id);
                let window = RateLimitWindow {
                    requests: spec.requests,
                    period: Duration::from_millis(spec.period_ms),
                };
                if let Err(retry_after) = self.inner.rate_limiter.check_and_increment(&key, window) {
                    let err = DispatchError::RateLimited {
                        key,
                        retry_after,
                    };
                    return self.finish_failure(
                        descriptor,
                        &subject_key,
                        start,
                        false,
                        ExecutionResultBuilder::failure(&err),
                    );
                }
            }
        }

        // Step 6: cache read.
        let cache_key = options
            .cache_key_override
            .clone()
            .or_else(|| {
                descriptor
                    .cache_policy
                    .as_ref()
                    .filter(|policy| policy.enabled)
                    .map(|policy| descriptor.handler.cache_key(&args, policy))
            });
        if !options.skip_cache {
            if let (Some(policy), Some(key)) = (&descriptor.cache_policy, &cache_key) {
                if policy.enabled {
                    if let Some(cached) = self.inner.cache.get_tiered(key, policy.tier).await {
                        let data = descriptor.handler.after(cached);
                        let elapsed = self.inner.clock.now().duration_since(start).as_millis() as u64;
                        self.emit_metrics(descriptor, &subject_key, elapsed, true, true, None, None);
                        return ExecutionResultBuilder::success(data)
                            .execution_time_ms(elapsed)
                            .cache_hit(true)
                            .api_calls_count(0)
                            .build();
                    }
                }
            }
        }

        // Step 7: run the tool, bounded by the caller deadline or the hard
        // cap, whichever is tighter.
        let deadline = options
            .deadline
            .map(|d| d.min(self.inner.hard_timeout))
            .unwrap_or(self.inner.hard_timeout);
        let outcome = tokio::time::timeout(deadline, descriptor.handler.execute(&args, &config)).await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(_) => {
                descriptor.handler.on_error("timeout", &args);
                self.inner.breakers.record_failure(breaker_key);
                warn!(tool_id = %descriptor.id, "call exceeded its deadline");
                return self.finish_failure(
                    descriptor,
                    &subject_key,
                    start,
                    false,
                    ExecutionResultBuilder::failure(&DispatchError::Timeout),
                );
            }
        };

        // Step 8: record breaker outcome.
        if outcome.success {
            self.inner.breakers.record_success(breaker_key);
        } else {
            self.inner.breakers.record_failure(breaker_key);
        }

        if !outcome.success {
            let message = outcome.error.unwrap_or_else(|| "tool reported failure".to_string());
            descriptor.handler.on_error(&message, &args);
            let err = DispatchError::ToolError {
                message: redact_secrets(&message),
            };
            return self.finish_failure(descriptor, &subject_key, start, false, ExecutionResultBuilder::failure(&err));
        }

        let data = outcome.data.unwrap_or(Value::Null);

        // Step 9: write-through cache on cacheable success.
        if let (Some(policy), Some(key)) = (&descriptor.cache_policy, &cache_key) {
            if policy.enabled {
                self.inner
                    .cache
                    .set_tiered(key, data.clone(), Duration::from_secs(policy.ttl_seconds), policy.tier)
                    .await;
            }
        }

        // Step 10/11: metrics, then after-hook.
        let elapsed = self.inner.clock.now().duration_since(start).as_millis() as u64;
        self.emit_metrics(descriptor, &subject_key, elapsed, false, true, None, outcome.cost);
        let data = descriptor.handler.after(data);

        ExecutionResultBuilder::success(data)
            .execution_time_ms(elapsed)
            .cache_hit(false)
            .api_calls_count(1)
            .cost(outcome.cost)
            .build()
    }

    /// Batched dispatch: preserves input order, never exceeds `concurrency`
    /// in-flight pipelines, a single entry's failure never cancels another.
    pub async fn execute_batch(&self, requests: Vec<BatchRequest>, concurrency: usize) -> Vec<ExecutionResult> {
        let batch_id = uuid::Uuid::new_v4().to_string();
        debug!(batch_id = %batch_id, requests = requests.len(), concurrency, "batch dispatch started");
        let permits = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
        let mut handles = Vec::with_capacity(requests.len());

        for request in requests {
            let executor = self.clone();
            let permits = Arc::clone(&permits);
            handles.push(tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Self::unknown_tool_result(&request.tool_id),
                };
                match executor.inner.registry.get(&request.tool_id) {
                    Some(descriptor) => {
                        executor
                            .execute(&descriptor, request.args, request.config, &request.caller, request.options)
                            .await
                    }
                    None => Self::unknown_tool_result(&request.tool_id),
                }
            }));
        }

        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle.await.unwrap_or_else(|join_err| {
                ExecutionResultBuilder::failure(&DispatchError::InternalError {
                    message: format!("batch task panicked: {join_err}"),
                })
                .build()
            });
            results.push(result);
        }
        results
    }

    fn unknown_tool_result(tool_id: &str) -> ExecutionResult {
        ExecutionResultBuilder::failure(&DispatchError::UnknownTool(tool_id.to_string())).build()
    }

    fn finish_failure(
        &self,
        descriptor: &ToolDescriptor,
        subject_key: &str,
        start: std::time::Instant,
        cache_hit: bool,
        builder: ExecutionResultBuilder,
    ) -> ExecutionResult {
        let elapsed = self.inner.clock.now().duration_since(start).as_millis() as u64;
        let result = builder.execution_time_ms(elapsed).cache_hit(cache_hit).build();
        let error_kind = result.error.as_ref().map(|e| e.kind.clone());
        self.emit_metrics(descriptor, subject_key, elapsed, cache_hit, false, error_kind, None);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_metrics(
        &self,
        descriptor: &ToolDescriptor,
        subject_key: &str,
        execution_time_ms: u64,
        cache_hit: bool,
        success: bool,
        error_kind: Option<String>,
        cost: Option<f64>,
    ) {
        let record = ToolMetrics {
            tool_id: descriptor.id.clone(),
            subject_id: subject_key.to_string(),
            timestamp: chrono::Utc::now(),
            execution_time_ms,
            cache_hit,
            success,
            error_kind,
            api_calls_count: if cache_hit { 0 } else { 1 },
            cost_estimate: cost,
        };
        debug!(tool_id = %descriptor.id, success, cache_hit, "call completed");
        self.inner.metrics.track(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::clock::ManualClock;
    use crate::descriptor::{CachePolicy, CacheTier, Capabilities, Category, ToolDescriptor, ToolHandler};
    use crate::result::{ToolOutcome, ValidationResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl ToolHandler for CountingHandler {
        fn validate(&self, args: &Value) -> ValidationResult {
            match args.get("v").and_then(Value::as_str) {
                Some(v) if !v.is_empty() => ValidationResult::ok(args.clone()),
                _ => ValidationResult::fail(vec![crate::result::ValidationError::new("v", "must not be empty")]),
            }
        }

        async fn execute(&self, args: &Value, _config: &Value) -> ToolOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                ToolOutcome::failure("boom")
            } else {
                ToolOutcome::success(args.clone())
            }
        }
    }

    fn descriptor(id: &str, calls: Arc<AtomicUsize>, fail: bool, cache: Option<CachePolicy>) -> ToolDescriptor {
        ToolDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            category: Category::Development,
            description: "test tool".to_string(),
            tags: BTreeSet::new(),
            input_schema: json!({"type": "object"}),
            capabilities: Capabilities::default(),
            rate_limit: None,
            cache_policy: cache,
            required_config: BTreeSet::new(),
            optional_config: BTreeSet::new(),
            handler: Arc::new(CountingHandler { calls, fail }),
        }
    }

    fn executor_with_clock() -> (Executor, ManualClock) {
        let clock = ManualClock::new();
        let shared: SharedClock = Arc::new(clock.clone());
        let executor = Executor::new(
            ToolRegistry::new(),
            CircuitBreakerRegistry::new(BreakerConfig::default(), Arc::clone(&shared)),
            RateLimiter::new(Arc::clone(&shared)),
            Cache::new(100, Arc::clone(&shared)),
            MetricsSink::new(30),
            shared,
            Duration::from_secs(300),
        );
        (executor, clock)
    }

    #[tokio::test]
    async fn cached_read_avoids_second_tool_call() {
        let (executor, _clock) = executor_with_clock();
        let calls = Arc::new(AtomicUsize::new(0));
        let cache_policy = CachePolicy {
            enabled: true,
            ttl_seconds: 60,
            tier: CacheTier::Memory,
        };
        let desc = descriptor("t1", Arc::clone(&calls), false, Some(cache_policy));
        let caller = CallerContext::default();

        let first = executor
            .execute(&desc, json!({"v": "ok"}), json!({}), &caller, ExecuteOptions::default())
            .await;
        assert!(first.success);
        assert!(!first.metadata.cache_hit);

        let second = executor
            .execute(&desc, json!({"v": "ok"}), json!({}), &caller, ExecuteOptions::default())
            .await;
        assert!(second.success);
        assert!(second.metadata.cache_hit);
        assert_eq!(second.metadata.api_calls_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn breaker_opens_after_five_failures_then_recovers() {
        let (executor, clock) = executor_with_clock();
        let calls = Arc::new(AtomicUsize::new(0));
        let desc = descriptor("t1", Arc::clone(&calls), true, None);
        let caller = CallerContext::default();

        for _ in 0..5 {
            let result = executor
                .execute(&desc, json!({"v": "ok"}), json!({}), &caller, ExecuteOptions::default())
                .await;
            assert!(!result.success);
            assert_eq!(result.error.unwrap().kind, "ToolError");
        }

        let sixth = executor
            .execute(&desc, json!({"v": "ok"}), json!({}), &caller, ExecuteOptions::default())
            .await;
        assert_eq!(sixth.error.unwrap().kind, "CircuitOpen");
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        clock.advance(Duration::from_millis(30_001));
        let desc_recovered = descriptor("t1", Arc::clone(&calls), false, None);
        let recovered = executor
            .execute(&desc_recovered, json!({"v": "ok"}), json!({}), &caller, ExecuteOptions::default())
            .await;
        assert!(recovered.success);
    }

    #[tokio::test]
    async fn security_rejection_blocks_unless_skipped() {
        let (executor, _clock) = executor_with_clock();
        let calls = Arc::new(AtomicUsize::new(0));
        let desc = descriptor("t1", Arc::clone(&calls), false, None);
        let caller = CallerContext::default();
        let malicious = json!({"v": "<script>alert(1)</script>"});

        let rejected = executor
            .execute(&desc, malicious.clone(), json!({}), &caller, ExecuteOptions::default())
            .await;
        assert_eq!(rejected.error.unwrap().kind, "SecurityRejected");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let allowed = executor
            .execute(
                &desc,
                malicious,
                json!({}),
                &caller,
                ExecuteOptions {
                    skip_security: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(allowed.success);
    }

    #[tokio::test]
    async fn batch_preserves_order_and_bounds_concurrency() {
        let (executor, _clock) = executor_with_clock();
        let calls = Arc::new(AtomicUsize::new(0));
        let desc = descriptor("t1", Arc::clone(&calls), false, None);
        executor.registry().register(desc).unwrap();

        let requests = vec![
            BatchRequest {
                tool_id: "t1".to_string(),
                args: json!({"v": "ok"}),
                config: json!({}),
                caller: CallerContext::default(),
                options: ExecuteOptions::default(),
            },
            BatchRequest {
                tool_id: "t1".to_string(),
                args: json!({"v": ""}),
                config: json!({}),
                caller: CallerContext::default(),
                options: ExecuteOptions::default(),
            },
            BatchRequest {
                tool_id: "t1".to_string(),
                args: json!({"v": "ok"}),
                config: json!({}),
                caller: CallerContext::default(),
                options: ExecuteOptions::default(),
            },
        ];

        let results = executor.execute_batch(requests, 2).await;
        assert!(results[0].success);
        assert!(!results[1].success);
        assert_eq!(results[1].error.as_ref().unwrap().kind, "InvalidInput");
        assert!(results[2].success);
    }
}
