//! Property tests for the pipeline's core invariants (P1, P3, P6, P7 from
//! the dispatch runtime's test plan).

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};

use toolmesh::breaker::{BreakerConfig, CircuitBreakerRegistry};
use toolmesh::cache::Cache;
use toolmesh::clock::ManualClock;
use toolmesh::descriptor::{Capabilities, Category, ToolDescriptor, ToolHandler};
use toolmesh::executor::{BatchRequest, CallerContext, ExecuteOptions, Executor};
use toolmesh::metrics::MetricsSink;
use toolmesh::rate_limiter::RateLimiter;
use toolmesh::registry::ToolRegistry;
use toolmesh::result::{ToolOutcome, ValidationResult};

struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    fn validate(&self, _args: &Value) -> ValidationResult {
        ValidationResult::ok(json!({}))
    }

    async fn execute(&self, args: &Value, _config: &Value) -> ToolOutcome {
        ToolOutcome::success(args.clone())
    }
}

fn descriptor(id: &str) -> ToolDescriptor {
    ToolDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        version: "1.0.0".to_string(),
        category: Category::Development,
        description: "echo".to_string(),
        tags: BTreeSet::new(),
        input_schema: json!({"type": "object"}),
        capabilities: Capabilities::default(),
        rate_limit: None,
        cache_policy: None,
        required_config: BTreeSet::new(),
        optional_config: BTreeSet::new(),
        handler: Arc::new(Echo),
    }
}

proptest! {
    /// P1 — Registry exclusivity: a second `register` with the same id
    /// always fails; after `unregister`, a third always succeeds.
    #[test]
    fn registry_exclusivity(id in "[a-z]{3,12}") {
        let registry = ToolRegistry::new();
        registry.register(descriptor(&id)).unwrap();
        prop_assert!(registry.register(descriptor(&id)).is_err());
        registry.unregister(&id);
        prop_assert!(registry.register(descriptor(&id)).is_ok());
    }

    /// P3 — Breaker threshold: the k-th `record_failure` (k = threshold)
    /// transitions to OPEN, and the next `allow_request` before
    /// `reset_timeout` returns false.
    #[test]
    fn breaker_threshold(extra_failures in 0u32..4) {
        let clock = ManualClock::new();
        let registry = CircuitBreakerRegistry::new(BreakerConfig::default(), Arc::new(clock.clone()));
        for _ in 0..4 {
            registry.record_failure("k");
            prop_assert!(registry.allow_request("k"));
        }
        registry.record_failure("k");
        prop_assert!(!registry.allow_request("k"));
        // Further failures while open don't re-admit early.
        for _ in 0..extra_failures {
            registry.record_failure("k");
        }
        prop_assert!(!registry.allow_request("k"));
    }

    /// P6 — LRU bound: after any sequence of `set`s on a cache of cap C,
    /// `stats().memory_size` never exceeds C.
    #[test]
    fn cache_lru_bound(keys in prop::collection::vec("[a-z]{1,6}", 0..50)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let clock = ManualClock::new();
            let cache = Cache::new(5, Arc::new(clock));
            for key in &keys {
                cache.set(key, json!(1), Duration::from_secs(60)).await;
            }
            prop_assert!(cache.stats().memory_size <= 5);
            Ok(())
        })?;
    }

    /// P7 — Batch order preservation: `execute_batch(requests)[i]`
    /// corresponds to `requests[i]` regardless of completion order.
    #[test]
    fn batch_preserves_order(values in prop::collection::vec(0i64..1000, 1..20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let clock = ManualClock::new();
            let executor = Executor::new(
                ToolRegistry::new(),
                CircuitBreakerRegistry::new(BreakerConfig::default(), Arc::new(clock.clone())),
                RateLimiter::new(Arc::new(clock.clone())),
                Cache::new(1000, Arc::new(clock.clone())),
                MetricsSink::new(30),
                Arc::new(clock),
                Duration::from_secs(300),
            );
            executor.registry().register(descriptor("echo")).unwrap();

            let requests: Vec<BatchRequest> = values
                .iter()
                .map(|v| BatchRequest {
                    tool_id: "echo".to_string(),
                    args: json!({"v": v}),
                    config: json!({}),
                    caller: CallerContext::default(),
                    options: ExecuteOptions::default(),
                })
                .collect();

            let results = executor.execute_batch(requests, 4).await;
            for (expected, result) in values.iter().zip(results.iter()) {
                prop_assert_eq!(result.data.as_ref().unwrap()["v"].as_i64().unwrap(), *expected);
            }
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn concurrency_cap_is_never_exceeded() {
    let clock = ManualClock::new();
    let executor = Executor::new(
        ToolRegistry::new(),
        CircuitBreakerRegistry::new(BreakerConfig::default(), Arc::new(clock.clone())),
        RateLimiter::new(Arc::new(clock.clone())),
        Cache::new(1000, Arc::new(clock.clone())),
        MetricsSink::new(30),
        Arc::new(clock),
        Duration::from_secs(300),
    );

    struct Tracking {
        inflight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ToolHandler for Tracking {
        fn validate(&self, _args: &Value) -> ValidationResult {
            ValidationResult::ok(json!({}))
        }

        async fn execute(&self, _args: &Value, _config: &Value) -> ToolOutcome {
            let current = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            ToolOutcome::success(json!({}))
        }
    }

    let inflight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut desc = descriptor("slow");
    desc.handler = Arc::new(Tracking {
        inflight: Arc::clone(&inflight),
        peak: Arc::clone(&peak),
    });
    executor.registry().register(desc).unwrap();

    let requests: Vec<BatchRequest> = (0..10)
        .map(|_| BatchRequest {
            tool_id: "slow".to_string(),
            args: json!({}),
            config: json!({}),
            caller: CallerContext::default(),
            options: ExecuteOptions::default(),
        })
        .collect();

    let results = executor.execute_batch(requests, 2).await;
    assert!(results.iter().all(|r| r.success));
    assert!(peak.load(Ordering::SeqCst) <= 2);
}
