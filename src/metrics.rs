//! Append-only metrics sink with in-memory per-tool and system rollups.
//!
//! Grounded on the teacher's `metrics/execution_metrics.rs`: a flat struct
//! of running totals plus a bounded `VecDeque` of recent records, updated by
//! a single `track`/`record_*` entrypoint. Generalized here from a single
//! global `ExecutionMetrics` to per-tool aggregates plus a system-wide
//! rollup, since spec.md §4.7 asks for both.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;

use crate::result::ToolMetrics;
use crate::security::redact_secrets;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolAggregate {
    pub total: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_execution_time_ms: u64,
    pub cache_hits: u64,
    pub last_used: Option<DateTime<Utc>>,
}

impl ToolAggregate {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total as f64
        }
    }

    pub fn avg_execution_time_ms(&self) -> u64 {
        if self.total == 0 {
            0
        } else {
            self.total_execution_time_ms / self.total
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemAggregate {
    pub total_executions: u64,
    pub distinct_subjects_24h: u64,
    pub distinct_tools: u64,
    pub avg_response_time_ms: u64,
    pub error_rate: f64,
    pub cache_hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolRanking {
    pub tool_id: String,
    pub total: u64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalysis {
    pub by_tool: HashMap<String, u64>,
    pub by_error_kind: HashMap<String, u64>,
    pub recent: Vec<ToolMetrics>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportPeriod {
    Day,
    Week,
    Month,
}

impl ReportPeriod {
    fn window(self) -> ChronoDuration {
        match self {
            ReportPeriod::Day => ChronoDuration::days(1),
            ReportPeriod::Week => ChronoDuration::days(7),
            ReportPeriod::Month => ChronoDuration::days(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub period: ReportPeriod,
    pub system: SystemAggregate,
    pub recommendations: Vec<String>,
}

const MAX_RECENT: usize = 500;

struct Inner {
    records: VecDeque<ToolMetrics>,
    per_tool: HashMap<String, ToolAggregate>,
    retention: ChronoDuration,
}

/// Process-wide metrics sink. One record per call, fed by the executor.
pub struct MetricsSink {
    inner: parking_lot::RwLock<Inner>,
}

impl MetricsSink {
    pub fn new(retention_days: u32) -> Self {
        Self {
            inner: parking_lot::RwLock::new(Inner {
                records: VecDeque::with_capacity(MAX_RECENT),
                per_tool: HashMap::new(),
                retention: ChronoDuration::days(retention_days as i64),
            }),
        }
    }

    /// Records one call. Redacts any secret-looking substring out of
    /// `error_kind` before it is retained, so a failing call whose args
    /// leaked into the error tag never persists a credential.
    pub fn track(&self, mut record: ToolMetrics) {
        if let Some(kind) = record.error_kind.take() {
            record.error_kind = Some(redact_secrets(&kind));
        }

        let mut guard = self.inner.write();
        let aggregate = guard.per_tool.entry(record.tool_id.clone()).or_default();
        aggregate.total += 1;
        if record.success {
            aggregate.success_count += 1;
        } else {
            aggregate.error_count += 1;
        }
        if record.cache_hit {
            aggregate.cache_hits += 1;
        }
        aggregate.total_execution_time_ms += record.execution_time_ms;
        aggregate.last_used = Some(record.timestamp);

        if guard.records.len() >= MAX_RECENT {
            guard.records.pop_front();
        }
        guard.records.push_back(record);
    }

    pub fn tool_aggregate(&self, tool_id: &str) -> Option<ToolAggregate> {
        self.inner.read().per_tool.get(tool_id).cloned()
    }

    pub fn system_aggregate(&self) -> SystemAggregate {
        let guard = self.inner.read();
        let total_executions: u64 = guard.per_tool.values().map(|a| a.total).sum();
        let errors: u64 = guard.per_tool.values().map(|a| a.error_count).sum();
        let cache_hits: u64 = guard.per_tool.values().map(|a| a.cache_hits).sum();
        let total_time: u64 = guard.per_tool.values().map(|a| a.total_execution_time_ms).sum();

        let now = Utc::now();
        let cutoff = now - ChronoDuration::hours(24);
        let distinct_subjects_24h = guard
            .records
            .iter()
            .filter(|r| r.timestamp >= cutoff)
            .map(|r| r.subject_id.as_str())
            .collect::<HashSet<_>>()
            .len() as u64;

        SystemAggregate {
            total_executions,
            distinct_subjects_24h,
            distinct_tools: guard.per_tool.len() as u64,
            avg_response_time_ms: if total_executions == 0 {
                0
            } else {
                total_time / total_executions
            },
            error_rate: if total_executions == 0 {
                0.0
            } else {
                errors as f64 / total_executions as f64
            },
            cache_hit_rate: if total_executions == 0 {
                0.0
            } else {
                cache_hits as f64 / total_executions as f64
            },
        }
    }

    pub fn top_tools(&self, n: usize) -> Vec<ToolRanking> {
        let guard = self.inner.read();
        let mut rankings: Vec<ToolRanking> = guard
            .per_tool
            .iter()
            .map(|(id, agg)| ToolRanking {
                tool_id: id.clone(),
                total: agg.total,
                success_rate: agg.success_rate(),
            })
            .collect();
        rankings.sort_by(|a, b| b.total.cmp(&a.total));
        rankings.truncate(n);
        rankings
    }

    pub fn error_analysis(&self) -> ErrorAnalysis {
        let guard = self.inner.read();
        let mut by_tool = HashMap::new();
        let mut by_error_kind = HashMap::new();
        let mut recent = Vec::new();
        for record in guard.records.iter().rev() {
            if record.success {
                continue;
            }
            *by_tool.entry(record.tool_id.clone()).or_insert(0u64) += 1;
            if let Some(kind) = &record.error_kind {
                *by_error_kind.entry(kind.clone()).or_insert(0u64) += 1;
            }
            if recent.len() < 50 {
                recent.push(record.clone());
            }
        }
        ErrorAnalysis {
            by_tool,
            by_error_kind,
            recent,
        }
    }

    /// Aggregates over `period`'s trailing window plus rule-based
    /// recommendations (e.g. error rate above 5% flags error-prone tools).
    pub fn report(&self, period: ReportPeriod) -> MetricsReport {
        let guard = self.inner.read();
        let cutoff = Utc::now() - period.window();
        let windowed: Vec<&ToolMetrics> = guard.records.iter().filter(|r| r.timestamp >= cutoff).collect();
        drop(guard);

        let total_executions = windowed.len() as u64;
        let errors = windowed.iter().filter(|r| !r.success).count() as u64;
        let cache_hits = windowed.iter().filter(|r| r.cache_hit).count() as u64;
        let total_time: u64 = windowed.iter().map(|r| r.execution_time_ms).sum();
        let distinct_tools: HashSet<&str> = windowed.iter().map(|r| r.tool_id.as_str()).collect();
        let distinct_subjects: HashSet<&str> = windowed.iter().map(|r| r.subject_id.as_str()).collect();

        let system = SystemAggregate {
            total_executions,
            distinct_subjects_24h: distinct_subjects.len() as u64,
            distinct_tools: distinct_tools.len() as u64,
            avg_response_time_ms: if total_executions == 0 {
                0
            } else {
                total_time / total_executions
            },
            error_rate: if total_executions == 0 {
                0.0
            } else {
                errors as f64 / total_executions as f64
            },
            cache_hit_rate: if total_executions == 0 {
                0.0
            } else {
                cache_hits as f64 / total_executions as f64
            },
        };

        let mut recommendations = Vec::new();
        if system.error_rate > 0.05 {
            recommendations.push("error rate above 5% — review error-prone tools".to_string());
        }
        if system.cache_hit_rate < 0.1 && total_executions > 20 {
            recommendations.push("cache hit rate below 10% — revisit cache_policy.ttl_seconds".to_string());
        }

        MetricsReport {
            period,
            system,
            recommendations,
        }
    }

    /// Drops records older than the retention window. Per-tool aggregates
    /// are cumulative totals and are intentionally not rolled back — only
    /// the raw record log is pruned.
    pub fn cleanup(&self) {
        let mut guard = self.inner.write();
        let cutoff = Utc::now() - guard.retention;
        guard.records.retain(|r| r.timestamp >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tool_id: &str, success: bool, ms: u64) -> ToolMetrics {
        ToolMetrics {
            tool_id: tool_id.to_string(),
            subject_id: "subject-1".to_string(),
            timestamp: Utc::now(),
            execution_time_ms: ms,
            cache_hit: false,
            success,
            error_kind: if success { None } else { Some("ToolError".to_string()) },
            api_calls_count: 1,
            cost_estimate: None,
        }
    }

    #[test]
    fn tracks_per_tool_aggregate() {
        let sink = MetricsSink::new(30);
        sink.track(record("t1", true, 10));
        sink.track(record("t1", false, 20));
        let agg = sink.tool_aggregate("t1").unwrap();
        assert_eq!(agg.total, 2);
        assert_eq!(agg.success_rate(), 0.5);
        assert_eq!(agg.avg_execution_time_ms(), 15);
    }

    #[test]
    fn redacts_secrets_from_error_kind() {
        let sink = MetricsSink::new(30);
        let mut rec = record("t1", false, 10);
        rec.error_kind = Some("api_key=sk-abcdefghijklmnopqrstuvwxyz".to_string());
        sink.track(rec);
        let analysis = sink.error_analysis();
        let stored = &analysis.recent[0];
        assert!(!stored.error_kind.as_ref().unwrap().contains("sk-abcdefghijklmnopqrstuvwxyz"));
    }

    #[test]
    fn report_flags_high_error_rate() {
        let sink = MetricsSink::new(30);
        for _ in 0..10 {
            sink.track(record("t1", false, 10));
        }
        let report = sink.report(ReportPeriod::Day);
        assert!(report.recommendations.iter().any(|r| r.contains("error rate")));
    }

    #[test]
    fn top_tools_orders_by_volume() {
        let sink = MetricsSink::new(30);
        sink.track(record("low", true, 10));
        for _ in 0..3 {
            sink.track(record("high", true, 10));
        }
        let top = sink.top_tools(1);
        assert_eq!(top[0].tool_id, "high");
    }
}
