//! The tool descriptor: the immutable-by-convention record a tool registers
//! with the registry, plus the handler trait that carries its hooks.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::{ToolOutcome, ValidationResult};
use crate::validator::Validator;

/// One of the four buckets a tool is classified into. Closed, exhaustively
/// matched everywhere rather than carried around as a bare string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Communication,
    Productivity,
    Development,
    Data,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Communication,
        Category::Productivity,
        Category::Development,
        Category::Data,
    ];
}

/// Boolean capability flags. `streaming` is metadata-only: it participates
/// in search/stats filtering but the pipeline has no chunked-execution path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub async_capable: bool,
    pub batch: bool,
    pub streaming: bool,
    pub webhook: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitStrategy {
    Fixed,
    Sliding,
    TokenBucket,
}

/// Declared on a descriptor; the executor reduces all three strategies to
/// the same fixed-window admission contract (spec §4.5) — a production
/// implementation is free to differentiate them, this one does not.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub requests: u32,
    pub period_ms: u64,
    pub strategy: RateLimitStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Memory,
    Remote,
    Hybrid,
}

/// A tool's cache policy. `ttl_seconds == 0` means no expiry (spec's
/// explicit resolution of the ambiguity in the source material).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub tier: CacheTier,
}

impl CachePolicy {
    /// Default `key_fn(args) -> string`: the canonical JSON rendering of the
    /// call's args. A tool overrides this via `ToolHandler::cache_key` when
    /// it needs a narrower key (e.g. ignoring a volatile field).
    pub fn key_for(&self, args: &Value) -> String {
        args.to_string()
    }
}

/// Required behaviour every tool must implement: validation and execution,
/// plus the optional lifecycle hooks the pipeline invokes around them.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn validate(&self, args: &Value) -> ValidationResult;

    async fn execute(&self, args: &Value, config: &Value) -> ToolOutcome;

    /// Transforms args before validation/execution. Default: identity.
    fn before(&self, args: Value) -> Value {
        args
    }

    /// Transforms a fresh or cached result before it returns to the caller.
    fn after(&self, result: Value) -> Value {
        result
    }

    /// Best-effort notification on a thrown (not tool-reported) error.
    fn on_error(&self, _err: &str, _args: &Value) {}

    /// The cache key for a call's args (spec's `cache_policy.key_fn`).
    /// Default: the policy's canonical JSON-string key.
    fn cache_key(&self, args: &Value, policy: &CachePolicy) -> String {
        policy.key_for(args)
    }
}

/// The descriptor itself: metadata plus a handle to its behaviour.
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: Category,
    pub description: String,
    pub tags: BTreeSet<String>,
    /// The opaque schema value the Validator accepts and exercises
    /// (spec.md §3). Checked for presence and well-formedness by
    /// `structural_check`, not merely carried for documentation.
    pub input_schema: Value,
    pub capabilities: Capabilities,
    pub rate_limit: Option<RateLimitSpec>,
    pub cache_policy: Option<CachePolicy>,
    pub required_config: BTreeSet<String>,
    pub optional_config: BTreeSet<String>,
    pub handler: std::sync::Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    /// Structural soundness check run by `register`: every field spec.md
    /// calls out as required is present and well-formed.
    pub fn structural_check(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.input_schema.is_null() {
            return Err("input_schema must not be missing".to_string());
        }
        Validator::compile(&self.input_schema)
            .map_err(|err| format!("input_schema is not a valid JSON Schema: {err}"))?;
        // rate_limit.requests is a u32, so "requests >= 0" always holds by
        // construction; cache_policy.ttl_seconds == 0 is the valid
        // no-expiry sentinel, not an error.
        Ok(())
    }
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("category", &self.category)
            .field("tags", &self.tags)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}
