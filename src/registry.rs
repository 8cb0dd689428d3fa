//! The tool registry: a versioned, hot-reloadable catalog of descriptors
//! with a category index kept as a strict partition of the primary map
//! (I-R1/I-R2/I-R3).
//!
//! Grounded on the teacher's `circuit_breaker.rs` locking idiom (a single
//! `parking_lot::RwLock` guarding related maps, swapped atomically) and
//! `plugins/manager.rs`'s install/load/list surface, generalized to
//! descriptors instead of plugin manifests.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::descriptor::{Capabilities, Category, ToolDescriptor};
use crate::error::RegistryError;
use crate::plugin::Plugin;

const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    pub by_category: BTreeMap<Category, usize>,
    pub async_capable: usize,
    pub batch: usize,
    pub streaming: usize,
    pub webhook: usize,
    pub with_rate_limit: usize,
    pub with_cache: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub category: Option<Category>,
    pub tags: BTreeSet<String>,
    pub require_async: Option<bool>,
    pub require_batch: Option<bool>,
    pub require_streaming: Option<bool>,
    pub require_webhook: Option<bool>,
    pub has_rate_limit: Option<bool>,
    pub has_cache: Option<bool>,
}

pub struct ReplaceOutcome {
    pub replaced: bool,
    pub previous_version: Option<String>,
}

struct Inner {
    tools: HashMap<String, Arc<ToolDescriptor>>,
    by_category: HashMap<Category, BTreeSet<String>>,
    plugins: HashMap<String, Plugin>,
    insertion_order: Vec<String>,
    capacity: usize,
}

impl Inner {
    fn new(capacity: usize) -> Self {
        Self {
            tools: HashMap::new(),
            by_category: HashMap::new(),
            plugins: HashMap::new(),
            insertion_order: Vec::new(),
            capacity,
        }
    }

    fn insert_index(&mut self, id: &str, category: Category) {
        self.by_category.entry(category).or_default().insert(id.to_string());
    }

    fn remove_index(&mut self, id: &str, category: Category) {
        if let Some(bucket) = self.by_category.get_mut(&category) {
            bucket.remove(id);
        }
    }

    fn remove_tool(&mut self, id: &str) -> Option<Arc<ToolDescriptor>> {
        let removed = self.tools.remove(id);
        if let Some(desc) = &removed {
            self.remove_index(id, desc.category);
            self.insertion_order.retain(|existing| existing != id);
        }
        removed
    }
}

/// Process-wide catalog of tool descriptors. Cheap to clone (`Arc`-backed).
#[derive(Clone)]
pub struct ToolRegistry {
    inner: Arc<parking_lot::RwLock<Inner>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(Inner::new(capacity))),
        }
    }

    pub fn register(&self, desc: ToolDescriptor) -> Result<(), RegistryError> {
        desc.structural_check()
            .map_err(|reason| RegistryError::InvalidDescriptor {
                id: desc.id.clone(),
                reason,
            })?;
        let mut guard = self.inner.write();
        if guard.tools.contains_key(&desc.id) {
            return Err(RegistryError::AlreadyExists(desc.id));
        }
        if guard.tools.len() >= guard.capacity {
            return Err(RegistryError::RegistryFull(guard.capacity));
        }
        let id = desc.id.clone();
        let category = desc.category;
        guard.tools.insert(id.clone(), Arc::new(desc));
        guard.insert_index(&id, category);
        guard.insertion_order.push(id.clone());
        debug!(tool_id = %id, "registered tool");
        Ok(())
    }

    /// Idempotent hot-reload: replaces in place if present, otherwise
    /// registers fresh (subject to capacity, per spec — new registrations
    /// still respect the cap; replacements do not).
    pub fn register_or_replace(&self, desc: ToolDescriptor) -> Result<ReplaceOutcome, RegistryError> {
        desc.structural_check()
            .map_err(|reason| RegistryError::InvalidDescriptor {
                id: desc.id.clone(),
                reason,
            })?;
        let mut guard = self.inner.write();
        let id = desc.id.clone();
        let new_category = desc.category;

        if let Some(existing) = guard.tools.get(&id).cloned() {
            if existing.category != new_category {
                guard.remove_index(&id, existing.category);
                guard.insert_index(&id, new_category);
            }
            let previous_version = existing.version.clone();
            guard.tools.insert(id.clone(), Arc::new(desc));
            debug!(tool_id = %id, previous_version = %previous_version, "replaced tool descriptor");
            return Ok(ReplaceOutcome {
                replaced: true,
                previous_version: Some(previous_version),
            });
        }

        if guard.tools.len() >= guard.capacity {
            return Err(RegistryError::RegistryFull(guard.capacity));
        }
        guard.tools.insert(id.clone(), Arc::new(desc));
        guard.insert_index(&id, new_category);
        guard.insertion_order.push(id.clone());
        Ok(ReplaceOutcome {
            replaced: false,
            previous_version: None,
        })
    }

    pub fn unregister(&self, id: &str) {
        let mut guard = self.inner.write();
        guard.remove_tool(id);
    }

    pub fn get(&self, id: &str) -> Option<Arc<ToolDescriptor>> {
        self.inner.read().tools.get(id).cloned()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.inner.read().tools.contains_key(id)
    }

    pub fn all(&self) -> Vec<Arc<ToolDescriptor>> {
        self.inner.read().tools.values().cloned().collect()
    }

    pub fn by_category(&self, category: Category) -> Vec<Arc<ToolDescriptor>> {
        let guard = self.inner.read();
        guard
            .by_category
            .get(&category)
            .into_iter()
            .flatten()
            .filter_map(|id| guard.tools.get(id).cloned())
            .collect()
    }

    pub fn has_version_conflict(&self, id: &str, new_version: &str) -> bool {
        match self.get(id) {
            Some(existing) => existing.version != new_version,
            None => false,
        }
    }

    pub fn search(&self, query: &str, filters: &SearchFilters) -> Vec<Arc<ToolDescriptor>> {
        let needle = query.to_lowercase();
        self.inner
            .read()
            .tools
            .values()
            .filter(|desc| {
                let haystack_matches = needle.is_empty()
                    || desc.name.to_lowercase().contains(&needle)
                    || desc.description.to_lowercase().contains(&needle)
                    || desc.tags.iter().any(|tag| tag.to_lowercase().contains(&needle));
                haystack_matches && self.matches_filters(desc, filters)
            })
            .cloned()
            .collect()
    }

    fn matches_filters(&self, desc: &ToolDescriptor, filters: &SearchFilters) -> bool {
        if let Some(cat) = filters.category {
            if desc.category != cat {
                return false;
            }
        }
        if !filters.tags.is_empty() && !filters.tags.is_subset(&desc.tags) {
            return false;
        }
        let caps: Capabilities = desc.capabilities;
        if let Some(want) = filters.require_async {
            if caps.async_capable != want {
                return false;
            }
        }
        if let Some(want) = filters.require_batch {
            if caps.batch != want {
                return false;
            }
        }
        if let Some(want) = filters.require_streaming {
            if caps.streaming != want {
                return false;
            }
        }
        if let Some(want) = filters.require_webhook {
            if caps.webhook != want {
                return false;
            }
        }
        if let Some(want) = filters.has_rate_limit {
            if desc.rate_limit.is_some() != want {
                return false;
            }
        }
        if let Some(want) = filters.has_cache {
            if desc.cache_policy.is_some() != want {
                return false;
            }
        }
        true
    }

    pub fn load_plugin(&self, plugin: Plugin) -> Result<(), RegistryError> {
        let mut guard = self.inner.write();
        if guard.plugins.contains_key(&plugin.id) {
            return Err(RegistryError::PluginExists(plugin.id));
        }
        for dep in &plugin.dependencies {
            if !guard.plugins.contains_key(dep) {
                return Err(RegistryError::MissingDependency {
                    plugin: plugin.id,
                    dependency: dep.clone(),
                });
            }
        }

        // Register every tool, rolling back on the first failure so a
        // partially-loaded plugin never becomes visible.
        let mut registered_ids = Vec::new();
        for desc in &plugin.tools {
            if guard.tools.contains_key(&desc.id) {
                for id in &registered_ids {
                    guard.remove_tool(id);
                }
                return Err(RegistryError::AlreadyExists(desc.id.clone()));
            }
            if guard.tools.len() >= guard.capacity {
                for id in &registered_ids {
                    guard.remove_tool(id);
                }
                return Err(RegistryError::RegistryFull(guard.capacity));
            }
            let id = desc.id.clone();
            let category = desc.category;
            guard.tools.insert(id.clone(), Arc::clone(desc));
            guard.insert_index(&id, category);
            guard.insertion_order.push(id.clone());
            registered_ids.push(id);
        }

        let plugin_id = plugin.id.clone();
        guard.plugins.insert(plugin_id.clone(), plugin);
        debug!(plugin_id = %plugin_id, "loaded plugin");
        Ok(())
    }

    pub fn unload_plugin(&self, id: &str) -> Result<(), RegistryError> {
        let mut guard = self.inner.write();
        let plugin = guard
            .plugins
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownPlugin(id.to_string()))?;
        for tool_id in plugin.tool_ids() {
            guard.remove_tool(&tool_id);
        }
        warn!(plugin_id = %id, "unloaded plugin");
        Ok(())
    }

    pub fn export_config(&self) -> Value {
        let guard = self.inner.read();
        let tools: Vec<Value> = guard
            .tools
            .values()
            .map(|desc| {
                json!({
                    "id": desc.id,
                    "name": desc.name,
                    "version": desc.version,
                    "category": desc.category,
                    "description": desc.description,
                    "tags": desc.tags,
                    "capabilities": desc.capabilities,
                    "rate_limit": desc.rate_limit,
                    "cache": desc.cache_policy,
                })
            })
            .collect();
        let plugins: Vec<Value> = guard
            .plugins
            .values()
            .map(|p| {
                json!({
                    "id": p.id,
                    "version": p.version,
                    "tools": p.tool_ids(),
                    "dependencies": p.dependencies,
                })
            })
            .collect();
        json!({
            "tools": tools,
            "plugins": plugins,
            "stats": self.stats(),
        })
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write();
        guard.tools.clear();
        guard.by_category.clear();
        guard.plugins.clear();
        guard.insertion_order.clear();
    }

    pub fn stats(&self) -> RegistryStats {
        let guard = self.inner.read();
        let mut stats = RegistryStats {
            total_tools: guard.tools.len(),
            ..Default::default()
        };
        for cat in Category::ALL {
            stats
                .by_category
                .insert(cat, guard.by_category.get(&cat).map(BTreeSet::len).unwrap_or(0));
        }
        for desc in guard.tools.values() {
            if desc.capabilities.async_capable {
                stats.async_capable += 1;
            }
            if desc.capabilities.batch {
                stats.batch += 1;
            }
            if desc.capabilities.streaming {
                stats.streaming += 1;
            }
            if desc.capabilities.webhook {
                stats.webhook += 1;
            }
            if desc.rate_limit.is_some() {
                stats.with_rate_limit += 1;
            }
            if desc.cache_policy.is_some() {
                stats.with_cache += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{Capabilities, ToolDescriptor};
    use crate::result::{ToolOutcome, ValidationResult};
    use async_trait::async_trait;
    use serde_json::json;

    struct Noop;

    #[async_trait]
    impl crate::descriptor::ToolHandler for Noop {
        fn validate(&self, _args: &Value) -> ValidationResult {
            ValidationResult::ok(json!({}))
        }

        async fn execute(&self, _args: &Value, _config: &Value) -> ToolOutcome {
            ToolOutcome::success(json!({}))
        }
    }

    fn descriptor(id: &str, category: Category) -> ToolDescriptor {
        ToolDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            version: "1.0.0".to_string(),
            category,
            description: format!("{id} description"),
            tags: BTreeSet::new(),
            input_schema: json!({"type": "object"}),
            capabilities: Capabilities::default(),
            rate_limit: None,
            cache_policy: None,
            required_config: BTreeSet::new(),
            optional_config: BTreeSet::new(),
            handler: Arc::new(Noop),
        }
    }

    #[test]
    fn register_rejects_duplicate_id() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("t1", Category::Development)).unwrap();
        let err = registry.register(descriptor("t1", Category::Development)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
        registry.unregister("t1");
        registry.register(descriptor("t1", Category::Development)).unwrap();
    }

    #[test]
    fn register_or_replace_moves_category_bucket() {
        let registry = ToolRegistry::new();
        registry.register(descriptor("t1", Category::Development)).unwrap();
        registry
            .register_or_replace(descriptor("t1", Category::Data))
            .unwrap();
        assert!(registry.by_category(Category::Development).is_empty());
        assert_eq!(registry.by_category(Category::Data).len(), 1);
        assert_eq!(registry.stats().total_tools, 1);
    }

    #[test]
    fn load_plugin_rejects_missing_dependency() {
        let registry = ToolRegistry::new();
        let plugin = Plugin {
            id: "p1".to_string(),
            version: "1.0.0".to_string(),
            tools: vec![Arc::new(descriptor("t1", Category::Data))],
            dependencies: vec!["p0".to_string()],
        };
        let err = registry.load_plugin(plugin).unwrap_err();
        assert!(matches!(err, RegistryError::MissingDependency { .. }));
        assert!(!registry.exists("t1"));
    }

    #[test]
    fn unload_plugin_removes_its_tools() {
        let registry = ToolRegistry::new();
        let plugin = Plugin {
            id: "p1".to_string(),
            version: "1.0.0".to_string(),
            tools: vec![Arc::new(descriptor("t1", Category::Data))],
            dependencies: vec![],
        };
        registry.load_plugin(plugin).unwrap();
        assert!(registry.exists("t1"));
        registry.unload_plugin("p1").unwrap();
        assert!(!registry.exists("t1"));
    }
}
