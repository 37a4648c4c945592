//! Plugin registry with dependency ordering
//!
//! Registration rejects duplicate ids; ordering is computed once at startup
//! and fails fast on unknown dependencies and cycles.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use super::AuditPlugin;
use crate::config::PluginFilter;
use crate::error::{AuditError, AuditResult};

/// Holds the active plugin set for a run
#[derive(Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn AuditPlugin>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin. Duplicate ids are a configuration error.
    pub fn register(&mut self, plugin: Arc<dyn AuditPlugin>) -> AuditResult<()> {
        if self.plugins.iter().any(|p| p.id() == plugin.id()) {
            return Err(AuditError::Config(format!(
                "duplicate plugin id {:?}",
                plugin.id()
            )));
        }
        self.plugins.push(plugin);
        Ok(())
    }

    /// Apply an allow/deny filter, producing the effective registry for a
    /// run. A retained plugin depending on a filtered-out plugin is a
    /// configuration error surfaced by `topological_order`.
    #[must_use]
    pub fn filtered(&self, filter: &PluginFilter) -> Self {
        Self {
            plugins: self
                .plugins
                .iter()
                .filter(|p| filter.permits(p.id()))
                .cloned()
                .collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<dyn AuditPlugin>> {
        self.plugins.iter().find(|p| p.id() == id)
    }

    /// (id, version) pairs sorted by id, for the cache fingerprint
    #[must_use]
    pub fn plugin_set(&self) -> Vec<(String, String)> {
        let mut set: Vec<(String, String)> = self
            .plugins
            .iter()
            .map(|p| (p.id().to_string(), p.version().to_string()))
            .collect();
        set.sort();
        set
    }

    /// Whether any active plugin wants JS coverage collected
    #[must_use]
    pub fn needs_coverage(&self) -> bool {
        self.plugins
            .iter()
            .any(|p| p.capabilities().needs_coverage || p.capabilities().needs_coverage_reload)
    }

    /// Kahn topological sort over `depends_on`.
    ///
    /// Fails on dependencies that are not registered (or were filtered out)
    /// and on cycles. Ties break on registration order so the emitted
    /// sequence is deterministic.
    pub fn topological_order(&self) -> AuditResult<Vec<Arc<dyn AuditPlugin>>> {
        let ids: BTreeSet<&str> = self.plugins.iter().map(|p| p.id()).collect();
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for plugin in &self.plugins {
            in_degree.entry(plugin.id()).or_insert(0);
            for dep in plugin.depends_on() {
                if !ids.contains(dep) {
                    return Err(AuditError::Config(format!(
                        "plugin {:?} depends on {dep:?}, which is not registered or was filtered out",
                        plugin.id()
                    )));
                }
                *in_degree.entry(plugin.id()).or_insert(0) += 1;
                dependents.entry(dep).or_default().push(plugin.id());
            }
        }

        let mut ready: VecDeque<&str> = self
            .plugins
            .iter()
            .map(|p| p.id())
            .filter(|id| in_degree[id] == 0)
            .collect();
        let mut order: Vec<&str> = Vec::with_capacity(self.plugins.len());

        while let Some(id) = ready.pop_front() {
            order.push(id);
            for dependent in dependents.get(id).into_iter().flatten() {
                let degree = in_degree
                    .get_mut(dependent)
                    .ok_or_else(|| AuditError::Internal("degree table out of sync".into()))?;
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(dependent);
                }
            }
        }

        if order.len() != self.plugins.len() {
            let stuck: Vec<&str> = self
                .plugins
                .iter()
                .map(|p| p.id())
                .filter(|id| !order.contains(id))
                .collect();
            return Err(AuditError::Config(format!(
                "plugin dependency cycle involving {stuck:?}"
            )));
        }

        Ok(order
            .into_iter()
            .filter_map(|id| self.get(id).cloned())
            .collect())
    }

    /// Transitive dependency closure for one plugin id
    #[must_use]
    pub fn transitive_deps(&self, id: &str) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<&str> = self
            .get(id)
            .map(|p| p.depends_on().to_vec())
            .unwrap_or_default();
        while let Some(dep) = stack.pop() {
            if closure.insert(dep.to_string()) {
                if let Some(plugin) = self.get(dep) {
                    stack.extend(plugin.depends_on());
                }
            }
        }
        closure
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_engine::context::ExecutionContext;
    use crate::plugin::{PluginCapabilities, PluginResult};
    use async_trait::async_trait;

    struct FakePlugin {
        id: &'static str,
        deps: Vec<&'static str>,
    }

    #[async_trait]
    impl AuditPlugin for FakePlugin {
        fn id(&self) -> &str {
            self.id
        }
        fn version(&self) -> &str {
            "1.0.0"
        }
        fn depends_on(&self) -> &[&str] {
            &self.deps
        }
        fn capabilities(&self) -> PluginCapabilities {
            PluginCapabilities::default()
        }
        async fn run(&self, _ctx: &mut ExecutionContext) -> anyhow::Result<PluginResult> {
            Ok(PluginResult::ok(self.id))
        }
    }

    fn registry(specs: &[(&'static str, &[&'static str])]) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for (id, deps) in specs {
            registry
                .register(Arc::new(FakePlugin {
                    id,
                    deps: deps.to_vec(),
                }))
                .expect("register");
        }
        registry
    }

    #[test]
    fn order_respects_dependencies() {
        let registry = registry(&[("c", &["b"]), ("a", &[]), ("b", &["a"])]);
        let order: Vec<String> = registry
            .topological_order()
            .expect("acyclic")
            .iter()
            .map(|p| p.id().to_string())
            .collect();
        let pos = |id: &str| order.iter().position(|o| o == id).expect("present");
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn cycle_is_rejected() {
        let registry = registry(&[("a", &["b"]), ("b", &["a"])]);
        let err = match registry.topological_order() {
            Err(e) => e,
            Ok(_) => panic!("cycle"),
        };
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn missing_dependency_is_rejected() {
        let registry = registry(&[("a", &["ghost"])]);
        assert!(registry.topological_order().is_err());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let mut registry = registry(&[("a", &[])]);
        let err = registry
            .register(Arc::new(FakePlugin { id: "a", deps: vec![] }))
            .expect_err("duplicate");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn filter_removes_denied_plugins() {
        let registry = registry(&[("a", &[]), ("b", &[])]);
        let filter = PluginFilter {
            allow: None,
            deny: vec!["b".into()],
        };
        let filtered = registry.filtered(&filter);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.get("a").is_some());
    }

    #[test]
    fn filtered_out_dependency_fails_ordering() {
        let registry = registry(&[("a", &[]), ("b", &["a"])]);
        let filter = PluginFilter {
            allow: None,
            deny: vec!["a".into()],
        };
        assert!(registry.filtered(&filter).topological_order().is_err());
    }

    #[test]
    fn plugin_set_is_sorted() {
        let registry = registry(&[("z", &[]), ("a", &[])]);
        let set = registry.plugin_set();
        assert_eq!(set[0].0, "a");
        assert_eq!(set[1].0, "z");
    }

    #[test]
    fn transitive_deps_follow_chains() {
        let registry = registry(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);
        let closure = registry.transitive_deps("c");
        assert!(closure.contains("a"));
        assert!(closure.contains("b"));
    }
}
