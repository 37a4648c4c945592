//! Property tests for plugin dependency ordering

mod common;

use async_trait::async_trait;
use proptest::prelude::*;
use std::sync::Arc;

use signaler::audit_engine::ExecutionContext;
use signaler::plugin::{AuditPlugin, PluginRegistry, PluginResult};

struct DagPlugin {
    id: String,
    deps: Vec<&'static str>,
}

// Dependency names are leaked so the trait's borrowed slice can be
// returned; the handful of test ids lives for the process lifetime anyway.
fn leak(name: String) -> &'static str {
    Box::leak(name.into_boxed_str())
}

#[async_trait]
impl AuditPlugin for DagPlugin {
    fn id(&self) -> &str {
        &self.id
    }
    fn version(&self) -> &str {
        "1.0.0"
    }
    fn depends_on(&self) -> &[&str] {
        &self.deps
    }
    async fn run(&self, _ctx: &mut ExecutionContext) -> anyhow::Result<PluginResult> {
        Ok(PluginResult::ok(&self.id))
    }
}

/// Random DAG: plugin `i` may only depend on plugins with lower indexes,
/// so the graph is acyclic by construction.
fn arb_dag() -> impl Strategy<Value = Vec<(usize, Vec<usize>)>> {
    (1usize..12).prop_flat_map(|n| {
        let edges: Vec<BoxedStrategy<(usize, Vec<usize>)>> = (0..n)
            .map(|i| {
                let deps = if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    proptest::collection::vec(0..i, 0..i.min(4)).boxed()
                };
                deps.prop_map(move |mut d| {
                    d.sort_unstable();
                    d.dedup();
                    (i, d)
                })
                .boxed()
            })
            .collect();
        edges
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(150))]

    #[test]
    fn order_places_every_plugin_after_its_dependencies(dag in arb_dag()) {
        let mut registry = PluginRegistry::new();
        for (index, deps) in &dag {
            let plugin = DagPlugin {
                id: format!("p{index}"),
                deps: deps.iter().map(|d| leak(format!("p{d}"))).collect(),
            };
            registry.register(Arc::new(plugin)).expect("unique ids");
        }

        let order = registry.topological_order().expect("acyclic by construction");
        prop_assert_eq!(order.len(), dag.len());

        let position = |id: &str| order.iter().position(|p| p.id() == id).expect("present");
        for (index, deps) in &dag {
            let own = position(&format!("p{index}"));
            for dep in deps {
                prop_assert!(
                    position(&format!("p{dep}")) < own,
                    "p{} must come before p{}", dep, index
                );
            }
        }
    }
}
