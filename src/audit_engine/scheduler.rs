//! Per-target plugin invocation
//!
//! Plugins for one target run sequentially (they share a single page) in
//! the registry's topological order, each under a wall-clock budget. A
//! failed plugin only fails itself: its transitive dependents are skipped
//! with an explanatory error and independent plugins proceed.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::context::ExecutionContext;
use crate::error::{ErrorInfo, ErrorKind};
use crate::plugin::{PluginRegistry, PluginResult, PluginStatus};

/// Run the registry's plugins against an established context.
///
/// The returned map contains one entry per active plugin, keyed by id, in
/// deterministic order. Ordering errors (cycles, missing deps) are caught
/// at startup; by the time targets execute the order is known good.
pub async fn run_plugins(
    registry: &PluginRegistry,
    ctx: &mut ExecutionContext,
    budget: Duration,
) -> BTreeMap<String, PluginResult> {
    let order = match registry.topological_order() {
        Ok(order) => order,
        Err(e) => {
            warn!("Plugin ordering failed mid-run: {e}");
            return BTreeMap::new();
        }
    };

    let mut results: BTreeMap<String, PluginResult> = BTreeMap::new();

    for plugin in order {
        let id = plugin.id().to_string();

        // Skip when any transitive dependency did not complete ok
        let blocked_by = registry.transitive_deps(&id).into_iter().find(|dep| {
            results
                .get(dep)
                .is_some_and(|r| r.status != PluginStatus::Ok)
        });
        if let Some(dep) = blocked_by {
            debug!("Skipping plugin {id}: dependency {dep} did not complete");
            results.insert(
                id.clone(),
                PluginResult::skipped(
                    &id,
                    ErrorInfo::new(
                        ErrorKind::Plugin,
                        format!("skipped: dependency {dep} did not complete"),
                    ),
                ),
            );
            continue;
        }

        let result = match tokio::time::timeout(budget, plugin.run(ctx)).await {
            Ok(Ok(mut result)) => {
                // Results are keyed by the registry id regardless of what
                // the plugin wrote
                result.plugin_id = id.clone();
                result
            }
            Ok(Err(e)) => {
                warn!("Plugin {id} failed: {e:#}");
                PluginResult::failed(&id, ErrorInfo::new(ErrorKind::Plugin, format!("{e:#}")))
            }
            Err(_) => {
                warn!("Plugin {id} exceeded its {budget:?} budget");
                PluginResult::failed(
                    &id,
                    ErrorInfo::new(
                        ErrorKind::Timeout,
                        format!("plugin exceeded {} ms budget", budget.as_millis()),
                    ),
                )
            }
        };

        results.insert(id, result);
    }

    results
}
