//! Built-in audit plugins
//!
//! These auditors work purely from captured [`ExecutionContext`] data
//! (console log, response headers, network log, JS coverage) and ship with
//! the default registry. Heavyweight external auditors register through the
//! same [`crate::plugin::AuditPlugin`] contract.

mod console_errors;
mod coverage_waste;
mod page_weight;
mod security_headers;

pub use console_errors::ConsoleErrorsPlugin;
pub use coverage_waste::CoverageWastePlugin;
pub use page_weight::PageWeightPlugin;
pub use security_headers::SecurityHeadersPlugin;

use std::sync::Arc;

use crate::error::AuditResult;
use crate::plugin::PluginRegistry;

/// Registry preloaded with the built-in plugin set
pub fn default_registry() -> AuditResult<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(ConsoleErrorsPlugin))?;
    registry.register(Arc::new(SecurityHeadersPlugin))?;
    registry.register(Arc::new(PageWeightPlugin))?;
    registry.register(Arc::new(CoverageWastePlugin))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_orders_cleanly() {
        let registry = default_registry().expect("register built-ins");
        let order = registry.topological_order().expect("acyclic");
        assert_eq!(order.len(), 4);
        let ids: Vec<&str> = order.iter().map(|p| p.id()).collect();
        let weight = ids.iter().position(|id| *id == "page-weight").expect("present");
        let waste = ids.iter().position(|id| *id == "coverage-waste").expect("present");
        assert!(weight < waste);
    }
}
