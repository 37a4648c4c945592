//! Plugin contract and registry
//!
//! A plugin is an auditor producing metrics, issues, and artifacts for a
//! single target, running inside a shared [`ExecutionContext`]. Plugins
//! declare static capabilities and dependencies; the registry orders them
//! topologically and the scheduler invokes them sequentially per target.

mod registry;
mod types;

pub use registry::PluginRegistry;
pub use types::{
    Category, Fix, FixDifficulty, Issue, MetricValue, Offender, PluginArtifact,
    PluginCapabilities, PluginResult, PluginStatus, Severity,
};

use async_trait::async_trait;

use crate::audit_engine::context::ExecutionContext;

/// Contract every auditor implements, built-in or external.
///
/// Implementations must be side-effect free outside `ctx.shared` and their
/// own artifacts, and must honor `ctx.cancel` at I/O boundaries.
#[async_trait]
pub trait AuditPlugin: Send + Sync {
    /// Stable identifier, e.g. `security-headers`
    fn id(&self) -> &str;

    /// Version string, part of the cache fingerprint
    fn version(&self) -> &str;

    /// Plugins whose shared data this plugin reads. Dependents run after
    /// their dependencies and are skipped when one fails.
    fn depends_on(&self) -> &[&str] {
        &[]
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities::default()
    }

    /// Whether a target that saw this plugin fail may still be cached.
    /// Defaults to false so transient plugin failures are re-audited on the
    /// next run instead of being served from cache.
    fn cacheable(&self) -> bool {
        false
    }

    /// Run the audit against the prepared context
    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<PluginResult>;
}
