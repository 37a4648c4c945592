//! signaler: batch web-quality audit engine
//!
//! Expands a (base URL, pages x devices) configuration into audit targets,
//! drives headless Chrome sessions through a dependency-ordered plugin
//! pipeline, and aggregates the findings into a canonical report bundle
//! with an incremental cache keyed by build fingerprint.

pub mod artifact_writer;
pub mod audit_engine;
pub mod config;
pub mod error;
pub mod plugin;
pub mod plugins;
pub mod report;
pub mod result_cache;
pub mod session_pool;
pub mod target;

pub use artifact_writer::ArtifactWriter;
pub use audit_engine::{
    AuditOrchestrator, BrowserTargetRunner, ExecutionContext, NdjsonProgress, NoOpProgress,
    Phase, ProgressEvent, ProgressEventKind, ProgressSink, TargetOutcome, TargetRunner,
};
pub use config::{AuditConfig, AuditConfigBuilder, Budgets, Parallelism, ThrottlingMethod};
pub use error::{AuditError, AuditResult, ErrorInfo, ErrorKind};
pub use plugin::{
    AuditPlugin, Category, Issue, Offender, PluginCapabilities, PluginRegistry, PluginResult,
    PluginStatus, Severity,
};
pub use plugins::default_registry;
pub use report::{BudgetViolation, RunStatus, RunSummary, TargetResult, evaluate_budgets};
pub use result_cache::ResultCache;
pub use session_pool::{SessionHandle, SessionPool};
pub use target::{Device, Scope, Target, expand, fingerprint};

/// Run a full audit with the built-in plugin set
pub async fn audit(config: AuditConfig) -> AuditResult<RunSummary> {
    let registry = default_registry()?;
    let orchestrator = AuditOrchestrator::new(config, registry)?;
    orchestrator.run().await
}
