//! Audit execution engine
//!
//! The per-target lifecycle (context establishment, plugin scheduling,
//! retries) and the run-level orchestration (worker pool, warm-up, cache,
//! aggregation, artifacts, cancellation, progress).

pub mod context;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod warmup;

pub use context::{
    ConsoleEntry, ConsoleLevel, ContextOptions, ExecutionContext, NavigationResult, NetworkEntry,
    ScriptCoverage,
};
pub use orchestrator::AuditOrchestrator;
pub use progress::{
    EtaTracker, NdjsonProgress, NoOpProgress, Phase, ProgressEvent, ProgressEventKind,
    ProgressSink,
};
pub use retry::{ErrorClass, RetryPolicy, classify};
pub use runner::{BrowserTargetRunner, TargetOutcome, TargetRunner};
pub use scheduler::run_plugins;
pub use warmup::{probe_base_url, warm_up};
