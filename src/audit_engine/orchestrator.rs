//! Audit run orchestration
//!
//! Top-level state machine: Preparing validates configuration and resolves
//! the build id, WarmingUp primes server caches, Running drains the target
//! queue through a bounded worker pool with adaptive sizing, Aggregating
//! reduces results, Writing persists the artifact bundle. Cancellation and
//! the optional run timeout drain in-flight targets within a grace window
//! and still write partial results.

use chrono::Utc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::progress::{
    EtaTracker, NoOpProgress, Phase, ProgressEvent, ProgressEventKind, ProgressSink,
};
use super::runner::{BrowserTargetRunner, TargetOutcome, TargetRunner};
use super::warmup::{probe_base_url, warm_up};
use crate::artifact_writer::ArtifactWriter;
use crate::config::AuditConfig;
use crate::error::{AuditError, AuditResult, ErrorInfo};
use crate::plugin::{PluginRegistry, PluginStatus};
use crate::report::types::{CoreMetrics, RunMeta, RunStatus, RunSummary, TargetResult};
use crate::report::{self, collect_scores};
use crate::result_cache::ResultCache;
use crate::session_pool::SessionPool;
use crate::target::{self, FingerprintInputs, Target, fingerprint};

/// Completed-target threshold before adaptive throttling can trigger
const ADAPTIVE_MIN_COMPLETED: usize = 10;
/// Failure rate beyond which the worker cap is halved
const ADAPTIVE_FAILURE_RATE: f64 = 0.3;
/// Consecutive failures on one worker slot that force a fresh session
const SLOT_FAILURE_LIMIT: u32 = 3;

/// Drives one audit run from configuration to summary
pub struct AuditOrchestrator {
    config: AuditConfig,
    registry: PluginRegistry,
    runner: Arc<dyn TargetRunner>,
    pool: Option<Arc<SessionPool>>,
    worker_cap: Arc<AtomicUsize>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl AuditOrchestrator {
    /// Production construction: browser session pool plus the browser
    /// target runner.
    pub fn new(config: AuditConfig, registry: PluginRegistry) -> AuditResult<Self> {
        let registry = match &config.plugins {
            Some(filter) => registry.filtered(filter),
            None => registry,
        };
        let pool = SessionPool::new(&config);
        let worker_cap = Arc::new(AtomicUsize::new(pool.current_cap()));
        let runner = Arc::new(BrowserTargetRunner::new(
            Arc::clone(&pool),
            registry.clone(),
            &config,
        ));
        Ok(Self {
            config,
            registry,
            runner,
            pool: Some(pool),
            worker_cap,
            progress: Arc::new(NoOpProgress),
            cancel: CancellationToken::new(),
        })
    }

    /// Construction with an injected runner and explicit worker cap, used
    /// by embedders and tests that bring their own execution backend.
    pub fn with_runner(
        config: AuditConfig,
        registry: PluginRegistry,
        runner: Arc<dyn TargetRunner>,
        worker_cap: usize,
    ) -> Self {
        let registry = match &config.plugins {
            Some(filter) => registry.filtered(filter),
            None => registry,
        };
        Self {
            config,
            registry,
            runner,
            pool: None,
            worker_cap: Arc::new(AtomicUsize::new(worker_cap.max(1))),
            progress: Arc::new(NoOpProgress),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    /// Token callers use to cancel the run
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn notice(&self, phase: Phase, kind: &str, completed: usize, total: usize) {
        self.progress
            .emit(&ProgressEvent::notice(phase, kind, completed, total));
    }

    /// Execute the full run
    pub async fn run(&self) -> AuditResult<RunSummary> {
        let started_at = Utc::now();
        self.notice(Phase::Preparing, "phase", 0, 0);

        // Preparing: structural validation, plugin ordering, reachability
        if let Err(e) = self.prepare().await {
            self.write_minimal_failure(&e).await;
            self.notice(Phase::Failed, "phase", 0, 0);
            return Err(e);
        }

        let mut warnings = Vec::new();
        let build_id = self.resolve_build_id();
        let cache_enabled = self.config.incremental && build_id.is_some();
        if self.config.incremental && build_id.is_none() {
            let warning =
                "incremental=true but no buildId could be resolved; cache disabled".to_string();
            warn!("{warning}");
            warnings.push(warning);
            self.notice(Phase::Preparing, "cache_disabled", 0, 0);
        }

        // The previous summary must be read before this run overwrites it
        let previous = self.load_previous_summary();
        let cache_path = self.config.output_dir.join("cache.json");
        let cache = if cache_enabled {
            Arc::new(ResultCache::load(&cache_path))
        } else {
            Arc::new(ResultCache::new())
        };

        let targets = target::expand(&self.config);
        let total = targets.len();
        let fingerprint_inputs = build_id.clone().map(|bid| {
            FingerprintInputs::new(&self.config, bid, self.registry.plugin_set())
        });

        self.spawn_run_timeout();

        // WarmingUp
        if self.config.warm_up && !targets.is_empty() && !self.cancel.is_cancelled() {
            self.notice(Phase::WarmingUp, "phase", 0, total);
            let paths: Vec<String> = targets.iter().map(|t| t.path.clone()).collect();
            let concurrency = self.worker_cap.load(Ordering::Relaxed).min(4);
            warm_up(&self.config.base_url, &paths, concurrency, &self.cancel).await;
        }

        // Running
        self.notice(Phase::Running, "phase", 0, total);
        let results = self
            .drain_targets(targets, &cache, cache_enabled, fingerprint_inputs.as_ref())
            .await;

        let cancelled = self.cancel.is_cancelled();
        let any_failed = results.iter().any(TargetResult::failed);
        let status = if cancelled {
            RunStatus::Cancelled
        } else if any_failed {
            RunStatus::Partial
        } else {
            RunStatus::Ok
        };

        // Aggregating
        self.notice(Phase::Aggregating, "phase", results.len(), total);
        let mut meta = RunMeta::new(status);
        meta.build_id = build_id;
        meta.plugin_set = self.registry.plugin_set();
        meta.warnings = warnings;
        let completed_at = Utc::now();
        let mut summary = report::aggregate(
            results,
            previous.as_ref(),
            meta,
            started_at,
            completed_at,
            self.config.diff_threshold,
        );

        // Writing
        self.notice(Phase::Writing, "phase", summary.targets.len(), total);
        self.write_artifacts(&mut summary, &cache, &cache_path, cache_enabled, cancelled)
            .await?;

        let final_phase = if cancelled { Phase::Cancelled } else { Phase::Done };
        self.notice(final_phase, "phase", summary.targets.len(), total);
        info!(
            "Audit run finished: {} target(s), status {:?}",
            summary.targets.len(),
            summary.meta.status
        );
        Ok(summary)
    }

    async fn prepare(&self) -> AuditResult<()> {
        self.config.validate()?;
        // Cyclic or unsatisfiable plugin dependencies fail the run up front
        self.registry.topological_order()?;
        probe_base_url(&self.config.base_url).await?;
        Ok(())
    }

    /// Worker pool draining the target queue. Workers above the current cap
    /// exit once their in-flight target completes.
    async fn drain_targets(
        &self,
        targets: Vec<Target>,
        cache: &Arc<ResultCache>,
        cache_enabled: bool,
        fingerprint_inputs: Option<&FingerprintInputs>,
    ) -> Vec<TargetResult> {
        let total = targets.len();
        if total == 0 {
            return Vec::new();
        }

        let queue: Arc<Mutex<VecDeque<Target>>> = Arc::new(Mutex::new(targets.into()));
        let results: Arc<Mutex<Vec<TargetResult>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let cap_reduced = Arc::new(AtomicBool::new(false));
        let eta = Arc::new(EtaTracker::new());

        let worker_count = self.worker_cap.load(Ordering::Relaxed).max(1);
        let mut workers = Vec::with_capacity(worker_count);

        for slot in 0..worker_count {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let completed = Arc::clone(&completed);
            let failed = Arc::clone(&failed);
            let cap_reduced = Arc::clone(&cap_reduced);
            let eta = Arc::clone(&eta);
            let cache = Arc::clone(cache);
            let runner = Arc::clone(&self.runner);
            let registry = self.registry.clone();
            let progress = Arc::clone(&self.progress);
            let cancel = self.cancel.clone();
            let worker_cap = Arc::clone(&self.worker_cap);
            let pool = self.pool.clone();
            let fingerprint_inputs = fingerprint_inputs.cloned();
            let grace = Duration::from_millis(self.config.grace_period_ms);

            workers.push(tokio::spawn(async move {
                let mut consecutive_failures: u32 = 0;
                loop {
                    // Excess workers retire when the cap shrinks; slot 0
                    // always keeps draining.
                    if slot > 0 && slot >= worker_cap.load(Ordering::Relaxed) {
                        break;
                    }

                    let Some(target) = queue.lock().await.pop_front() else {
                        break;
                    };

                    let fp = fingerprint_inputs
                        .as_ref()
                        .map(|inputs| fingerprint(&target, inputs));

                    // Targets left in the queue after cancellation are
                    // recorded, not executed.
                    if cancel.is_cancelled() {
                        let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                        results.lock().await.push(cancelled_result(&target, fp));
                        progress.emit(&ProgressEvent {
                            phase: Phase::Running,
                            event: ProgressEventKind::TargetDone,
                            completed: done,
                            total,
                            eta_ms: None,
                            current_target: Some(target.target_ref()),
                            kind: None,
                        });
                        continue;
                    }

                    progress.emit(&ProgressEvent {
                        phase: Phase::Running,
                        event: ProgressEventKind::TargetStart,
                        completed: completed.load(Ordering::Relaxed),
                        total,
                        eta_ms: eta.eta(
                            queue.lock().await.len() + 1,
                            worker_cap.load(Ordering::Relaxed),
                        ),
                        current_target: Some(target.target_ref()),
                        kind: None,
                    });

                    // Cache consult bypasses execution entirely
                    if cache_enabled {
                        if let Some(fp) = &fp {
                            if let Some(hit) = cache.get(fp) {
                                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                                results.lock().await.push(hit);
                                progress.emit(&ProgressEvent {
                                    phase: Phase::Running,
                                    event: ProgressEventKind::TargetDone,
                                    completed: done,
                                    total,
                                    eta_ms: None,
                                    current_target: Some(target.target_ref()),
                                    kind: None,
                                });
                                continue;
                            }
                        }
                    }

                    let discard_session = consecutive_failures >= SLOT_FAILURE_LIMIT;
                    if discard_session {
                        consecutive_failures = 0;
                    }

                    let started_at = Utc::now();
                    let start = Instant::now();
                    let outcome = {
                        let run_fut = runner.run_target(&target, discard_session, &cancel);
                        tokio::pin!(run_fut);
                        tokio::select! {
                            outcome = &mut run_fut => outcome,
                            () = cancel.cancelled() => {
                                // In-flight targets get a grace window to
                                // finish cleanly before being recorded as
                                // cancelled.
                                match tokio::time::timeout(grace, &mut run_fut).await {
                                    Ok(outcome) => outcome,
                                    Err(_) => TargetOutcome::cancelled(),
                                }
                            }
                        }
                    };
                    let duration = start.elapsed();

                    let result = TargetResult {
                        scores: collect_scores(&outcome.plugins),
                        core_metrics: CoreMetrics::collect(&outcome.plugins),
                        target: target.clone(),
                        fingerprint: fp.clone(),
                        started_at,
                        duration_ms: duration.as_millis() as u64,
                        plugins: outcome.plugins,
                        from_cache: false,
                        retries: outcome.retries,
                        error: outcome.error,
                    };

                    if cache_enabled && result.error.is_none() {
                        if let Some(fp) = &fp {
                            if cache_safe(&registry, &result) {
                                cache.put(fp, result.clone());
                            }
                        }
                    }

                    if result.failed() {
                        failed.fetch_add(1, Ordering::Relaxed);
                        consecutive_failures += 1;
                    } else {
                        consecutive_failures = 0;
                    }

                    let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                    eta.record(duration);
                    progress.emit(&ProgressEvent {
                        phase: Phase::Running,
                        event: ProgressEventKind::TargetDone,
                        completed: done,
                        total,
                        eta_ms: eta.eta(
                            queue.lock().await.len(),
                            worker_cap.load(Ordering::Relaxed),
                        ),
                        current_target: Some(target.target_ref()),
                        kind: None,
                    });
                    results.lock().await.push(result);

                    // Adaptive throttle-down: sustained failure rate halves
                    // the cap once for the remainder of the run
                    let done_now = done;
                    let failed_now = failed.load(Ordering::Relaxed);
                    if done_now >= ADAPTIVE_MIN_COMPLETED
                        && failed_now as f64 / done_now as f64 > ADAPTIVE_FAILURE_RATE
                        && !cap_reduced.swap(true, Ordering::Relaxed)
                    {
                        let current = worker_cap.load(Ordering::Relaxed);
                        let new_cap = (current / 2).max(1);
                        worker_cap.store(new_cap, Ordering::Relaxed);
                        if let Some(pool) = &pool {
                            pool.halve_cap();
                        }
                        warn!(
                            "Failure rate {failed_now}/{done_now} exceeds {ADAPTIVE_FAILURE_RATE}, worker cap halved to {new_cap}"
                        );
                        progress.emit(&ProgressEvent::notice(
                            Phase::Running,
                            "worker_cap_reduced",
                            done_now,
                            total,
                        ));
                    }
                }
            }));
        }

        for worker in workers {
            if let Err(e) = worker.await {
                warn!("Worker task panicked: {e}");
            }
        }

        Arc::try_unwrap(results)
            .map(Mutex::into_inner)
            .unwrap_or_default()
    }

    /// Persist the artifact bundle. Only `summary.json` is mandatory.
    async fn write_artifacts(
        &self,
        summary: &mut RunSummary,
        cache: &Arc<ResultCache>,
        cache_path: &std::path::Path,
        cache_enabled: bool,
        cancelled: bool,
    ) -> AuditResult<()> {
        let mut writer = ArtifactWriter::new(&self.config.output_dir)?;

        let lite = summary_lite(summary);
        let _ = writer
            .write(
                "summary-lite.json",
                report::to_canonical_json(&lite)?.as_bytes(),
                false,
            )
            .await;

        let triage = report::render_triage(summary);
        let _ = writer.write("triage.md", triage.as_bytes(), false).await;

        let issues = serde_json::json!({
            "issues": summary.aggregate_issues,
            "offenders": summary.offenders,
        });
        let _ = writer
            .write(
                "issues.json",
                report::to_canonical_json(&issues)?.as_bytes(),
                false,
            )
            .await;

        let analysis = report::build_ai_analysis(summary);
        let _ = writer
            .write(
                "ai-analysis.json",
                report::to_canonical_json(&analysis)?.as_bytes(),
                false,
            )
            .await;
        let ai_summary = report::build_ai_summary(summary);
        let _ = writer
            .write(
                "ai-summary.json",
                report::to_canonical_json(&ai_summary)?.as_bytes(),
                false,
            )
            .await;

        if let Some(diff) = &summary.diff {
            let _ = writer
                .write(
                    "diff.json",
                    report::to_canonical_json(diff)?.as_bytes(),
                    false,
                )
                .await;
        }

        for target_result in &summary.targets {
            if target_result.from_cache {
                continue;
            }
            for (plugin_id, plugin_result) in &target_result.plugins {
                if !plugin_result.artifacts.is_empty() {
                    writer
                        .write_plugin_artifacts(plugin_id, &plugin_result.artifacts)
                        .await;
                }
            }
        }

        // Cancelled runs never persist newly cached entries
        if cache_enabled && !cancelled {
            if let Err(e) = cache.persist(cache_path) {
                warn!("Cache persistence failed: {e}");
            }
        }

        summary.meta.artifacts = writer.records().to_vec();
        let serialized = report::to_canonical_json_pretty(summary)?;
        writer
            .write("summary.json", serialized.as_bytes(), true)
            .await?;

        Ok(())
    }

    /// Configured build id, else a framework build marker, else VCS HEAD
    fn resolve_build_id(&self) -> Option<String> {
        if let Some(build_id) = &self.config.build_id {
            return Some(build_id.clone());
        }

        let project = &self.config.project_dir;
        for marker in [".next/BUILD_ID", "dist/BUILD_ID"] {
            if let Ok(contents) = std::fs::read_to_string(project.join(marker)) {
                let trimmed = contents.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }

        let head = std::fs::read_to_string(project.join(".git/HEAD")).ok()?;
        let head = head.trim();
        if let Some(reference) = head.strip_prefix("ref: ") {
            let resolved = std::fs::read_to_string(project.join(".git").join(reference)).ok()?;
            let resolved = resolved.trim();
            (!resolved.is_empty()).then(|| resolved.to_string())
        } else {
            (!head.is_empty()).then(|| head.to_string())
        }
    }

    fn load_previous_summary(&self) -> Option<RunSummary> {
        let path = self.config.output_dir.join("summary.json");
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Previous summary.json unreadable, diff disabled: {e}");
                None
            }
        }
    }

    /// The overall run timeout behaves exactly like cancellation
    fn spawn_run_timeout(&self) {
        if let Some(timeout_ms) = self.config.run_timeout_ms {
            let cancel = self.cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                if !cancel.is_cancelled() {
                    warn!("Run timeout of {timeout_ms} ms reached, cancelling");
                    cancel.cancel();
                }
            });
        }
    }

    /// Best-effort minimal summary for preparation failures
    async fn write_minimal_failure(&self, error: &AuditError) {
        let mut meta = RunMeta::new(RunStatus::Failed);
        meta.fatal_error = Some(ErrorInfo::from(error));
        let now = Utc::now();
        let summary = RunSummary {
            started_at: now,
            completed_at: now,
            elapsed_ms: 0,
            meta,
            targets: Vec::new(),
            aggregate_issues: Vec::new(),
            offenders: Vec::new(),
            diff: None,
        };
        let Ok(mut writer) = ArtifactWriter::new(&self.config.output_dir) else {
            return;
        };
        if let Ok(serialized) = report::to_canonical_json_pretty(&summary) {
            let _ = writer.write("summary.json", serialized.as_bytes(), false).await;
        }
    }
}

/// Whether a target result may enter the cache: no plugin failed whose
/// definition forbids caching failures.
fn cache_safe(registry: &PluginRegistry, result: &TargetResult) -> bool {
    !result.plugins.iter().any(|(id, plugin_result)| {
        plugin_result.status == PluginStatus::Failed
            && registry.get(id).is_none_or(|p| !p.cacheable())
    })
}

fn cancelled_result(target: &Target, fingerprint: Option<String>) -> TargetResult {
    let outcome = TargetOutcome::cancelled();
    TargetResult {
        target: target.clone(),
        fingerprint,
        started_at: Utc::now(),
        duration_ms: 0,
        scores: collect_scores(&outcome.plugins),
        core_metrics: CoreMetrics::default(),
        plugins: outcome.plugins,
        from_cache: false,
        retries: 0,
        error: outcome.error,
    }
}

/// Reduced summary: per-plugin artifacts and issue bodies dropped, metrics
/// and top-level issue data kept.
fn summary_lite(summary: &RunSummary) -> serde_json::Value {
    let targets: Vec<serde_json::Value> = summary
        .targets
        .iter()
        .map(|t| {
            let metrics: std::collections::BTreeMap<&String, &std::collections::BTreeMap<String, crate::plugin::MetricValue>> = t
                .plugins
                .iter()
                .map(|(id, r)| (id, &r.metrics))
                .collect();
            serde_json::json!({
                "target": t.target,
                "scores": t.scores,
                "coreMetrics": t.core_metrics,
                "fromCache": t.from_cache,
                "retries": t.retries,
                "durationMs": t.duration_ms,
                "metrics": metrics,
                "error": t.error,
            })
        })
        .collect();

    serde_json::json!({
        "startedAt": summary.started_at,
        "completedAt": summary.completed_at,
        "elapsedMs": summary.elapsed_ms,
        "meta": summary.meta,
        "targets": targets,
        "issues": summary.aggregate_issues.iter().map(|i| serde_json::json!({
            "id": i.id,
            "severity": i.severity,
            "category": i.category,
            "title": i.title,
            "offenders": i.offenders.len(),
        })).collect::<Vec<_>>(),
    })
}
