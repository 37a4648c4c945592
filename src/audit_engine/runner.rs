//! Target execution behind the runner seam
//!
//! The orchestrator schedules targets; a [`TargetRunner`] actually produces
//! plugin results for one. The browser-backed runner acquires a session,
//! establishes an execution context, and drives the plugin scheduler,
//! retrying transient failures per policy. Tests substitute scripted
//! runners so scheduling behavior is exercised without Chrome.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::context::{ContextOptions, ExecutionContext};
use super::retry::{ErrorClass, RetryPolicy, classify};
use super::scheduler::run_plugins;
use crate::config::AuditConfig;
use crate::error::{AuditError, ErrorInfo, ErrorKind};
use crate::plugin::{PluginRegistry, PluginResult};
use crate::session_pool::SessionPool;
use crate::target::Target;

/// What one target execution produced
#[derive(Debug, Clone)]
pub struct TargetOutcome {
    pub plugins: BTreeMap<String, PluginResult>,
    pub retries: u32,
    /// Target-level failure after retries were exhausted
    pub error: Option<ErrorInfo>,
}

impl TargetOutcome {
    /// Outcome for a target that never ran because the run was cancelled
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            plugins: BTreeMap::new(),
            retries: 0,
            error: Some(ErrorInfo::new(ErrorKind::Cancelled, "audit cancelled")),
        }
    }
}

/// Executes one target end to end
#[async_trait]
pub trait TargetRunner: Send + Sync {
    /// Run all active plugins against the target. `discard_session` forces
    /// the browser session used for this target to be destroyed afterwards
    /// (set after repeated failures on one worker slot).
    async fn run_target(
        &self,
        target: &Target,
        discard_session: bool,
        cancel: &CancellationToken,
    ) -> TargetOutcome;
}

/// Production runner: browser session pool + execution context + scheduler
pub struct BrowserTargetRunner {
    pool: Arc<SessionPool>,
    registry: PluginRegistry,
    base_url: String,
    plugin_budget: Duration,
    audit_timeout: Duration,
    retry: RetryPolicy,
    context_options: ContextOptions,
}

impl BrowserTargetRunner {
    #[must_use]
    pub fn new(pool: Arc<SessionPool>, registry: PluginRegistry, config: &AuditConfig) -> Self {
        let context_options = ContextOptions {
            collect_coverage: registry.needs_coverage(),
            ..ContextOptions::default()
        };
        Self {
            pool,
            registry,
            base_url: config.base_url.clone(),
            plugin_budget: Duration::from_millis(config.plugin_budget_ms),
            audit_timeout: Duration::from_millis(config.audit_timeout_ms),
            retry: RetryPolicy::default(),
            context_options,
        }
    }

    /// One attempt: acquire, navigate, run plugins, release.
    async fn attempt(
        &self,
        target: &Target,
        discard_session: bool,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, PluginResult>, AuditError> {
        let session = self.pool.acquire(target).await?;
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), target.path);

        let attempt_result = async {
            let mut ctx = ExecutionContext::establish(
                &session,
                target.clone(),
                url,
                self.pool_simulated_multipliers(),
                self.context_options,
                cancel.clone(),
            )
            .await?;

            if !ctx.navigation.succeeded {
                let detail = ctx
                    .navigation
                    .error
                    .clone()
                    .unwrap_or_else(|| "navigation failed".into());
                return Err(AuditError::Navigation(detail));
            }
            if let Some(status) = ctx.navigation.status {
                if status >= 400 {
                    return Err(AuditError::Navigation(format!(
                        "document returned http {status}"
                    )));
                }
            }

            Ok(run_plugins(&self.registry, &mut ctx, self.plugin_budget).await)
        };

        let result = tokio::time::timeout(self.audit_timeout, attempt_result)
            .await
            .unwrap_or_else(|_| {
                Err(AuditError::Timeout(format!(
                    "target exceeded {} ms audit ceiling",
                    self.audit_timeout.as_millis()
                )))
            });

        // Session-level failures poison the session; plugin-level failures
        // do not.
        let healthy = !discard_session
            && !matches!(
                &result,
                Err(AuditError::Session(_)) | Err(AuditError::Timeout(_))
            );
        self.pool.release(session, healthy).await;

        result
    }

    fn pool_simulated_multipliers(&self) -> Option<crate::session_pool::SimulatedMultipliers> {
        // The pool owns the throttle profile; re-derive the multipliers it
        // exposes for simulate mode.
        self.pool.throttle_profile().simulated_multipliers()
    }

    /// Fill a plugin map marking every active plugin failed, used when the
    /// session layer exhausted its retries.
    fn all_failed(&self, error: &AuditError) -> BTreeMap<String, PluginResult> {
        let info = ErrorInfo::new(
            match error.kind() {
                ErrorKind::Cancelled => ErrorKind::Cancelled,
                ErrorKind::Navigation => ErrorKind::Navigation,
                ErrorKind::Timeout => ErrorKind::Timeout,
                _ => ErrorKind::Session,
            },
            error.to_string(),
        );
        self.registry
            .plugin_set()
            .into_iter()
            .map(|(id, _)| (id.clone(), PluginResult::failed(&id, info.clone())))
            .collect()
    }
}

#[async_trait]
impl TargetRunner for BrowserTargetRunner {
    async fn run_target(
        &self,
        target: &Target,
        discard_session: bool,
        cancel: &CancellationToken,
    ) -> TargetOutcome {
        let mut attempt_index: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return TargetOutcome::cancelled();
            }

            match self.attempt(target, discard_session, cancel).await {
                Ok(plugins) => {
                    return TargetOutcome {
                        plugins,
                        retries: attempt_index,
                        error: None,
                    };
                }
                Err(error) => {
                    let class = classify(&error);
                    if self.retry.should_retry(attempt_index, class) {
                        let delay = self.retry.next_delay(attempt_index);
                        debug!(
                            "Target {} attempt {} failed ({error}), retrying in {delay:?}",
                            target.target_ref(),
                            attempt_index + 1
                        );
                        tokio::time::sleep(delay).await;
                        attempt_index += 1;
                        continue;
                    }

                    warn!(
                        "Target {} failed after {} attempt(s): {error}",
                        target.target_ref(),
                        attempt_index + 1
                    );
                    let plugins = if class == ErrorClass::Fatal && error.kind() == ErrorKind::Cancelled
                    {
                        BTreeMap::new()
                    } else {
                        self.all_failed(&error)
                    };
                    return TargetOutcome {
                        plugins,
                        retries: attempt_index,
                        error: Some(ErrorInfo::from(&error)),
                    };
                }
            }
        }
    }
}
