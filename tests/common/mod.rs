//! Shared helpers for integration tests
//!
//! Provides a scripted [`TargetRunner`] so orchestration behavior can be
//! exercised without launching Chrome, plus builders for configs and
//! results.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use signaler::audit_engine::{TargetOutcome, TargetRunner};
use signaler::error::{ErrorInfo, ErrorKind};
use signaler::plugin::PluginResult;
use signaler::target::Target;
use signaler::{AuditConfig, AuditConfigBuilder, Device};

/// What the scripted runner should do for one target
#[derive(Clone)]
pub enum Script {
    /// Succeed with the given plugin results
    Ok(Vec<PluginResult>),
    /// Fail at the session layer after the given retry count
    SessionFailure { retries: u32 },
    /// Take this long before succeeding
    Slow(Duration),
}

/// Runner that replays scripted outcomes and counts invocations
pub struct ScriptedRunner {
    default_script: Script,
    per_path: BTreeMap<String, Script>,
    pub invocations: AtomicUsize,
}

impl ScriptedRunner {
    pub fn ok_with(plugins: Vec<PluginResult>) -> Arc<Self> {
        Arc::new(Self {
            default_script: Script::Ok(plugins),
            per_path: BTreeMap::new(),
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn with_scripts(default_script: Script, per_path: BTreeMap<String, Script>) -> Arc<Self> {
        Arc::new(Self {
            default_script,
            per_path,
            invocations: AtomicUsize::new(0),
        })
    }

    pub fn invocation_count(&self) -> usize {
        self.invocations.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TargetRunner for ScriptedRunner {
    async fn run_target(
        &self,
        target: &Target,
        _discard_session: bool,
        cancel: &CancellationToken,
    ) -> TargetOutcome {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        if cancel.is_cancelled() {
            return TargetOutcome::cancelled();
        }
        let script = self
            .per_path
            .get(&target.path)
            .unwrap_or(&self.default_script)
            .clone();
        match script {
            Script::Ok(plugins) => TargetOutcome {
                plugins: plugins
                    .into_iter()
                    .map(|r| (r.plugin_id.clone(), r))
                    .collect(),
                retries: 0,
                error: None,
            },
            Script::SessionFailure { retries } => TargetOutcome {
                plugins: BTreeMap::new(),
                retries,
                error: Some(ErrorInfo::new(ErrorKind::Session, "scripted session failure")),
            },
            Script::Slow(delay) => {
                tokio::time::sleep(delay).await;
                TargetOutcome {
                    plugins: BTreeMap::new(),
                    retries: 0,
                    error: None,
                }
            }
        }
    }
}

/// Config pointing at a mock server and a temp output directory, with
/// warm-up off so tests control exactly which requests happen.
pub fn test_config(base_url: &str, output_dir: &std::path::Path, paths: &[&str]) -> AuditConfig {
    let mut builder = AuditConfigBuilder::new(base_url)
        .warm_up(false)
        .output_dir(output_dir);
    for path in paths {
        builder = builder.page(*path, path.trim_start_matches('/'), &[Device::Mobile]);
    }
    builder.build().expect("valid test config")
}

/// A plugin result carrying one category score metric
pub fn scored_result(plugin_id: &str, category: &str, score: f64) -> PluginResult {
    PluginResult::ok(plugin_id).with_metric(format!("score:{category}"), score)
}

/// Progress sink that records every emitted event
#[derive(Default)]
pub struct CollectingSink {
    events: parking_lot::Mutex<Vec<signaler::ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<signaler::ProgressEvent> {
        self.events.lock().clone()
    }
}

impl signaler::ProgressSink for CollectingSink {
    fn emit(&self, event: &signaler::ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}
