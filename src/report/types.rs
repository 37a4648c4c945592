//! Canonical result types
//!
//! These structures are the wire format of every artifact the run emits;
//! field names follow the external camelCase convention and all maps use
//! sorted keys so serialized output is deterministic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::ErrorInfo;
use crate::plugin::{Category, Issue, MetricValue, PluginResult, PluginStatus};
use crate::target::Target;

/// Core Web Vitals style metrics, collected from whichever plugins emit them
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lcp_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcp_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tbt_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cls: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inp_ms: Option<f64>,
}

impl CoreMetrics {
    /// Pull the well-known metric keys out of plugin outputs
    #[must_use]
    pub fn collect(plugins: &BTreeMap<String, PluginResult>) -> Self {
        let find = |key: &str| {
            plugins
                .values()
                .find_map(|r| r.metrics.get(key).and_then(MetricValue::as_number))
        };
        Self {
            lcp_ms: find("lcpMs"),
            fcp_ms: find("fcpMs"),
            tbt_ms: find("tbtMs"),
            cls: find("cls"),
            inp_ms: find("inpMs"),
        }
    }
}

/// Result of auditing one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub target: Target,
    /// Cache fingerprint; absent when the cache was disabled
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fingerprint: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub plugins: BTreeMap<String, PluginResult>,
    /// Category scores normalized to 0-100; null where not applicable
    pub scores: BTreeMap<Category, Option<u8>>,
    #[serde(default)]
    pub core_metrics: CoreMetrics,
    pub from_cache: bool,
    pub retries: u32,
    /// Target-level failure (session exhausted, cancelled)
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorInfo>,
}

impl TargetResult {
    /// A target counts as failed when it carries a target-level error or
    /// any of its plugins failed.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.error.is_some()
            || self
                .plugins
                .values()
                .any(|r| r.status == PluginStatus::Failed)
    }

    #[must_use]
    pub fn target_ref(&self) -> String {
        self.target.target_ref()
    }
}

/// Normalize per-plugin `score:<category>` metrics into category scores.
///
/// Every category appears in the map; categories no plugin scored stay
/// `None`. Multiple plugins scoring the same category are averaged.
#[must_use]
pub fn collect_scores(plugins: &BTreeMap<String, PluginResult>) -> BTreeMap<Category, Option<u8>> {
    let mut scores: BTreeMap<Category, Option<u8>> = BTreeMap::new();
    for category in Category::ALL {
        let key = format!("score:{category}");
        let values: Vec<f64> = plugins
            .values()
            .filter(|r| r.status == PluginStatus::Ok)
            .filter_map(|r| r.metrics.get(&key).and_then(MetricValue::as_number))
            .collect();
        let score = if values.is_empty() {
            None
        } else {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            Some(mean.round().clamp(0.0, 100.0) as u8)
        };
        scores.insert(category, score);
    }
    scores
}

/// Overall run outcome as reported in `meta.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Partial,
    Failed,
    Cancelled,
}

/// Record of one artifact write attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub name: String,
    pub path: PathBuf,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub bytes: Option<u64>,
}

/// Run-level metadata carried in the summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMeta {
    pub tool_version: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub build_id: Option<String>,
    /// Active (plugin id, version) pairs
    #[serde(default)]
    pub plugin_set: Vec<(String, String)>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fatal_error: Option<ErrorInfo>,
}

impl RunMeta {
    #[must_use]
    pub fn new(status: RunStatus) -> Self {
        Self {
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            status,
            build_id: None,
            plugin_set: Vec::new(),
            artifacts: Vec::new(),
            warnings: Vec::new(),
            fatal_error: None,
        }
    }
}

/// Where an offender was observed: target plus the plugin that reported it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffenderHit {
    pub target_ref: String,
    pub evidence_ref: String,
}

/// One offender coalesced across targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffenderRollup {
    /// Normalized URL plus category
    pub key: String,
    pub url: String,
    pub category: Category,
    pub hits: Vec<OffenderHit>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_impact_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total_impact_bytes: Option<u64>,
    /// Same offender observed on three or more targets
    pub systemic: bool,
}

/// One (target, category) score key used by the diff
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreKey {
    pub target_ref: String,
    pub category: Category,
}

/// One score movement between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDelta {
    pub target_ref: String,
    pub category: Category,
    pub delta: i32,
}

/// Comparison against the previous run's summary
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiffReport {
    /// Non-zero deltas on the intersection of (path, device, category)
    pub score_deltas: Vec<ScoreDelta>,
    /// Negative deltas whose magnitude exceeds the threshold
    pub regressions: Vec<ScoreDelta>,
    /// Positive deltas whose magnitude exceeds the threshold
    pub improvements: Vec<ScoreDelta>,
    pub added: Vec<ScoreKey>,
    pub removed: Vec<ScoreKey>,
}

impl DiffReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.score_deltas.is_empty()
            && self.regressions.is_empty()
            && self.improvements.is_empty()
            && self.added.is_empty()
            && self.removed.is_empty()
    }
}

/// The canonical output of one audit run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub meta: RunMeta,
    pub targets: Vec<TargetResult>,
    /// Issues merged across targets with offenders rolled up
    pub aggregate_issues: Vec<Issue>,
    pub offenders: Vec<OffenderRollup>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diff: Option<DiffReport>,
}
