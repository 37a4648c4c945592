//! Plugin output data model
//!
//! Every auditor, built-in or external, reports through these types. The
//! severity and category vocabularies are closed: unknown values coming from
//! plugin JSON are coerced to `low` / `other` rather than rejected.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::ErrorInfo;

/// Issue severity, closed vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Sort rank, most severe first
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Parse with coercion: anything outside the vocabulary becomes `Low`.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            "low" => Self::Low,
            _ => Self::Low,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str_lossy(&s))
    }
}

/// Audit category, closed vocabulary shared by scores, issues, and budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Performance,
    Accessibility,
    Seo,
    Security,
    BestPractices,
    Other,
}

impl Category {
    pub const ALL: [Self; 6] = [
        Self::Performance,
        Self::Accessibility,
        Self::Seo,
        Self::Security,
        Self::BestPractices,
        Self::Other,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Accessibility => "accessibility",
            Self::Seo => "seo",
            Self::Security => "security",
            Self::BestPractices => "best-practices",
            Self::Other => "other",
        }
    }

    /// Parse with coercion: anything outside the vocabulary becomes `Other`.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "performance" => Self::Performance,
            "accessibility" => Self::Accessibility,
            "seo" => Self::Seo,
            "security" => Self::Security,
            "best-practices" | "best_practices" => Self::BestPractices,
            "other" => Self::Other,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Category {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Category {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_str_lossy(&s))
    }
}

/// A metric value: numeric or free-form text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<u64> for MetricValue {
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for MetricValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A specific resource identified as the cause of an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offender {
    pub url: String,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub impact_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub impact_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub count: Option<u64>,
}

impl Offender {
    #[must_use]
    pub fn new(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            detail: detail.into(),
            impact_ms: None,
            impact_bytes: None,
            count: None,
        }
    }

    #[must_use]
    pub fn with_impact_bytes(mut self, bytes: u64) -> Self {
        self.impact_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_impact_ms(mut self, ms: f64) -> Self {
        self.impact_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }
}

/// Estimated fix effort attached to an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixDifficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    pub difficulty: FixDifficulty,
    pub minutes_estimate: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub example: Option<String>,
}

/// One finding produced by a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Stable identifier within the plugin, e.g. `missing-csp`
    pub id: String,
    pub severity: Severity,
    pub category: Category,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub offenders: Vec<Offender>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fix: Option<Fix>,
}

/// Whether a plugin ran, failed, or was skipped due to a failed dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Ok,
    Failed,
    Skipped,
}

/// Auxiliary file emitted by a plugin, persisted by the artifact writer
/// under a subdirectory named by plugin id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginArtifact {
    pub name: String,
    /// Where the artifact was written; filled in by the writer
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub path: Option<PathBuf>,
    /// In-memory payload waiting to be persisted. Not serialized.
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
}

impl PluginArtifact {
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            path: None,
            bytes: Some(bytes),
        }
    }
}

/// Canonical output of one plugin run on one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginResult {
    pub plugin_id: String,
    pub status: PluginStatus,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub artifacts: Vec<PluginArtifact>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorInfo>,
}

impl PluginResult {
    #[must_use]
    pub fn ok(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            status: PluginStatus::Ok,
            metrics: BTreeMap::new(),
            issues: Vec::new(),
            artifacts: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(plugin_id: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            status: PluginStatus::Failed,
            metrics: BTreeMap::new(),
            issues: Vec::new(),
            artifacts: Vec::new(),
            error: Some(error),
        }
    }

    #[must_use]
    pub fn skipped(plugin_id: impl Into<String>, error: ErrorInfo) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            status: PluginStatus::Skipped,
            metrics: BTreeMap::new(),
            issues: Vec::new(),
            artifacts: Vec::new(),
            error: Some(error),
        }
    }

    #[must_use]
    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<MetricValue>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }
}

/// Static capability declaration for a plugin.
///
/// Drives context preparation: coverage collection requires a page reload,
/// so it only happens when some active plugin asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginCapabilities {
    pub needs_coverage: bool,
    pub needs_network: bool,
    pub needs_axe: bool,
    pub needs_coverage_reload: bool,
}
