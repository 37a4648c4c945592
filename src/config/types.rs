//! Core configuration types for audit runs
//!
//! This module contains the main `AuditConfig` struct and its associated
//! types. Field names mirror the external JSON configuration (camelCase on
//! the wire).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::plugin::Category;
use crate::target::{Device, Scope};

/// How network/CPU throttling is applied to audit sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThrottlingMethod {
    /// Synthetic CPU + network multipliers applied to observed metrics
    #[default]
    Simulate,
    /// Live CDP throttling on the browser session
    Devtools,
}

/// Worker parallelism: a fixed count or auto-tuned from machine resources.
///
/// On the wire this is either the string `"auto"` or a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parallelism {
    #[default]
    Auto,
    Fixed(usize),
}

impl Serialize for Parallelism {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Auto => serializer.serialize_str("auto"),
            Self::Fixed(n) => serializer.serialize_u64(*n as u64),
        }
    }
}

impl<'de> Deserialize<'de> for Parallelism {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) if s == "auto" => Ok(Self::Auto),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(|v| Self::Fixed(v as usize))
                .ok_or_else(|| D::Error::custom("parallel must be a positive integer")),
            other => Err(D::Error::custom(format!(
                "parallel must be \"auto\" or a positive integer, got {other}"
            ))),
        }
    }
}

/// One configured page to audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageConfig {
    /// URL path, must begin with `/`
    pub path: String,
    /// Human-readable label used in reports
    #[serde(default)]
    pub label: String,
    /// Devices to audit this page on
    pub devices: Vec<Device>,
    /// Whether the page is publicly reachable or requires auth
    #[serde(default)]
    pub scope: Scope,
}

/// Minimum category scores and maximum metric values used to gate CI exit
/// status when fail-on-budget mode is on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Budgets {
    /// Category -> minimum acceptable score (0-100)
    #[serde(default)]
    pub categories: BTreeMap<Category, u8>,
    /// Metric name (e.g. `lcpMs`, `cls`) -> maximum acceptable value
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

impl Budgets {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.metrics.is_empty()
    }
}

/// Optional allow/deny filtering of registered plugins by id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PluginFilter {
    /// When set, only these plugin ids run
    #[serde(default)]
    pub allow: Option<Vec<String>>,
    /// These plugin ids never run
    #[serde(default)]
    pub deny: Vec<String>,
}

impl PluginFilter {
    /// Whether a plugin id passes this filter
    #[must_use]
    pub fn permits(&self, id: &str) -> bool {
        if self.deny.iter().any(|d| d == id) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.iter().any(|a| a == id),
            None => true,
        }
    }
}

/// Main configuration struct for audit runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditConfig {
    /// Absolute http(s) base URL the targets are resolved against. Required.
    pub base_url: String,
    /// Pages to audit, expanded to one target per (path, device)
    pub pages: Vec<PageConfig>,
    pub throttling_method: ThrottlingMethod,
    /// CPU slowdown factor, positive. Default 4.
    pub cpu_slowdown_multiplier: u32,
    /// Worker parallelism (`auto` or a positive integer)
    pub parallel: Parallelism,
    /// Prime server/CDN caches with one GET per unique path before auditing
    pub warm_up: bool,
    /// Reuse cached per-target results keyed by build fingerprint
    pub incremental: bool,
    /// Build identifier; when absent the orchestrator attempts framework/VCS
    /// derivation and disables the cache if none resolves.
    pub build_id: Option<String>,
    /// Per-target wall-clock ceiling in milliseconds. Default 120 000.
    pub audit_timeout_ms: u64,
    /// Per-plugin wall-clock budget in milliseconds. Default 30 000.
    pub plugin_budget_ms: u64,
    /// Overall run ceiling; `None` means unbounded. Firing behaves like
    /// cancellation.
    pub run_timeout_ms: Option<u64>,
    /// Grace window granted to in-flight targets after cancellation.
    pub grace_period_ms: u64,
    /// Score/metric budgets gating CI exit status
    pub budgets: Budgets,
    /// Absolute delta (score points) above which a score change counts as a
    /// regression or improvement. Default 3.
    pub diff_threshold: u8,
    /// Directory the artifact bundle is written into. Default `.signaler`.
    pub output_dir: PathBuf,
    /// Optional allow/deny list of plugin ids
    pub plugins: Option<PluginFilter>,
    /// Project directory searched for framework build markers and VCS state
    /// when `build_id` is absent.
    pub project_dir: PathBuf,
    /// Attach to an externally managed browser over this CDP websocket URL
    /// instead of launching sessions. Forces the worker cap to 1.
    pub browser_ws_url: Option<String>,
    /// Exit 2 instead of 0 when any budget is violated
    pub fail_on_budget: bool,
    /// Run browser sessions headless. Default true.
    pub headless: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            pages: Vec::new(),
            throttling_method: ThrottlingMethod::Simulate,
            cpu_slowdown_multiplier: 4,
            parallel: Parallelism::Auto,
            warm_up: true,
            incremental: false,
            build_id: None,
            audit_timeout_ms: 120_000,
            plugin_budget_ms: 30_000,
            run_timeout_ms: None,
            grace_period_ms: 5_000,
            budgets: Budgets::default(),
            diff_threshold: 3,
            output_dir: PathBuf::from(".signaler"),
            plugins: None,
            project_dir: PathBuf::from("."),
            browser_ws_url: None,
            fail_on_budget: false,
            headless: true,
        }
    }
}

impl AuditConfig {
    /// Start building a config with the required base URL
    pub fn builder(base_url: impl Into<String>) -> super::AuditConfigBuilder {
        super::AuditConfigBuilder::new(base_url)
    }

    /// Structural validation: well-formed base URL, rooted paths, positive
    /// multipliers, unique `(path, device)` pairs.
    ///
    /// Reachability of the base URL is probed separately during preparation.
    pub fn validate(&self) -> crate::error::AuditResult<()> {
        use crate::error::AuditError;

        let parsed = url::Url::parse(&self.base_url)
            .map_err(|e| AuditError::Config(format!("invalid baseUrl {:?}: {e}", self.base_url)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AuditError::Config(format!(
                "baseUrl must be http(s), got {:?}",
                parsed.scheme()
            )));
        }

        if self.cpu_slowdown_multiplier == 0 {
            return Err(AuditError::Config(
                "cpuSlowdownMultiplier must be positive".into(),
            ));
        }
        if let Parallelism::Fixed(0) = self.parallel {
            return Err(AuditError::Config("parallel must be positive".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for page in &self.pages {
            if !page.path.starts_with('/') {
                return Err(AuditError::Config(format!(
                    "page path {:?} must begin with '/'",
                    page.path
                )));
            }
            for device in &page.devices {
                if !seen.insert((page.path.clone(), *device)) {
                    return Err(AuditError::Config(format!(
                        "duplicate target ({}, {device})",
                        page.path
                    )));
                }
            }
        }

        Ok(())
    }

    /// Base URL joined with a target path
    #[must_use]
    pub fn page_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}
