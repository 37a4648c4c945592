//! Fluent builder for [`AuditConfig`]
//!
//! The required base URL is taken at construction so a half-built config
//! cannot exist; `build()` runs the same structural validation the
//! orchestrator repeats during preparation.

use std::path::PathBuf;

use super::types::{AuditConfig, Budgets, PageConfig, Parallelism, PluginFilter, ThrottlingMethod};
use crate::error::AuditResult;
use crate::target::{Device, Scope};

pub struct AuditConfigBuilder {
    config: AuditConfig,
}

impl AuditConfigBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            config: AuditConfig {
                base_url: base_url.into(),
                ..AuditConfig::default()
            },
        }
    }

    /// Add a page audited on the given devices
    #[must_use]
    pub fn page(
        mut self,
        path: impl Into<String>,
        label: impl Into<String>,
        devices: &[Device],
    ) -> Self {
        self.config.pages.push(PageConfig {
            path: path.into(),
            label: label.into(),
            devices: devices.to_vec(),
            scope: Scope::default(),
        });
        self
    }

    /// Add a page with an explicit scope
    #[must_use]
    pub fn scoped_page(
        mut self,
        path: impl Into<String>,
        label: impl Into<String>,
        devices: &[Device],
        scope: Scope,
    ) -> Self {
        self.config.pages.push(PageConfig {
            path: path.into(),
            label: label.into(),
            devices: devices.to_vec(),
            scope,
        });
        self
    }

    #[must_use]
    pub fn throttling_method(mut self, method: ThrottlingMethod) -> Self {
        self.config.throttling_method = method;
        self
    }

    #[must_use]
    pub fn cpu_slowdown_multiplier(mut self, multiplier: u32) -> Self {
        self.config.cpu_slowdown_multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn parallel(mut self, parallel: Parallelism) -> Self {
        self.config.parallel = parallel;
        self
    }

    #[must_use]
    pub fn warm_up(mut self, enabled: bool) -> Self {
        self.config.warm_up = enabled;
        self
    }

    #[must_use]
    pub fn incremental(mut self, enabled: bool) -> Self {
        self.config.incremental = enabled;
        self
    }

    #[must_use]
    pub fn build_id(mut self, build_id: impl Into<String>) -> Self {
        self.config.build_id = Some(build_id.into());
        self
    }

    #[must_use]
    pub fn audit_timeout_ms(mut self, ms: u64) -> Self {
        self.config.audit_timeout_ms = ms;
        self
    }

    #[must_use]
    pub fn plugin_budget_ms(mut self, ms: u64) -> Self {
        self.config.plugin_budget_ms = ms;
        self
    }

    #[must_use]
    pub fn run_timeout_ms(mut self, ms: u64) -> Self {
        self.config.run_timeout_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn grace_period_ms(mut self, ms: u64) -> Self {
        self.config.grace_period_ms = ms;
        self
    }

    #[must_use]
    pub fn budgets(mut self, budgets: Budgets) -> Self {
        self.config.budgets = budgets;
        self
    }

    #[must_use]
    pub fn diff_threshold(mut self, points: u8) -> Self {
        self.config.diff_threshold = points;
        self
    }

    #[must_use]
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    #[must_use]
    pub fn plugin_filter(mut self, filter: PluginFilter) -> Self {
        self.config.plugins = Some(filter);
        self
    }

    #[must_use]
    pub fn project_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.project_dir = dir.into();
        self
    }

    #[must_use]
    pub fn browser_ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.browser_ws_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn fail_on_budget(mut self, enabled: bool) -> Self {
        self.config.fail_on_budget = enabled;
        self
    }

    #[must_use]
    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    /// Validate and return the finished configuration
    pub fn build(self) -> AuditResult<AuditConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_produces_valid_config() {
        let config = AuditConfigBuilder::new("http://localhost:3000")
            .page("/", "home", &[Device::Mobile, Device::Desktop])
            .parallel(Parallelism::Fixed(2))
            .incremental(true)
            .build_id("bid1")
            .build()
            .expect("valid config");
        assert_eq!(config.pages.len(), 1);
        assert_eq!(config.build_id.as_deref(), Some("bid1"));
    }

    #[test]
    fn builder_rejects_bad_base_url() {
        let err = AuditConfigBuilder::new("ftp://example.com")
            .build()
            .expect_err("non-http scheme");
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn builder_rejects_zero_parallel() {
        assert!(
            AuditConfigBuilder::new("http://localhost:3000")
                .parallel(Parallelism::Fixed(0))
                .build()
                .is_err()
        );
    }
}
