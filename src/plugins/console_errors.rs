//! Runtime error and console noise auditor

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::audit_engine::context::{ConsoleLevel, ExecutionContext};
use crate::plugin::{
    AuditPlugin, Category, Issue, Offender, PluginResult, Severity,
};

/// Rolls captured console output into issues: uncaught exceptions are
/// critical, console errors high, warnings low.
pub struct ConsoleErrorsPlugin;

#[async_trait]
impl AuditPlugin for ConsoleErrorsPlugin {
    fn id(&self) -> &str {
        "console-errors"
    }

    fn version(&self) -> &str {
        "1.1.0"
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<PluginResult> {
        let mut exceptions: BTreeMap<String, u64> = BTreeMap::new();
        let mut errors: BTreeMap<String, u64> = BTreeMap::new();
        let mut warnings: u64 = 0;

        for entry in &ctx.console_log {
            let source = entry
                .source_url
                .clone()
                .unwrap_or_else(|| ctx.navigation.final_url.clone());
            match entry.level {
                ConsoleLevel::Exception => {
                    *exceptions.entry(source).or_insert(0) += 1;
                }
                ConsoleLevel::Error => {
                    *errors.entry(source).or_insert(0) += 1;
                }
                ConsoleLevel::Warning => warnings += 1,
                _ => {}
            }
        }

        let exception_count: u64 = exceptions.values().sum();
        let error_count: u64 = errors.values().sum();

        let mut result = PluginResult::ok(self.id())
            .with_metric("exceptions", exception_count)
            .with_metric("consoleErrors", error_count)
            .with_metric("consoleWarnings", warnings);

        if exception_count > 0 {
            result = result.with_issue(Issue {
                id: "uncaught-exception".into(),
                severity: Severity::Critical,
                category: Category::BestPractices,
                title: "Uncaught runtime exceptions".into(),
                description: format!(
                    "{exception_count} uncaught exception(s) were thrown while loading the page"
                ),
                offenders: exceptions
                    .into_iter()
                    .map(|(url, count)| {
                        Offender::new(url, "uncaught exception").with_count(count)
                    })
                    .collect(),
                fix: None,
            });
        }

        if error_count > 0 {
            result = result.with_issue(Issue {
                id: "console-error".into(),
                severity: Severity::High,
                category: Category::BestPractices,
                title: "Console errors during load".into(),
                description: format!("{error_count} console.error call(s) during page load"),
                offenders: errors
                    .into_iter()
                    .map(|(url, count)| Offender::new(url, "console.error").with_count(count))
                    .collect(),
                fix: None,
            });
        }

        if warnings > 0 {
            result = result.with_issue(Issue {
                id: "console-warning".into(),
                severity: Severity::Low,
                category: Category::BestPractices,
                title: "Console warnings during load".into(),
                description: format!("{warnings} console warning(s) during page load"),
                offenders: vec![
                    Offender::new(ctx.navigation.final_url.clone(), "console.warn")
                        .with_count(warnings),
                ],
                fix: None,
            });
        }

        Ok(result)
    }
}
