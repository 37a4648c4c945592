//! Unused-JavaScript auditor
//!
//! Consumes the JS coverage collected during the audit reload and reports
//! scripts that ship mostly unexecuted bytes. Reads the per-script transfer
//! sizes published by `page-weight` to express impact in transferred bytes
//! rather than source bytes.

use async_trait::async_trait;

use crate::audit_engine::context::ExecutionContext;
use crate::plugin::{
    AuditPlugin, Category, Issue, Offender, PluginCapabilities, PluginResult, Severity,
};

/// Scripts wasting fewer bytes than this are ignored
const MIN_WASTE_BYTES: u64 = 50 * 1024;
/// Unused fraction above which a script is reported
const MIN_WASTE_RATIO: f64 = 0.5;

pub struct CoverageWastePlugin;

#[async_trait]
impl AuditPlugin for CoverageWastePlugin {
    fn id(&self) -> &str {
        "coverage-waste"
    }

    fn version(&self) -> &str {
        "0.9.0"
    }

    fn depends_on(&self) -> &[&str] {
        &["page-weight"]
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            needs_coverage: true,
            needs_coverage_reload: true,
            needs_network: true,
            ..PluginCapabilities::default()
        }
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<PluginResult> {
        let coverage = ctx
            .coverage
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("coverage data unavailable for this target"))?;

        let transfer_sizes = ctx
            .shared("page-weight")
            .and_then(|v| v.get("scriptBytes"))
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let mut total_unused: u64 = 0;
        let mut offenders: Vec<Offender> = Vec::new();

        for script in coverage {
            let unused = script.unused_bytes();
            total_unused += unused;
            if script.total_bytes == 0 {
                continue;
            }
            let ratio = unused as f64 / script.total_bytes as f64;
            if unused < MIN_WASTE_BYTES || ratio < MIN_WASTE_RATIO {
                continue;
            }
            // Scale waste to transferred bytes when the script's transfer
            // size is known; source bytes otherwise.
            let impact = transfer_sizes
                .get(&script.url)
                .and_then(serde_json::Value::as_u64)
                .map_or(unused, |transfer| {
                    (ratio * transfer as f64) as u64
                });
            offenders.push(
                Offender::new(
                    script.url.clone(),
                    format!("{:.0}% of the script never executed", ratio * 100.0),
                )
                .with_impact_bytes(impact),
            );
        }

        let mut result = PluginResult::ok(self.id())
            .with_metric("unusedBytes", total_unused)
            .with_metric("scriptsAnalyzed", coverage.len() as u64);

        if !offenders.is_empty() {
            offenders.sort_by(|a, b| b.impact_bytes.cmp(&a.impact_bytes));
            let wasted_kib: u64 = offenders
                .iter()
                .filter_map(|o| o.impact_bytes)
                .sum::<u64>()
                / 1024;
            result = result.with_issue(Issue {
                id: "unused-javascript".into(),
                severity: if wasted_kib > 512 {
                    Severity::High
                } else {
                    Severity::Medium
                },
                category: Category::Performance,
                title: "Unused JavaScript shipped to the page".into(),
                description: format!(
                    "{wasted_kib} KiB of shipped JavaScript never executed during load"
                ),
                offenders,
                fix: None,
            });
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_engine::context::{NavigationResult, ScriptCoverage};
    use crate::target::{Device, Scope, Target};
    use std::collections::BTreeMap;

    fn ctx_with_coverage(coverage: Vec<ScriptCoverage>) -> ExecutionContext {
        let mut ctx = ExecutionContext::detached(
            Target {
                path: "/".into(),
                label: "home".into(),
                device: Device::Mobile,
                scope: Scope::Public,
            },
            NavigationResult {
                requested_url: "http://localhost:3000/".into(),
                final_url: "http://localhost:3000/".into(),
                status: Some(200),
                headers: BTreeMap::new(),
                succeeded: true,
                error: None,
            },
        );
        ctx.coverage = Some(coverage);
        ctx
    }

    #[tokio::test]
    async fn missing_coverage_fails_the_plugin() {
        let mut ctx = ctx_with_coverage(vec![]);
        ctx.coverage = None;
        assert!(CoverageWastePlugin.run(&mut ctx).await.is_err());
    }

    #[tokio::test]
    async fn mostly_unused_script_is_reported() {
        let mut ctx = ctx_with_coverage(vec![ScriptCoverage {
            url: "http://x.test/vendor.js".into(),
            total_bytes: 400 * 1024,
            used_bytes: 40 * 1024,
        }]);
        let result = CoverageWastePlugin.run(&mut ctx).await.expect("run");
        let issue = result
            .issues
            .first()
            .expect("unused-javascript issue");
        assert_eq!(issue.id, "unused-javascript");
        assert_eq!(issue.offenders[0].url, "http://x.test/vendor.js");
    }

    #[tokio::test]
    async fn well_used_scripts_produce_no_issue() {
        let mut ctx = ctx_with_coverage(vec![ScriptCoverage {
            url: "http://x.test/app.js".into(),
            total_bytes: 400 * 1024,
            used_bytes: 390 * 1024,
        }]);
        let result = CoverageWastePlugin.run(&mut ctx).await.expect("run");
        assert!(result.issues.is_empty());
    }

    #[tokio::test]
    async fn impact_uses_transfer_size_when_shared() {
        let mut ctx = ctx_with_coverage(vec![ScriptCoverage {
            url: "http://x.test/vendor.js".into(),
            total_bytes: 1000 * 1024,
            used_bytes: 0,
        }]);
        ctx.set_shared(
            "page-weight",
            serde_json::json!({"scriptBytes": {"http://x.test/vendor.js": 102_400u64}}),
        );
        let result = CoverageWastePlugin.run(&mut ctx).await.expect("run");
        let offender = &result.issues[0].offenders[0];
        // 100% unused of a 100 KiB transfer
        assert_eq!(offender.impact_bytes, Some(102_400));
    }
}
