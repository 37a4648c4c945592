//! Transfer-size auditor
//!
//! Accounts transferred bytes per resource type from the network log,
//! flags heavy pages and oversized single resources, and publishes the
//! per-script byte map into shared state for the coverage auditor.

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::audit_engine::context::ExecutionContext;
use crate::plugin::{
    AuditPlugin, Category, Issue, Offender, PluginCapabilities, PluginResult, Severity,
};

/// Above this total the page counts as heavy
const HEAVY_PAGE_BYTES: u64 = 2 * 1024 * 1024;
/// Single resources above this are reported individually
const LARGE_RESOURCE_BYTES: u64 = 500 * 1024;
/// Total at (or above) which the performance score bottoms out
const SCORE_FLOOR_BYTES: f64 = 8.0 * 1024.0 * 1024.0;
/// Total at (or below) which the score stays at 100
const SCORE_CEIL_BYTES: f64 = 1024.0 * 1024.0;

pub struct PageWeightPlugin;

#[async_trait]
impl AuditPlugin for PageWeightPlugin {
    fn id(&self) -> &str {
        "page-weight"
    }

    fn version(&self) -> &str {
        "1.2.0"
    }

    fn capabilities(&self) -> PluginCapabilities {
        PluginCapabilities {
            needs_network: true,
            ..PluginCapabilities::default()
        }
    }

    async fn run(&self, ctx: &mut ExecutionContext) -> anyhow::Result<PluginResult> {
        let mut total: u64 = 0;
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut script_bytes: BTreeMap<String, u64> = BTreeMap::new();
        let mut large: Vec<Offender> = Vec::new();

        for entry in &ctx.network_log {
            total += entry.transfer_bytes;
            let kind = entry
                .resource_type
                .clone()
                .unwrap_or_else(|| "other".into());
            *by_type.entry(kind.clone()).or_insert(0) += entry.transfer_bytes;
            if kind == "script" {
                script_bytes.insert(entry.url.clone(), entry.transfer_bytes);
            }
            if entry.transfer_bytes >= LARGE_RESOURCE_BYTES {
                large.push(
                    Offender::new(
                        entry.url.clone(),
                        format!("{} transferred {} KiB", kind, entry.transfer_bytes / 1024),
                    )
                    .with_impact_bytes(entry.transfer_bytes),
                );
            }
        }

        // Published for coverage-waste, which declares the dependency
        ctx.set_shared(
            self.id(),
            serde_json::json!({ "scriptBytes": script_bytes }),
        );

        let score = if total as f64 <= SCORE_CEIL_BYTES {
            100.0
        } else {
            ((SCORE_FLOOR_BYTES - total as f64) / (SCORE_FLOOR_BYTES - SCORE_CEIL_BYTES) * 100.0)
                .clamp(0.0, 100.0)
        };

        let mut result = PluginResult::ok(self.id())
            .with_metric("totalBytes", total)
            .with_metric("requestCount", ctx.network_log.len() as u64)
            .with_metric("scriptBytes", by_type.get("script").copied().unwrap_or(0))
            .with_metric("imageBytes", by_type.get("image").copied().unwrap_or(0))
            .with_metric(
                "stylesheetBytes",
                by_type.get("stylesheet").copied().unwrap_or(0),
            )
            .with_metric("score:performance", score.round());

        if total >= HEAVY_PAGE_BYTES {
            large.sort_by(|a, b| b.impact_bytes.cmp(&a.impact_bytes));
            result = result.with_issue(Issue {
                id: "heavy-page".into(),
                severity: if total >= 2 * HEAVY_PAGE_BYTES {
                    Severity::High
                } else {
                    Severity::Medium
                },
                category: Category::Performance,
                title: "Page transfer size is excessive".into(),
                description: format!(
                    "The page transferred {} KiB; heavy pages hurt load time on slow networks",
                    total / 1024
                ),
                offenders: large,
                fix: None,
            });
        } else if !large.is_empty() {
            result = result.with_issue(Issue {
                id: "large-resource".into(),
                severity: Severity::Low,
                category: Category::Performance,
                title: "Individually large resources".into(),
                description: "Some resources exceed 500 KiB transferred".into(),
                offenders: large,
                fix: None,
            });
        }

        Ok(result)
    }
}
