//! Human-readable triage rendering
//!
//! Produces `triage.md`: failing targets first, then the worst issues
//! sorted by severity and impact, capped per category.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use super::types::RunSummary;
use crate::plugin::{Category, Issue};

/// Worst entries kept per category
const MAX_ISSUES_PER_CATEGORY: usize = 10;

fn issue_impact(issue: &Issue) -> f64 {
    issue
        .offenders
        .iter()
        .map(|o| o.impact_ms.unwrap_or(0.0) + o.impact_bytes.unwrap_or(0) as f64 / 1024.0)
        .sum()
}

/// Render the triage Markdown document
#[must_use]
pub fn render_triage(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Audit triage");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Run status: **{:?}** — {} target(s), {} aggregated issue(s)",
        summary.meta.status,
        summary.targets.len(),
        summary.aggregate_issues.len()
    );

    let failing: Vec<_> = summary.targets.iter().filter(|t| t.failed()).collect();
    if !failing.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Failing targets");
        let _ = writeln!(out);
        for target in failing {
            let reason = target
                .error
                .as_ref()
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or_else(|| {
                    let failed_plugins: Vec<&str> = target
                        .plugins
                        .iter()
                        .filter(|(_, r)| r.status == crate::plugin::PluginStatus::Failed)
                        .map(|(id, _)| id.as_str())
                        .collect();
                    format!("failed plugins: {}", failed_plugins.join(", "))
                });
            let _ = writeln!(out, "- `{}` — {reason}", target.target_ref());
        }
    }

    let mut by_category: BTreeMap<Category, Vec<&Issue>> = BTreeMap::new();
    for issue in &summary.aggregate_issues {
        by_category.entry(issue.category).or_default().push(issue);
    }

    for (category, mut issues) in by_category {
        issues.sort_by(|a, b| {
            (a.severity.rank(), std::cmp::Reverse(issue_impact(a) as u64))
                .cmp(&(b.severity.rank(), std::cmp::Reverse(issue_impact(b) as u64)))
        });
        issues.truncate(MAX_ISSUES_PER_CATEGORY);

        let _ = writeln!(out);
        let _ = writeln!(out, "## {category}");
        let _ = writeln!(out);
        for issue in issues {
            let _ = writeln!(
                out,
                "- **[{}]** {} — {}",
                issue.severity, issue.title, issue.description
            );
            for offender in issue.offenders.iter().take(5) {
                let mut impact = String::new();
                if let Some(bytes) = offender.impact_bytes {
                    let _ = write!(impact, " ({} KiB)", bytes / 1024);
                } else if let Some(ms) = offender.impact_ms {
                    let _ = write!(impact, " ({ms:.0} ms)");
                }
                let _ = writeln!(out, "  - `{}`{impact}", offender.url);
            }
            if let Some(fix) = &issue.fix {
                let _ = writeln!(
                    out,
                    "  - fix: {:?}, ~{} min",
                    fix.difficulty, fix.minutes_estimate
                );
            }
        }
    }

    if let Some(diff) = &summary.diff {
        if !diff.regressions.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "## Regressions since last run");
            let _ = writeln!(out);
            for delta in &diff.regressions {
                let _ = writeln!(
                    out,
                    "- `{}` {} {:+}",
                    delta.target_ref, delta.category, delta.delta
                );
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorInfo, ErrorKind};
    use crate::plugin::{Offender, PluginResult, Severity};
    use crate::report::types::{RunMeta, RunStatus, TargetResult};
    use crate::target::{Device, Scope, Target};
    use chrono::Utc;

    fn summary() -> RunSummary {
        let target = TargetResult {
            target: Target {
                path: "/".into(),
                label: "home".into(),
                device: Device::Mobile,
                scope: Scope::Public,
            },
            fingerprint: None,
            started_at: Utc::now(),
            duration_ms: 10,
            plugins: {
                let mut m = std::collections::BTreeMap::new();
                m.insert("p".to_string(), PluginResult::ok("p"));
                m
            },
            scores: std::collections::BTreeMap::new(),
            core_metrics: Default::default(),
            from_cache: false,
            retries: 0,
            error: Some(ErrorInfo::new(ErrorKind::Session, "session exhausted")),
        };
        RunSummary {
            started_at: Utc::now(),
            completed_at: Utc::now(),
            elapsed_ms: 10,
            meta: RunMeta::new(RunStatus::Partial),
            targets: vec![target],
            aggregate_issues: vec![Issue {
                id: "missing-csp".into(),
                severity: Severity::High,
                category: Category::Security,
                title: "Missing Content-Security-Policy".into(),
                description: "no CSP".into(),
                offenders: vec![Offender::new("http://x.test/", "missing header")],
                fix: None,
            }],
            offenders: Vec::new(),
            diff: None,
        }
    }

    #[test]
    fn failing_targets_listed_before_issues() {
        let rendered = render_triage(&summary());
        let failing_pos = rendered.find("## Failing targets").expect("failing section");
        let issues_pos = rendered.find("## security").expect("issues section");
        assert!(failing_pos < issues_pos);
        assert!(rendered.contains("/#mobile"));
        assert!(rendered.contains("Missing Content-Security-Policy"));
    }
}
