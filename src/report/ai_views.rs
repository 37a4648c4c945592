//! Token-minimized report views for AI consumption
//!
//! `ai-analysis.json` keeps aggregated issues, top offenders, detected
//! patterns, and fix guidance with all prose trimmed. `ai-summary.json` is
//! a one-glance digest that stays around one kilobyte.

use serde_json::{Value, json};
use std::collections::BTreeMap;

use super::types::RunSummary;
use crate::plugin::Category;

const MAX_ANALYSIS_ISSUES: usize = 25;
const MAX_ANALYSIS_OFFENDERS: usize = 10;
const MAX_SUMMARY_ISSUES: usize = 3;

/// Average concrete scores per category across targets
fn category_averages(summary: &RunSummary) -> BTreeMap<String, Value> {
    let mut sums: BTreeMap<Category, (u64, u64)> = BTreeMap::new();
    for target in &summary.targets {
        for (category, score) in &target.scores {
            if let Some(score) = score {
                let entry = sums.entry(*category).or_insert((0, 0));
                entry.0 += u64::from(*score);
                entry.1 += 1;
            }
        }
    }
    sums.into_iter()
        .map(|(category, (sum, count))| {
            let avg = (sum as f64 / count as f64).round() as u64;
            (category.to_string(), json!(avg))
        })
        .collect()
}

/// Build the full AI analysis view
#[must_use]
pub fn build_ai_analysis(summary: &RunSummary) -> Value {
    let issues: Vec<Value> = summary
        .aggregate_issues
        .iter()
        .take(MAX_ANALYSIS_ISSUES)
        .map(|issue| {
            json!({
                "id": issue.id,
                "sev": issue.severity.as_str(),
                "cat": issue.category.as_str(),
                "title": issue.title,
                "offenders": issue.offenders.len(),
                "fix": issue.fix.as_ref().map(|f| json!({
                    "difficulty": f.difficulty,
                    "min": f.minutes_estimate,
                })),
            })
        })
        .collect();

    let offenders: Vec<Value> = summary
        .offenders
        .iter()
        .take(MAX_ANALYSIS_OFFENDERS)
        .map(|rollup| {
            json!({
                "url": rollup.url,
                "cat": rollup.category.as_str(),
                "targets": rollup.hits.len(),
                "systemic": rollup.systemic,
                "impactBytes": rollup.total_impact_bytes,
                "impactMs": rollup.total_impact_ms,
            })
        })
        .collect();

    let patterns: Vec<Value> = summary
        .offenders
        .iter()
        .filter(|rollup| rollup.systemic)
        .map(|rollup| {
            json!({
                "kind": "systemic",
                "url": rollup.url,
                "cat": rollup.category.as_str(),
            })
        })
        .collect();

    json!({
        "status": summary.meta.status,
        "scores": category_averages(summary),
        "issues": issues,
        "offenders": offenders,
        "patterns": patterns,
        "regressions": summary.diff.as_ref().map_or(0, |d| d.regressions.len()),
        "improvements": summary.diff.as_ref().map_or(0, |d| d.improvements.len()),
    })
}

/// Build the compact AI summary (target size ~1 KB)
#[must_use]
pub fn build_ai_summary(summary: &RunSummary) -> Value {
    let top_issues: Vec<Value> = summary
        .aggregate_issues
        .iter()
        .take(MAX_SUMMARY_ISSUES)
        .map(|issue| json!(format!("{}:{}", issue.severity.as_str(), issue.id)))
        .collect();

    json!({
        "status": summary.meta.status,
        "targets": summary.targets.len(),
        "failed": summary.targets.iter().filter(|t| t.failed()).count(),
        "fromCache": summary.targets.iter().filter(|t| t.from_cache).count(),
        "scores": category_averages(summary),
        "issues": summary.aggregate_issues.len(),
        "topIssues": top_issues,
        "systemic": summary.offenders.iter().filter(|o| o.systemic).count(),
        "regressions": summary.diff.as_ref().map_or(0, |d| d.regressions.len()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::{RunMeta, RunStatus};
    use chrono::Utc;

    fn empty_summary() -> RunSummary {
        RunSummary {
            started_at: Utc::now(),
            completed_at: Utc::now(),
            elapsed_ms: 0,
            meta: RunMeta::new(RunStatus::Ok),
            targets: Vec::new(),
            aggregate_issues: Vec::new(),
            offenders: Vec::new(),
            diff: None,
        }
    }

    #[test]
    fn ai_summary_stays_small() {
        let value = build_ai_summary(&empty_summary());
        let serialized = serde_json::to_string(&value).expect("serialize");
        assert!(serialized.len() < 1024, "ai summary too large: {} bytes", serialized.len());
    }

    #[test]
    fn analysis_counts_match() {
        let value = build_ai_analysis(&empty_summary());
        assert_eq!(value["issues"].as_array().expect("issues").len(), 0);
        assert_eq!(value["regressions"], 0);
    }
}
