//! Report aggregation and derived views

pub mod aggregate;
pub mod ai_views;
pub mod canonical;
pub mod diff;
pub mod triage;
pub mod types;

pub use aggregate::aggregate;
pub use ai_views::{build_ai_analysis, build_ai_summary};
pub use canonical::{to_canonical_json, to_canonical_json_pretty};
pub use diff::diff_against;
pub use triage::render_triage;
pub use types::{
    ArtifactRecord, CoreMetrics, DiffReport, OffenderHit, OffenderRollup, RunMeta, RunStatus,
    RunSummary, ScoreDelta, ScoreKey, TargetResult, collect_scores,
};

use serde::{Deserialize, Serialize};

use crate::config::Budgets;
use crate::plugin::MetricValue;

/// One budget breach, driving CI exit status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetViolation {
    pub target_ref: String,
    /// Category name or metric key
    pub budget: String,
    pub limit: f64,
    pub actual: f64,
}

/// Check every target against the configured category minima and metric
/// maxima.
#[must_use]
pub fn evaluate_budgets(summary: &RunSummary, budgets: &Budgets) -> Vec<BudgetViolation> {
    let mut violations = Vec::new();

    for target in &summary.targets {
        for (category, minimum) in &budgets.categories {
            if let Some(Some(score)) = target.scores.get(category) {
                if score < minimum {
                    violations.push(BudgetViolation {
                        target_ref: target.target_ref(),
                        budget: category.to_string(),
                        limit: f64::from(*minimum),
                        actual: f64::from(*score),
                    });
                }
            }
        }

        for (metric, maximum) in &budgets.metrics {
            let actual = core_metric(&target.core_metrics, metric).or_else(|| {
                target
                    .plugins
                    .values()
                    .find_map(|r| r.metrics.get(metric).and_then(MetricValue::as_number))
            });
            if let Some(actual) = actual {
                if actual > *maximum {
                    violations.push(BudgetViolation {
                        target_ref: target.target_ref(),
                        budget: metric.clone(),
                        limit: *maximum,
                        actual,
                    });
                }
            }
        }
    }

    violations
}

fn core_metric(metrics: &CoreMetrics, key: &str) -> Option<f64> {
    match key {
        "lcpMs" => metrics.lcp_ms,
        "fcpMs" => metrics.fcp_ms,
        "tbtMs" => metrics.tbt_ms,
        "cls" => metrics.cls,
        "inpMs" => metrics.inp_ms,
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Category;
    use crate::target::{Device, Scope, Target};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn summary_with_score(score: u8, lcp_ms: f64) -> RunSummary {
        let mut scores = BTreeMap::new();
        scores.insert(Category::Performance, Some(score));
        RunSummary {
            started_at: Utc::now(),
            completed_at: Utc::now(),
            elapsed_ms: 0,
            meta: RunMeta::new(RunStatus::Ok),
            targets: vec![TargetResult {
                target: Target {
                    path: "/".into(),
                    label: String::new(),
                    device: Device::Mobile,
                    scope: Scope::Public,
                },
                fingerprint: None,
                started_at: Utc::now(),
                duration_ms: 0,
                plugins: BTreeMap::new(),
                scores,
                core_metrics: CoreMetrics {
                    lcp_ms: Some(lcp_ms),
                    ..Default::default()
                },
                from_cache: false,
                retries: 0,
                error: None,
            }],
            aggregate_issues: Vec::new(),
            offenders: Vec::new(),
            diff: None,
        }
    }

    #[test]
    fn score_below_minimum_violates() {
        let mut budgets = Budgets::default();
        budgets.categories.insert(Category::Performance, 80);
        let violations = evaluate_budgets(&summary_with_score(70, 1000.0), &budgets);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].budget, "performance");
    }

    #[test]
    fn metric_above_maximum_violates() {
        let mut budgets = Budgets::default();
        budgets.metrics.insert("lcpMs".into(), 2500.0);
        let violations = evaluate_budgets(&summary_with_score(95, 4000.0), &budgets);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].actual, 4000.0);
    }

    #[test]
    fn passing_budgets_produce_no_violations() {
        let mut budgets = Budgets::default();
        budgets.categories.insert(Category::Performance, 60);
        budgets.metrics.insert("lcpMs".into(), 5000.0);
        assert!(evaluate_budgets(&summary_with_score(90, 1200.0), &budgets).is_empty());
    }
}
