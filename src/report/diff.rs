//! Score diffing between runs
//!
//! Scores are compared per (path, device, category) against the previous
//! run's summary. A delta counts as a regression when it is negative and
//! its magnitude strictly exceeds the configured threshold; likewise for
//! improvements. Pairs present on only one side are reported as
//! added/removed.

use std::collections::BTreeMap;

use super::types::{DiffReport, RunSummary, ScoreDelta, ScoreKey, TargetResult};
use crate::plugin::Category;

/// Score lookup keyed by (target ref, category). Only concrete scores
/// participate; null categories are treated as absent.
fn score_map(targets: &[TargetResult]) -> BTreeMap<(String, Category), u8> {
    let mut map = BTreeMap::new();
    for result in targets {
        for (category, score) in &result.scores {
            if let Some(score) = score {
                map.insert((result.target_ref(), *category), *score);
            }
        }
    }
    map
}

/// Compute the diff of `current` against the previous run.
///
/// Returns `None` when nothing moved: no non-zero deltas and no added or
/// removed score pairs.
#[must_use]
pub fn diff_against(
    current: &[TargetResult],
    previous: &RunSummary,
    threshold: u8,
) -> Option<DiffReport> {
    let current_scores = score_map(current);
    let previous_scores = score_map(&previous.targets);
    let threshold = i32::from(threshold);

    let mut report = DiffReport::default();

    for ((target_ref, category), score) in &current_scores {
        match previous_scores.get(&(target_ref.clone(), *category)) {
            Some(previous_score) => {
                let delta = i32::from(*score) - i32::from(*previous_score);
                if delta == 0 {
                    continue;
                }
                let entry = ScoreDelta {
                    target_ref: target_ref.clone(),
                    category: *category,
                    delta,
                };
                if delta < 0 && delta.abs() > threshold {
                    report.regressions.push(entry.clone());
                } else if delta > 0 && delta > threshold {
                    report.improvements.push(entry.clone());
                }
                report.score_deltas.push(entry);
            }
            None => report.added.push(ScoreKey {
                target_ref: target_ref.clone(),
                category: *category,
            }),
        }
    }

    for (target_ref, category) in previous_scores.keys() {
        if !current_scores.contains_key(&(target_ref.clone(), *category)) {
            report.removed.push(ScoreKey {
                target_ref: target_ref.clone(),
                category: *category,
            });
        }
    }

    if report.is_empty() {
        None
    } else {
        Some(report)
    }
}
