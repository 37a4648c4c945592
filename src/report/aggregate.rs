//! Report aggregation
//!
//! Reduces per-target plugin outputs into the canonical result set:
//! issues merged across targets, offenders coalesced by normalized URL and
//! category with cumulative impact, systemic patterns detected, and the
//! diff against the previous run attached. Targets are sorted before
//! reduction so the output is deterministic regardless of completion order.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::diff::diff_against;
use super::types::{
    OffenderHit, OffenderRollup, RunMeta, RunSummary, TargetResult,
};
use crate::audit_engine::context::normalize_for_match;
use crate::plugin::{Category, Issue, Offender, PluginStatus};

/// Same offender observed on at least this many targets counts as systemic
const SYSTEMIC_TARGET_COUNT: usize = 3;

/// Reduce target results into a run summary.
///
/// `previous` is the prior run's summary when one existed before this run
/// began; the diff is omitted when nothing moved.
#[must_use]
pub fn aggregate(
    mut targets: Vec<TargetResult>,
    previous: Option<&RunSummary>,
    meta: RunMeta,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    diff_threshold: u8,
) -> RunSummary {
    targets.sort_by(|a, b| {
        (&a.target.path, a.target.device, &a.target.label).cmp(&(
            &b.target.path,
            b.target.device,
            &b.target.label,
        ))
    });

    let aggregate_issues = merge_issues(&targets);
    let offenders = rollup_offenders(&targets);
    let diff = previous.and_then(|prev| diff_against(&targets, prev, diff_threshold));

    RunSummary {
        started_at,
        completed_at,
        elapsed_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
        meta,
        targets,
        aggregate_issues,
        offenders,
        diff,
    }
}

/// Merge identical issues (same category and id) across targets. The most
/// severe observation wins; offenders are coalesced by normalized URL with
/// impact summed.
fn merge_issues(targets: &[TargetResult]) -> Vec<Issue> {
    let mut merged: BTreeMap<(Category, String), Issue> = BTreeMap::new();

    for result in targets {
        for plugin_result in result.plugins.values() {
            if plugin_result.status != PluginStatus::Ok {
                continue;
            }
            for issue in &plugin_result.issues {
                let key = (issue.category, issue.id.clone());
                match merged.get_mut(&key) {
                    Some(existing) => {
                        if issue.severity.rank() < existing.severity.rank() {
                            existing.severity = issue.severity;
                        }
                        for offender in &issue.offenders {
                            merge_offender(&mut existing.offenders, offender);
                        }
                    }
                    None => {
                        let mut fresh = issue.clone();
                        let mut offenders = Vec::new();
                        for offender in &fresh.offenders {
                            merge_offender(&mut offenders, offender);
                        }
                        fresh.offenders = offenders;
                        merged.insert(key, fresh);
                    }
                }
            }
        }
    }

    let mut issues: Vec<Issue> = merged.into_values().collect();
    issues.sort_by(|a, b| {
        (a.severity.rank(), a.category, &a.id).cmp(&(b.severity.rank(), b.category, &b.id))
    });
    issues
}

fn merge_offender(offenders: &mut Vec<Offender>, incoming: &Offender) {
    let incoming_key = normalize_for_match(&incoming.url).unwrap_or_else(|| incoming.url.clone());
    for existing in offenders.iter_mut() {
        let existing_key =
            normalize_for_match(&existing.url).unwrap_or_else(|| existing.url.clone());
        if existing_key == incoming_key {
            existing.impact_ms = sum_options(existing.impact_ms, incoming.impact_ms);
            existing.impact_bytes = sum_options(existing.impact_bytes, incoming.impact_bytes);
            existing.count = sum_options(existing.count, incoming.count);
            return;
        }
    }
    offenders.push(incoming.clone());
}

fn sum_options<T: std::ops::Add<Output = T> + Copy>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(v), None) | (None, Some(v)) => Some(v),
        (None, None) => None,
    }
}

/// Coalesce offenders across targets by normalized URL plus category.
///
/// Each rollup records every (target, plugin) pair that produced the
/// offender and the cumulative impact. An offender observed on three or
/// more distinct targets is classified systemic rather than page-specific.
fn rollup_offenders(targets: &[TargetResult]) -> Vec<OffenderRollup> {
    struct Accumulator {
        url: String,
        category: Category,
        hits: Vec<OffenderHit>,
        impact_ms: Option<f64>,
        impact_bytes: Option<u64>,
    }

    let mut rollups: BTreeMap<String, Accumulator> = BTreeMap::new();

    for result in targets {
        for (plugin_id, plugin_result) in &result.plugins {
            if plugin_result.status != PluginStatus::Ok {
                continue;
            }
            for issue in &plugin_result.issues {
                for offender in &issue.offenders {
                    let normalized = normalize_for_match(&offender.url)
                        .unwrap_or_else(|| offender.url.clone());
                    let key = format!("{normalized}|{}", issue.category);
                    let acc = rollups.entry(key).or_insert_with(|| Accumulator {
                        url: normalized,
                        category: issue.category,
                        hits: Vec::new(),
                        impact_ms: None,
                        impact_bytes: None,
                    });
                    acc.hits.push(OffenderHit {
                        target_ref: result.target_ref(),
                        evidence_ref: plugin_id.clone(),
                    });
                    acc.impact_ms = sum_options(acc.impact_ms, offender.impact_ms);
                    acc.impact_bytes = sum_options(acc.impact_bytes, offender.impact_bytes);
                }
            }
        }
    }

    let mut result: Vec<OffenderRollup> = rollups
        .into_iter()
        .map(|(key, mut acc)| {
            acc.hits.sort();
            acc.hits.dedup();
            let mut distinct_targets: Vec<&str> =
                acc.hits.iter().map(|h| h.target_ref.as_str()).collect();
            distinct_targets.dedup();
            OffenderRollup {
                key,
                url: acc.url,
                category: acc.category,
                systemic: distinct_targets.len() >= SYSTEMIC_TARGET_COUNT,
                hits: acc.hits,
                total_impact_ms: acc.impact_ms,
                total_impact_bytes: acc.impact_bytes,
            }
        })
        .collect();

    // Heaviest offenders first; key breaks ties deterministically
    result.sort_by(|a, b| {
        let impact_a = a.total_impact_bytes.unwrap_or(0) as f64 + a.total_impact_ms.unwrap_or(0.0);
        let impact_b = b.total_impact_bytes.unwrap_or(0) as f64 + b.total_impact_ms.unwrap_or(0.0);
        impact_b
            .partial_cmp(&impact_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    result
}
