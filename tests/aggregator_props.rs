//! Aggregator idempotence and diff skew-symmetry properties

mod common;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;

use signaler::plugin::{Category, Issue, Offender, PluginResult, Severity};
use signaler::report::types::{RunMeta, RunStatus, RunSummary, ScoreDelta, TargetResult};
use signaler::report::{aggregate, diff_against, to_canonical_json};
use signaler::target::{Device, Scope, Target};

fn arb_severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Critical),
        Just(Severity::High),
        Just(Severity::Medium),
        Just(Severity::Low),
    ]
}

fn arb_category() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::Performance),
        Just(Category::Security),
        Just(Category::BestPractices),
    ]
}

fn arb_issue() -> impl Strategy<Value = Issue> {
    (
        "[a-z-]{3,12}",
        arb_severity(),
        arb_category(),
        proptest::collection::vec(("[a-z0-9]{1,8}", proptest::option::of(0u64..100_000)), 0..4),
    )
        .prop_map(|(id, severity, category, offender_specs)| Issue {
            id,
            severity,
            category,
            title: "generated".into(),
            description: String::new(),
            offenders: offender_specs
                .into_iter()
                .map(|(slug, bytes)| {
                    let mut offender =
                        Offender::new(format!("http://x.test/{slug}"), "generated");
                    offender.impact_bytes = bytes;
                    offender
                })
                .collect(),
            fix: None,
        })
}

fn arb_targets() -> impl Strategy<Value = Vec<TargetResult>> {
    proptest::collection::vec(
        (
            "[a-z]{1,8}",
            prop_oneof![Just(Device::Mobile), Just(Device::Desktop)],
            proptest::collection::vec(arb_issue(), 0..4),
            proptest::option::of(0u8..=100),
        ),
        0..6,
    )
    .prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(index, (path, device, issues, performance))| {
                let mut plugin = PluginResult::ok("gen");
                for issue in issues {
                    plugin = plugin.with_issue(issue);
                }
                if let Some(score) = performance {
                    plugin = plugin.with_metric("score:performance", f64::from(score));
                }
                let mut plugins = BTreeMap::new();
                plugins.insert("gen".to_string(), plugin);
                TargetResult {
                    target: Target {
                        // Index keeps (path, device) pairs unique
                        path: format!("/{path}{index}"),
                        label: String::new(),
                        device,
                        scope: Scope::Public,
                    },
                    fingerprint: None,
                    started_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                    duration_ms: 50,
                    scores: signaler::report::collect_scores(&plugins),
                    core_metrics: Default::default(),
                    plugins,
                    from_cache: false,
                    retries: 0,
                    error: None,
                }
            })
            .collect()
    })
}

fn run(targets: Vec<TargetResult>) -> RunSummary {
    aggregate(
        targets,
        None,
        RunMeta::new(RunStatus::Ok),
        Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        3,
    )
}

fn sorted(mut deltas: Vec<ScoreDelta>) -> Vec<ScoreDelta> {
    deltas.sort_by(|a, b| (&a.target_ref, a.category).cmp(&(&b.target_ref, b.category)));
    deltas
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(120))]

    #[test]
    fn aggregation_is_idempotent(targets in arb_targets()) {
        let first = run(targets);
        let second = run(first.targets.clone());
        prop_assert_eq!(
            to_canonical_json(&first.aggregate_issues).expect("canonical"),
            to_canonical_json(&second.aggregate_issues).expect("canonical")
        );
        prop_assert_eq!(
            to_canonical_json(&first.offenders).expect("canonical"),
            to_canonical_json(&second.offenders).expect("canonical")
        );
    }

    #[test]
    fn aggregation_is_deterministic_under_input_order(targets in arb_targets()) {
        let mut reversed = targets.clone();
        reversed.reverse();
        let first = run(targets);
        let second = run(reversed);
        prop_assert_eq!(
            to_canonical_json(&first).expect("canonical"),
            to_canonical_json(&second).expect("canonical")
        );
    }

    #[test]
    fn diff_skew_symmetry(a in arb_targets(), b in arb_targets()) {
        let summary_a = run(a);
        let summary_b = run(b);

        let ab = diff_against(&summary_b.targets, &summary_a, 3);
        let ba = diff_against(&summary_a.targets, &summary_b, 3);

        let regressions = sorted(ab.map(|d| d.regressions).unwrap_or_default());
        let inverted_improvements = sorted(
            ba.map(|d| d.improvements)
                .unwrap_or_default()
                .into_iter()
                .map(|d| ScoreDelta {
                    target_ref: d.target_ref,
                    category: d.category,
                    delta: -d.delta,
                })
                .collect(),
        );
        prop_assert_eq!(regressions, inverted_improvements);
    }
}
