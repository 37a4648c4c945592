//! Cache round-trip property: get(put(fp, r)) preserves the result under
//! canonical JSON equality.

mod common;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;

use signaler::plugin::PluginResult;
use signaler::report::types::{TargetResult, collect_scores};
use signaler::report::to_canonical_json;
use signaler::result_cache::ResultCache;
use signaler::target::{Device, Scope, Target};

fn arb_device() -> impl Strategy<Value = Device> {
    prop_oneof![Just(Device::Mobile), Just(Device::Desktop)]
}

fn arb_target_result() -> impl Strategy<Value = TargetResult> {
    (
        "[a-z0-9/_-]{0,16}",
        arb_device(),
        proptest::collection::btree_map(
            "[a-z-]{1,10}",
            (0u64..10_000, proptest::collection::vec(("[a-zA-Z ]{1,20}", 0.0f64..100.0), 0..3)),
            0..4,
        ),
        0u32..5,
        0u64..1_000_000,
    )
        .prop_map(|(path, device, plugin_specs, retries, duration_ms)| {
            let mut plugins: BTreeMap<String, PluginResult> = BTreeMap::new();
            for (id, (metric, texts)) in plugin_specs {
                let mut result = PluginResult::ok(&id).with_metric("value", metric);
                for (index, (text, number)) in texts.into_iter().enumerate() {
                    result = result
                        .with_metric(format!("t{index}"), text.as_str())
                        .with_metric(format!("n{index}"), number);
                }
                plugins.insert(id, result);
            }
            TargetResult {
                target: Target {
                    path: format!("/{path}"),
                    label: "generated".into(),
                    device,
                    scope: Scope::Public,
                },
                fingerprint: None,
                started_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                duration_ms,
                scores: collect_scores(&plugins),
                core_metrics: Default::default(),
                plugins,
                from_cache: false,
                retries,
                error: None,
            }
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(150))]

    #[test]
    fn round_trip_preserves_canonical_value(result in arb_target_result()) {
        let cache = ResultCache::new();
        cache.put("fp0123", result.clone());
        let mut got = cache.get("fp0123").expect("stored entry");

        // The cache is allowed to stamp surfacing metadata; everything else
        // must be value-identical.
        prop_assert!(got.from_cache);
        got.from_cache = result.from_cache;
        got.fingerprint = result.fingerprint.clone();

        prop_assert_eq!(
            to_canonical_json(&got).expect("canonical"),
            to_canonical_json(&result).expect("canonical")
        );
    }

    #[test]
    fn persisted_round_trip_preserves_canonical_value(result in arb_target_result()) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");

        let cache = ResultCache::new();
        cache.put("fp0123", result.clone());
        cache.persist(&path).expect("persist");

        let reloaded = ResultCache::load(&path);
        let mut got = reloaded.get("fp0123").expect("reloaded entry");
        got.from_cache = false;
        got.fingerprint = result.fingerprint.clone();

        prop_assert_eq!(
            to_canonical_json(&got).expect("canonical"),
            to_canonical_json(&result).expect("canonical")
        );
    }
}
