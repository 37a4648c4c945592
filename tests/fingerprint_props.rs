//! Property tests for fingerprint determinism and sensitivity

mod common;

use proptest::prelude::*;

use signaler::config::{AuditConfig, ThrottlingMethod};
use signaler::target::{Device, FingerprintInputs, Scope, Target, fingerprint};

fn arb_device() -> impl Strategy<Value = Device> {
    prop_oneof![Just(Device::Mobile), Just(Device::Desktop)]
}

fn arb_target() -> impl Strategy<Value = Target> {
    ("[a-z0-9/_-]{0,24}", arb_device()).prop_map(|(suffix, device)| Target {
        path: format!("/{suffix}"),
        label: String::new(),
        device,
        scope: Scope::Public,
    })
}

fn arb_inputs() -> impl Strategy<Value = FingerprintInputs> {
    (
        "[a-z0-9]{1,16}",
        proptest::collection::vec(("[a-z-]{1,12}", "[0-9.]{1,8}"), 0..5),
        prop_oneof![Just(ThrottlingMethod::Simulate), Just(ThrottlingMethod::Devtools)],
        1u32..16,
    )
        .prop_map(|(build_id, plugin_set, throttling_method, multiplier)| {
            let mut config = AuditConfig::default();
            config.throttling_method = throttling_method;
            config.cpu_slowdown_multiplier = multiplier;
            let mut inputs = FingerprintInputs::new(&config, build_id, plugin_set);
            inputs.plugin_set.sort();
            inputs.plugin_set.dedup();
            inputs
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn fingerprint_is_deterministic(target in arb_target(), inputs in arb_inputs()) {
        let first = fingerprint(&target, &inputs);
        let second = fingerprint(&target, &inputs);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), 32);
        prop_assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn changing_build_id_changes_fingerprint(
        target in arb_target(),
        inputs in arb_inputs(),
        other_build in "[a-z0-9]{1,16}",
    ) {
        prop_assume!(inputs.build_id != other_build);
        let mut changed = inputs.clone();
        changed.build_id = other_build;
        prop_assert_ne!(fingerprint(&target, &inputs), fingerprint(&target, &changed));
    }

    #[test]
    fn changing_device_changes_fingerprint(target in arb_target(), inputs in arb_inputs()) {
        let mut flipped = target.clone();
        flipped.device = match target.device {
            Device::Mobile => Device::Desktop,
            Device::Desktop => Device::Mobile,
        };
        prop_assert_ne!(fingerprint(&target, &inputs), fingerprint(&flipped, &inputs));
    }

    #[test]
    fn adding_a_plugin_changes_fingerprint(target in arb_target(), inputs in arb_inputs()) {
        let mut extended = inputs.clone();
        extended.plugin_set.push(("zz-extra-plugin".into(), "9.9.9".into()));
        prop_assert_ne!(fingerprint(&target, &inputs), fingerprint(&target, &extended));
    }

    #[test]
    fn changing_multiplier_changes_fingerprint(target in arb_target(), inputs in arb_inputs()) {
        let mut changed = inputs.clone();
        changed.cpu_slowdown_multiplier += 1;
        prop_assert_ne!(fingerprint(&target, &inputs), fingerprint(&target, &changed));
    }
}
