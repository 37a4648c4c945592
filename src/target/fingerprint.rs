//! Build fingerprints for incremental caching
//!
//! The fingerprint is the authoritative cache-coherence mechanism: anything
//! that can change a target's audit output must be an ingredient here.
//! Ingredients are serialized as sorted `key=value` lines and hashed with
//! xxh3-128 into a 32-char lowercase hex string.

use xxhash_rust::xxh3::xxh3_128;

use super::Target;
use crate::config::{AuditConfig, ThrottlingMethod};

/// The slice of configuration and registry state that participates in the
/// fingerprint. Collected once per run by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintInputs {
    pub build_id: String,
    /// (plugin id, plugin version) pairs for the active plugin set
    pub plugin_set: Vec<(String, String)>,
    pub throttling_method: ThrottlingMethod,
    pub cpu_slowdown_multiplier: u32,
}

impl FingerprintInputs {
    /// Gather fingerprint ingredients from the run configuration and the
    /// active plugin set.
    #[must_use]
    pub fn new(
        config: &AuditConfig,
        build_id: impl Into<String>,
        plugin_set: Vec<(String, String)>,
    ) -> Self {
        Self {
            build_id: build_id.into(),
            plugin_set,
            throttling_method: config.throttling_method,
            cpu_slowdown_multiplier: config.cpu_slowdown_multiplier,
        }
    }
}

/// Compute the cache fingerprint for one target.
///
/// Deterministic: ingredient lines are sorted before hashing and numbers are
/// written in their canonical decimal form, so equal inputs produce
/// byte-identical fingerprints and any changed ingredient changes the hash.
#[must_use]
pub fn fingerprint(target: &Target, inputs: &FingerprintInputs) -> String {
    let mut lines: Vec<String> = Vec::with_capacity(6 + inputs.plugin_set.len());
    lines.push(format!("build_id={}", inputs.build_id));
    lines.push(format!("path={}", target.path));
    lines.push(format!("device={}", target.device));
    lines.push(format!(
        "throttling={}",
        match inputs.throttling_method {
            ThrottlingMethod::Simulate => "simulate",
            ThrottlingMethod::Devtools => "devtools",
        }
    ));
    lines.push(format!("cpu_multiplier={}", inputs.cpu_slowdown_multiplier));
    for (id, version) in &inputs.plugin_set {
        lines.push(format!("plugin:{id}={version}"));
    }
    lines.sort_unstable();

    let serialized = lines.join("\n");
    format!("{:032x}", xxh3_128(serialized.as_bytes()))
}
