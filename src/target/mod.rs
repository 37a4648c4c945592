//! Canonical audit targets
//!
//! A target is one (path, device) pair audited against the configured base
//! URL. Target expansion and the build fingerprint are the two operations
//! everything downstream keys on.

pub mod fingerprint;

pub use fingerprint::{FingerprintInputs, fingerprint};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::AuditConfig;

/// Device class a target is audited on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Mobile,
    Desktop,
}

impl Device {
    /// Viewport applied at session setup
    #[must_use]
    pub const fn viewport(&self) -> (u32, u32) {
        match self {
            Self::Mobile => (412, 823),
            Self::Desktop => (1350, 940),
        }
    }

    /// Whether CDP mobile emulation (touch, device scale) is enabled
    #[must_use]
    pub const fn is_mobile(&self) -> bool {
        matches!(self, Self::Mobile)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mobile => f.write_str("mobile"),
            Self::Desktop => f.write_str("desktop"),
        }
    }
}

/// Whether a page is publicly reachable or sits behind auth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    #[default]
    Public,
    RequiresAuth,
}

/// One page x device audit target. Created once per run by expansion,
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// URL path, always beginning with `/`
    pub path: String,
    /// Human-readable label from the page configuration
    pub label: String,
    pub device: Device,
    pub scope: Scope,
}

impl Target {
    /// Stable reference string used in diffs and offender rollups,
    /// e.g. `/pricing#mobile`.
    #[must_use]
    pub fn target_ref(&self) -> String {
        format!("{}#{}", self.path, self.device)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path, self.device)
    }
}

/// Expand configured pages into audit targets.
///
/// Emits one target per listed device, preserving input page order with
/// mobile before desktop within a page. Duplicate (path, device) pairs are
/// rejected by config validation before expansion runs.
#[must_use]
pub fn expand(config: &AuditConfig) -> Vec<Target> {
    let mut targets = Vec::new();
    for page in &config.pages {
        let mut devices = page.devices.clone();
        devices.sort();
        devices.dedup();
        for device in devices {
            targets.push(Target {
                path: page.path.clone(),
                label: page.label.clone(),
                device,
                scope: page.scope,
            });
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;

    fn config_with_pages(json_pages: &str) -> AuditConfig {
        let json = format!(r#"{{"baseUrl": "http://localhost:3000", "pages": {json_pages}}}"#);
        serde_json::from_str(&json).expect("parse config")
    }

    #[test]
    fn expansion_orders_mobile_before_desktop() {
        let config = config_with_pages(
            r#"[{"path": "/", "label": "home", "devices": ["desktop", "mobile"]}]"#,
        );
        let targets = expand(&config);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].device, Device::Mobile);
        assert_eq!(targets[1].device, Device::Desktop);
    }

    #[test]
    fn expansion_preserves_page_order() {
        let config = config_with_pages(
            r#"[
                {"path": "/b", "label": "b", "devices": ["mobile"]},
                {"path": "/a", "label": "a", "devices": ["mobile"]}
            ]"#,
        );
        let targets = expand(&config);
        assert_eq!(targets[0].path, "/b");
        assert_eq!(targets[1].path, "/a");
    }

    #[test]
    fn empty_pages_expand_to_no_targets() {
        let config = config_with_pages("[]");
        assert!(expand(&config).is_empty());
    }

    #[test]
    fn target_ref_format() {
        let target = Target {
            path: "/pricing".into(),
            label: "pricing".into(),
            device: Device::Mobile,
            scope: Scope::Public,
        };
        assert_eq!(target.target_ref(), "/pricing#mobile");
    }
}
