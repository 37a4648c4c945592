//! Throttling profiles applied at session startup
//!
//! Two methods exist: `simulate` leaves the page untouched and exposes
//! multipliers that metric-producing plugins apply arithmetically, while
//! `devtools` drives live CDP throttling. Devtools mode never also exposes
//! simulation multipliers, so the slowdown is applied exactly once.

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::emulation::SetCpuThrottlingRateParams;
use chromiumoxide::cdp::browser_protocol::network::EmulateNetworkConditionsParams;

use crate::config::{AuditConfig, ThrottlingMethod};
use crate::error::{AuditError, AuditResult};

/// Emulated "Slow 4G" network shape used in devtools mode, matching the
/// profile Lighthouse applies.
const LATENCY_MS: f64 = 150.0;
const DOWNLOAD_BYTES_PER_SEC: f64 = 1.6 * 1024.0 * 1024.0 / 8.0;
const UPLOAD_BYTES_PER_SEC: f64 = 750.0 * 1024.0 / 8.0;

/// Multipliers metric producers apply when throttling is simulated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedMultipliers {
    pub cpu: f64,
    pub network_latency_ms: f64,
}

/// The configured throttling profile for a run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleProfile {
    pub method: ThrottlingMethod,
    pub cpu_slowdown_multiplier: u32,
}

impl ThrottleProfile {
    #[must_use]
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            method: config.throttling_method,
            cpu_slowdown_multiplier: config.cpu_slowdown_multiplier,
        }
    }

    /// Apply the profile to a fresh page.
    ///
    /// Simulate mode is a no-op here; devtools mode installs live CDP
    /// CPU and network throttling.
    pub async fn apply(&self, page: &Page) -> AuditResult<()> {
        match self.method {
            ThrottlingMethod::Simulate => Ok(()),
            ThrottlingMethod::Devtools => {
                page.execute(
                    SetCpuThrottlingRateParams::builder()
                        .rate(f64::from(self.cpu_slowdown_multiplier))
                        .build()
                        .map_err(AuditError::Session)?,
                )
                .await
                .map_err(|e| AuditError::Session(format!("cpu throttling failed: {e}")))?;

                page.execute(
                    EmulateNetworkConditionsParams::builder()
                        .offline(false)
                        .latency(LATENCY_MS)
                        .download_throughput(DOWNLOAD_BYTES_PER_SEC)
                        .upload_throughput(UPLOAD_BYTES_PER_SEC)
                        .build()
                        .map_err(AuditError::Session)?,
                )
                .await
                .map_err(|e| AuditError::Session(format!("network throttling failed: {e}")))?;

                Ok(())
            }
        }
    }

    /// Multipliers for synthetic slowdown. `None` in devtools mode so the
    /// slowdown cannot be applied twice.
    #[must_use]
    pub fn simulated_multipliers(&self) -> Option<SimulatedMultipliers> {
        match self.method {
            ThrottlingMethod::Simulate => Some(SimulatedMultipliers {
                cpu: f64::from(self.cpu_slowdown_multiplier),
                network_latency_ms: LATENCY_MS,
            }),
            ThrottlingMethod::Devtools => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuditConfig;

    #[test]
    fn devtools_mode_exposes_no_simulated_multipliers() {
        let mut config = AuditConfig::default();
        config.throttling_method = ThrottlingMethod::Devtools;
        let profile = ThrottleProfile::from_config(&config);
        assert!(profile.simulated_multipliers().is_none());
    }

    #[test]
    fn simulate_mode_exposes_configured_cpu_multiplier() {
        let mut config = AuditConfig::default();
        config.cpu_slowdown_multiplier = 6;
        let profile = ThrottleProfile::from_config(&config);
        let multipliers = profile.simulated_multipliers().expect("simulate mode");
        assert_eq!(multipliers.cpu, 6.0);
    }
}
