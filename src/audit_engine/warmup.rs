//! Base URL probing and cache warm-up
//!
//! Warm-up fires one GET per unique path with bounded concurrency before
//! the audit starts, purely to prime server and CDN caches so the first
//! measured loads are not cold-start noise. Outcomes are ignored.

use futures::StreamExt;
use log::{debug, info};
use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{AuditError, AuditResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared client for probe and warm-up traffic; connection reuse keeps the
/// warm-up burst from exhausting ephemeral ports.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Confirm the base URL answers at all. Any HTTP response counts as
/// reachable; only transport failures are errors.
pub async fn probe_base_url(base_url: &str) -> AuditResult<()> {
    HTTP_CLIENT
        .get(base_url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
        .map_err(|e| AuditError::Network(format!("base URL {base_url} unreachable: {e}")))?;
    Ok(())
}

/// Issue one GET per unique path, `concurrency` requests in flight at a
/// time. Failures are logged and otherwise ignored.
pub async fn warm_up(base_url: &str, paths: &[String], concurrency: usize, cancel: &CancellationToken) {
    let mut unique = paths.to_vec();
    unique.sort();
    unique.dedup();

    info!("Warming up {} unique path(s)", unique.len());
    let base = base_url.trim_end_matches('/');

    futures::stream::iter(unique)
        .for_each_concurrent(concurrency.max(1), |path| {
            let url = format!("{base}{path}");
            let cancel = cancel.clone();
            async move {
                if cancel.is_cancelled() {
                    return;
                }
                match HTTP_CLIENT.get(&url).timeout(PROBE_TIMEOUT).send().await {
                    Ok(response) => debug!("Warm-up {url}: {}", response.status()),
                    Err(e) => debug!("Warm-up {url} failed (ignored): {e}"),
                }
            }
        })
        .await;
}
