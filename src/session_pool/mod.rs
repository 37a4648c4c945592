//! Browser session pool with adaptive sizing
//!
//! Provides isolated Chrome sessions to audit workers. Each pooled browser
//! owns an independent profile directory; a session is one checked-out
//! browser plus a fresh page with device emulation and the configured
//! throttling profile already applied. Sessions are created lazily up to the
//! current worker cap, and unhealthy sessions are destroyed rather than
//! returned.

pub mod throttle;

pub use throttle::{SimulatedMultipliers, ThrottleProfile};

use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::Page;
use futures::StreamExt;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{AuditConfig, Parallelism};
use crate::error::{AuditError, AuditResult};
use crate::target::Target;

/// Estimated memory footprint of one Chrome session, used by auto-tune
const SESSION_MEMORY_MB: u64 = 1500;

/// One launched (or attached) browser with pool metadata
pub struct PooledBrowser {
    pub id: u64,
    browser: Arc<Browser>,
    handler_task: Option<JoinHandle<()>>,
    profile_dir: Option<PathBuf>,
    /// Externally managed browser: never close it, only drop our connection
    attached: bool,
}

impl PooledBrowser {
    /// Close the browser and remove its profile directory. For attached
    /// browsers only the CDP connection is dropped.
    async fn destroy(mut self) {
        if !self.attached {
            if let Ok(mut browser) = Arc::try_unwrap(self.browser) {
                if let Err(e) = browser.close().await {
                    warn!("Failed to close browser gracefully: {e}");
                }
                let _ = browser.wait().await;
            }
        }
        if let Some(task) = self.handler_task.take() {
            task.abort();
        }
        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                warn!("Failed to remove session profile {}: {e}", dir.display());
            }
        }
    }
}

/// A checked-out session: one browser plus a page prepared for the target
pub struct SessionHandle {
    pub(crate) pooled: PooledBrowser,
    pub page: Page,
}

impl SessionHandle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.pooled.id
    }
}

/// Pool of isolated browser sessions with an adaptive worker cap
pub struct SessionPool {
    headless: bool,
    attach_ws_url: Option<String>,
    throttle: ThrottleProfile,
    /// Browsers ready for checkout
    available: Mutex<VecDeque<PooledBrowser>>,
    in_use: AtomicUsize,
    next_id: AtomicU64,
    /// Current worker cap; only the orchestrator resizes it
    cap: AtomicUsize,
    consecutive_create_failures: AtomicU32,
}

impl SessionPool {
    /// Create a pool sized from configuration and machine resources.
    ///
    /// Initial cap is `min(configured, total_memory_mb / 1500, logical_cpus)`
    /// clamped to at least 1; attaching to an externally managed browser
    /// forces the cap to 1.
    #[must_use]
    pub fn new(config: &AuditConfig) -> Arc<Self> {
        let cap = auto_tune_cap(config.parallel, config.browser_ws_url.is_some());
        info!("Session pool worker cap: {cap}");
        Arc::new(Self {
            headless: config.headless,
            attach_ws_url: config.browser_ws_url.clone(),
            throttle: ThrottleProfile::from_config(config),
            available: Mutex::new(VecDeque::new()),
            in_use: AtomicUsize::new(0),
            next_id: AtomicU64::new(0),
            cap: AtomicUsize::new(cap),
            consecutive_create_failures: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub fn current_cap(&self) -> usize {
        self.cap.load(Ordering::Relaxed)
    }

    /// The run's throttling profile applied at session startup
    #[must_use]
    pub fn throttle_profile(&self) -> ThrottleProfile {
        self.throttle
    }

    /// Halve the worker cap, flooring at 1. Used by adaptive scheduling and
    /// after repeated session-creation failures.
    pub fn halve_cap(&self) -> usize {
        let mut current = self.cap.load(Ordering::Relaxed);
        loop {
            let new = (current / 2).max(1);
            match self
                .cap
                .compare_exchange(current, new, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return new,
                Err(observed) => current = observed,
            }
        }
    }

    /// Acquire a session prepared for the given target.
    ///
    /// Pops a healthy pooled browser or launches a new one while under the
    /// cap; otherwise waits for a release. The returned handle carries a
    /// fresh page with device emulation and the throttling profile applied.
    pub async fn acquire(self: &Arc<Self>, target: &Target) -> AuditResult<SessionHandle> {
        loop {
            let pooled = {
                let mut available = self.available.lock().await;
                available.pop_front()
            };

            if let Some(pooled) = pooled {
                match pooled.browser.version().await {
                    Ok(_) => {
                        self.in_use.fetch_add(1, Ordering::Relaxed);
                        debug!("Acquired pooled session {}", pooled.id);
                        return self.prepare_handle(pooled, target).await;
                    }
                    Err(e) => {
                        warn!("Session {} failed health check: {e}", pooled.id);
                        pooled.destroy().await;
                        continue;
                    }
                }
            }

            let total = self.in_use.load(Ordering::Relaxed) + self.available.lock().await.len();
            if total < self.current_cap() {
                let pooled = self.create_browser().await?;
                self.in_use.fetch_add(1, Ordering::Relaxed);
                return self.prepare_handle(pooled, target).await;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Return a session. Unhealthy sessions are destroyed, never pooled.
    pub async fn release(&self, handle: SessionHandle, healthy: bool) {
        let SessionHandle { pooled, page } = handle;
        if let Err(e) = page.close().await {
            debug!("Failed to close session page: {e}");
        }
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        if healthy {
            debug!("Returning session {} to pool", pooled.id);
            self.available.lock().await.push_back(pooled);
        } else {
            info!("Destroying unhealthy session {}", pooled.id);
            pooled.destroy().await;
        }
    }

    /// Destroy all pooled browsers. In-flight sessions are destroyed by
    /// their workers on release.
    pub async fn shutdown(&self) {
        let mut available = self.available.lock().await;
        while let Some(pooled) = available.pop_front() {
            pooled.destroy().await;
        }
    }

    /// Open a fresh page on the browser and apply per-target device
    /// emulation plus the run's throttling profile. Any failure destroys the
    /// browser so a half-configured session is never handed out.
    async fn prepare_handle(
        &self,
        pooled: PooledBrowser,
        target: &Target,
    ) -> AuditResult<SessionHandle> {
        match self.prepare_page(&pooled, target).await {
            Ok(page) => Ok(SessionHandle { pooled, page }),
            Err(e) => {
                self.in_use.fetch_sub(1, Ordering::Relaxed);
                pooled.destroy().await;
                Err(e)
            }
        }
    }

    async fn prepare_page(&self, pooled: &PooledBrowser, target: &Target) -> AuditResult<Page> {
        let page = pooled
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AuditError::Session(format!("failed to open page: {e}")))?;

        let (width, height) = target.device.viewport();
        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(i64::from(width))
                .height(i64::from(height))
                .device_scale_factor(if target.device.is_mobile() { 2.0 } else { 1.0 })
                .mobile(target.device.is_mobile())
                .build()
                .map_err(AuditError::Session)?,
        )
        .await
        .map_err(|e| AuditError::Session(format!("device emulation failed: {e}")))?;

        self.throttle.apply(&page).await?;

        Ok(page)
    }

    /// Launch a new browser (or attach to the external one). Two consecutive
    /// creation failures halve the cap.
    async fn create_browser(&self) -> AuditResult<PooledBrowser> {
        let result = if let Some(ws_url) = &self.attach_ws_url {
            self.attach_browser(ws_url).await
        } else {
            self.launch_browser().await
        };

        match result {
            Ok(pooled) => {
                self.consecutive_create_failures.store(0, Ordering::Relaxed);
                Ok(pooled)
            }
            Err(e) => {
                let failures = self
                    .consecutive_create_failures
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if failures >= 2 {
                    let new_cap = self.halve_cap();
                    warn!(
                        "{failures} consecutive session creation failures, worker cap halved to {new_cap}"
                    );
                    self.consecutive_create_failures.store(0, Ordering::Relaxed);
                }
                Err(e)
            }
        }
    }

    async fn launch_browser(&self) -> AuditResult<PooledBrowser> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let profile_dir =
            std::env::temp_dir().join(format!("signaler_session_{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&profile_dir)
            .await
            .map_err(|e| AuditError::Session(format!("failed to create profile dir: {e}")))?;

        let mut builder = BrowserConfig::builder()
            .request_timeout(Duration::from_secs(30))
            .user_data_dir(&profile_dir)
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer")
            .arg("--disable-background-networking")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--no-sandbox")
            .arg("--mute-audio");
        if self.headless {
            builder = builder.headless_mode(HeadlessMode::default());
        } else {
            builder = builder.with_head();
        }
        let browser_config = builder
            .build()
            .map_err(|e| AuditError::Session(format!("failed to build browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| AuditError::Session(format!("failed to launch browser: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {e}");
                }
            }
        });

        debug!("Launched session browser {id} (profile {})", profile_dir.display());
        Ok(PooledBrowser {
            id,
            browser: Arc::new(browser),
            handler_task: Some(handler_task),
            profile_dir: Some(profile_dir),
            attached: false,
        })
    }

    async fn attach_browser(&self, ws_url: &str) -> AuditResult<PooledBrowser> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| AuditError::Session(format!("failed to attach to {ws_url}: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler error: {e}");
                }
            }
        });

        info!("Attached to externally managed browser at {ws_url}");
        Ok(PooledBrowser {
            id,
            browser: Arc::new(browser),
            handler_task: Some(handler_task),
            profile_dir: None,
            attached: true,
        })
    }
}

/// Worker cap auto-tune: configured limit, memory headroom, and CPU count,
/// clamped to at least 1. Attached browsers always run single-worker.
#[must_use]
pub fn auto_tune_cap(parallel: Parallelism, attached: bool) -> usize {
    if attached {
        return 1;
    }
    let configured = match parallel {
        Parallelism::Fixed(n) => n,
        Parallelism::Auto => usize::MAX,
    };
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let memory_mb = system.total_memory() / 1024 / 1024;
    let by_memory = (memory_mb / SESSION_MEMORY_MB) as usize;
    let by_cpu = num_cpus::get();
    configured.min(by_memory).min(by_cpu).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attached_browser_caps_at_one() {
        assert_eq!(auto_tune_cap(Parallelism::Fixed(8), true), 1);
    }

    #[test]
    fn cap_never_below_one() {
        // Even if memory probing would derive 0 workers, the floor is 1.
        assert!(auto_tune_cap(Parallelism::Fixed(1), false) >= 1);
    }

    #[test]
    fn configured_limit_is_respected() {
        assert!(auto_tune_cap(Parallelism::Fixed(2), false) <= 2);
    }
}
