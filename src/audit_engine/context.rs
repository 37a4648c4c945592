//! Per-target execution context
//!
//! Built once per target from an acquired session: navigates the page,
//! captures console messages, runtime exceptions, and network traffic over
//! CDP, and optionally collects JS coverage (which costs one reload).
//! Plugins receive the context mutably and exchange intermediate data
//! through the namespaced `shared` map.

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFinished, EventRequestWillBeSent, EventResponseReceived, ResourceType,
};
use chromiumoxide::cdp::js_protocol::profiler;
use chromiumoxide::cdp::js_protocol::runtime::{EventConsoleApiCalled, EventExceptionThrown};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AuditError, AuditResult};
use crate::session_pool::{SessionHandle, SimulatedMultipliers};
use crate::target::Target;

/// Console message level, collapsed from the CDP console API types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warning,
    Error,
    /// Uncaught runtime exception
    Exception,
}

/// One captured console message or runtime exception
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub source_url: Option<String>,
}

/// Request/response metadata for one network exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub url: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub resource_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<u16>,
    pub transfer_bytes: u64,
}

/// Outcome of the initial navigation. The final URL is recorded even when
/// the load failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationResult {
    pub requested_url: String,
    pub final_url: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<u16>,
    /// Response headers of the document, lowercase keys
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

/// Used/total bytes for one script, from CDP precise coverage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptCoverage {
    pub url: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl ScriptCoverage {
    #[must_use]
    pub fn unused_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.used_bytes)
    }
}

/// Knobs for context establishment
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    pub nav_timeout: Duration,
    /// Quiet period after load before logs are snapshotted
    pub settle: Duration,
    pub collect_coverage: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            nav_timeout: Duration::from_secs(30),
            settle: Duration::from_millis(500),
            collect_coverage: false,
        }
    }
}

/// Per-target transient state handed to plugins.
///
/// Exclusively owned by the plugin scheduler for the duration of one target
/// and disposed on session release; it never outlives its session.
pub struct ExecutionContext {
    pub target: Target,
    /// Live page handle; absent in detached (test) contexts
    pub page: Option<Page>,
    pub navigation: NavigationResult,
    pub console_log: Vec<ConsoleEntry>,
    pub network_log: Vec<NetworkEntry>,
    pub coverage: Option<Vec<ScriptCoverage>>,
    /// Simulated throttling multipliers; `None` in devtools mode
    pub simulated: Option<SimulatedMultipliers>,
    pub cancel: CancellationToken,
    shared: BTreeMap<String, serde_json::Value>,
}

impl ExecutionContext {
    /// Establish a context on an acquired session by navigating to the
    /// target URL and capturing console, network, and (optionally) coverage
    /// data.
    pub async fn establish(
        session: &SessionHandle,
        target: Target,
        url: String,
        simulated: Option<SimulatedMultipliers>,
        options: ContextOptions,
        cancel: CancellationToken,
    ) -> AuditResult<Self> {
        if cancel.is_cancelled() {
            return Err(AuditError::Cancelled);
        }
        let page = &session.page;

        let console_sink: Arc<StdMutex<Vec<ConsoleEntry>>> = Arc::new(StdMutex::new(Vec::new()));
        let network_sink: Arc<StdMutex<NetworkCollector>> =
            Arc::new(StdMutex::new(NetworkCollector::default()));
        let collector_tasks = spawn_collectors(page, &console_sink, &network_sink).await?;

        if options.collect_coverage {
            page.execute(profiler::EnableParams::default())
                .await
                .map_err(|e| AuditError::Session(format!("profiler enable failed: {e}")))?;
            page.execute(profiler::StartPreciseCoverageParams {
                call_count: Some(false),
                detailed: Some(true),
                allow_triggered_updates: None,
            })
            .await
            .map_err(|e| AuditError::Session(format!("coverage start failed: {e}")))?;
        }

        // Navigate. Failures still produce a context so partial logs are
        // preserved and the final URL is recorded.
        let nav_error = match tokio::time::timeout(options.nav_timeout, async {
            page.goto(url.as_str()).await?;
            page.wait_for_navigation().await?;
            Ok::<(), chromiumoxide::error::CdpError>(())
        })
        .await
        {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("navigation failed: {e}")),
            Err(_) => Some(format!(
                "navigation timed out after {:?}",
                options.nav_timeout
            )),
        };

        // Coverage needs one reload so byte counts start from a clean load.
        let coverage = if options.collect_coverage && nav_error.is_none() {
            match collect_coverage_with_reload(page, options.nav_timeout).await {
                Ok(coverage) => Some(coverage),
                Err(e) => {
                    warn!("Coverage collection failed for {}: {e}", target.path);
                    None
                }
            }
        } else {
            None
        };

        if nav_error.is_none() && !options.settle.is_zero() {
            tokio::time::sleep(options.settle).await;
        }

        for task in collector_tasks {
            task.abort();
        }

        let final_url = page.url().await.ok().flatten().unwrap_or_else(|| url.clone());
        let (status, headers) = {
            let collector = network_sink.lock().unwrap_or_else(|e| e.into_inner());
            collector.document_response(&url, &final_url)
        };

        let console_log = {
            let mut sink = console_sink.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *sink)
        };
        let network_log = {
            let mut collector = network_sink.lock().unwrap_or_else(|e| e.into_inner());
            collector.into_entries()
        };

        let navigation = NavigationResult {
            requested_url: url,
            final_url,
            status,
            headers,
            succeeded: nav_error.is_none(),
            error: nav_error,
        };

        Ok(Self {
            target,
            page: Some(page.clone()),
            navigation,
            console_log,
            network_log,
            coverage,
            simulated,
            cancel,
            shared: BTreeMap::new(),
        })
    }

    /// Build a context with no live page, for plugins that audit purely
    /// from captured data and for tests.
    #[must_use]
    pub fn detached(target: Target, navigation: NavigationResult) -> Self {
        Self {
            target,
            page: None,
            navigation,
            console_log: Vec::new(),
            network_log: Vec::new(),
            coverage: None,
            simulated: None,
            cancel: CancellationToken::new(),
            shared: BTreeMap::new(),
        }
    }

    /// Read another plugin's shared data. Callers must declare the owning
    /// plugin in `depends_on`; there is no implicit cross-plugin access.
    #[must_use]
    pub fn shared(&self, plugin_id: &str) -> Option<&serde_json::Value> {
        self.shared.get(plugin_id)
    }

    /// Publish intermediate data under the writing plugin's namespace
    pub fn set_shared(&mut self, plugin_id: &str, value: serde_json::Value) {
        self.shared.insert(plugin_id.to_string(), value);
    }
}

/// Accumulates network events keyed by request id until they can be
/// flattened into time-ordered entries.
#[derive(Default)]
struct NetworkCollector {
    order: Vec<String>,
    pending: HashMap<String, NetworkEntry>,
    /// request id -> (is document, response url, status, headers)
    documents: Vec<(String, u16, BTreeMap<String, String>)>,
}

impl NetworkCollector {
    fn on_request(&mut self, request_id: String, url: String, method: String) {
        if !self.pending.contains_key(&request_id) {
            self.order.push(request_id.clone());
        }
        self.pending.insert(
            request_id,
            NetworkEntry {
                url,
                method,
                resource_type: None,
                status: None,
                transfer_bytes: 0,
            },
        );
    }

    fn on_response(
        &mut self,
        request_id: &str,
        status: u16,
        resource_type: &ResourceType,
        url: &str,
        headers: BTreeMap<String, String>,
    ) {
        if let Some(entry) = self.pending.get_mut(request_id) {
            entry.status = Some(status);
            entry.resource_type = Some(format!("{resource_type:?}").to_lowercase());
        }
        if *resource_type == ResourceType::Document {
            self.documents.push((url.to_string(), status, headers));
        }
    }

    fn on_finished(&mut self, request_id: &str, encoded_length: f64) {
        if let Some(entry) = self.pending.get_mut(request_id) {
            entry.transfer_bytes = encoded_length.max(0.0) as u64;
        }
    }

    /// Status and headers of the document response matching the audited URL
    /// (normalized), falling back to the final URL for redirects.
    fn document_response(
        &self,
        requested: &str,
        final_url: &str,
    ) -> (Option<u16>, BTreeMap<String, String>) {
        let requested_norm = normalize_for_match(requested);
        let final_norm = normalize_for_match(final_url);
        for (url, status, headers) in &self.documents {
            let candidate = normalize_for_match(url);
            if candidate.as_ref() == requested_norm.as_ref() || candidate.as_ref() == final_norm.as_ref()
            {
                return (Some(*status), headers.clone());
            }
        }
        // Fall back to the first document response (e.g. interim redirect)
        self.documents
            .first()
            .map(|(_, status, headers)| (Some(*status), headers.clone()))
            .unwrap_or((None, BTreeMap::new()))
    }

    fn into_entries(&mut self) -> Vec<NetworkEntry> {
        let mut entries = Vec::with_capacity(self.order.len());
        for id in self.order.drain(..) {
            if let Some(entry) = self.pending.remove(&id) {
                entries.push(entry);
            }
        }
        entries
    }
}

/// Normalize a URL for matching: drop query/fragment and trailing slash,
/// lowercase the host. Schemes stay distinct. Shared with the offender
/// rollup so identical resources coalesce across targets.
pub(crate) fn normalize_for_match(url_str: &str) -> Option<String> {
    let parsed = url::Url::parse(url_str).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let path = parsed.path().trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    Some(format!("{}://{host}{path}", parsed.scheme()))
}

/// Attach CDP listeners for console, exception, and network events.
async fn spawn_collectors(
    page: &Page,
    console_sink: &Arc<StdMutex<Vec<ConsoleEntry>>>,
    network_sink: &Arc<StdMutex<NetworkCollector>>,
) -> AuditResult<Vec<JoinHandle<()>>> {
    let mut tasks = Vec::with_capacity(4);

    let mut console_events = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(|e| AuditError::Session(format!("console listener failed: {e}")))?;
    let sink = Arc::clone(console_sink);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = console_events.next().await {
            let level = match format!("{:?}", event.r#type).to_lowercase().as_str() {
                "error" | "assert" => ConsoleLevel::Error,
                "warning" => ConsoleLevel::Warning,
                "info" => ConsoleLevel::Info,
                "debug" | "verbose" => ConsoleLevel::Log,
                _ => ConsoleLevel::Log,
            };
            let text = event
                .args
                .iter()
                .map(|arg| {
                    if let Some(value) = &arg.value {
                        match value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        }
                    } else if let Some(desc) = &arg.description {
                        desc.clone()
                    } else {
                        String::from("[unserializable]")
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            let source_url = event
                .stack_trace
                .as_ref()
                .and_then(|st| st.call_frames.first())
                .map(|frame| frame.url.clone());
            if let Ok(mut entries) = sink.lock() {
                entries.push(ConsoleEntry {
                    level,
                    text,
                    source_url,
                });
            }
        }
    }));

    let mut exception_events = page
        .event_listener::<EventExceptionThrown>()
        .await
        .map_err(|e| AuditError::Session(format!("exception listener failed: {e}")))?;
    let sink = Arc::clone(console_sink);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = exception_events.next().await {
            let details = &event.exception_details;
            let text = details
                .exception
                .as_ref()
                .and_then(|e| e.description.clone())
                .unwrap_or_else(|| details.text.clone());
            if let Ok(mut entries) = sink.lock() {
                entries.push(ConsoleEntry {
                    level: ConsoleLevel::Exception,
                    text,
                    source_url: if details.url.as_deref().unwrap_or("").is_empty() {
                        None
                    } else {
                        details.url.clone()
                    },
                });
            }
        }
    }));

    let mut request_events = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| AuditError::Session(format!("request listener failed: {e}")))?;
    let sink = Arc::clone(network_sink);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = request_events.next().await {
            if let Ok(mut collector) = sink.lock() {
                collector.on_request(
                    event.request_id.inner().clone(),
                    event.request.url.clone(),
                    event.request.method.clone(),
                );
            }
        }
    }));

    let mut response_events = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| AuditError::Session(format!("response listener failed: {e}")))?;
    let sink = Arc::clone(network_sink);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = response_events.next().await {
            let headers = flatten_headers(event.response.headers.inner());
            if let Ok(mut collector) = sink.lock() {
                collector.on_response(
                    event.request_id.inner(),
                    event.response.status.clamp(0, i64::from(u16::MAX)) as u16,
                    &event.r#type,
                    &event.response.url,
                    headers,
                );
            }
        }
    }));

    let mut finished_events = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(|e| AuditError::Session(format!("loading listener failed: {e}")))?;
    let sink = Arc::clone(network_sink);
    tasks.push(tokio::spawn(async move {
        while let Some(event) = finished_events.next().await {
            if let Ok(mut collector) = sink.lock() {
                collector.on_finished(event.request_id.inner(), event.encoded_data_length);
            }
        }
    }));

    Ok(tasks)
}

/// Lowercase header keys from the CDP headers object
fn flatten_headers(headers_json: &serde_json::Value) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    if let Some(object) = headers_json.as_object() {
        for (key, value) in object {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            headers.insert(key.to_lowercase(), value);
        }
    }
    headers
}

/// Reload the page with precise coverage running, then fold CDP function
/// ranges into per-script used/total byte counts.
async fn collect_coverage_with_reload(
    page: &Page,
    nav_timeout: Duration,
) -> AuditResult<Vec<ScriptCoverage>> {
    tokio::time::timeout(nav_timeout, async {
        page.reload().await?;
        page.wait_for_navigation().await?;
        Ok::<(), chromiumoxide::error::CdpError>(())
    })
    .await
    .map_err(|_| AuditError::Timeout(format!("coverage reload timed out after {nav_timeout:?}")))?
    .map_err(|e| AuditError::Session(format!("coverage reload failed: {e}")))?;

    let taken = page
        .execute(profiler::TakePreciseCoverageParams::default())
        .await
        .map_err(|e| AuditError::Session(format!("take coverage failed: {e}")))?;
    let _ = page
        .execute(profiler::StopPreciseCoverageParams::default())
        .await;

    let mut coverage = Vec::new();
    for script in &taken.result.result {
        if script.url.is_empty() {
            continue;
        }
        let mut total: u64 = 0;
        let mut used: u64 = 0;
        for function in &script.functions {
            for range in &function.ranges {
                let len = (range.end_offset - range.start_offset).max(0) as u64;
                total = total.max(range.end_offset.max(0) as u64);
                if range.count > 0 {
                    used += len;
                }
            }
        }
        coverage.push(ScriptCoverage {
            url: script.url.clone(),
            total_bytes: total,
            used_bytes: used.min(total),
        });
    }
    debug!("Collected coverage for {} scripts", coverage.len());
    Ok(coverage)
}
