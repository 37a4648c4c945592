//! Progress reporting
//!
//! The orchestrator emits structured events as it moves through phases.
//! Sinks decide what to do with them: the NDJSON sink streams one JSON
//! record per line for machine consumers, the no-op sink is for embedders
//! that only want the final summary. The ETA is an exponentially weighted
//! moving average of per-target durations.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

/// Orchestrator phase, also used in progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Preparing,
    WarmingUp,
    Running,
    Aggregating,
    Writing,
    Done,
    Cancelled,
    Failed,
}

/// What a progress record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEventKind {
    TargetStart,
    TargetDone,
    Notice,
}

/// One structured progress record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: Phase,
    pub event: ProgressEventKind,
    pub completed: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub eta_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_target: Option<String>,
    /// Notice kind, e.g. `worker_cap_reduced` or `cache_disabled`
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kind: Option<String>,
}

impl ProgressEvent {
    #[must_use]
    pub fn notice(phase: Phase, kind: impl Into<String>, completed: usize, total: usize) -> Self {
        Self {
            phase,
            event: ProgressEventKind::Notice,
            completed,
            total,
            eta_ms: None,
            current_target: None,
            kind: Some(kind.into()),
        }
    }
}

/// Receives progress events at lifecycle points
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &ProgressEvent);
}

/// Sink that does nothing; all calls are inlined away
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpProgress;

impl ProgressSink for NoOpProgress {
    #[inline(always)]
    fn emit(&self, _event: &ProgressEvent) {}
}

/// Streams newline-delimited JSON records into a writer
pub struct NdjsonProgress<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> NdjsonProgress<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> ProgressSink for NdjsonProgress<W> {
    fn emit(&self, event: &ProgressEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let mut writer = self.writer.lock();
            let _ = writeln!(writer, "{line}");
            let _ = writer.flush();
        }
    }
}

/// Exponentially weighted moving average of per-target durations
pub struct EtaTracker {
    ewma_ms: Mutex<Option<f64>>,
    alpha: f64,
}

impl Default for EtaTracker {
    fn default() -> Self {
        Self {
            ewma_ms: Mutex::new(None),
            alpha: 0.3,
        }
    }
}

impl EtaTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, duration: Duration) {
        let sample = duration.as_millis() as f64;
        let mut ewma = self.ewma_ms.lock();
        *ewma = Some(match *ewma {
            Some(current) => current + self.alpha * (sample - current),
            None => sample,
        });
    }

    /// Estimated remaining time given outstanding targets and the number of
    /// workers draining them
    #[must_use]
    pub fn eta(&self, remaining: usize, workers: usize) -> Option<u64> {
        let ewma = (*self.ewma_ms.lock())?;
        let workers = workers.max(1) as f64;
        Some((ewma * remaining as f64 / workers) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_sink_writes_one_line_per_event() {
        let sink = NdjsonProgress::new(Vec::new());
        sink.emit(&ProgressEvent::notice(Phase::Running, "worker_cap_reduced", 5, 20));
        sink.emit(&ProgressEvent {
            phase: Phase::Running,
            event: ProgressEventKind::TargetDone,
            completed: 6,
            total: 20,
            eta_ms: Some(1000),
            current_target: Some("/#mobile".into()),
            kind: None,
        });
        let buffer = sink.writer.into_inner();
        let lines: Vec<&str> = std::str::from_utf8(&buffer)
            .expect("utf8")
            .trim()
            .lines()
            .collect();
        assert_eq!(lines.len(), 2);
        let first: ProgressEvent = serde_json::from_str(lines[0]).expect("parse");
        assert_eq!(first.kind.as_deref(), Some("worker_cap_reduced"));
        assert_eq!(first.event, ProgressEventKind::Notice);
    }

    #[test]
    fn eta_tracks_moving_average() {
        let tracker = EtaTracker::new();
        assert_eq!(tracker.eta(10, 2), None);
        tracker.record(Duration::from_millis(1000));
        let eta = tracker.eta(10, 2).expect("eta");
        assert_eq!(eta, 5000);
        // A faster sample pulls the average down
        tracker.record(Duration::from_millis(200));
        assert!(tracker.eta(10, 2).expect("eta") < 5000);
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&Phase::WarmingUp).expect("serialize"),
            "\"warming_up\""
        );
    }
}
