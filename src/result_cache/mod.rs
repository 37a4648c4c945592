//! Incremental result cache
//!
//! Content-addressed store of previous per-target results, indexed by the
//! build fingerprint. The fingerprint is the only coherence mechanism:
//! anything affecting audit output must be one of its ingredients, so an
//! exact match means the stored result is interchangeable with a fresh run.
//! Entries are append-only within a run (the first writer wins) and the
//! index persists across runs as `cache.json`.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{AuditError, AuditResult};
use crate::report::types::TargetResult;
use crate::report::to_canonical_json_pretty;

/// Bumped whenever the stored `TargetResult` schema changes shape;
/// mismatched files are discarded wholesale.
const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    schema_version: u32,
    entries: BTreeMap<String, TargetResult>,
}

/// Fingerprint-indexed store of target results
#[derive(Default)]
pub struct ResultCache {
    entries: DashMap<String, TargetResult>,
    /// Fingerprints written during this run
    fresh: DashMap<String, ()>,
}

impl ResultCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the persisted index. A missing file or a schema-version
    /// mismatch yields an empty cache, not an error.
    pub fn load(path: &Path) -> Self {
        let cache = Self::new();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return cache,
            Err(e) => {
                warn!("Failed to read cache index {}: {e}", path.display());
                return cache;
            }
        };
        match serde_json::from_str::<CacheFile>(&raw) {
            Ok(file) if file.schema_version == SCHEMA_VERSION => {
                for (fingerprint, result) in file.entries {
                    cache.entries.insert(fingerprint, result);
                }
                debug!("Loaded {} cached target results", cache.entries.len());
            }
            Ok(file) => {
                debug!(
                    "Discarding cache with schema v{} (current v{SCHEMA_VERSION})",
                    file.schema_version
                );
            }
            Err(e) => {
                warn!("Failed to parse cache index {}: {e}", path.display());
            }
        }
        cache
    }

    /// Look up a stored result by exact fingerprint. Hits are surfaced with
    /// `from_cache` set; timing fields still describe the cached run.
    #[must_use]
    pub fn get(&self, fingerprint: &str) -> Option<TargetResult> {
        self.entries.get(fingerprint).map(|entry| {
            let mut result = entry.value().clone();
            result.from_cache = true;
            result.fingerprint = Some(fingerprint.to_string());
            result
        })
    }

    /// Store a result. Concurrent puts for the same fingerprint collapse to
    /// the first writer.
    pub fn put(&self, fingerprint: &str, result: TargetResult) {
        let mut stored = result;
        stored.from_cache = false;
        if let Entry::Vacant(slot) = self.entries.entry(fingerprint.to_string()) {
            slot.insert(stored);
            self.fresh.insert(fingerprint.to_string(), ());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of entries first written during this run
    #[must_use]
    pub fn fresh_writes(&self) -> usize {
        self.fresh.len()
    }

    /// Persist the index atomically (write-temp then rename)
    pub fn persist(&self, path: &Path) -> AuditResult<()> {
        let file = CacheFile {
            schema_version: SCHEMA_VERSION,
            entries: self
                .entries
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        };
        let serialized = to_canonical_json_pretty(&file)?;

        let dir = path
            .parent()
            .ok_or_else(|| AuditError::Filesystem("cache path has no parent".into()))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, serialized.as_bytes())?;
        tmp.persist(path)
            .map_err(|e| AuditError::Filesystem(format!("cache rename failed: {e}")))?;
        debug!("Persisted {} cache entries to {}", file.entries.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::types::collect_scores;
    use crate::target::{Device, Scope, Target};
    use chrono::Utc;
    use std::collections::BTreeMap as Map;

    fn result(path: &str) -> TargetResult {
        TargetResult {
            target: Target {
                path: path.into(),
                label: "t".into(),
                device: Device::Mobile,
                scope: Scope::Public,
            },
            fingerprint: Some("f".repeat(32)),
            started_at: Utc::now(),
            duration_ms: 1234,
            plugins: Map::new(),
            scores: collect_scores(&Map::new()),
            core_metrics: Default::default(),
            from_cache: false,
            retries: 1,
            error: None,
        }
    }

    #[test]
    fn round_trip_preserves_value() {
        let cache = ResultCache::new();
        cache.put("abc", result("/"));
        let got = cache.get("abc").expect("hit");
        assert!(got.from_cache);
        assert_eq!(got.duration_ms, 1234);
        assert_eq!(got.retries, 1);
        assert!(cache.get("other").is_none());
    }

    #[test]
    fn first_writer_wins() {
        let cache = ResultCache::new();
        cache.put("abc", result("/first"));
        cache.put("abc", result("/second"));
        assert_eq!(cache.get("abc").expect("hit").target.path, "/first");
        assert_eq!(cache.fresh_writes(), 1);
    }

    #[test]
    fn persist_and_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");

        let cache = ResultCache::new();
        cache.put("abc", result("/"));
        cache.persist(&path).expect("persist");

        let reloaded = ResultCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.fresh_writes(), 0);
        let got = reloaded.get("abc").expect("hit");
        assert!(got.from_cache);
        assert_eq!(got.target.path, "/");
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = ResultCache::load(&dir.path().join("absent.json"));
        assert!(cache.is_empty());
    }

    #[test]
    fn schema_mismatch_discards_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.json");
        std::fs::write(
            &path,
            r#"{"schema_version": 1, "entries": {}}"#,
        )
        .expect("write");
        let cache = ResultCache::load(&path);
        assert!(cache.is_empty());
    }
}
