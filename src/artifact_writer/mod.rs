//! Artifact bundle writer
//!
//! Persists the run's output files into the output directory. Existing
//! files are overwritten atomically (write-temp then rename). Large JSON
//! payloads additionally get a gzip side-car, compressed off the async
//! runtime when they cross the blocking threshold. Only mandatory artifacts
//! can fail the run; optional ones log a warning and are recorded as
//! unsuccessful in the run metadata.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{AuditError, AuditResult};
use crate::plugin::PluginArtifact;
use crate::report::types::ArtifactRecord;

/// Payloads above this size get a gzip side-car
const GZIP_THRESHOLD_BYTES: usize = 256 * 1024;
/// Compression above this size moves to the blocking thread pool
const BLOCKING_THRESHOLD_BYTES: usize = 1024 * 1024;

/// Writes the artifact bundle and records each attempt
pub struct ArtifactWriter {
    output_dir: PathBuf,
    records: Vec<ArtifactRecord>,
}

impl ArtifactWriter {
    /// Create the writer, ensuring the output directory exists
    pub fn new(output_dir: impl Into<PathBuf>) -> AuditResult<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self {
            output_dir,
            records: Vec::new(),
        })
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write one artifact. Mandatory write failures propagate; optional
    /// failures are recorded and swallowed.
    pub async fn write(
        &mut self,
        name: &str,
        content: &[u8],
        mandatory: bool,
    ) -> AuditResult<()> {
        let path = self.output_dir.join(name);
        match self.write_atomic(&path, content).await {
            Ok(()) => {
                self.records.push(ArtifactRecord {
                    name: name.to_string(),
                    path: path.clone(),
                    ok: true,
                    bytes: Some(content.len() as u64),
                });
            }
            Err(e) if mandatory => {
                self.records.push(ArtifactRecord {
                    name: name.to_string(),
                    path,
                    ok: false,
                    bytes: None,
                });
                return Err(AuditError::Filesystem(format!(
                    "mandatory artifact {name} failed: {e}"
                )));
            }
            Err(e) => {
                warn!("Optional artifact {name} failed: {e}");
                self.records.push(ArtifactRecord {
                    name: name.to_string(),
                    path,
                    ok: false,
                    bytes: None,
                });
            }
        }

        if name.ends_with(".json") && content.len() >= GZIP_THRESHOLD_BYTES {
            let gz_name = format!("{name}.gz");
            if let Err(e) = self.write_gzip(&gz_name, content).await {
                warn!("Gzip side-car {gz_name} failed: {e}");
            }
        }

        Ok(())
    }

    /// Persist a plugin's auxiliary files under `<output>/<plugin id>/`
    pub async fn write_plugin_artifacts(
        &mut self,
        plugin_id: &str,
        artifacts: &[PluginArtifact],
    ) {
        for artifact in artifacts {
            let Some(bytes) = &artifact.bytes else {
                continue;
            };
            let name = format!("{plugin_id}/{}", artifact.name);
            if let Err(e) = self.write(&name, bytes, false).await {
                warn!("Plugin artifact {name} failed: {e}");
            }
        }
    }

    /// Records of every write attempted so far
    #[must_use]
    pub fn records(&self) -> &[ArtifactRecord] {
        &self.records
    }

    async fn write_atomic(&self, path: &Path, content: &[u8]) -> AuditResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| AuditError::Filesystem("artifact path has no parent".into()))?
            .to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let path = path.to_path_buf();
        let path_for_task = path.clone();
        let content = content.to_vec();
        tokio::task::spawn_blocking(move || -> AuditResult<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&content)?;
            tmp.persist(&path_for_task)
                .map_err(|e| AuditError::Filesystem(format!("rename failed: {e}")))?;
            Ok(())
        })
        .await
        .map_err(|e| AuditError::Internal(format!("write task panicked: {e}")))??;

        debug!("Wrote artifact {}", path.display());
        Ok(())
    }

    async fn write_gzip(&mut self, name: &str, content: &[u8]) -> AuditResult<()> {
        let compressed = if content.len() >= BLOCKING_THRESHOLD_BYTES {
            let owned = content.to_vec();
            tokio::task::spawn_blocking(move || gzip_bytes(&owned))
                .await
                .map_err(|e| AuditError::Internal(format!("compression task panicked: {e}")))??
        } else {
            gzip_bytes(content)?
        };

        let path = self.output_dir.join(name);
        self.write_atomic(&path, &compressed).await?;
        self.records.push(ArtifactRecord {
            name: name.to_string(),
            path,
            ok: true,
            bytes: Some(compressed.len() as u64),
        });
        Ok(())
    }
}

fn gzip_bytes(content: &[u8]) -> AuditResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content)?;
    encoder
        .finish()
        .map_err(|e| AuditError::Internal(format!("gzip failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[tokio::test]
    async fn writes_and_records_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ArtifactWriter::new(dir.path()).expect("writer");
        writer
            .write("summary.json", b"{\"a\":1}", true)
            .await
            .expect("write");

        let on_disk = std::fs::read_to_string(dir.path().join("summary.json")).expect("read");
        assert_eq!(on_disk, "{\"a\":1}");
        assert_eq!(writer.records().len(), 1);
        assert!(writer.records()[0].ok);
    }

    #[tokio::test]
    async fn overwrites_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ArtifactWriter::new(dir.path()).expect("writer");
        writer.write("triage.md", b"old", false).await.expect("write");
        writer.write("triage.md", b"new", false).await.expect("write");
        let on_disk = std::fs::read_to_string(dir.path().join("triage.md")).expect("read");
        assert_eq!(on_disk, "new");
    }

    #[tokio::test]
    async fn large_json_gets_gzip_sidecar() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ArtifactWriter::new(dir.path()).expect("writer");
        let payload = vec![b'x'; GZIP_THRESHOLD_BYTES + 1];
        writer
            .write("summary.json", &payload, true)
            .await
            .expect("write");

        let gz_path = dir.path().join("summary.json.gz");
        assert!(gz_path.exists());
        let mut decoder = GzDecoder::new(std::fs::File::open(gz_path).expect("open"));
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).expect("decompress");
        assert_eq!(decompressed, payload);
    }

    #[tokio::test]
    async fn plugin_artifacts_land_in_subdirectory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ArtifactWriter::new(dir.path()).expect("writer");
        let artifacts = vec![PluginArtifact::from_bytes("coverage.json", b"{}".to_vec())];
        writer.write_plugin_artifacts("coverage-waste", &artifacts).await;
        assert!(dir.path().join("coverage-waste/coverage.json").exists());
    }

    #[tokio::test]
    async fn optional_failure_does_not_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = ArtifactWriter::new(dir.path()).expect("writer");
        // A name that collides with an existing directory cannot be renamed into
        std::fs::create_dir_all(dir.path().join("blocked.json")).expect("mkdir");
        let result = writer.write("blocked.json", b"{}", false).await;
        assert!(result.is_ok());
        assert!(!writer.records()[0].ok);
    }
}
