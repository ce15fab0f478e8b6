//! Bulk export orchestration
//!
//! Drives one CRM bulk read job to completion:
//!
//! ```text
//! submit ──► poll every `poll_interval` ──► COMPLETED ──► download ──► decode
//!                    │
//!                    ├── FAILED  ──► ExportError::JobFailed
//!                    └── timeout ──► ExportError::JobTimeout
//! ```
//!
//! The poll loop has no backoff and a timeout does not cancel the upstream
//! job. Raw payloads are kept in the working directory for audit.

use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use spt_common::time;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::crm::{BulkJob, Criteria, JobStatus, RawRecord, RecordSource, SourceError};

/// Leading bytes of a ZIP local file header
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Bulk export failures
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Bulk job submission rejected: {0}")]
    Submission(#[source] SourceError),

    #[error("Bulk job {job_id} failed upstream")]
    JobFailed { job_id: String },

    #[error("Bulk job {job_id} did not complete within {waited_secs}s")]
    JobTimeout { job_id: String, waited_secs: u64 },

    #[error("Bulk job status check failed: {0}")]
    Status(#[source] SourceError),

    #[error("Bulk job result download failed: {0}")]
    Download(#[source] SourceError),

    #[error("Bulk job payload could not be decoded: {0}")]
    Decode(String),
}

/// Records produced by a completed export
#[derive(Debug, Clone)]
pub struct ExportResult {
    /// The job in its final (completed) state
    pub job: BulkJob,
    pub record_count: usize,
    pub records: Vec<RawRecord>,
}

/// Bulk export orchestrator
pub struct BulkExporter {
    source: Arc<dyn RecordSource>,
    poll_interval: Duration,
    timeout: Duration,
    /// Downloaded archives and extracted CSVs land here; `None` disables
    work_dir: Option<PathBuf>,
}

impl BulkExporter {
    pub fn new(
        source: Arc<dyn RecordSource>,
        poll_interval: Duration,
        timeout: Duration,
        work_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            source,
            poll_interval,
            timeout,
            work_dir,
        }
    }

    /// Run a bulk export for `module` and return the parsed records
    pub async fn export(
        &self,
        module: &str,
        fields: &[String],
        criteria: Option<&Criteria>,
    ) -> Result<ExportResult, ExportError> {
        let job_id = self
            .source
            .submit_bulk_job(module, fields, criteria)
            .await
            .map_err(ExportError::Submission)?;

        info!(module = %module, job_id = %job_id, "Bulk read job submitted");

        let mut job = BulkJob::submitted(job_id, module, fields, criteria);
        self.wait_for_completion(&mut job).await?;
        let job_id = job.id.as_str();

        let payload = self
            .source
            .download_job_result(job_id)
            .await
            .map_err(ExportError::Download)?;

        debug!(job_id = %job_id, bytes = payload.len(), "Bulk read result downloaded");

        let stamp = time::file_stamp(time::now());
        let csv_bytes = if is_zip(&payload) {
            self.save_artifact(job_id, &stamp, "zip", &payload).await;
            let extracted = extract_first_csv(&payload)?;
            self.save_artifact(job_id, &stamp, "csv", &extracted).await;
            extracted
        } else {
            self.save_artifact(job_id, &stamp, "csv", &payload).await;
            payload
        };

        let records = parse_tabular(&csv_bytes)?;
        info!(
            module = %module,
            job_id = %job_id,
            record_count = records.len(),
            "Bulk read completed"
        );

        Ok(ExportResult {
            job,
            record_count: records.len(),
            records,
        })
    }

    /// Poll until `job` reaches a terminal status, keeping `job.status` current
    async fn wait_for_completion(&self, job: &mut BulkJob) -> Result<(), ExportError> {
        let started = Instant::now();

        loop {
            job.status = self
                .source
                .get_job_status(&job.id)
                .await
                .map_err(ExportError::Status)?;

            debug!(job_id = %job.id, status = %job.status, "Bulk read job polled");

            if job.status.is_terminal() {
                return match job.status {
                    JobStatus::Completed => Ok(()),
                    _ => Err(ExportError::JobFailed {
                        job_id: job.id.clone(),
                    }),
                };
            }

            if started.elapsed() >= self.timeout {
                warn!(
                    job_id = %job.id,
                    timeout_secs = self.timeout.as_secs(),
                    "Bulk read job timed out"
                );
                return Err(ExportError::JobTimeout {
                    job_id: job.id.clone(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Keep a raw payload on disk; failures never fail the export
    async fn save_artifact(&self, job_id: &str, stamp: &str, ext: &str, bytes: &[u8]) {
        let Some(dir) = &self.work_dir else {
            return;
        };
        let path = dir.join(format!("bulk_read_{}_{}.{}", job_id, stamp, ext));

        if let Err(e) = write_artifact(dir, &path, bytes).await {
            warn!(path = %path.display(), error = %e, "Failed to save bulk read artifact");
        } else {
            debug!(path = %path.display(), "Saved bulk read artifact");
        }
    }
}

async fn write_artifact(dir: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(path, bytes).await
}

/// Whether a payload is a ZIP container
pub fn is_zip(payload: &[u8]) -> bool {
    payload.starts_with(ZIP_MAGIC)
}

/// Contents of the first `.csv` entry of a ZIP container
pub fn extract_first_csv(payload: &[u8]) -> Result<Vec<u8>, ExportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(payload))
        .map_err(|e| ExportError::Decode(format!("invalid zip: {}", e)))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ExportError::Decode(format!("zip entry {}: {}", index, e)))?;

        if entry.is_file() && entry.name().to_ascii_lowercase().ends_with(".csv") {
            let mut contents = Vec::new();
            entry
                .read_to_end(&mut contents)
                .map_err(|e| ExportError::Decode(format!("zip entry {}: {}", index, e)))?;
            return Ok(contents);
        }
    }

    Err(ExportError::Decode("zip contains no .csv entry".to_string()))
}

/// Parse CSV bytes into records keyed by the header row. Empty cells are
/// left out of the record.
pub fn parse_tabular(bytes: &[u8]) -> Result<Vec<RawRecord>, ExportError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| ExportError::Decode(format!("csv header: {}", e)))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| ExportError::Decode(format!("csv row: {}", e)))?;
        let record: RawRecord = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        records.push(record);
    }

    Ok(records)
}
