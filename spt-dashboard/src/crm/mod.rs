//! CRM record source
//!
//! `RecordSource` is the seam between the pipeline and the upstream CRM.
//! The production implementation is [`zoho::ZohoClient`]; tests substitute
//! scripted fakes. A source is constructed once and shared as
//! `Arc<dyn RecordSource>`; there is no process-wide client.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::CurrencyInfo;

pub mod types;
pub mod zoho;

pub use types::{
    field, BulkJob, Criteria, CrmModule, FieldMeta, JobStatus, RawRecord, RecordPage,
};
pub use zoho::ZohoClient;

/// Upper bound on pages read by [`fetch_all_records`]
pub const MAX_DIRECT_PAGES: u32 = 500;

/// Record source errors
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No content: {0}")]
    NoContent(String),

    #[error("Capability not supported: {0}")]
    Unsupported(&'static str),
}

/// Capabilities the pipeline consumes from the CRM
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Submit a bulk export job, returning the job identifier
    async fn submit_bulk_job(
        &self,
        module: &str,
        fields: &[String],
        criteria: Option<&Criteria>,
    ) -> Result<String, SourceError>;

    /// Current state of a bulk export job
    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, SourceError>;

    /// Raw result payload of a completed job (ZIP container or bare CSV)
    async fn download_job_result(&self, job_id: &str) -> Result<Vec<u8>, SourceError>;

    /// Field metadata for a module
    async fn get_module_fields(&self, _module: &str) -> Result<Vec<FieldMeta>, SourceError> {
        Err(SourceError::Unsupported("field metadata"))
    }

    /// Organization base currency
    async fn get_base_currency(&self) -> Result<CurrencyInfo, SourceError> {
        Err(SourceError::Unsupported("organization currency"))
    }

    /// One page (1-based) of a direct record read
    async fn get_records(
        &self,
        _module: &str,
        _fields: &[String],
        _page: u32,
    ) -> Result<RecordPage, SourceError> {
        Err(SourceError::Unsupported("direct record reads"))
    }
}

/// Read every page of a module through direct reads
pub async fn fetch_all_records(
    source: &dyn RecordSource,
    module: &str,
    fields: &[String],
) -> Result<Vec<RawRecord>, SourceError> {
    let mut records = Vec::new();

    for page in 1..=MAX_DIRECT_PAGES {
        let batch = source.get_records(module, fields, page).await?;
        tracing::debug!(
            module = %module,
            page,
            count = batch.records.len(),
            "Fetched record page"
        );
        records.extend(batch.records);

        if !batch.more_records {
            return Ok(records);
        }
    }

    tracing::warn!(
        module = %module,
        max_pages = MAX_DIRECT_PAGES,
        "Stopped direct read at page limit"
    );
    Ok(records)
}
