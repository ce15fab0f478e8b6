//! In-memory record source
//!
//! Every submitted job completes after `polls_until_complete` status checks
//! and yields the CSV registered for its module. The field list of each
//! submission is kept per module.

use async_trait::async_trait;
use spt_dashboard::crm::{Criteria, FieldMeta, JobStatus, RecordSource, SourceError};
use spt_dashboard::models::CurrencyInfo;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct FakeRecordSource {
    payloads: HashMap<String, Vec<u8>>,
    jobs: Mutex<HashMap<String, (String, usize)>>,
    pub polls_until_complete: usize,
    pub fail_jobs: bool,
    pub reject_submit: bool,
    pub currency: Option<CurrencyInfo>,
    pub fields: HashMap<String, Vec<FieldMeta>>,
    submits: AtomicUsize,
    submitted_fields: Mutex<HashMap<String, Vec<String>>>,
}

impl FakeRecordSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_csv(mut self, module: &str, csv: &str) -> Self {
        self.payloads.insert(module.to_string(), csv.as_bytes().to_vec());
        self
    }

    pub fn with_payload(mut self, module: &str, bytes: Vec<u8>) -> Self {
        self.payloads.insert(module.to_string(), bytes);
        self
    }

    pub fn submits(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Fields requested by the latest submission for `module`
    pub fn fields_submitted_for(&self, module: &str) -> Option<Vec<String>> {
        self.submitted_fields.lock().unwrap().get(module).cloned()
    }
}

#[async_trait]
impl RecordSource for FakeRecordSource {
    async fn submit_bulk_job(
        &self,
        module: &str,
        fields: &[String],
        _criteria: Option<&Criteria>,
    ) -> Result<String, SourceError> {
        let n = self.submits.fetch_add(1, Ordering::SeqCst);
        self.submitted_fields
            .lock()
            .unwrap()
            .insert(module.to_string(), fields.to_vec());
        if self.reject_submit {
            return Err(SourceError::Api {
                status: 400,
                message: "INVALID_QUERY: module not permitted".to_string(),
            });
        }

        let job_id = format!("{}{}", 4_150_868_000_000_u64 + n as u64, module.len());
        self.jobs
            .lock()
            .unwrap()
            .insert(job_id.clone(), (module.to_string(), 0));
        Ok(job_id)
    }

    async fn get_job_status(&self, job_id: &str) -> Result<JobStatus, SourceError> {
        let mut jobs = self.jobs.lock().unwrap();
        let (_, polls) = jobs
            .get_mut(job_id)
            .ok_or_else(|| SourceError::Api {
                status: 404,
                message: format!("unknown job {}", job_id),
            })?;
        *polls += 1;

        Ok(if *polls <= self.polls_until_complete {
            JobStatus::InProgress
        } else if self.fail_jobs {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        })
    }

    async fn download_job_result(&self, job_id: &str) -> Result<Vec<u8>, SourceError> {
        let jobs = self.jobs.lock().unwrap();
        let (module, _) = jobs
            .get(job_id)
            .ok_or_else(|| SourceError::NoContent(job_id.to_string()))?;
        self.payloads
            .get(module)
            .cloned()
            .ok_or_else(|| SourceError::NoContent(module.clone()))
    }

    async fn get_module_fields(&self, module: &str) -> Result<Vec<FieldMeta>, SourceError> {
        self.fields
            .get(module)
            .cloned()
            .ok_or_else(|| SourceError::Network("metadata endpoint unreachable".to_string()))
    }

    async fn get_base_currency(&self) -> Result<CurrencyInfo, SourceError> {
        self.currency
            .clone()
            .ok_or_else(|| SourceError::Network("org endpoint unreachable".to_string()))
    }
}
