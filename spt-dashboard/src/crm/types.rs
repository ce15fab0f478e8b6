//! Record source data types
//!
//! Everything the upstream CRM hands back is decoded into these types at the
//! client boundary; the rest of the crate never sees response JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// One CRM entity instance (a deal or an account): field name → value.
///
/// Values are kept as strings; empty cells count as missing.
pub type RawRecord = BTreeMap<String, String>;

/// Look up a field, treating empty and whitespace-only values as missing
pub fn field<'a>(record: &'a RawRecord, name: &str) -> Option<&'a str> {
    record
        .get(name)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

/// The two CRM modules the dashboard aggregates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrmModule {
    Deals,
    Accounts,
}

impl CrmModule {
    pub const ALL: [CrmModule; 2] = [CrmModule::Deals, CrmModule::Accounts];

    /// Module API name used by the CRM
    pub fn api_name(&self) -> &'static str {
        match self {
            CrmModule::Deals => "Deals",
            CrmModule::Accounts => "Accounts",
        }
    }
}

impl fmt::Display for CrmModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for CrmModule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "deals" | "deal" => Ok(CrmModule::Deals),
            "accounts" | "account" => Ok(CrmModule::Accounts),
            other => Err(format!("Unsupported module: {}", other)),
        }
    }
}

/// Bulk export job state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl FromStr for JobStatus {
    type Err = String;

    /// Accepts the upstream spellings (`ADDED`, `IN PROGRESS`, ...)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "ADDED" | "QUEUED" => Ok(JobStatus::Queued),
            "IN_PROGRESS" | "RUNNING" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// Filter applied to a bulk export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criteria {
    /// Field API name, e.g. `Modified_Time`
    pub field: String,
    /// Comparator, e.g. `greater_than`, `equal`
    pub comparator: String,
    pub value: serde_json::Value,
}

/// A submitted bulk export job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkJob {
    pub id: String,
    pub status: JobStatus,
    pub module: String,
    pub fields: Vec<String>,
    pub criteria: Option<Criteria>,
}

impl BulkJob {
    /// Job as it stands right after submission
    pub fn submitted(
        id: String,
        module: &str,
        fields: &[String],
        criteria: Option<&Criteria>,
    ) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            module: module.to_string(),
            fields: fields.to_vec(),
            criteria: criteria.cloned(),
        }
    }
}

/// Field metadata entry for a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMeta {
    pub api_name: String,
    /// Managed by the CRM itself
    pub system_managed: bool,
    pub read_only: bool,
}

/// One page of a direct (non-bulk) record read
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<RawRecord>,
    pub more_records: bool,
}
