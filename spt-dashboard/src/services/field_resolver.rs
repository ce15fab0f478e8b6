//! Field list resolution for bulk exports
//!
//! Fields come from the CRM's module metadata when available. Any failure on
//! that path, including an empty metadata result, falls back to a fixed
//! per-module list so a refresh can always proceed.

use thiserror::Error;
use tracing::{info, warn};

use crate::crm::{CrmModule, RecordSource, SourceError};

const DEAL_FIELDS: &[&str] = &[
    "Deal_Name",
    "Amount",
    "Stage",
    "Probability",
    "Closing_Date",
    "Account_Name",
    "Owner",
    "Created_Time",
    "Modified_Time",
];

const ACCOUNT_FIELDS: &[&str] = &[
    "Account_Name",
    "Industry",
    "Account_Type",
    "Website",
    "Phone",
    "Billing_Country",
    "Billing_State",
    "Owner",
    "Created_Time",
    "Modified_Time",
];

/// Metadata-based field discovery failure
#[derive(Debug, Error)]
pub enum FieldResolutionError {
    #[error("Field metadata unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("No exportable fields for module {0}")]
    Empty(String),
}

/// Where a resolved field list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrigin {
    Metadata,
    Fallback,
}

/// Outcome of [`resolve_fields`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldResolution {
    pub fields: Vec<String>,
    pub origin: FieldOrigin,
}

/// Fixed field list used when metadata is unavailable
pub fn fallback_fields(module: CrmModule) -> Vec<String> {
    let fields = match module {
        CrmModule::Deals => DEAL_FIELDS,
        CrmModule::Accounts => ACCOUNT_FIELDS,
    };
    fields.iter().map(|f| f.to_string()).collect()
}

/// Exportable fields from module metadata, in metadata order
pub async fn discover_fields(
    source: &dyn RecordSource,
    module: CrmModule,
) -> Result<Vec<String>, FieldResolutionError> {
    let fields: Vec<String> = source
        .get_module_fields(module.api_name())
        .await?
        .into_iter()
        .filter(|f| !f.system_managed && !f.read_only)
        .map(|f| f.api_name)
        .collect();

    if fields.is_empty() {
        return Err(FieldResolutionError::Empty(module.to_string()));
    }
    Ok(fields)
}

/// Resolve the field list for a module. Never fails.
pub async fn resolve_fields(source: &dyn RecordSource, module: CrmModule) -> FieldResolution {
    match discover_fields(source, module).await {
        Ok(fields) => {
            info!(
                module = %module,
                field_count = fields.len(),
                "Resolved fields from metadata"
            );
            FieldResolution {
                fields,
                origin: FieldOrigin::Metadata,
            }
        }
        Err(e) => {
            let fields = fallback_fields(module);
            warn!(
                module = %module,
                field_count = fields.len(),
                error = %e,
                "Using fallback field list"
            );
            FieldResolution {
                fields,
                origin: FieldOrigin::Fallback,
            }
        }
    }
}
