//! Typed view of an account record

use crate::crm::RawRecord;

/// Bucket used for accounts with no industry or account type
pub const UNKNOWN: &str = "Unknown";

/// Grouping keys of a customer account
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub industry: Option<String>,
    pub account_type: Option<String>,
}

impl Account {
    pub fn from_record(record: &RawRecord) -> Self {
        // Keys keep their exact value; only blank cells are missing
        let exact = |name: &str| record.get(name).filter(|v| !v.trim().is_empty()).cloned();

        Self {
            industry: exact("Industry"),
            account_type: exact("Account_Type"),
        }
    }

    pub fn industry_or_unknown(&self) -> &str {
        self.industry.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn account_type_or_unknown(&self) -> &str {
        self.account_type.as_deref().unwrap_or(UNKNOWN)
    }
}
