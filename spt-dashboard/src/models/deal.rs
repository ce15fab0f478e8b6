//! Typed view of a deal record

use chrono::NaiveDate;
use spt_common::time::parse_date;

use crate::crm::{field, RawRecord};

/// Stage value that counts as a won deal
pub const CLOSED_WON: &str = "Closed Won";

/// The parts of a sales opportunity the dashboard aggregates.
///
/// Built leniently: unparsable amounts become 0, unparsable dates `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    pub amount: f64,
    pub stage: Option<String>,
    pub closing_date: Option<NaiveDate>,
}

impl Deal {
    pub fn from_record(record: &RawRecord) -> Self {
        Self {
            amount: parse_amount(field(record, "Amount")),
            stage: record.get("Stage").filter(|s| !s.trim().is_empty()).cloned(),
            closing_date: field(record, "Closing_Date").and_then(parse_date),
        }
    }

    pub fn is_won(&self) -> bool {
        self.stage.as_deref() == Some(CLOSED_WON)
    }

    /// `YYYY-MM` of the closing date
    pub fn closing_month(&self) -> Option<String> {
        self.closing_date.map(|d| d.format("%Y-%m").to_string())
    }
}

/// Parse a numeric cell; missing, malformed and non-finite values are 0
pub fn parse_amount(value: Option<&str>) -> f64 {
    value
        .map(|v| v.replace(',', ""))
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}
