//! Dashboard snapshot: the unit of caching, persistence and archival

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Organization base currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyInfo {
    pub code: String,
    pub symbol: String,
    pub name: String,
}

impl Default for CurrencyInfo {
    fn default() -> Self {
        Self {
            code: "USD".to_string(),
            symbol: "$".to_string(),
            name: "US Dollar".to_string(),
        }
    }
}

/// Deal metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealsAggregate {
    pub total_deals: u64,
    pub total_value: f64,
    pub avg_deal_size: f64,
    /// Stage name → deal count
    pub stages: BTreeMap<String, u64>,
    /// `YYYY-MM` of the closing date → summed amount
    pub monthly_trends: BTreeMap<String, f64>,
    /// Percentage (0–100) of deals in stage "Closed Won"
    pub win_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<CurrencyInfo>,
}

impl DealsAggregate {
    /// All-zero aggregate
    pub fn empty(currency: Option<CurrencyInfo>) -> Self {
        Self {
            total_deals: 0,
            total_value: 0.0,
            avg_deal_size: 0.0,
            stages: BTreeMap::new(),
            monthly_trends: BTreeMap::new(),
            win_rate: 0.0,
            currency,
        }
    }
}

/// Account metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountsAggregate {
    pub industry_distribution: BTreeMap<String, u64>,
    pub account_types: BTreeMap<String, u64>,
    pub total_accounts: u64,
}

/// Combined dashboard data as served by `GET /api/dashboard-data`.
///
/// `last_updated` stays a string so a snapshot whose timestamp is missing or
/// malformed still loads; staleness checks treat such snapshots as stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub deals: DealsAggregate,
    pub accounts: AccountsAggregate,
    #[serde(default)]
    pub last_updated: Option<String>,
}
