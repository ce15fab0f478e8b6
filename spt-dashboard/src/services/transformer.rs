//! Raw records → dashboard aggregates
//!
//! Pure and deterministic apart from the `last_updated` stamp in [`combine`].
//! Malformed values never fail a transform: bad amounts count as 0 and bad
//! closing dates are left out of the monthly trend.

use std::collections::BTreeMap;

use spt_common::time;

use crate::crm::RawRecord;
use crate::models::{
    Account, AccountsAggregate, CurrencyInfo, DashboardSnapshot, Deal, DealsAggregate,
};

/// Aggregate deal records
pub fn transform_deals(records: &[RawRecord], currency: Option<CurrencyInfo>) -> DealsAggregate {
    let currency = Some(currency.unwrap_or_default());
    if records.is_empty() {
        return DealsAggregate::empty(currency);
    }

    let deals: Vec<Deal> = records.iter().map(Deal::from_record).collect();

    let total_deals = deals.len() as u64;
    let total_value = deals.iter().fold(0.0, |acc, d| saturating_add(acc, d.amount));
    let won = deals.iter().filter(|d| d.is_won()).count();

    let mut stages = BTreeMap::new();
    let mut monthly_trends = BTreeMap::new();
    for deal in &deals {
        if let Some(stage) = &deal.stage {
            *stages.entry(stage.clone()).or_insert(0) += 1;
        }
        if let Some(month) = deal.closing_month() {
            let sum = monthly_trends.entry(month).or_insert(0.0);
            *sum = saturating_add(*sum, deal.amount);
        }
    }

    DealsAggregate {
        total_deals,
        total_value,
        avg_deal_size: total_value / total_deals as f64,
        stages,
        monthly_trends,
        win_rate: 100.0 * won as f64 / total_deals as f64,
        currency,
    }
}

/// Sums stay finite so the snapshot survives a JSON round trip
fn saturating_add(acc: f64, amount: f64) -> f64 {
    let sum = acc + amount;
    if sum.is_finite() {
        sum
    } else {
        f64::MAX.copysign(sum)
    }
}

/// Aggregate account records
pub fn transform_accounts(records: &[RawRecord]) -> AccountsAggregate {
    let mut aggregate = AccountsAggregate {
        total_accounts: records.len() as u64,
        ..Default::default()
    };

    for account in records.iter().map(Account::from_record) {
        *aggregate
            .industry_distribution
            .entry(account.industry_or_unknown().to_string())
            .or_insert(0) += 1;
        *aggregate
            .account_types
            .entry(account.account_type_or_unknown().to_string())
            .or_insert(0) += 1;
    }

    aggregate
}

/// Combine both aggregates into a snapshot stamped with the current time
pub fn combine(
    mut deals: DealsAggregate,
    accounts: AccountsAggregate,
    currency: Option<CurrencyInfo>,
) -> DashboardSnapshot {
    if deals.currency.is_none() {
        deals.currency = Some(currency.unwrap_or_default());
    }

    DashboardSnapshot {
        deals,
        accounts,
        last_updated: Some(time::to_iso(time::now())),
    }
}

/// All-zero snapshot served when a refresh fails on the read path
pub fn empty_snapshot() -> DashboardSnapshot {
    combine(
        DealsAggregate::empty(None),
        AccountsAggregate::default(),
        None,
    )
}
