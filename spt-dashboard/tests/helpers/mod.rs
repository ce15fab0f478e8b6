//! Test Helper Utilities
//!
//! Shared utilities for testing spt-dashboard

#![allow(dead_code)]

pub mod fake_source;

pub use fake_source::FakeRecordSource;

use spt_dashboard::services::{BulkExporter, RefreshCoordinator, RefreshSettings, SnapshotStore};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const DEALS_CSV: &str = "\
Id,Deal_Name,Amount,Stage,Closing_Date,Account_Name
1,Renewal,100,Closed Won,2024-03-04,Acme
2,Upsell,200,Open,2024-03-18,Initech
3,Expansion,300,Closed Won,2024-03-29,Globex
";

pub const ACCOUNTS_CSV: &str = "\
Id,Account_Name,Industry,Account_Type
1,Acme,Manufacturing,Customer
2,Initech,Technology,Prospect
3,Globex,Technology,
";

/// Source that serves the standard deal and account fixtures
pub fn standard_source() -> FakeRecordSource {
    FakeRecordSource::new()
        .with_csv("Deals", DEALS_CSV)
        .with_csv("Accounts", ACCOUNTS_CSV)
}

/// Coordinator storing its files under `dir`
pub fn test_coordinator(dir: &Path, source: Arc<FakeRecordSource>) -> Arc<RefreshCoordinator> {
    let exporter = BulkExporter::new(
        source.clone(),
        Duration::from_millis(10),
        Duration::from_secs(5),
        Some(dir.join("bulk")),
    );
    let store = SnapshotStore::new(dir.join("current-data.json"), dir.join("archive"));
    Arc::new(RefreshCoordinator::new(
        source,
        exporter,
        store,
        RefreshSettings::default(),
    ))
}
