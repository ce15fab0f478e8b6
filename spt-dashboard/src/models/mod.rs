//! Data models for the dashboard pipeline

pub mod account;
pub mod deal;
pub mod snapshot;

pub use account::Account;
pub use deal::Deal;
pub use snapshot::{AccountsAggregate, CurrencyInfo, DashboardSnapshot, DealsAggregate};
