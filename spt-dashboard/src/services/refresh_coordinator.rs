//! Refresh coordination
//!
//! Entry point for everything that wants dashboard data. Serves the cached
//! snapshot while it is fresh; otherwise runs a full refresh:
//!
//! 1. Base currency (defaults to USD when unavailable)
//! 2. Field resolution and bulk export for Deals, then Accounts
//! 3. Transform and combine
//! 4. Archive the previous snapshot, save the new one, prune the archive
//!
//! Only one refresh runs at a time. Failure policy depends on the caller:
//! [`RefreshMode::Degrade`] answers with an all-zero snapshot,
//! [`RefreshMode::Propagate`] returns the error. The read path keeps serving
//! the stored snapshot, stale or not, when a refresh fails, and waits out
//! [`RefreshSettings::retry_backoff`] before trying again.

use std::sync::Arc;
use std::time::Duration;

use spt_common::config::TomlConfig;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::crm::{CrmModule, RawRecord, RecordSource};
use crate::models::{CurrencyInfo, DashboardSnapshot};
use crate::services::bulk_export::{BulkExporter, ExportError};
use crate::services::field_resolver::resolve_fields;
use crate::services::snapshot_store::{needs_refresh, PersistenceError, SnapshotStore};
use crate::services::transformer;

/// Refresh failures
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("{module} export failed: {source}")]
    Export {
        module: CrmModule,
        #[source]
        source: ExportError,
    },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// What to do when a refresh fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Return the error to the caller
    Propagate,
    /// Log the error and answer with an empty snapshot
    Degrade,
}

/// Cache and retention settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub refresh_interval_hours: u64,
    pub archive_retention_days: u64,
    /// Read-path pause after a failed refresh
    pub retry_backoff: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            refresh_interval_hours: 24,
            archive_retention_days: 30,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }
}

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct RefreshFailure {
    message: String,
    at: Instant,
}

/// Owns the snapshot lifecycle
pub struct RefreshCoordinator {
    source: Arc<dyn RecordSource>,
    exporter: BulkExporter,
    store: SnapshotStore,
    settings: RefreshSettings,
    refresh_lock: Mutex<()>,
    /// Most recent failed refresh, cleared on success
    last_failure: RwLock<Option<RefreshFailure>>,
}

impl RefreshCoordinator {
    pub fn new(
        source: Arc<dyn RecordSource>,
        exporter: BulkExporter,
        store: SnapshotStore,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            source,
            exporter,
            store,
            settings,
            refresh_lock: Mutex::new(()),
            last_failure: RwLock::new(None),
        }
    }

    /// Wire a coordinator from bootstrap configuration
    pub fn from_config(source: Arc<dyn RecordSource>, config: &TomlConfig) -> Self {
        let exporter = BulkExporter::new(
            Arc::clone(&source),
            Duration::from_secs(config.bulk.poll_interval_secs),
            Duration::from_secs(config.bulk.timeout_secs),
            Some(config.data.work_dir.clone()),
        );
        let store = SnapshotStore::new(
            config.data.current_data_path.clone(),
            config.data.archive_dir.clone(),
        );
        let settings = RefreshSettings {
            refresh_interval_hours: config.data.refresh_interval_hours,
            archive_retention_days: config.data.archive_retention_days,
            ..RefreshSettings::default()
        };
        Self::new(source, exporter, store, settings)
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn settings(&self) -> RefreshSettings {
        self.settings
    }

    pub async fn last_error(&self) -> Option<String> {
        self.last_failure
            .read()
            .await
            .as_ref()
            .map(|f| f.message.clone())
    }

    /// Dashboard data for readers. Never fails.
    ///
    /// On refresh failure the stored snapshot is served even when stale; the
    /// all-zero snapshot only when nothing is stored.
    pub async fn get_dashboard_data(&self) -> DashboardSnapshot {
        let cached = self.store.load_current().await;
        if self.is_fresh(cached.as_ref()) {
            debug!("Serving cached snapshot");
            return serve_cached(cached);
        }
        if self.in_retry_backoff().await {
            debug!("Recent refresh failed, serving stored snapshot");
            return serve_cached(cached);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed, or failed, while we waited
        let cached = self.store.load_current().await;
        if self.is_fresh(cached.as_ref()) {
            debug!("Serving snapshot refreshed by concurrent caller");
            return serve_cached(cached);
        }
        if self.in_retry_backoff().await {
            return serve_cached(cached);
        }

        match self.run_refresh().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(
                    error = %e,
                    has_cached = cached.is_some(),
                    "Refresh failed, serving stored snapshot"
                );
                serve_cached(cached)
            }
        }
    }

    /// Run a refresh regardless of staleness
    pub async fn trigger_data_refresh(
        &self,
        mode: RefreshMode,
    ) -> Result<DashboardSnapshot, RefreshError> {
        let _guard = self.refresh_lock.lock().await;

        match self.run_refresh().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) if mode == RefreshMode::Degrade => {
                error!(error = %e, "Refresh failed, serving empty snapshot");
                Ok(transformer::empty_snapshot())
            }
            Err(e) => Err(e),
        }
    }

    /// Manual refresh; errors are returned to the caller
    pub async fn refresh(&self) -> Result<DashboardSnapshot, RefreshError> {
        self.trigger_data_refresh(RefreshMode::Propagate).await
    }

    fn is_fresh(&self, snapshot: Option<&DashboardSnapshot>) -> bool {
        snapshot.is_some() && !needs_refresh(snapshot, self.settings.refresh_interval_hours)
    }

    async fn in_retry_backoff(&self) -> bool {
        self.last_failure
            .read()
            .await
            .as_ref()
            .is_some_and(|f| f.at.elapsed() < self.settings.retry_backoff)
    }

    /// Caller must hold `refresh_lock`
    async fn run_refresh(&self) -> Result<DashboardSnapshot, RefreshError> {
        let result = self.refresh_pipeline().await;
        *self.last_failure.write().await = result.as_ref().err().map(|e| RefreshFailure {
            message: e.to_string(),
            at: Instant::now(),
        });
        result
    }

    async fn refresh_pipeline(&self) -> Result<DashboardSnapshot, RefreshError> {
        info!("Starting data refresh");

        let currency = match self.source.get_base_currency().await {
            Ok(currency) => currency,
            Err(e) => {
                warn!(error = %e, "Base currency unavailable, using default");
                CurrencyInfo::default()
            }
        };

        let deals = self.export_module(CrmModule::Deals).await?;
        let accounts = self.export_module(CrmModule::Accounts).await?;

        let snapshot = transformer::combine(
            transformer::transform_deals(&deals, Some(currency.clone())),
            transformer::transform_accounts(&accounts),
            Some(currency),
        );

        if let Err(e) = self.store.archive_current().await {
            warn!(error = %e, "Failed to archive previous snapshot");
        }
        self.store.save_current(&snapshot).await?;
        if let Err(e) = self
            .store
            .prune_archive(self.settings.archive_retention_days)
            .await
        {
            warn!(error = %e, "Failed to prune snapshot archive");
        }

        info!(
            total_deals = snapshot.deals.total_deals,
            total_accounts = snapshot.accounts.total_accounts,
            "Data refresh completed"
        );
        Ok(snapshot)
    }

    async fn export_module(&self, module: CrmModule) -> Result<Vec<RawRecord>, RefreshError> {
        let resolution = resolve_fields(self.source.as_ref(), module).await;

        self.exporter
            .export(module.api_name(), &resolution.fields, None)
            .await
            .map(|result| result.records)
            .map_err(|source| RefreshError::Export { module, source })
    }
}

fn serve_cached(cached: Option<DashboardSnapshot>) -> DashboardSnapshot {
    cached.unwrap_or_else(transformer::empty_snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::test_support::ScriptedSource;
    use crate::crm::JobStatus;
    use tempfile::TempDir;

    const PAYLOAD: &str = "Deal_Name,Amount,Stage,Closing_Date,Account_Name,Industry\n\
                           A,100,Closed Won,2024-03-01,Acme,Retail\n\
                           B,300,Open,2024-04-01,Initech,\n";

    fn coordinator(dir: &TempDir, source: Arc<ScriptedSource>) -> RefreshCoordinator {
        let exporter = BulkExporter::new(
            source.clone(),
            Duration::from_secs(5),
            Duration::from_secs(300),
            None,
        );
        let store = SnapshotStore::new(
            dir.path().join("current-data.json"),
            dir.path().join("archive"),
        );
        RefreshCoordinator::new(source, exporter, store, RefreshSettings::default())
    }

    fn working_source() -> Arc<ScriptedSource> {
        Arc::new(ScriptedSource::new(&[JobStatus::Completed], PAYLOAD.as_bytes()))
    }

    fn failing_source() -> Arc<ScriptedSource> {
        let mut source = ScriptedSource::new(&[JobStatus::Completed], b"");
        source.reject_submit = true;
        Arc::new(source)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network() {
        let dir = TempDir::new().unwrap();
        let source = failing_source();
        let coordinator = coordinator(&dir, source.clone());

        let mut cached = transformer::empty_snapshot();
        cached.deals.total_deals = 42;
        coordinator.store().save_current(&cached).await.unwrap();

        let snapshot = coordinator.get_dashboard_data().await;
        assert_eq!(snapshot.deals.total_deals, 42);
        assert_eq!(source.submits(), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_triggers_refresh() {
        let dir = TempDir::new().unwrap();
        let source = working_source();
        let coordinator = coordinator(&dir, source.clone());

        let snapshot = coordinator.get_dashboard_data().await;
        assert_eq!(source.submits(), 2);
        assert_eq!(snapshot.deals.total_deals, 2);
        assert_eq!(snapshot.deals.total_value, 400.0);
        assert_eq!(snapshot.deals.win_rate, 50.0);
        assert_eq!(snapshot.accounts.industry_distribution["Retail"], 1);
        assert_eq!(snapshot.accounts.industry_distribution["Unknown"], 1);
        assert_eq!(snapshot.deals.currency, Some(CurrencyInfo::default()));

        assert_eq!(coordinator.store().load_current().await, Some(snapshot));
    }

    #[tokio::test]
    async fn test_org_currency_is_attached() {
        let dir = TempDir::new().unwrap();
        let mut source = ScriptedSource::new(&[JobStatus::Completed], PAYLOAD.as_bytes());
        source.currency = Some(CurrencyInfo {
            code: "INR".to_string(),
            symbol: "₹".to_string(),
            name: "Indian Rupee".to_string(),
        });
        let coordinator = coordinator(&dir, Arc::new(source));

        let snapshot = coordinator.refresh().await.unwrap();
        assert_eq!(snapshot.deals.currency.unwrap().code, "INR");
    }

    #[tokio::test]
    async fn test_read_path_degrades() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, failing_source());

        let snapshot = coordinator.get_dashboard_data().await;
        assert_eq!(snapshot.deals.total_deals, 0);
        assert_eq!(snapshot.accounts.total_accounts, 0);
        assert_eq!(snapshot.deals.currency, Some(CurrencyInfo::default()));
        assert!(snapshot.last_updated.is_some());

        // Nothing persisted on failure
        assert!(coordinator.store().load_current().await.is_none());
    }

    fn stale_snapshot(total_deals: u64) -> DashboardSnapshot {
        let mut snapshot = transformer::empty_snapshot();
        snapshot.deals.total_deals = total_deals;
        snapshot.last_updated =
            Some(spt_common::time::to_iso(spt_common::time::now() - chrono::Duration::hours(25)));
        snapshot
    }

    #[tokio::test]
    async fn test_read_path_serves_stale_snapshot_on_failure() {
        let dir = TempDir::new().unwrap();
        let source = failing_source();
        let coordinator = coordinator(&dir, source.clone());
        coordinator
            .store()
            .save_current(&stale_snapshot(11))
            .await
            .unwrap();

        let first = coordinator.get_dashboard_data().await;
        assert_eq!(first.deals.total_deals, 11);
        assert_eq!(source.submits(), 1);

        // Inside the retry backoff: no second refresh attempt
        let second = coordinator.get_dashboard_data().await;
        assert_eq!(second.deals.total_deals, 11);
        assert_eq!(source.submits(), 1);
        assert!(coordinator.last_error().await.is_some());
    }

    #[tokio::test]
    async fn test_read_path_retries_once_backoff_elapsed() {
        let dir = TempDir::new().unwrap();
        let source = failing_source();
        let exporter = BulkExporter::new(
            source.clone(),
            Duration::from_secs(5),
            Duration::from_secs(300),
            None,
        );
        let store = SnapshotStore::new(
            dir.path().join("current-data.json"),
            dir.path().join("archive"),
        );
        let settings = RefreshSettings {
            retry_backoff: Duration::ZERO,
            ..RefreshSettings::default()
        };
        let coordinator = RefreshCoordinator::new(source.clone(), exporter, store, settings);

        coordinator.get_dashboard_data().await;
        coordinator.get_dashboard_data().await;
        assert_eq!(source.submits(), 2);
    }

    #[tokio::test]
    async fn test_successful_refresh_clears_backoff() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, working_source());
        coordinator
            .store()
            .save_current(&stale_snapshot(11))
            .await
            .unwrap();

        coordinator.refresh().await.unwrap();
        assert!(coordinator.last_error().await.is_none());
        assert!(!coordinator.in_retry_backoff().await);
    }

    #[tokio::test]
    async fn test_manual_refresh_propagates() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, failing_source());

        match coordinator.refresh().await {
            Err(RefreshError::Export { module, source }) => {
                assert_eq!(module, CrmModule::Deals);
                assert!(matches!(source, ExportError::Submission(_)));
            }
            other => panic!("expected export error, got {:?}", other),
        }
        assert!(coordinator.last_error().await.is_some());

        let degraded = coordinator
            .trigger_data_refresh(RefreshMode::Degrade)
            .await
            .unwrap();
        assert_eq!(degraded.deals.total_deals, 0);
    }

    #[tokio::test]
    async fn test_refresh_archives_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, working_source());

        coordinator.refresh().await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path().join("archive")).map(|d| d.count()).unwrap_or(0), 0);

        coordinator.refresh().await.unwrap();
        let archived: Vec<_> = std::fs::read_dir(dir.path().join("archive"))
            .unwrap()
            .collect();
        assert_eq!(archived.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_refresh() {
        let dir = TempDir::new().unwrap();
        let source = working_source();
        let coordinator = coordinator(&dir, source.clone());

        let (a, b) = tokio::join!(
            coordinator.get_dashboard_data(),
            coordinator.get_dashboard_data()
        );

        assert_eq!(source.submits(), 2);
        assert_eq!(a, b);
    }
}
