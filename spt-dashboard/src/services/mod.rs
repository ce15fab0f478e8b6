//! Refresh pipeline services
//!
//! Control flow, leaves last:
//! `refresh_coordinator` → `field_resolver` → `bulk_export` → `transformer`
//! → `snapshot_store`. `scheduler` drives the coordinator on a timer.

pub mod bulk_export;
pub mod field_resolver;
pub mod refresh_coordinator;
pub mod scheduler;
pub mod snapshot_store;
pub mod transformer;

pub use bulk_export::{BulkExporter, ExportError, ExportResult};
pub use field_resolver::{
    fallback_fields, resolve_fields, FieldOrigin, FieldResolution, FieldResolutionError,
};
pub use refresh_coordinator::{RefreshCoordinator, RefreshError, RefreshMode, RefreshSettings};
pub use scheduler::spawn_refresh_scheduler;
pub use snapshot_store::{needs_refresh, needs_refresh_at, PersistenceError, SnapshotStore};
