//! Conversion service split into focused submodules.
//!
//! The `ConversionService` struct and its methods are organized by domain:
//! - [`submit`] - Upload validation and task creation
//! - [`status`] - Client-facing task status
//! - [`artifacts`] - Artifact lookup for downloads
//! - [`worker`] - Worker pool that claims and converts tasks
//! - [`reaper`] - Recovery of tasks whose claim lease expired
//! - [`retention`] - Artifact and record expiry
//! - [`lifecycle`] - Startup and shutdown coordination

mod artifacts;
mod lifecycle;
mod reaper;
mod retention;
mod status;
mod submit;
mod worker;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use artifacts::ArtifactDownload;
pub use retention::SweepReport;
pub use submit::SubmitRequest;

use crate::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::config::{BlobStoreKind, Config, TaskStoreKind};
use crate::converter::ConverterRegistry;
use crate::error::Result;
use crate::formats::FormatCatalog;
use crate::store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
use crate::types::{Event, TaskId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_util::sync::CancellationToken;

/// Worker coordination state
#[derive(Clone)]
pub(crate) struct WorkerState {
    /// Signalled on every submission so idle workers claim without waiting for the poll
    pub(crate) wakeup: Arc<Notify>,
    /// Cancelled on shutdown; background loops exit at their next wait
    pub(crate) shutdown: CancellationToken,
    /// Flag to indicate whether new submissions are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Tasks currently being converted, with the worker holding each
    pub(crate) active: Arc<Mutex<HashMap<TaskId, String>>>,
    /// Prefix of this process's worker ids
    pub(crate) instance_id: Arc<str>,
}

impl WorkerState {
    fn new() -> Self {
        let instance = uuid::Uuid::new_v4().simple().to_string();
        Self {
            wakeup: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            active: Arc::new(Mutex::new(HashMap::new())),
            instance_id: Arc::from(&instance[..8]),
        }
    }
}

/// Main service instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct ConversionService {
    /// Task records
    pub(crate) store: Arc<dyn TaskStore>,
    /// Uploaded inputs and produced artifacts
    pub(crate) blobs: Arc<dyn BlobStore>,
    /// Converters by format pair
    pub(crate) converters: Arc<ConverterRegistry>,
    /// Accepted formats
    pub(crate) catalog: Arc<FormatCatalog>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Worker coordination
    pub(crate) workers: WorkerState,
}

impl ConversionService {
    /// Create a service with the backends named in `config`
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Opens the task store (running migrations for SQLite)
    /// - Creates the blob store directory
    /// - Locates the external conversion tools
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn TaskStore> = match config.storage.task_store {
            TaskStoreKind::Memory => Arc::new(MemoryTaskStore::new()),
            TaskStoreKind::Sqlite => {
                Arc::new(SqliteTaskStore::new(&config.storage.database_path).await?)
            }
        };

        let blobs: Arc<dyn BlobStore> = match config.storage.blob_store {
            BlobStoreKind::Filesystem => Arc::new(FsBlobStore::new(&config.storage.data_dir).await?),
            BlobStoreKind::Memory => Arc::new(MemoryBlobStore::new()),
        };

        let catalog = FormatCatalog::builtin();
        let converters = ConverterRegistry::with_system_tools(&config.tools, &catalog);

        tracing::info!(
            task_store = store.name(),
            blob_store = blobs.name(),
            conversions = converters.len(),
            "Conversion service initialized"
        );

        Ok(Self::with_parts(config, store, blobs, converters))
    }

    /// Create a service from explicit backends
    ///
    /// The configuration is not validated here; [`ConversionService::new`] does that.
    pub fn with_parts(
        config: Config,
        store: Arc<dyn TaskStore>,
        blobs: Arc<dyn BlobStore>,
        converters: ConverterRegistry,
    ) -> Self {
        let catalog =
            FormatCatalog::builtin().with_supported_targets(config.limits.supported_formats.as_deref());

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        Self {
            store,
            blobs,
            converters: Arc::new(converters),
            catalog: Arc::new(catalog),
            config: Arc::new(config),
            event_tx,
            workers: WorkerState::new(),
        }
    }

    /// Subscribe to task events
    ///
    /// Slow subscribers that fall more than 1000 events behind receive
    /// `RecvError::Lagged` and skip ahead.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Format catalog used to validate submissions
    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    /// Registered converters
    pub fn converters(&self) -> &ConverterRegistry {
        &self.converters
    }

    /// Task store backend
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Blob store backend
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    /// Whether submissions are still accepted
    pub fn is_accepting(&self) -> bool {
        self.workers.accepting_new.load(Ordering::SeqCst)
    }

    /// Number of conversions currently running in this process
    pub async fn active_conversions(&self) -> usize {
        self.workers.active.lock().await.len()
    }

    /// Helper to emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    /// Spawn the REST API server in a background task
    pub fn spawn_api_server(self: &Arc<Self>) -> tokio::task::JoinHandle<Result<()>> {
        let service = Arc::clone(self);
        let config = Arc::clone(&self.config);

        tokio::spawn(async move { crate::api::start_api_server(service, config).await })
    }
}
