//! # convertd
//!
//! Asynchronous file-format conversion service.
//!
//! ## Design Philosophy
//!
//! convertd is designed to be:
//! - **Non-blocking for clients** - Uploads return a task id immediately; conversion happens later
//! - **Crash tolerant** - Workers hold time-limited claims, so a task abandoned by a dead worker
//!   is picked up again
//! - **Pluggable** - Task records, file contents and converters all sit behind traits
//! - **Event-driven** - Consumers subscribe to lifecycle events instead of polling
//!
//! ## Quick Start
//!
//! ```no_run
//! use convertd::{Config, ConversionService, SubmitRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let service = ConversionService::new(Config::default()).await?;
//!     let _workers = service.start();
//!
//!     // Subscribe to events
//!     let mut events = service.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let data = std::fs::read("photo.jpg")?;
//!     let id = service
//!         .submit(SubmitRequest::new(data, "photo.jpg", "png"))
//!         .await?;
//!     println!("queued {id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// REST API module
pub mod api;
/// Blob storage for uploads and artifacts
pub mod blob;
/// Configuration types
pub mod config;
/// Conversion backends
pub mod converter;
/// Error types
pub mod error;
/// Format catalog and normalization
pub mod formats;
/// Retry logic with exponential backoff
pub mod retry;
/// Conversion service (submission, workers, reaper, retention)
pub mod service;
/// Task record persistence
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use config::Config;
pub use converter::{
    CommandConverter, ConversionInput, ConversionOutput, Converter, ConverterError,
    ConverterRegistry, FnConverter,
};
pub use error::{ApiError, DatabaseError, Error, ErrorDetail, Result, ToHttpStatus};
pub use formats::{FormatCatalog, FormatCategory};
pub use service::{ArtifactDownload, ConversionService, SubmitRequest, SweepReport};
pub use store::{MemoryTaskStore, SqliteTaskStore, TaskStore};
pub use types::{Event, StateCounts, Task, TaskFailure, TaskId, TaskState, TaskStatus};

/// Helper function to run the service with graceful signal handling.
///
/// Waits for a termination signal and then calls the service's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use convertd::{ConversionService, Config, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let service = ConversionService::new(Config::default()).await?;
///     let _workers = service.start();
///
///     // Run with automatic signal handling
///     run_with_shutdown(service).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(service: ConversionService) -> Result<()> {
    wait_for_signal().await;
    service.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration can fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
