//! Shared test helpers for creating ConversionService instances in tests.

use crate::blob::FsBlobStore;
use crate::config::Config;
use crate::converter::{
    ConversionInput, ConversionOutput, Converter, ConverterError, ConverterRegistry, FnConverter,
};
use crate::service::{ConversionService, SubmitRequest};
use crate::store::MemoryTaskStore;
use crate::types::{Event, TaskId, TaskStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::tempdir;

/// Worker id used when tests drive a single attempt by hand
pub(crate) const TEST_WORKER: &str = "test-worker";

/// Configuration with short intervals so background loops react quickly
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.workers.count = 2;
    config.workers.poll_interval = Duration::from_millis(10);
    config.workers.reap_interval = Duration::from_millis(50);
    config.workers.claim_timeout = Duration::from_secs(5);
    config.workers.shutdown_timeout = Duration::from_secs(5);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config.retry.jitter = false;
    config.tools.search_path = false;
    config
}

/// Converter that prefixes the input with `PNG:`
pub(crate) fn fake_png() -> Arc<dyn Converter> {
    Arc::new(FnConverter::new("fake-png", |input: ConversionInput| async move {
        let mut data = b"PNG:".to_vec();
        data.extend_from_slice(&input.data);
        Ok(ConversionOutput::new(data))
    }))
}

/// Registry with `jpg -> png` and `txt -> pdf`
pub(crate) fn test_registry() -> ConverterRegistry {
    let mut registry = ConverterRegistry::new();
    registry.register_pairs([("jpg", "png"), ("txt", "pdf")], fake_png());
    registry
}

/// Registry whose only `jpg -> png` converter is `converter`
pub(crate) fn registry_with(converter: Arc<dyn Converter>) -> ConverterRegistry {
    let mut registry = ConverterRegistry::new();
    registry.register("jpg", "png", converter);
    registry
}

/// Converter that always fails with a retryable error, counting its calls
pub(crate) fn always_transient(calls: Arc<AtomicUsize>) -> Arc<dyn Converter> {
    Arc::new(FnConverter::new("flaky", move |_input: ConversionInput| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(ConverterError::transient("tool busy")) }
    }))
}

/// Helper to create a test ConversionService over an in-memory task store and
/// a filesystem blob store. Returns the service and the tempdir (which must be kept alive).
pub(crate) async fn create_test_service_with(
    mut config: Config,
    converters: ConverterRegistry,
) -> (ConversionService, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    config.storage.data_dir = temp_dir.path().join("data");
    config.tools.work_dir = temp_dir.path().join("work");

    let blobs = FsBlobStore::new(&config.storage.data_dir).await.unwrap();
    let service = ConversionService::with_parts(
        config,
        Arc::new(MemoryTaskStore::new()),
        Arc::new(blobs),
        converters,
    );
    (service, temp_dir)
}

/// Helper to create a test ConversionService with [`test_config`] and [`test_registry`]
pub(crate) async fn create_test_service() -> (ConversionService, tempfile::TempDir) {
    create_test_service_with(test_config(), test_registry()).await
}

/// A small upload named `photo.jpg`
pub(crate) fn jpg_upload(target: &str) -> SubmitRequest {
    SubmitRequest::new(&b"jpeg-bytes"[..], "photo.jpg", target)
}

/// Claim the next eligible task as [`TEST_WORKER`] and run it
pub(crate) async fn process_next(service: &ConversionService) -> Option<TaskId> {
    let task = service.claim_next(TEST_WORKER).await.unwrap()?;
    let id = task.id.clone();
    service.process_claimed(task, TEST_WORKER).await;
    Some(id)
}

/// Poll until the task reaches a terminal state
pub(crate) async fn wait_for_terminal(service: &ConversionService, id: &TaskId) -> TaskStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = service.status(id).await.unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task did not reach a terminal state")
}

/// Drain every event currently buffered on `rx`
pub(crate) fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
