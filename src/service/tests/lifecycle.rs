use super::*;
use crate::converter::{ConversionInput, ConversionOutput, FnConverter};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

async fn stop(service: &ConversionService, handles: Vec<tokio::task::JoinHandle<()>>) {
    service.shutdown().await.unwrap();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn running_service_converts_submissions() {
    let (service, _temp_dir) = create_test_service().await;
    let handles = service.start();

    let id = service.submit(jpg_upload("png")).await.unwrap();
    let status = wait_for_terminal(&service, &id).await;

    assert_eq!(status.status, TaskState::Completed);
    assert!(status.download_url.is_some());
    assert!(service.open_artifact(&format!("{id}.png")).await.is_ok());

    stop(&service, handles).await;
}

#[tokio::test]
async fn always_failing_conversion_ends_failed_after_the_retry_budget() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (service, _temp_dir) =
        create_test_service_with(test_config(), registry_with(always_transient(calls.clone())))
            .await;
    let handles = service.start();

    let id = service.submit(jpg_upload("png")).await.unwrap();
    let status = wait_for_terminal(&service, &id).await;

    assert_eq!(status.status, TaskState::Failed);
    assert_eq!(status.error_code.as_deref(), Some("max_retries_exceeded"));
    assert_eq!(status.attempts, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    stop(&service, handles).await;
}

#[tokio::test]
async fn steep_backoff_still_exhausts_the_retry_budget() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = test_config();
    config.workers.max_attempts = 10;
    config.retry.backoff_multiplier = 1000.0;
    config.retry.max_delay = Duration::from_millis(10);
    let (service, _temp_dir) =
        create_test_service_with(config, registry_with(always_transient(calls.clone()))).await;
    let handles = service.start();

    let id = service.submit(jpg_upload("png")).await.unwrap();
    let status = wait_for_terminal(&service, &id).await;

    assert_eq!(status.status, TaskState::Failed);
    assert_eq!(status.attempts, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 10);

    // Workers survived and still pick up new work
    assert!(handles.iter().all(|handle| !handle.is_finished()));

    stop(&service, handles).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_task_is_converted_exactly_once() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let converter = Arc::new(FnConverter::new("recording", move |input: ConversionInput| {
        recorder.lock().unwrap().push(input.task_id.clone());
        async move { Ok(ConversionOutput::new(input.data)) }
    }));

    let mut config = test_config();
    config.workers.count = 4;
    let (service, _temp_dir) = create_test_service_with(config, registry_with(converter)).await;
    let handles = service.start();

    let mut ids = Vec::new();
    for _ in 0..40 {
        ids.push(service.submit(jpg_upload("png")).await.unwrap());
    }
    for id in &ids {
        assert_eq!(
            wait_for_terminal(&service, id).await.status,
            TaskState::Completed
        );
    }

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), ids.len());
    let unique: HashSet<_> = seen.into_iter().collect();
    assert_eq!(unique.len(), ids.len());

    stop(&service, handles).await;
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_conversions() {
    let converter = Arc::new(FnConverter::new("slow", |input: ConversionInput| async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        Ok(ConversionOutput::new(input.data))
    }));
    let (service, _temp_dir) = create_test_service_with(test_config(), registry_with(converter)).await;
    let handles = service.start();
    let mut events = service.subscribe();

    let id = service.submit(jpg_upload("png")).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.active_conversions().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    stop(&service, handles).await;

    assert_eq!(
        service.status(&id).await.unwrap().status,
        TaskState::Completed
    );
    let events = drain_events(&mut events);
    assert!(matches!(events.last(), Some(Event::Shutdown)));
}

#[tokio::test]
async fn shutdown_gives_up_after_the_timeout() {
    let converter = Arc::new(FnConverter::new("stuck", |input: ConversionInput| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ConversionOutput::new(input.data))
    }));
    let mut config = test_config();
    config.workers.shutdown_timeout = Duration::from_millis(100);
    let (service, _temp_dir) = create_test_service_with(config, registry_with(converter)).await;
    let _handles = service.start();

    let id = service.submit(jpg_upload("png")).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while service.active_conversions().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    tokio::time::timeout(Duration::from_secs(2), service.shutdown())
        .await
        .unwrap()
        .unwrap();

    // The claim is left for the next run's reaper
    assert_eq!(
        service.status(&id).await.unwrap().status,
        TaskState::Processing
    );
}
