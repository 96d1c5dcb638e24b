use super::*;
use crate::converter::{ConversionInput, ConversionOutput, ConverterError, FnConverter};
use crate::types::artifact_key;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::test]
async fn successful_conversion_completes_the_task() {
    let (service, _temp_dir) = create_test_service().await;
    let id = service.submit(jpg_upload("png")).await.unwrap();
    let mut events = service.subscribe();

    assert_eq!(process_next(&service).await, Some(id.clone()));

    let task = service.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Completed);
    assert_eq!(task.attempts, 1);
    assert!(task.claim.is_none());
    assert!(task.error.is_none());
    assert!(task.completed_at.is_some());

    let artifact_ref = format!("{id}.png");
    assert_eq!(task.artifact_ref.as_deref(), Some(artifact_ref.as_str()));
    assert_eq!(
        service
            .blobs
            .get(&artifact_key(&artifact_ref))
            .await
            .unwrap()
            .unwrap(),
        Bytes::from_static(b"PNG:jpeg-bytes")
    );

    // Input is gone once the task is terminal
    assert!(service.blobs.get(&task.input_key()).await.unwrap().is_none());
    assert_eq!(service.active_conversions().await, 0);

    let events = drain_events(&mut events);
    assert!(matches!(
        events.as_slice(),
        [Event::Processing { attempt: 1, .. }, Event::Completed { .. }]
    ));
}

#[tokio::test]
async fn nothing_to_claim_returns_none() {
    let (service, _temp_dir) = create_test_service().await;
    assert_eq!(process_next(&service).await, None);
}

#[tokio::test]
async fn missing_converter_fails_with_unsupported_conversion() {
    let (service, _temp_dir) = create_test_service().await;
    // gif is an accepted target, but nothing converts jpg to gif
    let id = service.submit(jpg_upload("gif")).await.unwrap();

    process_next(&service).await.unwrap();

    let status = service.status(&id).await.unwrap();
    assert_eq!(status.status, TaskState::Failed);
    assert_eq!(status.error_code.as_deref(), Some("unsupported_conversion"));
    assert_eq!(status.attempts, 1);
    assert!(status.download_url.is_none());
}

#[tokio::test]
async fn permanent_converter_error_fails_without_retry() {
    let converter = Arc::new(FnConverter::new("broken", |_input: ConversionInput| async {
        Err(ConverterError::failed("not a JPEG file"))
    }));
    let (service, _temp_dir) = create_test_service_with(test_config(), registry_with(converter)).await;
    let id = service.submit(jpg_upload("png")).await.unwrap();

    process_next(&service).await.unwrap();

    let task = service.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(
        task.error,
        Some(TaskFailure::ConversionFailed {
            message: "not a JPEG file".to_string()
        })
    );
    assert!(service.blobs.get(&task.input_key()).await.unwrap().is_none());
}

#[tokio::test]
async fn transient_error_requeues_with_backoff() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = test_config();
    config.retry.initial_delay = Duration::from_secs(60);
    config.retry.max_delay = Duration::from_secs(60);
    let (service, _temp_dir) =
        create_test_service_with(config, registry_with(always_transient(calls.clone()))).await;
    let id = service.submit(jpg_upload("png")).await.unwrap();
    let mut events = service.subscribe();

    process_next(&service).await.unwrap();

    let task = service.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.attempts, 1);
    assert!(task.claim.is_none());
    assert!(task.available_at > chrono::Utc::now() + chrono::Duration::seconds(30));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Input is kept for the next attempt, which is not due yet
    assert!(service.blobs.get(&task.input_key()).await.unwrap().is_some());
    assert_eq!(process_next(&service).await, None);

    let events = drain_events(&mut events);
    match events.last() {
        Some(Event::Requeued {
            attempt, reason, ..
        }) => {
            assert_eq!(*attempt, 1);
            assert_eq!(reason, "tool busy");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn last_attempt_fails_with_max_retries_exceeded() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut config = test_config();
    config.workers.max_attempts = 1;
    let (service, _temp_dir) =
        create_test_service_with(config, registry_with(always_transient(calls))).await;
    let id = service.submit(jpg_upload("png")).await.unwrap();

    process_next(&service).await.unwrap();

    let task = service.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(
        task.error,
        Some(TaskFailure::MaxRetriesExceeded {
            attempts: 1,
            last_error: "tool busy".to_string(),
        })
    );
}

#[tokio::test]
async fn panicking_converter_is_contained_and_retried() {
    let converter = Arc::new(FnConverter::new("panics", |input: ConversionInput| async move {
        if !input.data.is_empty() {
            panic!("converter bug");
        }
        Ok(ConversionOutput::new(input.data))
    }));
    let mut config = test_config();
    config.workers.max_attempts = 2;
    let (service, _temp_dir) = create_test_service_with(config, registry_with(converter)).await;
    let id = service.submit(jpg_upload("png")).await.unwrap();

    process_next(&service).await.unwrap();
    assert_eq!(
        service.status(&id).await.unwrap().status,
        TaskState::Pending
    );

    // Wait out the backoff, then the second attempt spends the budget
    tokio::time::sleep(Duration::from_millis(30)).await;
    process_next(&service).await.unwrap();

    let task = service.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, 2);
    match task.error {
        Some(TaskFailure::MaxRetriesExceeded { last_error, .. }) => {
            assert_eq!(last_error, "converter panicked");
        }
        other => panic!("unexpected failure {other:?}"),
    }
}

#[tokio::test]
async fn conversion_exceeding_the_claim_timeout_is_aborted() {
    let converter = Arc::new(FnConverter::new("slow", |input: ConversionInput| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(ConversionOutput::new(input.data))
    }));
    let mut config = test_config();
    config.workers.claim_timeout = Duration::from_millis(50);
    config.workers.max_attempts = 1;
    let (service, _temp_dir) = create_test_service_with(config, registry_with(converter)).await;
    let id = service.submit(jpg_upload("png")).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), process_next(&service))
        .await
        .unwrap()
        .unwrap();

    let status = service.status(&id).await.unwrap();
    assert_eq!(status.status, TaskState::Failed);
    assert_eq!(status.error_code.as_deref(), Some("max_retries_exceeded"));
    assert!(status.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn missing_input_fails_the_task() {
    let (service, _temp_dir) = create_test_service().await;
    let id = service.submit(jpg_upload("png")).await.unwrap();
    let task = service.store.get(&id).await.unwrap().unwrap();
    service.blobs.delete(&task.input_key()).await.unwrap();

    process_next(&service).await.unwrap();

    let task = service.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(
        task.error,
        Some(TaskFailure::ConversionFailed {
            message: "input file is missing".to_string()
        })
    );
}

#[tokio::test]
async fn empty_output_fails_the_task() {
    let converter = Arc::new(FnConverter::new("empty", |_input: ConversionInput| async {
        Ok(ConversionOutput::new(Vec::new()))
    }));
    let (service, _temp_dir) = create_test_service_with(test_config(), registry_with(converter)).await;
    let id = service.submit(jpg_upload("png")).await.unwrap();

    process_next(&service).await.unwrap();

    let status = service.status(&id).await.unwrap();
    assert_eq!(status.status, TaskState::Failed);
    assert_eq!(status.error_code.as_deref(), Some("conversion_failed"));
}

#[tokio::test]
async fn converter_reporting_unsupported_pair_fails_the_task() {
    let converter = Arc::new(FnConverter::new("picky", |input: ConversionInput| async move {
        Err(ConverterError::Unsupported {
            source_format: input.source_format,
            target_format: input.target_format,
        })
    }));
    let (service, _temp_dir) = create_test_service_with(test_config(), registry_with(converter)).await;
    let id = service.submit(jpg_upload("png")).await.unwrap();

    process_next(&service).await.unwrap();

    let status = service.status(&id).await.unwrap();
    assert_eq!(status.error_code.as_deref(), Some("unsupported_conversion"));
}

#[tokio::test]
async fn converter_sees_task_details() {
    let seen = Arc::new(std::sync::Mutex::new(None));
    let captured = seen.clone();
    let converter = Arc::new(FnConverter::new("inspect", move |input: ConversionInput| {
        *captured.lock().unwrap() = Some((
            input.attempt,
            input.source_format.clone(),
            input.target_format.clone(),
            input.original_filename.clone(),
        ));
        async move { Ok(ConversionOutput::new(input.data)) }
    }));
    let (service, _temp_dir) = create_test_service_with(test_config(), registry_with(converter)).await;
    service.submit(jpg_upload("png")).await.unwrap();

    process_next(&service).await.unwrap();

    assert_eq!(
        seen.lock().unwrap().clone(),
        Some((
            1,
            "jpg".to_string(),
            "png".to_string(),
            Some("photo.jpg".to_string())
        ))
    );
}

#[tokio::test]
async fn worker_that_lost_its_claim_does_not_overwrite_the_task() {
    let (service, _temp_dir) = create_test_service().await;
    let id = service.submit(jpg_upload("png")).await.unwrap();

    let stale = service.claim_next("slow-worker").await.unwrap().unwrap();

    // The lease runs out and the reaper hands the task back
    let later = chrono::Utc::now() + chrono::Duration::seconds(60);
    assert_eq!(service.reap_expired_claims(later).await.unwrap(), 1);

    service.process_claimed(stale, "slow-worker").await;

    let task = service.store.get(&id).await.unwrap().unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.attempts, 1);
    assert!(task.artifact_ref.is_none());
}
