//! Common test utilities for convertd end-to-end tests

use convertd::{
    ConversionInput, ConversionOutput, ConversionService, Config, ConverterError,
    ConverterRegistry, FnConverter, MemoryBlobStore, MemoryTaskStore, TaskStatus,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A running service with its HTTP listener
pub struct TestServer {
    /// Base URL, e.g. `http://127.0.0.1:40123`
    pub base_url: String,
    /// Service handle
    pub service: ConversionService,
    background: Vec<JoinHandle<()>>,
    api: JoinHandle<convertd::Result<()>>,
}

impl TestServer {
    /// Stop the API and the background loops
    pub async fn stop(self) {
        self.service.shutdown().await.unwrap();
        self.api.abort();
        for handle in self.background {
            handle.await.unwrap();
        }
    }
}

/// Configuration with short intervals so the loops react quickly
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.workers.count = 2;
    config.workers.poll_interval = Duration::from_millis(10);
    config.workers.reap_interval = Duration::from_millis(50);
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.jitter = false;
    config.tools.search_path = false;
    config
}

/// Registry with an in-process `jpg -> png` converter and a `txt -> pdf`
/// converter whose tool is always busy
pub fn test_registry() -> ConverterRegistry {
    let mut registry = ConverterRegistry::new();
    registry.register(
        "jpg",
        "png",
        Arc::new(FnConverter::new("fake-png", |input: ConversionInput| async move {
            let mut data = b"PNG:".to_vec();
            data.extend_from_slice(&input.data);
            Ok(ConversionOutput::new(data))
        })),
    );
    registry.register(
        "txt",
        "pdf",
        Arc::new(FnConverter::new("busy-pdf", |_input: ConversionInput| async {
            Err(ConverterError::transient("tool busy"))
        })),
    );
    registry
}

/// Start a service over in-memory stores and serve it on an ephemeral port
pub async fn start_server(config: Config) -> TestServer {
    let service = ConversionService::with_parts(
        config,
        Arc::new(MemoryTaskStore::new()),
        Arc::new(MemoryBlobStore::new()),
        test_registry(),
    );
    let background = service.start();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let api = tokio::spawn(convertd::api::serve(
        listener,
        Arc::new(service.clone()),
        service.get_config(),
    ));

    TestServer {
        base_url: format!("http://{addr}"),
        service,
        background,
        api,
    }
}

/// Upload `data` as `filename` and request `format`, returning the raw response
pub async fn submit(
    client: &reqwest::Client,
    base_url: &str,
    data: &[u8],
    filename: &str,
    format: &str,
) -> reqwest::Response {
    let form = reqwest::multipart::Form::new()
        .part(
            "file",
            reqwest::multipart::Part::bytes(data.to_vec()).file_name(filename.to_string()),
        )
        .text("format", format.to_string());

    client
        .post(format!("{base_url}/api/v1/convert"))
        .multipart(form)
        .send()
        .await
        .unwrap()
}

/// Poll the status endpoint until the task is terminal
pub async fn wait_for_terminal(client: &reqwest::Client, base_url: &str, id: &str) -> TaskStatus {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status: TaskStatus = client
                .get(format!("{base_url}/api/v1/convert/{id}/status"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task did not reach a terminal state")
}
