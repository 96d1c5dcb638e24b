//! REST API server example
//!
//! Runs convertd with its worker pool and the REST API.
//!
//! ```text
//! cargo run --example server [config.json]
//! ```
//!
//! After starting, you can:
//! - View Swagger UI at http://localhost:3001/swagger-ui
//! - Submit a conversion via POST http://localhost:3001/api/v1/convert
//! - Poll it via GET http://localhost:3001/api/v1/convert/{id}/status
//! - Stream events via GET http://localhost:3001/api/v1/events

use convertd::{Config, ConversionService, run_with_shutdown};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("convertd=info")),
        )
        .init();

    // Optional JSON configuration file as the first argument
    let config = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str::<Config>(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };
    let base = format!("http://{}", config.server.api.bind_address);

    let service = ConversionService::new(config).await?;
    let _background = service.start();
    let api = Arc::new(service.clone()).spawn_api_server();

    println!("🚀 Starting convertd");
    println!("📖 Swagger UI: {base}/swagger-ui");
    println!("📡 API Base: {base}/api/v1");
    println!("🔄 Events stream: {base}/api/v1/events");
    println!();
    println!("Example commands:");
    println!("  # Convert a JPEG to PNG");
    println!("  curl -F file=@photo.jpg -F format=png {base}/api/v1/convert");
    println!();
    println!("  # Poll the task");
    println!("  curl {base}/api/v1/convert/<id>/status");

    // Blocks until SIGINT/SIGTERM, then drains in-flight conversions
    run_with_shutdown(service).await?;
    api.abort();

    Ok(())
}
