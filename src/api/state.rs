//! Application state for the API server

use crate::{Config, ConversionService};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// This struct is cloned for each request (cheap Arc clone) and provides
/// access to the service instance and configuration.
#[derive(Clone)]
pub struct AppState {
    /// The conversion service
    pub service: Arc<ConversionService>,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(service: Arc<ConversionService>, config: Arc<Config>) -> Self {
        Self { service, config }
    }
}
