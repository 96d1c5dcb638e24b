//! Pluggable conversion backends
//!
//! A [`Converter`] turns the bytes of one format into the bytes of another.
//! The worker pool treats converters as opaque: it looks one up in the
//! [`ConverterRegistry`] by `(source, target)` and classifies any error it
//! returns with [`IsRetryable`].
//!
//! Bundled implementations:
//! - [`CommandConverter`] runs ImageMagick, LibreOffice or ffmpeg
//! - [`FnConverter`] wraps an async closure, handy for embedding and tests

use crate::retry::IsRetryable;
use crate::types::TaskId;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

mod command;
mod func;
mod registry;

pub use command::{CommandConverter, Tool};
pub use func::FnConverter;
pub use registry::ConverterRegistry;

/// Everything a converter gets to work with
#[derive(Debug, Clone)]
pub struct ConversionInput {
    /// Task being processed
    pub task_id: TaskId,
    /// Attempt number (1-based)
    pub attempt: u32,
    /// Normalized source format
    pub source_format: String,
    /// Normalized target format
    pub target_format: String,
    /// Original filename, if the client sent one
    pub original_filename: Option<String>,
    /// Input bytes
    pub data: Bytes,
}

/// Converter result
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// Converted bytes
    pub data: Bytes,
}

impl ConversionOutput {
    /// Wrap converted bytes
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

/// Why a conversion attempt did not produce output
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConverterError {
    /// The converter cannot handle this format pair
    #[error("unsupported conversion: {source_format} -> {target_format}")]
    Unsupported {
        /// Source format
        source_format: String,
        /// Target format
        target_format: String,
    },

    /// The input could not be converted; retrying will not help
    #[error("{message}")]
    Failed {
        /// Reason reported by the backend
        message: String,
    },

    /// Something outside the input went wrong; a later attempt may succeed
    #[error("{message}")]
    Transient {
        /// Reason reported by the backend
        message: String,
    },

    /// The attempt ran out of time
    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),
}

impl ConverterError {
    /// Permanent failure with a message
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Retryable failure with a message
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }
}

impl IsRetryable for ConverterError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConverterError::Transient { .. } | ConverterError::Timeout(_)
        )
    }
}

/// A conversion backend
///
/// Implementations must be safe to call concurrently from several workers.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert `input.data` from `input.source_format` to `input.target_format`
    async fn convert(&self, input: ConversionInput) -> Result<ConversionOutput, ConverterError>;

    /// Name for logs
    fn name(&self) -> &'static str;
}
