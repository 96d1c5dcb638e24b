use super::{ConversionInput, ConversionOutput, Converter, ConverterError};
use async_trait::async_trait;
use std::future::Future;

/// Converter backed by an async closure
///
/// ```no_run
/// use convertd::converter::{ConversionOutput, ConverterRegistry, FnConverter};
/// use std::sync::Arc;
///
/// let upper = FnConverter::new("uppercase", |input: convertd::converter::ConversionInput| async move {
///     Ok(ConversionOutput::new(input.data.to_ascii_uppercase()))
/// });
///
/// let mut registry = ConverterRegistry::new();
/// registry.register("txt", "txt", Arc::new(upper));
/// ```
pub struct FnConverter<F> {
    name: &'static str,
    func: F,
}

impl<F, Fut> FnConverter<F>
where
    F: Fn(ConversionInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ConversionOutput, ConverterError>> + Send + 'static,
{
    /// Wrap `func` under a name used in logs
    pub fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

#[async_trait]
impl<F, Fut> Converter for FnConverter<F>
where
    F: Fn(ConversionInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ConversionOutput, ConverterError>> + Send + 'static,
{
    async fn convert(&self, input: ConversionInput) -> Result<ConversionOutput, ConverterError> {
        (self.func)(input).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
