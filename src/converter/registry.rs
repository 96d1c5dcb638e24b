use super::{CommandConverter, Converter, Tool};
use crate::config::ToolsConfig;
use crate::formats::{FormatCatalog, normalize};
use std::collections::HashMap;
use std::sync::Arc;

/// Converters keyed by normalized `(source, target)` format pair
#[derive(Clone, Default)]
pub struct ConverterRegistry {
    converters: HashMap<(String, String), Arc<dyn Converter>>,
}

impl std::fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterRegistry")
            .field("pairs", &self.converters.len())
            .finish()
    }
}

impl ConverterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `converter` for one pair, replacing any previous one
    pub fn register(&mut self, source: &str, target: &str, converter: Arc<dyn Converter>) {
        self.converters
            .insert((normalize(source), normalize(target)), converter);
    }

    /// Register `converter` for several pairs
    pub fn register_pairs<I, S, T>(&mut self, pairs: I, converter: Arc<dyn Converter>)
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        for (source, target) in pairs {
            self.register(source.as_ref(), target.as_ref(), converter.clone());
        }
    }

    /// Converter for a pair, if any
    pub fn get(&self, source: &str, target: &str) -> Option<Arc<dyn Converter>> {
        self.converters
            .get(&(normalize(source), normalize(target)))
            .cloned()
    }

    /// Registered pairs in sorted order
    pub fn pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self.converters.keys().cloned().collect();
        pairs.sort();
        pairs
    }

    /// Number of registered pairs
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Whether no converter is registered
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Registry of the external tools that are configured or found on PATH
    ///
    /// Tools that cannot be located are skipped with a log line; their
    /// conversions then fail with `unsupported_conversion`.
    pub fn with_system_tools(tools: &ToolsConfig, catalog: &FormatCatalog) -> Self {
        let mut registry = Self::new();

        for (tool, configured) in [
            (Tool::ImageMagick, &tools.imagemagick_path),
            (Tool::LibreOffice, &tools.libreoffice_path),
            (Tool::Ffmpeg, &tools.ffmpeg_path),
        ] {
            let converter = match configured {
                Some(path) => Some(CommandConverter::new(
                    tool,
                    path.clone(),
                    tools.work_dir.clone(),
                )),
                None if tools.search_path => {
                    CommandConverter::from_path(tool, tools.work_dir.clone())
                }
                None => None,
            };

            match converter {
                Some(converter) => {
                    let pairs = tool.pairs(catalog);
                    tracing::info!(
                        tool = tool.name(),
                        binary = %converter.binary_path().display(),
                        pairs = pairs.len(),
                        "Conversion tool available"
                    );
                    registry.register_pairs(pairs, Arc::new(converter));
                }
                None => {
                    tracing::warn!(
                        tool = tool.name(),
                        "Conversion tool not found, its conversions are disabled"
                    );
                }
            }
        }

        registry
    }
}
