//! Format catalog
//!
//! Knows which formats exist, which ones may be requested as conversion
//! targets, and what content type each one is served with. Whether a given
//! `(source, target)` pair can actually be converted is decided by the
//! [`ConverterRegistry`](crate::converter::ConverterRegistry), not here.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use utoipa::ToSchema;

/// Broad family a format belongs to
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum FormatCategory {
    /// Text and office documents
    Document,
    /// Raster images
    Image,
    /// Audio files
    Audio,
    /// Video files
    Video,
}

/// Formats accepted as input and produced as output within one category
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FormatSet {
    /// Formats that can be uploaded
    pub input: Vec<String>,
    /// Formats that can be requested
    pub output: Vec<String>,
}

impl FormatSet {
    fn new(input: &[&str], output: &[&str]) -> Self {
        Self {
            input: input.iter().map(|f| f.to_string()).collect(),
            output: output.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// The set of known formats, grouped by category
#[derive(Clone, Debug, Serialize)]
pub struct FormatCatalog {
    #[serde(flatten)]
    categories: BTreeMap<FormatCategory, FormatSet>,

    #[serde(skip)]
    supported_targets: BTreeSet<String>,
}

impl Default for FormatCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FormatCatalog {
    /// Catalog of every format the bundled tool converters understand
    pub fn builtin() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            FormatCategory::Document,
            FormatSet::new(
                &["pdf", "docx", "doc", "odt", "txt", "rtf"],
                &["pdf", "docx", "odt", "txt", "rtf"],
            ),
        );
        categories.insert(
            FormatCategory::Image,
            FormatSet::new(
                &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff"],
                &["jpg", "jpeg", "png", "webp", "gif", "bmp", "tiff"],
            ),
        );
        categories.insert(
            FormatCategory::Audio,
            FormatSet::new(
                &["mp3", "wav", "ogg", "flac", "aac"],
                &["mp3", "wav", "ogg", "flac"],
            ),
        );
        categories.insert(
            FormatCategory::Video,
            FormatSet::new(
                &["mp4", "webm", "mov", "avi", "mkv"],
                &["mp4", "webm", "mov"],
            ),
        );

        let supported_targets = categories
            .values()
            .flat_map(|set| set.output.iter().cloned())
            .collect();

        Self {
            categories,
            supported_targets,
        }
    }

    /// Replace the accepted target formats
    ///
    /// `None` keeps the default: every output format of every category.
    pub fn with_supported_targets(mut self, targets: Option<&[String]>) -> Self {
        if let Some(targets) = targets {
            self.supported_targets = targets.iter().map(|t| normalize(t)).collect();
        }
        self
    }

    /// Whether `format` may be requested as a target
    pub fn is_supported_target(&self, format: &str) -> bool {
        self.supported_targets.contains(&normalize(format))
    }

    /// Accepted target formats in sorted order
    pub fn supported_targets(&self) -> impl Iterator<Item = &str> {
        self.supported_targets.iter().map(String::as_str)
    }

    /// Category a format belongs to, looking at both inputs and outputs
    pub fn category_of(&self, format: &str) -> Option<FormatCategory> {
        let format = normalize(format);
        self.categories
            .iter()
            .find(|(_, set)| set.input.contains(&format) || set.output.contains(&format))
            .map(|(category, _)| *category)
    }

    /// Input and output formats of one category
    pub fn category(&self, category: FormatCategory) -> Option<&FormatSet> {
        self.categories.get(&category)
    }

    /// Content type an artifact of `format` is served with
    pub fn content_type(&self, format: &str) -> &'static str {
        content_type(format)
    }
}

/// Lower-case a format name and strip a leading dot
pub fn normalize(format: &str) -> String {
    format.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Format implied by a filename's extension
pub fn extension_of(filename: &str) -> Option<String> {
    let ext = Path::new(filename).extension()?.to_str()?;
    let ext = normalize(ext);
    (!ext.is_empty()).then_some(ext)
}

/// Content type for a format, `application/octet-stream` when unknown
pub fn content_type(format: &str) -> &'static str {
    match normalize(format).as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "odt" => "application/vnd.oasis.opendocument.text",
        "rtf" => "application/rtf",
        "txt" => "text/plain; charset=utf-8",
        "html" => "text/html; charset=utf-8",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tiff" => "image/tiff",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_dot_and_case() {
        assert_eq!(normalize(".PNG"), "png");
        assert_eq!(normalize("  Jpeg "), "jpeg");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn extension_of_handles_missing_and_compound_names() {
        assert_eq!(extension_of("photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension_of("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn default_targets_are_union_of_outputs() {
        let catalog = FormatCatalog::builtin();

        assert!(catalog.is_supported_target("png"));
        assert!(catalog.is_supported_target("PDF"));
        assert!(catalog.is_supported_target("mp3"));
        assert!(!catalog.is_supported_target("qqq"));
        // aac is accepted as input but never produced
        assert!(!catalog.is_supported_target("aac"));
    }

    #[test]
    fn configured_targets_replace_defaults() {
        let catalog = FormatCatalog::builtin()
            .with_supported_targets(Some(&["PNG".to_string(), ".webp".to_string()]));

        assert!(catalog.is_supported_target("png"));
        assert!(catalog.is_supported_target("webp"));
        assert!(!catalog.is_supported_target("pdf"));
        assert_eq!(catalog.supported_targets().collect::<Vec<_>>(), vec!["png", "webp"]);
    }

    #[test]
    fn category_lookup_covers_inputs() {
        let catalog = FormatCatalog::builtin();
        assert_eq!(catalog.category_of("aac"), Some(FormatCategory::Audio));
        assert_eq!(catalog.category_of("doc"), Some(FormatCategory::Document));
        assert_eq!(catalog.category_of("mkv"), Some(FormatCategory::Video));
        assert_eq!(catalog.category_of("zzz"), None);
    }

    #[test]
    fn content_types_for_common_formats() {
        assert_eq!(content_type("png"), "image/png");
        assert_eq!(content_type("JPEG"), "image/jpeg");
        assert_eq!(content_type("pdf"), "application/pdf");
        assert_eq!(content_type("unknown"), "application/octet-stream");
    }

    #[test]
    fn catalog_serializes_by_category() {
        let json = serde_json::to_value(FormatCatalog::builtin()).unwrap();
        assert!(json["image"]["input"].as_array().unwrap().contains(&"bmp".into()));
        assert!(json["video"]["output"].as_array().unwrap().contains(&"webm".into()));
        assert!(json.get("supported_targets").is_none());
    }
}
