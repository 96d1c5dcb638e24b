//! Converters that shell out to external tools

use super::{ConversionInput, ConversionOutput, Converter, ConverterError};
use crate::formats::{FormatCatalog, FormatCategory};
use async_trait::async_trait;
use bytes::Bytes;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Longest stderr excerpt kept in a failure message
const STDERR_EXCERPT: usize = 512;

/// External conversion tool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    /// ImageMagick, for raster images
    ImageMagick,
    /// LibreOffice in headless mode, for documents
    LibreOffice,
    /// ffmpeg, for audio and video
    Ffmpeg,
}

impl Tool {
    /// Binary names searched on PATH, in order of preference
    pub fn binary_names(&self) -> &'static [&'static str] {
        match self {
            Tool::ImageMagick => &["magick", "convert"],
            Tool::LibreOffice => &["soffice", "libreoffice"],
            Tool::Ffmpeg => &["ffmpeg"],
        }
    }

    /// Name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Tool::ImageMagick => "imagemagick",
            Tool::LibreOffice => "libreoffice",
            Tool::Ffmpeg => "ffmpeg",
        }
    }

    /// Format pairs this tool converts, derived from the catalog
    pub fn pairs(&self, catalog: &FormatCatalog) -> Vec<(String, String)> {
        let within = |category| {
            catalog
                .category(category)
                .map(|set| cross(&set.input, &set.output))
                .unwrap_or_default()
        };

        match self {
            Tool::ImageMagick => within(FormatCategory::Image),
            Tool::LibreOffice => within(FormatCategory::Document),
            Tool::Ffmpeg => {
                let mut pairs = within(FormatCategory::Audio);
                pairs.extend(within(FormatCategory::Video));
                // Audio track extraction
                if let (Some(video), Some(audio)) = (
                    catalog.category(FormatCategory::Video),
                    catalog.category(FormatCategory::Audio),
                ) {
                    pairs.extend(cross(&video.input, &audio.output));
                }
                pairs
            }
        }
    }
}

fn cross(inputs: &[String], outputs: &[String]) -> Vec<(String, String)> {
    inputs
        .iter()
        .flat_map(|source| {
            outputs
                .iter()
                .filter(move |target| *target != source)
                .map(move |target| (source.clone(), target.clone()))
        })
        .collect()
}

/// Converter that runs an external tool against files in a scratch directory
///
/// Each attempt gets its own directory under `work_dir`, removed afterwards.
/// The child process is killed if the attempt is dropped (e.g. on timeout).
#[derive(Debug, Clone)]
pub struct CommandConverter {
    tool: Tool,
    binary_path: PathBuf,
    work_dir: PathBuf,
}

impl CommandConverter {
    /// Create a converter with an explicit binary path
    pub fn new(tool: Tool, binary_path: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            tool,
            binary_path,
            work_dir,
        }
    }

    /// Attempt to find the tool in PATH
    ///
    /// Uses the `which` crate to search for each of [`Tool::binary_names`].
    pub fn from_path(tool: Tool, work_dir: PathBuf) -> Option<Self> {
        tool.binary_names()
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|binary_path| Self::new(tool, binary_path, work_dir))
    }

    /// Tool this converter runs
    pub fn tool(&self) -> Tool {
        self.tool
    }

    /// Resolved binary
    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Arguments for one run, plus the path the tool writes its result to
    fn command_line(&self, input: &Path, dir: &Path, target: &str) -> (Vec<OsString>, PathBuf) {
        match self.tool {
            Tool::ImageMagick => {
                let output = dir.join(format!("output.{target}"));
                (vec![input.into(), output.clone().into()], output)
            }
            Tool::LibreOffice => {
                let out_dir = dir.join("out");
                let filter = match target {
                    "txt" => "txt:Text".to_string(),
                    other => other.to_string(),
                };
                let args = vec![
                    "--headless".into(),
                    "--convert-to".into(),
                    filter.into(),
                    "--outdir".into(),
                    out_dir.clone().into(),
                    input.into(),
                ];
                // LibreOffice keeps the input stem
                (args, out_dir.join(format!("input.{target}")))
            }
            Tool::Ffmpeg => {
                let output = dir.join(format!("output.{target}"));
                let args = vec![
                    "-y".into(),
                    "-hide_banner".into(),
                    "-loglevel".into(),
                    "error".into(),
                    "-i".into(),
                    input.into(),
                    output.clone().into(),
                ];
                (args, output)
            }
        }
    }

    async fn run_in(&self, dir: &Path, input: &ConversionInput) -> Result<Bytes, ConverterError> {
        let input_path = dir.join(format!("input.{}", input.source_format));
        tokio::fs::write(&input_path, &input.data)
            .await
            .map_err(|e| ConverterError::transient(format!("failed to stage input: {e}")))?;

        let (args, output_path) = self.command_line(&input_path, dir, &input.target_format);

        tracing::debug!(
            task_id = %input.task_id,
            tool = self.tool.name(),
            binary = %self.binary_path.display(),
            "Running conversion tool"
        );

        let output = Command::new(&self.binary_path)
            .args(&args)
            .current_dir(dir)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                let reason = if e.kind() == ErrorKind::NotFound {
                    "is not installed"
                } else {
                    "could not be started"
                };
                ConverterError::transient(format!("{} {}: {}", self.tool.name(), reason, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConverterError::failed(format!(
                "{} exited with {}: {}",
                self.tool.name(),
                output.status,
                excerpt(stderr.trim())
            )));
        }

        match tokio::fs::read(&output_path).await {
            Ok(data) if !data.is_empty() => Ok(Bytes::from(data)),
            Ok(_) => Err(ConverterError::failed(format!(
                "{} produced an empty file",
                self.tool.name()
            ))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ConverterError::failed(format!(
                "{} finished but did not create an output file",
                self.tool.name()
            ))),
            Err(e) => Err(ConverterError::transient(format!(
                "failed to read tool output: {e}"
            ))),
        }
    }
}

fn excerpt(text: &str) -> &str {
    if text.len() <= STDERR_EXCERPT {
        return text;
    }
    let mut start = text.len() - STDERR_EXCERPT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[async_trait]
impl Converter for CommandConverter {
    async fn convert(&self, input: ConversionInput) -> Result<ConversionOutput, ConverterError> {
        let dir = self
            .work_dir
            .join(format!("{}-{}", input.task_id, uuid::Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ConverterError::transient(format!("failed to create work dir: {e}")))?;

        let result = self.run_in(&dir, &input).await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove work dir");
        }

        result.map(ConversionOutput::new)
    }

    fn name(&self) -> &'static str {
        self.tool.name()
    }
}
