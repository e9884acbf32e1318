//! # Export Configuration
//!
//! Everything a run needs is carried here explicitly, including the compute
//! device, so no component reads ambient process state.

use std::path::{Path, PathBuf};

use candle_core::Device;

/// Source checkpoint directory, relative to the layout root.
pub const DEFAULT_SOURCE_DIR: &str = "pii_model";

/// Output bundle directory, relative to the layout root.
pub const DEFAULT_OUTPUT_DIR: &str = "assets/models/pii_model";

/// File name of the exported graph inside the bundle.
pub const ARTIFACT_FILE_NAME: &str = "model.onnx";

/// Representative text tokenized to drive the trace.
pub const DEFAULT_SAMPLE_TEXT: &str = "This is a sample input for ONNX export.";

/// Padded length of the trace sample. Only fixes the trace shape; runtime
/// lengths are dynamic.
pub const DEFAULT_MAX_LENGTH: usize = 32;

/// ONNX operator set targeted by the exporter.
pub const DEFAULT_OPSET_VERSION: i64 = 17;

/// Configuration for a single export run.
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Checkpoint directory to read from
    pub source_dir: PathBuf,
    /// Bundle directory to write into
    pub output_dir: PathBuf,
    /// Graph file name inside `output_dir`
    pub artifact_name: String,
    /// Text tokenized for the trace
    pub sample_text: String,
    /// Fixed padding length of the trace sample
    pub max_length: usize,
    /// Target ONNX opset
    pub opset_version: i64,
    /// Fold constant subgraphs into initializers
    pub constant_folding: bool,
    /// Device used to load and trace the model
    pub device: Device,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self::anchored_at(".")
    }
}

impl ExportConfig {
    /// Default layout resolved against `root`.
    pub fn anchored_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            source_dir: root.join(DEFAULT_SOURCE_DIR),
            output_dir: root.join(DEFAULT_OUTPUT_DIR),
            artifact_name: ARTIFACT_FILE_NAME.to_string(),
            sample_text: DEFAULT_SAMPLE_TEXT.to_string(),
            max_length: DEFAULT_MAX_LENGTH,
            opset_version: DEFAULT_OPSET_VERSION,
            constant_folding: true,
            device: Device::Cpu,
        }
    }

    /// Set the checkpoint directory.
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    /// Set the bundle directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the trace sample text.
    pub fn with_sample_text(mut self, text: impl Into<String>) -> Self {
        self.sample_text = text.into();
        self
    }

    /// Set the trace sample length. Clamped to at least one token.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length.max(1);
        self
    }

    /// Enable or disable constant folding.
    pub fn with_constant_folding(mut self, enabled: bool) -> Self {
        self.constant_folding = enabled;
        self
    }

    /// Set the device used for loading and tracing.
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Full path of the exported graph.
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(&self.artifact_name)
    }
}
