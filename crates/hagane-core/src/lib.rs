//! # Hagane Core
//!
//! Turns a BERT-family token-classification checkpoint into a deployment
//! bundle: an ONNX graph with dynamic batch and sequence axes plus the
//! tokenizer files a runtime needs to reproduce the checkpoint's
//! tokenization.
//!
//! ## Quick Start
//!
//! ```no_run
//! use hagane_core::{ExportConfig, Pipeline};
//!
//! let config = ExportConfig::anchored_at(".").with_max_length(64);
//! let summary = Pipeline::new(config).run().unwrap();
//!
//! println!("exported {:?} to {}", summary.inputs, summary.artifact.path.display());
//! ```
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod export;
pub mod onnx;
pub mod parity;
pub mod pipeline;
pub mod plan;
pub mod validate;

// Re-export primary API
pub use checkpoint::{Architecture, Checkpoint, CheckpointLoader, ModelFamily};
pub use config::ExportConfig;
pub use error::{HaganeError, Result, Stage};
pub use export::{ExportedArtifact, GraphExporter};
pub use parity::{PARITY_FILES, ParityReport, copy_parity_files};
pub use pipeline::{ExportSummary, Pipeline, export};
pub use plan::{
    AxisMap, DimLabel, InputName, InputPlan, OutputName, SampleEncoding, TensorName, plan_axes,
    resolve_inputs,
};
pub use validate::{ArtifactReport, ArtifactValidator};
