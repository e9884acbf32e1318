//! # Graph Export
//!
//! Traces the loaded model on the sample inputs, lowers it to an ONNX graph
//! with the planned names and dynamic axes, and writes the artifact.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::Tensor;
use onnx_protobuf::ModelProto;
use protobuf::Message;
use tracing::{debug, info};

use crate::checkpoint::{Architecture, Checkpoint};
use crate::config::ExportConfig;
use crate::error::{HaganeError, Result};
use crate::onnx::{FoldStats, fold_constants, lower_token_classifier};
use crate::plan::{AxisMap, InputName, InputPlan};

/// Oldest opset that has `LayerNormalization` and input-form `Unsqueeze` axes.
pub const MIN_OPSET_VERSION: i64 = 17;

/// The serialized graph as written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArtifact {
    pub path: PathBuf,
    pub bytes: usize,
    /// Folding summary, `None` when folding was disabled
    pub folding: Option<FoldStats>,
}

/// Produces ONNX artifacts from loaded checkpoints.
#[derive(Debug, Clone, Copy)]
pub struct GraphExporter {
    opset_version: i64,
    constant_folding: bool,
}

impl GraphExporter {
    pub fn new(opset_version: i64, constant_folding: bool) -> Result<Self> {
        if opset_version < MIN_OPSET_VERSION {
            return Err(HaganeError::export(format!(
                "opset {opset_version} is not supported, need at least {MIN_OPSET_VERSION}"
            )));
        }
        Ok(Self {
            opset_version,
            constant_folding,
        })
    }

    pub fn from_config(config: &ExportConfig) -> Result<Self> {
        Self::new(config.opset_version, config.constant_folding)
    }

    pub fn opset_version(&self) -> i64 {
        self.opset_version
    }

    /// Run the model once on the plan's tensors and check the logits shape.
    pub fn trace(&self, checkpoint: &Checkpoint, plan: &InputPlan) -> Result<Tensor> {
        let tensor = |name: InputName| -> Result<Option<Tensor>> {
            plan.get(name)
                .map(|sample| sample.to_tensor(&checkpoint.device))
                .transpose()
                .map_err(|e| HaganeError::export(format!("building {name} tensor: {e}")))
        };

        let input_ids = tensor(InputName::InputIds)?.ok_or_else(|| {
            HaganeError::export(format!(
                "{} needs input_ids, plan has {:?}",
                checkpoint.architecture.family,
                plan.names()
            ))
        })?;
        let attention_mask = tensor(InputName::AttentionMask)?;
        let token_type_ids = tensor(InputName::TokenTypeIds)?;

        let logits = checkpoint
            .model
            .forward(&input_ids, attention_mask.as_ref(), token_type_ids.as_ref())
            .map_err(|e| HaganeError::export(format!("trace failed: {e}")))?;

        let expected = [1, plan.sequence_length(), checkpoint.num_labels()];
        if logits.dims() != expected {
            return Err(HaganeError::export(format!(
                "traced logits have shape {:?}, expected {expected:?}",
                logits.dims()
            )));
        }
        debug!(shape = ?logits.dims(), "traced sample");
        Ok(logits)
    }

    /// Trace, lower and optionally fold into an ONNX model.
    pub fn build_model(
        &self,
        checkpoint: &Checkpoint,
        plan: &InputPlan,
        axes: &AxisMap,
    ) -> Result<(ModelProto, Option<FoldStats>)> {
        self.trace(checkpoint, plan)?;

        let mut graph = lower_token_classifier(
            &checkpoint.architecture,
            &checkpoint.weights,
            &plan.names(),
            axes,
            checkpoint.num_labels(),
        )?;
        let folding = if self.constant_folding {
            Some(fold_constants(&mut graph)?)
        } else {
            None
        };

        let metadata = model_metadata(&checkpoint.architecture, checkpoint.num_labels())?;
        Ok((graph.into_model(self.opset_version, &metadata), folding))
    }

    /// Export to `path`, replacing any existing file.
    pub fn export(
        &self,
        checkpoint: &Checkpoint,
        plan: &InputPlan,
        axes: &AxisMap,
        path: &Path,
    ) -> Result<ExportedArtifact> {
        let (model, folding) = self.build_model(checkpoint, plan, axes)?;
        let bytes = model
            .write_to_bytes()
            .map_err(|e| HaganeError::export(format!("serializing model: {e}")))?;
        fs::write(path, &bytes)
            .map_err(|e| HaganeError::export(format!("writing {}: {e}", path.display())))?;

        info!(
            path = %path.display(),
            bytes = bytes.len(),
            opset = self.opset_version,
            "wrote onnx artifact"
        );
        Ok(ExportedArtifact {
            path: path.to_path_buf(),
            bytes: bytes.len(),
            folding,
        })
    }
}

/// Key/value metadata embedded in the model.
fn model_metadata(
    architecture: &Architecture,
    num_labels: usize,
) -> Result<Vec<(String, String)>> {
    let id2label: BTreeMap<usize, String> = (0..num_labels)
        .map(|id| {
            let label = architecture
                .labels
                .get(id)
                .cloned()
                .unwrap_or_else(|| format!("LABEL_{id}"));
            (id, label)
        })
        .collect();
    let id2label = serde_json::to_string(&id2label)
        .map_err(|e| HaganeError::export(format!("encoding id2label: {e}")))?;

    Ok(vec![
        ("model_type".to_string(), architecture.family.to_string()),
        ("id2label".to_string(), id2label),
    ])
}
