//! # Artifact Validation
//!
//! Re-reads the written artifact and checks that its boundary matches the
//! plan: input names in plan order, a single `logits` output, and the
//! planned symbolic labels on every dynamic axis.

use std::fs;
use std::path::Path;

use onnx_protobuf::{ModelProto, ValueInfoProto};
use protobuf::Message;
use tracing::info;

use crate::error::{HaganeError, Result};
use crate::onnx::{Dim, declared_dims};
use crate::plan::{AxisMap, InputPlan, OutputName};

/// Summary of a validated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactReport {
    pub bytes: u64,
    pub nodes: usize,
    pub initializers: usize,
    pub opset: i64,
}

/// Checks exported artifacts against the plan they were built from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactValidator;

impl ArtifactValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(
        &self,
        path: &Path,
        plan: &InputPlan,
        axes: &AxisMap,
    ) -> Result<ArtifactReport> {
        if !path.is_file() {
            return Err(HaganeError::verification(
                path,
                "ONNX model file was not produced",
            ));
        }
        let bytes = fs::read(path).map_err(|e| HaganeError::verification(path, e))?;
        let model = ModelProto::parse_from_bytes(&bytes)
            .map_err(|e| HaganeError::verification(path, format!("not an ONNX model: {e}")))?;
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| HaganeError::verification(path, "model has no graph"))?;

        let declared: Vec<&str> = graph.input.iter().map(|i| i.name.as_str()).collect();
        let planned: Vec<&str> = plan.names().iter().map(|n| n.as_str()).collect();
        if declared != planned {
            return Err(HaganeError::verification(
                path,
                format!("declared inputs {declared:?} do not match plan {planned:?}"),
            ));
        }

        let outputs: Vec<&str> = graph.output.iter().map(|o| o.name.as_str()).collect();
        let expected: Vec<&str> = OutputName::ALL.iter().map(|o| o.as_str()).collect();
        if outputs != expected {
            return Err(HaganeError::verification(
                path,
                format!("declared outputs {outputs:?}, expected {expected:?}"),
            ));
        }

        for value in graph.input.iter().chain(graph.output.iter()) {
            check_axes(path, value, axes)?;
        }

        let report = ArtifactReport {
            bytes: bytes.len() as u64,
            nodes: graph.node.len(),
            initializers: graph.initializer.len(),
            opset: model.opset_import.first().map(|o| o.version).unwrap_or_default(),
        };
        info!(
            path = %path.display(),
            bytes = report.bytes,
            nodes = report.nodes,
            initializers = report.initializers,
            "artifact verified"
        );
        Ok(report)
    }
}

fn check_axes(path: &Path, value: &ValueInfoProto, axes: &AxisMap) -> Result<()> {
    let planned = axes.axes_by_name(&value.name).ok_or_else(|| {
        HaganeError::verification(path, format!("{} has no planned axes", value.name))
    })?;
    let dims = declared_dims(value);
    for (index, label) in planned {
        match dims.get(index) {
            Some(Dim::Symbolic(found)) if found == label => {}
            other => {
                return Err(HaganeError::verification(
                    path,
                    format!(
                        "{} dim {index} is {other:?}, expected symbolic {label:?}",
                        value.name
                    ),
                ));
            }
        }
    }
    Ok(())
}
