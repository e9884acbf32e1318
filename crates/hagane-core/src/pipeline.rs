//! # Export Pipeline
//!
//! Runs the stages in order: load the checkpoint, resolve the inputs, plan
//! the dynamic axes, export, validate the artifact and copy the parity
//! files. The first failure ends the run.

use std::fs;

use tracing::{error, info};

use crate::checkpoint::CheckpointLoader;
use crate::config::ExportConfig;
use crate::error::{HaganeError, Result, Stage};
use crate::export::{ExportedArtifact, GraphExporter};
use crate::parity::{ParityReport, copy_parity_files};
use crate::plan::{AxisMap, InputName, plan_axes, resolve_inputs};
use crate::validate::{ArtifactReport, ArtifactValidator};

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Inputs declared by the graph, in order
    pub inputs: Vec<InputName>,
    pub axes: AxisMap,
    pub artifact: ExportedArtifact,
    pub report: ArtifactReport,
    pub parity: ParityReport,
}

/// A configured export run.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: ExportConfig,
}

impl Pipeline {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Run every stage. Errors carry the stage they aborted via
    /// [`HaganeError::stage`].
    pub fn run(&self) -> Result<ExportSummary> {
        self.run_stages().inspect_err(|err| {
            error!(stage = %err.stage(), error = %err, "export failed");
        })
    }

    fn run_stages(&self) -> Result<ExportSummary> {
        let config = &self.config;

        enter(Stage::Loading);
        let checkpoint = CheckpointLoader::new(config.device.clone()).load(&config.source_dir)?;

        enter(Stage::Resolving);
        let encoding = checkpoint
            .tokenizer
            .encode_sample(&config.sample_text, config.max_length)?;
        let plan = resolve_inputs(&encoding)?;
        let axes = plan_axes(&plan);

        enter(Stage::Exporting);
        let exporter = GraphExporter::from_config(config)?;
        fs::create_dir_all(&config.output_dir).map_err(|e| {
            HaganeError::export(format!("creating {}: {e}", config.output_dir.display()))
        })?;
        let artifact_path = config.artifact_path();
        let artifact = exporter.export(&checkpoint, &plan, &axes, &artifact_path)?;

        enter(Stage::Validating);
        let report = ArtifactValidator::new().validate(&artifact_path, &plan, &axes)?;

        enter(Stage::CopyingParity);
        let parity = copy_parity_files(&config.source_dir, &config.output_dir)?;

        enter(Stage::Done);
        info!(
            output = %config.output_dir.display(),
            inputs = ?plan.names(),
            copied = parity.copied.len(),
            skipped = parity.skipped.len(),
            "export bundle ready"
        );

        Ok(ExportSummary {
            inputs: plan.names(),
            axes,
            artifact,
            report,
            parity,
        })
    }
}

fn enter(stage: Stage) {
    info!(%stage, "pipeline stage");
}

/// Run the export with `config`.
pub fn export(config: ExportConfig) -> Result<ExportSummary> {
    Pipeline::new(config).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_checkpoint_fails_before_writing() {
        let root = tempfile::tempdir().unwrap();
        let config = ExportConfig::anchored_at(root.path());
        let err = Pipeline::new(config.clone()).run().unwrap_err();

        assert_eq!(err.stage(), Stage::Loading);
        assert!(!config.output_dir.exists());
    }
}
