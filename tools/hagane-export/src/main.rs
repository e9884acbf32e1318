//! Hagane Export Tool
//!
//! Exports the token-classification checkpoint under `pii_model/` to an ONNX
//! bundle under `assets/models/pii_model/`. Paths are resolved against the
//! current working directory unless overridden.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use hagane_core::{ExportConfig, Pipeline};
use tracing::info;

/// CLI arguments
#[derive(Parser)]
#[command(name = "hagane-export")]
#[command(about = "Export a token-classification checkpoint to an ONNX deployment bundle")]
#[command(version)]
struct Cli {
    /// Checkpoint directory
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Bundle output directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Text tokenized to trace the model
    #[arg(long)]
    sample_text: Option<String>,

    /// Padded length of the trace sample
    #[arg(long)]
    max_length: Option<usize>,

    /// Keep constant subgraphs as nodes instead of folding them
    #[arg(long)]
    no_constant_folding: bool,
}

impl Cli {
    fn into_config(self) -> Result<ExportConfig> {
        let cwd = std::env::current_dir().context("Failed to resolve working directory")?;
        let mut config = ExportConfig::anchored_at(cwd)
            .with_constant_folding(!self.no_constant_folding);

        if let Some(source) = self.source {
            config = config.with_source_dir(source);
        }
        if let Some(output) = self.output {
            config = config.with_output_dir(output);
        }
        if let Some(text) = self.sample_text {
            config = config.with_sample_text(text);
        }
        if let Some(max_length) = self.max_length {
            config = config.with_max_length(max_length);
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = Cli::parse().into_config()?;
    info!(
        source = %config.source_dir.display(),
        output = %config.output_dir.display(),
        "Exporting checkpoint"
    );

    let summary = Pipeline::new(config).run().with_context(|| "Export failed")?;

    println!("Exported {}", summary.artifact.path.display());
    println!(
        "  inputs: {}",
        summary
            .inputs
            .iter()
            .map(|name| name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "  graph:  {} nodes, {} initializers, opset {}, {} bytes",
        summary.report.nodes,
        summary.report.initializers,
        summary.report.opset,
        summary.report.bytes
    );
    println!(
        "  parity: copied {}",
        if summary.parity.copied.is_empty() {
            "nothing".to_string()
        } else {
            summary.parity.copied.join(", ")
        }
    );
    if !summary.parity.skipped.is_empty() {
        println!("  parity: not in checkpoint {}", summary.parity.skipped.join(", "));
    }

    Ok(())
}
