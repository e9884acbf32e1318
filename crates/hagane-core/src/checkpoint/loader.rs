//! # Checkpoint Loader
//!
//! Builds an inference-ready token classifier and its tokenizer from a
//! checkpoint directory. Candle tensors carry no gradient state, so the
//! loaded weights stay frozen for the whole export.

use std::fs;
use std::path::Path;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use tracing::info;

use super::arch::Architecture;
use super::model::{EncoderConfig, TokenClassifier};
use super::tokenizer::CheckpointTokenizer;
use super::weights::Weights;
use crate::error::{HaganeError, Result};

pub const CONFIG_FILE: &str = "config.json";

/// Name of the classification head weight; its rows are the labels.
const CLASSIFIER_WEIGHT: &str = "classifier.weight";

/// A loaded checkpoint, ready to trace and lower.
pub struct Checkpoint {
    pub architecture: Architecture,
    pub tokenizer: CheckpointTokenizer,
    pub model: TokenClassifier,
    pub weights: Weights,
    pub device: Device,
}

impl Checkpoint {
    pub fn num_labels(&self) -> usize {
        self.model.num_labels()
    }
}

/// Loads checkpoints onto a fixed device.
#[derive(Debug, Clone)]
pub struct CheckpointLoader {
    device: Device,
}

impl CheckpointLoader {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// Load config, tokenizer, weights and model from `root`.
    pub fn load(&self, root: &Path) -> Result<Checkpoint> {
        if !root.is_dir() {
            return Err(HaganeError::load(root, "not a checkpoint directory"));
        }

        let config_path = root.join(CONFIG_FILE);
        let config_json = fs::read_to_string(&config_path)
            .map_err(|e| HaganeError::load(&config_path, e))?;
        let architecture = Architecture::from_config_json(&config_json)
            .map_err(|e| HaganeError::load(&config_path, e))?;

        let tokenizer = CheckpointTokenizer::load(root, architecture.family)?;
        let weights = Weights::load(root, &self.device)?;

        let num_labels = match weights.get(CLASSIFIER_WEIGHT).map(|w| w.dims().to_vec()) {
            Some(dims) if dims.len() == 2 && dims[1] == architecture.hidden_size => dims[0],
            Some(dims) => {
                return Err(HaganeError::load(
                    root,
                    format!(
                        "{CLASSIFIER_WEIGHT} has shape {dims:?}, expected [labels, {}]",
                        architecture.hidden_size
                    ),
                ));
            }
            None => {
                return Err(HaganeError::load(
                    root,
                    format!("{CLASSIFIER_WEIGHT} not found; not a token classifier"),
                ));
            }
        };
        if !architecture.labels.is_empty() && architecture.labels.len() != num_labels {
            return Err(HaganeError::load(
                &config_path,
                format!(
                    "id2label lists {} labels but the classifier has {num_labels}",
                    architecture.labels.len()
                ),
            ));
        }

        let encoder_config = EncoderConfig::from_json(architecture.family, &config_json)
            .map_err(|e| HaganeError::load(&config_path, e))?;
        let vb = VarBuilder::from_tensors(weights.to_map(), DType::F32, &self.device);
        let model = TokenClassifier::load(vb, &encoder_config, architecture.hidden_size, num_labels)
            .map_err(|e| HaganeError::load(root, e))?;

        info!(
            family = %architecture.family,
            layers = architecture.num_layers,
            hidden = architecture.hidden_size,
            labels = num_labels,
            "loaded checkpoint"
        );

        Ok(Checkpoint {
            architecture,
            tokenizer,
            model,
            weights,
            device: self.device.clone(),
        })
    }
}

impl Default for CheckpointLoader {
    fn default() -> Self {
        Self::new(Device::Cpu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_a_load_error() {
        let err = CheckpointLoader::default()
            .load(Path::new("/definitely/not/a/checkpoint"))
            .err()
            .unwrap();
        assert!(matches!(err, HaganeError::Load { .. }));
    }

    #[test]
    fn missing_config_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CheckpointLoader::default().load(dir.path()).err().unwrap();
        assert!(err.to_string().contains(CONFIG_FILE));
    }

    #[test]
    fn unsupported_architecture_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"model_type": "gpt2", "vocab_size": 10, "hidden_size": 8,
                "num_hidden_layers": 1, "num_attention_heads": 2,
                "intermediate_size": 16, "max_position_embeddings": 8}"#,
        )
        .unwrap();
        let err = CheckpointLoader::default().load(dir.path()).err().unwrap();
        assert!(err.to_string().contains("gpt2"));
    }
}
