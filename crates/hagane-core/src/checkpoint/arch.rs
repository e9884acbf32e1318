//! # Checkpoint Architecture
//!
//! Reads the parts of `config.json` the exporter depends on. BERT and
//! DistilBERT name the same hyper-parameters differently, so both spellings
//! are accepted.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::plan::InputName;

/// Encoder families that can be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelFamily {
    Bert,
    DistilBert,
}

impl ModelFamily {
    /// Parse the `model_type` field of `config.json`.
    pub fn from_model_type(model_type: &str) -> Option<Self> {
        match model_type {
            "bert" => Some(ModelFamily::Bert),
            "distilbert" => Some(ModelFamily::DistilBert),
            _ => None,
        }
    }

    /// Prefix under which the encoder weights are stored.
    pub fn weight_prefix(&self) -> &'static str {
        match self {
            ModelFamily::Bert => "bert",
            ModelFamily::DistilBert => "distilbert",
        }
    }

    /// Inputs the encoder actually reads.
    pub fn accepts(&self, input: InputName) -> bool {
        match self {
            ModelFamily::Bert => true,
            ModelFamily::DistilBert => input != InputName::TokenTypeIds,
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::Bert => write!(f, "bert"),
            ModelFamily::DistilBert => write!(f, "distilbert"),
        }
    }
}

/// Feed-forward activation of the encoder layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Exact GELU, `0.5 * x * (1 + erf(x / sqrt(2)))`
    Gelu,
    /// Tanh approximation of GELU
    GeluTanh,
    Relu,
}

impl Activation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "gelu" => Some(Activation::Gelu),
            "gelu_new" | "gelu_pytorch_tanh" | "geluapproximate" | "gelu_approximate" => {
                Some(Activation::GeluTanh)
            }
            "relu" => Some(Activation::Relu),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    model_type: Option<String>,
    #[serde(default)]
    architectures: Vec<String>,
    vocab_size: usize,
    #[serde(alias = "dim")]
    hidden_size: usize,
    #[serde(alias = "n_layers")]
    num_hidden_layers: usize,
    #[serde(alias = "n_heads")]
    num_attention_heads: usize,
    #[serde(alias = "hidden_dim")]
    intermediate_size: usize,
    #[serde(alias = "activation", default = "default_activation")]
    hidden_act: String,
    #[serde(default = "default_layer_norm_eps")]
    layer_norm_eps: f64,
    max_position_embeddings: usize,
    #[serde(default)]
    type_vocab_size: usize,
    #[serde(default)]
    id2label: BTreeMap<String, String>,
}

fn default_activation() -> String {
    "gelu".to_string()
}

fn default_layer_norm_eps() -> f64 {
    1e-12
}

/// Hyper-parameters and label schema of a token-classification checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Architecture {
    pub family: ModelFamily,
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub num_heads: usize,
    pub intermediate_size: usize,
    /// Activation name as written in `config.json`
    pub activation: String,
    pub layer_norm_eps: f64,
    pub max_position_embeddings: usize,
    pub type_vocab_size: usize,
    /// Label names ordered by id. Empty when `config.json` has no `id2label`.
    pub labels: Vec<String>,
}

impl Architecture {
    /// Parse `config.json` contents.
    ///
    /// Rejects anything that is not a BERT or DistilBERT token classifier.
    pub fn from_config_json(json: &str) -> Result<Self, String> {
        let raw: RawConfig =
            serde_json::from_str(json).map_err(|e| format!("invalid config.json: {e}"))?;

        let model_type = raw
            .model_type
            .as_deref()
            .ok_or_else(|| "config.json has no model_type".to_string())?;
        let family = ModelFamily::from_model_type(model_type)
            .ok_or_else(|| format!("unsupported model_type {model_type:?}"))?;

        if !raw.architectures.is_empty()
            && !raw
                .architectures
                .iter()
                .any(|a| a.ends_with("ForTokenClassification"))
        {
            return Err(format!(
                "not a token-classification checkpoint (architectures: {:?})",
                raw.architectures
            ));
        }

        if raw.num_attention_heads == 0 || raw.hidden_size % raw.num_attention_heads != 0 {
            return Err(format!(
                "hidden size {} is not divisible by {} attention heads",
                raw.hidden_size, raw.num_attention_heads
            ));
        }

        let labels = ordered_labels(&raw.id2label)?;

        Ok(Self {
            family,
            vocab_size: raw.vocab_size,
            hidden_size: raw.hidden_size,
            num_layers: raw.num_hidden_layers,
            num_heads: raw.num_attention_heads,
            intermediate_size: raw.intermediate_size,
            activation: raw.hidden_act,
            layer_norm_eps: raw.layer_norm_eps,
            max_position_embeddings: raw.max_position_embeddings,
            type_vocab_size: raw.type_vocab_size,
            labels,
        })
    }

    /// Width of a single attention head.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_heads
    }
}

/// `id2label` keys are stringified integers. Ids must be dense from zero.
fn ordered_labels(id2label: &BTreeMap<String, String>) -> Result<Vec<String>, String> {
    let mut by_id = BTreeMap::new();
    for (key, label) in id2label {
        let id: usize = key
            .parse()
            .map_err(|_| format!("id2label key {key:?} is not an integer"))?;
        by_id.insert(id, label.clone());
    }
    for (expected, id) in by_id.keys().enumerate() {
        if *id != expected {
            return Err(format!("id2label is missing id {expected}"));
        }
    }
    Ok(by_id.into_values().collect())
}
