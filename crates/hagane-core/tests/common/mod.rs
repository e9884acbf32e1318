//! Tiny synthetic checkpoints written to disk for end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use hagane_core::ExportConfig;
use hagane_core::config::DEFAULT_SOURCE_DIR;
use serde_json::json;
use tempfile::TempDir;

pub const HIDDEN: usize = 8;
pub const HEADS: usize = 2;
pub const FFN: usize = 16;
pub const LAYERS: usize = 2;
pub const MAX_POSITIONS: usize = 64;
pub const LABELS: [&str; 3] = ["O", "B-PII", "I-PII"];

pub const VOCAB: [&str; 12] = [
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "this", "is", "a", "sample", "input", "for", "onnx",
    "export",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Bert,
    DistilBert,
}

/// Checkpoint layout options.
#[derive(Debug, Clone)]
pub struct CheckpointSpec {
    pub family: Family,
    /// `model_input_names` written to `tokenizer_config.json`, `None` to omit the file
    pub input_names: Option<Vec<&'static str>>,
    pub write_vocab: bool,
    pub activation: &'static str,
}

impl CheckpointSpec {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            input_names: None,
            write_vocab: true,
            activation: "gelu",
        }
    }

    pub fn inputs(mut self, names: &[&'static str]) -> Self {
        self.input_names = Some(names.to_vec());
        self
    }

    pub fn activation(mut self, activation: &'static str) -> Self {
        self.activation = activation;
        self
    }
}

/// A temporary project root holding a checkpoint at the default source path.
pub struct Workspace {
    pub root: TempDir,
}

impl Workspace {
    pub fn new(spec: &CheckpointSpec) -> Self {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join(DEFAULT_SOURCE_DIR);
        fs::create_dir_all(&source).unwrap();
        write_checkpoint(&source, spec);
        Self { root }
    }

    pub fn config(&self) -> ExportConfig {
        ExportConfig::anchored_at(self.root.path()).with_max_length(8)
    }

    pub fn source(&self) -> PathBuf {
        self.root.path().join(DEFAULT_SOURCE_DIR)
    }
}

pub fn write_checkpoint(dir: &Path, spec: &CheckpointSpec) {
    fs::write(dir.join("config.json"), config_json(spec).to_string()).unwrap();
    fs::write(dir.join("tokenizer.json"), tokenizer_json().to_string()).unwrap();
    if let Some(names) = &spec.input_names {
        let class = match spec.family {
            Family::Bert => "BertTokenizerFast",
            Family::DistilBert => "DistilBertTokenizerFast",
        };
        let config = json!({
            "model_input_names": names,
            "tokenizer_class": class,
            "pad_token": "[PAD]",
        });
        fs::write(dir.join("tokenizer_config.json"), config.to_string()).unwrap();
    }
    if spec.write_vocab {
        fs::write(dir.join("vocab.txt"), VOCAB.join("\n")).unwrap();
    }
    candle_core::safetensors::save(&weights(spec.family), dir.join("model.safetensors")).unwrap();
}

fn id2label() -> serde_json::Value {
    LABELS
        .iter()
        .enumerate()
        .map(|(id, label)| (id.to_string(), json!(label)))
        .collect::<serde_json::Map<_, _>>()
        .into()
}

fn config_json(spec: &CheckpointSpec) -> serde_json::Value {
    match spec.family {
        Family::Bert => json!({
            "architectures": ["BertForTokenClassification"],
            "model_type": "bert",
            "vocab_size": VOCAB.len(),
            "hidden_size": HIDDEN,
            "num_hidden_layers": LAYERS,
            "num_attention_heads": HEADS,
            "intermediate_size": FFN,
            "hidden_act": spec.activation,
            "hidden_dropout_prob": 0.1,
            "attention_probs_dropout_prob": 0.1,
            "max_position_embeddings": MAX_POSITIONS,
            "type_vocab_size": 2,
            "initializer_range": 0.02,
            "layer_norm_eps": 1e-12,
            "pad_token_id": 0,
            "position_embedding_type": "absolute",
            "use_cache": false,
            "classifier_dropout": null,
            "id2label": id2label(),
        }),
        Family::DistilBert => json!({
            "architectures": ["DistilBertForTokenClassification"],
            "model_type": "distilbert",
            "vocab_size": VOCAB.len(),
            "dim": HIDDEN,
            "n_layers": LAYERS,
            "n_heads": HEADS,
            "hidden_dim": FFN,
            "activation": spec.activation,
            "max_position_embeddings": MAX_POSITIONS,
            "initializer_range": 0.02,
            "pad_token_id": 0,
            "sinusoidal_pos_embds": false,
            "id2label": id2label(),
        }),
    }
}

fn tokenizer_json() -> serde_json::Value {
    let vocab: serde_json::Map<String, serde_json::Value> = VOCAB
        .iter()
        .enumerate()
        .map(|(id, token)| (token.to_string(), json!(id)))
        .collect();
    json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": {"type": "Lowercase"},
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {
            "type": "BertProcessing",
            "sep": ["[SEP]", 3],
            "cls": ["[CLS]", 2]
        },
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "[UNK]"
        }
    })
}

fn random(dims: &[usize]) -> Tensor {
    Tensor::randn(0f32, 0.02, dims, &Device::Cpu).unwrap()
}

fn ones(dims: &[usize]) -> Tensor {
    Tensor::ones(dims, DType::F32, &Device::Cpu).unwrap()
}

fn linear(map: &mut HashMap<String, Tensor>, prefix: &str, out: usize, inp: usize) {
    map.insert(format!("{prefix}.weight"), random(&[out, inp]));
    map.insert(format!("{prefix}.bias"), random(&[out]));
}

fn norm(map: &mut HashMap<String, Tensor>, prefix: &str) {
    map.insert(format!("{prefix}.weight"), ones(&[HIDDEN]));
    map.insert(format!("{prefix}.bias"), random(&[HIDDEN]));
}

pub fn weights(family: Family) -> HashMap<String, Tensor> {
    let mut map = HashMap::new();
    let root = match family {
        Family::Bert => "bert",
        Family::DistilBert => "distilbert",
    };
    let emb = format!("{root}.embeddings");
    map.insert(format!("{emb}.word_embeddings.weight"), random(&[VOCAB.len(), HIDDEN]));
    map.insert(format!("{emb}.position_embeddings.weight"), random(&[MAX_POSITIONS, HIDDEN]));
    if family == Family::Bert {
        map.insert(format!("{emb}.token_type_embeddings.weight"), random(&[2, HIDDEN]));
    }
    norm(&mut map, &format!("{emb}.LayerNorm"));

    for i in 0..LAYERS {
        match family {
            Family::Bert => {
                let p = format!("bert.encoder.layer.{i}");
                linear(&mut map, &format!("{p}.attention.self.query"), HIDDEN, HIDDEN);
                linear(&mut map, &format!("{p}.attention.self.key"), HIDDEN, HIDDEN);
                linear(&mut map, &format!("{p}.attention.self.value"), HIDDEN, HIDDEN);
                linear(&mut map, &format!("{p}.attention.output.dense"), HIDDEN, HIDDEN);
                norm(&mut map, &format!("{p}.attention.output.LayerNorm"));
                linear(&mut map, &format!("{p}.intermediate.dense"), FFN, HIDDEN);
                linear(&mut map, &format!("{p}.output.dense"), HIDDEN, FFN);
                norm(&mut map, &format!("{p}.output.LayerNorm"));
            }
            Family::DistilBert => {
                let p = format!("distilbert.transformer.layer.{i}");
                linear(&mut map, &format!("{p}.attention.q_lin"), HIDDEN, HIDDEN);
                linear(&mut map, &format!("{p}.attention.k_lin"), HIDDEN, HIDDEN);
                linear(&mut map, &format!("{p}.attention.v_lin"), HIDDEN, HIDDEN);
                linear(&mut map, &format!("{p}.attention.out_lin"), HIDDEN, HIDDEN);
                norm(&mut map, &format!("{p}.sa_layer_norm"));
                linear(&mut map, &format!("{p}.ffn.lin1"), FFN, HIDDEN);
                linear(&mut map, &format!("{p}.ffn.lin2"), HIDDEN, FFN);
                norm(&mut map, &format!("{p}.output_layer_norm"));
            }
        }
    }
    linear(&mut map, "classifier", LABELS.len(), HIDDEN);
    map
}
