use candle_core::{DType, Result, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::distilbert::{Config as DistilBertConfig, DistilBertModel};

use super::arch::ModelFamily;

/// Encoder configuration as candle expects it.
#[derive(Debug, Clone)]
pub enum EncoderConfig {
    Bert(BertConfig),
    DistilBert(DistilBertConfig),
}

impl EncoderConfig {
    /// Deserialize `config.json` for the given family.
    pub fn from_json(family: ModelFamily, json: &str) -> serde_json::Result<Self> {
        Ok(match family {
            ModelFamily::Bert => EncoderConfig::Bert(serde_json::from_str(json)?),
            ModelFamily::DistilBert => EncoderConfig::DistilBert(serde_json::from_str(json)?),
        })
    }
}

enum Encoder {
    Bert(BertModel),
    DistilBert(DistilBertModel),
}

/// A transformer encoder with a per-token linear classification head.
pub struct TokenClassifier {
    encoder: Encoder,
    classifier: Linear,
    num_labels: usize,
}

impl TokenClassifier {
    /// Load encoder and `classifier` head from checkpoint weights.
    pub fn load(
        vb: VarBuilder,
        config: &EncoderConfig,
        hidden_size: usize,
        num_labels: usize,
    ) -> Result<Self> {
        let encoder = match config {
            EncoderConfig::Bert(cfg) => {
                Encoder::Bert(BertModel::load(vb.pp(ModelFamily::Bert.weight_prefix()), cfg)?)
            }
            EncoderConfig::DistilBert(cfg) => Encoder::DistilBert(DistilBertModel::load(
                vb.pp(ModelFamily::DistilBert.weight_prefix()),
                cfg,
            )?),
        };

        // Hugging Face token classifiers name the head `classifier`
        let classifier = candle_nn::linear(hidden_size, num_labels, vb.pp("classifier"))?;

        Ok(Self {
            encoder,
            classifier,
            num_labels,
        })
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Forward pass producing per-token logits.
    /// `input_ids`: [batch_size, seq_len]
    /// `attention_mask`: [batch_size, seq_len], 1 for real tokens
    /// `token_type_ids`: [batch_size, seq_len], ignored by DistilBERT
    pub fn forward(
        &self,
        input_ids: &Tensor,
        attention_mask: Option<&Tensor>,
        token_type_ids: Option<&Tensor>,
    ) -> Result<Tensor> {
        let hidden_states = match &self.encoder {
            Encoder::Bert(bert) => {
                let segments = match token_type_ids {
                    Some(t) => t.clone(),
                    None => input_ids.zeros_like()?,
                };
                bert.forward(input_ids, &segments, attention_mask)?
            }
            Encoder::DistilBert(distilbert) => {
                // candle's DistilBERT takes a fill mask: non-zero marks positions to hide
                let fill_mask = match attention_mask {
                    Some(mask) => mask.eq(0u32)?,
                    None => Tensor::zeros(input_ids.dims(), DType::U8, input_ids.device())?,
                };
                distilbert.forward(input_ids, &fill_mask)?
            }
        };

        self.classifier.forward(&hidden_states)
    }
}
