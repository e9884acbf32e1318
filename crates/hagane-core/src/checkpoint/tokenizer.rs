//! # Checkpoint Tokenizer
//!
//! Wraps the Hugging Face tokenizer shipped with a checkpoint together with
//! the list of inputs it is configured to produce.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tokenizers::{
    PaddingParams, PaddingStrategy, PostProcessor, Tokenizer as HfTokenizer, TruncationParams,
};
use tracing::debug;

use super::arch::ModelFamily;
use crate::error::{HaganeError, Result};
use crate::plan::{InputName, SampleEncoding, SampleTensor};

pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

const DEFAULT_PAD_TOKEN: &str = "[PAD]";

/// `pad_token` is either a plain string or a serialized `AddedToken`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenSpec {
    Plain(String),
    Added { content: String },
}

impl TokenSpec {
    fn into_content(self) -> String {
        match self {
            TokenSpec::Plain(content) | TokenSpec::Added { content } => content,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct TokenizerConfig {
    model_input_names: Option<Vec<String>>,
    tokenizer_class: Option<String>,
    pad_token: Option<TokenSpec>,
}

/// Tokenizer of a checkpoint plus the inputs it emits.
#[derive(Clone)]
pub struct CheckpointTokenizer {
    inner: HfTokenizer,
    produced: Vec<String>,
    pad_token: String,
}

impl CheckpointTokenizer {
    /// Load `tokenizer.json` and the optional `tokenizer_config.json` from `dir`.
    pub fn load(dir: &Path, family: ModelFamily) -> Result<Self> {
        let path = dir.join(TOKENIZER_FILE);
        if !path.is_file() {
            return Err(HaganeError::load(dir, format!("{TOKENIZER_FILE} not found")));
        }
        let inner = HfTokenizer::from_file(&path).map_err(|e| HaganeError::load(&path, e))?;

        let config_path = dir.join(TOKENIZER_CONFIG_FILE);
        let config = if config_path.is_file() {
            let json =
                fs::read_to_string(&config_path).map_err(|e| HaganeError::load(&config_path, e))?;
            serde_json::from_str::<TokenizerConfig>(&json)
                .map_err(|e| HaganeError::load(&config_path, e))?
        } else {
            TokenizerConfig::default()
        };

        let produced = config
            .model_input_names
            .unwrap_or_else(|| default_input_names(config.tokenizer_class.as_deref(), family));
        let pad_token = config
            .pad_token
            .map(TokenSpec::into_content)
            .unwrap_or_else(|| DEFAULT_PAD_TOKEN.to_string());

        debug!(?produced, %pad_token, "loaded tokenizer");
        Ok(Self {
            inner,
            produced,
            pad_token,
        })
    }

    /// Names of the tensors this tokenizer emits.
    pub fn produced_inputs(&self) -> &[String] {
        &self.produced
    }

    /// Tokenize `text`, truncated and padded to exactly `max_length`.
    ///
    /// `max_length` must leave room for at least one text token after the
    /// special tokens the post-processor adds.
    pub fn encode_sample(&self, text: &str, max_length: usize) -> Result<SampleEncoding> {
        let special = self
            .inner
            .get_post_processor()
            .map_or(0, |processor| processor.added_tokens(false));
        if max_length <= special {
            return Err(HaganeError::sample(format!(
                "max length {max_length} leaves no room for text next to {special} special tokens"
            )));
        }

        let pad_id = self.inner.token_to_id(&self.pad_token).ok_or_else(|| {
            HaganeError::sample(format!(
                "pad token {:?} is not in the vocabulary",
                self.pad_token
            ))
        })?;

        let mut tokenizer = self.inner.clone();
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(HaganeError::sample)?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(max_length),
            pad_id,
            pad_token: self.pad_token.clone(),
            ..Default::default()
        }));

        let encoding = tokenizer.encode(text, true).map_err(HaganeError::sample)?;

        let mut sample = SampleEncoding::new();
        for name in &self.produced {
            let values = match name.as_str() {
                "input_ids" => encoding.get_ids(),
                "attention_mask" => encoding.get_attention_mask(),
                "token_type_ids" => encoding.get_type_ids(),
                "special_tokens_mask" => encoding.get_special_tokens_mask(),
                other => {
                    debug!(input = other, "tokenizer declares an input it cannot encode");
                    continue;
                }
            };
            sample.insert(name.clone(), SampleTensor::new(values.to_vec()));
        }
        Ok(sample)
    }
}

/// Input names a tokenizer emits when `tokenizer_config.json` does not list them.
fn default_input_names(tokenizer_class: Option<&str>, family: ModelFamily) -> Vec<String> {
    let without_segments = match tokenizer_class {
        Some(class) => class.starts_with("DistilBert"),
        None => family == ModelFamily::DistilBert,
    };
    InputName::ALL
        .into_iter()
        .filter(|name| !(without_segments && *name == InputName::TokenTypeIds))
        .map(|name| name.as_str().to_string())
        .collect()
}
