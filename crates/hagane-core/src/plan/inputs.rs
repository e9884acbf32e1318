//! # Input Resolution
//!
//! Decides which named tensors the exported graph takes. The tokenizer's
//! sample encoding is intersected with the closed set of recognized inputs,
//! always in the order the set declares.

use std::fmt;

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::error::{HaganeError, Result};

/// Model inputs the exporter knows how to wire into a graph.
///
/// Declaration order is the order inputs appear in the exported graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InputName {
    InputIds,
    AttentionMask,
    TokenTypeIds,
}

impl InputName {
    /// Every recognized input in graph order.
    pub const ALL: [InputName; 3] = [
        InputName::InputIds,
        InputName::AttentionMask,
        InputName::TokenTypeIds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputName::InputIds => "input_ids",
            InputName::AttentionMask => "attention_mask",
            InputName::TokenTypeIds => "token_type_ids",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|input| input.as_str() == name)
    }
}

impl fmt::Display for InputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of token-level values, shape `[1, len]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleTensor {
    values: Vec<u32>,
}

impl SampleTensor {
    pub fn new(values: Vec<u32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    /// `(batch, sequence)` dimensions.
    pub fn shape(&self) -> (usize, usize) {
        (1, self.values.len())
    }

    /// Materialize as a `[1, len]` u32 tensor.
    pub fn to_tensor(&self, device: &Device) -> candle_core::Result<Tensor> {
        Tensor::new(self.values.as_slice(), device)?.unsqueeze(0)
    }
}

/// Named tensors produced by tokenizing the trace sample, in the order the
/// tokenizer emitted them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleEncoding {
    entries: Vec<(String, SampleTensor)>,
}

impl SampleEncoding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named tensor.
    pub fn insert(&mut self, name: impl Into<String>, tensor: SampleTensor) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = tensor,
            None => self.entries.push((name, tensor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&SampleTensor> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tensor)| tensor)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A resolved graph input and its trace value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInput {
    pub name: InputName,
    pub tensor: SampleTensor,
}

/// Ordered, non-empty list of graph inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputPlan {
    inputs: Vec<PlannedInput>,
}

impl InputPlan {
    pub fn names(&self) -> Vec<InputName> {
        self.inputs.iter().map(|input| input.name).collect()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Always false; an empty plan cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn get(&self, name: InputName) -> Option<&SampleTensor> {
        self.inputs
            .iter()
            .find(|input| input.name == name)
            .map(|input| &input.tensor)
    }

    /// Sequence length of the trace sample.
    pub fn sequence_length(&self) -> usize {
        self.inputs[0].tensor.shape().1
    }
}

/// Restrict `encoding` to recognized inputs, in recognized-set order.
///
/// Fails with [`HaganeError::NoValidInputs`] when nothing is recognized,
/// since a graph cannot be traced without inputs.
pub fn resolve_inputs(encoding: &SampleEncoding) -> Result<InputPlan> {
    let inputs: Vec<PlannedInput> = InputName::ALL
        .into_iter()
        .filter_map(|name| {
            encoding.get(name.as_str()).map(|tensor| PlannedInput {
                name,
                tensor: tensor.clone(),
            })
        })
        .collect();

    if inputs.is_empty() {
        return Err(HaganeError::NoValidInputs {
            produced: encoding.names(),
        });
    }

    let lengths: Vec<usize> = inputs.iter().map(|i| i.tensor.shape().1).collect();
    if lengths.windows(2).any(|w| w[0] != w[1]) {
        return Err(HaganeError::sample(format!(
            "inputs disagree on sequence length: {lengths:?}"
        )));
    }

    debug!(
        inputs = ?inputs.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
        sequence = lengths[0],
        "resolved graph inputs"
    );

    Ok(InputPlan { inputs })
}
