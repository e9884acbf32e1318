//! # Encoder Lowering
//!
//! Emits the ONNX graph of a BERT-family token classifier from its weights.
//! Linear layers keep the checkpoint's `[out, in]` weight layout and go
//! through a `Transpose`, which constant folding later bakes into the
//! initializer.

use std::f32::consts::{FRAC_2_SQRT_PI, SQRT_2};

use candle_core::DType;
use tracing::warn;

use super::graph::{Attribute, Constant, Dim, ElemType, Graph};
use crate::checkpoint::{Activation, Architecture, ModelFamily, Weights};
use crate::error::{HaganeError, Result};
use crate::plan::{AxisMap, InputName, OutputName, TensorName};

/// ONNX `TensorProto.DataType` code for FLOAT, used by `Cast`.
const CAST_TO_FLOAT: i64 = 1;

/// Weight names of one encoder layer, relative to the layer prefix.
struct LayerNames {
    query: &'static str,
    key: &'static str,
    value: &'static str,
    attention_output: &'static str,
    attention_norm: &'static str,
    ffn_in: &'static str,
    ffn_out: &'static str,
    output_norm: &'static str,
}

const BERT_LAYER: LayerNames = LayerNames {
    query: "attention.self.query",
    key: "attention.self.key",
    value: "attention.self.value",
    attention_output: "attention.output.dense",
    attention_norm: "attention.output.LayerNorm",
    ffn_in: "intermediate.dense",
    ffn_out: "output.dense",
    output_norm: "output.LayerNorm",
};

const DISTILBERT_LAYER: LayerNames = LayerNames {
    query: "attention.q_lin",
    key: "attention.k_lin",
    value: "attention.v_lin",
    attention_output: "attention.out_lin",
    attention_norm: "sa_layer_norm",
    ffn_in: "ffn.lin1",
    ffn_out: "ffn.lin2",
    output_norm: "output_layer_norm",
};

fn layer_prefix(family: ModelFamily, index: usize) -> String {
    match family {
        ModelFamily::Bert => format!("bert.encoder.layer.{index}"),
        ModelFamily::DistilBert => format!("distilbert.transformer.layer.{index}"),
    }
}

fn layer_names(family: ModelFamily) -> &'static LayerNames {
    match family {
        ModelFamily::Bert => &BERT_LAYER,
        ModelFamily::DistilBert => &DISTILBERT_LAYER,
    }
}

/// Dims of a boundary tensor: the planned symbolic axes followed by `trailing`.
fn boundary_dims(axes: &AxisMap, tensor: TensorName, trailing: &[i64]) -> Result<Vec<Dim>> {
    let declared = axes.axes(tensor).ok_or_else(|| {
        HaganeError::export(format!("{tensor} has no dynamic axis declaration"))
    })?;
    let mut dims: Vec<Dim> = declared
        .values()
        .map(|label| Dim::Symbolic(label.to_string()))
        .collect();
    dims.extend(trailing.iter().map(|&size| Dim::Fixed(size)));
    Ok(dims)
}

/// Build the graph of `architecture` taking `inputs` and producing `logits`.
pub fn lower_token_classifier(
    architecture: &Architecture,
    weights: &Weights,
    inputs: &[InputName],
    axes: &AxisMap,
    num_labels: usize,
) -> Result<Graph> {
    if !inputs.contains(&InputName::InputIds) {
        return Err(HaganeError::export(format!(
            "{} graphs require input_ids, plan has {inputs:?}",
            architecture.family
        )));
    }
    let activation = Activation::parse(&architecture.activation).ok_or_else(|| {
        HaganeError::export(format!(
            "unsupported activation {:?}",
            architecture.activation
        ))
    })?;

    let mut lowering = Lowering {
        graph: Graph::new(format!("{}_token_classifier", architecture.family)),
        weights,
        arch: architecture,
    };

    for &input in inputs {
        if !architecture.family.accepts(input) {
            warn!(
                input = input.as_str(),
                family = %architecture.family,
                "input is declared but not read by the encoder"
            );
        }
        let dims = boundary_dims(axes, TensorName::Input(input), &[])?;
        lowering
            .graph
            .add_input(input.as_str(), ElemType::Int64, dims);
    }
    let logits = OutputName::Logits;
    let dims = boundary_dims(axes, TensorName::Output(logits), &[num_labels as i64])?;
    lowering.graph.add_output(logits.as_str(), ElemType::Float, dims);

    let mut hidden = lowering.embeddings(inputs)?;
    let mask_bias = if inputs.contains(&InputName::AttentionMask) {
        Some(lowering.mask_bias())
    } else {
        None
    };

    let names = layer_names(architecture.family);
    for index in 0..architecture.num_layers {
        let prefix = layer_prefix(architecture.family, index);
        hidden = lowering.encoder_layer(&hidden, mask_bias.as_deref(), &prefix, names, activation)?;
    }

    lowering.linear_into(&hidden, "classifier", Some(logits.as_str()))?;
    Ok(lowering.graph)
}

struct Lowering<'a> {
    graph: Graph,
    weights: &'a Weights,
    arch: &'a Architecture,
}

impl Lowering<'_> {
    /// Register a checkpoint tensor as an initializer.
    fn weight(&mut self, name: &str) -> Result<String> {
        if self.graph.constants.contains_key(name) {
            return Ok(name.to_string());
        }
        let tensor = self
            .weights
            .get(name)
            .ok_or_else(|| HaganeError::export(format!("checkpoint has no tensor {name}")))?;
        let dims = tensor.dims().iter().map(|&d| d as i64).collect();
        let values = tensor
            .to_dtype(DType::F32)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| HaganeError::export(format!("reading {name}: {e}")))?;
        Ok(self.graph.constant(name, Constant::f32(dims, values)))
    }

    /// LayerNorm parameters, accepting the legacy `gamma`/`beta` names.
    fn norm_params(&mut self, prefix: &str) -> Result<(String, String)> {
        if self.weights.contains(&format!("{prefix}.gamma")) {
            Ok((
                self.weight(&format!("{prefix}.gamma"))?,
                self.weight(&format!("{prefix}.beta"))?,
            ))
        } else {
            Ok((
                self.weight(&format!("{prefix}.weight"))?,
                self.weight(&format!("{prefix}.bias"))?,
            ))
        }
    }

    fn layer_norm(&mut self, x: &str, prefix: &str) -> Result<String> {
        let (scale, bias) = self.norm_params(prefix)?;
        Ok(self.graph.op(
            "LayerNormalization",
            &[x, &scale, &bias],
            vec![
                Attribute::int("axis", -1),
                Attribute::float("epsilon", self.arch.layer_norm_eps as f32),
            ],
        ))
    }

    fn linear(&mut self, x: &str, prefix: &str) -> Result<String> {
        self.linear_into(x, prefix, None)
    }

    /// `x @ W^T + b`, optionally writing to a named output.
    fn linear_into(&mut self, x: &str, prefix: &str, output: Option<&str>) -> Result<String> {
        let weight = self.weight(&format!("{prefix}.weight"))?;
        let bias = self.weight(&format!("{prefix}.bias"))?;
        let transposed = self
            .graph
            .op("Transpose", &[&weight], vec![Attribute::ints("perm", &[1, 0])]);
        let product = self.graph.op("MatMul", &[x, &transposed], vec![]);
        Ok(match output {
            Some(name) => self.graph.op_into("Add", &[&product, &bias], vec![], name),
            None => self.graph.op("Add", &[&product, &bias], vec![]),
        })
    }

    fn embeddings(&mut self, inputs: &[InputName]) -> Result<String> {
        let prefix = format!("{}.embeddings", self.arch.family.weight_prefix());
        let input_ids = InputName::InputIds.as_str();

        let zero = self.graph.scalar_i64("zero_i64", 0);
        let one = self.graph.scalar_i64("one_i64", 1);
        let shape = self.graph.op("Shape", &[input_ids], vec![]);
        let seq_len = self
            .graph
            .op("Gather", &[&shape, &one], vec![Attribute::int("axis", 0)]);
        let positions = self.graph.op("Range", &[&zero, &seq_len, &one], vec![]);

        let word_table = self.weight(&format!("{prefix}.word_embeddings.weight"))?;
        let words = self
            .graph
            .op("Gather", &[&word_table, input_ids], vec![Attribute::int("axis", 0)]);
        let position_table = self.weight(&format!("{prefix}.position_embeddings.weight"))?;
        let position_rows = self.graph.op(
            "Gather",
            &[&position_table, &positions],
            vec![Attribute::int("axis", 0)],
        );
        let mut summed = self.graph.op("Add", &[&words, &position_rows], vec![]);

        if self.arch.family == ModelFamily::Bert {
            let segment_table = self.weight(&format!("{prefix}.token_type_embeddings.weight"))?;
            // Without segment ids every token belongs to segment 0
            let segment_ids = if inputs.contains(&InputName::TokenTypeIds) {
                InputName::TokenTypeIds.as_str().to_string()
            } else {
                zero
            };
            let segments = self.graph.op(
                "Gather",
                &[&segment_table, &segment_ids],
                vec![Attribute::int("axis", 0)],
            );
            summed = self.graph.op("Add", &[&summed, &segments], vec![]);
        }

        self.layer_norm(&summed, &format!("{prefix}.LayerNorm"))
    }

    /// Additive attention bias `[batch, 1, 1, sequence]`: 0 for real tokens,
    /// the most negative float for padding.
    fn mask_bias(&mut self) -> String {
        let mask = self.graph.op(
            "Cast",
            &[InputName::AttentionMask.as_str()],
            vec![Attribute::int("to", CAST_TO_FLOAT)],
        );
        let one = self.graph.scalar_f32("one_f32", 1.0);
        let fill = self.graph.scalar_f32("mask_fill", f32::MIN);
        let axes = self.graph.ints("mask_axes", &[1, 2]);
        let inverted = self.graph.op("Sub", &[&one, &mask], vec![]);
        let bias = self.graph.op("Mul", &[&inverted, &fill], vec![]);
        self.graph.op("Unsqueeze", &[&bias, &axes], vec![])
    }

    fn split_heads(&mut self, x: &str, perm: &[i64]) -> String {
        let heads = self.graph.ints(
            "heads_shape",
            &[0, 0, self.arch.num_heads as i64, self.arch.head_dim() as i64],
        );
        let reshaped = self.graph.op("Reshape", &[x, &heads], vec![]);
        self.graph
            .op("Transpose", &[&reshaped], vec![Attribute::ints("perm", perm)])
    }

    fn attention(
        &mut self,
        x: &str,
        mask_bias: Option<&str>,
        prefix: &str,
        names: &LayerNames,
    ) -> Result<String> {
        let q = self.linear(x, &format!("{prefix}.{}", names.query))?;
        let k = self.linear(x, &format!("{prefix}.{}", names.key))?;
        let v = self.linear(x, &format!("{prefix}.{}", names.value))?;

        let q = self.split_heads(&q, &[0, 2, 1, 3]);
        let k = self.split_heads(&k, &[0, 2, 3, 1]);
        let v = self.split_heads(&v, &[0, 2, 1, 3]);

        let scale = self.graph.scalar_f32(
            "attention_scale",
            1.0 / (self.arch.head_dim() as f32).sqrt(),
        );
        let scores = self.graph.op("MatMul", &[&q, &k], vec![]);
        let mut scores = self.graph.op("Mul", &[&scores, &scale], vec![]);
        if let Some(bias) = mask_bias {
            scores = self.graph.op("Add", &[&scores, bias], vec![]);
        }
        let probs = self
            .graph
            .op("Softmax", &[&scores], vec![Attribute::int("axis", -1)]);

        let context = self.graph.op("MatMul", &[&probs, &v], vec![]);
        let context = self.graph.op(
            "Transpose",
            &[&context],
            vec![Attribute::ints("perm", &[0, 2, 1, 3])],
        );
        let merged = self
            .graph
            .ints("merged_shape", &[0, 0, self.arch.hidden_size as i64]);
        let context = self.graph.op("Reshape", &[&context, &merged], vec![]);

        self.linear(&context, &format!("{prefix}.{}", names.attention_output))
    }

    fn activation(&mut self, x: &str, activation: Activation) -> String {
        match activation {
            Activation::Relu => self.graph.op("Relu", &[x], vec![]),
            Activation::Gelu => {
                let sqrt_two = self.graph.scalar_f32("sqrt_two", SQRT_2);
                let one = self.graph.scalar_f32("one_f32", 1.0);
                let half = self.graph.scalar_f32("half_f32", 0.5);
                let scaled = self.graph.op("Div", &[x, &sqrt_two], vec![]);
                let erf = self.graph.op("Erf", &[&scaled], vec![]);
                let shifted = self.graph.op("Add", &[&erf, &one], vec![]);
                let gated = self.graph.op("Mul", &[x, &shifted], vec![]);
                self.graph.op("Mul", &[&gated, &half], vec![])
            }
            Activation::GeluTanh => {
                // sqrt(2 / pi) = FRAC_2_SQRT_PI / sqrt(2)
                let coeff = self
                    .graph
                    .scalar_f32("gelu_sqrt_2_over_pi", FRAC_2_SQRT_PI / SQRT_2);
                let cubic = self.graph.scalar_f32("gelu_cubic", 0.044_715);
                let three = self.graph.scalar_f32("three_f32", 3.0);
                let one = self.graph.scalar_f32("one_f32", 1.0);
                let half = self.graph.scalar_f32("half_f32", 0.5);
                let cubed = self.graph.op("Pow", &[x, &three], vec![]);
                let cubed = self.graph.op("Mul", &[&cubed, &cubic], vec![]);
                let inner = self.graph.op("Add", &[x, &cubed], vec![]);
                let inner = self.graph.op("Mul", &[&inner, &coeff], vec![]);
                let tanh = self.graph.op("Tanh", &[&inner], vec![]);
                let shifted = self.graph.op("Add", &[&tanh, &one], vec![]);
                let gated = self.graph.op("Mul", &[x, &shifted], vec![]);
                self.graph.op("Mul", &[&gated, &half], vec![])
            }
        }
    }

    fn encoder_layer(
        &mut self,
        x: &str,
        mask_bias: Option<&str>,
        prefix: &str,
        names: &LayerNames,
        activation: Activation,
    ) -> Result<String> {
        let attended = self.attention(x, mask_bias, prefix, names)?;
        let residual = self.graph.op("Add", &[&attended, x], vec![]);
        let normed = self.layer_norm(&residual, &format!("{prefix}.{}", names.attention_norm))?;

        let up = self.linear(&normed, &format!("{prefix}.{}", names.ffn_in))?;
        let up = self.activation(&up, activation);
        let down = self.linear(&up, &format!("{prefix}.{}", names.ffn_out))?;
        let residual = self.graph.op("Add", &[&down, &normed], vec![]);
        self.layer_norm(&residual, &format!("{prefix}.{}", names.output_norm))
    }
}
