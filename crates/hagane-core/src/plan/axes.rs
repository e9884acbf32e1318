//! # Dynamic Axis Planning
//!
//! Every graph tensor shares the same dynamic contract: dimension 0 is the
//! batch and dimension 1 is the sequence.

use std::collections::BTreeMap;
use std::fmt;

use super::inputs::{InputName, InputPlan};

/// Graph outputs. Token classification has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputName {
    Logits,
}

impl OutputName {
    pub const ALL: [OutputName; 1] = [OutputName::Logits];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputName::Logits => "logits",
        }
    }
}

/// Any named tensor at the graph boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorName {
    Input(InputName),
    Output(OutputName),
}

impl TensorName {
    pub fn as_str(&self) -> &'static str {
        match self {
            TensorName::Input(input) => input.as_str(),
            TensorName::Output(output) => output.as_str(),
        }
    }
}

impl fmt::Display for TensorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Symbolic dimension labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DimLabel {
    Batch,
    Sequence,
}

impl DimLabel {
    /// Dynamic dimensions in index order.
    pub const ALL: [DimLabel; 2] = [DimLabel::Batch, DimLabel::Sequence];

    pub fn index(&self) -> usize {
        match self {
            DimLabel::Batch => 0,
            DimLabel::Sequence => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DimLabel::Batch => "batch",
            DimLabel::Sequence => "sequence",
        }
    }
}

/// Dynamic-dimension declarations for every graph input and output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisMap {
    entries: Vec<TensorName>,
}

impl AxisMap {
    /// Tensors with dynamic axes, inputs first.
    pub fn tensors(&self) -> &[TensorName] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dimension index to symbolic label for `name`, or `None` if the tensor
    /// is not part of the graph boundary.
    pub fn axes(&self, name: TensorName) -> Option<BTreeMap<usize, &'static str>> {
        self.entries
            .contains(&name)
            .then(|| DimLabel::ALL.iter().map(|d| (d.index(), d.as_str())).collect())
    }

    /// Lookup by raw tensor name.
    pub fn axes_by_name(&self, name: &str) -> Option<BTreeMap<usize, &'static str>> {
        self.entries
            .iter()
            .find(|t| t.as_str() == name)
            .and_then(|t| self.axes(*t))
    }
}

/// Declare `batch`/`sequence` on every planned input and on `logits`.
pub fn plan_axes(plan: &InputPlan) -> AxisMap {
    let entries = plan
        .names()
        .into_iter()
        .map(TensorName::Input)
        .chain(OutputName::ALL.into_iter().map(TensorName::Output))
        .collect();
    AxisMap { entries }
}
