//! # Constant Folding
//!
//! Evaluates nodes whose inputs are all initializers and replaces them with
//! the resulting initializer. Only the ops lowering emits on constants are
//! covered: `Transpose` and `Gather`.

use std::collections::HashSet;

use tracing::debug;

use super::graph::{AttrValue, ConstData, Constant, Graph, Node};
use crate::error::{HaganeError, Result};

/// What a folding pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldStats {
    pub folded_nodes: usize,
    pub pruned_constants: usize,
}

/// Fold constant subgraphs in place.
pub fn fold_constants(graph: &mut Graph) -> Result<FoldStats> {
    let mut stats = FoldStats::default();
    let mut kept = Vec::with_capacity(graph.nodes.len());

    for node in std::mem::take(&mut graph.nodes) {
        let foldable = node.outputs.len() == 1
            && node.inputs.iter().all(|i| graph.constants.contains_key(i));
        let value = if foldable {
            evaluate(&node, graph)?
        } else {
            None
        };
        match value {
            Some(constant) => {
                graph.constants.insert(node.outputs[0].clone(), constant);
                stats.folded_nodes += 1;
            }
            None => kept.push(node),
        }
    }
    graph.nodes = kept;

    let used: HashSet<&str> = graph
        .nodes
        .iter()
        .flat_map(|n| n.inputs.iter().map(String::as_str))
        .chain(graph.outputs.iter().map(|o| o.name.as_str()))
        .collect();
    let unused: Vec<String> = graph
        .constants
        .keys()
        .filter(|name| !used.contains(name.as_str()))
        .cloned()
        .collect();
    for name in &unused {
        graph.constants.remove(name);
    }
    stats.pruned_constants = unused.len();

    debug!(
        folded = stats.folded_nodes,
        pruned = stats.pruned_constants,
        "constant folding"
    );
    Ok(stats)
}

fn evaluate(node: &Node, graph: &Graph) -> Result<Option<Constant>> {
    let input = |i: usize| &graph.constants[&node.inputs[i]];
    match node.op_type.as_str() {
        "Transpose" => transpose(node, input(0)).map(Some),
        "Gather" => gather(node, input(0), input(1)).map(Some),
        _ => Ok(None),
    }
}

fn transpose(node: &Node, data: &Constant) -> Result<Constant> {
    let rank = data.dims.len();
    let perm: Vec<usize> = match node.attribute("perm") {
        Some(AttrValue::Ints(perm)) => perm.iter().map(|&p| p as usize).collect(),
        _ => (0..rank).rev().collect(),
    };
    if rank != 2 || perm != [1, 0] {
        return Err(HaganeError::export(format!(
            "cannot fold {}: only 2-D transposes are supported, got dims {:?} perm {perm:?}",
            node.name, data.dims
        )));
    }

    let (rows, cols) = (data.dims[0] as usize, data.dims[1] as usize);
    let dims = vec![data.dims[1], data.dims[0]];
    Ok(match &data.data {
        ConstData::F32(values) => Constant::f32(dims, transpose_2d(values, rows, cols)),
        ConstData::I64(values) => Constant::i64(dims, transpose_2d(values, rows, cols)),
    })
}

fn transpose_2d<T: Copy>(values: &[T], rows: usize, cols: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len());
    for c in 0..cols {
        for r in 0..rows {
            out.push(values[r * cols + c]);
        }
    }
    out
}

fn gather(node: &Node, data: &Constant, indices: &Constant) -> Result<Constant> {
    let axis = match node.attribute("axis") {
        Some(AttrValue::Int(axis)) => *axis,
        _ => 0,
    };
    if axis != 0 || data.dims.is_empty() {
        return Err(HaganeError::export(format!(
            "cannot fold {}: only axis-0 gathers are supported",
            node.name
        )));
    }
    let ConstData::I64(idx) = &indices.data else {
        return Err(HaganeError::export(format!(
            "cannot fold {}: indices must be int64",
            node.name
        )));
    };

    let rows = data.dims[0];
    let row_len: usize = data.dims[1..].iter().product::<i64>() as usize;
    let mut resolved = Vec::with_capacity(idx.len());
    for &i in idx {
        let row = if i < 0 { i + rows } else { i };
        if !(0..rows).contains(&row) {
            return Err(HaganeError::export(format!(
                "cannot fold {}: index {i} out of range for {rows} rows",
                node.name
            )));
        }
        resolved.push(row as usize);
    }

    let dims: Vec<i64> = indices
        .dims
        .iter()
        .chain(data.dims[1..].iter())
        .copied()
        .collect();
    Ok(match &data.data {
        ConstData::F32(values) => Constant::f32(dims, take_rows(values, &resolved, row_len)),
        ConstData::I64(values) => Constant::i64(dims, take_rows(values, &resolved, row_len)),
    })
}

fn take_rows<T: Copy>(values: &[T], rows: &[usize], row_len: usize) -> Vec<T> {
    rows.iter()
        .flat_map(|&r| values[r * row_len..(r + 1) * row_len].iter().copied())
        .collect()
}
