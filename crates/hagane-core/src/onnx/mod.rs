//! ONNX graph construction: an in-memory IR, encoder lowering and
//! constant folding.

pub mod fold;
pub mod graph;
pub mod lower;

pub use fold::{FoldStats, fold_constants};
pub use graph::{Constant, Dim, ElemType, Graph, IR_VERSION, PRODUCER_NAME, declared_dims};
pub use lower::lower_token_classifier;
