pub mod axes;
pub mod inputs;

pub use axes::{AxisMap, DimLabel, OutputName, TensorName, plan_axes};
pub use inputs::{InputName, InputPlan, PlannedInput, SampleEncoding, SampleTensor, resolve_inputs};
