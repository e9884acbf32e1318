//! # Graph IR
//!
//! A small in-memory graph that lowering writes into and constant folding
//! rewrites, serialized to an ONNX `ModelProto` at the end.

use std::collections::BTreeMap;

use onnx_protobuf::{
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
    attribute_proto, tensor_proto, tensor_shape_proto, type_proto,
};
use protobuf::{Enum, EnumOrUnknown, MessageField};

/// IR version paired with opset 17.
pub const IR_VERSION: i64 = 8;

pub const PRODUCER_NAME: &str = "hagane";

/// Element types used at the graph boundary and in initializers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemType {
    Float,
    Int64,
}

impl ElemType {
    pub fn proto_value(&self) -> i32 {
        match self {
            ElemType::Float => tensor_proto::DataType::FLOAT.value(),
            ElemType::Int64 => tensor_proto::DataType::INT64.value(),
        }
    }
}

/// A declared tensor dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Fixed(i64),
    Symbolic(String),
}

/// Graph input or output declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueInfo {
    pub name: String,
    pub elem: ElemType,
    pub dims: Vec<Dim>,
}

/// Initializer payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstData {
    F32(Vec<f32>),
    I64(Vec<i64>),
}

impl ConstData {
    pub fn len(&self) -> usize {
        match self {
            ConstData::F32(v) => v.len(),
            ConstData::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A constant tensor: dims plus row-major data.
#[derive(Debug, Clone, PartialEq)]
pub struct Constant {
    pub dims: Vec<i64>,
    pub data: ConstData,
}

impl Constant {
    pub fn f32(dims: Vec<i64>, values: Vec<f32>) -> Self {
        Self {
            dims,
            data: ConstData::F32(values),
        }
    }

    pub fn i64(dims: Vec<i64>, values: Vec<i64>) -> Self {
        Self {
            dims,
            data: ConstData::I64(values),
        }
    }

    fn to_proto(&self, name: &str) -> TensorProto {
        let mut tensor = TensorProto::new();
        tensor.name = name.to_string();
        tensor.dims = self.dims.clone();
        match &self.data {
            ConstData::F32(values) => {
                tensor.data_type = ElemType::Float.proto_value();
                tensor.raw_data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            }
            ConstData::I64(values) => {
                tensor.data_type = ElemType::Int64.proto_value();
                tensor.raw_data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            }
        }
        tensor
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f32),
    Ints(Vec<i64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: AttrValue,
}

impl Attribute {
    pub fn int(name: &str, value: i64) -> Self {
        Self {
            name: name.to_string(),
            value: AttrValue::Int(value),
        }
    }

    pub fn float(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            value: AttrValue::Float(value),
        }
    }

    pub fn ints(name: &str, values: &[i64]) -> Self {
        Self {
            name: name.to_string(),
            value: AttrValue::Ints(values.to_vec()),
        }
    }

    fn to_proto(&self) -> AttributeProto {
        let mut attr = AttributeProto::new();
        attr.name = self.name.clone();
        match &self.value {
            AttrValue::Int(i) => {
                attr.type_ = EnumOrUnknown::new(attribute_proto::AttributeType::INT);
                attr.i = *i;
            }
            AttrValue::Float(f) => {
                attr.type_ = EnumOrUnknown::new(attribute_proto::AttributeType::FLOAT);
                attr.f = *f;
            }
            AttrValue::Ints(ints) => {
                attr.type_ = EnumOrUnknown::new(attribute_proto::AttributeType::INTS);
                attr.ints = ints.clone();
            }
        }
        attr
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: Vec<Attribute>,
}

impl Node {
    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }

    fn to_proto(&self) -> NodeProto {
        let mut node = NodeProto::new();
        node.name = self.name.clone();
        node.op_type = self.op_type.clone();
        node.input = self.inputs.clone();
        node.output = self.outputs.clone();
        node.attribute = self.attributes.iter().map(Attribute::to_proto).collect();
        node
    }
}

/// A computation graph under construction.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub name: String,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
    pub nodes: Vec<Node>,
    pub constants: BTreeMap<String, Constant>,
    next_id: usize,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_input(&mut self, name: &str, elem: ElemType, dims: Vec<Dim>) {
        self.inputs.push(ValueInfo {
            name: name.to_string(),
            elem,
            dims,
        });
    }

    pub fn add_output(&mut self, name: &str, elem: ElemType, dims: Vec<Dim>) {
        self.outputs.push(ValueInfo {
            name: name.to_string(),
            elem,
            dims,
        });
    }

    /// Register an initializer and return its name. An existing initializer
    /// with the same name is kept.
    pub fn constant(&mut self, name: &str, constant: Constant) -> String {
        self.constants.entry(name.to_string()).or_insert(constant);
        name.to_string()
    }

    pub fn scalar_f32(&mut self, name: &str, value: f32) -> String {
        self.constant(name, Constant::f32(vec![], vec![value]))
    }

    pub fn scalar_i64(&mut self, name: &str, value: i64) -> String {
        self.constant(name, Constant::i64(vec![], vec![value]))
    }

    pub fn ints(&mut self, name: &str, values: &[i64]) -> String {
        self.constant(name, Constant::i64(vec![values.len() as i64], values.to_vec()))
    }

    /// Append a single-output node and return the output name.
    pub fn op(&mut self, op_type: &str, inputs: &[&str], attributes: Vec<Attribute>) -> String {
        let name = format!("{op_type}_{}", self.next_id);
        let output = format!("{name}_out");
        self.push_node(name, op_type, inputs, &output, attributes);
        output
    }

    /// Append a node whose output carries a fixed name.
    pub fn op_into(
        &mut self,
        op_type: &str,
        inputs: &[&str],
        attributes: Vec<Attribute>,
        output: &str,
    ) -> String {
        let name = format!("{op_type}_{}", self.next_id);
        self.push_node(name, op_type, inputs, output, attributes);
        output.to_string()
    }

    fn push_node(
        &mut self,
        name: String,
        op_type: &str,
        inputs: &[&str],
        output: &str,
        attributes: Vec<Attribute>,
    ) {
        self.next_id += 1;
        self.nodes.push(Node {
            name,
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: vec![output.to_string()],
            attributes,
        });
    }

    /// Serialize as an ONNX model targeting `opset`.
    pub fn into_model(self, opset: i64, metadata: &[(String, String)]) -> ModelProto {
        let mut graph = GraphProto::new();
        graph.name = self.name.clone();
        graph.input = self.inputs.iter().map(value_info_proto).collect();
        graph.output = self.outputs.iter().map(value_info_proto).collect();
        graph.node = self.nodes.iter().map(Node::to_proto).collect();
        graph.initializer = self
            .constants
            .iter()
            .map(|(name, constant)| constant.to_proto(name))
            .collect();

        let mut opset_id = OperatorSetIdProto::new();
        opset_id.version = opset;

        let mut model = ModelProto::new();
        model.ir_version = IR_VERSION;
        model.opset_import.push(opset_id);
        model.producer_name = PRODUCER_NAME.to_string();
        model.producer_version = env!("CARGO_PKG_VERSION").to_string();
        model.metadata_props = metadata
            .iter()
            .map(|(key, value)| {
                let mut entry = StringStringEntryProto::new();
                entry.key = key.clone();
                entry.value = value.clone();
                entry
            })
            .collect();
        model.graph = MessageField::some(graph);
        model
    }
}

fn value_info_proto(info: &ValueInfo) -> ValueInfoProto {
    let mut shape = TensorShapeProto::new();
    for dim in &info.dims {
        let mut proto_dim = tensor_shape_proto::Dimension::new();
        proto_dim.value = Some(match dim {
            Dim::Fixed(size) => tensor_shape_proto::dimension::Value::DimValue(*size),
            Dim::Symbolic(label) => tensor_shape_proto::dimension::Value::DimParam(label.clone()),
        });
        shape.dim.push(proto_dim);
    }

    let mut tensor_type = type_proto::Tensor::new();
    tensor_type.elem_type = info.elem.proto_value();
    tensor_type.shape = MessageField::some(shape);

    let mut type_proto = TypeProto::new();
    type_proto.set_tensor_type(tensor_type);

    let mut value = ValueInfoProto::new();
    value.name = info.name.clone();
    value.type_ = MessageField::some(type_proto);
    value
}

/// Declared dims of a boundary tensor, as read back from a model.
pub fn declared_dims(value: &ValueInfoProto) -> Vec<Dim> {
    let Some(type_proto) = value.type_.as_ref() else {
        return Vec::new();
    };
    let Some(type_proto::Value::TensorType(tensor)) = type_proto.value.as_ref() else {
        return Vec::new();
    };
    let Some(shape) = tensor.shape.as_ref() else {
        return Vec::new();
    };
    shape
        .dim
        .iter()
        .map(|dim| match &dim.value {
            Some(tensor_shape_proto::dimension::Value::DimValue(v)) => Dim::Fixed(*v),
            Some(tensor_shape_proto::dimension::Value::DimParam(p)) => Dim::Symbolic(p.clone()),
            _ => Dim::Symbolic(String::new()),
        })
        .collect()
}
