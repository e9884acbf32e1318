//! # Checkpoint Weights
//!
//! Reads every tensor of a checkpoint into memory as candle tensors.
//! Floating point weights are promoted to F32 since both the trace and the
//! exported graph run in single precision.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use safetensors::{Dtype, SafeTensors};
use serde::Deserialize;
use tracing::debug;

use crate::error::{HaganeError, Result};

pub const SAFETENSORS_FILE: &str = "model.safetensors";
pub const SAFETENSORS_INDEX_FILE: &str = "model.safetensors.index.json";
pub const PYTORCH_FILE: &str = "pytorch_model.bin";

#[derive(Debug, Deserialize)]
struct ShardIndex {
    weight_map: BTreeMap<String, String>,
}

/// Every named tensor of a checkpoint.
#[derive(Debug, Clone)]
pub struct Weights {
    tensors: HashMap<String, Tensor>,
}

impl Weights {
    /// Load from the first weight layout found in `dir`: single safetensors
    /// file, sharded safetensors, then a pickled PyTorch state dict.
    pub fn load(dir: &Path, device: &Device) -> Result<Self> {
        let single = dir.join(SAFETENSORS_FILE);
        let index = dir.join(SAFETENSORS_INDEX_FILE);
        let pickle = dir.join(PYTORCH_FILE);

        let mut tensors = HashMap::new();
        if single.is_file() {
            read_safetensors(&single, device, &mut tensors)?;
        } else if index.is_file() {
            for shard in shard_files(&index)? {
                read_safetensors(&dir.join(shard), device, &mut tensors)?;
            }
        } else if pickle.is_file() {
            read_pickle(&pickle, device, &mut tensors)?;
        } else {
            return Err(HaganeError::load(
                dir,
                format!("no {SAFETENSORS_FILE}, {SAFETENSORS_INDEX_FILE} or {PYTORCH_FILE} found"),
            ));
        }

        let weights = Self { tensors };
        if weights.is_empty() {
            return Err(HaganeError::load(dir, "checkpoint holds no tensors"));
        }
        debug!(tensors = weights.len(), dir = %dir.display(), "loaded checkpoint weights");
        Ok(weights)
    }

    pub fn from_tensors(tensors: HashMap<String, Tensor>) -> Self {
        Self { tensors }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Owned map for building a `VarBuilder`. Tensors are reference counted,
    /// so this does not copy weight data.
    pub fn to_map(&self) -> HashMap<String, Tensor> {
        self.tensors.clone()
    }
}

fn shard_files(index: &Path) -> Result<BTreeSet<PathBuf>> {
    let json = fs::read_to_string(index).map_err(|e| HaganeError::load(index, e))?;
    let index_data: ShardIndex =
        serde_json::from_str(&json).map_err(|e| HaganeError::load(index, e))?;
    Ok(index_data
        .weight_map
        .into_values()
        .map(PathBuf::from)
        .collect())
}

fn candle_dtype(dtype: Dtype) -> Option<DType> {
    match dtype {
        Dtype::U8 => Some(DType::U8),
        Dtype::U32 => Some(DType::U32),
        Dtype::I64 => Some(DType::I64),
        Dtype::F16 => Some(DType::F16),
        Dtype::BF16 => Some(DType::BF16),
        Dtype::F32 => Some(DType::F32),
        Dtype::F64 => Some(DType::F64),
        _ => None,
    }
}

fn promote(tensor: Tensor) -> candle_core::Result<Tensor> {
    match tensor.dtype() {
        DType::F16 | DType::BF16 | DType::F64 => tensor.to_dtype(DType::F32),
        _ => Ok(tensor),
    }
}

fn read_safetensors(
    path: &Path,
    device: &Device,
    into: &mut HashMap<String, Tensor>,
) -> Result<()> {
    let bytes = fs::read(path).map_err(|e| HaganeError::load(path, e))?;
    let file = SafeTensors::deserialize(&bytes).map_err(|e| HaganeError::load(path, e))?;

    for (name, view) in file.tensors() {
        let dtype = candle_dtype(view.dtype()).ok_or_else(|| {
            HaganeError::load(
                path,
                format!("tensor {name} has unsupported dtype {:?}", view.dtype()),
            )
        })?;
        let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), device)
            .and_then(promote)
            .map_err(|e| HaganeError::load(path, format!("tensor {name}: {e}")))?;
        into.insert(name, tensor);
    }
    Ok(())
}

fn read_pickle(path: &Path, device: &Device, into: &mut HashMap<String, Tensor>) -> Result<()> {
    let tensors = candle_core::pickle::read_all(path).map_err(|e| HaganeError::load(path, e))?;
    for (name, tensor) in tensors {
        let tensor = tensor
            .to_device(device)
            .and_then(promote)
            .map_err(|e| HaganeError::load(path, format!("tensor {name}: {e}")))?;
        into.insert(name, tensor);
    }
    Ok(())
}
