//! # Source Checkpoint Readers
//!
//! A [`CheckpointReader`] enumerates the variables of a training checkpoint
//! and loads them one at a time.

use crate::convert::error::ConversionError;
use crate::convert::layout::squeeze;
use burn::tensor::TensorData;
use safetensors::{Dtype, SafeTensors};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Read access to a checkpoint's named variables.
pub trait CheckpointReader {
    /// List every variable with its stored shape, in name order.
    fn list_variables(&self) -> Result<Vec<(String, Vec<usize>)>, ConversionError>;

    /// Load a variable, as stored.
    fn load_raw(
        &self,
        name: &str,
    ) -> Result<TensorData, ConversionError>;

    /// Load a variable with every size-1 axis squeezed out.
    fn load_variable(
        &self,
        name: &str,
    ) -> Result<TensorData, ConversionError> {
        squeeze(self.load_raw(name)?)
    }
}

/// A checkpoint held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpoint {
    variables: BTreeMap<String, TensorData>,
}

impl InMemoryCheckpoint {
    /// Create an empty checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, replacing any previous one of the same name.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        data: TensorData,
    ) {
        self.variables.insert(name.into(), data);
    }

    /// Builder form of [`InMemoryCheckpoint::insert`].
    pub fn with_variable(
        mut self,
        name: impl Into<String>,
        data: TensorData,
    ) -> Self {
        self.insert(name, data);
        self
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Is the checkpoint empty?
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl CheckpointReader for InMemoryCheckpoint {
    fn list_variables(&self) -> Result<Vec<(String, Vec<usize>)>, ConversionError> {
        Ok(self
            .variables
            .iter()
            .map(|(name, data)| (name.clone(), data.shape.clone()))
            .collect())
    }

    fn load_raw(
        &self,
        name: &str,
    ) -> Result<TensorData, ConversionError> {
        self.variables
            .get(name)
            .cloned()
            .ok_or_else(|| ConversionError::UnknownVariable(name.to_string()))
    }
}

/// A checkpoint exported to a `.safetensors` archive.
///
/// `F32` and `F64` variables are supported; `F64` is narrowed to `f32`.
pub struct SafetensorsCheckpoint {
    path: PathBuf,
    buffer: Vec<u8>,
}

impl std::fmt::Debug for SafetensorsCheckpoint {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SafetensorsCheckpoint")
            .field("path", &self.path)
            .field("bytes", &self.buffer.len())
            .finish()
    }
}

impl SafetensorsCheckpoint {
    /// Read and validate an archive.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ConversionError> {
        let path = path.as_ref().to_path_buf();
        let buffer = std::fs::read(&path)?;
        SafeTensors::deserialize(&buffer)?;
        Ok(Self { path, buffer })
    }

    /// The archive location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tensors(&self) -> Result<SafeTensors<'_>, ConversionError> {
        Ok(SafeTensors::deserialize(&self.buffer)?)
    }
}

impl CheckpointReader for SafetensorsCheckpoint {
    fn list_variables(&self) -> Result<Vec<(String, Vec<usize>)>, ConversionError> {
        let tensors = self.tensors()?;
        let mut variables = tensors
            .tensors()
            .into_iter()
            .map(|(name, view)| (name, view.shape().to_vec()))
            .collect::<Vec<_>>();
        variables.sort();
        Ok(variables)
    }

    fn load_raw(
        &self,
        name: &str,
    ) -> Result<TensorData, ConversionError> {
        let tensors = self.tensors()?;
        let view = tensors
            .tensor(name)
            .map_err(|_| ConversionError::UnknownVariable(name.to_string()))?;
        let shape = view.shape().to_vec();

        let values: Vec<f32> = match view.dtype() {
            Dtype::F32 => view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            Dtype::F64 => view
                .data()
                .chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
                .collect(),
            dtype => {
                return Err(ConversionError::UnsupportedDtype {
                    name: name.to_string(),
                    dtype: format!("{dtype:?}"),
                });
            }
        };

        Ok(TensorData::new(values, shape))
    }
}
