//! # Converted State Dicts
//!
//! A [`StateDict`] is the flat ``name -> tensor`` table produced by a
//! conversion. Values are reference counted so tied parameters share storage.
//!
//! A [`StateDictLoader`] is the consumer of a finished state dict; the
//! [`ParamManifest`] loader checks names and shapes against a declared table.

use crate::convert::error::ConversionError;
use burn::config::Config;
use burn::tensor::TensorData;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Flat, ordered ``name -> tensor`` table.
#[derive(Debug, Clone, Default)]
pub struct StateDict {
    params: BTreeMap<String, Arc<TensorData>>,
}

impl StateDict {
    /// Create an empty state dict.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a parameter, returning any value it replaces.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        data: TensorData,
    ) -> Option<Arc<TensorData>> {
        self.insert_shared(name, Arc::new(data))
    }

    /// Insert a shared parameter, returning any value it replaces.
    pub fn insert_shared(
        &mut self,
        name: impl Into<String>,
        data: Arc<TensorData>,
    ) -> Option<Arc<TensorData>> {
        self.params.insert(name.into(), data)
    }

    /// Bind `target` to the same storage as `source`.
    ///
    /// # Errors
    ///
    /// [`ConversionError::MissingParameters`] if `source` is absent.
    pub fn tie(
        &mut self,
        target: &str,
        source: &str,
    ) -> Result<(), ConversionError> {
        let shared = self
            .params
            .get(source)
            .cloned()
            .ok_or_else(|| ConversionError::MissingParameters(vec![source.to_string()]))?;
        self.insert_shared(target, shared);
        Ok(())
    }

    /// Lookup a parameter.
    pub fn get(
        &self,
        name: &str,
    ) -> Option<&TensorData> {
        self.params.get(name).map(|p| p.as_ref())
    }

    /// Lookup a parameter's shared handle.
    pub fn get_shared(
        &self,
        name: &str,
    ) -> Option<&Arc<TensorData>> {
        self.params.get(name)
    }

    /// Lookup a parameter's shape.
    pub fn shape(
        &self,
        name: &str,
    ) -> Option<&[usize]> {
        self.get(name).map(|p| p.shape.as_slice())
    }

    /// Do two names share the same storage?
    pub fn is_shared(
        &self,
        a: &str,
        b: &str,
    ) -> bool {
        match (self.params.get(a), self.params.get(b)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Does the state dict contain `name`?
    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.params.contains_key(name)
    }

    /// Parameter names, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(|k| k.as_str())
    }

    /// ``(name, tensor)`` pairs, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TensorData)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Is the state dict empty?
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Serialize as a ``.safetensors`` archive of little-endian `F32` tensors.
    ///
    /// Tied parameters are written once per name.
    pub fn to_safetensors_bytes(&self) -> Result<Vec<u8>, ConversionError> {
        let buffers = self
            .params
            .iter()
            .map(|(name, data)| {
                let values = data.as_ref().clone().convert::<f32>().into_vec::<f32>()?;
                let bytes = values
                    .iter()
                    .flat_map(|v| v.to_le_bytes())
                    .collect::<Vec<u8>>();
                Ok((name.as_str(), data.shape.clone(), bytes))
            })
            .collect::<Result<Vec<_>, ConversionError>>()?;

        let views = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                Ok((*name, TensorView::new(Dtype::F32, shape.clone(), bytes)?))
            })
            .collect::<Result<Vec<_>, ConversionError>>()?;

        let metadata = HashMap::from([("format".to_string(), "pt".to_string())]);
        Ok(safetensors::serialize(views, &Some(metadata))?)
    }

    /// Write a ``.safetensors`` archive.
    pub fn save_safetensors<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> Result<(), ConversionError> {
        let bytes = self.to_safetensors_bytes()?;
        std::fs::write(path.as_ref(), bytes)?;
        tracing::info!(
            path = %path.as_ref().display(),
            params = self.len(),
            "saved state dict"
        );
        Ok(())
    }
}

/// Consumer of a finished [`StateDict`].
pub trait StateDictLoader {
    /// Accept the state dict, or fail.
    ///
    /// # Errors
    ///
    /// * [`ConversionError::MissingParameters`] when required names are absent.
    /// * [`ConversionError::ShapeMismatch`] when a shape disagrees.
    /// * [`ConversionError::UnexpectedParameters`] when undeclared names are
    ///   present and the loader is strict.
    fn load_state_dict(
        &self,
        state_dict: &StateDict,
    ) -> Result<(), ConversionError>;
}

/// Declared ``name -> shape`` table of a target model.
#[derive(Config, Debug)]
pub struct ParamManifest {
    /// Declared parameter shapes.
    pub params: BTreeMap<String, Vec<usize>>,

    /// Reject parameters that are not declared.
    #[config(default = true)]
    pub strict: bool,
}

impl ParamManifest {
    /// The names and shapes of an existing state dict.
    pub fn from_state_dict(state_dict: &StateDict) -> Self {
        Self::new(
            state_dict
                .iter()
                .map(|(name, data)| (name.to_string(), data.shape.clone()))
                .collect(),
        )
    }

    /// The names and shapes stored in a ``.safetensors`` archive.
    pub fn from_safetensors_file<P: AsRef<Path>>(path: P) -> Result<Self, ConversionError> {
        let buffer = std::fs::read(path.as_ref())?;
        let tensors = SafeTensors::deserialize(&buffer)?;
        Ok(Self::new(
            tensors
                .tensors()
                .into_iter()
                .map(|(name, view)| (name, view.shape().to_vec()))
                .collect(),
        ))
    }

    /// Declare a parameter.
    pub fn with_param(
        mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
    ) -> Self {
        self.params.insert(name.into(), shape);
        self
    }
}

impl StateDictLoader for ParamManifest {
    fn load_state_dict(
        &self,
        state_dict: &StateDict,
    ) -> Result<(), ConversionError> {
        let missing = self
            .params
            .keys()
            .filter(|name| !state_dict.contains(name))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(ConversionError::MissingParameters(missing));
        }

        for (name, expected) in &self.params {
            if let Some(actual) = state_dict.shape(name) {
                if actual != expected.as_slice() {
                    return Err(ConversionError::ShapeMismatch {
                        name: name.clone(),
                        expected: expected.clone(),
                        actual: actual.to_vec(),
                    });
                }
            }
        }

        let unexpected = state_dict
            .names()
            .filter(|name| !self.params.contains_key(*name))
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        if !unexpected.is_empty() {
            if self.strict {
                return Err(ConversionError::UnexpectedParameters(unexpected));
            }
            tracing::warn!(?unexpected, "ignoring undeclared parameters");
        }

        Ok(())
    }
}
