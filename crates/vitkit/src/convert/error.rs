//! # Conversion Errors

/// Errors raised while reading, rewriting, loading or verifying a checkpoint.
///
/// Every variant is terminal to a conversion run.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// The state dict lacks parameters the target model requires.
    #[error("missing parameters: {0:?}")]
    MissingParameters(Vec<String>),

    /// The state dict carries parameters the target model does not declare.
    #[error("unexpected parameters: {0:?}")]
    UnexpectedParameters(Vec<String>),

    /// A parameter's shape disagrees with the declared shape.
    #[error("shape mismatch for '{name}': expected {expected:?}, found {actual:?}")]
    ShapeMismatch {
        /// Parameter name.
        name: String,
        /// Declared shape.
        expected: Vec<usize>,
        /// Found shape.
        actual: Vec<usize>,
    },

    /// A layout rule was applied to a tensor of the wrong rank.
    #[error("rank mismatch for '{name}': expected rank {expected}, found shape {actual:?}")]
    RankMismatch {
        /// Parameter name.
        name: String,
        /// Required rank.
        expected: usize,
        /// Found shape.
        actual: Vec<usize>,
    },

    /// Source variables matched no structural rewrite rule.
    #[error("variables matched no rewrite rule: {0:?}")]
    UnmatchedNames(Vec<String>),

    /// Several source variables rewrote to the same target parameter.
    #[error("variables collide on target parameters: {0:?}")]
    TargetCollisions(Vec<String>),

    /// Produced outputs drifted from the captured reference.
    #[error("numerical drift in '{label}': max |diff| {max_abs_diff} > atol {atol}")]
    NumericalDrift {
        /// The compared output.
        label: String,
        /// Largest absolute difference.
        max_abs_diff: f32,
        /// Tolerance.
        atol: f32,
    },

    /// The checkpoint has no variable with this name.
    #[error("unknown checkpoint variable: {0}")]
    UnknownVariable(String),

    /// The checkpoint stores a variable in an unsupported dtype.
    #[error("unsupported dtype {dtype} for '{name}'")]
    UnsupportedDtype {
        /// Variable name.
        name: String,
        /// Stored dtype.
        dtype: String,
    },

    /// Tensor data could not be converted.
    #[error("tensor data: {0}")]
    Data(String),

    /// Malformed safetensors archive.
    #[error("safetensors: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    /// Archive io.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl From<burn::tensor::DataError> for ConversionError {
    fn from(err: burn::tensor::DataError) -> Self {
        ConversionError::Data(format!("{err:?}"))
    }
}
