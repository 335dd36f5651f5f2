//! # Weight Layout Ops
//!
//! Layout changes between framework conventions.
//!
//! Reshapes are metadata-only over row-major data; axis permutations are
//! executed as ``burn`` tensor ops on the supplied backend.

use crate::convert::error::ConversionError;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;

/// Load `data` as a rank-`D` float tensor.
///
/// # Errors
///
/// [`ConversionError::RankMismatch`] if `data` is not rank `D`.
pub fn to_tensor<B: Backend, const D: usize>(
    name: &str,
    data: TensorData,
    device: &B::Device,
) -> Result<Tensor<B, D>, ConversionError> {
    if data.shape.len() != D {
        return Err(ConversionError::RankMismatch {
            name: name.to_string(),
            expected: D,
            actual: data.shape.clone(),
        });
    }
    Ok(Tensor::from_data(data, device))
}

/// Reinterpret `data` with a new shape of the same element count.
pub fn reshape(
    name: &str,
    data: TensorData,
    shape: Vec<usize>,
) -> Result<TensorData, ConversionError> {
    let numel: usize = shape.iter().product();
    if numel != data.num_elements() {
        return Err(ConversionError::ShapeMismatch {
            name: name.to_string(),
            expected: shape,
            actual: data.shape.clone(),
        });
    }
    let values = data.convert::<f32>().to_vec::<f32>()?;
    Ok(TensorData::new(values, shape))
}

/// Drop every size-1 axis.
pub fn squeeze(data: TensorData) -> Result<TensorData, ConversionError> {
    let shape = squeeze_shape(&data.shape);
    if shape.len() == data.shape.len() {
        return Ok(data);
    }
    let values = data.convert::<f32>().into_vec::<f32>()?;
    Ok(TensorData::new(values, shape))
}

/// The shape with every size-1 axis dropped.
pub fn squeeze_shape(shape: &[usize]) -> Vec<usize> {
    shape.iter().copied().filter(|&d| d != 1).collect()
}

/// Flatten to rank 1.
pub fn flatten(
    name: &str,
    data: TensorData,
) -> Result<TensorData, ConversionError> {
    let numel = data.num_elements();
    reshape(name, data, vec![numel])
}

/// Reshape ``(d0, ...)`` to ``(d0, numel / d0)``.
///
/// Collapses per-head ``(in, heads, head_dim)`` projections to ``(in, heads * head_dim)``.
pub fn collapse_trailing_axes(
    name: &str,
    data: TensorData,
) -> Result<TensorData, ConversionError> {
    let lead = match data.shape.first() {
        Some(&d) if d > 0 => d,
        _ => {
            return Err(ConversionError::RankMismatch {
                name: name.to_string(),
                expected: 2,
                actual: data.shape.clone(),
            });
        }
    };
    let rest = data.num_elements() / lead;
    reshape(name, data, vec![lead, rest])
}

/// Reshape ``(..., dn)`` to ``(dn, numel / dn)``.
///
/// This is a row-major reinterpretation, not a transpose: the per-head
/// ``(heads, head_dim, out)`` output projection becomes ``(out, heads * head_dim)``
/// in memory order, ahead of the kernel transpose.
pub fn lead_with_last_axis(
    name: &str,
    data: TensorData,
) -> Result<TensorData, ConversionError> {
    let last = match data.shape.last() {
        Some(&d) if d > 0 => d,
        _ => {
            return Err(ConversionError::RankMismatch {
                name: name.to_string(),
                expected: 2,
                actual: data.shape.clone(),
            });
        }
    };
    let rest = data.num_elements() / last;
    reshape(name, data, vec![last, rest])
}

/// Reverse every axis; ``(in, out)`` becomes ``(out, in)``.
pub fn reverse_axes<B: Backend>(
    name: &str,
    data: TensorData,
    device: &B::Device,
) -> Result<TensorData, ConversionError> {
    match data.shape.len() {
        0 | 1 => Ok(data),
        2 => Ok(to_tensor::<B, 2>(name, data, device)?
            .transpose()
            .into_data()),
        3 => Ok(to_tensor::<B, 3>(name, data, device)?
            .permute([2, 1, 0])
            .into_data()),
        4 => Ok(to_tensor::<B, 4>(name, data, device)?
            .permute([3, 2, 1, 0])
            .into_data()),
        _ => Err(ConversionError::RankMismatch {
            name: name.to_string(),
            expected: 4,
            actual: data.shape.clone(),
        }),
    }
}

/// Permute a conv kernel from ``(height, width, in, out)`` to ``(out, in, height, width)``.
pub fn hwio_to_oihw<B: Backend>(
    name: &str,
    data: TensorData,
    device: &B::Device,
) -> Result<TensorData, ConversionError> {
    Ok(to_tensor::<B, 4>(name, data, device)?
        .permute([3, 2, 0, 1])
        .into_data())
}
