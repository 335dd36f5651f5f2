//! # Numerical Verification
//!
//! Compare converted-model outputs against reference slices captured from
//! the source framework.

use crate::convert::error::ConversionError;
use crate::convert::layout::to_tensor;
use burn::prelude::{Backend, Tensor};
use burn::tensor::{ElementConversion, TensorData};
use safetensors::SafeTensors;
use std::path::Path;

/// Default absolute tolerance.
pub const DEFAULT_ATOL: f32 = 1e-4;

/// Check that `actual` and `expected` agree elementwise within `atol`.
///
/// # Errors
///
/// * [`ConversionError::ShapeMismatch`] if the shapes differ.
/// * [`ConversionError::NumericalDrift`] with the largest absolute difference,
///   or `NaN` when either side holds a `NaN`.
pub fn assert_allclose<B: Backend, const D: usize>(
    label: &str,
    actual: Tensor<B, D>,
    expected: Tensor<B, D>,
    atol: f32,
) -> Result<(), ConversionError> {
    let actual_shape = actual.dims().to_vec();
    let expected_shape = expected.dims().to_vec();
    if actual_shape != expected_shape {
        return Err(ConversionError::ShapeMismatch {
            name: label.to_string(),
            expected: expected_shape,
            actual: actual_shape,
        });
    }

    let diff = (actual - expected).abs();
    let nan_count: i64 = diff.clone().is_nan().int().sum().into_scalar().elem();
    let max_abs_diff: f32 = if nan_count > 0 {
        f32::NAN
    } else {
        diff.max().into_scalar().elem()
    };
    tracing::debug!(label, max_abs_diff, atol, "compared outputs");

    // `max` skips NaN lanes; any NaN in either side is a drift.
    if nan_count == 0 && max_abs_diff <= atol {
        Ok(())
    } else {
        Err(ConversionError::NumericalDrift {
            label: label.to_string(),
            max_abs_diff,
            atol,
        })
    }
}

/// Output of the encoder.
pub const ENCODER_LAST_HIDDEN_STATE: &str = "encoder_last_hidden_state";

/// Decoder logits.
pub const LOGITS: &str = "logits";

/// Reference outputs of the `Pix2Seq` ViT-Base checkpoint.
///
/// Captured on the reference image, with decoder prompt ``[[10]]``.
#[derive(Debug, Clone, PartialEq)]
pub struct Pix2SeqReferenceOutputs {
    /// Shape of the encoder last hidden state.
    pub encoder_hidden_shape: [usize; 3],

    /// ``encoder_last_hidden_state[0, :3, :3]``
    pub encoder_hidden_slice: [[f32; 3]; 3],

    /// ``logits[0, -1, :3]``
    pub logits_slice: [f32; 3],

    /// Absolute tolerance.
    pub atol: f32,
}

impl Default for Pix2SeqReferenceOutputs {
    fn default() -> Self {
        Self {
            encoder_hidden_shape: [1, 1600, 768],
            encoder_hidden_slice: [
                [-4.3100, 2.0649, -0.2276],
                [-3.3208, 1.9842, 0.9854],
                [-3.5163, 2.3272, 0.6971],
            ],
            logits_slice: [-8.0231, -7.5681, -7.5681],
            atol: DEFAULT_ATOL,
        }
    }
}

impl Pix2SeqReferenceOutputs {
    /// Verify the model outputs.
    ///
    /// # Arguments
    ///
    /// - `encoder_hidden`: the encoder last hidden state, ``[batch, tokens, hidden]``.
    /// - `logits`: the decoder logits, ``[batch, steps, vocab]``.
    pub fn verify<B: Backend>(
        &self,
        encoder_hidden: Tensor<B, 3>,
        logits: Tensor<B, 3>,
    ) -> Result<(), ConversionError> {
        let device = encoder_hidden.device();

        let [batch, tokens, hidden] = self.encoder_hidden_shape;
        if batch == 0 || tokens < 3 || hidden < 3 {
            return Err(ConversionError::ShapeMismatch {
                name: ENCODER_LAST_HIDDEN_STATE.to_string(),
                expected: vec![1, 3, 3],
                actual: self.encoder_hidden_shape.to_vec(),
            });
        }

        let shape = encoder_hidden.dims();
        if shape != self.encoder_hidden_shape {
            return Err(ConversionError::ShapeMismatch {
                name: ENCODER_LAST_HIDDEN_STATE.to_string(),
                expected: self.encoder_hidden_shape.to_vec(),
                actual: shape.to_vec(),
            });
        }
        let hidden_slice: Tensor<B, 2> = encoder_hidden.slice([0..1, 0..3, 0..3]).squeeze(0);
        let expected_hidden = Tensor::<B, 2>::from_data(
            TensorData::new(
                self.encoder_hidden_slice.concat(),
                [3, 3],
            ),
            &device,
        );
        assert_allclose(
            ENCODER_LAST_HIDDEN_STATE,
            hidden_slice,
            expected_hidden,
            self.atol,
        )?;

        let [batch, steps, vocab] = logits.dims();
        if batch == 0 || steps == 0 || vocab < 3 {
            return Err(ConversionError::RankMismatch {
                name: LOGITS.to_string(),
                expected: 3,
                actual: vec![batch, steps, vocab],
            });
        }
        let logits_slice: Tensor<B, 1> = logits
            .slice([0..1, steps - 1..steps, 0..3])
            .reshape([3]);
        let expected_logits = Tensor::<B, 1>::from_data(
            TensorData::new(self.logits_slice.to_vec(), [3]),
            &device,
        );
        assert_allclose(LOGITS, logits_slice, expected_logits, self.atol)?;

        tracing::info!("outputs match the reference");
        Ok(())
    }

    /// Verify outputs stored in a ``.safetensors`` archive under
    /// [`ENCODER_LAST_HIDDEN_STATE`] and [`LOGITS`].
    pub fn verify_safetensors_file<B: Backend, P: AsRef<Path>>(
        &self,
        path: P,
        device: &B::Device,
    ) -> Result<(), ConversionError> {
        let buffer = std::fs::read(path.as_ref())?;
        let tensors = SafeTensors::deserialize(&buffer)?;

        let load = |name: &str| -> Result<Tensor<B, 3>, ConversionError> {
            let view = tensors
                .tensor(name)
                .map_err(|_| ConversionError::UnknownVariable(name.to_string()))?;
            if view.dtype() != safetensors::Dtype::F32 {
                return Err(ConversionError::UnsupportedDtype {
                    name: name.to_string(),
                    dtype: format!("{:?}", view.dtype()),
                });
            }
            let values = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect::<Vec<_>>();
            to_tensor::<B, 3>(name, TensorData::new(values, view.shape().to_vec()), device)
        };

        self.verify(load(ENCODER_LAST_HIDDEN_STATE)?, load(LOGITS)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use safetensors::Dtype;
    use safetensors::tensor::TensorView;
    use std::collections::HashMap;

    type B = NdArray<f32>;

    fn reference_outputs(
        reference: &Pix2SeqReferenceOutputs,
        tokens: usize,
        hidden: usize,
    ) -> (Vec<f32>, Vec<f32>) {
        let mut encoder = vec![0.0f32; tokens * hidden];
        for (i, row) in reference.encoder_hidden_slice.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                encoder[i * hidden + j] = *v;
            }
        }

        // [1, 2, 4]: only the last step is compared.
        let mut logits = vec![9.0f32; 8];
        logits[4..7].copy_from_slice(&reference.logits_slice);

        (encoder, logits)
    }

    #[test]
    fn test_assert_allclose() {
        let device = Default::default();
        let a = Tensor::<B, 1>::from_floats([1.0, 2.0, 3.0], &device);
        let b = Tensor::<B, 1>::from_floats([1.0, 2.00005, 3.0], &device);
        assert_allclose("close", a.clone(), b, 1e-4).unwrap();

        let c = Tensor::<B, 1>::from_floats([1.0, 2.5, 3.0], &device);
        let err = assert_allclose("far", a.clone(), c, 1e-4).unwrap_err();
        match err {
            ConversionError::NumericalDrift {
                label,
                max_abs_diff,
                atol,
            } => {
                assert_eq!(label, "far");
                assert!((max_abs_diff - 0.5).abs() < 1e-6);
                assert_eq!(atol, 1e-4);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let d = Tensor::<B, 1>::from_floats([1.0, 2.0], &device);
        let err = assert_allclose("shape", a, d, 1e-4).unwrap_err();
        assert!(matches!(err, ConversionError::ShapeMismatch { .. }), "{err:?}");
    }

    #[test]
    fn test_assert_allclose_rejects_nan() {
        let device = Default::default();
        let expected = Tensor::<B, 1>::from_floats([1.0, 2.0, 3.0], &device);

        for actual in [
            [1.0, f32::NAN, 3.0],
            [f32::NAN, 2.0, 3.0],
            [1.0, 2.0, f32::NAN],
        ] {
            let actual = Tensor::<B, 1>::from_floats(actual, &device);
            let err = assert_allclose("nan", actual, expected.clone(), 1e-4).unwrap_err();
            match err {
                ConversionError::NumericalDrift { max_abs_diff, .. } => {
                    assert!(max_abs_diff.is_nan())
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        let actual = Tensor::<B, 1>::from_floats([1.0, 2.0, 3.0], &device);
        let expected = Tensor::<B, 1>::from_floats([1.0, 2.0, f32::NAN], &device);
        let err = assert_allclose("nan", actual, expected, 1e-4).unwrap_err();
        assert!(matches!(err, ConversionError::NumericalDrift { .. }), "{err:?}");
    }

    #[test]
    fn test_verify_rejects_short_reference_shape() {
        let device = Default::default();
        let reference = Pix2SeqReferenceOutputs {
            encoder_hidden_shape: [1, 2, 2],
            ..Default::default()
        };
        let encoder_hidden = Tensor::<B, 3>::zeros([1, 2, 2], &device);
        let logits = Tensor::<B, 3>::zeros([1, 1, 4], &device);

        let err = reference.verify(encoder_hidden, logits).unwrap_err();
        match err {
            ConversionError::ShapeMismatch { name, actual, .. } => {
                assert_eq!(name, ENCODER_LAST_HIDDEN_STATE);
                assert_eq!(actual, vec![1, 2, 2]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_reference_defaults() {
        let reference = Pix2SeqReferenceOutputs::default();
        assert_eq!(reference.encoder_hidden_shape, [1, 1600, 768]);
        assert_eq!(reference.encoder_hidden_slice[1][2], 0.9854);
        assert_eq!(reference.logits_slice, [-8.0231, -7.5681, -7.5681]);
        assert_eq!(reference.atol, 1e-4);
    }

    #[test]
    fn test_verify() {
        let device = Default::default();
        let reference = Pix2SeqReferenceOutputs {
            encoder_hidden_shape: [1, 4, 5],
            ..Default::default()
        };
        let (encoder, logits) = reference_outputs(&reference, 4, 5);

        let encoder_hidden = Tensor::<B, 3>::from_data(TensorData::new(encoder.clone(), [1, 4, 5]), &device);
        let logits_t = Tensor::<B, 3>::from_data(TensorData::new(logits.clone(), [1, 2, 4]), &device);
        reference.verify(encoder_hidden.clone(), logits_t).unwrap();

        let mut drifted = logits;
        drifted[5] += 0.01;
        let logits_t = Tensor::<B, 3>::from_data(TensorData::new(drifted, [1, 2, 4]), &device);
        let err = reference.verify(encoder_hidden, logits_t.clone()).unwrap_err();
        assert!(
            matches!(err, ConversionError::NumericalDrift { ref label, .. } if label == LOGITS),
            "{err:?}"
        );

        let encoder_hidden = Tensor::<B, 3>::from_data(TensorData::new(encoder, [1, 2, 10]), &device);
        let err = reference.verify(encoder_hidden, logits_t).unwrap_err();
        assert!(matches!(err, ConversionError::ShapeMismatch { .. }), "{err:?}");
    }

    #[test]
    fn test_verify_safetensors_file() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outputs.safetensors");

        let reference = Pix2SeqReferenceOutputs {
            encoder_hidden_shape: [1, 3, 3],
            ..Default::default()
        };
        let (encoder, logits) = reference_outputs(&reference, 3, 3);
        let encoder_bytes: Vec<u8> = encoder.iter().flat_map(|v| v.to_le_bytes()).collect();
        let logits_bytes: Vec<u8> = logits.iter().flat_map(|v| v.to_le_bytes()).collect();

        let mut views = HashMap::new();
        views.insert(
            ENCODER_LAST_HIDDEN_STATE.to_string(),
            TensorView::new(Dtype::F32, vec![1, 3, 3], &encoder_bytes).unwrap(),
        );
        views.insert(
            LOGITS.to_string(),
            TensorView::new(Dtype::F32, vec![1, 2, 4], &logits_bytes).unwrap(),
        );
        safetensors::serialize_to_file(&views, &None, &path).unwrap();

        reference
            .verify_safetensors_file::<B, _>(&path, &device)
            .unwrap();

        let err = Pix2SeqReferenceOutputs::default()
            .verify_safetensors_file::<B, _>(&path, &device)
            .unwrap_err();
        assert!(matches!(err, ConversionError::ShapeMismatch { .. }), "{err:?}");
    }
}
