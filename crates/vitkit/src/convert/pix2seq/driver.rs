//! # `Pix2Seq` Checkpoint Conversion

use crate::convert::checkpoint::CheckpointReader;
use crate::convert::error::ConversionError;
use crate::convert::pix2seq::rename::{RuleRegion, rewrite_param};
use crate::convert::state_dict::StateDict;
use burn::config::Config;
use burn::prelude::Backend;
use serde::Serialize;
use std::collections::BTreeMap;

/// Output head weight, tied to the token embedding.
pub const LM_HEAD_WEIGHT: &str = "lm_head.weight";

/// Token embedding weight.
pub const TOKEN_EMBEDDING_WEIGHT: &str = "model.decoder.embed_tokens.weight";

/// Conversion options.
#[derive(Config, Debug)]
pub struct ConvertOptions {
    /// Fail when a variable matches no structural rewrite rule.
    #[config(default = false)]
    pub strict: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Is this checkpoint variable part of the model, rather than optimizer or loop state?
pub fn is_model_variable(name: &str) -> bool {
    name.contains("model") && !name.to_lowercase().contains("optimizer")
}

/// A single converted variable.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedParam {
    /// Checkpoint variable path.
    pub source: String,

    /// Target parameter name.
    pub target: String,

    /// Stored source shape.
    pub source_shape: Vec<usize>,

    /// Target shape.
    pub shape: Vec<usize>,

    /// Regions of the structural rules that fired.
    pub regions: Vec<RuleRegion>,
}

/// What a conversion did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionReport {
    /// Converted variables, in checkpoint order.
    pub converted: Vec<ConvertedParam>,

    /// Variables skipped as non-model state.
    pub skipped: Vec<String>,

    /// Variables that matched no structural rule.
    pub unmatched: Vec<String>,

    /// ``target -> source`` parameter ties.
    pub tied: BTreeMap<String, String>,

    /// ``target -> sources`` for targets written by more than one variable.
    ///
    /// The last source, in checkpoint order, is the one kept.
    pub collisions: BTreeMap<String, Vec<String>>,
}

/// The result of a conversion.
#[derive(Debug, Clone)]
pub struct ConversionOutput {
    /// Converted parameters.
    pub state_dict: StateDict,

    /// What was done.
    pub report: ConversionReport,
}

/// Tie the output head to the token embedding.
pub fn tie_lm_head(state_dict: &mut StateDict) -> Result<(), ConversionError> {
    state_dict.tie(LM_HEAD_WEIGHT, TOKEN_EMBEDDING_WEIGHT)
}

/// Convert a `Pix2Seq` training checkpoint into a target state dict.
///
/// # Arguments
///
/// - `reader`: the source checkpoint.
/// - `options`: conversion options.
/// - `device`: the device used for layout permutations.
///
/// # Errors
///
/// * [`ConversionError::UnmatchedNames`] in strict mode, when any model
///   variable matches no structural rule.
/// * [`ConversionError::TargetCollisions`] in strict mode, when two model
///   variables rewrite to the same target.
/// * [`ConversionError::MissingParameters`] when there is no token embedding to tie.
/// * Any reader or layout error.
pub fn convert_checkpoint<B: Backend, R: CheckpointReader>(
    reader: &R,
    options: &ConvertOptions,
    device: &B::Device,
) -> Result<ConversionOutput, ConversionError> {
    let mut state_dict = StateDict::new();
    let mut report = ConversionReport::default();
    let mut sources: BTreeMap<String, String> = BTreeMap::new();

    for (name, shape) in reader.list_variables()? {
        if !is_model_variable(&name) {
            report.skipped.push(name);
            continue;
        }
        tracing::info!(name = name.as_str(), ?shape, "loading variable");

        let param = reader.load_variable(&name)?;
        let rewritten = rewrite_param::<B>(&name, param, device)?;

        if !rewritten.matched() {
            tracing::warn!(
                name = name.as_str(),
                target = rewritten.name.as_str(),
                "variable matched no rewrite rule"
            );
            report.unmatched.push(name.clone());
        }

        if let Some(previous) = sources.insert(rewritten.name.clone(), name.clone()) {
            tracing::warn!(
                name = name.as_str(),
                previous = previous.as_str(),
                target = rewritten.name.as_str(),
                "variable overwrites an earlier rewrite"
            );
            report
                .collisions
                .entry(rewritten.name.clone())
                .or_insert_with(|| vec![previous])
                .push(name.clone());
        }

        report.converted.push(ConvertedParam {
            source: name,
            target: rewritten.name.clone(),
            source_shape: shape,
            shape: rewritten.param.shape.clone(),
            regions: rewritten.regions,
        });
        state_dict.insert(rewritten.name, rewritten.param);
    }

    if options.strict && !report.unmatched.is_empty() {
        return Err(ConversionError::UnmatchedNames(report.unmatched));
    }
    if options.strict && !report.collisions.is_empty() {
        return Err(ConversionError::TargetCollisions(
            report.collisions.into_keys().collect(),
        ));
    }

    tie_lm_head(&mut state_dict)?;
    report
        .tied
        .insert(LM_HEAD_WEIGHT.to_string(), TOKEN_EMBEDDING_WEIGHT.to_string());

    tracing::info!(
        converted = report.converted.len(),
        skipped = report.skipped.len(),
        unmatched = report.unmatched.len(),
        collisions = report.collisions.len(),
        params = state_dict.len(),
        "converted checkpoint"
    );

    Ok(ConversionOutput { state_dict, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::checkpoint::InMemoryCheckpoint;
    use crate::convert::pix2seq::rename::VARIABLE_VALUE_SUFFIX;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    fn iota(shape: Vec<usize>) -> TensorData {
        let numel = shape.iter().product::<usize>();
        TensorData::new((0..numel).map(|i| i as f32).collect::<Vec<_>>(), shape)
    }

    fn var(path: &str) -> String {
        format!("{path}{VARIABLE_VALUE_SUFFIX}")
    }

    fn checkpoint() -> InMemoryCheckpoint {
        InMemoryCheckpoint::new()
            .with_variable(
                var("model/encoder/stem_conv/kernel"),
                iota(vec![2, 2, 3, 8]),
            )
            .with_variable(var("model/encoder/stem_conv/bias"), iota(vec![8]))
            .with_variable(
                var("model/encoder/transformer_encoder/enc_layers/0/mha/_query_dense/kernel"),
                iota(vec![8, 2, 4]),
            )
            .with_variable(
                var("model/decoder/ar_decoder/Stoken_embedding"),
                iota(vec![16, 8]),
            )
            .with_variable(var("model/decoder/ar_decoder/Soutp_bias"), iota(vec![1, 16]))
            .with_variable(var("model/decoder/output_ln/gamma"), iota(vec![8]))
            .with_variable(
                var("optimizer/model/encoder/stem_conv/kernel/.OPTIMIZER_SLOT/m"),
                iota(vec![2, 2, 3, 8]),
            )
            .with_variable(var("model/Optimizer_state/x"), iota(vec![2]))
            .with_variable(var("global_step"), iota(vec![1]))
    }

    #[test]
    fn test_is_model_variable() {
        assert!(is_model_variable("model/encoder/stem_conv/kernel"));
        assert!(!is_model_variable("global_step"));
        assert!(!is_model_variable("model/OPTIMIZER/slot"));
        assert!(!is_model_variable("optimizer/model/x"));
    }

    #[test]
    fn test_convert_checkpoint() {
        let device = Default::default();
        let output =
            convert_checkpoint::<B, _>(&checkpoint(), &ConvertOptions::new(), &device).unwrap();
        let state_dict = &output.state_dict;

        assert_eq!(
            state_dict.names().collect::<Vec<_>>(),
            vec![
                "lm_head.bias",
                "lm_head.weight",
                "model.decoder.embed_tokens.weight",
                "model.encoder.embeddings.patch_embeddings.projection.bias",
                "model.encoder.embeddings.patch_embeddings.projection.weight",
                "model.encoder.layer.0.attention.attention.query.weight",
                "output_layernorm.weight",
            ]
        );

        assert_eq!(
            state_dict.shape("model.encoder.embeddings.patch_embeddings.projection.weight"),
            Some([8, 3, 2, 2].as_slice())
        );
        assert_eq!(
            state_dict.shape("model.encoder.layer.0.attention.attention.query.weight"),
            Some([8, 8].as_slice())
        );
        // Squeezed.
        assert_eq!(state_dict.shape("lm_head.bias"), Some([16].as_slice()));

        assert!(state_dict.is_shared(LM_HEAD_WEIGHT, TOKEN_EMBEDDING_WEIGHT));

        let report = &output.report;
        assert_eq!(report.converted.len(), 6);
        assert_eq!(report.skipped.len(), 3);
        assert!(report.unmatched.is_empty());
        assert!(report.collisions.is_empty());
        assert_eq!(
            report.tied.get(LM_HEAD_WEIGHT).map(String::as_str),
            Some(TOKEN_EMBEDDING_WEIGHT)
        );

        let json = serde_json::to_value(report).unwrap();
        assert_eq!(json["converted"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_unmatched() {
        let device = Default::default();
        let checkpoint =
            checkpoint().with_variable(var("model/mystery/kernel"), iota(vec![2, 3]));

        let output =
            convert_checkpoint::<B, _>(&checkpoint, &ConvertOptions::new(), &device).unwrap();
        assert_eq!(output.report.unmatched, vec![var("model/mystery/kernel")]);
        assert_eq!(
            output.state_dict.shape("model.model.mystery.weight"),
            Some([3, 2].as_slice())
        );

        let err = convert_checkpoint::<B, _>(
            &checkpoint,
            &ConvertOptions::new().with_strict(true),
            &device,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConversionError::UnmatchedNames(ref names) if names.len() == 1),
            "{err:?}"
        );
    }

    #[test]
    fn test_target_collisions() {
        let device = Default::default();
        let target = "model.encoder.embeddings.patch_embeddings.projection.bias";
        // Normalizes to the same path as the suffixed variable.
        let bare = "model/encoder/stem_conv/bias";
        let checkpoint = checkpoint().with_variable(bare, TensorData::new(vec![7.0f32; 8], [8]));

        let output =
            convert_checkpoint::<B, _>(&checkpoint, &ConvertOptions::new(), &device).unwrap();
        assert_eq!(
            output.report.collisions.get(target),
            Some(&vec![bare.to_string(), var(bare)])
        );
        assert_eq!(output.report.converted.len(), 7);
        assert_eq!(output.state_dict.shape(target), Some([8].as_slice()));

        let kept = output.state_dict.get(target).unwrap().to_vec::<f32>().unwrap();
        assert_eq!(kept, (0..8).map(|i| i as f32).collect::<Vec<_>>());

        let err = convert_checkpoint::<B, _>(
            &checkpoint,
            &ConvertOptions::new().with_strict(true),
            &device,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConversionError::TargetCollisions(ref names) if names == &[target]),
            "{err:?}"
        );
    }

    #[test]
    fn test_missing_token_embedding() {
        let device = Default::default();
        let checkpoint = InMemoryCheckpoint::new()
            .with_variable(var("model/decoder/output_ln/gamma"), iota(vec![8]));

        let err =
            convert_checkpoint::<B, _>(&checkpoint, &ConvertOptions::new(), &device).unwrap_err();
        assert!(
            matches!(err, ConversionError::MissingParameters(ref names)
                if names == &[TOKEN_EMBEDDING_WEIGHT]),
            "{err:?}"
        );
    }
}
