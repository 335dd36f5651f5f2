//! # `DPT` Config
//!
//! Hyperparameters for the Dense Prediction Transformer: a `ViT` backbone,
//! reassemble / fusion necks and an optional auxiliary segmentation head.

use crate::models::pretrained::{ConfigDict, ConfigError, PretrainedConfig};
use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// How the readout (CLS) token of the backbone hidden states is consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum ReadoutType {
    /// Drop the readout token.
    Ignore,

    /// Add the readout token to every other token.
    Add,

    /// Concatenate the readout token to every other token,
    /// then project back to the hidden size with a linear layer and a GELU.
    #[default]
    Project,
}

impl ReadoutType {
    /// All supported readout types.
    pub const ALL: [ReadoutType; 3] = [ReadoutType::Ignore, ReadoutType::Add, ReadoutType::Project];

    /// The serialized name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadoutType::Ignore => "ignore",
            ReadoutType::Add => "add",
            ReadoutType::Project => "project",
        }
    }
}

impl Display for ReadoutType {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadoutType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReadoutType::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ConfigError::UnsupportedReadoutType(s.to_string()))
    }
}

impl TryFrom<String> for ReadoutType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReadoutType> for &'static str {
    fn from(value: ReadoutType) -> Self {
        value.as_str()
    }
}

/// [`DptConfig`] model family discriminator.
pub const DPT_MODEL_TYPE: &str = "dpt";

/// `DPT` Config.
///
/// The defaults describe a `ViT`-Base backbone at 384x384 resolution.
#[derive(Config, Debug)]
pub struct DptConfig {
    /// Dimensionality of the encoder layers.
    #[config(default = 768)]
    pub hidden_size: usize,

    /// Number of encoder layers.
    #[config(default = 12)]
    pub num_hidden_layers: usize,

    /// Number of attention heads per encoder layer.
    #[config(default = 12)]
    pub num_attention_heads: usize,

    /// Dimensionality of the feed-forward layers.
    #[config(default = 3072)]
    pub intermediate_size: usize,

    /// Encoder activation name.
    #[config(default = "\"gelu\".to_string()")]
    pub hidden_act: String,

    /// Dropout for fully connected layers.
    #[config(default = 0.0)]
    pub hidden_dropout_prob: f64,

    /// Dropout for attention probabilities.
    #[config(default = 0.0)]
    pub attention_probs_dropout_prob: f64,

    /// Stddev of the truncated normal weight initializer.
    #[config(default = 0.02)]
    pub initializer_range: f64,

    /// Layer norm epsilon.
    #[config(default = 1e-12)]
    pub layer_norm_eps: f64,

    /// Whether the model is an encoder/decoder.
    #[config(default = false)]
    pub is_encoder_decoder: bool,

    /// Input resolution.
    #[config(default = 384)]
    pub image_size: usize,

    /// Patch resolution.
    #[config(default = 16)]
    pub patch_size: usize,

    /// Input channels.
    #[config(default = 3)]
    pub num_channels: usize,

    /// Whether queries, keys and values carry a bias.
    #[config(default = true)]
    pub qkv_bias: bool,

    /// Backbone layers tapped for the neck.
    #[config(default = "vec![2, 5, 8, 11]")]
    pub out_indices: Vec<usize>,

    /// Readout token policy.
    #[config(default = "ReadoutType::Project")]
    pub readout_type: ReadoutType,

    /// Up/downsampling factors of the reassemble layers.
    #[config(default = "vec![4.0, 2.0, 1.0, 0.5]")]
    pub reassemble_factors: Vec<f64>,

    /// Channels of the reassembled feature maps.
    #[config(default = "vec![96, 192, 384, 768]")]
    pub neck_hidden_sizes: Vec<usize>,

    /// Channels before fusion.
    #[config(default = 256)]
    pub fusion_hidden_size: usize,

    /// Index of the features used by the heads; negative counts from the end.
    #[config(default = "-1")]
    pub in_index: i64,

    /// Batch norm in the pre-activate residual units of the fusion blocks.
    #[config(default = false)]
    pub use_batch_norm_in_fusion_residual: bool,

    /// Auxiliary head during training.
    #[config(default = true)]
    pub use_auxiliary_head: bool,

    /// Auxiliary head loss weight.
    #[config(default = 0.4)]
    pub auxiliary_loss_weight: f64,

    /// Label ignored by the semantic segmentation loss.
    #[config(default = 255)]
    pub semantic_loss_ignore_index: i64,

    /// Semantic classification head dropout.
    #[config(default = 0.1)]
    pub semantic_classifier_dropout: f64,
}

impl Default for DptConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PretrainedConfig for DptConfig {
    const MODEL_TYPE: &'static str = DPT_MODEL_TYPE;

    fn check_dict(dict: &ConfigDict) -> Result<(), ConfigError> {
        match dict.get("readout_type") {
            None => Ok(()),
            Some(serde_json::Value::String(s)) => s.parse::<ReadoutType>().map(|_| ()),
            Some(other) => Err(ConfigError::UnsupportedReadoutType(other.to_string())),
        }
    }
}

impl DptConfig {
    /// Override the readout type from its name.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnsupportedReadoutType`] for names outside
    /// ``["ignore", "add", "project"]``.
    pub fn try_with_readout_type(
        self,
        readout_type: &str,
    ) -> Result<Self, ConfigError> {
        Ok(self.with_readout_type(readout_type.parse()?))
    }

    /// The patch grid, ``[image_size / patch_size; 2]``.
    ///
    /// # Panics
    ///
    /// If the image size is not a multiple of the patch size.
    pub fn patch_grid(&self) -> [usize; 2] {
        unpack_shape_contract!(
            [
                "height" = "grid_height" * "patch",
                "width" = "grid_width" * "patch"
            ],
            &[self.image_size, self.image_size],
            &["grid_height", "grid_width"],
            &[("patch", self.patch_size)]
        )
    }

    /// Number of patch tokens, excluding the readout token.
    pub fn num_patches(&self) -> usize {
        let [h, w] = self.patch_grid();
        h * w
    }

    /// Dimension of a single attention head.
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_defaults() {
        let config = DptConfig::new();
        assert_eq!(config.hidden_size, 768);
        assert_eq!(config.num_hidden_layers, 12);
        assert_eq!(config.num_attention_heads, 12);
        assert_eq!(config.intermediate_size, 3072);
        assert_eq!(config.hidden_act, "gelu");
        assert_eq!(config.layer_norm_eps, 1e-12);
        assert_eq!(config.image_size, 384);
        assert_eq!(config.out_indices, vec![2, 5, 8, 11]);
        assert_eq!(config.readout_type, ReadoutType::Project);
        assert_eq!(config.reassemble_factors, vec![4.0, 2.0, 1.0, 0.5]);
        assert_eq!(config.neck_hidden_sizes, vec![96, 192, 384, 768]);
        assert_eq!(config.in_index, -1);
        assert!(config.use_auxiliary_head);
        assert_eq!(config.semantic_loss_ignore_index, 255);

        assert_eq!(config.patch_grid(), [24, 24]);
        assert_eq!(config.num_patches(), 576);
        assert_eq!(config.head_dim(), 64);
    }

    #[test]
    fn test_list_defaults_are_not_shared() {
        let mut a = DptConfig::new();
        a.out_indices.push(42);

        let b = DptConfig::new();
        assert_eq!(b.out_indices, vec![2, 5, 8, 11]);
    }

    #[test]
    fn test_readout_types() {
        for name in ["ignore", "add", "project"] {
            let config = DptConfig::new().try_with_readout_type(name).unwrap();
            assert_eq!(config.readout_type.as_str(), name);
        }

        for name in ["", "Project", "concat", "cls"] {
            let err = DptConfig::new().try_with_readout_type(name).unwrap_err();
            assert!(
                matches!(err, ConfigError::UnsupportedReadoutType(ref s) if s == name),
                "{err:?}"
            );
        }
    }

    #[test]
    fn test_from_dict_rejects_readout_type() {
        let err = DptConfig::from_json_str(r#"{"readout_type": "concat"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedReadoutType(_)), "{err:?}");

        let err = DptConfig::from_json_str(r#"{"readout_type": 3}"#).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedReadoutType(_)), "{err:?}");
    }

    #[test]
    fn test_from_json_partial() {
        let config = DptConfig::from_json_str(indoc! {r#"
            {
                "model_type": "dpt",
                "hidden_size": 1024,
                "num_hidden_layers": 24,
                "readout_type": "add",
                "out_indices": [5, 11, 17, 23]
            }
        "#})
        .unwrap();

        assert_eq!(config.hidden_size, 1024);
        assert_eq!(config.num_hidden_layers, 24);
        assert_eq!(config.readout_type, ReadoutType::Add);
        assert_eq!(config.out_indices, vec![5, 11, 17, 23]);
        assert_eq!(config.fusion_hidden_size, 256);
    }

    #[test]
    fn test_from_json_model_type_mismatch() {
        let err = DptConfig::from_json_str(r#"{"model_type": "oneformer"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ModelTypeMismatch { .. }), "{err:?}");
    }

    #[test]
    fn test_to_dict() {
        let config = DptConfig::new().with_readout_type(ReadoutType::Ignore);
        let dict = config.to_dict().unwrap();

        assert_eq!(dict["model_type"], "dpt");
        assert_eq!(dict["readout_type"], "ignore");
        assert_eq!(dict["neck_hidden_sizes"], serde_json::json!([96, 192, 384, 768]));

        let reloaded = DptConfig::from_dict(dict).unwrap();
        assert_eq!(reloaded.readout_type, ReadoutType::Ignore);
        assert_eq!(reloaded.reassemble_factors, config.reassemble_factors);
    }

    #[test]
    #[should_panic]
    fn test_patch_grid_panic() {
        DptConfig::new().with_image_size(385).patch_grid();
    }
}
