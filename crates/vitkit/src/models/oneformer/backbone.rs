//! # `OneFormer` Backbones
//!
//! The composite model accepts a closed set of backbone families,
//! discriminated by the backbone record's own `model_type`.

use crate::models::pretrained::{
    ConfigDict, ConfigError, MODEL_TYPE_KEY, into_dict, merge_over_defaults,
};
use burn::config::Config;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Backbone families accepted by `OneFormer`.
pub const BACKBONES_SUPPORTED: [&str; 3] = ["swin", "dinat", "maskformer-swin"];

/// Swin Transformer backbone config.
///
/// Shared by the ``swin`` and ``maskformer-swin`` families.
#[derive(Config, Debug)]
pub struct SwinBackboneConfig {
    /// Input resolution.
    #[config(default = 224)]
    pub image_size: usize,

    /// Patch resolution.
    #[config(default = 4)]
    pub patch_size: usize,

    /// Input channels.
    #[config(default = 3)]
    pub num_channels: usize,

    /// Patch embedding dimension.
    #[config(default = 96)]
    pub embed_dim: usize,

    /// Blocks per stage.
    #[config(default = "vec![2, 2, 6, 2]")]
    pub depths: Vec<usize>,

    /// Attention heads per stage.
    #[config(default = "vec![3, 6, 12, 24]")]
    pub num_heads: Vec<usize>,

    /// Attention window size.
    #[config(default = 7)]
    pub window_size: usize,

    /// MLP hidden size, as a ratio of the embedding size.
    #[config(default = 4.0)]
    pub mlp_ratio: f64,

    /// Whether queries, keys and values carry a bias.
    #[config(default = true)]
    pub qkv_bias: bool,

    /// Dropout for fully connected layers.
    #[config(default = 0.0)]
    pub hidden_dropout_prob: f64,

    /// Dropout for attention probabilities.
    #[config(default = 0.0)]
    pub attention_probs_dropout_prob: f64,

    /// Stochastic depth rate.
    #[config(default = 0.1)]
    pub drop_path_rate: f64,

    /// Activation name.
    #[config(default = "\"gelu\".to_string()")]
    pub hidden_act: String,

    /// Whether to add absolute position embeddings to the patch embeddings.
    #[config(default = false)]
    pub use_absolute_embeddings: bool,

    /// Stddev of the truncated normal weight initializer.
    #[config(default = 0.02)]
    pub initializer_range: f64,

    /// Layer norm epsilon.
    #[config(default = 1e-5)]
    pub layer_norm_eps: f64,

    /// Stages whose features are exposed.
    #[config(default = "default_out_features()")]
    pub out_features: Vec<String>,
}

/// Dilated Neighborhood Attention Transformer backbone config.
#[derive(Config, Debug)]
pub struct DinatBackboneConfig {
    /// Patch resolution.
    #[config(default = 4)]
    pub patch_size: usize,

    /// Input channels.
    #[config(default = 3)]
    pub num_channels: usize,

    /// Patch embedding dimension.
    #[config(default = 64)]
    pub embed_dim: usize,

    /// Blocks per stage.
    #[config(default = "vec![3, 4, 6, 5]")]
    pub depths: Vec<usize>,

    /// Attention heads per stage.
    #[config(default = "vec![2, 4, 8, 16]")]
    pub num_heads: Vec<usize>,

    /// Neighborhood size.
    #[config(default = 7)]
    pub kernel_size: usize,

    /// Per-block dilation, per stage.
    #[config(
        default = "vec![vec![1, 8, 1], vec![1, 4, 1, 4], vec![1, 2, 1, 2, 1, 2], vec![1, 1, 1, 1, 1]]"
    )]
    pub dilations: Vec<Vec<usize>>,

    /// MLP hidden size, as a ratio of the embedding size.
    #[config(default = 3.0)]
    pub mlp_ratio: f64,

    /// Whether queries, keys and values carry a bias.
    #[config(default = true)]
    pub qkv_bias: bool,

    /// Dropout for fully connected layers.
    #[config(default = 0.0)]
    pub hidden_dropout_prob: f64,

    /// Dropout for attention probabilities.
    #[config(default = 0.0)]
    pub attention_probs_dropout_prob: f64,

    /// Stochastic depth rate.
    #[config(default = 0.1)]
    pub drop_path_rate: f64,

    /// Activation name.
    #[config(default = "\"gelu\".to_string()")]
    pub hidden_act: String,

    /// Stddev of the truncated normal weight initializer.
    #[config(default = 0.02)]
    pub initializer_range: f64,

    /// Layer norm epsilon.
    #[config(default = 1e-5)]
    pub layer_norm_eps: f64,

    /// Initial layer scale; ``0.0`` disables layer scale.
    #[config(default = 0.0)]
    pub layer_scale_init_value: f64,

    /// Stages whose features are exposed.
    #[config(default = "default_out_features()")]
    pub out_features: Vec<String>,
}

fn default_out_features() -> Vec<String> {
    ["stage1", "stage2", "stage3", "stage4"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// A backbone config, tagged by family.
///
/// Serializes as the family record with its `model_type` stamped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model_type")]
pub enum BackboneConfig {
    /// ``swin``
    #[serde(rename = "swin")]
    Swin(SwinBackboneConfig),

    /// ``dinat``
    #[serde(rename = "dinat")]
    Dinat(DinatBackboneConfig),

    /// ``maskformer-swin``
    #[serde(rename = "maskformer-swin")]
    MaskFormerSwin(SwinBackboneConfig),
}

impl Default for BackboneConfig {
    /// The `swin-tiny-patch4-window7-224` backbone.
    fn default() -> Self {
        BackboneConfig::MaskFormerSwin(
            SwinBackboneConfig::new()
                .with_image_size(224)
                .with_num_channels(3)
                .with_patch_size(4)
                .with_embed_dim(96)
                .with_depths(vec![2, 2, 6, 2])
                .with_num_heads(vec![3, 6, 12, 24])
                .with_window_size(7)
                .with_drop_path_rate(0.3)
                .with_out_features(default_out_features()),
        )
    }
}

impl BackboneConfig {
    /// The family discriminator.
    pub fn model_type(&self) -> &'static str {
        match self {
            BackboneConfig::Swin(_) => "swin",
            BackboneConfig::Dinat(_) => "dinat",
            BackboneConfig::MaskFormerSwin(_) => "maskformer-swin",
        }
    }

    /// Parse a backbone dict, dispatching on its `model_type`.
    ///
    /// # Errors
    ///
    /// * [`ConfigError::MissingBackboneType`] if there is no `model_type`.
    /// * [`ConfigError::UnsupportedBackbone`] if the family is not in [`BACKBONES_SUPPORTED`].
    pub fn from_dict(dict: ConfigDict) -> Result<Self, ConfigError> {
        let model_type = match dict.get(MODEL_TYPE_KEY) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => return Err(ConfigError::MissingBackboneType),
            Some(other) => other.to_string(),
        };
        if !BACKBONES_SUPPORTED.contains(&model_type.as_str()) {
            return Err(ConfigError::UnsupportedBackbone {
                found: model_type,
                supported: BACKBONES_SUPPORTED.join(","),
            });
        }
        let defaults = match model_type.as_str() {
            "dinat" => BackboneConfig::Dinat(DinatBackboneConfig::new()),
            "swin" => BackboneConfig::Swin(SwinBackboneConfig::new()),
            _ => BackboneConfig::MaskFormerSwin(SwinBackboneConfig::new()),
        };
        let merged = merge_over_defaults("backbone_config", &defaults, dict)?;
        Ok(serde_json::from_value(merged)?)
    }

    /// The nested snapshot of the backbone record, including its `model_type`.
    pub fn to_dict(&self) -> Result<ConfigDict, ConfigError> {
        into_dict("backbone_config", serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dict(value: Value) -> ConfigDict {
        into_dict("test", value).unwrap()
    }

    #[test]
    fn test_default_backbone() {
        let backbone = BackboneConfig::default();
        assert_eq!(backbone.model_type(), "maskformer-swin");

        match &backbone {
            BackboneConfig::MaskFormerSwin(swin) => {
                assert_eq!(swin.embed_dim, 96);
                assert_eq!(swin.depths, vec![2, 2, 6, 2]);
                assert_eq!(swin.num_heads, vec![3, 6, 12, 24]);
                assert_eq!(swin.drop_path_rate, 0.3);
                assert_eq!(swin.out_features.len(), 4);
            }
            other => panic!("unexpected backbone: {other:?}"),
        }
    }

    #[test]
    fn test_supported_families() {
        for family in BACKBONES_SUPPORTED {
            let backbone = BackboneConfig::from_dict(dict(json!({ "model_type": family }))).unwrap();
            assert_eq!(backbone.model_type(), family);

            let snapshot = backbone.to_dict().unwrap();
            assert_eq!(snapshot["model_type"], family);
        }
    }

    #[test]
    fn test_unsupported_family() {
        let err = BackboneConfig::from_dict(dict(json!({ "model_type": "resnet" }))).unwrap_err();
        match err {
            ConfigError::UnsupportedBackbone { found, supported } => {
                assert_eq!(found, "resnet");
                assert_eq!(supported, "swin,dinat,maskformer-swin");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = BackboneConfig::from_dict(dict(json!({ "embed_dim": 96 }))).unwrap_err();
        assert!(matches!(err, ConfigError::MissingBackboneType), "{err:?}");
    }

    #[test]
    fn test_dinat_fields() {
        let backbone = BackboneConfig::from_dict(dict(json!({
            "model_type": "dinat",
            "embed_dim": 128,
            "kernel_size": 11,
        })))
        .unwrap();

        match backbone {
            BackboneConfig::Dinat(dinat) => {
                assert_eq!(dinat.embed_dim, 128);
                assert_eq!(dinat.kernel_size, 11);
                assert_eq!(dinat.depths, vec![3, 4, 6, 5]);
                for (depth, dilation) in dinat.depths.iter().zip(&dinat.dilations) {
                    assert_eq!(*depth, dilation.len());
                }
            }
            other => panic!("unexpected backbone: {other:?}"),
        }
    }
}
