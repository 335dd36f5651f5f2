//! # `OneFormer` Config
//!
//! The composite config owns four sub-records; the top-level width, head and
//! layer counts and the two initializer scales are read through from them.

use crate::models::oneformer::backbone::BackboneConfig;
use crate::models::pretrained::{
    ConfigDict, ConfigError, MODEL_TYPE_KEY, PretrainedConfig, into_dict, merge_over_defaults,
};
use burn::config::Config;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// [`OneFormerConfig`] model family discriminator.
pub const ONEFORMER_MODEL_TYPE: &str = "oneformer";

/// General settings: loss weights, class counts, sampling.
#[derive(Config, Debug)]
pub struct OneFormerGeneralConfig {
    /// Label ignored by the losses.
    #[config(default = 255)]
    pub ignore_value: i64,

    /// Number of classes.
    #[config(default = 150)]
    pub num_classes: usize,

    /// Number of object queries.
    #[config(default = 150)]
    pub num_queries: usize,

    /// Weight of the no-object class.
    #[config(default = 0.1)]
    pub no_object_weight: f64,

    /// Supervise every decoder layer.
    #[config(default = true)]
    pub deep_supervision: bool,

    /// Classification loss weight.
    #[config(default = 2.0)]
    pub class_weight: f64,

    /// Mask loss weight.
    #[config(default = 5.0)]
    pub mask_weight: f64,

    /// Dice loss weight.
    #[config(default = 5.0)]
    pub dice_weight: f64,

    /// Query-text contrastive loss weight.
    #[config(default = 0.5)]
    pub contrastive_weight: f64,

    /// Contrastive loss temperature.
    #[config(default = 0.07)]
    pub contrastive_temperature: f64,

    /// Points sampled per mask during training.
    #[config(default = 12544)]
    pub train_num_points: usize,

    /// Oversampling ratio for point sampling.
    #[config(default = 3.0)]
    pub oversample_ratio: f64,

    /// Ratio of points sampled by uncertainty.
    #[config(default = 0.75)]
    pub importance_sample_ratio: f64,

    /// Stddev of the normal weight initializer.
    #[config(default = 0.02)]
    pub init_std: f64,

    /// Gain of the xavier weight initializer.
    #[config(default = 1.0)]
    pub init_xavier_std: f64,

    /// Layer norm epsilon.
    #[config(default = 1e-5)]
    pub layer_norm_eps: f64,

    /// Training mode.
    #[config(default = false)]
    pub is_train: bool,

    /// Auxiliary losses on intermediate decoder layers.
    #[config(default = true)]
    pub use_auxiliary_loss: bool,

    /// Return auxiliary logits.
    #[config(default = true)]
    pub output_auxiliary_logits: bool,

    /// Backbone feature strides.
    #[config(default = "vec![4, 8, 16, 32]")]
    pub strides: Vec<usize>,
}

/// Text mapper and task encoder settings.
#[derive(Config, Debug)]
pub struct OneFormerTextEncoderConfig {
    /// Task token sequence length.
    #[config(default = 77)]
    pub task_seq_len: usize,

    /// Maximum text sequence length.
    #[config(default = 77)]
    pub max_seq_len: usize,

    /// Text encoder width.
    #[config(default = 256)]
    pub text_encoder_width: usize,

    /// Text encoder context length.
    #[config(default = 77)]
    pub text_encoder_context_length: usize,

    /// Text encoder layers.
    #[config(default = 6)]
    pub text_encoder_num_layers: usize,

    /// Text encoder vocabulary size.
    #[config(default = 49408)]
    pub text_encoder_vocab_size: usize,

    /// Linear layers in the text projection MLP.
    #[config(default = 2)]
    pub text_encoder_proj_layers: usize,

    /// Learnable context tokens.
    #[config(default = 16)]
    pub text_encoder_n_ctx: usize,
}

/// Pixel decoder and transformer decoder settings.
#[derive(Config, Debug)]
pub struct OneFormerDecoderConfig {
    /// Pixel decoder channels.
    #[config(default = 256)]
    pub conv_dim: usize,

    /// Mask embedding channels.
    #[config(default = 256)]
    pub mask_dim: usize,

    /// Transformer decoder width.
    #[config(default = 256)]
    pub hidden_dim: usize,

    /// Pixel decoder encoder feed-forward width.
    #[config(default = 1024)]
    pub encoder_feedforward_dim: usize,

    /// Pixel decoder norm name.
    #[config(default = "\"GN\".to_string()")]
    pub norm: String,

    /// Pixel decoder encoder layers.
    #[config(default = 6)]
    pub encoder_layers: usize,

    /// Transformer decoder layers.
    #[config(default = 10)]
    pub decoder_layers: usize,

    /// Task-conditioned norm.
    #[config(default = true)]
    pub use_task_norm: bool,

    /// Transformer decoder attention heads.
    #[config(default = 8)]
    pub num_heads: usize,

    /// Transformer decoder dropout.
    #[config(default = 0.1)]
    pub dropout: f64,

    /// Transformer decoder feed-forward width.
    #[config(default = 2048)]
    pub dim_feedforward: usize,

    /// Pre-norm transformer decoder layers.
    #[config(default = false)]
    pub pre_norm: bool,

    /// Always project decoder inputs.
    #[config(default = false)]
    pub enforce_input_proj: bool,

    /// Query transformer layers.
    #[config(default = 2)]
    pub query_dec_layers: usize,

    /// Output stride of the pixel decoder.
    #[config(default = 4)]
    pub common_stride: usize,
}

impl Default for OneFormerGeneralConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for OneFormerTextEncoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for OneFormerDecoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// `OneFormer` Config.
///
/// The defaults describe ``shi-labs/oneformer_ade20k_swin_tiny``.
///
/// The record is immutable; the ``with_*`` builders return a new record,
/// and the derived accessors always read through to the owning sub-record.
#[derive(Debug, Clone)]
pub struct OneFormerConfig {
    general_config: OneFormerGeneralConfig,
    backbone_config: BackboneConfig,
    text_encoder_config: OneFormerTextEncoderConfig,
    decoder_config: OneFormerDecoderConfig,
    output_attentions: bool,
    output_hidden_states: bool,
    return_dict: bool,
}

impl Default for OneFormerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl OneFormerConfig {
    /// A config with every sub-record at its default.
    pub fn new() -> Self {
        Self::from_parts(None, None, None, None)
    }

    /// Build from optional sub-records; missing sub-records take their defaults.
    pub fn from_parts(
        general_config: Option<OneFormerGeneralConfig>,
        backbone_config: Option<BackboneConfig>,
        text_encoder_config: Option<OneFormerTextEncoderConfig>,
        decoder_config: Option<OneFormerDecoderConfig>,
    ) -> Self {
        Self {
            general_config: general_config.unwrap_or_default(),
            backbone_config: backbone_config.unwrap_or_default(),
            text_encoder_config: text_encoder_config.unwrap_or_default(),
            decoder_config: decoder_config.unwrap_or_default(),
            output_attentions: true,
            output_hidden_states: true,
            return_dict: true,
        }
    }

    /// Replace the general settings.
    pub fn with_general_config(
        self,
        general_config: OneFormerGeneralConfig,
    ) -> Self {
        Self {
            general_config,
            ..self
        }
    }

    /// Replace the backbone.
    pub fn with_backbone_config(
        self,
        backbone_config: BackboneConfig,
    ) -> Self {
        Self {
            backbone_config,
            ..self
        }
    }

    /// Replace the backbone from a raw dict.
    ///
    /// # Errors
    ///
    /// If the dict's `model_type` is missing or not a supported family.
    pub fn try_with_backbone_dict(
        self,
        backbone: ConfigDict,
    ) -> Result<Self, ConfigError> {
        Ok(self.with_backbone_config(BackboneConfig::from_dict(backbone)?))
    }

    /// Replace the text encoder settings.
    pub fn with_text_encoder_config(
        self,
        text_encoder_config: OneFormerTextEncoderConfig,
    ) -> Self {
        Self {
            text_encoder_config,
            ..self
        }
    }

    /// Replace the decoder settings.
    pub fn with_decoder_config(
        self,
        decoder_config: OneFormerDecoderConfig,
    ) -> Self {
        Self {
            decoder_config,
            ..self
        }
    }

    /// Set whether attention weights are returned.
    pub fn with_output_attentions(
        self,
        output_attentions: bool,
    ) -> Self {
        Self {
            output_attentions,
            ..self
        }
    }

    /// Set whether intermediate predictions are returned.
    pub fn with_output_hidden_states(
        self,
        output_hidden_states: bool,
    ) -> Self {
        Self {
            output_hidden_states,
            ..self
        }
    }

    /// Set whether outputs are returned as records rather than tuples.
    pub fn with_return_dict(
        self,
        return_dict: bool,
    ) -> Self {
        Self {
            return_dict,
            ..self
        }
    }

    /// General settings.
    pub fn general_config(&self) -> &OneFormerGeneralConfig {
        &self.general_config
    }

    /// Backbone settings.
    pub fn backbone_config(&self) -> &BackboneConfig {
        &self.backbone_config
    }

    /// Text encoder settings.
    pub fn text_encoder_config(&self) -> &OneFormerTextEncoderConfig {
        &self.text_encoder_config
    }

    /// Decoder settings.
    pub fn decoder_config(&self) -> &OneFormerDecoderConfig {
        &self.decoder_config
    }

    /// Whether attention weights are returned.
    pub fn output_attentions(&self) -> bool {
        self.output_attentions
    }

    /// Whether intermediate predictions are returned.
    pub fn output_hidden_states(&self) -> bool {
        self.output_hidden_states
    }

    /// Whether outputs are returned as records.
    pub fn return_dict(&self) -> bool {
        self.return_dict
    }

    /// ``decoder_config.hidden_dim``
    pub fn hidden_size(&self) -> usize {
        self.decoder_config.hidden_dim
    }

    /// ``decoder_config.num_heads``
    pub fn num_attention_heads(&self) -> usize {
        self.decoder_config.num_heads
    }

    /// ``decoder_config.decoder_layers``
    pub fn num_hidden_layers(&self) -> usize {
        self.decoder_config.decoder_layers
    }

    /// ``general_config.init_std``
    pub fn init_std(&self) -> f64 {
        self.general_config.init_std
    }

    /// ``general_config.init_xavier_std``
    pub fn init_xavier_std(&self) -> f64 {
        self.general_config.init_xavier_std
    }
}

/// Read an optional sub-record; absent or `null` means "use the default".
///
/// Fields omitted from a present sub-record take the sub-record defaults.
fn sub_record<T: Serialize + serde::de::DeserializeOwned + Default>(
    dict: &mut ConfigDict,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match dict.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let merged = merge_over_defaults(key, &T::default(), into_dict(key, value)?)?;
            Ok(Some(serde_json::from_value(merged)?))
        }
    }
}

fn flag(
    dict: &ConfigDict,
    key: &str,
) -> Result<bool, ConfigError> {
    match dict.get(key) {
        None | Some(Value::Null) => Ok(true),
        Some(value) => Ok(serde_json::from_value(value.clone())?),
    }
}

impl PretrainedConfig for OneFormerConfig {
    const MODEL_TYPE: &'static str = ONEFORMER_MODEL_TYPE;

    fn to_dict(&self) -> Result<ConfigDict, ConfigError> {
        let mut dict = ConfigDict::new();
        dict.insert(
            "general_config".to_string(),
            serde_json::to_value(&self.general_config)?,
        );
        dict.insert(
            "backbone_config".to_string(),
            Value::Object(self.backbone_config.to_dict()?),
        );
        dict.insert(
            "text_encoder_config".to_string(),
            serde_json::to_value(&self.text_encoder_config)?,
        );
        dict.insert(
            "decoder_config".to_string(),
            serde_json::to_value(&self.decoder_config)?,
        );

        dict.insert("output_attentions".to_string(), self.output_attentions.into());
        dict.insert(
            "output_hidden_states".to_string(),
            self.output_hidden_states.into(),
        );
        dict.insert("return_dict".to_string(), self.return_dict.into());

        dict.insert("hidden_size".to_string(), self.hidden_size().into());
        dict.insert(
            "num_attention_heads".to_string(),
            self.num_attention_heads().into(),
        );
        dict.insert(
            "num_hidden_layers".to_string(),
            self.num_hidden_layers().into(),
        );
        dict.insert("init_std".to_string(), self.init_std().into());
        dict.insert("init_xavier_std".to_string(), self.init_xavier_std().into());

        dict.insert(MODEL_TYPE_KEY.to_string(), Self::MODEL_TYPE.into());
        Ok(dict)
    }

    /// Parse a snapshot.
    ///
    /// Derived fields present in the dict are ignored; they are always
    /// recomputed from the sub-records.
    fn from_dict(mut dict: ConfigDict) -> Result<Self, ConfigError> {
        match dict.remove(MODEL_TYPE_KEY) {
            None | Some(Value::Null) => (),
            Some(Value::String(s)) if s == ONEFORMER_MODEL_TYPE => (),
            Some(found) => {
                return Err(ConfigError::ModelTypeMismatch {
                    expected: ONEFORMER_MODEL_TYPE.to_string(),
                    found: found.to_string(),
                });
            }
        }

        let backbone_config = match dict.remove("backbone_config") {
            None | Some(Value::Null) => None,
            Some(value) => Some(BackboneConfig::from_dict(into_dict(
                "backbone_config",
                value,
            )?)?),
        };

        let config = Self::from_parts(
            sub_record(&mut dict, "general_config")?,
            backbone_config,
            sub_record(&mut dict, "text_encoder_config")?,
            sub_record(&mut dict, "decoder_config")?,
        )
        .with_output_attentions(flag(&dict, "output_attentions")?)
        .with_output_hidden_states(flag(&dict, "output_hidden_states")?)
        .with_return_dict(flag(&dict, "return_dict")?);

        Ok(config)
    }
}

impl Serialize for OneFormerConfig {
    fn serialize<S: Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        self.to_dict()
            .map_err(S::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for OneFormerConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let dict = ConfigDict::deserialize(deserializer)?;
        Self::from_dict(dict).map_err(D::Error::custom)
    }
}

impl Config for OneFormerConfig {}

impl Display for OneFormerConfig {
    fn fmt(
        &self,
        f: &mut Formatter<'_>,
    ) -> std::fmt::Result {
        let json = self.to_json_string().map_err(|_| std::fmt::Error)?;
        f.write_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::oneformer::backbone::{BACKBONES_SUPPORTED, SwinBackboneConfig};
    use indoc::indoc;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = OneFormerConfig::new();

        let general = config.general_config();
        assert_eq!(general.num_classes, 150);
        assert_eq!(general.train_num_points, 12544);
        assert_eq!(general.strides, vec![4, 8, 16, 32]);

        let text = config.text_encoder_config();
        assert_eq!(text.text_encoder_vocab_size, 49408);
        assert_eq!(text.text_encoder_n_ctx, 16);

        let decoder = config.decoder_config();
        assert_eq!(decoder.norm, "GN");
        assert_eq!(decoder.dim_feedforward, 2048);

        assert_eq!(config.backbone_config().model_type(), "maskformer-swin");

        assert_eq!(config.hidden_size(), 256);
        assert_eq!(config.num_attention_heads(), 8);
        assert_eq!(config.num_hidden_layers(), 10);
        assert_eq!(config.init_std(), 0.02);
        assert_eq!(config.init_xavier_std(), 1.0);

        assert!(config.output_attentions());
        assert!(config.output_hidden_states());
        assert!(config.return_dict());
    }

    #[test]
    fn test_derived_fields_follow_sub_records() {
        for (hidden_dim, num_heads, layers) in [(128, 4, 3), (512, 16, 9), (256, 1, 1)] {
            let config = OneFormerConfig::new().with_decoder_config(
                OneFormerDecoderConfig::new()
                    .with_hidden_dim(hidden_dim)
                    .with_num_heads(num_heads)
                    .with_decoder_layers(layers),
            );
            assert_eq!(config.hidden_size(), hidden_dim);
            assert_eq!(config.num_attention_heads(), num_heads);
            assert_eq!(config.num_hidden_layers(), layers);

            let dict = config.to_dict().unwrap();
            assert_eq!(dict["num_attention_heads"], num_heads);
            assert_eq!(dict["decoder_config"]["num_heads"], num_heads);
        }

        let config = OneFormerConfig::new()
            .with_general_config(OneFormerGeneralConfig::new().with_init_std(0.5));
        assert_eq!(config.init_std(), 0.5);
    }

    #[test]
    fn test_to_dict_nests_backbone() {
        let dict = OneFormerConfig::new().to_dict().unwrap();

        assert_eq!(dict["model_type"], "oneformer");

        let backbone = dict["backbone_config"].as_object().unwrap();
        assert_eq!(backbone["model_type"], "maskformer-swin");
        assert_eq!(backbone["depths"], json!([2, 2, 6, 2]));
        assert_eq!(backbone["drop_path_rate"], json!(0.3));

        assert!(dict["general_config"].is_object());
        assert!(dict["text_encoder_config"].is_object());
        assert!(dict["decoder_config"].is_object());
        assert_eq!(dict["hidden_size"], 256);
    }

    #[test]
    fn test_model_type_is_stamped() {
        let config = OneFormerConfig::new()
            .with_backbone_config(BackboneConfig::Swin(SwinBackboneConfig::new()))
            .with_return_dict(false);
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["model_type"], "oneformer");
        assert_eq!(value["backbone_config"]["model_type"], "swin");
        assert_eq!(value["return_dict"], false);
    }

    #[test]
    fn test_backbone_families() {
        for family in BACKBONES_SUPPORTED {
            let config = OneFormerConfig::from_dict(
                into_dict("test", json!({ "backbone_config": { "model_type": family } })).unwrap(),
            )
            .unwrap();
            assert_eq!(config.backbone_config().model_type(), family);
        }

        let err = OneFormerConfig::from_json_str(r#"{"backbone_config": {"model_type": "vit"}}"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedBackbone { .. }), "{err:?}");

        let err = OneFormerConfig::new()
            .try_with_backbone_dict(into_dict("test", json!({ "model_type": "convnext" })).unwrap())
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedBackbone { .. }), "{err:?}");
    }

    #[test]
    fn test_from_json_ignores_stale_derived_fields() {
        let config = OneFormerConfig::from_json_str(indoc! {r#"
            {
                "model_type": "oneformer",
                "hidden_size": 9999,
                "num_attention_heads": 9999,
                "decoder_config": { "hidden_dim": 512, "num_heads": 16 },
                "output_attentions": false
            }
        "#})
        .unwrap();

        assert_eq!(config.hidden_size(), 512);
        assert_eq!(config.num_attention_heads(), 16);
        assert_eq!(config.num_hidden_layers(), 10);
        assert!(!config.output_attentions());
        assert!(config.return_dict());
    }

    #[test]
    fn test_model_type_mismatch() {
        let err = OneFormerConfig::from_json_str(r#"{"model_type": "dpt"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ModelTypeMismatch { .. }), "{err:?}");
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = OneFormerConfig::new().with_decoder_config(
            OneFormerDecoderConfig::new()
                .with_hidden_dim(384)
                .with_num_heads(12),
        );
        config.save(&path).unwrap();

        let loaded = OneFormerConfig::load(&path).unwrap();
        assert_eq!(loaded.hidden_size(), 384);
        assert_eq!(loaded.num_attention_heads(), 12);
        assert_eq!(
            loaded.backbone_config().model_type(),
            config.backbone_config().model_type()
        );

        let parsed = OneFormerConfig::from_json_file(&path).unwrap();
        assert_eq!(parsed.to_dict().unwrap(), config.to_dict().unwrap());
    }
}
