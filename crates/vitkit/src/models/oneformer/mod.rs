//! # `OneFormer` - Universal Image Segmentation
//!
//! * [`oneformer_config`] - the composite [`OneFormerConfig`] and its sub-records.
//! * [`backbone`] - the supported backbone families.
//! * [`prefabs`] - well-known `OneFormer` configs.

pub mod backbone;
pub mod oneformer_config;
pub mod prefabs;

pub use backbone::{
    BACKBONES_SUPPORTED, BackboneConfig, DinatBackboneConfig, SwinBackboneConfig,
};
pub use oneformer_config::{
    ONEFORMER_MODEL_TYPE, OneFormerConfig, OneFormerDecoderConfig, OneFormerGeneralConfig,
    OneFormerTextEncoderConfig,
};
pub use prefabs::PREFAB_ONEFORMER_MAP;
