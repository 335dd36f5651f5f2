//! # Model Family Configs
//!
//! * [`pretrained`] - the [`pretrained::PretrainedConfig`] trait shared by every family.
//! * [`dpt`] - `DPT`, the Dense Prediction Transformer.
//! * [`oneformer`] - `OneFormer`, universal image segmentation.

pub mod dpt;
pub mod oneformer;
pub mod pretrained;
