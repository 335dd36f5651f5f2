//! # `DPT` - Dense Prediction Transformer
//!
//! * [`dpt_config`] - the [`DptConfig`] record.
//! * [`prefabs`] - well-known `DPT` configs.

pub mod dpt_config;
pub mod prefabs;

pub use dpt_config::{DPT_MODEL_TYPE, DptConfig, ReadoutType};
pub use prefabs::PREFAB_DPT_MAP;
