#![warn(missing_docs)]
//!# vitkit - Vision Transformer Configs and Checkpoint Conversion
//!
//! ## Notable Components
//!
//! * [`cache`] - config archive cache, and prefab registries.
//! * [`convert`] - checkpoint conversion.
//!   * [`convert::checkpoint`] - source checkpoint readers.
//!   * [`convert::state_dict`] - converted state dicts and loaders.
//!   * [`convert::verify`] - numerical verification.
//!   * [`convert::pix2seq`] - `Pix2Seq` training checkpoint to encoder-decoder state dict.
//! * [`models`] - model family configs.
//!   * [`models::pretrained`] - the shared config contract.
//!   * [`models::dpt`] - `DPT`
//!   * [`models::oneformer`] - `OneFormer`

pub mod cache;
pub mod convert;
pub mod models;
