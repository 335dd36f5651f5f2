//! # Checkpoint Conversion
//!
//! * [`checkpoint`] - source checkpoint readers.
//! * [`layout`] - reshape / permute ops between framework weight layouts.
//! * [`state_dict`] - converted parameter tables, and their loaders.
//! * [`verify`] - numerical checks against captured reference outputs.
//! * [`pix2seq`] - the `Pix2Seq` rewriter.

pub mod checkpoint;
pub mod error;
pub mod layout;
pub mod pix2seq;
pub mod state_dict;
pub mod verify;

pub use error::ConversionError;
