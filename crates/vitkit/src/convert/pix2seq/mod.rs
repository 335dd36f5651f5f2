//! # `Pix2Seq` Checkpoint Conversion
//!
//! * [`rename`] - parameter name and layout rewriting.
//! * [`driver`] - whole-checkpoint conversion and head tying.

pub mod driver;
pub mod rename;

pub use driver::{
    ConversionOutput, ConversionReport, ConvertOptions, ConvertedParam, convert_checkpoint,
    is_model_variable,
};
pub use rename::{RewrittenParam, rewrite_name, rewrite_param};
