//! # Pretrained Config Contract
//!
//! Shared serialization and defaulting contract for model-family configs.
//!
//! Each family is a plain [`Config`] record; the family-specific validation
//! lives in that family's [`PretrainedConfig`] impl rather than in a shared
//! base type.

use burn::config::Config;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;

/// The key used to stamp a family discriminator into serialized configs.
pub const MODEL_TYPE_KEY: &str = "model_type";

/// A nested key/value snapshot of a config.
pub type ConfigDict = Map<String, Value>;

/// Errors raised while constructing or parsing a config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The DPT readout type is not one of the supported values.
    #[error("Readout_type must be one of ['ignore', 'add', 'project'], found '{0}'")]
    UnsupportedReadoutType(String),

    /// The backbone family is not supported by the composite model.
    #[error("Backbone {found} not supported, please use one of {supported}")]
    UnsupportedBackbone {
        /// The rejected backbone family.
        found: String,
        /// Comma separated list of supported families.
        supported: String,
    },

    /// A backbone dict was supplied without a `model_type`.
    #[error("backbone config has no `model_type`")]
    MissingBackboneType,

    /// A dict was stamped with another family's discriminator.
    #[error("model_type mismatch: expected '{expected}', found '{found}'")]
    ModelTypeMismatch {
        /// The family this config parses.
        expected: String,
        /// The discriminator found in the dict.
        found: String,
    },

    /// The value was not a key/value mapping.
    #[error("expected a JSON object for '{0}'")]
    NotADict(String),

    /// Malformed field values.
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    /// Config file io.
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
}

/// Family-level config contract.
///
/// Implementors get dict/JSON round trips for free; they override
/// [`PretrainedConfig::check_dict`] to validate enumerated fields before
/// deserialization, and may override [`PretrainedConfig::to_dict`] when the
/// snapshot is not a direct serialization of the record.
pub trait PretrainedConfig: Config + Default + Sized {
    /// The family discriminator stamped into every snapshot.
    const MODEL_TYPE: &'static str;

    /// Validate raw fields before they are deserialized.
    fn check_dict(_dict: &ConfigDict) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Serialize to a nested key/value snapshot, stamped with [`Self::MODEL_TYPE`].
    fn to_dict(&self) -> Result<ConfigDict, ConfigError> {
        let mut dict = into_dict(Self::MODEL_TYPE, serde_json::to_value(self)?)?;
        dict.insert(MODEL_TYPE_KEY.to_string(), Value::from(Self::MODEL_TYPE));
        Ok(dict)
    }

    /// Parse from a snapshot; omitted fields take their defaults.
    fn from_dict(mut dict: ConfigDict) -> Result<Self, ConfigError> {
        take_model_type::<Self>(&mut dict)?;
        Self::check_dict(&dict)?;
        let merged = merge_over_defaults(Self::MODEL_TYPE, &Self::default(), dict)?;
        Ok(serde_json::from_value(merged)?)
    }

    /// Pretty JSON form of [`PretrainedConfig::to_dict`].
    fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&Value::Object(self.to_dict()?))?)
    }

    /// Parse from a JSON document.
    fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_dict(into_dict(Self::MODEL_TYPE, value)?)
    }

    /// Parse from a JSON file, such as a hub `config.json`.
    fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

/// Unwrap a JSON object, or fail with [`ConfigError::NotADict`].
pub fn into_dict(
    label: &str,
    value: Value,
) -> Result<ConfigDict, ConfigError> {
    match value {
        Value::Object(dict) => Ok(dict),
        _ => Err(ConfigError::NotADict(label.to_string())),
    }
}

/// Overlay `dict` onto the snapshot of `defaults`.
///
/// The overlay is shallow: a present key replaces the default value whole.
/// The derived [`Config`] deserializer requires every field, so partial
/// dicts must be completed this way before they are deserialized.
pub fn merge_over_defaults<T: Serialize>(
    label: &str,
    defaults: &T,
    dict: ConfigDict,
) -> Result<Value, ConfigError> {
    let mut merged = into_dict(label, serde_json::to_value(defaults)?)?;
    merged.extend(dict);
    Ok(Value::Object(merged))
}

/// Remove the `model_type` key, checking it against the family discriminator.
fn take_model_type<C: PretrainedConfig>(dict: &mut ConfigDict) -> Result<(), ConfigError> {
    match dict.remove(MODEL_TYPE_KEY) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(found)) if found == C::MODEL_TYPE => Ok(()),
        Some(found) => Err(ConfigError::ModelTypeMismatch {
            expected: C::MODEL_TYPE.to_string(),
            found: match found {
                Value::String(s) => s,
                other => other.to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dpt::DptConfig;
    use serde_json::json;

    #[test]
    fn test_merge_over_defaults() {
        let dict = into_dict("test", json!({ "hidden_size": 1024, "out_indices": [1] })).unwrap();
        let merged = merge_over_defaults("test", &DptConfig::new(), dict).unwrap();

        assert_eq!(merged["hidden_size"], 1024);
        assert_eq!(merged["out_indices"], json!([1]));
        assert_eq!(merged["num_attention_heads"], 12);

        let config: DptConfig = serde_json::from_value(merged).unwrap();
        assert_eq!(config.hidden_size, 1024);
        assert_eq!(config.out_indices, vec![1]);
    }

    #[test]
    fn test_from_empty_dict() {
        let config = DptConfig::from_dict(ConfigDict::new()).unwrap();
        assert_eq!(config.hidden_size, DptConfig::new().hidden_size);
        assert_eq!(config.to_dict().unwrap(), DptConfig::new().to_dict().unwrap());
    }
}
