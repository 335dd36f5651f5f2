//! # Well-Known `OneFormer` Configs

use crate::cache::prefabs::{StaticPreFabConfig, StaticPreFabMap};
use crate::models::oneformer::OneFormerConfig;

/// Well-known [`OneFormerConfig`]s.
pub static PREFAB_ONEFORMER_MAP: StaticPreFabMap<OneFormerConfig> = StaticPreFabMap {
    name: "oneformer",
    description: "Well-Known OneFormer configs",

    items: &[&StaticPreFabConfig {
        name: "oneformer_ade20k_swin_tiny",
        description: "OneFormer, Swin-Tiny backbone, trained on ADE20k-150",
        builder: OneFormerConfig::new,
        archive_url: Some(
            "https://huggingface.co/shi-labs/oneformer_ade20k_swin_tiny/resolve/main/config.json",
        ),
    }],
};
