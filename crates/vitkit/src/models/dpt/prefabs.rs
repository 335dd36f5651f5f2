//! # Well-Known `DPT` Configs

use crate::cache::prefabs::{StaticPreFabConfig, StaticPreFabMap};
use crate::models::dpt::DptConfig;

/// Well-known [`DptConfig`]s.
pub static PREFAB_DPT_MAP: StaticPreFabMap<DptConfig> = StaticPreFabMap {
    name: "dpt",
    description: "Well-Known DPT configs",

    items: &[
        &StaticPreFabConfig {
            name: "dpt-base",
            description: "DPT with a ViT-Base/16 backbone at 384x384",
            builder: DptConfig::new,
            archive_url: None,
        },
        &StaticPreFabConfig {
            name: "dpt-large",
            description: "DPT with a ViT-Large/16 backbone at 384x384",
            builder: || {
                DptConfig::new()
                    .with_hidden_size(1024)
                    .with_num_hidden_layers(24)
                    .with_num_attention_heads(16)
                    .with_intermediate_size(4096)
                    .with_out_indices(vec![5, 11, 17, 23])
                    .with_neck_hidden_sizes(vec![256, 512, 1024, 1024])
            },
            archive_url: Some("https://huggingface.co/Intel/dpt-large/resolve/main/config.json"),
        },
    ],
};
