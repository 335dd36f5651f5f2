//! # Config Archive Caches
//!
//! * [`disk`] - the on-disk cache policy.
//! * [`archive`] - read-through caching of published `config.json` files.
//! * [`prefabs`] - registries of well-known configs.

pub mod archive;
pub mod disk;
pub mod prefabs;
