//! # Config Archive Cache

use crate::cache::disk::DiskCacheConfig;
use std::path::PathBuf;

const X25: crc::Crc<u16> = crc::Crc::<u16>::new(&crc::CRC_16_IBM_SDLC);

/// Build a cache key (bare cache file name) from a name and URL.
///
/// The key is ``{name}-{url crc hash}-{url basename}``.
pub fn url_to_cache_key(
    name: Option<&str>,
    url: &str,
) -> String {
    let hash = X25.checksum(url.as_bytes()).to_string();
    let base_name = url.rsplit_once('/').map_or(url, |(_, base)| base);
    match name {
        Some(n) => format!("{}-{}-{}", n, hash, base_name),
        None => format!("{}-{}", hash, base_name),
    }
}

/// Get the cache resource key for a config archive.
pub fn config_archive_resource_key(cache_key: &str) -> Vec<String> {
    vec!["configs".to_string(), cache_key.to_string()]
}

/// Read-through cache a published `config.json`.
///
/// # Returns
///
/// The disk location of the cached archive.
pub fn fetch_config_archive(
    disk_cache: &DiskCacheConfig,
    name: &str,
    url: &str,
) -> anyhow::Result<PathBuf> {
    let cache_key = url_to_cache_key(Some(name), url);
    let resource = config_archive_resource_key(&cache_key);
    disk_cache.fetch_resource(url, &resource)
}
