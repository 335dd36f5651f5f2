//! # Disk Cache Policy

use anyhow::{Context, bail};
use burn::config::Config;
use burn::data::network::downloader;
use std::fs::{File, remove_file};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Disk cache policy.
///
/// Resources live under ``~/.cache/{root_cache_key}``.
#[derive(Config, Debug)]
pub struct DiskCacheConfig {
    /// Key for the root cache directory.
    #[config(default = "\"vitkit\".to_string()")]
    pub root_cache_key: String,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DiskCacheConfig {
    /// Fetch the base cache directory.
    ///
    /// If the cache directory does not exist, does not create it.
    pub fn base_cache_dir(&self) -> anyhow::Result<PathBuf> {
        let home = dirs::home_dir().context("Should be able to get home directory")?;
        Ok(home.join(".cache").join(&self.root_cache_key))
    }

    /// Map a resource key to a cache path.
    ///
    /// Does not ensure that the path (or any of the parents) exist.
    pub fn resource_to_path(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.base_cache_dir()?;
        Ok(resource_key.iter().fold(path, |acc, s| acc.join(s)))
    }

    /// Map a resource key to a cache path and ensure the parent directory exists.
    pub fn ensure_resource_parent_dir(
        &self,
        resource_key: &[String],
    ) -> anyhow::Result<PathBuf> {
        let path = self.resource_to_path(resource_key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(path)
    }

    /// Fetch a Resource to the Cache.
    pub fn fetch_resource(
        &self,
        url: &str,
        resource: &[String],
    ) -> anyhow::Result<PathBuf> {
        let cache_file_path = self.ensure_resource_parent_dir(resource)?;
        try_cache_download_to_path(url, cache_file_path)
    }
}

/// Download a URL resource to a given path.
///
/// If the path already exists, does nothing.
///
/// # Returns
///
/// The cache path.
pub fn try_cache_download_to_path(
    url: &str,
    cache_file_path: PathBuf,
) -> anyhow::Result<PathBuf> {
    if cache_file_path.exists() {
        tracing::debug!(path = %cache_file_path.display(), "cache hit");
        return Ok(cache_file_path);
    }

    let file_name = match cache_file_path.file_name() {
        Some(name) => name.to_string_lossy().to_string(),
        None => bail!("Cache path has no file name: {}", cache_file_path.display()),
    };

    tracing::info!(url, path = %cache_file_path.display(), "downloading");
    let bytes = downloader::download_file_as_bytes(url, &file_name);

    write_cache_file(&cache_file_path, &bytes)
        .with_context(|| format!("Failed to write the whole file: {url}"))?;

    Ok(cache_file_path)
}

/// Write `bytes` to `path`; a partially written file is removed.
fn write_cache_file(
    path: &Path,
    bytes: &[u8],
) -> anyhow::Result<()> {
    let written = File::create(path).and_then(|mut file| {
        file.write_all(bytes)?;
        file.flush()
    });
    if let Err(err) = written {
        if path.exists() {
            remove_file(path)?;
        }
        return Err(err.into());
    }
    Ok(())
}
