//! # Config Prefabs for Well-Known Model Configurations

use crate::cache::archive::fetch_config_archive;
use crate::cache::disk::DiskCacheConfig;
use crate::models::pretrained::PretrainedConfig;
use anyhow::bail;
use std::fmt::Debug;
use std::sync::Arc;

/// Static builder for a [`PreFabConfig`]
pub struct StaticPreFabConfig<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: &'static str,

    /// Description of the model config pre-fab.
    pub description: &'static str,

    /// Builder function for the config.
    pub builder: fn() -> C,

    /// Hub `config.json` describing the same model, if published.
    pub archive_url: Option<&'static str>,
}

impl<C> StaticPreFabConfig<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    /// Convert to a [`PreFabConfig<C>`].
    pub fn to_prefab(&self) -> PreFabConfig<C> {
        let builder = self.builder;
        PreFabConfig {
            name: self.name.to_string(),
            description: self.description.to_string(),
            builder: Arc::new(builder),
            archive_url: self.archive_url.map(|s| s.to_string()),
        }
    }
}

impl<C> From<&StaticPreFabConfig<C>> for PreFabConfig<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    fn from(config: &StaticPreFabConfig<C>) -> Self {
        config.to_prefab()
    }
}

impl<C> Debug for StaticPreFabConfig<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        self.to_prefab().fmt(f)
    }
}

/// A [`PretrainedConfig`] Well-Known Pre-Fab.
pub struct PreFabConfig<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    /// Name of the model config pre-fab.
    pub name: String,

    /// Description of the model config pre-fab.
    pub description: String,

    /// Builder function for the config.
    pub builder: Arc<dyn Fn() -> C + Send + Sync>,

    /// Hub `config.json` describing the same model, if published.
    pub archive_url: Option<String>,
}

impl<C> Debug for PreFabConfig<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let pretty = f.alternate();

        let type_name = std::any::type_name::<C>();
        let mut handle = f.debug_struct(&format!("PreFabConfig<{}>", type_name));

        handle
            .field("name", &self.name)
            .field("description", &self.description)
            .field("archive_url", &self.archive_url);

        if pretty {
            handle.field("config", &self.new_config());
        }

        handle.finish()
    }
}

impl<C> PreFabConfig<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    /// Build a new config.
    pub fn new_config(&self) -> C {
        (self.builder)()
    }

    /// Read-through cache the published `config.json`, and parse it.
    pub fn fetch_archive_config(
        &self,
        disk_cache: &DiskCacheConfig,
    ) -> anyhow::Result<C> {
        let url = match &self.archive_url {
            Some(url) => url,
            None => bail!("Prefab has no published config archive: {}", self.name),
        };
        let path = fetch_config_archive(disk_cache, &self.name, url)?;
        Ok(C::from_json_file(path)?)
    }
}

/// A named table of [`StaticPreFabConfig`]s.
pub struct StaticPreFabMap<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    /// Name of the family.
    pub name: &'static str,

    /// Description of the family.
    pub description: &'static str,

    /// The prefabs.
    pub items: &'static [&'static StaticPreFabConfig<C>],
}

impl<C> StaticPreFabMap<C>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    /// Names of the prefabs, in table order.
    pub fn names(&self) -> Vec<&'static str> {
        self.items.iter().map(|p| p.name).collect()
    }

    /// Lookup a prefab by name.
    pub fn lookup_prefab(
        &self,
        name: &str,
    ) -> Option<PreFabConfig<C>> {
        self.items
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.to_prefab())
    }

    /// Lookup a prefab.
    pub fn try_lookup_prefab(
        &self,
        name: &str,
    ) -> anyhow::Result<PreFabConfig<C>> {
        match self.lookup_prefab(name) {
            Some(p) => Ok(p),
            None => bail!(
                "{} prefab not found: {}; known prefabs: {:?}",
                self.name,
                name,
                self.names()
            ),
        }
    }

    /// Lookup a prefab.
    pub fn expect_lookup_prefab(
        &self,
        name: &str,
    ) -> PreFabConfig<C> {
        match self.try_lookup_prefab(name) {
            Ok(p) => p,
            Err(e) => panic!("{}", e),
        }
    }
}
