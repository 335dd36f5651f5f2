use clap::{Parser, ValueEnum};
use std::fmt::Debug;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vitkit::cache::disk::DiskCacheConfig;
use vitkit::cache::prefabs::StaticPreFabMap;
use vitkit::models::dpt::{DptConfig, PREFAB_DPT_MAP};
use vitkit::models::oneformer::{OneFormerConfig, PREFAB_ONEFORMER_MAP};
use vitkit::models::pretrained::PretrainedConfig;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Family {
    Dpt,
    Oneformer,
}

/// Inspect model family configs.
///
/// With neither `--prefab` nor `--config`, lists the family's prefabs.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Model family.
    #[arg(long, value_enum)]
    family: Family,

    /// Print a well-known config.
    #[arg(long)]
    prefab: Option<String>,

    /// Parse and print a `config.json`.
    #[arg(long, conflicts_with = "prefab")]
    config: Option<PathBuf>,

    /// With `--prefab`, fetch the published `config.json` through the disk cache.
    #[arg(long, default_value_t = false, requires = "prefab")]
    fetch: bool,
}

fn inspect<C>(
    prefabs: &StaticPreFabMap<C>,
    args: &Args,
) -> anyhow::Result<()>
where
    C: 'static + PretrainedConfig + Debug + Clone,
{
    if let Some(path) = &args.config {
        let config = C::from_json_file(path)?;
        println!("{}", config.to_json_string()?);
        return Ok(());
    }

    let name = match &args.prefab {
        Some(name) => name,
        None => {
            println!("{}: {}", prefabs.name, prefabs.description);
            for item in prefabs.items {
                println!("  {:<32} {}", item.name, item.description);
            }
            return Ok(());
        }
    };

    let prefab = prefabs.try_lookup_prefab(name)?;
    let config = if args.fetch {
        prefab.fetch_archive_config(&DiskCacheConfig::default())?
    } else {
        prefab.new_config()
    };
    println!("{}", config.to_json_string()?);

    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.family {
        Family::Dpt => inspect::<DptConfig>(&PREFAB_DPT_MAP, &args),
        Family::Oneformer => inspect::<OneFormerConfig>(&PREFAB_ONEFORMER_MAP, &args),
    }
}
