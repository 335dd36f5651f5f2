use anyhow::bail;
use burn::backend::NdArray;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use vitkit::convert::checkpoint::SafetensorsCheckpoint;
use vitkit::convert::pix2seq::{ConvertOptions, convert_checkpoint};
use vitkit::convert::state_dict::{ParamManifest, StateDictLoader};
use vitkit::convert::verify::Pix2SeqReferenceOutputs;

/// Convert a `Pix2Seq` training checkpoint into an encoder-decoder state dict.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Name of the model being converted.
    #[arg(long, default_value = "vit-base")]
    model_name: String,

    /// The checkpoint, exported to `.safetensors`.
    #[arg(long)]
    checkpoint_path: PathBuf,

    /// Output directory.
    #[arg(long)]
    pytorch_dump_folder_path: Option<PathBuf>,

    /// Write `model.safetensors` and the conversion report to the output directory.
    #[arg(long, default_value_t = false)]
    save: bool,

    /// Fail on variables that match no rewrite rule, and on undeclared parameters.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// A `.safetensors` export of the target model, whose names and shapes must match.
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Outputs of the converted model on the reference inputs,
    /// as `encoder_last_hidden_state` and `logits` in a `.safetensors` file.
    #[arg(long)]
    outputs: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    type B = NdArray<f32>;
    let device = Default::default();

    if args.save && args.pytorch_dump_folder_path.is_none() {
        bail!("--save requires --pytorch-dump-folder-path");
    }

    tracing::info!(
        model_name = args.model_name.as_str(),
        checkpoint = %args.checkpoint_path.display(),
        "converting"
    );

    let checkpoint = SafetensorsCheckpoint::open(&args.checkpoint_path)?;
    let options = ConvertOptions::new().with_strict(args.strict);
    let output = convert_checkpoint::<B, _>(&checkpoint, &options, &device)?;

    if let Some(path) = &args.manifest {
        let manifest = ParamManifest::from_safetensors_file(path)?.with_strict(args.strict);
        manifest.load_state_dict(&output.state_dict)?;
        tracing::info!(manifest = %path.display(), "state dict matches the manifest");
    }

    if let Some(path) = &args.outputs {
        Pix2SeqReferenceOutputs::default().verify_safetensors_file::<B, _>(path, &device)?;
    }

    if let Some(dir) = args.pytorch_dump_folder_path.as_ref().filter(|_| args.save) {
        std::fs::create_dir_all(dir)?;
        tracing::info!(
            model_name = args.model_name.as_str(),
            dir = %dir.display(),
            "saving model"
        );
        output.state_dict.save_safetensors(dir.join("model.safetensors"))?;
        std::fs::write(
            dir.join("conversion_report.json"),
            serde_json::to_string_pretty(&output.report)?,
        )?;
    }

    println!(
        "converted {} variables into {} parameters ({} skipped, {} unmatched, {} collisions)",
        output.report.converted.len(),
        output.state_dict.len(),
        output.report.skipped.len(),
        output.report.unmatched.len(),
        output.report.collisions.len(),
    );

    Ok(())
}
