use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use restora_core::detector::DETECTOR_WEIGHTS;
use restora_core::weights::{self, WeightDirs};
use restora_core::{GfpRestorer, ModelVariant};

mod batch;
mod config;
mod output;

use config::{BgUpsamplerKind, ExtensionPolicy, RunConfig};

#[derive(Parser)]
#[command(
    name = "restora",
    about = "Restore degraded face photographs",
    version
)]
struct Cli {
    /// Input image or directory of images
    #[arg(short, long)]
    input: PathBuf,

    /// Root directory for all output artifacts
    #[arg(short, long, default_value = "results")]
    output: PathBuf,

    /// Restoration model version: 1, 1.2, 1.3, 1.4 or RestoreFormer
    #[arg(short = 'v', long = "model-version", default_value = "1.3")]
    version: ModelVariant,

    /// Overall output upscale factor
    #[arg(short = 's', long, default_value_t = 2)]
    upscale: u32,

    /// Background super-resolution strategy: realesrgan or none
    #[arg(long = "bg-upsampler", default_value = "realesrgan")]
    bg_upsampler: BgUpsamplerKind,

    /// Tile edge length for tiled background inference (0 = no tiling)
    #[arg(long = "bg-tile", default_value_t = 400)]
    bg_tile: u32,

    /// Restore only the face closest to the frame center
    #[arg(long)]
    only_center_face: bool,

    /// Input is already an aligned single-face crop
    #[arg(long)]
    aligned: bool,

    /// Extension of the full restored image: auto reuses the source extension
    #[arg(long, default_value = "auto")]
    ext: ExtensionPolicy,

    /// Restoration strength in [0, 1]: 0 keeps the input, 1 is the full model output
    #[arg(short = 'w', long, default_value_t = 0.5, value_parser = config::parse_weight)]
    weight: f32,

    /// Token appended to restored-face and full-image filenames
    #[arg(long)]
    suffix: Option<String>,
}

impl From<Cli> for RunConfig {
    fn from(cli: Cli) -> Self {
        RunConfig {
            input: cli.input,
            output: cli.output,
            variant: cli.version,
            upscale: cli.upscale,
            bg_upsampler: cli.bg_upsampler,
            bg_tile: cli.bg_tile,
            only_center_face: cli.only_center_face,
            aligned: cli.aligned,
            weight: cli.weight,
            suffix: cli.suffix,
            ext: cli.ext,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config: RunConfig = Cli::parse().into();
    tracing::info!(
        input = %config.input.display(),
        output = %config.output.display(),
        variant = %config.variant,
        upscale = config.upscale,
        "restora starting"
    );

    let dirs = WeightDirs::from_env();

    let background = restora_sr::build_upsampler(
        config.bg_upsampler == BgUpsamplerKind::RealEsrgan,
        config.bg_tile,
        restora_sr::DEFAULT_TILE_PAD,
        &dirs,
    )
    .await
    .context("setting up the background upsampler")?;

    let generator_path = weights::ensure_local(&config.variant.weights(), &dirs)
        .await
        .context("resolving restoration model weights")?;
    let detector_path = weights::ensure_local(&DETECTOR_WEIGHTS, &dirs)
        .await
        .context("resolving face detector weights")?;

    let mut restorer = GfpRestorer::new(
        &generator_path,
        &detector_path,
        config.variant,
        config.upscale,
        background,
    )
    .context("loading the restoration engine")?;

    let summary = batch::run(&config, &mut restorer).context("running the batch")?;

    tracing::info!(
        processed = summary.processed,
        skipped = summary.skipped,
        faces = summary.faces,
        "batch finished"
    );
    match &summary.last_restored {
        Some(path) => println!("{}", path.display()),
        None if summary.processed == 0 => println!("no images processed"),
        None => println!("no full restored images written"),
    }

    Ok(())
}
