//! restora-sr — Tiled Real-ESRGAN background super-resolution.
//!
//! Provides the capability-checked factory for the background upsampler:
//! super-resolving a full frame is only worth it with a GPU execution
//! provider, so without one the factory degrades to
//! [`BackgroundUpsampler::Disabled`] with a single warning instead of
//! silently running an order of magnitude slower.

pub mod esrgan;

use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use thiserror::Error;

use restora_core::background::BackgroundUpsampler;
use restora_core::weights::{self, WeightDirs, WeightError, WeightSpec};

pub use esrgan::{RealEsrgan, DEFAULT_TILE_PAD};

/// Fixed 2× Real-ESRGAN weights for background upsampling.
pub const ESRGAN_X2_WEIGHTS: WeightSpec = WeightSpec {
    file_name: "RealESRGAN_x2plus.onnx",
    url: "https://github.com/xinntao/Real-ESRGAN/releases/download/v0.2.1/RealESRGAN_x2plus.onnx",
};

#[derive(Error, Debug)]
pub enum SrError {
    #[error("upsampler model not found: {0}")]
    ModelNotFound(String),
    #[error("upsampler inference failed: {0}")]
    InferenceFailed(String),
    #[error(transparent)]
    Weights(#[from] WeightError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Whether a GPU execution provider is available for tiled inference.
pub fn accelerator_available() -> bool {
    CUDAExecutionProvider::default()
        .is_available()
        .unwrap_or(false)
}

/// Build the background upsampler for a run.
///
/// Returns `Disabled` when the user turned background upsampling off, and
/// also (with a warning) when no accelerator is present. The face
/// restoration path is unaffected either way.
pub async fn build_upsampler(
    enable: bool,
    tile_size: u32,
    tile_pad: u32,
    dirs: &WeightDirs,
) -> Result<BackgroundUpsampler, SrError> {
    if !enable {
        return Ok(BackgroundUpsampler::Disabled);
    }

    if !accelerator_available() {
        tracing::warn!(
            "no GPU execution provider available; background upsampling disabled \
             (faces are still restored, the background is plainly resized)"
        );
        return Ok(BackgroundUpsampler::Disabled);
    }

    let path = weights::ensure_local(&ESRGAN_X2_WEIGHTS, dirs).await?;
    let model = RealEsrgan::load(&path, tile_size, tile_pad)?;
    Ok(BackgroundUpsampler::Enabled(Box::new(model)))
}
