//! Run configuration.
//!
//! The command line resolves into one immutable [`RunConfig`] constructed
//! before any processing; components receive it by reference and never read
//! ambient state.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use restora_core::ModelVariant;

/// Background super-resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgUpsamplerKind {
    RealEsrgan,
    None,
}

impl FromStr for BgUpsamplerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "realesrgan" => Ok(BgUpsamplerKind::RealEsrgan),
            "none" => Ok(BgUpsamplerKind::None),
            other => Err(format!(
                "unknown background upsampler '{other}' (expected 'realesrgan' or 'none')"
            )),
        }
    }
}

impl fmt::Display for BgUpsamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BgUpsamplerKind::RealEsrgan => "realesrgan",
            BgUpsamplerKind::None => "none",
        })
    }
}

/// Extension policy for the full restored image: reuse the source extension
/// or force a specific one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionPolicy {
    Auto,
    Fixed(String),
}

impl ExtensionPolicy {
    /// The extension to write for a job with the given source extension.
    pub fn extension_for<'a>(&'a self, source_ext: &'a str) -> &'a str {
        match self {
            ExtensionPolicy::Auto => source_ext,
            ExtensionPolicy::Fixed(ext) => ext,
        }
    }
}

impl FromStr for ExtensionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Err("empty output extension".to_string()),
            "auto" => Ok(ExtensionPolicy::Auto),
            ext => Ok(ExtensionPolicy::Fixed(
                ext.trim_start_matches('.').to_string(),
            )),
        }
    }
}

/// Fully resolved configuration for one batch run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub variant: ModelVariant,
    pub upscale: u32,
    pub bg_upsampler: BgUpsamplerKind,
    pub bg_tile: u32,
    pub only_center_face: bool,
    pub aligned: bool,
    pub weight: f32,
    pub suffix: Option<String>,
    pub ext: ExtensionPolicy,
}

/// Clap value parser for the blend weight: must lie in [0, 1].
pub fn parse_weight(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if !(0.0..=1.0).contains(&value) {
        return Err(format!("blend weight {value} is outside [0, 1]"));
    }
    Ok(value)
}
