//! Restoration model variants.
//!
//! A closed set of five released GFPGAN-family generators. Selecting an
//! identifier outside this set is a configuration error surfaced before any
//! processing starts, never a silent default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::weights::WeightSpec;

/// Generator architecture family a variant belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchKind {
    /// The original StyleGAN2-decoder generator.
    Original,
    /// The "clean" generator without custom CUDA ops.
    Clean,
    /// The RestoreFormer alternate generator.
    RestoreFormer,
}

/// A released restoration model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ModelVariant {
    V1,
    V1_2,
    V1_3,
    V1_4,
    RestoreFormer,
}

#[derive(Debug, Clone, Error)]
#[error("unknown model version '{0}' (expected one of: 1, 1.2, 1.3, 1.4, RestoreFormer)")]
pub struct UnknownVariant(String);

impl ModelVariant {
    pub const ALL: [ModelVariant; 5] = [
        ModelVariant::V1,
        ModelVariant::V1_2,
        ModelVariant::V1_3,
        ModelVariant::V1_4,
        ModelVariant::RestoreFormer,
    ];

    /// The user-facing identifier, as accepted on the command line.
    pub fn identifier(&self) -> &'static str {
        match self {
            ModelVariant::V1 => "1",
            ModelVariant::V1_2 => "1.2",
            ModelVariant::V1_3 => "1.3",
            ModelVariant::V1_4 => "1.4",
            ModelVariant::RestoreFormer => "RestoreFormer",
        }
    }

    pub fn arch(&self) -> ArchKind {
        match self {
            ModelVariant::V1 => ArchKind::Original,
            ModelVariant::V1_2 | ModelVariant::V1_3 | ModelVariant::V1_4 => ArchKind::Clean,
            ModelVariant::RestoreFormer => ArchKind::RestoreFormer,
        }
    }

    /// Channel width multiplier the generator was trained with.
    pub fn channel_multiplier(&self) -> u32 {
        match self {
            ModelVariant::V1 => 1,
            _ => 2,
        }
    }

    /// Weight file name and canonical download URL for this variant.
    pub fn weights(&self) -> WeightSpec {
        match self {
            ModelVariant::V1 => WeightSpec {
                file_name: "GFPGANv1.onnx",
                url: "https://github.com/TencentARC/GFPGAN/releases/download/v0.1.0/GFPGANv1.onnx",
            },
            ModelVariant::V1_2 => WeightSpec {
                file_name: "GFPGANCleanv1-NoCE-C2.onnx",
                url: "https://github.com/TencentARC/GFPGAN/releases/download/v0.2.0/GFPGANCleanv1-NoCE-C2.onnx",
            },
            ModelVariant::V1_3 => WeightSpec {
                file_name: "GFPGANv1.3.onnx",
                url: "https://github.com/TencentARC/GFPGAN/releases/download/v1.3.0/GFPGANv1.3.onnx",
            },
            ModelVariant::V1_4 => WeightSpec {
                file_name: "GFPGANv1.4.onnx",
                url: "https://github.com/TencentARC/GFPGAN/releases/download/v1.3.0/GFPGANv1.4.onnx",
            },
            ModelVariant::RestoreFormer => WeightSpec {
                file_name: "RestoreFormer.onnx",
                url: "https://github.com/TencentARC/GFPGAN/releases/download/v1.3.4/RestoreFormer.onnx",
            },
        }
    }
}

impl FromStr for ModelVariant {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" => Ok(ModelVariant::V1),
            "1.2" => Ok(ModelVariant::V1_2),
            "1.3" => Ok(ModelVariant::V1_3),
            "1.4" => Ok(ModelVariant::V1_4),
            "RestoreFormer" => Ok(ModelVariant::RestoreFormer),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

impl fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl TryFrom<String> for ModelVariant {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelVariant> for String {
    fn from(variant: ModelVariant) -> Self {
        variant.identifier().to_string()
    }
}
