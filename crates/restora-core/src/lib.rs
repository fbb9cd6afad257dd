//! restora-core — Face restoration engine.
//!
//! Detects faces with an SCRFD-style ONNX detector, aligns each face onto a
//! canonical 512×512 template, restores it with a GFPGAN-family generator,
//! and composites the result back into the full frame, optionally over a
//! super-resolved background.

pub mod alignment;
pub mod background;
pub mod detector;
pub mod restorer;
pub mod types;
pub mod variant;
pub mod weights;

pub use background::{BackgroundUpsampler, UpsampleModel};
pub use restorer::{FaceRestorer, GfpRestorer};
pub use types::{EnhanceOptions, EnhanceResult, FaceBox, RestoredFace};
pub use variant::ModelVariant;
pub use weights::{WeightDirs, WeightSource, WeightSpec};
