//! The batch orchestrator.
//!
//! Drives one `enhance` call per input image, strictly sequentially (the
//! engine and its accelerator context are not built for concurrent
//! invocation), and writes every artifact as it goes. A job that fails to
//! decode or restore is logged and skipped; artifact-write I/O errors are
//! surfaced immediately and abort the run.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use restora_core::{EnhanceOptions, FaceRestorer};

use crate::config::RunConfig;
use crate::output::{self, OutputLayout};

/// One input image, derived during enumeration and consumed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageJob {
    pub path: PathBuf,
    pub basename: String,
    pub ext: String,
}

impl ImageJob {
    fn from_path(path: PathBuf) -> Self {
        let basename = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            basename,
            ext,
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub faces: usize,
    /// Path of the last full restored image written; `None` for an empty
    /// batch or when no job produced a full-frame output.
    pub last_restored: Option<PathBuf>,
}

/// Build the job set: a single file, or every regular file of a directory
/// sorted lexicographically by filename for reproducible ordering.
pub fn enumerate_jobs(input: &Path) -> Result<Vec<ImageJob>> {
    // Normalizes away trailing separators ("photos/" and "photos" are the
    // same input).
    let input: PathBuf = input.components().collect();

    if input.is_file() {
        return Ok(vec![ImageJob::from_path(input)]);
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&input)
        .with_context(|| format!("reading input directory {}", input.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect();
    paths.sort_by_key(|path| path.file_name().map(|n| n.to_os_string()));

    Ok(paths.into_iter().map(ImageJob::from_path).collect())
}

/// Process every job with the shared engine handle.
pub fn run(config: &RunConfig, restorer: &mut dyn FaceRestorer) -> Result<BatchSummary> {
    let jobs = enumerate_jobs(&config.input)?;

    let layout = OutputLayout::new(&config.output);
    layout
        .ensure_dirs()
        .with_context(|| format!("creating output tree under {}", config.output.display()))?;

    if jobs.is_empty() {
        tracing::info!(input = %config.input.display(), "no input images found");
        return Ok(BatchSummary::default());
    }

    let options = EnhanceOptions {
        has_aligned: config.aligned,
        only_center_face: config.only_center_face,
        paste_back: true,
        weight: config.weight,
    };

    let mut summary = BatchSummary::default();
    for job in &jobs {
        tracing::info!(image = %job.path.display(), "processing");

        let image = match image::open(&job.path) {
            Ok(image) => image.to_rgb8(),
            Err(error) => {
                tracing::warn!(image = %job.path.display(), %error, "cannot decode, skipping");
                summary.skipped += 1;
                continue;
            }
        };

        let result = match restorer.enhance(&image, &options) {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(image = %job.path.display(), %error, "restoration failed, skipping");
                summary.skipped += 1;
                continue;
            }
        };

        let restored_path = output::write_artifacts(
            &layout,
            &job.basename,
            &job.ext,
            &result,
            config.suffix.as_deref(),
            &config.ext,
        )?;

        summary.processed += 1;
        summary.faces += result.faces.len();
        if let Some(path) = restored_path {
            summary.last_restored = Some(path);
        }
    }

    Ok(summary)
}
