//! Artifact tree layout and writing.
//!
//! All filenames are a pure function of (basename, face index, optional
//! suffix, extension policy), so re-running a batch overwrites its own
//! artifacts and distinct basenames never collide. Face-level artifacts are
//! always PNG; only the full restored image follows the extension policy.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{imageops, RgbImage};

use restora_core::EnhanceResult;

use crate::config::ExtensionPolicy;

const CROPPED_DIR: &str = "cropped_faces";
const RESTORED_DIR: &str = "restored_faces";
const CMP_DIR: &str = "cmp";
const IMGS_DIR: &str = "restored_imgs";

/// The fixed artifact subdirectories under one output root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the output root and all artifact subdirectories.
    /// Pre-existing directories are not an error.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [CROPPED_DIR, RESTORED_DIR, CMP_DIR, IMGS_DIR] {
            std::fs::create_dir_all(self.root.join(dir))?;
        }
        Ok(())
    }

    /// `cropped_faces/<basename>_<idx:02>.png`
    pub fn cropped_face(&self, basename: &str, idx: usize) -> PathBuf {
        self.root
            .join(CROPPED_DIR)
            .join(format!("{basename}_{idx:02}.png"))
    }

    /// `restored_faces/<basename>_<idx:02>[_<suffix>].png`
    pub fn restored_face(&self, basename: &str, idx: usize, suffix: Option<&str>) -> PathBuf {
        let name = match suffix {
            Some(suffix) => format!("{basename}_{idx:02}_{suffix}.png"),
            None => format!("{basename}_{idx:02}.png"),
        };
        self.root.join(RESTORED_DIR).join(name)
    }

    /// `cmp/<basename>_<idx:02>.png`
    pub fn comparison(&self, basename: &str, idx: usize) -> PathBuf {
        self.root
            .join(CMP_DIR)
            .join(format!("{basename}_{idx:02}.png"))
    }

    /// `restored_imgs/<basename>[_<suffix>].<ext>`
    pub fn restored_image(&self, basename: &str, suffix: Option<&str>, ext: &str) -> PathBuf {
        let name = match suffix {
            Some(suffix) => format!("{basename}_{suffix}.{ext}"),
            None => format!("{basename}.{ext}"),
        };
        self.root.join(IMGS_DIR).join(name)
    }
}

/// Side-by-side before/after comparison.
fn comparison_image(cropped: &RgbImage, restored: &RgbImage) -> RgbImage {
    let height = cropped.height().max(restored.height());
    let mut canvas = RgbImage::new(cropped.width() + restored.width(), height);
    imageops::replace(&mut canvas, cropped, 0, 0);
    imageops::replace(&mut canvas, restored, cropped.width() as i64, 0);
    canvas
}

/// Write every artifact for one job. Returns the path of the full restored
/// image, when one was produced.
pub fn write_artifacts(
    layout: &OutputLayout,
    basename: &str,
    source_ext: &str,
    result: &EnhanceResult,
    suffix: Option<&str>,
    ext: &ExtensionPolicy,
) -> Result<Option<PathBuf>> {
    for (idx, face) in result.faces.iter().enumerate() {
        save(&face.cropped, &layout.cropped_face(basename, idx))?;
        save(&face.restored, &layout.restored_face(basename, idx, suffix))?;
        let cmp = comparison_image(&face.cropped, &face.restored);
        save(&cmp, &layout.comparison(basename, idx))?;
    }

    match &result.restored_image {
        Some(restored) => {
            let path = layout.restored_image(basename, suffix, ext.extension_for(source_ext));
            save(restored, &path)?;
            Ok(Some(path))
        }
        None => Ok(None),
    }
}

fn save(image: &RgbImage, path: &Path) -> Result<()> {
    image
        .save(path)
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use restora_core::RestoredFace;

    fn result_with_faces(n: usize, with_full: bool) -> EnhanceResult {
        let faces = (0..n)
            .map(|i| RestoredFace {
                cropped: RgbImage::from_pixel(8, 8, Rgb([i as u8, 0, 0])),
                restored: RgbImage::from_pixel(8, 8, Rgb([0, i as u8, 0])),
            })
            .collect();
        EnhanceResult {
            faces,
            restored_image: with_full.then(|| RgbImage::from_pixel(16, 16, Rgb([9, 9, 9]))),
        }
    }

    #[test]
    fn face_index_is_zero_padded() {
        let layout = OutputLayout::new("out");
        assert_eq!(
            layout.cropped_face("portrait", 0),
            Path::new("out/cropped_faces/portrait_00.png")
        );
        assert_eq!(
            layout.cropped_face("portrait", 11),
            Path::new("out/cropped_faces/portrait_11.png")
        );
    }

    #[test]
    fn suffix_applies_to_restored_faces_and_full_images_only() {
        let layout = OutputLayout::new("out");
        assert_eq!(
            layout.restored_face("a", 0, Some("v13")),
            Path::new("out/restored_faces/a_00_v13.png")
        );
        assert_eq!(layout.comparison("a", 0), Path::new("out/cmp/a_00.png"));
        assert_eq!(
            layout.restored_image("a", Some("v13"), "jpg"),
            Path::new("out/restored_imgs/a_v13.jpg")
        );
    }

    #[test]
    fn distinct_basenames_never_collide() {
        let layout = OutputLayout::new("out");
        let mut paths = std::collections::HashSet::new();
        for basename in ["a", "b", "c_long_name"] {
            for idx in 0..3 {
                assert!(paths.insert(layout.cropped_face(basename, idx)));
                assert!(paths.insert(layout.restored_face(basename, idx, None)));
                assert!(paths.insert(layout.comparison(basename, idx)));
            }
            assert!(paths.insert(layout.restored_image(basename, None, "png")));
        }
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path().join("results"));
        layout.ensure_dirs().unwrap();
        layout.ensure_dirs().unwrap();
        for dir in ["cropped_faces", "restored_faces", "cmp", "restored_imgs"] {
            assert!(tmp.path().join("results").join(dir).is_dir());
        }
    }

    #[test]
    fn portrait_scenario_writes_the_four_expected_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();

        let result = result_with_faces(1, true);
        let last = write_artifacts(
            &layout,
            "portrait",
            "jpg",
            &result,
            None,
            &ExtensionPolicy::Auto,
        )
        .unwrap();

        assert_eq!(
            last.as_deref(),
            Some(tmp.path().join("restored_imgs/portrait.jpg").as_path())
        );
        assert!(tmp.path().join("cropped_faces/portrait_00.png").is_file());
        assert!(tmp.path().join("restored_faces/portrait_00.png").is_file());
        assert!(tmp.path().join("cmp/portrait_00.png").is_file());
        assert!(tmp.path().join("restored_imgs/portrait.jpg").is_file());
    }

    #[test]
    fn extension_override_renames_the_full_image() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();

        let result = result_with_faces(1, true);
        let last = write_artifacts(
            &layout,
            "portrait",
            "jpg",
            &result,
            None,
            &ExtensionPolicy::Fixed("png".to_string()),
        )
        .unwrap();

        assert_eq!(
            last.as_deref(),
            Some(tmp.path().join("restored_imgs/portrait.png").as_path())
        );
    }

    #[test]
    fn no_full_image_yields_no_restored_path() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(tmp.path());
        layout.ensure_dirs().unwrap();

        let result = result_with_faces(2, false);
        let last = write_artifacts(&layout, "aligned", "png", &result, None, &ExtensionPolicy::Auto)
            .unwrap();

        assert!(last.is_none());
        assert!(tmp.path().join("cropped_faces/aligned_00.png").is_file());
        assert!(tmp.path().join("cropped_faces/aligned_01.png").is_file());
        assert!(!tmp.path().join("restored_imgs/aligned.png").exists());
    }

    #[test]
    fn comparison_is_side_by_side() {
        let cropped = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        let restored = RgbImage::from_pixel(8, 8, Rgb([0, 255, 0]));
        let cmp = comparison_image(&cropped, &restored);
        assert_eq!(cmp.dimensions(), (16, 8));
        assert_eq!(cmp.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(cmp.get_pixel(8, 0).0, [0, 255, 0]);
    }
}
