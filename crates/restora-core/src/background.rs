//! Background rendering for paste-back.
//!
//! The engine consumes a tagged capability variant rather than a nullable
//! handle: `Enabled` delegates to a super-resolution model, `Disabled`
//! falls back to a plain resize so paste-back always has a canvas at the
//! requested output scale.

use image::{imageops, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpsampleError {
    #[error("background inference failed: {0}")]
    Inference(String),
    #[error("upsampled output is {got_w}x{got_h}, expected {want_w}x{want_h}")]
    BadOutputSize {
        got_w: u32,
        got_h: u32,
        want_w: u32,
        want_h: u32,
    },
}

/// A super-resolution model that scales full frames by an arbitrary
/// output factor.
pub trait UpsampleModel: Send {
    fn upscale(&mut self, image: &RgbImage, outscale: f32) -> Result<RgbImage, UpsampleError>;
}

/// Capability-checked background upsampler handle.
pub enum BackgroundUpsampler {
    Enabled(Box<dyn UpsampleModel>),
    Disabled,
}

impl BackgroundUpsampler {
    pub fn is_enabled(&self) -> bool {
        matches!(self, BackgroundUpsampler::Enabled(_))
    }

    /// Render the paste-back canvas at `outscale` times the frame size.
    ///
    /// `Disabled` resizes with Lanczos instead of running a model; the
    /// background stays un-restored but the canvas geometry is identical.
    pub fn render(&mut self, image: &RgbImage, outscale: f32) -> Result<RgbImage, UpsampleError> {
        let want_w = ((image.width() as f32 * outscale).round() as u32).max(1);
        let want_h = ((image.height() as f32 * outscale).round() as u32).max(1);

        match self {
            BackgroundUpsampler::Enabled(model) => {
                let out = model.upscale(image, outscale)?;
                if out.dimensions() != (want_w, want_h) {
                    return Err(UpsampleError::BadOutputSize {
                        got_w: out.width(),
                        got_h: out.height(),
                        want_w,
                        want_h,
                    });
                }
                Ok(out)
            }
            BackgroundUpsampler::Disabled => {
                if (want_w, want_h) == image.dimensions() {
                    return Ok(image.clone());
                }
                Ok(imageops::resize(
                    image,
                    want_w,
                    want_h,
                    imageops::FilterType::Lanczos3,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    struct NearestDoubler;

    impl UpsampleModel for NearestDoubler {
        fn upscale(&mut self, image: &RgbImage, outscale: f32) -> Result<RgbImage, UpsampleError> {
            let w = (image.width() as f32 * outscale).round() as u32;
            let h = (image.height() as f32 * outscale).round() as u32;
            Ok(imageops::resize(image, w, h, imageops::FilterType::Nearest))
        }
    }

    struct WrongSize;

    impl UpsampleModel for WrongSize {
        fn upscale(&mut self, image: &RgbImage, _outscale: f32) -> Result<RgbImage, UpsampleError> {
            Ok(image.clone())
        }
    }

    #[test]
    fn disabled_resizes_to_the_output_scale() {
        let image = RgbImage::from_pixel(40, 30, Rgb([90, 90, 90]));
        let mut bg = BackgroundUpsampler::Disabled;
        let out = bg.render(&image, 2.0).unwrap();
        assert_eq!(out.dimensions(), (80, 60));
    }

    #[test]
    fn disabled_at_unit_scale_is_untouched() {
        let image = RgbImage::from_pixel(40, 30, Rgb([7, 8, 9]));
        let mut bg = BackgroundUpsampler::Disabled;
        let out = bg.render(&image, 1.0).unwrap();
        assert_eq!(out, image);
    }

    #[test]
    fn enabled_delegates_to_the_model() {
        let image = RgbImage::from_pixel(16, 16, Rgb([50, 60, 70]));
        let mut bg = BackgroundUpsampler::Enabled(Box::new(NearestDoubler));
        let out = bg.render(&image, 2.0).unwrap();
        assert_eq!(out.dimensions(), (32, 32));
        assert_eq!(out.get_pixel(0, 0).0, [50, 60, 70]);
        assert!(bg.is_enabled());
    }

    #[test]
    fn enabled_rejects_wrong_model_output_size() {
        let image = RgbImage::from_pixel(16, 16, Rgb([1, 2, 3]));
        let mut bg = BackgroundUpsampler::Enabled(Box::new(WrongSize));
        let err = bg.render(&image, 2.0).unwrap_err();
        assert!(matches!(err, UpsampleError::BadOutputSize { .. }));
    }
}
