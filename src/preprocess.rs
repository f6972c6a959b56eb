use fast_image_resize::images::Image;
use fast_image_resize::{FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, RgbImage};
use ndarray::{Array3, ArrayD, Axis};
use rayon::prelude::*;

use crate::error::{Result, VisionError};

/// Gray used by the YOLOv8 training pipeline for letterbox borders.
pub const PAD_VALUE: u8 = 114;

#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    pub height: u32,
    pub width: u32,
    pub pad_value: u8,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            height: 640,
            width: 640,
            pad_value: PAD_VALUE,
        }
    }
}

/// Geometry of one letterboxed image, needed to map boxes back.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_width: u32,
    pub orig_height: u32,
}

impl Letterbox {
    /// Computes the letterbox for an image of `width`x`height` into the model input.
    pub fn new(width: u32, height: u32, config: &PreprocessConfig) -> Self {
        let scale = (config.width as f32 / width as f32).min(config.height as f32 / height as f32);
        let (new_width, new_height) = Self::resized(width, height, scale);
        let dw = config.width.saturating_sub(new_width) as f32 / 2.0;
        let dh = config.height.saturating_sub(new_height) as f32 / 2.0;
        Self {
            scale,
            pad_x: (dw - 0.1).round().max(0.0),
            pad_y: (dh - 0.1).round().max(0.0),
            orig_width: width,
            orig_height: height,
        }
    }

    fn resized(width: u32, height: u32, scale: f32) -> (u32, u32) {
        (
            ((width as f32 * scale).round() as u32).max(1),
            ((height as f32 * scale).round() as u32).max(1),
        )
    }

    pub fn new_size(&self) -> (u32, u32) {
        Self::resized(self.orig_width, self.orig_height, self.scale)
    }

    /// Maps an `xyxy` box from model input space to original image pixels, clipped.
    pub fn unletterbox(&self, xyxy: [f32; 4]) -> [f32; 4] {
        let w = self.orig_width as f32;
        let h = self.orig_height as f32;
        [
            ((xyxy[0] - self.pad_x) / self.scale).clamp(0.0, w),
            ((xyxy[1] - self.pad_y) / self.scale).clamp(0.0, h),
            ((xyxy[2] - self.pad_x) / self.scale).clamp(0.0, w),
            ((xyxy[3] - self.pad_y) / self.scale).clamp(0.0, h),
        ]
    }
}

#[derive(Debug, Default)]
pub struct Processor {
    pub config: PreprocessConfig,
}

impl Processor {
    /// Create a new instance of the Processor struct
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    fn resize(&self, x: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
        let src = DynamicImage::ImageRgb8(x.clone());
        let mut dst_image = Image::new(width, height, PixelType::U8x3);

        let mut resizer = Resizer::new();
        let options = ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear));
        resizer.resize(&src, &mut dst_image, &options)?;

        RgbImage::from_raw(width, height, dst_image.buffer().to_vec()).ok_or_else(|| {
            VisionError::Io(std::io::Error::other("resized buffer does not match its size"))
        })
    }

    /// Letterboxes a single image and returns its CHW tensor.
    pub fn letterbox(&self, x: &DynamicImage) -> Result<(Array3<f32>, Letterbox)> {
        let rgb = x.to_rgb8();
        let letterbox = Letterbox::new(rgb.width(), rgb.height(), &self.config);
        let (new_width, new_height) = letterbox.new_size();

        let resized = if (new_width, new_height) == (rgb.width(), rgb.height()) {
            rgb
        } else {
            self.resize(&rgb, new_width, new_height)?
        };

        let pad = self.config.pad_value;
        let mut padded = RgbImage::from_pixel(
            self.config.width,
            self.config.height,
            image::Rgb([pad, pad, pad]),
        );
        image::imageops::overlay(
            &mut padded,
            &resized,
            letterbox.pad_x as i64,
            letterbox.pad_y as i64,
        );

        let (width, height) = (self.config.width as usize, self.config.height as usize);
        let mut img_arr = Array3::<f32>::zeros((3, height, width));
        for (i, rgb) in padded.pixels().enumerate() {
            let y = i / width;
            let x = i % width;
            img_arr[[0, y, x]] = rgb[0] as f32 / 255.0;
            img_arr[[1, y, x]] = rgb[1] as f32 / 255.0;
            img_arr[[2, y, x]] = rgb[2] as f32 / 255.0;
        }
        Ok((img_arr, letterbox))
    }

    /// Preprocess the input images.
    /// Resizes with padding and normalizes to [0, 1], returning an NCHW batch
    /// and the letterbox of every image.
    pub fn preprocess(&self, xs: &[DynamicImage]) -> Result<(ArrayD<f32>, Vec<Letterbox>)> {
        let ys_vec = xs
            .par_iter()
            .map(|x| self.letterbox(x))
            .collect::<Result<Vec<_>>>()?;

        let (img_arrs, letterboxes): (Vec<_>, Vec<_>) = ys_vec.into_iter().unzip();
        let views: Vec<_> = img_arrs.iter().map(|arr| arr.view()).collect();
        let ys = ndarray::stack(Axis(0), &views)?.into_dyn();

        Ok((ys, letterboxes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([value; 3])))
    }

    #[test]
    fn test_letterbox_landscape() {
        let lb = Letterbox::new(1280, 720, &PreprocessConfig::default());
        assert_eq!(lb.scale, 0.5);
        assert_eq!(lb.new_size(), (640, 360));
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 140.0);
    }

    #[test]
    fn test_letterbox_portrait() {
        let lb = Letterbox::new(320, 640, &PreprocessConfig::default());
        assert_eq!(lb.scale, 1.0);
        assert_eq!(lb.new_size(), (320, 640));
        assert_eq!(lb.pad_x, 160.0);
        assert_eq!(lb.pad_y, 0.0);
    }

    #[test]
    fn test_unletterbox_maps_and_clips() {
        let lb = Letterbox::new(1280, 720, &PreprocessConfig::default());
        let b = lb.unletterbox([100.0, 140.0, 200.0, 240.0]);
        assert_eq!(b, [200.0, 0.0, 400.0, 200.0]);

        let clipped = lb.unletterbox([-10.0, 100.0, 700.0, 600.0]);
        assert_eq!(clipped, [0.0, 0.0, 1280.0, 720.0]);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let processor = Processor::new(PreprocessConfig::default());
        let (xs, letterboxes) = processor.preprocess(&[solid(1280, 720, 255)]).unwrap();

        assert_eq!(xs.shape(), &[1, 3, 640, 640]);
        assert_eq!(letterboxes.len(), 1);
        // top border is padding, the middle is the white image
        let pad = PAD_VALUE as f32 / 255.0;
        assert!((xs[[0, 0, 10, 320]] - pad).abs() < 1e-6);
        assert!((xs[[0, 2, 320, 320]] - 1.0).abs() < 2.0 / 255.0);
    }

    #[test]
    fn test_preprocess_batch() {
        let processor = Processor::new(PreprocessConfig {
            height: 64,
            width: 64,
            pad_value: PAD_VALUE,
        });
        let (xs, letterboxes) = processor
            .preprocess(&[solid(32, 16, 0), solid(16, 32, 0)])
            .unwrap();
        assert_eq!(xs.shape(), &[2, 3, 64, 64]);
        assert_eq!(letterboxes[0].pad_y, 16.0);
        assert_eq!(letterboxes[1].pad_x, 16.0);
    }
}
