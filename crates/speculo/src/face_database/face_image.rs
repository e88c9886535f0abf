use std::{fmt::Display, io, path::Path};

use burn::tensor::TensorData;
use image::{DynamicImage, imageops::FilterType};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declared resolution of an image tensor: `(height, width, channels)`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl ImageShape {
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Number of scalar values in one image of this shape.
    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_grayscale(&self) -> bool {
        self.channels == 1
    }
}

impl Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("failed to load image due to {:?}", .0)]
    LoadingError(#[from] io::Error),
    #[error("Failed to decode image due to {:?}", .0)]
    DecodingError(#[from] image::error::ImageError),
    #[error("{} channels are not supported, choose either 1 (L) or 3 (rgb)", .0)]
    UnsupportedChannels(usize),
    #[error("expected {} values for shape {} but got {}", .expected, .shape, .actual)]
    ShapeMismatch {
        shape: ImageShape,
        expected: usize,
        actual: usize,
    },
}

/// Image with intensities scaled into `[0, 1]`, laid out as `[height, width, channels]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceImage {
    pixels: Vec<f32>,
    shape: ImageShape,
}

/// Image with raw `0..=255` intensities, laid out as `[height, width, channels]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelImage {
    pixels: Vec<u8>,
    shape: ImageShape,
}

impl FaceImage {
    pub fn new(pixels: Vec<f32>, shape: ImageShape) -> Result<Self, ImageError> {
        if pixels.len() != shape.len() {
            return Err(ImageError::ShapeMismatch {
                shape,
                expected: shape.len(),
                actual: pixels.len(),
            });
        }
        Ok(Self { pixels, shape })
    }

    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    /// `[1, height, width, channels]` tensor data, ready to be stacked into a batch.
    pub fn to_tensor_data(&self) -> TensorData {
        TensorData::new(
            self.pixels.clone(),
            [1, self.shape.height, self.shape.width, self.shape.channels],
        )
    }
}

impl PixelImage {
    pub fn new(pixels: Vec<u8>, shape: ImageShape) -> Result<Self, ImageError> {
        if pixels.len() != shape.len() {
            return Err(ImageError::ShapeMismatch {
                shape,
                expected: shape.len(),
                actual: pixels.len(),
            });
        }
        Ok(Self { pixels, shape })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn into_dynamic_image(self) -> Result<DynamicImage, ImageError> {
        let shape = self.shape;
        let actual = self.pixels.len();
        let mismatch = || ImageError::ShapeMismatch {
            shape,
            expected: shape.len(),
            actual,
        };
        let (width, height) = (shape.width as u32, shape.height as u32);
        match shape.channels {
            1 => image::GrayImage::from_raw(width, height, self.pixels)
                .map(DynamicImage::ImageLuma8)
                .ok_or_else(mismatch),
            3 => image::RgbImage::from_raw(width, height, self.pixels)
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(mismatch),
            c => Err(ImageError::UnsupportedChannels(c)),
        }
    }
}

/// Scales raw intensities into `[0, 1]`.
pub fn normalize(image: &PixelImage) -> FaceImage {
    FaceImage {
        pixels: image.pixels.iter().map(|p| *p as f32 / 255.0).collect(),
        shape: image.shape,
    }
}

/// Maps `[0, 1]` intensities back to `0..=255`, clamping values the network pushed outside.
pub fn denormalize(image: &FaceImage) -> PixelImage {
    PixelImage {
        pixels: image
            .pixels
            .iter()
            .map(|p| (p * 255.0).round().clamp(0.0, 255.0) as u8)
            .collect(),
        shape: image.shape,
    }
}

/// Decodes `path`, resizes it to `shape` and converts it to the declared channel count.
pub fn read_pixels(path: &Path, shape: ImageShape) -> Result<PixelImage, ImageError> {
    let decoded = image::ImageReader::open(path)?.with_guessed_format()?.decode()?;
    let resized = decoded.resize_exact(
        shape.width as u32,
        shape.height as u32,
        FilterType::Lanczos3,
    );
    let pixels = match shape.channels {
        1 => resized.to_luma8().into_raw(),
        3 => resized.to_rgb8().into_raw(),
        c => return Err(ImageError::UnsupportedChannels(c)),
    };
    PixelImage::new(pixels, shape)
}

/// Loads an image file as a normalized [`FaceImage`] of the given shape.
pub fn read_image(path: &Path, shape: ImageShape) -> Result<FaceImage, ImageError> {
    read_pixels(path, shape).map(|pixels| normalize(&pixels))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denormalize_inverts_normalize() {
        let shape = ImageShape::new(16, 16, 1);
        let raw: Vec<u8> = (0..=255).collect();
        let image = PixelImage::new(raw, shape).unwrap();

        assert_eq!(denormalize(&normalize(&image)), image);
    }

    #[test]
    fn denormalize_clamps_out_of_range_values() {
        let shape = ImageShape::new(1, 3, 1);
        let image = FaceImage::new(vec![-0.2, 0.5, 1.7], shape).unwrap();

        assert_eq!(denormalize(&image).pixels(), &[0, 128, 255]);
    }

    #[test]
    fn rejects_wrong_pixel_count() {
        let result = FaceImage::new(vec![0.0; 5], ImageShape::new(2, 2, 1));
        assert!(matches!(
            result,
            Err(ImageError::ShapeMismatch {
                expected: 4,
                actual: 5,
                ..
            })
        ));
    }

    #[test]
    fn read_image_resizes_and_converts_to_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("color.png");
        image::RgbImage::from_pixel(20, 10, image::Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();

        let shape = ImageShape::new(8, 4, 1);
        let image = read_image(&path, shape).unwrap();

        assert_eq!(image.shape(), shape);
        assert_eq!(image.pixels().len(), 32);
        assert!(image.pixels().iter().all(|p| *p > 0.98 && *p <= 1.0));
    }
}
