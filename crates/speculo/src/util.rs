use std::path::Path;

use image::{DynamicImage, imageops::FilterType};

use crate::face_database::face_image::{ImageError, PixelImage};

#[derive(thiserror::Error, Debug)]
pub enum GridError {
    #[error("The grid does not contain a single image")]
    Empty,
    #[error("failed to convert grid cell due to {}", .0)]
    CellConversionError(#[from] ImageError),
    #[error("failed to write grid image due to {:?}", .0)]
    EncodingError(#[from] image::ImageError),
}

/// Labeled rows of images stitched into a single picture, one image per cell.
///
/// Every cell gets the size of the largest image in the grid so inputs and outputs of
/// different resolutions line up column by column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonGrid {
    pub title: String,
    rows: Vec<(String, Vec<PixelImage>)>,
}

impl ComparisonGrid {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rows: vec![],
        }
    }

    /// Adds a row; empty rows are ignored.
    pub fn with_row(mut self, label: impl Into<String>, images: Vec<PixelImage>) -> Self {
        if !images.is_empty() {
            self.rows.push((label.into(), images));
        }
        self
    }

    pub fn rows(&self) -> &[(String, Vec<PixelImage>)] {
        &self.rows
    }

    pub fn columns(&self) -> usize {
        self.rows.iter().map(|(_, r)| r.len()).max().unwrap_or(0)
    }

    pub fn render(&self) -> Result<DynamicImage, GridError> {
        let columns = self.columns();
        if columns == 0 {
            return Err(GridError::Empty);
        }
        let images = self.rows.iter().flat_map(|(_, r)| r.iter());
        let cell_h = images.clone().map(|i| i.shape().height).max().unwrap_or(1) as u32;
        let cell_w = images.clone().map(|i| i.shape().width).max().unwrap_or(1) as u32;
        let color = images.clone().any(|i| i.shape().channels == 3);

        let height = cell_h * self.rows.len() as u32;
        let width = cell_w * columns as u32;
        let mut canvas = if color {
            DynamicImage::new_rgb8(width, height)
        } else {
            DynamicImage::new_luma8(width, height)
        };

        for (row, (_, images)) in self.rows.iter().enumerate() {
            for (col, image) in images.iter().enumerate() {
                let cell = image
                    .clone()
                    .into_dynamic_image()?
                    .resize_exact(cell_w, cell_h, FilterType::Nearest);
                let cell = if color {
                    DynamicImage::ImageRgb8(cell.to_rgb8())
                } else {
                    DynamicImage::ImageLuma8(cell.to_luma8())
                };
                image::imageops::replace(
                    &mut canvas,
                    &cell,
                    (col as u32 * cell_w) as i64,
                    (row as u32 * cell_h) as i64,
                );
            }
        }
        Ok(canvas)
    }

    pub fn save(&self, path: &Path) -> Result<DynamicImage, GridError> {
        let rendered = self.render()?;
        rendered.save(path)?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face_database::face_image::ImageShape;

    fn gray(size: usize, value: u8) -> PixelImage {
        PixelImage::new(vec![value; size * size], ImageShape::new(size, size, 1)).unwrap()
    }

    #[test]
    fn cells_take_the_largest_size() {
        let grid = ComparisonGrid::new("test")
            .with_row("x", vec![gray(4, 10), gray(4, 20), gray(4, 30)])
            .with_row("y", vec![gray(2, 200), gray(2, 210)]);

        let rendered = grid.render().unwrap().to_luma8();
        assert_eq!(rendered.dimensions(), (12, 8));
        assert_eq!(rendered.get_pixel(9, 0).0, [30]);
        assert_eq!(rendered.get_pixel(7, 7).0, [210]);
        // missing cell stays black
        assert_eq!(rendered.get_pixel(11, 7).0, [0]);
    }

    #[test]
    fn empty_rows_are_skipped() {
        let grid = ComparisonGrid::new("test")
            .with_row("x", vec![gray(2, 1)])
            .with_row("y", vec![]);
        assert_eq!(grid.rows().len(), 1);
        assert!(matches!(ComparisonGrid::new("none").render(), Err(GridError::Empty)));
    }

    #[test]
    fn mixed_channels_render_in_color() {
        let rgb = PixelImage::new(vec![255; 12], ImageShape::new(2, 2, 3)).unwrap();
        let grid = ComparisonGrid::new("mixed")
            .with_row("x", vec![rgb])
            .with_row("y", vec![gray(2, 0)]);
        assert!(matches!(grid.render().unwrap(), DynamicImage::ImageRgb8(_)));
    }
}
