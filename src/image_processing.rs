// Raster artifacts and their rescaling to the printer's tape width

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

use crate::errors::ScaleError;

/// A rendered ticket held as PNG bytes plus its pixel dimensions. Owned by
/// a single print job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    png: Vec<u8>,
    width: u32,
    height: u32,
}

impl RenderedArtifact {
    pub fn from_image(image: &DynamicImage) -> Result<Self, image::ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png)?;
        Ok(RenderedArtifact {
            png: buffer.into_inner(),
            width: image.width(),
            height: image.height(),
        })
    }

    pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory_with_format(&self.png, ImageFormat::Png)
    }

    pub fn png_bytes(&self) -> &[u8] {
        &self.png
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Computes the size an artifact takes on tape `target_width` pixels wide.
///
/// The tape feeds perpendicular to the rendered page, so the printer's
/// width constrains the image's *height*: the result is
/// `(round(width * target / height), target)`.
pub fn scaled_dimensions(width: u32, height: u32, target_width: u32) -> Result<(u32, u32), ScaleError> {
    if width == 0 || height == 0 || target_width == 0 {
        return Err(ScaleError::InvalidDimensions { width, height });
    }

    let ratio = f64::from(target_width) / f64::from(height);
    let new_width = (f64::from(width) * ratio).round().max(1.0) as u32;
    let new_height = (f64::from(height) * ratio).round() as u32;
    Ok((new_width, new_height))
}

pub struct ArtifactScaler {
    filter: FilterType,
}

impl Default for ArtifactScaler {
    fn default() -> Self {
        ArtifactScaler {
            filter: FilterType::Lanczos3,
        }
    }
}

impl ArtifactScaler {
    pub fn new(filter: FilterType) -> Self {
        ArtifactScaler { filter }
    }

    /// Rescales `artifact` to the probed tape width, keeping its aspect
    /// ratio. `None` means no width was ever probed.
    pub fn scale(
        &self,
        artifact: &RenderedArtifact,
        target_width: Option<u32>,
    ) -> Result<RenderedArtifact, ScaleError> {
        let target_width = target_width.ok_or(ScaleError::WidthUnavailable)?;
        let (new_width, new_height) =
            scaled_dimensions(artifact.width, artifact.height, target_width)?;

        if (new_width, new_height) == (artifact.width, artifact.height) {
            return Ok(artifact.clone());
        }

        let resized = artifact
            .decode()?
            .resize_exact(new_width, new_height, self.filter);
        Ok(RenderedArtifact::from_image(&resized)?)
    }
}
