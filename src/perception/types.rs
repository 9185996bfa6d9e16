use std::sync::Arc;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SteadyhandError, SteadyhandResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Size of the captured surface before scaling into image space.
    pub source_width: u32,
    pub source_height: u32,
}

/// A fixed-resolution frame in image space, as shown to the oracle.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub image: Arc<image::RgbaImage>,
    pub meta: SnapshotMeta,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(image: image::RgbaImage, meta: SnapshotMeta) -> Self {
        Self {
            image: Arc::new(image),
            meta,
            captured_at: Utc::now(),
        }
    }

    /// A flat grey frame; used when nothing better is available.
    pub fn blank(width: u32, height: u32) -> Self {
        let image = image::RgbaImage::from_pixel(width, height, image::Rgba([128, 128, 128, 255]));
        Self::new(
            image,
            SnapshotMeta {
                source_width: width,
                source_height: height,
            },
        )
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_png(&self) -> SteadyhandResult<Vec<u8>> {
        let mut out = Vec::new();
        image::DynamicImage::ImageRgba8((*self.image).clone())
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .map_err(|e| SteadyhandError::Perception(format!("PNG encode: {e}")))?;
        Ok(out)
    }

    /// `data:` URL ready for an `image_url` content part.
    pub fn to_data_url(&self) -> SteadyhandResult<String> {
        let png = self.to_png()?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_is_png() {
        let snap = Snapshot::blank(8, 4);
        assert_eq!(snap.dimensions(), (8, 4));
        let url = snap.to_data_url().unwrap();
        assert!(url.starts_with("data:image/png;base64,iVBOR"));
    }
}
