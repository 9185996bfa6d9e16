// Screen capture scaled into image space.
use async_trait::async_trait;
use image::imageops::FilterType;

use crate::errors::{SteadyhandError, SteadyhandResult};
use crate::perception::types::{Snapshot, SnapshotMeta};

/// Source of fresh frames for the oracle.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn capture(&self) -> SteadyhandResult<Snapshot>;
}

/// Captures a monitor with xcap and resizes it to the configured image size.
#[derive(Debug, Clone)]
pub struct ScreenCapture {
    image_width: u32,
    image_height: u32,
    /// `None` selects the primary monitor.
    monitor: Option<usize>,
}

impl ScreenCapture {
    pub fn new(image_width: u32, image_height: u32, monitor: Option<usize>) -> SteadyhandResult<Self> {
        if image_width == 0 || image_height == 0 {
            return Err(SteadyhandError::Config(
                "capture size must be non-zero".into(),
            ));
        }
        Ok(Self {
            image_width,
            image_height,
            monitor,
        })
    }

    fn capture_sync(monitor: Option<usize>) -> SteadyhandResult<image::RgbaImage> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| SteadyhandError::Perception(format!("enumerate monitors: {e}")))?;
        let selected = match monitor {
            Some(idx) => monitors.into_iter().nth(idx),
            None => {
                let mut all = monitors;
                let primary = all.iter().position(|m| m.is_primary());
                match primary {
                    Some(i) => Some(all.swap_remove(i)),
                    None => all.into_iter().next(),
                }
            }
        }
        .ok_or_else(|| SteadyhandError::Perception("no monitor available".into()))?;

        let shot = selected
            .capture_image()
            .map_err(|e| SteadyhandError::Perception(format!("capture: {e}")))?;
        let (w, h) = (shot.width(), shot.height());
        image::RgbaImage::from_raw(w, h, shot.into_raw())
            .ok_or_else(|| SteadyhandError::Perception("capture buffer size mismatch".into()))
    }
}

#[async_trait]
impl SnapshotProvider for ScreenCapture {
    async fn capture(&self) -> SteadyhandResult<Snapshot> {
        let monitor = self.monitor;
        let raw = tokio::task::spawn_blocking(move || Self::capture_sync(monitor))
            .await
            .map_err(|e| SteadyhandError::Perception(format!("capture task panicked: {e}")))??;

        let (source_width, source_height) = raw.dimensions();
        let scaled = image::imageops::resize(
            &raw,
            self.image_width,
            self.image_height,
            FilterType::Triangle,
        );
        tracing::debug!(
            source_width,
            source_height,
            width = self.image_width,
            height = self.image_height,
            "snapshot captured"
        );
        Ok(Snapshot::new(
            scaled,
            SnapshotMeta {
                source_width,
                source_height,
            },
        ))
    }
}
