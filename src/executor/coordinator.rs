// Image-space <-> surface-space coordinate mapping.
use crate::errors::{SteadyhandError, SteadyhandResult};

/// Dimensions of the snapshot the oracle sees and of the surface being driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ViewportMapping {
    pub image_width: u32,
    pub image_height: u32,
    pub surface_width: u32,
    pub surface_height: u32,
}

impl ViewportMapping {
    pub fn new(
        image_width: u32,
        image_height: u32,
        surface_width: u32,
        surface_height: u32,
    ) -> SteadyhandResult<Self> {
        if image_width == 0 || image_height == 0 || surface_width == 0 || surface_height == 0 {
            return Err(SteadyhandError::Config(format!(
                "viewport mapping needs non-zero dimensions (image {image_width}x{image_height}, \
                 surface {surface_width}x{surface_height})"
            )));
        }
        Ok(Self {
            image_width,
            image_height,
            surface_width,
            surface_height,
        })
    }
}

/// Pure linear scaling between the two spaces. No clamping, no rounding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
    mapping: ViewportMapping,
    sx: f64,
    sy: f64,
}

impl CoordinateMapper {
    pub fn new(mapping: ViewportMapping) -> SteadyhandResult<Self> {
        // Re-check: the fields are public and may have been built by hand.
        let mapping = ViewportMapping::new(
            mapping.image_width,
            mapping.image_height,
            mapping.surface_width,
            mapping.surface_height,
        )?;
        Ok(Self {
            mapping,
            sx: mapping.surface_width as f64 / mapping.image_width as f64,
            sy: mapping.surface_height as f64 / mapping.image_height as f64,
        })
    }

    pub fn mapping(&self) -> ViewportMapping {
        self.mapping
    }

    /// Recompute for a resized surface; the image space is unchanged.
    pub fn with_surface(&self, surface_width: u32, surface_height: u32) -> SteadyhandResult<Self> {
        Self::new(ViewportMapping {
            surface_width,
            surface_height,
            ..self.mapping
        })
    }

    pub fn to_surface(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.sx, y * self.sy)
    }

    pub fn to_image(&self, x: f64, y: f64) -> (f64, f64) {
        (x / self.sx, y / self.sy)
    }

    /// `to_surface` rounded to whole pixels.
    pub fn to_surface_px(&self, x: f64, y: f64) -> (i32, i32) {
        let (sx, sy) = self.to_surface(x, y);
        (sx.round() as i32, sy.round() as i32)
    }

    pub fn to_image_px(&self, x: f64, y: f64) -> (i32, i32) {
        let (ix, iy) = self.to_image(x, y);
        (ix.round() as i32, iy.round() as i32)
    }
}

/// Named anchor points on a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePosition {
    Center,
    Top,
    Bottom,
    Left,
    Right,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl RelativePosition {
    pub const ALL: [RelativePosition; 9] = [
        RelativePosition::Center,
        RelativePosition::Top,
        RelativePosition::Bottom,
        RelativePosition::Left,
        RelativePosition::Right,
        RelativePosition::TopLeft,
        RelativePosition::TopRight,
        RelativePosition::BottomLeft,
        RelativePosition::BottomRight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RelativePosition::Center => "center",
            RelativePosition::Top => "top",
            RelativePosition::Bottom => "bottom",
            RelativePosition::Left => "left",
            RelativePosition::Right => "right",
            RelativePosition::TopLeft => "top-left",
            RelativePosition::TopRight => "top-right",
            RelativePosition::BottomLeft => "bottom-left",
            RelativePosition::BottomRight => "bottom-right",
        }
    }

    pub fn resolve(self, width: u32, height: u32) -> (u32, u32) {
        let (cx, cy) = (width / 2, height / 2);
        match self {
            RelativePosition::Center => (cx, cy),
            RelativePosition::Top => (cx, 0),
            RelativePosition::Bottom => (cx, height),
            RelativePosition::Left => (0, cy),
            RelativePosition::Right => (width, cy),
            RelativePosition::TopLeft => (0, 0),
            RelativePosition::TopRight => (width, 0),
            RelativePosition::BottomLeft => (0, height),
            RelativePosition::BottomRight => (width, height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(iw: u32, ih: u32, sw: u32, sh: u32) -> CoordinateMapper {
        CoordinateMapper::new(ViewportMapping::new(iw, ih, sw, sh).unwrap()).unwrap()
    }

    #[test]
    fn zero_dimension_is_a_config_error() {
        assert!(matches!(
            ViewportMapping::new(1000, 0, 800, 600),
            Err(SteadyhandError::Config(_))
        ));
        let hand_built = ViewportMapping {
            image_width: 1000,
            image_height: 600,
            surface_width: 0,
            surface_height: 600,
        };
        assert!(CoordinateMapper::new(hand_built).is_err());
    }

    #[test]
    fn scales_linearly() {
        let m = mapper(1000, 1000, 1920, 1080);
        assert_eq!(m.to_surface(500.0, 500.0), (960.0, 540.0));
        assert_eq!(m.to_image(960.0, 540.0), (500.0, 500.0));
        assert_eq!(m.to_surface_px(1.0, 1.0), (2, 1));
    }

    #[test]
    fn round_trip_stays_within_one_pixel() {
        let m = mapper(1000, 600, 1366, 768);
        for x in (0..=1000).step_by(37) {
            for y in (0..=600).step_by(23) {
                let (sx, sy) = m.to_surface_px(x as f64, y as f64);
                let (ix, iy) = m.to_image_px(sx as f64, sy as f64);
                let (rx, ry) = m.to_surface_px(ix as f64, iy as f64);
                assert!((rx - sx).abs() <= 1, "x drift at ({x}, {y})");
                assert!((ry - sy).abs() <= 1, "y drift at ({x}, {y})");
            }
        }
    }

    #[test]
    fn resize_keeps_image_space() {
        let m = mapper(1000, 600, 1000, 600).with_surface(2000, 1200).unwrap();
        assert_eq!(m.mapping().image_width, 1000);
        assert_eq!(m.to_surface(10.0, 10.0), (20.0, 20.0));
    }

    #[test]
    fn relative_positions_resolve() {
        assert_eq!(RelativePosition::Center.resolve(800, 600), (400, 300));
        assert_eq!(RelativePosition::BottomRight.resolve(800, 600), (800, 600));
        assert_eq!(RelativePosition::TopLeft.name(), "top-left");
    }
}
