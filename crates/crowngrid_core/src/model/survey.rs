//! Survey-side records: imported images and crown annotations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier of an imported survey image.
pub type ImageId = Uuid;

/// Stable identifier of a crown annotation.
pub type AnnotationId = Uuid;

/// One imported survey image.
///
/// `flight_altitude` stays `None` until it is parsed from the filename or
/// entered manually.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyImage {
    pub image_id: ImageId,
    pub path: String,
    pub flight_altitude: Option<f64>,
}

/// A rotated-ellipse crown annotation on a survey image.
///
/// `(x0, y0)` is the centre in pixels, `a`/`b` are the semi-axes and
/// `theta` the rotation in degrees. The crop geometry ignores `theta` and
/// uses the axis-aligned box spanned by the semi-axes.
#[derive(Debug, Clone, PartialEq)]
pub struct EllipseAnnotation {
    pub annotation_id: AnnotationId,
    pub image_id: ImageId,
    pub tree_id: String,
    pub x0: f64,
    pub y0: f64,
    pub a: f64,
    pub b: f64,
    pub theta: f64,
}

impl EllipseAnnotation {
    pub fn new(
        image_id: ImageId,
        tree_id: impl Into<String>,
        x0: f64,
        y0: f64,
        a: f64,
        b: f64,
        theta: f64,
    ) -> Self {
        Self {
            annotation_id: Uuid::new_v4(),
            image_id,
            tree_id: tree_id.into(),
            x0,
            y0,
            a,
            b,
            theta,
        }
    }

    /// Axis-aligned crop box of the ellipse plus `padding_px`, clamped to the
    /// image bounds. Returns `None` when the clamped box has zero area, i.e.
    /// the annotation lies entirely outside the image.
    pub fn padded_crop_box(
        &self,
        padding_px: u32,
        image_width: u32,
        image_height: u32,
    ) -> Option<CropBox> {
        let pad = f64::from(padding_px);
        let xmin = clamp_coord((self.x0 - self.a - pad).floor(), image_width);
        let xmax = clamp_coord((self.x0 + self.a + pad).ceil(), image_width);
        let ymin = clamp_coord((self.y0 - self.b - pad).floor(), image_height);
        let ymax = clamp_coord((self.y0 + self.b + pad).ceil(), image_height);
        if xmax <= xmin || ymax <= ymin {
            return None;
        }
        Some(CropBox {
            xmin,
            ymin,
            xmax,
            ymax,
        })
    }
}

fn clamp_coord(value: f64, upper: u32) -> u32 {
    if value <= 0.0 {
        0
    } else if value >= f64::from(upper) {
        upper
    } else {
        value as u32
    }
}

/// Pixel-space crop rectangle, `xmax`/`ymax` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox {
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl CropBox {
    pub fn width(&self) -> u32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> u32 {
        self.ymax - self.ymin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(x0: f64, y0: f64, a: f64, b: f64) -> EllipseAnnotation {
        EllipseAnnotation::new(Uuid::new_v4(), "t1", x0, y0, a, b, 0.0)
    }

    #[test]
    fn crop_box_applies_padding_and_clamps() {
        let ann = annotation(50.0, 40.0, 10.0, 8.0);
        let boxed = ann.padded_crop_box(5, 100, 100).unwrap();
        assert_eq!(boxed.xmin, 35);
        assert_eq!(boxed.xmax, 65);
        assert_eq!(boxed.ymin, 27);
        assert_eq!(boxed.ymax, 53);
    }

    #[test]
    fn crop_box_clamps_to_image_bounds() {
        let ann = annotation(2.0, 2.0, 10.0, 10.0);
        let boxed = ann.padded_crop_box(4, 30, 20).unwrap();
        assert_eq!(boxed.xmin, 0);
        assert_eq!(boxed.ymin, 0);
        assert_eq!(boxed.xmax, 16);
        assert_eq!(boxed.ymax, 16);
    }

    #[test]
    fn crop_box_outside_image_is_rejected() {
        let ann = annotation(500.0, 500.0, 5.0, 5.0);
        assert!(ann.padded_crop_box(2, 100, 100).is_none());
    }
}
