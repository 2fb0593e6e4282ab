//! Crop/scale transform computation
//!
//! The visual shows the source stretched to the full display. [`AreaTransform`]
//! computes the extra transform that moves a crop rectangle's origin to the
//! display origin and magnifies it until exactly its extent fills the display.

use std::fmt;

use crate::error::{CaptureError, CaptureResult};
use crate::types::{CaptureArea, Size};

/// 2D affine transform in the 3x2 row-vector convention
///
/// A point `(x, y)` maps to `(x*m11 + y*m21 + m31, x*m12 + y*m22 + m32)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub m11: f64,
    pub m12: f64,
    pub m21: f64,
    pub m22: f64,
    pub m31: f64,
    pub m32: f64,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        m11: 1.0,
        m12: 0.0,
        m21: 0.0,
        m22: 1.0,
        m31: 0.0,
        m32: 0.0,
    };

    pub fn translation(x: f64, y: f64) -> Self {
        Self {
            m31: x,
            m32: y,
            ..Self::IDENTITY
        }
    }

    pub fn scale(x: f64, y: f64) -> Self {
        Self {
            m11: x,
            m22: y,
            ..Self::IDENTITY
        }
    }

    /// Apply `self` first, then `next`
    pub fn then(&self, next: &Transform) -> Transform {
        Transform {
            m11: self.m11 * next.m11 + self.m12 * next.m21,
            m12: self.m11 * next.m12 + self.m12 * next.m22,
            m21: self.m21 * next.m11 + self.m22 * next.m21,
            m22: self.m21 * next.m12 + self.m22 * next.m22,
            m31: self.m31 * next.m11 + self.m32 * next.m21 + next.m31,
            m32: self.m31 * next.m12 + self.m32 * next.m22 + next.m32,
        }
    }

    pub fn transform_point(&self, x: f64, y: f64) -> (f64, f64) {
        (
            x * self.m11 + y * self.m21 + self.m31,
            x * self.m12 + y * self.m22 + self.m32,
        )
    }

    pub fn invert(&self) -> Option<Transform> {
        let det = self.m11 * self.m22 - self.m12 * self.m21;
        if det == 0.0 || !det.is_finite() {
            return None;
        }

        Some(Transform {
            m11: self.m22 / det,
            m12: -self.m12 / det,
            m21: -self.m21 / det,
            m22: self.m11 / det,
            m31: (self.m21 * self.m32 - self.m22 * self.m31) / det,
            m32: (self.m12 * self.m31 - self.m11 * self.m32) / det,
        })
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Horizontal scale factor (no rotation or skew is ever produced here)
    pub fn scale_x(&self) -> f64 {
        self.m11
    }

    pub fn scale_y(&self) -> f64 {
        self.m22
    }

    pub fn translation_xy(&self) -> (f64, f64) {
        (self.m31, self.m32)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.4} {:.4}; {:.4} {:.4}; {:.4} {:.4}]",
            self.m11, self.m12, self.m21, self.m22, self.m31, self.m32
        )
    }
}

/// Stateless crop/scale computation
pub struct AreaTransform;

impl AreaTransform {
    /// Transform that makes `area` of the source fill the whole display.
    ///
    /// Applied in display space, on top of the stretch-to-fill placement of the
    /// full source. Without an area the result is identity.
    pub fn compute(
        area: Option<&CaptureArea>,
        source: Size,
        display: Size,
    ) -> CaptureResult<Transform> {
        if source.is_empty() {
            return Err(CaptureError::invalid(format!(
                "source size must be non-zero, got {}",
                source
            )));
        }
        if display.is_empty() {
            return Err(CaptureError::invalid(format!(
                "display size must be non-zero, got {}",
                display
            )));
        }

        let Some(area) = area else {
            return Ok(Transform::IDENTITY);
        };
        area.validate_within(source)?;

        let sx = display.width as f64 / source.width as f64;
        let sy = display.height as f64 / source.height as f64;

        let translate =
            Transform::translation(-(area.x_offset as f64) * sx, -(area.y_offset as f64) * sy);
        let magnify = Transform::scale(
            source.width as f64 / area.width as f64,
            source.height as f64 / area.height as f64,
        );

        Ok(translate.then(&magnify))
    }

    /// Stretch-to-fill mapping of source pixels onto display pixels (aspect ratio not kept)
    pub fn stretch(source: Size, display: Size) -> CaptureResult<Transform> {
        if source.is_empty() {
            return Err(CaptureError::invalid(format!(
                "source size must be non-zero, got {}",
                source
            )));
        }
        Ok(Transform::scale(
            display.width as f64 / source.width as f64,
            display.height as f64 / source.height as f64,
        ))
    }

    /// Full source-pixel to display-pixel mapping: stretch, then crop transform
    pub fn effective(
        area: Option<&CaptureArea>,
        source: Size,
        display: Size,
    ) -> CaptureResult<Transform> {
        let crop = Self::compute(area, source, display)?;
        Ok(Self::stretch(source, display)?.then(&crop))
    }
}

/// Everything a visual needs to place its content
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContentPlacement {
    /// Native size of the bound surface content
    pub content_size: Size,
    pub display_size: Size,
    /// Crop transform, in display space
    pub transform: Transform,
}

impl ContentPlacement {
    /// Stretch-to-fill followed by the crop transform
    pub fn effective(&self) -> CaptureResult<Transform> {
        Ok(AreaTransform::stretch(self.content_size, self.display_size)?.then(&self.transform))
    }
}
