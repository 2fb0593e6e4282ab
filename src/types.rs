//! Core types shared by capture sessions, the compositor and the backends

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{CaptureError, CaptureResult};
use crate::transform::Transform;

/// Number of back buffers in the presentable surface and the frame producer pool
pub const FRAME_BUFFER_COUNT: usize = 2;

/// Opacity steps offered by the host shell
pub const OPACITY_PRESETS: [f32; 4] = [1.0, 0.75, 0.5, 0.25];

/// Pixel dimensions of a source or a display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// True when either dimension is zero
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get the total pixel count
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Sub-rectangle of the source, in source pixels, that is magnified to fill the display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureArea {
    pub x_offset: i32,
    pub y_offset: i32,
    pub width: u32,
    pub height: u32,
}

impl CaptureArea {
    pub const fn new(x_offset: i32, y_offset: i32, width: u32, height: u32) -> Self {
        Self {
            x_offset,
            y_offset,
            width,
            height,
        }
    }

    /// Area covering the whole of a source of the given size
    pub fn full(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Reject zero-sized areas
    pub fn validate(&self) -> CaptureResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::invalid(format!(
                "capture area must have a non-zero size, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Reject areas that do not lie inside a source of the given size
    pub fn validate_within(&self, source: Size) -> CaptureResult<()> {
        self.validate()?;

        let right = self.x_offset as i64 + self.width as i64;
        let bottom = self.y_offset as i64 + self.height as i64;
        if self.x_offset < 0
            || self.y_offset < 0
            || right > source.width as i64
            || bottom > source.height as i64
        {
            return Err(CaptureError::invalid(format!(
                "capture area {} exceeds source bounds {}",
                self, source
            )));
        }
        Ok(())
    }

    /// Get the area size
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl fmt::Display for CaptureArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.x_offset, self.y_offset
        )
    }
}

/// Raw platform window handle (HWND on Windows)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// Raw platform monitor handle (HMONITOR on Windows)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorHandle(pub isize);

/// A window or monitor designated as the frame-content origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureSource {
    Window(WindowHandle),
    Monitor(MonitorHandle),
}

impl CaptureSource {
    pub fn window(handle: isize) -> Self {
        CaptureSource::Window(WindowHandle(handle))
    }

    pub fn monitor(handle: isize) -> Self {
        CaptureSource::Monitor(MonitorHandle(handle))
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Window(h) => write!(f, "window {:#x}", h.0),
            CaptureSource::Monitor(h) => write!(f, "monitor {:#x}", h.0),
        }
    }
}

/// Pixel format for raw image data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Blue, Green, Red, Alpha (8 bits per channel), premultiplied
    BGRA8,
    /// Red, Green, Blue, Alpha (8 bits per channel), premultiplied
    RGBA8,
}

impl PixelFormat {
    /// Get the number of bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        4
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::BGRA8 => write!(f, "BGRA8"),
            PixelFormat::RGBA8 => write!(f, "RGBA8"),
        }
    }
}

/// Raw image data container
#[derive(Debug, Clone, PartialEq)]
pub struct RawImage {
    /// Pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Pixel format
    pub format: PixelFormat,
    /// Stride (bytes per row)
    pub stride: usize,
}

impl RawImage {
    /// Create a new RawImage
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = (width as usize) * format.bytes_per_pixel();
        Self {
            data,
            width,
            height,
            format,
            stride,
        }
    }

    /// Image filled with a single pixel value
    pub fn filled(size: Size, format: PixelFormat, pixel: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(size.pixel_count() * 4);
        for _ in 0..size.pixel_count() {
            data.extend_from_slice(&pixel);
        }
        Self::new(data, size.width, size.height, format)
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Check if the image data is valid
    pub fn is_valid(&self) -> bool {
        let expected_size = self.stride * (self.height as usize);
        self.data.len() >= expected_size
    }

    /// Get a pixel at the given coordinates
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let offset = (y as usize) * self.stride + (x as usize) * self.format.bytes_per_pixel();
        let pixel_size = self.format.bytes_per_pixel();

        self.data.get(offset..offset + pixel_size)
    }
}

/// Capture configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Include the mouse cursor in captured frames
    pub include_cursor: bool,
    /// Ask the platform to draw its capture border around the source
    pub border_required: bool,
    /// Opacity applied to the visual when the compositor is created
    pub default_opacity: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            include_cursor: false,
            border_required: true,
            default_opacity: 1.0,
        }
    }
}

impl CaptureConfig {
    /// Borderless, cursor-less preset for overlay use
    pub fn overlay() -> Self {
        Self {
            border_required: false,
            ..Default::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> CaptureResult<()> {
        validate_opacity(self.default_opacity)
    }
}

/// Opacity must be a finite value in `[0.0, 1.0]`
pub fn validate_opacity(value: f32) -> CaptureResult<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(CaptureError::invalid(format!(
            "opacity must be within [0.0, 1.0], got {}",
            value
        )));
    }
    Ok(())
}

/// Identity of one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Allocate the next process-wide session id
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// Shared layout record: the current crop, sizes and the transform derived from them.
///
/// Lives behind a single lock that also serializes visual-tree writes between the
/// host thread and the frame worker.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Layout {
    pub area: Option<CaptureArea>,
    pub source_size: Option<Size>,
    pub display_size: Size,
    pub transform: Transform,
}

/// Per-session frame statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Frame callbacks dispatched by the worker
    pub callbacks: u64,
    pub frames_presented: u64,
    /// Callbacks that found no frame or an empty frame
    pub frames_skipped: u64,
    pub source_resizes: u64,
    pub producer_recreations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_validation() {
        assert!(CaptureArea::new(0, 0, 10, 10).validate().is_ok());
        assert!(CaptureArea::new(0, 0, 0, 10).validate().is_err());
        assert!(CaptureArea::new(0, 0, 10, 0).validate().is_err());
    }

    #[test]
    fn test_area_bounds() {
        let source = Size::new(1920, 1080);
        assert!(CaptureArea::new(960, 540, 960, 540)
            .validate_within(source)
            .is_ok());
        assert!(CaptureArea::full(source).validate_within(source).is_ok());
        assert!(CaptureArea::new(961, 540, 960, 540)
            .validate_within(source)
            .is_err());
        assert!(CaptureArea::new(-1, 0, 10, 10)
            .validate_within(source)
            .is_err());
    }

    #[test]
    fn test_raw_image_pixel_access() {
        let image = RawImage::filled(Size::new(4, 2), PixelFormat::BGRA8, [1, 2, 3, 255]);
        assert!(image.is_valid());
        assert_eq!(image.get_pixel(3, 1).unwrap(), &[1, 2, 3, 255]);
        assert!(image.get_pixel(4, 0).is_none());
    }

    #[test]
    fn test_config_defaults() {
        let config = CaptureConfig::default();
        assert!(!config.include_cursor);
        assert!(config.border_required);
        assert_eq!(config.default_opacity, 1.0);
        assert!(config.validate().is_ok());
        assert!(!CaptureConfig::overlay().border_required);
    }

    #[test]
    fn test_opacity_validation() {
        for preset in OPACITY_PRESETS {
            assert!(validate_opacity(preset).is_ok());
        }
        assert!(validate_opacity(0.0).is_ok());
        assert!(validate_opacity(1.5).is_err());
        assert!(validate_opacity(-0.1).is_err());
        assert!(validate_opacity(f32::NAN).is_err());
    }

    #[test]
    fn test_session_ids_increase() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(b > a);
    }
}
