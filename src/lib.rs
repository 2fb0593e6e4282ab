//! Always-on-top mirror core
//!
//! Continuously captures a window or monitor, presents each frame into a
//! double-buffered surface, and shows that surface through a composition
//! visual that can crop to a sub-area, scale to fill the host and fade.
//!
//! # Example
//!
//! ```no_run
//! use ontop_capture::{
//!     CaptureArea, CaptureCompositor, CaptureConfig, CaptureSource, Size, SoftwareBackend,
//!     SoftwareVisual,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = SoftwareBackend::new();
//! let source = CaptureSource::monitor(1);
//! let feeder = backend.register_source(source, Size::new(1920, 1080));
//!
//! let mut compositor = CaptureCompositor::new(
//!     backend,
//!     SoftwareVisual::new(),
//!     Size::new(960, 540),
//!     CaptureConfig::overlay(),
//! )?;
//!
//! // Mirror the bottom-right quadrant at half opacity
//! compositor.set_source(source, Some(CaptureArea::new(960, 540, 960, 540)))?;
//! compositor.set_opacity(0.5)?;
//!
//! feeder.push_frame(Size::new(1920, 1080), [0, 0, 255, 255])?;
//! for event in compositor.pump_events() {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod buffer_pool;
pub mod capture;
pub mod compositor;
pub mod error;
pub mod pipeline;
pub mod transform;
pub mod types;

// Re-export main types
pub use buffer_pool::{global_pool, BufferPool, PoolConfig, PoolStats, PooledBuffer};
pub use capture::{
    BackendCapabilities, CaptureBackend, CaptureSession, CompositionVisual, SessionEvent,
    SessionOptions, SoftwareBackend, SoftwareVisual, SourceFeeder,
};
pub use compositor::{CaptureCompositor, CompositorEvent, CompositorState, SessionState};
pub use error::{BufferPoolError, CaptureError, CaptureResult};
pub use transform::{AreaTransform, ContentPlacement, Transform};
pub use types::{
    CaptureArea, CaptureConfig, CaptureSource, Layout, PixelFormat, RawImage, SessionId,
    SessionStats, Size, FRAME_BUFFER_COUNT, OPACITY_PRESETS,
};

#[cfg(target_os = "windows")]
pub use capture::{WindowsBackend, WindowsVisual};

/// Get the library version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Capabilities of the default backend on this platform
pub fn capabilities() -> BackendCapabilities {
    #[cfg(target_os = "windows")]
    {
        if let Ok(backend) = WindowsBackend::new() {
            return backend.capabilities();
        }
    }

    SoftwareBackend::new().capabilities()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }

    #[test]
    #[cfg(not(target_os = "windows"))]
    fn test_software_capabilities() {
        let caps = capabilities();
        assert!(!caps.hardware_accelerated);
        assert!(!caps.supports_cursor_toggle);
    }
}
