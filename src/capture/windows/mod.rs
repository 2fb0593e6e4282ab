//! Windows backend: Windows.Graphics.Capture frames presented into a DXGI
//! composition swap chain shown by a DirectComposition visual

mod composition;
mod d3d;
mod graphics_capture;

pub use composition::WindowsVisual;
pub use d3d::{SwapChainHandle, WindowsDevice, WindowsSurface};
pub use graphics_capture::{WindowsFrame, WindowsItem, WindowsProducer};

use windows::Graphics::Capture::GraphicsCaptureSession;

use crate::capture::traits::{BackendCapabilities, CaptureBackend};
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::FrameSignal;
use crate::types::{CaptureConfig, CaptureSource, Size};

/// Hardware capture backend for Windows 10 1903 and later
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsBackend;

impl WindowsBackend {
    /// Fails when Windows.Graphics.Capture is unavailable
    pub fn new() -> CaptureResult<Self> {
        if !Self::is_supported() {
            return Err(CaptureError::PlatformError(
                "Windows.Graphics.Capture is not supported on this system".to_string(),
            ));
        }
        Ok(Self)
    }

    pub fn is_supported() -> bool {
        GraphicsCaptureSession::IsSupported().unwrap_or(false)
    }
}

impl CaptureBackend for WindowsBackend {
    type Device = WindowsDevice;
    type Item = WindowsItem;
    type Frame = WindowsFrame;
    type Producer = WindowsProducer;
    type Surface = WindowsSurface;
    type Visual = WindowsVisual;

    fn name(&self) -> &'static str {
        "Windows Graphics Capture"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_cursor_toggle: true,
            supports_border_toggle: true,
            hardware_accelerated: true,
        }
    }

    fn create_device(&self) -> CaptureResult<WindowsDevice> {
        WindowsDevice::create()
    }

    fn resolve_source(&self, source: &CaptureSource) -> CaptureResult<WindowsItem> {
        WindowsItem::resolve(source)
    }

    fn create_surface(&self, device: &WindowsDevice, size: Size) -> CaptureResult<WindowsSurface> {
        WindowsSurface::create(device, size)
    }

    fn create_producer(
        &self,
        device: &WindowsDevice,
        item: &WindowsItem,
        size: Size,
        config: &CaptureConfig,
        signal: FrameSignal,
    ) -> CaptureResult<WindowsProducer> {
        WindowsProducer::create(device, item, size, config, signal)
    }
}
