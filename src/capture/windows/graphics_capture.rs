//! Windows.Graphics.Capture items, frames and the free-threaded frame pool

use windows::Foundation::{EventRegistrationToken, TypedEventHandler};
use windows::Graphics::Capture::{
    Direct3D11CaptureFrame, Direct3D11CaptureFramePool, GraphicsCaptureItem,
    GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DSurface;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::HMONITOR;
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;

use super::d3d::{map_error, WindowsDevice};
use crate::capture::traits::{CaptureItem, CapturedFrame, FrameProducer};
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::FrameSignal;
use crate::types::{CaptureConfig, CaptureSource, Size, FRAME_BUFFER_COUNT};

fn to_size(size: SizeInt32) -> Size {
    Size::new(size.Width.max(0) as u32, size.Height.max(0) as u32)
}

fn to_size_int32(size: Size) -> SizeInt32 {
    SizeInt32 {
        Width: size.width as i32,
        Height: size.height as i32,
    }
}

/// A window or monitor resolved through the capture interop factory
pub struct WindowsItem {
    item: GraphicsCaptureItem,
}

// SAFETY: GraphicsCaptureItem is an agile WinRT object.
unsafe impl Send for WindowsItem {}

impl WindowsItem {
    pub fn resolve(source: &CaptureSource) -> CaptureResult<Self> {
        let interop: IGraphicsCaptureItemInterop =
            windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
                .map_err(|e| map_error("IGraphicsCaptureItemInterop factory", e))?;

        let item: GraphicsCaptureItem = unsafe {
            match source {
                CaptureSource::Window(handle) => interop
                    .CreateForWindow(HWND(handle.0 as _))
                    .map_err(|e| map_error("CreateForWindow", e))?,
                CaptureSource::Monitor(handle) => interop
                    .CreateForMonitor(HMONITOR(handle.0 as _))
                    .map_err(|e| map_error("CreateForMonitor", e))?,
            }
        };

        Ok(Self { item })
    }
}

impl CaptureItem for WindowsItem {
    fn size(&self) -> CaptureResult<Size> {
        self.item
            .Size()
            .map(to_size)
            .map_err(|e| map_error("GraphicsCaptureItem::Size", e))
    }
}

/// Frame taken from the pool; closing it hands the buffer back
pub struct WindowsFrame {
    frame: Direct3D11CaptureFrame,
    size: Size,
}

// SAFETY: frames come from a free-threaded pool.
unsafe impl Send for WindowsFrame {}

impl WindowsFrame {
    pub(crate) fn surface(&self) -> CaptureResult<IDirect3DSurface> {
        self.frame
            .Surface()
            .map_err(|e| map_error("Direct3D11CaptureFrame::Surface", e))
    }

    pub(crate) fn size(&self) -> Size {
        self.size
    }
}

impl CapturedFrame for WindowsFrame {
    fn content_size(&self) -> Size {
        self.size
    }
}

impl Drop for WindowsFrame {
    fn drop(&mut self) {
        let _ = self.frame.Close();
    }
}

/// Free-threaded frame pool plus its capture session
pub struct WindowsProducer {
    pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    device: windows::Graphics::DirectX::Direct3D11::IDirect3DDevice,
    token: Option<EventRegistrationToken>,
    started: bool,
}

// SAFETY: the pool is created free-threaded and the session is agile.
unsafe impl Send for WindowsProducer {}

impl WindowsProducer {
    pub fn create(
        device: &WindowsDevice,
        item: &WindowsItem,
        size: Size,
        config: &CaptureConfig,
        signal: FrameSignal,
    ) -> CaptureResult<Self> {
        let pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &device.direct3d,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            FRAME_BUFFER_COUNT as i32,
            to_size_int32(size),
        )
        .map_err(|e| map_error("CreateFreeThreaded frame pool", e))?;

        let session = pool
            .CreateCaptureSession(&item.item)
            .map_err(|e| map_error("CreateCaptureSession", e))?;

        // Both toggles need newer Windows builds; older ones keep the defaults.
        if let Err(e) = session.SetIsCursorCaptureEnabled(config.include_cursor) {
            log::debug!("cursor capture toggle unavailable: {}", e.message());
        }
        if let Err(e) = session.SetIsBorderRequired(config.border_required) {
            log::debug!("capture border toggle unavailable: {}", e.message());
        }

        let token = pool
            .FrameArrived(&TypedEventHandler::new(
                move |_: &Option<Direct3D11CaptureFramePool>, _| {
                    signal.notify();
                    Ok(())
                },
            ))
            .map_err(|e| map_error("FrameArrived", e))?;

        Ok(Self {
            pool,
            session,
            device: device.direct3d.clone(),
            token: Some(token),
            started: false,
        })
    }
}

impl FrameProducer for WindowsProducer {
    type Frame = WindowsFrame;

    fn start(&mut self) -> CaptureResult<()> {
        if self.token.is_none() {
            return Err(CaptureError::device("frame pool is closed"));
        }
        if self.started {
            return Ok(());
        }
        self.session
            .StartCapture()
            .map_err(|e| map_error("StartCapture", e))?;
        self.started = true;
        Ok(())
    }

    fn try_next_frame(&mut self) -> Option<WindowsFrame> {
        let frame = self.pool.TryGetNextFrame().ok()?;
        match frame.ContentSize() {
            Ok(size) => Some(WindowsFrame {
                frame,
                size: to_size(size),
            }),
            Err(e) => {
                log::warn!("frame without content size: {}", e.message());
                let _ = frame.Close();
                None
            }
        }
    }

    fn recreate(&mut self, size: Size) -> CaptureResult<()> {
        self.pool
            .Recreate(
                &self.device,
                DirectXPixelFormat::B8G8R8A8UIntNormalized,
                FRAME_BUFFER_COUNT as i32,
                to_size_int32(size),
            )
            .map_err(|e| map_error("Direct3D11CaptureFramePool::Recreate", e))
    }

    fn close(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        if let Err(e) = self.pool.RemoveFrameArrived(token) {
            log::warn!("failed to unregister frame handler: {}", e.message());
        }
        let _ = self.session.Close();
        let _ = self.pool.Close();
    }
}

impl Drop for WindowsProducer {
    fn drop(&mut self) {
        self.close();
    }
}
