//! Direct3D 11 device and the composition swap chain frames are presented into

use windows::core::{Interface, HRESULT};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Win32::Foundation::RO_E_CLOSED;
use windows::Win32::Graphics::Direct3D::D3D_DRIVER_TYPE_HARDWARE;
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D, D3D11_BOX,
    D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_ALPHA_MODE_PREMULTIPLIED, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory2, IDXGIDevice, IDXGIFactory2, IDXGISwapChain1, DXGI_CREATE_FACTORY_FLAGS,
    DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET, DXGI_PRESENT, DXGI_SCALING_STRETCH,
    DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FLAG, DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
    DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};

use super::graphics_capture::WindowsFrame;
use crate::capture::traits::PresentableSurface;
use crate::error::{CaptureError, CaptureResult};
use crate::types::{Size, FRAME_BUFFER_COUNT};

/// Map a platform error; removal, reset and closed objects end the session
pub(crate) fn map_error(context: &str, err: windows::core::Error) -> CaptureError {
    let code: HRESULT = err.code();
    let message = format!("{}: {}", context, err.message());
    if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET || code == RO_E_CLOSED
    {
        CaptureError::DeviceLost(message)
    } else {
        CaptureError::DeviceError(message)
    }
}

/// Hardware D3D11 device with its WinRT wrapper
pub struct WindowsDevice {
    pub(crate) d3d: ID3D11Device,
    pub(crate) context: ID3D11DeviceContext,
    pub(crate) direct3d: IDirect3DDevice,
}

// SAFETY: D3D11 devices are free-threaded. The immediate context is only used
// by the surface, whose access is serialized by the session's target lock.
unsafe impl Send for WindowsDevice {}

impl WindowsDevice {
    pub fn create() -> CaptureResult<Self> {
        let mut device: Option<ID3D11Device> = None;
        let mut context: Option<ID3D11DeviceContext> = None;

        unsafe {
            D3D11CreateDevice(
                None,
                D3D_DRIVER_TYPE_HARDWARE,
                None,
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )
            .map_err(|e| map_error("D3D11CreateDevice", e))?;
        }

        let d3d = device.ok_or_else(|| CaptureError::device("D3D11CreateDevice returned no device"))?;
        let context =
            context.ok_or_else(|| CaptureError::device("D3D11CreateDevice returned no context"))?;

        let dxgi: IDXGIDevice = d3d.cast().map_err(|e| map_error("cast IDXGIDevice", e))?;
        let direct3d: IDirect3DDevice = unsafe {
            CreateDirect3D11DeviceFromDXGIDevice(&dxgi)
                .and_then(|inspectable| inspectable.cast())
                .map_err(|e| map_error("CreateDirect3D11DeviceFromDXGIDevice", e))?
        };

        Ok(Self {
            d3d,
            context,
            direct3d,
        })
    }
}

/// Swap chain reference a DirectComposition visual uses as content
#[derive(Clone)]
pub struct SwapChainHandle(pub(crate) IDXGISwapChain1);

// SAFETY: the handle is only used to bind visual content on the host thread;
// DXGI swap chains may be referenced from any thread.
unsafe impl Send for SwapChainHandle {}

impl std::fmt::Debug for SwapChainHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SwapChainHandle").field(&self.0.as_raw()).finish()
    }
}

/// Two-buffer flip-sequential swap chain for composition, premultiplied BGRA
pub struct WindowsSurface {
    swap_chain: Option<IDXGISwapChain1>,
    handle: SwapChainHandle,
    context: ID3D11DeviceContext,
    size: Size,
}

// SAFETY: every use of the swap chain and the immediate context goes through
// `&mut self`, and the owning session serializes those calls.
unsafe impl Send for WindowsSurface {}

impl WindowsSurface {
    pub fn create(device: &WindowsDevice, size: Size) -> CaptureResult<Self> {
        let swap_chain = unsafe {
            let dxgi: IDXGIDevice = device
                .d3d
                .cast()
                .map_err(|e| map_error("cast IDXGIDevice", e))?;
            let factory: IDXGIFactory2 = CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0))
                .map_err(|e| map_error("CreateDXGIFactory2", e))?;

            let desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: size.width,
                Height: size.height,
                Format: DXGI_FORMAT_B8G8R8A8_UNORM,
                Stereo: false.into(),
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: FRAME_BUFFER_COUNT as u32,
                Scaling: DXGI_SCALING_STRETCH,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL,
                AlphaMode: DXGI_ALPHA_MODE_PREMULTIPLIED,
                Flags: 0,
            };

            factory
                .CreateSwapChainForComposition(&dxgi, &desc, None)
                .map_err(|e| map_error("CreateSwapChainForComposition", e))?
        };

        Ok(Self {
            handle: SwapChainHandle(swap_chain.clone()),
            swap_chain: Some(swap_chain),
            context: device.context.clone(),
            size,
        })
    }

    fn swap_chain(&self) -> CaptureResult<&IDXGISwapChain1> {
        self.swap_chain
            .as_ref()
            .ok_or_else(|| CaptureError::lost("swap chain already released"))
    }
}

impl PresentableSurface for WindowsSurface {
    type Frame = WindowsFrame;
    type Handle = SwapChainHandle;

    fn size(&self) -> Size {
        self.size
    }

    fn handle(&self) -> SwapChainHandle {
        self.handle.clone()
    }

    fn resize_buffers(&mut self, size: Size) -> CaptureResult<()> {
        let swap_chain = self.swap_chain()?;
        unsafe {
            swap_chain
                .ResizeBuffers(
                    FRAME_BUFFER_COUNT as u32,
                    size.width,
                    size.height,
                    DXGI_FORMAT_B8G8R8A8_UNORM,
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .map_err(|e| map_error("ResizeBuffers", e))?;
        }
        self.size = size;
        Ok(())
    }

    fn copy_frame(&mut self, frame: &WindowsFrame) -> CaptureResult<()> {
        let swap_chain = self.swap_chain()?;

        let source: ID3D11Texture2D = unsafe {
            frame
                .surface()?
                .cast::<IDirect3DDxgiInterfaceAccess>()
                .and_then(|access| access.GetInterface())
                .map_err(|e| map_error("frame texture", e))?
        };
        let back_buffer: ID3D11Texture2D = unsafe {
            swap_chain
                .GetBuffer(0)
                .map_err(|e| map_error("GetBuffer", e))?
        };

        // the pool texture can be larger than the content after a shrink
        let content = frame.size();
        let region = D3D11_BOX {
            left: 0,
            top: 0,
            front: 0,
            right: content.width.min(self.size.width),
            bottom: content.height.min(self.size.height),
            back: 1,
        };

        unsafe {
            self.context
                .CopySubresourceRegion(&back_buffer, 0, 0, 0, 0, &source, 0, Some(&region));
        }
        Ok(())
    }

    fn present(&mut self) -> CaptureResult<()> {
        let swap_chain = self.swap_chain()?;
        unsafe {
            swap_chain
                .Present(0, DXGI_PRESENT(0))
                .ok()
                .map_err(|e| map_error("Present", e))
        }
    }

    fn release(&mut self) {
        self.swap_chain.take();
    }
}
