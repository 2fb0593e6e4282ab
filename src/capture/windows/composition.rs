//! DirectComposition visual hosting the mirrored swap chain in a window

use windows::core::{IUnknown, Interface};
use windows::Foundation::Numerics::Matrix3x2;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::DirectComposition::{
    DCompositionCreateDevice, IDCompositionDevice, IDCompositionEffectGroup, IDCompositionTarget,
    IDCompositionVisual,
};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;

use super::d3d::{map_error, SwapChainHandle, WindowsDevice};
use crate::capture::traits::CompositionVisual;
use crate::error::CaptureResult;
use crate::transform::{ContentPlacement, Transform};
use crate::types::WindowHandle;

fn to_matrix(transform: &Transform) -> Matrix3x2 {
    Matrix3x2 {
        M11: transform.m11 as f32,
        M12: transform.m12 as f32,
        M21: transform.m21 as f32,
        M22: transform.m22 as f32,
        M31: transform.m31 as f32,
        M32: transform.m32 as f32,
    }
}

/// Root visual of a window with an opacity effect
pub struct WindowsVisual {
    device: IDCompositionDevice,
    _target: IDCompositionTarget,
    visual: IDCompositionVisual,
    effect: IDCompositionEffectGroup,
    // composition runs on its own device, independent of capture sessions
    _render_device: WindowsDevice,
}

impl WindowsVisual {
    /// Create a composition target on `window` with an empty root visual
    pub fn for_window(window: WindowHandle) -> CaptureResult<Self> {
        let render_device = WindowsDevice::create()?;

        unsafe {
            let dxgi: IDXGIDevice = render_device
                .d3d
                .cast()
                .map_err(|e| map_error("cast IDXGIDevice", e))?;
            let device: IDCompositionDevice = DCompositionCreateDevice(&dxgi)
                .map_err(|e| map_error("DCompositionCreateDevice", e))?;
            let target = device
                .CreateTargetForHwnd(HWND(window.0 as _), true)
                .map_err(|e| map_error("CreateTargetForHwnd", e))?;
            let visual = device
                .CreateVisual()
                .map_err(|e| map_error("CreateVisual", e))?;
            let effect = device
                .CreateEffectGroup()
                .map_err(|e| map_error("CreateEffectGroup", e))?;

            visual
                .SetEffect(&effect)
                .map_err(|e| map_error("SetEffect", e))?;
            target
                .SetRoot(&visual)
                .map_err(|e| map_error("SetRoot", e))?;
            device.Commit().map_err(|e| map_error("Commit", e))?;

            Ok(Self {
                device,
                _target: target,
                visual,
                effect,
                _render_device: render_device,
            })
        }
    }
}

impl CompositionVisual for WindowsVisual {
    type Handle = SwapChainHandle;

    fn set_surface(&mut self, surface: Option<&SwapChainHandle>) -> CaptureResult<()> {
        unsafe {
            match surface {
                Some(handle) => self.visual.SetContent(&handle.0),
                None => self.visual.SetContent(None::<&IUnknown>),
            }
            .map_err(|e| map_error("SetContent", e))
        }
    }

    fn set_placement(&mut self, placement: &ContentPlacement) -> CaptureResult<()> {
        // swap chain content is laid out 1:1, so the visual carries the stretch too
        let matrix = to_matrix(&placement.effective()?);
        unsafe {
            self.visual
                .SetTransform2(&matrix)
                .map_err(|e| map_error("SetTransform", e))
        }
    }

    fn set_opacity(&mut self, opacity: f32) -> CaptureResult<()> {
        unsafe {
            self.effect
                .SetOpacity2(opacity)
                .map_err(|e| map_error("SetOpacity", e))
        }
    }

    fn commit(&mut self) -> CaptureResult<()> {
        unsafe { self.device.Commit().map_err(|e| map_error("Commit", e)) }
    }
}
