//! Platform capabilities the capture pipeline is built on
//!
//! A backend provides the graphics device, resolves capture sources, and
//! creates frame producers, presentable surfaces and visuals. The session and
//! compositor logic is written once against these traits.

use crate::error::CaptureResult;
use crate::pipeline::FrameSignal;
use crate::transform::ContentPlacement;
use crate::types::{CaptureConfig, CaptureSource, Size};

/// A resolved, capturable window or monitor
pub trait CaptureItem: Send {
    /// Current native pixel size of the source
    fn size(&self) -> CaptureResult<Size>;
}

/// One frame handed out by a frame producer.
///
/// Dropping the frame returns it to the producer's pool.
pub trait CapturedFrame: Send {
    /// Size of the content the frame carries
    fn content_size(&self) -> Size;
}

/// Platform facility that delivers successive frames from a source
pub trait FrameProducer: Send + 'static {
    type Frame: CapturedFrame;

    /// Begin frame delivery. Idempotent.
    fn start(&mut self) -> CaptureResult<()>;

    /// Take the next available frame, if any
    fn try_next_frame(&mut self) -> Option<Self::Frame>;

    /// Rebuild the internal frame pool for a new content size
    fn recreate(&mut self, size: Size) -> CaptureResult<()>;

    /// Unregister the frame callback and release the producer. Idempotent.
    fn close(&mut self);
}

/// Double-buffered surface that frames are copied into and presented from
pub trait PresentableSurface: Send + 'static {
    type Frame: CapturedFrame;
    /// Stable handle a visual binds to as its paint source
    type Handle: Clone + Send + 'static;

    fn size(&self) -> Size;

    fn handle(&self) -> Self::Handle;

    /// Resize both buffers; previous contents are discarded
    fn resize_buffers(&mut self, size: Size) -> CaptureResult<()>;

    /// Copy frame pixels into the current back buffer
    fn copy_frame(&mut self, frame: &Self::Frame) -> CaptureResult<()>;

    /// Flip without waiting for vertical sync
    fn present(&mut self) -> CaptureResult<()>;

    /// Release the buffers. Idempotent.
    fn release(&mut self);
}

/// On-screen visual node with its paint brush
pub trait CompositionVisual {
    type Handle;

    /// Bind (or with `None`, detach) the brush's surface
    fn set_surface(&mut self, surface: Option<&Self::Handle>) -> CaptureResult<()>;

    fn set_placement(&mut self, placement: &ContentPlacement) -> CaptureResult<()>;

    fn set_opacity(&mut self, opacity: f32) -> CaptureResult<()>;

    /// Publish pending visual-tree changes
    fn commit(&mut self) -> CaptureResult<()> {
        Ok(())
    }
}

/// Surface handle type of a backend
pub type SurfaceHandle<B> = <<B as CaptureBackend>::Surface as PresentableSurface>::Handle;

/// Capabilities of a backend
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    /// Cursor can be included or excluded from frames
    pub supports_cursor_toggle: bool,
    /// Capture border can be turned off
    pub supports_border_toggle: bool,
    /// Frames stay on the GPU end to end
    pub hardware_accelerated: bool,
}

/// Platform services: device, source resolution, producer, surface and visual
pub trait CaptureBackend: Send + Sync + 'static {
    type Device: Send + 'static;
    type Item: CaptureItem;
    type Frame: CapturedFrame;
    type Producer: FrameProducer<Frame = Self::Frame>;
    type Surface: PresentableSurface<Frame = Self::Frame>;
    type Visual: CompositionVisual<Handle = <Self::Surface as PresentableSurface>::Handle>;

    /// Get the implementation name
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities::default()
    }

    fn create_device(&self) -> CaptureResult<Self::Device>;

    fn resolve_source(&self, source: &CaptureSource) -> CaptureResult<Self::Item>;

    /// Allocate a presentable surface with [`FRAME_BUFFER_COUNT`](crate::types::FRAME_BUFFER_COUNT) buffers
    fn create_surface(&self, device: &Self::Device, size: Size) -> CaptureResult<Self::Surface>;

    /// Create a frame producer bound to `item` that raises `signal` once per frame
    fn create_producer(
        &self,
        device: &Self::Device,
        item: &Self::Item,
        size: Size,
        config: &CaptureConfig,
        signal: FrameSignal,
    ) -> CaptureResult<Self::Producer>;
}
