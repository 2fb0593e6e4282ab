//! Frame capture: backend traits, the capture session and the backends

pub mod session;
pub mod software;
pub mod traits;

#[cfg(target_os = "windows")]
pub mod windows;

pub use session::{CaptureSession, SessionEvent, SessionOptions, SharedLayout};
pub use software::{SoftwareBackend, SoftwareSurfaceHandle, SoftwareVisual, SourceFeeder};
pub use traits::{
    BackendCapabilities, CaptureBackend, CaptureItem, CapturedFrame, CompositionVisual,
    FrameProducer, PresentableSurface, SurfaceHandle,
};

#[cfg(target_os = "windows")]
pub use self::windows::{WindowsBackend, WindowsVisual};
