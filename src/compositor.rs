//! Capture compositor: owns the on-screen visual and at most one capture session
//!
//! All methods run on the host's UI thread. Session notifications are queued
//! by the frame worker and handled in [`CaptureCompositor::pump_events`].

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::capture::session::{CaptureSession, SessionEvent, SessionOptions, SharedLayout};
use crate::capture::traits::{CaptureBackend, CompositionVisual, SurfaceHandle};
use crate::error::{CaptureError, CaptureResult};
use crate::transform::{AreaTransform, ContentPlacement, Transform};
use crate::types::{
    validate_opacity, CaptureArea, CaptureConfig, CaptureSource, Layout, SessionId, SessionStats,
    Size,
};

/// Current capture session, if any
pub enum SessionState<B: CaptureBackend> {
    Idle,
    Capturing(CaptureSession<B>),
}

impl<B: CaptureBackend> SessionState<B> {
    pub fn session(&self) -> Option<&CaptureSession<B>> {
        match self {
            SessionState::Idle => None,
            SessionState::Capturing(session) => Some(session),
        }
    }
}

/// Observable compositor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositorState {
    Idle,
    Capturing,
}

/// Outcome of a handled session notification
#[derive(Debug, Clone, PartialEq)]
pub enum CompositorEvent {
    /// The source changed size and the new layout is applied
    SourceResized { source: CaptureSource, size: Size },
    /// The source changed size but the crop area no longer fits; the
    /// previous transform stays in place
    LayoutRejected {
        source: CaptureSource,
        error: CaptureError,
    },
    /// The session failed and was torn down; the compositor is idle
    SessionLost {
        source: CaptureSource,
        error: CaptureError,
    },
}

/// Placement for the layout, or `None` while the display size is unknown
fn placement_for(layout: &Layout) -> Option<ContentPlacement> {
    let content_size = layout.source_size?;
    if layout.display_size.is_empty() {
        return None;
    }
    Some(ContentPlacement {
        content_size,
        display_size: layout.display_size,
        transform: layout.transform,
    })
}

pub struct CaptureCompositor<B: CaptureBackend> {
    backend: B,
    visual: B::Visual,
    config: CaptureConfig,
    opacity: f32,
    layout: SharedLayout,
    state: SessionState<B>,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
}

impl<B: CaptureBackend> CaptureCompositor<B> {
    /// Create an idle compositor drawing into `visual`
    pub fn new(
        backend: B,
        mut visual: B::Visual,
        display_size: Size,
        config: CaptureConfig,
    ) -> CaptureResult<Self> {
        config.validate()?;
        visual.set_opacity(config.default_opacity)?;
        visual.commit()?;

        let (events_tx, events_rx) = unbounded();
        let layout = Layout {
            display_size,
            ..Layout::default()
        };

        log::debug!(
            "compositor created on {} with display {}",
            backend.name(),
            display_size
        );

        Ok(Self {
            backend,
            visual,
            opacity: config.default_opacity,
            config,
            layout: Arc::new(Mutex::new(layout)),
            state: SessionState::Idle,
            events_tx,
            events_rx,
        })
    }

    /// Mirror `source`, optionally cropped to `area`.
    ///
    /// Any active session is stopped first. On failure the compositor is left
    /// idle with nothing bound to the visual.
    pub fn set_source(
        &mut self,
        source: CaptureSource,
        area: Option<CaptureArea>,
    ) -> CaptureResult<()> {
        self.stop();

        match self.start_session(source, area) {
            Ok(session) => {
                log::info!("capturing {} in {}", source, session.id());
                self.state = SessionState::Capturing(session);
                Ok(())
            }
            Err(err) => {
                log::warn!("failed to capture {}: {}", source, err);
                self.clear_visual();
                self.reset_layout();
                Err(err)
            }
        }
    }

    fn start_session(
        &mut self,
        source: CaptureSource,
        area: Option<CaptureArea>,
    ) -> CaptureResult<CaptureSession<B>> {
        if let Some(area) = &area {
            area.validate()?;
        }

        let device = self.backend.create_device()?;
        let options = SessionOptions {
            config: self.config.clone(),
            events: Some(self.events_tx.clone()),
            layout: Arc::clone(&self.layout),
        };
        let mut session = CaptureSession::create(&self.backend, device, source, area, options)?;

        let source_size = session.native_size();
        if let Some(area) = &area {
            area.validate_within(source_size)?;
        }

        let display_size = self.layout.lock().display_size;
        let transform = if display_size.is_empty() {
            log::debug!("display size unknown, transform deferred");
            Transform::IDENTITY
        } else {
            AreaTransform::compute(area.as_ref(), source_size, display_size)?
        };

        let bound = {
            let mut layout = self.layout.lock();
            layout.area = area;
            layout.source_size = Some(source_size);
            layout.transform = transform;

            let handle = session.surface_handle();
            Self::bind_surface(&mut self.visual, &layout, &handle)
        };

        if let Err(err) = bound.and_then(|()| session.start()) {
            // the brush lets go of the surface before the session releases it
            self.clear_visual();
            session.dispose();
            return Err(err);
        }
        Ok(session)
    }

    fn bind_surface(
        visual: &mut B::Visual,
        layout: &Layout,
        handle: &SurfaceHandle<B>,
    ) -> CaptureResult<()> {
        visual.set_surface(Some(handle))?;
        if let Some(placement) = placement_for(layout) {
            visual.set_placement(&placement)?;
        }
        visual.commit()
    }

    /// Detach the visual and dispose the active session. Idempotent.
    pub fn stop(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Idle);
        let SessionState::Capturing(mut session) = previous else {
            return;
        };

        // the brush lets go of the surface before the session releases it
        self.clear_visual();
        session.dispose();
        self.reset_layout();

        log::info!("stopped capturing {}", session.source());
    }

    fn clear_visual(&mut self) {
        let _visual_tree = self.layout.lock();
        if let Err(e) = self.visual.set_surface(None) {
            log::warn!("failed to detach surface: {}", e);
        }
        if let Err(e) = self.visual.commit() {
            log::warn!("failed to commit visual: {}", e);
        }
    }

    fn reset_layout(&mut self) {
        let mut layout = self.layout.lock();
        layout.area = None;
        layout.source_size = None;
        layout.transform = Transform::IDENTITY;
    }

    /// Set the visual's opacity, independent of capture state
    pub fn set_opacity(&mut self, opacity: f32) -> CaptureResult<()> {
        validate_opacity(opacity)?;

        let _visual_tree = self.layout.lock();
        self.visual.set_opacity(opacity)?;
        self.visual.commit()?;
        self.opacity = opacity;
        Ok(())
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// The host surface changed size
    pub fn on_display_resize(&mut self, size: Size) -> CaptureResult<()> {
        if size.is_empty() {
            log::warn!("ignoring empty display size {}", size);
            return Err(CaptureError::invalid(format!(
                "display size must be non-zero, got {}",
                size
            )));
        }

        let mut layout = self.layout.lock();
        let Some(source_size) = layout.source_size else {
            layout.display_size = size;
            return Ok(());
        };

        let transform = AreaTransform::compute(layout.area.as_ref(), source_size, size)?;
        layout.display_size = size;
        layout.transform = transform;
        log::debug!("display resized to {}, transform {}", size, transform);

        if let Some(placement) = placement_for(&layout) {
            self.visual.set_placement(&placement)?;
        }
        self.visual.commit()
    }

    /// The captured source changed size
    pub fn on_source_resize(&mut self, size: Size) -> CaptureResult<()> {
        if size.is_empty() {
            return Err(CaptureError::invalid(format!(
                "source size must be non-zero, got {}",
                size
            )));
        }
        if self.state.session().is_none() {
            log::debug!("no active source, ignoring source size {}", size);
            return Ok(());
        }

        let mut layout = self.layout.lock();
        let transform = if layout.display_size.is_empty() {
            Transform::IDENTITY
        } else {
            match AreaTransform::compute(layout.area.as_ref(), size, layout.display_size) {
                Ok(transform) => transform,
                Err(err) => {
                    log::warn!("keeping previous layout for source size {}: {}", size, err);
                    return Err(err);
                }
            }
        };
        layout.source_size = Some(size);
        layout.transform = transform;
        log::debug!("source resized to {}, transform {}", size, transform);

        if let Some(placement) = placement_for(&layout) {
            self.visual.set_placement(&placement)?;
        }
        self.visual.commit()
    }

    /// Handle queued session notifications. Call from the UI thread.
    pub fn pump_events(&mut self) -> Vec<CompositorEvent> {
        let mut handled = Vec::new();

        while let Ok(event) = self.events_rx.try_recv() {
            let Some(session) = self.state.session() else {
                log::debug!("dropping {:?}, no active session", event);
                continue;
            };
            if event.session() != session.id() {
                log::debug!("dropping event from replaced {}", event.session());
                continue;
            }
            let source = session.source();

            match event {
                SessionEvent::SourceResized { size, .. } => match self.on_source_resize(size) {
                    Ok(()) => handled.push(CompositorEvent::SourceResized { source, size }),
                    Err(error) => handled.push(CompositorEvent::LayoutRejected { source, error }),
                },
                SessionEvent::DeviceLost { error, .. } => {
                    log::error!("capture of {} lost: {}", source, error);
                    self.stop();
                    handled.push(CompositorEvent::SessionLost { source, error });
                }
            }
        }

        handled
    }

    pub fn state(&self) -> CompositorState {
        match self.state {
            SessionState::Idle => CompositorState::Idle,
            SessionState::Capturing(_) => CompositorState::Capturing,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.state() == CompositorState::Capturing
    }

    pub fn active_source(&self) -> Option<CaptureSource> {
        self.state.session().map(|session| session.source())
    }

    pub fn active_session(&self) -> Option<SessionId> {
        self.state.session().map(|session| session.id())
    }

    /// Snapshot of the current layout
    pub fn layout(&self) -> Layout {
        *self.layout.lock()
    }

    pub fn transform(&self) -> Transform {
        self.layout.lock().transform
    }

    pub fn session_stats(&self) -> Option<SessionStats> {
        self.state.session().map(|session| session.stats())
    }

    pub fn visual(&self) -> &B::Visual {
        &self.visual
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }
}

impl<B: CaptureBackend> Drop for CaptureCompositor<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::software::{SoftwareBackend, SoftwareVisual};

    fn compositor(display: Size) -> (CaptureCompositor<SoftwareBackend>, SoftwareBackend) {
        let backend = SoftwareBackend::new();
        let compositor = CaptureCompositor::new(
            backend.clone(),
            SoftwareVisual::new(),
            display,
            CaptureConfig::default(),
        )
        .unwrap();
        (compositor, backend)
    }

    #[test]
    fn test_new_applies_default_opacity() {
        let backend = SoftwareBackend::new();
        let config = CaptureConfig {
            default_opacity: 0.75,
            ..Default::default()
        };
        let compositor =
            CaptureCompositor::new(backend, SoftwareVisual::new(), Size::new(100, 100), config)
                .unwrap();
        assert_eq!(compositor.opacity(), 0.75);
        assert_eq!(compositor.visual().opacity(), 0.75);
        assert_eq!(compositor.state(), CompositorState::Idle);
    }

    #[test]
    fn test_invalid_default_opacity_rejected() {
        let config = CaptureConfig {
            default_opacity: 2.0,
            ..Default::default()
        };
        let result = CaptureCompositor::new(
            SoftwareBackend::new(),
            SoftwareVisual::new(),
            Size::new(100, 100),
            config,
        );
        assert!(matches!(result, Err(CaptureError::InvalidArgument(_))));
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let (mut compositor, _backend) = compositor(Size::new(100, 100));
        compositor.stop();
        compositor.stop();
        assert!(!compositor.is_capturing());
    }

    #[test]
    fn test_set_source_binds_surface() {
        let (mut compositor, backend) = compositor(Size::new(200, 100));
        let source = CaptureSource::window(7);
        let feeder = backend.register_source(source, Size::new(400, 200));

        compositor.set_source(source, None).unwrap();
        assert_eq!(compositor.state(), CompositorState::Capturing);
        assert_eq!(compositor.active_source(), Some(source));
        assert!(compositor.visual().has_surface());
        assert!(feeder.is_started());
        assert!(compositor.transform().is_identity());

        compositor.stop();
        assert!(!compositor.visual().has_surface());
        assert!(!feeder.is_attached());
        assert_eq!(compositor.layout().source_size, None);
    }

    #[test]
    fn test_source_resize_when_idle_is_ignored() {
        let (mut compositor, _backend) = compositor(Size::new(100, 100));
        assert!(compositor.on_source_resize(Size::new(50, 50)).is_ok());
        assert!(compositor.on_source_resize(Size::new(0, 50)).is_err());
    }
}
