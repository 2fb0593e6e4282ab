//! Capture session: one source, one frame producer, one presentable surface
//!
//! The session turns a capture source into a continuously updated presentable
//! surface. Frames are handled on the session's dispatch worker; everything
//! else happens on the owner's thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::capture::traits::{
    CaptureBackend, CaptureItem, CapturedFrame, FrameProducer, PresentableSurface, SurfaceHandle,
};
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::{DispatchFlow, FrameDispatcher, FrameDispatcherBuilder};
use crate::types::{
    CaptureArea, CaptureConfig, CaptureSource, Layout, SessionId, SessionStats, Size,
};

/// Layout record shared between the compositor and the frame worker
pub type SharedLayout = Arc<Mutex<Layout>>;

/// Notifications a session sends to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The source's native size changed; the surface has already been resized
    SourceResized { session: SessionId, size: Size },
    /// Copy, present or producer recreation failed; the session delivers no more frames
    DeviceLost {
        session: SessionId,
        error: CaptureError,
    },
}

impl SessionEvent {
    pub fn session(&self) -> SessionId {
        match self {
            SessionEvent::SourceResized { session, .. } => *session,
            SessionEvent::DeviceLost { session, .. } => *session,
        }
    }
}

/// Session construction options
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub config: CaptureConfig,
    /// Where to report resizes and device loss
    pub events: Option<Sender<SessionEvent>>,
    /// Visual-tree lock taken while the surface is being resized
    pub layout: SharedLayout,
}

#[derive(Default)]
struct SessionCounters {
    callbacks: AtomicU64,
    presented: AtomicU64,
    skipped: AtomicU64,
    resizes: AtomicU64,
    recreations: AtomicU64,
}

impl SessionCounters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            frames_presented: self.presented.load(Ordering::Relaxed),
            frames_skipped: self.skipped.load(Ordering::Relaxed),
            source_resizes: self.resizes.load(Ordering::Relaxed),
            producer_recreations: self.recreations.load(Ordering::Relaxed),
        }
    }
}

struct FrameTarget<B: CaptureBackend> {
    producer: B::Producer,
    surface: B::Surface,
    last_size: Size,
}

/// State moved into the dispatch worker
struct FrameContext<B: CaptureBackend> {
    id: SessionId,
    target: Arc<Mutex<Option<FrameTarget<B>>>>,
    counters: Arc<SessionCounters>,
    lost: Arc<AtomicBool>,
    layout: SharedLayout,
    events: Option<Sender<SessionEvent>>,
}

impl<B: CaptureBackend> FrameContext<B> {
    fn on_frame_arrived(&self) -> DispatchFlow {
        self.counters.callbacks.fetch_add(1, Ordering::Relaxed);

        let mut guard = self.target.lock();
        let Some(target) = guard.as_mut() else {
            return DispatchFlow::Stop;
        };

        let Some(frame) = target.producer.try_next_frame() else {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return DispatchFlow::Continue;
        };

        let size = frame.content_size();
        if size.is_empty() {
            log::trace!("{} skipping empty frame", self.id);
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            return DispatchFlow::Continue;
        }

        match self.present(target, frame, size) {
            Ok(resized) => {
                drop(guard);
                self.counters.presented.fetch_add(1, Ordering::Relaxed);
                if resized {
                    self.counters.resizes.fetch_add(1, Ordering::Relaxed);
                    self.counters.recreations.fetch_add(1, Ordering::Relaxed);
                    self.send(SessionEvent::SourceResized {
                        session: self.id,
                        size,
                    });
                }
                DispatchFlow::Continue
            }
            Err(err) => {
                drop(guard);
                let error = match err {
                    CaptureError::DeviceLost(_) => err,
                    other => CaptureError::DeviceLost(other.to_string()),
                };
                log::error!("{} stopped delivering frames: {}", self.id, error);
                self.lost.store(true, Ordering::Release);
                self.send(SessionEvent::DeviceLost {
                    session: self.id,
                    error,
                });
                DispatchFlow::Stop
            }
        }
    }

    /// Copy `frame` into the back buffer and present it. Returns true when the
    /// content size changed and the surface and producer were rebuilt.
    fn present(
        &self,
        target: &mut FrameTarget<B>,
        frame: B::Frame,
        size: Size,
    ) -> CaptureResult<bool> {
        if size == target.last_size {
            target.surface.copy_frame(&frame)?;
            drop(frame);
            target.surface.present()?;
            return Ok(false);
        }

        log::debug!(
            "{} source resized {} -> {}",
            self.id,
            target.last_size,
            size
        );

        // Resize, blit, retire the frame, present, and only then rebuild the
        // producer: its pool is sized at creation.
        let _visual_tree = self.layout.lock();
        target.last_size = size;
        target.surface.resize_buffers(size)?;
        target.surface.copy_frame(&frame)?;
        drop(frame);
        target.surface.present()?;
        target.producer.recreate(size)?;
        Ok(true)
    }

    fn send(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            if events.send(event).is_err() {
                log::debug!("{} owner is gone, event dropped", self.id);
            }
        }
    }
}

/// Creation failures are never "lost": nothing was running yet
fn creation_error(err: CaptureError) -> CaptureError {
    match err {
        CaptureError::DeviceLost(message) => CaptureError::DeviceError(message),
        other => other,
    }
}

/// Live capture of one source into a presentable surface
pub struct CaptureSession<B: CaptureBackend> {
    id: SessionId,
    source: CaptureSource,
    area: Option<CaptureArea>,
    native_size: Size,
    surface_handle: SurfaceHandle<B>,
    target: Arc<Mutex<Option<FrameTarget<B>>>>,
    dispatcher: FrameDispatcher,
    counters: Arc<SessionCounters>,
    lost: Arc<AtomicBool>,
    started: bool,
    disposed: bool,
    device: Option<B::Device>,
}

impl<B: CaptureBackend> CaptureSession<B> {
    /// Bind a new session to `source`.
    ///
    /// Allocates a surface at the source's native size and registers the frame
    /// callback. Frames flow only after [`start`](Self::start).
    pub fn create(
        backend: &B,
        device: B::Device,
        source: CaptureSource,
        area: Option<CaptureArea>,
        options: SessionOptions,
    ) -> CaptureResult<Self> {
        options.config.validate()?;
        if let Some(area) = &area {
            area.validate()?;
        }

        let id = SessionId::next();
        let item = backend.resolve_source(&source).map_err(creation_error)?;
        let native_size = item.size().map_err(creation_error)?;
        if native_size.is_empty() {
            return Err(CaptureError::device(format!(
                "{} reports an empty size {}",
                source, native_size
            )));
        }

        let target: Arc<Mutex<Option<FrameTarget<B>>>> = Arc::new(Mutex::new(None));
        let counters = Arc::new(SessionCounters::default());
        let lost = Arc::new(AtomicBool::new(false));

        let context = FrameContext::<B> {
            id,
            target: Arc::clone(&target),
            counters: Arc::clone(&counters),
            lost: Arc::clone(&lost),
            layout: Arc::clone(&options.layout),
            events: options.events.clone(),
        };
        let dispatcher = FrameDispatcherBuilder::new()
            .thread_name(format!("capture-{}", id.0))
            .spawn(move || context.on_frame_arrived())?;

        let mut surface = backend
            .create_surface(&device, native_size)
            .map_err(creation_error)?;
        let producer = match backend.create_producer(
            &device,
            &item,
            native_size,
            &options.config,
            dispatcher.signal(),
        ) {
            Ok(producer) => producer,
            Err(err) => {
                surface.release();
                return Err(creation_error(err));
            }
        };

        let surface_handle = surface.handle();
        *target.lock() = Some(FrameTarget {
            producer,
            surface,
            last_size: native_size,
        });

        log::info!(
            "{} created for {} at {} on {}",
            id,
            source,
            native_size,
            backend.name()
        );

        Ok(Self {
            id,
            source,
            area,
            native_size,
            surface_handle,
            target,
            dispatcher,
            counters,
            lost,
            started: false,
            disposed: false,
            device: Some(device),
        })
    }

    /// Begin frame delivery. Idempotent.
    pub fn start(&mut self) -> CaptureResult<()> {
        if self.disposed {
            return Err(CaptureError::device(format!("{} is disposed", self.id)));
        }
        if self.is_lost() {
            return Err(CaptureError::lost(format!("{} lost its device", self.id)));
        }
        if self.started {
            return Ok(());
        }

        let mut guard = self.target.lock();
        let target = guard
            .as_mut()
            .ok_or_else(|| CaptureError::device(format!("{} has no frame target", self.id)))?;
        target.producer.start().map_err(creation_error)?;
        drop(guard);

        self.started = true;
        log::debug!("{} started", self.id);
        Ok(())
    }

    /// Release the frame callback, producer, surface and device.
    ///
    /// Waits for an in-flight frame callback to complete first; once this
    /// returns no further frames are handled. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        self.dispatcher.stop();
        if let Some(mut target) = self.target.lock().take() {
            target.producer.close();
            target.surface.release();
        }
        self.device.take();

        log::info!("{} disposed", self.id);
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source(&self) -> CaptureSource {
        self.source
    }

    pub fn area(&self) -> Option<CaptureArea> {
        self.area
    }

    /// Source size reported when the session was created
    pub fn native_size(&self) -> Size {
        self.native_size
    }

    /// Size of the most recently handled frame
    pub fn current_size(&self) -> Option<Size> {
        self.target.lock().as_ref().map(|target| target.last_size)
    }

    /// Paint source for the compositor's brush; stable for the session lifetime
    pub fn surface_handle(&self) -> SurfaceHandle<B> {
        self.surface_handle.clone()
    }

    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

impl<B: CaptureBackend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}
