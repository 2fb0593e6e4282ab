//! In-process capture backend
//!
//! Sources are registered by the host and fed through a [`SourceFeeder`]; the
//! presentable surface is a pair of CPU buffers and the visual renders
//! snapshots on demand. Useful for headless mirroring and for exercising the
//! session and compositor logic without a GPU.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::buffer_pool::{global_pool, BufferPool, PooledBuffer};
use crate::capture::traits::{
    BackendCapabilities, CaptureBackend, CaptureItem, CapturedFrame, CompositionVisual,
    FrameProducer, PresentableSurface,
};
use crate::error::{CaptureError, CaptureResult};
use crate::pipeline::FrameSignal;
use crate::transform::ContentPlacement;
use crate::types::{
    CaptureConfig, CaptureSource, PixelFormat, RawImage, Size, FRAME_BUFFER_COUNT,
};

const BYTES_PER_PIXEL: usize = 4;

struct DeviceShared {
    lost: AtomicBool,
}

struct SourceShared {
    source: CaptureSource,
    size: Mutex<Size>,
    closed: AtomicBool,
    refuse_start: AtomicBool,
    producer: Mutex<Option<Arc<ProducerShared>>>,
    producers_created: AtomicU64,
}

struct ProducerShared {
    queue: Mutex<VecDeque<SoftwareFrame>>,
    signal: FrameSignal,
    device: Arc<DeviceShared>,
    started: AtomicBool,
    closed: AtomicBool,
    pool_size: Mutex<Size>,
    recreations: AtomicU64,
    dropped: AtomicU64,
    outstanding: Arc<AtomicUsize>,
}

impl ProducerShared {
    fn is_live(&self) -> bool {
        self.started.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }
}

/// Graphics device of the software backend
pub struct SoftwareDevice {
    shared: Arc<DeviceShared>,
}

impl SoftwareDevice {
    pub fn is_lost(&self) -> bool {
        self.shared.lost.load(Ordering::Acquire)
    }
}

/// A registered source resolved for capture
pub struct SoftwareItem {
    source: Arc<SourceShared>,
}

impl CaptureItem for SoftwareItem {
    fn size(&self) -> CaptureResult<Size> {
        if self.source.closed.load(Ordering::Acquire) {
            return Err(CaptureError::device(format!(
                "{} no longer exists",
                self.source.source
            )));
        }
        Ok(*self.source.size.lock())
    }
}

/// A frame of BGRA pixels; returns its buffer to the pool when dropped.
/// Frames with no content (a minimized window) carry no buffer.
pub struct SoftwareFrame {
    buffer: Option<PooledBuffer>,
    size: Size,
    outstanding: Arc<AtomicUsize>,
}

impl SoftwareFrame {
    pub fn pixels(&self) -> &[u8] {
        self.buffer.as_ref().map(|b| b.data()).unwrap_or(&[])
    }
}

impl CapturedFrame for SoftwareFrame {
    fn content_size(&self) -> Size {
        self.size
    }
}

impl Drop for SoftwareFrame {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Frame producer fed by a [`SourceFeeder`]
pub struct SoftwareProducer {
    shared: Arc<ProducerShared>,
    source: Arc<SourceShared>,
}

impl FrameProducer for SoftwareProducer {
    type Frame = SoftwareFrame;

    fn start(&mut self) -> CaptureResult<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(CaptureError::device("frame producer is closed"));
        }
        if self.source.closed.load(Ordering::Acquire)
            || self.source.refuse_start.swap(false, Ordering::AcqRel)
        {
            return Err(CaptureError::device(format!(
                "{} refused to start capture",
                self.source.source
            )));
        }
        self.shared.started.store(true, Ordering::Release);
        Ok(())
    }

    fn try_next_frame(&mut self) -> Option<SoftwareFrame> {
        self.shared.queue.lock().pop_front()
    }

    fn recreate(&mut self, size: Size) -> CaptureResult<()> {
        if self.shared.device.lost.load(Ordering::Acquire) {
            return Err(CaptureError::lost("device removed while recreating frame pool"));
        }
        *self.shared.pool_size.lock() = size;
        self.shared.recreations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.queue.lock().clear();
        log::debug!("frame producer for {} closed", self.source.source);
    }
}

impl Drop for SoftwareProducer {
    fn drop(&mut self) {
        self.close();
    }
}

struct SwapState {
    size: Size,
    buffers: Vec<PooledBuffer>,
    back: usize,
    front: Option<usize>,
    presents: u64,
    released: bool,
}

struct SurfaceShared {
    state: Mutex<SwapState>,
}

/// Double-buffered CPU surface
pub struct SoftwareSurface {
    shared: Arc<SurfaceShared>,
    device: Arc<DeviceShared>,
    pool: Arc<BufferPool>,
}

impl SoftwareSurface {
    fn allocate(pool: &Arc<BufferPool>, size: Size) -> CaptureResult<Vec<PooledBuffer>> {
        (0..FRAME_BUFFER_COUNT)
            .map(|_| pool.acquire_image(size).map_err(CaptureError::from))
            .collect()
    }

    fn check_device(&self) -> CaptureResult<()> {
        if self.device.lost.load(Ordering::Acquire) {
            return Err(CaptureError::lost("device removed"));
        }
        Ok(())
    }
}

impl PresentableSurface for SoftwareSurface {
    type Frame = SoftwareFrame;
    type Handle = SoftwareSurfaceHandle;

    fn size(&self) -> Size {
        self.shared.state.lock().size
    }

    fn handle(&self) -> SoftwareSurfaceHandle {
        SoftwareSurfaceHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    fn resize_buffers(&mut self, size: Size) -> CaptureResult<()> {
        self.check_device()?;
        let buffers = Self::allocate(&self.pool, size)?;

        let mut state = self.shared.state.lock();
        state.size = size;
        state.buffers = buffers;
        state.back = 0;
        state.front = None;
        Ok(())
    }

    fn copy_frame(&mut self, frame: &SoftwareFrame) -> CaptureResult<()> {
        self.check_device()?;

        let mut state = self.shared.state.lock();
        if state.released {
            return Err(CaptureError::lost("surface already released"));
        }

        let dst_stride = state.size.width as usize * BYTES_PER_PIXEL;
        let src_stride = frame.size.width as usize * BYTES_PER_PIXEL;
        let row_bytes = dst_stride.min(src_stride);
        let rows = state.size.height.min(frame.size.height) as usize;
        let src = frame.pixels();
        if src.len() < rows * src_stride {
            return Err(CaptureError::device(format!(
                "frame has no pixels for {}",
                frame.size
            )));
        }

        let back = state.back;
        let dst = state.buffers[back].data_mut();
        for row in 0..rows {
            dst[row * dst_stride..row * dst_stride + row_bytes]
                .copy_from_slice(&src[row * src_stride..row * src_stride + row_bytes]);
        }
        Ok(())
    }

    fn present(&mut self) -> CaptureResult<()> {
        self.check_device()?;

        let mut state = self.shared.state.lock();
        if state.released {
            return Err(CaptureError::lost("surface already released"));
        }
        state.front = Some(state.back);
        state.back = (state.back + 1) % FRAME_BUFFER_COUNT;
        state.presents += 1;
        Ok(())
    }

    fn release(&mut self) {
        let mut state = self.shared.state.lock();
        state.released = true;
        state.front = None;
        state.buffers.clear();
    }
}

/// Non-owning reference to a software surface
#[derive(Clone)]
pub struct SoftwareSurfaceHandle {
    shared: Weak<SurfaceShared>,
}

impl SoftwareSurfaceHandle {
    /// True while the owning session still holds the surface
    pub fn is_alive(&self) -> bool {
        self.shared
            .upgrade()
            .map(|shared| !shared.state.lock().released)
            .unwrap_or(false)
    }

    pub fn size(&self) -> Option<Size> {
        let shared = self.shared.upgrade()?;
        let state = shared.state.lock();
        (!state.released).then_some(state.size)
    }

    pub fn present_count(&self) -> u64 {
        self.shared
            .upgrade()
            .map(|shared| shared.state.lock().presents)
            .unwrap_or(0)
    }

    /// Copy of the last presented buffer
    pub fn front_image(&self) -> Option<RawImage> {
        let shared = self.shared.upgrade()?;
        let state = shared.state.lock();
        let front = state.front?;
        let buffer = state.buffers.get(front)?;
        Some(RawImage::new(
            buffer.data().to_vec(),
            state.size.width,
            state.size.height,
            PixelFormat::BGRA8,
        ))
    }

    /// Both handles refer to the same surface
    pub fn ptr_eq(&self, other: &SoftwareSurfaceHandle) -> bool {
        Weak::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for SoftwareSurfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareSurfaceHandle")
            .field("alive", &self.is_alive())
            .field("size", &self.size())
            .finish()
    }
}

/// Visual that composes its bound surface into CPU snapshots
#[derive(Debug)]
pub struct SoftwareVisual {
    surface: Option<SoftwareSurfaceHandle>,
    placement: Option<ContentPlacement>,
    opacity: f32,
    commits: u64,
    released_while_bound: u64,
}

impl SoftwareVisual {
    pub fn new() -> Self {
        Self {
            surface: None,
            placement: None,
            opacity: 1.0,
            commits: 0,
            released_while_bound: 0,
        }
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn placement(&self) -> Option<&ContentPlacement> {
        self.placement.as_ref()
    }

    pub fn surface(&self) -> Option<&SoftwareSurfaceHandle> {
        self.surface.as_ref()
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Times a surface was found already released when the visual let go of it
    pub fn released_while_bound(&self) -> u64 {
        self.released_while_bound
    }

    /// Render what the visual currently shows, at display size.
    ///
    /// Nearest-neighbour sampling; pixels outside the content stay transparent.
    /// Returns `None` until a placement with a non-empty display is known.
    pub fn snapshot(&self) -> Option<RawImage> {
        let placement = self.placement?;
        let display = placement.display_size;
        if display.is_empty() {
            return None;
        }

        let mut output = RawImage::filled(display, PixelFormat::BGRA8, [0, 0, 0, 0]);
        let Some(content) = self.surface.as_ref().and_then(|s| s.front_image()) else {
            return Some(output);
        };

        let placement = ContentPlacement {
            content_size: content.size(),
            ..placement
        };
        let Some(inverse) = placement.effective().ok().and_then(|t| t.invert()) else {
            return Some(output);
        };

        for dy in 0..display.height {
            for dx in 0..display.width {
                let (sx, sy) = inverse.transform_point(dx as f64 + 0.5, dy as f64 + 0.5);
                if sx < 0.0 || sy < 0.0 {
                    continue;
                }
                let Some(pixel) = content.get_pixel(sx.floor() as u32, sy.floor() as u32) else {
                    continue;
                };

                let offset = dy as usize * output.stride + dx as usize * BYTES_PER_PIXEL;
                for (channel, value) in pixel.iter().enumerate() {
                    // premultiplied: opacity scales every channel
                    output.data[offset + channel] =
                        (*value as f32 * self.opacity).round().clamp(0.0, 255.0) as u8;
                }
            }
        }

        Some(output)
    }
}

impl Default for SoftwareVisual {
    fn default() -> Self {
        Self::new()
    }
}

impl CompositionVisual for SoftwareVisual {
    type Handle = SoftwareSurfaceHandle;

    fn set_surface(&mut self, surface: Option<&SoftwareSurfaceHandle>) -> CaptureResult<()> {
        if self.surface.as_ref().is_some_and(|bound| !bound.is_alive()) {
            log::warn!("visual still held a released surface");
            self.released_while_bound += 1;
        }
        self.surface = surface.cloned();
        Ok(())
    }

    fn set_placement(&mut self, placement: &ContentPlacement) -> CaptureResult<()> {
        self.placement = Some(*placement);
        Ok(())
    }

    fn set_opacity(&mut self, opacity: f32) -> CaptureResult<()> {
        self.opacity = opacity;
        Ok(())
    }

    fn commit(&mut self) -> CaptureResult<()> {
        self.commits += 1;
        Ok(())
    }
}

/// Host-side handle that produces frames for one registered source
#[derive(Clone)]
pub struct SourceFeeder {
    source: Arc<SourceShared>,
    pool: Arc<BufferPool>,
}

impl SourceFeeder {
    pub fn source(&self) -> CaptureSource {
        self.source.source
    }

    fn producer(&self) -> Option<Arc<ProducerShared>> {
        self.source.producer.lock().clone()
    }

    /// Produce a frame of `size` filled with one BGRA pixel value.
    ///
    /// Returns false when no started producer is attached, i.e. the frame
    /// never reaches a session.
    pub fn push_frame(&self, size: Size, pixel: [u8; 4]) -> CaptureResult<bool> {
        let image = RawImage::filled(size, PixelFormat::BGRA8, pixel);
        self.push_image(&image)
    }

    /// Produce a frame from BGRA image data
    pub fn push_image(&self, image: &RawImage) -> CaptureResult<bool> {
        let Some(producer) = self.producer().filter(|p| p.is_live()) else {
            return Ok(false);
        };

        if !image.is_valid() || image.stride < image.width as usize * BYTES_PER_PIXEL {
            return Err(CaptureError::invalid(format!(
                "image data too short for {}",
                image.size()
            )));
        }

        let size = image.size();
        let mut buffer = self.pool.acquire_image(size)?;
        let row_bytes = size.width as usize * BYTES_PER_PIXEL;
        for (row, dst) in buffer.data_mut().chunks_exact_mut(row_bytes).enumerate() {
            let start = row * image.stride;
            dst.copy_from_slice(&image.data[start..start + row_bytes]);
        }

        Self::enqueue(&producer, Some(buffer), size);
        Ok(true)
    }

    /// Produce a frame with zero content size, as a minimized window does
    pub fn push_empty_frame(&self) -> bool {
        let Some(producer) = self.producer().filter(|p| p.is_live()) else {
            return false;
        };
        Self::enqueue(&producer, None, Size::new(0, 0));
        true
    }

    /// Raise a frame-arrived notification without queuing a frame
    pub fn wake(&self) -> bool {
        let Some(producer) = self.producer().filter(|p| p.is_live()) else {
            return false;
        };
        producer.signal.notify();
        true
    }

    fn enqueue(producer: &ProducerShared, buffer: Option<PooledBuffer>, size: Size) {
        producer.outstanding.fetch_add(1, Ordering::AcqRel);
        let frame = SoftwareFrame {
            buffer,
            size,
            outstanding: Arc::clone(&producer.outstanding),
        };

        {
            let mut queue = producer.queue.lock();
            if queue.len() >= FRAME_BUFFER_COUNT {
                queue.pop_front();
                producer.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(frame);
        }
        producer.signal.notify();
    }

    /// Change the size reported to sessions created from now on
    pub fn set_size(&self, size: Size) {
        *self.source.size.lock() = size;
    }

    /// Simulate the source window or monitor going away
    pub fn close_source(&self) {
        self.source.closed.store(true, Ordering::Release);
    }

    /// Make the next producer start for this source fail
    pub fn refuse_next_start(&self) {
        self.source.refuse_start.store(true, Ordering::Release);
    }

    /// Simulate a device removal under the attached producer
    pub fn lose_device(&self) {
        if let Some(producer) = self.producer() {
            producer.device.lost.store(true, Ordering::Release);
        }
    }

    /// A producer is attached and not closed
    pub fn is_attached(&self) -> bool {
        self.producer()
            .map(|p| !p.closed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn is_started(&self) -> bool {
        self.producer().map(|p| p.is_live()).unwrap_or(false)
    }

    /// Frame pool recreations of the most recent producer
    pub fn recreations(&self) -> u64 {
        self.producer()
            .map(|p| p.recreations.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Frame pool size of the most recent producer
    pub fn pool_size(&self) -> Option<Size> {
        self.producer().map(|p| *p.pool_size.lock())
    }

    /// Frames of the most recent producer that are queued or not yet released
    pub fn frames_outstanding(&self) -> usize {
        self.producer()
            .map(|p| p.outstanding.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Frames discarded because the pool was full
    pub fn frames_dropped(&self) -> u64 {
        self.producer()
            .map(|p| p.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn producers_created(&self) -> u64 {
        self.source.producers_created.load(Ordering::Relaxed)
    }
}

struct BackendShared {
    pool: Arc<BufferPool>,
    sources: Mutex<HashMap<CaptureSource, Arc<SourceShared>>>,
    fail_next_device: AtomicBool,
    devices_created: AtomicU64,
}

/// In-process capture backend
#[derive(Clone)]
pub struct SoftwareBackend {
    inner: Arc<BackendShared>,
}

impl SoftwareBackend {
    /// Backend drawing buffers from the global pool
    pub fn new() -> Self {
        Self::with_pool(global_pool())
    }

    pub fn with_pool(pool: Arc<BufferPool>) -> Self {
        Self {
            inner: Arc::new(BackendShared {
                pool,
                sources: Mutex::new(HashMap::new()),
                fail_next_device: AtomicBool::new(false),
                devices_created: AtomicU64::new(0),
            }),
        }
    }

    /// Make `source` capturable at `size`
    pub fn register_source(&self, source: CaptureSource, size: Size) -> SourceFeeder {
        let shared = Arc::new(SourceShared {
            source,
            size: Mutex::new(size),
            closed: AtomicBool::new(false),
            refuse_start: AtomicBool::new(false),
            producer: Mutex::new(None),
            producers_created: AtomicU64::new(0),
        });
        self.inner
            .sources
            .lock()
            .insert(source, Arc::clone(&shared));

        SourceFeeder {
            source: shared,
            pool: Arc::clone(&self.inner.pool),
        }
    }

    /// Fail the next `create_device` call
    pub fn fail_next_device(&self) {
        self.inner.fail_next_device.store(true, Ordering::Release);
    }

    pub fn devices_created(&self) -> u64 {
        self.inner.devices_created.load(Ordering::Relaxed)
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.inner.pool
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for SoftwareBackend {
    type Device = SoftwareDevice;
    type Item = SoftwareItem;
    type Frame = SoftwareFrame;
    type Producer = SoftwareProducer;
    type Surface = SoftwareSurface;
    type Visual = SoftwareVisual;

    fn name(&self) -> &'static str {
        "Software"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_cursor_toggle: false,
            supports_border_toggle: false,
            hardware_accelerated: false,
        }
    }

    fn create_device(&self) -> CaptureResult<SoftwareDevice> {
        if self.inner.fail_next_device.swap(false, Ordering::AcqRel) {
            return Err(CaptureError::device("software device creation failed"));
        }
        self.inner.devices_created.fetch_add(1, Ordering::Relaxed);
        Ok(SoftwareDevice {
            shared: Arc::new(DeviceShared {
                lost: AtomicBool::new(false),
            }),
        })
    }

    fn resolve_source(&self, source: &CaptureSource) -> CaptureResult<SoftwareItem> {
        let shared = self
            .inner
            .sources
            .lock()
            .get(source)
            .cloned()
            .ok_or_else(|| CaptureError::device(format!("{} is not capturable", source)))?;

        if shared.closed.load(Ordering::Acquire) {
            return Err(CaptureError::device(format!("{} no longer exists", source)));
        }
        Ok(SoftwareItem { source: shared })
    }

    fn create_surface(&self, device: &SoftwareDevice, size: Size) -> CaptureResult<SoftwareSurface> {
        if device.is_lost() {
            return Err(CaptureError::device("device removed"));
        }
        let buffers = SoftwareSurface::allocate(&self.inner.pool, size)?;
        Ok(SoftwareSurface {
            shared: Arc::new(SurfaceShared {
                state: Mutex::new(SwapState {
                    size,
                    buffers,
                    back: 0,
                    front: None,
                    presents: 0,
                    released: false,
                }),
            }),
            device: Arc::clone(&device.shared),
            pool: Arc::clone(&self.inner.pool),
        })
    }

    fn create_producer(
        &self,
        device: &SoftwareDevice,
        item: &SoftwareItem,
        size: Size,
        config: &CaptureConfig,
        signal: FrameSignal,
    ) -> CaptureResult<SoftwareProducer> {
        if device.is_lost() {
            return Err(CaptureError::device("device removed"));
        }
        if config.include_cursor {
            log::debug!("software backend ignores cursor capture");
        }

        let shared = Arc::new(ProducerShared {
            queue: Mutex::new(VecDeque::with_capacity(FRAME_BUFFER_COUNT)),
            signal,
            device: Arc::clone(&device.shared),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            pool_size: Mutex::new(size),
            recreations: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            outstanding: Arc::new(AtomicUsize::new(0)),
        });

        let previous = item.source.producer.lock().replace(Arc::clone(&shared));
        if previous.is_some_and(|p| !p.closed.load(Ordering::Acquire)) {
            log::warn!("{} already had a live frame producer", item.source.source);
        }
        item.source.producers_created.fetch_add(1, Ordering::Relaxed);

        Ok(SoftwareProducer {
            shared,
            source: Arc::clone(&item.source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{DispatchFlow, FrameDispatcherBuilder};

    fn setup() -> (SoftwareBackend, SourceFeeder, SoftwareDevice, SoftwareItem) {
        let backend = SoftwareBackend::with_pool(BufferPool::new());
        let source = CaptureSource::window(42);
        let feeder = backend.register_source(source, Size::new(4, 4));
        let device = backend.create_device().unwrap();
        let item = backend.resolve_source(&source).unwrap();
        (backend, feeder, device, item)
    }

    #[test]
    fn test_push_requires_started_producer() {
        let (backend, feeder, device, item) = setup();
        assert!(!feeder.push_frame(Size::new(4, 4), [1, 2, 3, 255]).unwrap());

        let dispatcher = FrameDispatcherBuilder::new()
            .spawn(|| DispatchFlow::Continue)
            .unwrap();
        let mut producer = backend
            .create_producer(&device, &item, Size::new(4, 4), &CaptureConfig::default(), dispatcher.signal())
            .unwrap();
        assert!(!feeder.push_frame(Size::new(4, 4), [1, 2, 3, 255]).unwrap());

        producer.start().unwrap();
        assert!(feeder.push_frame(Size::new(4, 4), [1, 2, 3, 255]).unwrap());
    }

    #[test]
    fn test_refused_start_and_empty_frames() {
        let (backend, feeder, device, item) = setup();
        let dispatcher = FrameDispatcherBuilder::new()
            .spawn(|| DispatchFlow::Continue)
            .unwrap();
        let mut producer = backend
            .create_producer(&device, &item, Size::new(4, 4), &CaptureConfig::default(), dispatcher.signal())
            .unwrap();

        feeder.refuse_next_start();
        assert!(matches!(producer.start(), Err(CaptureError::DeviceError(_))));
        assert!(!feeder.wake());
        assert!(!feeder.push_empty_frame());

        producer.start().unwrap();
        assert!(feeder.wake());
        assert!(feeder.push_empty_frame());

        let frame = producer.try_next_frame().unwrap();
        assert!(frame.content_size().is_empty());
        assert!(frame.pixels().is_empty());

        let mut surface = backend.create_surface(&device, Size::new(4, 4)).unwrap();
        assert!(surface.copy_frame(&frame).is_ok());
    }

    #[test]
    fn test_queue_keeps_newest_frames() {
        let (backend, feeder, device, item) = setup();
        let dispatcher = FrameDispatcherBuilder::new()
            .spawn(|| DispatchFlow::Continue)
            .unwrap();
        let mut producer = backend
            .create_producer(&device, &item, Size::new(4, 4), &CaptureConfig::default(), dispatcher.signal())
            .unwrap();
        producer.start().unwrap();

        for value in 1..=3u8 {
            feeder.push_frame(Size::new(4, 4), [value, 0, 0, 255]).unwrap();
        }
        assert_eq!(feeder.frames_dropped(), 1);
        assert_eq!(feeder.frames_outstanding(), 2);

        let frame = producer.try_next_frame().unwrap();
        assert_eq!(frame.pixels()[0], 2);
        drop(frame);
        assert_eq!(feeder.frames_outstanding(), 1);

        producer.close();
        assert_eq!(feeder.frames_outstanding(), 0);
        assert!(!feeder.is_attached());
    }

    #[test]
    fn test_surface_present_flips_buffers() {
        let (backend, feeder, device, item) = setup();
        let mut surface = backend.create_surface(&device, Size::new(4, 4)).unwrap();
        let handle = surface.handle();
        assert!(handle.front_image().is_none());

        let dispatcher = FrameDispatcherBuilder::new()
            .spawn(|| DispatchFlow::Continue)
            .unwrap();
        let mut producer = backend
            .create_producer(&device, &item, Size::new(4, 4), &CaptureConfig::default(), dispatcher.signal())
            .unwrap();
        producer.start().unwrap();
        feeder.push_frame(Size::new(4, 4), [9, 8, 7, 255]).unwrap();

        let frame = producer.try_next_frame().unwrap();
        surface.copy_frame(&frame).unwrap();
        surface.present().unwrap();

        let front = handle.front_image().unwrap();
        assert_eq!(front.get_pixel(3, 3).unwrap(), &[9, 8, 7, 255]);
        assert_eq!(handle.present_count(), 1);

        surface.release();
        assert!(!handle.is_alive());
        assert!(handle.front_image().is_none());
    }

    #[test]
    fn test_lost_device_fails_copy() {
        let (backend, feeder, device, item) = setup();
        let mut surface = backend.create_surface(&device, Size::new(4, 4)).unwrap();
        let dispatcher = FrameDispatcherBuilder::new()
            .spawn(|| DispatchFlow::Continue)
            .unwrap();
        let mut producer = backend
            .create_producer(&device, &item, Size::new(4, 4), &CaptureConfig::default(), dispatcher.signal())
            .unwrap();
        producer.start().unwrap();
        feeder.push_frame(Size::new(4, 4), [0, 0, 0, 255]).unwrap();
        feeder.lose_device();

        let frame = producer.try_next_frame().unwrap();
        assert!(matches!(
            surface.copy_frame(&frame),
            Err(CaptureError::DeviceLost(_))
        ));
    }

    #[test]
    fn test_closed_source_cannot_be_resolved() {
        let (backend, feeder, _device, _item) = setup();
        feeder.close_source();
        assert!(matches!(
            backend.resolve_source(&feeder.source()),
            Err(CaptureError::DeviceError(_))
        ));
    }

    #[test]
    fn test_snapshot_applies_opacity() {
        let (backend, feeder, device, item) = setup();
        let mut surface = backend.create_surface(&device, Size::new(4, 4)).unwrap();
        let dispatcher = FrameDispatcherBuilder::new()
            .spawn(|| DispatchFlow::Continue)
            .unwrap();
        let mut producer = backend
            .create_producer(&device, &item, Size::new(4, 4), &CaptureConfig::default(), dispatcher.signal())
            .unwrap();
        producer.start().unwrap();
        feeder.push_frame(Size::new(4, 4), [200, 100, 50, 255]).unwrap();
        let frame = producer.try_next_frame().unwrap();
        surface.copy_frame(&frame).unwrap();
        surface.present().unwrap();

        let mut visual = SoftwareVisual::new();
        assert!(visual.snapshot().is_none());
        visual.set_surface(Some(&surface.handle())).unwrap();
        visual
            .set_placement(&ContentPlacement {
                content_size: Size::new(4, 4),
                display_size: Size::new(8, 8),
                transform: Default::default(),
            })
            .unwrap();
        visual.set_opacity(0.5).unwrap();

        let image = visual.snapshot().unwrap();
        assert_eq!(image.size(), Size::new(8, 8));
        assert_eq!(image.get_pixel(7, 7).unwrap(), &[100, 50, 25, 128]);
    }
}
