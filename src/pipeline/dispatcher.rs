//! Frame dispatch worker
//!
//! Platform frame producers call back on threads they own. They only raise a
//! [`FrameSignal`]; a dedicated worker thread picks the wake-up up and runs the
//! per-frame handler. Handler invocations are strictly serialized, and
//! [`FrameDispatcher::stop`] drains the in-flight invocation before returning.

use crate::error::{CaptureError, CaptureResult};
use crate::types::FRAME_BUFFER_COUNT;

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

/// What the worker does after a handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchFlow {
    Continue,
    /// Stop dispatching; no further invocations happen
    Stop,
}

/// Wake-up handle given to the frame producer
#[derive(Debug, Clone)]
pub struct FrameSignal {
    tx: Sender<()>,
}

impl FrameSignal {
    /// Announce a produced frame. Never blocks.
    ///
    /// Returns false when the wake-up was dropped: either the queue already
    /// holds one wake-up per pooled frame, or the dispatcher is gone.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                log::trace!("frame wake-up coalesced, queue full");
                false
            }
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Worker thread name
    pub thread_name: String,
    /// Pending wake-ups kept before coalescing
    pub queue_depth: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            thread_name: "frame-dispatch".to_string(),
            queue_depth: FRAME_BUFFER_COUNT,
        }
    }
}

/// Serialized per-frame callback worker
pub struct FrameDispatcher {
    running: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    dispatched: Arc<AtomicU64>,
    signal: FrameSignal,
    control_tx: Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl FrameDispatcher {
    /// Spawn the worker thread with `handler` as the per-frame callback
    pub fn spawn<H>(config: DispatcherConfig, handler: H) -> CaptureResult<Self>
    where
        H: FnMut() -> DispatchFlow + Send + 'static,
    {
        let (signal_tx, signal_rx) = bounded::<()>(config.queue_depth.max(1));
        let (control_tx, control_rx) = bounded::<()>(1);

        let running = Arc::new(AtomicBool::new(true));
        let in_flight = Arc::new(AtomicBool::new(false));
        let dispatched = Arc::new(AtomicU64::new(0));

        let worker = {
            let running = Arc::clone(&running);
            let in_flight = Arc::clone(&in_flight);
            let dispatched = Arc::clone(&dispatched);

            thread::Builder::new()
                .name(config.thread_name.clone())
                .spawn(move || {
                    Self::run(signal_rx, control_rx, running, in_flight, dispatched, handler)
                })
                .map_err(|e| {
                    CaptureError::device(format!(
                        "failed to spawn {} worker: {}",
                        config.thread_name, e
                    ))
                })?
        };

        Ok(Self {
            running,
            in_flight,
            dispatched,
            signal: FrameSignal { tx: signal_tx },
            control_tx,
            worker: Some(worker),
        })
    }

    fn run<H>(
        signal_rx: Receiver<()>,
        control_rx: Receiver<()>,
        running: Arc<AtomicBool>,
        in_flight: Arc<AtomicBool>,
        dispatched: Arc<AtomicU64>,
        mut handler: H,
    ) where
        H: FnMut() -> DispatchFlow,
    {
        loop {
            select! {
                recv(control_rx) -> _ => break,
                recv(signal_rx) -> wake => {
                    if wake.is_err() || !running.load(Ordering::Acquire) {
                        break;
                    }

                    in_flight.store(true, Ordering::Release);
                    let flow = handler();
                    in_flight.store(false, Ordering::Release);
                    dispatched.fetch_add(1, Ordering::Relaxed);

                    if flow == DispatchFlow::Stop {
                        log::debug!("frame handler requested stop");
                        break;
                    }
                }
            }
        }
        running.store(false, Ordering::Release);
    }

    /// Signal handle for the producer side
    pub fn signal(&self) -> FrameSignal {
        self.signal.clone()
    }

    /// Check if the worker still dispatches frames
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True while a handler invocation is executing
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Number of completed handler invocations
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Stop the worker, waiting for an in-flight invocation to finish.
    ///
    /// Idempotent. Once this returns (from any thread other than the worker
    /// itself) the handler is never invoked again.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let _ = self.control_tx.try_send(());

        let Some(worker) = self.worker.take() else {
            return;
        };

        if worker.thread().id() == thread::current().id() {
            log::warn!("frame dispatcher stopped from its own worker; not joining");
            return;
        }

        if worker.join().is_err() {
            log::error!("frame dispatch worker panicked");
        }
    }
}

impl Drop for FrameDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder for frame dispatchers
pub struct FrameDispatcherBuilder {
    config: DispatcherConfig,
}

impl FrameDispatcherBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
        }
    }

    /// Set the worker thread name
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Set the wake-up queue depth
    pub fn queue_depth(mut self, depth: usize) -> Self {
        self.config.queue_depth = depth;
        self
    }

    /// Spawn the dispatcher
    pub fn spawn<H>(self, handler: H) -> CaptureResult<FrameDispatcher>
    where
        H: FnMut() -> DispatchFlow + Send + 'static,
    {
        FrameDispatcher::spawn(self.config, handler)
    }
}

impl Default for FrameDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
