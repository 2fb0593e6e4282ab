//! Frame delivery pipeline

pub mod dispatcher;

pub use dispatcher::{
    DispatchFlow, DispatcherConfig, FrameDispatcher, FrameDispatcherBuilder, FrameSignal,
};
