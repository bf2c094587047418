//! consoled - Serial Console Aggregator Core
//!
//! Arsitektur:
//! - Ring Buffer: satu byte stream, banyak consumer, backpressure sinkron
//! - Reactor: poll(2) event loop dengan source dinamis dan idle timeout
//! - Console: hardware stream -> ring buffer -> consumer milik handler
//!
//! Single-threaded: satu-satunya operasi yang boleh blocking adalah poll(2),
//! plus forced drain yang diminta ring buffer ke consumer yang tertinggal.

pub mod config;
pub mod console;
pub mod core;
pub mod error;
pub mod reactor;
pub mod signal;

pub use crate::config::ConsoleConfig;
pub use crate::console::{Console, Device, Handler, HandlerContext, Management, State};
pub use crate::core::{ConsumerId, Drain, Overflow, Reader, RingBuffer};
pub use crate::error::{Error, Result};
pub use crate::reactor::{
    Control, Event, EventLoop, Flow, Interest, InterestHandle, Readiness, SourceId, Timer,
};
pub use crate::signal::{Interrupt, SigintGuard};
