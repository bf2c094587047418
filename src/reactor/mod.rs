//! Reactor: poll(2) event loop untuk console
//!
//! Fitur:
//! - Source dinamis (register/unregister kapan saja di luar dispatch)
//! - Idle timeout per source di atas monotonic clock
//! - Interest dan deadline bisa diubah consumer lewat handle bersama
//! - Deferred removal, aman untuk mutasi dari dalam callback

mod event_loop;
mod interest;
mod timer;

pub use event_loop::{Control, Event, EventFn, EventLoop, Flow, SourceId, TimeoutFn};
pub use interest::{Interest, InterestHandle, Readiness};
pub use timer::Timer;
