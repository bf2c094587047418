//! Console: satu ring buffer + satu event loop
//!
//! Hardware stream -> `RingBuffer::queue` -> fan-out ke consumer milik handler.
//! Management channel diteruskan ke processor eksternal.

mod channel;
mod handler;
mod server;

pub use channel::{Device, Management};
pub use handler::{Handler, HandlerContext};
pub use server::{Console, State};
