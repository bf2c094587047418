//! Core module: Multi-Consumer Byte Ring Buffer dengan Mmap backing
//!
//! Prinsip desain:
//! - Fan-out: satu write cursor, read cursor per consumer
//! - Backpressure: consumer lambat dipaksa drain, bukan data yang dibuang
//! - No-Allocation: storage di-mmap sekali saat init

mod ring_buffer;

pub use ring_buffer::{ConsumerId, Drain, DrainFn, Overflow, Reader, RingBuffer};
