//! Channel eksternal yang selalu aktif: hardware serial stream dan management bus.
//!
//! Console hanya butuh notifikasi readable dan operasi read/process;
//! konfigurasi device dan protokol bus ada di luar crate ini.

use std::io::{self, Read};
use std::os::fd::AsRawFd;

/// Byte stream dari hardware (UART, pty, pipe)
pub trait Device: Read + AsRawFd {}

impl<T: Read + AsRawFd> Device for T {}

/// Message-oriented control channel
pub trait Management: AsRawFd {
    /// Proses pesan yang sudah tersedia. Dipanggil saat fd readable.
    fn process(&mut self) -> io::Result<()>;
}
