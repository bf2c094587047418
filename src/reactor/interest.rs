//! Bit sets di atas event bits poll(2)

use std::cell::Cell;
use std::rc::Rc;

use bitflags::bitflags;

bitflags! {
    /// Event yang diminta sebuah source
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Interest: libc::c_short {
        const READABLE = libc::POLLIN;
        const PRIORITY = libc::POLLPRI;
        const WRITABLE = libc::POLLOUT;
    }
}

bitflags! {
    /// Event yang dilaporkan kernel (`revents`)
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Readiness: libc::c_short {
        const READABLE = libc::POLLIN;
        const PRIORITY = libc::POLLPRI;
        const WRITABLE = libc::POLLOUT;
        const ERROR = libc::POLLERR;
        const HANGUP = libc::POLLHUP;
        const INVALID = libc::POLLNVAL;
    }
}

impl Readiness {
    #[inline(always)]
    pub fn is_readable(self) -> bool {
        self.contains(Readiness::READABLE)
    }

    #[inline(always)]
    pub fn is_writable(self) -> bool {
        self.contains(Readiness::WRITABLE)
    }

    /// Peer hilang atau fd rusak
    #[inline(always)]
    pub fn is_closed(self) -> bool {
        self.intersects(Readiness::ERROR | Readiness::HANGUP | Readiness::INVALID)
    }
}

/// Interest mask sebuah source yang bisa dibagi ke consumer.
///
/// Sama seperti `Timer`: consumer yang kena `WouldBlock` saat notify bisa
/// minta `WRITABLE` dari dalam drain callback, saat event loop sedang
/// dipinjam `queue`. Mask disalin ke `pollfd` sebelum setiap wait.
#[derive(Clone, Debug)]
pub struct InterestHandle {
    mask: Rc<Cell<Interest>>,
}

impl InterestHandle {
    pub(crate) fn new(interest: Interest) -> Self {
        Self {
            mask: Rc::new(Cell::new(interest)),
        }
    }

    #[inline(always)]
    pub fn get(&self) -> Interest {
        self.mask.get()
    }

    pub fn set(&self, interest: Interest) {
        self.mask.set(interest);
    }

    pub fn insert(&self, interest: Interest) {
        self.mask.set(self.mask.get() | interest);
    }

    pub fn remove(&self, interest: Interest) {
        self.mask.set(self.mask.get() - interest);
    }
}
