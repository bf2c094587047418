//! Deadline cell yang bisa dibagi antara event loop dan consumer.
//!
//! Consumer yang buffering (menunggu cukup banyak data atau idle timeout)
//! perlu meng-arm timeout source-nya dari dalam drain callback, saat event
//! loop tidak bisa dipinjam. `Timer` adalah handle `Rc` ke deadline yang sama
//! dengan yang dibaca loop.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Absolute deadline di atas monotonic clock (`Instant`)
#[derive(Clone, Debug, Default)]
pub struct Timer {
    deadline: Rc<Cell<Option<Instant>>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm deadline `after` dari sekarang.
    ///
    /// Durasi yang overflow `Instant` berarti tidak pernah expire, jadi timer di-clear.
    pub fn arm(&self, after: Duration) {
        self.deadline.set(Instant::now().checked_add(after));
    }

    pub fn arm_at(&self, deadline: Instant) {
        self.deadline.set(Some(deadline));
    }

    pub fn clear(&self) {
        self.deadline.set(None);
    }

    #[inline(always)]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }

    #[inline(always)]
    pub fn is_armed(&self) -> bool {
        self.deadline.get().is_some()
    }

    /// Clear dan return `true` jika deadline sudah lewat pada `now`
    pub(crate) fn take_expired(&self, now: Instant) -> bool {
        match self.deadline.get() {
            Some(deadline) if deadline <= now => {
                self.deadline.set(None);
                true
            }
            _ => false,
        }
    }
}
