//! Event loop berbasis poll(2) dengan source dinamis
//!
//! Tabel source dan tabel `pollfd` selalu sejajar: entry ke-`i` di satu tabel
//! adalah pasangan entry ke-`i` di tabel lain. Semua insert/remove menjaga
//! korespondensi ini.
//!
//! Selama dispatch pass tidak ada mutasi tabel. Callback yang minta `Remove`
//! hanya ditandai, lalu dihapus setelah pass selesai (deferred removal).
//! Registrasi baru dari dalam callback ditahan di `pending` dan ditambahkan
//! paling akhir.

use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use log::debug;

use super::{Interest, InterestHandle, Readiness, Timer};
use crate::error::Error;
use crate::signal::Interrupt;

/// Opaque handle untuk satu event source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(u64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Hasil callback source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Lepas source ini setelah dispatch pass
    Remove,
    /// Hentikan loop dengan error
    Fatal,
}

/// Readiness event untuk satu source
#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub source: SourceId,
    pub fd: RawFd,
    pub readiness: Readiness,
}

pub type EventFn<C> = Box<dyn FnMut(&mut C, &mut Control<'_, C>, Event) -> Flow>;
pub type TimeoutFn<C> = Box<dyn FnMut(&mut C, &mut Control<'_, C>) -> Flow>;

struct Source<C> {
    id: SourceId,
    // `None` hanya selama callback-nya sedang berjalan
    on_event: Option<EventFn<C>>,
    on_timeout: Option<TimeoutFn<C>>,
    // Sumber kebenaran untuk `pollfd.events`, disalin sebelum wait
    interest: InterestHandle,
    timer: Timer,
    remove: bool,
}

/// Single-threaded poll(2) multiplexer.
///
/// `C` adalah context yang diteruskan ke setiap callback pada `run_once`
/// (untuk console: `RingBuffer`). Data milik handler hidup di closure.
pub struct EventLoop<C> {
    sources: Vec<Source<C>>,
    // Companion table, index sama dengan `sources`
    pollfds: Vec<libc::pollfd>,
    pending: Vec<(Source<C>, libc::pollfd)>,
    next_id: u64,
    interrupt: Option<Interrupt>,
}

impl<C> Default for EventLoop<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> EventLoop<C> {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
            pollfds: Vec::new(),
            pending: Vec::new(),
            next_id: 0,
            interrupt: None,
        }
    }

    /// Interrupt yang dicek saat poll(2) kena EINTR. Jika sudah di-request,
    /// `run_once` langsung return tanpa dispatch.
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.interrupt = Some(interrupt);
    }

    /// Jumlah source terdaftar (tidak termasuk pending)
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.index_of(id).is_some() || self.pending_index_of(id).is_some()
    }

    /// Register source tanpa idle timeout
    pub fn register<E>(&mut self, fd: RawFd, interest: Interest, on_event: E) -> SourceId
    where
        E: FnMut(&mut C, &mut Control<'_, C>, Event) -> Flow + 'static,
    {
        let (source, pollfd) = self.build(fd, interest, Box::new(on_event), None);
        self.insert(source, pollfd)
    }

    /// Register source dengan callback untuk deadline yang di-arm via `arm_timeout`/`Timer`
    pub fn register_with_timeout<E, T>(
        &mut self,
        fd: RawFd,
        interest: Interest,
        on_event: E,
        on_timeout: T,
    ) -> SourceId
    where
        E: FnMut(&mut C, &mut Control<'_, C>, Event) -> Flow + 'static,
        T: FnMut(&mut C, &mut Control<'_, C>) -> Flow + 'static,
    {
        let (source, pollfd) =
            self.build(fd, interest, Box::new(on_event), Some(Box::new(on_timeout)));
        self.insert(source, pollfd)
    }

    /// Lepas source, entry sesudahnya bergeser satu slot di kedua tabel.
    ///
    /// Jangan dipanggil dari dalam callback; gunakan `Control::unregister`.
    pub fn unregister(&mut self, id: SourceId) -> bool {
        if let Some(index) = self.index_of(id) {
            self.remove_at(index);
            return true;
        }

        if let Some(index) = self.pending_index_of(id) {
            self.pending.remove(index);
            return true;
        }

        false
    }

    /// Ganti interest mask; berlaku mulai wait berikutnya
    pub fn set_interest(&mut self, id: SourceId, interest: Interest) -> bool {
        match self.source(id) {
            Some(source) => {
                source.interest.set(interest);
                true
            }
            None => false,
        }
    }

    pub fn interest(&self, id: SourceId) -> Option<Interest> {
        self.source(id).map(|s| s.interest.get())
    }

    /// Handle ke interest mask source, bisa disimpan di drain callback
    pub fn interest_handle(&self, id: SourceId) -> Option<InterestHandle> {
        self.source(id).map(|s| s.interest.clone())
    }

    /// Arm deadline `after` dari sekarang (monotonic)
    pub fn arm_timeout(&mut self, id: SourceId, after: Duration) -> bool {
        match self.timer(id) {
            Some(timer) => {
                timer.arm(after);
                true
            }
            None => false,
        }
    }

    pub fn clear_timeout(&mut self, id: SourceId) -> bool {
        match self.timer(id) {
            Some(timer) => {
                timer.clear();
                true
            }
            None => false,
        }
    }

    /// Handle ke deadline source, bisa disimpan di drain callback
    pub fn timer(&self, id: SourceId) -> Option<Timer> {
        self.source(id).map(|s| s.timer.clone())
    }

    /// Timeout poll(2) dalam milidetik.
    ///
    /// `0` jika ada deadline yang sudah lewat, `-1` jika tidak ada deadline sama
    /// sekali, selain itu ceil dari sisa waktu ke deadline terdekat. Hanya
    /// source yang punya timeout callback yang dihitung.
    pub fn next_wait_millis(&self, now: Instant) -> i64 {
        let earliest = self
            .sources
            .iter()
            .filter(|s| s.on_timeout.is_some())
            .filter_map(|s| s.timer.deadline())
            .min();

        match earliest {
            None => -1,
            Some(deadline) if deadline <= now => 0,
            Some(deadline) => {
                let nanos = (deadline - now).as_nanos();
                let millis = (nanos + 999_999) / 1_000_000;
                i64::try_from(millis).unwrap_or(i64::MAX)
            }
        }
    }

    /// Satu iterasi: wait, dispatch, deferred removal, tambahkan pending.
    pub fn run_once(&mut self, ctx: &mut C) -> Result<(), Error> {
        loop {
            let timeout = self.next_wait_millis(Instant::now());

            match self.wait(timeout) {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if self.interrupt.as_ref().is_some_and(Interrupt::is_requested) {
                        debug!("poll interrupted, shutdown requested");
                        return Ok(());
                    }
                    debug!("poll interrupted, retrying");
                }
                Err(e) => return Err(Error::Wait(e)),
            }
        }

        // Clock dibaca ulang setelah wait supaya deadline yang membangunkan
        // poll langsung expire di pass ini
        self.dispatch(ctx, Instant::now())?;
        self.process_removals();
        self.splice_pending();

        Ok(())
    }

    fn wait(&mut self, timeout: i64) -> io::Result<usize> {
        let timeout = timeout.clamp(-1, libc::c_int::MAX as i64) as libc::c_int;

        for (pollfd, source) in self.pollfds.iter_mut().zip(&self.sources) {
            pollfd.events = source.interest.get().bits();
            pollfd.revents = 0;
        }

        // SAFETY: pointer dan panjang berasal dari Vec yang sama dan tidak
        // di-resize selama call
        let rc = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout,
            )
        };

        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }

    /// Dispatch pass atas hasil wait terakhir.
    ///
    /// `now` adalah clock yang dibaca setelah wait, bukan `now` yang dipakai
    /// untuk menghitung timeout poll(2). Deadline yang membuat poll bangun
    /// langsung dianggap expire di pass yang sama, tanpa iterasi tambahan
    /// dengan timeout 0.
    fn dispatch(&mut self, ctx: &mut C, now: Instant) -> Result<(), Error> {
        // Panjang tabel tetap selama pass: Control tidak pernah menggeser entry
        for index in 0..self.sources.len() {
            let id = self.sources[index].id;
            let pollfd = self.pollfds[index];
            let mut flow = Flow::Continue;

            if pollfd.revents != 0 {
                if let Some(mut on_event) = self.sources[index].on_event.take() {
                    let event = Event {
                        source: id,
                        fd: pollfd.fd,
                        readiness: Readiness::from_bits_truncate(pollfd.revents),
                    };
                    flow = on_event(ctx, &mut Control { lp: self }, event);
                    self.sources[index].on_event = Some(on_event);
                }
            }

            match flow {
                Flow::Fatal => return Err(Error::SourceFatal(id)),
                Flow::Remove => self.sources[index].remove = true,
                Flow::Continue => {}
            }

            let source = &self.sources[index];
            if source.on_timeout.is_none() || !source.timer.take_expired(now) {
                continue;
            }

            if let Some(mut on_timeout) = self.sources[index].on_timeout.take() {
                let flow = on_timeout(ctx, &mut Control { lp: self });
                self.sources[index].on_timeout = Some(on_timeout);

                match flow {
                    Flow::Fatal => return Err(Error::SourceFatal(id)),
                    Flow::Remove => self.sources[index].remove = true,
                    Flow::Continue => {}
                }
            }
        }

        Ok(())
    }

    /// Hapus satu source bertanda, lalu scan ulang dari awal karena index bergeser
    fn process_removals(&mut self) {
        while let Some(index) = self.sources.iter().position(|s| s.remove) {
            let id = self.sources[index].id;
            self.remove_at(index);
            debug!("{} removed after dispatch", id);
        }
    }

    fn splice_pending(&mut self) {
        for (source, pollfd) in self.pending.drain(..) {
            self.sources.push(source);
            self.pollfds.push(pollfd);
        }
    }

    fn build(
        &mut self,
        fd: RawFd,
        interest: Interest,
        on_event: EventFn<C>,
        on_timeout: Option<TimeoutFn<C>>,
    ) -> (Source<C>, libc::pollfd) {
        let id = SourceId(self.next_id);
        self.next_id += 1;

        let source = Source {
            id,
            on_event: Some(on_event),
            on_timeout,
            interest: InterestHandle::new(interest),
            timer: Timer::new(),
            remove: false,
        };
        let pollfd = libc::pollfd {
            fd,
            events: interest.bits(),
            revents: 0,
        };

        (source, pollfd)
    }

    fn insert(&mut self, source: Source<C>, pollfd: libc::pollfd) -> SourceId {
        let id = source.id;
        self.sources.push(source);
        self.pollfds.push(pollfd);
        debug_assert_eq!(self.sources.len(), self.pollfds.len());
        debug!("{} registered for fd {}", id, pollfd.fd);
        id
    }

    fn remove_at(&mut self, index: usize) {
        self.sources.remove(index);
        self.pollfds.remove(index);
        debug_assert_eq!(self.sources.len(), self.pollfds.len());
    }

    fn index_of(&self, id: SourceId) -> Option<usize> {
        self.sources.iter().position(|s| s.id == id)
    }

    fn pending_index_of(&self, id: SourceId) -> Option<usize> {
        self.pending.iter().position(|(s, _)| s.id == id)
    }

    fn source(&self, id: SourceId) -> Option<&Source<C>> {
        match self.index_of(id) {
            Some(index) => Some(&self.sources[index]),
            None => self.pending_index_of(id).map(|index| &self.pending[index].0),
        }
    }
}

/// Akses ke event loop dari dalam callback.
///
/// Semua operasi di sini aman selama dispatch: tidak ada yang menggeser index.
/// Registrasi masuk `pending`, unregister hanya menandai.
pub struct Control<'a, C> {
    lp: &'a mut EventLoop<C>,
}

impl<'a, C> Control<'a, C> {
    /// Register source baru; aktif mulai iterasi berikutnya
    pub fn register<E>(&mut self, fd: RawFd, interest: Interest, on_event: E) -> SourceId
    where
        E: FnMut(&mut C, &mut Control<'_, C>, Event) -> Flow + 'static,
    {
        let entry = self.lp.build(fd, interest, Box::new(on_event), None);
        let id = entry.0.id;
        self.lp.pending.push(entry);
        id
    }

    pub fn register_with_timeout<E, T>(
        &mut self,
        fd: RawFd,
        interest: Interest,
        on_event: E,
        on_timeout: T,
    ) -> SourceId
    where
        E: FnMut(&mut C, &mut Control<'_, C>, Event) -> Flow + 'static,
        T: FnMut(&mut C, &mut Control<'_, C>) -> Flow + 'static,
    {
        let entry = self.lp.build(
            fd,
            interest,
            Box::new(on_event),
            Some(Box::new(on_timeout)),
        );
        let id = entry.0.id;
        self.lp.pending.push(entry);
        id
    }

    /// Tandai source untuk dihapus setelah pass ini
    pub fn unregister(&mut self, id: SourceId) -> bool {
        if let Some(index) = self.lp.index_of(id) {
            self.lp.sources[index].remove = true;
            return true;
        }

        match self.lp.pending_index_of(id) {
            Some(index) => {
                self.lp.pending.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn set_interest(&mut self, id: SourceId, interest: Interest) -> bool {
        self.lp.set_interest(id, interest)
    }

    pub fn arm_timeout(&mut self, id: SourceId, after: Duration) -> bool {
        self.lp.arm_timeout(id, after)
    }

    pub fn clear_timeout(&mut self, id: SourceId) -> bool {
        self.lp.clear_timeout(id)
    }

    pub fn timer(&self, id: SourceId) -> Option<Timer> {
        self.lp.timer(id)
    }

    pub fn interest_handle(&self, id: SourceId) -> Option<InterestHandle> {
        self.lp.interest_handle(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::fs::File;
    use std::io::Write;
    use std::mem;
    use std::os::fd::{AsRawFd, FromRawFd};
    use std::ptr;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use crate::core::{ConsumerId, Drain, RingBuffer};
    use crate::signal::{SigintGuard, SIGNAL_TEST_LOCK};

    fn pipe() -> (File, File) {
        let mut fds = [0 as libc::c_int; 2];
        // SAFETY: fds cukup untuk dua descriptor
        let rc = unsafe { libc::pipe(fds.as_mut_ptr()) };
        assert_eq!(rc, 0, "pipe: {}", io::Error::last_os_error());
        // SAFETY: kedua fd baru dibuat dan dimiliki di sini
        unsafe { (File::from_raw_fd(fds[0]), File::from_raw_fd(fds[1])) }
    }

    /// Pipe yang read end-nya sudah readable
    fn ready_pipe() -> (File, File) {
        let (rx, mut tx) = pipe();
        tx.write_all(b"x").unwrap();
        (rx, tx)
    }

    fn assert_tables_aligned<C>(lp: &EventLoop<C>) {
        assert_eq!(lp.sources.len(), lp.pollfds.len());
    }

    #[test]
    fn test_dispatch_safe_under_removal() {
        let mut lp: EventLoop<()> = EventLoop::new();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut pipes = Vec::new();
        let mut ids = Vec::new();

        for n in 0..6usize {
            let (rx, tx) = ready_pipe();
            let seen = Rc::clone(&calls);
            let id = lp.register(rx.as_raw_fd(), Interest::READABLE, move |_, _, _| {
                seen.borrow_mut().push(n);
                if n % 2 == 0 {
                    Flow::Remove
                } else {
                    Flow::Continue
                }
            });
            ids.push(id);
            pipes.push((rx, tx));
        }

        lp.run_once(&mut ()).unwrap();

        assert_eq!(*calls.borrow(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(lp.len(), 3);
        for (n, id) in ids.iter().enumerate() {
            assert_eq!(lp.contains(*id), n % 2 == 1);
        }
        assert_tables_aligned(&lp);

        for (n, id) in ids.iter().enumerate().filter(|(n, _)| n % 2 == 1) {
            let index = lp.index_of(*id).unwrap();
            assert_eq!(lp.pollfds[index].fd, pipes[n].0.as_raw_fd());
        }
    }

    #[test]
    fn test_unregister_keeps_index_correspondence() {
        let mut lp: EventLoop<()> = EventLoop::new();
        let pipes: Vec<_> = (0..3).map(|_| pipe()).collect();
        let ids: Vec<_> = pipes
            .iter()
            .map(|(rx, _)| {
                lp.register(rx.as_raw_fd(), Interest::READABLE, |_, _, _| Flow::Continue)
            })
            .collect();

        assert!(lp.set_interest(ids[2], Interest::WRITABLE));
        assert!(lp.unregister(ids[1]));
        assert!(!lp.unregister(ids[1]));

        assert_eq!(lp.len(), 2);
        assert_tables_aligned(&lp);
        assert_eq!(lp.pollfds[1].fd, pipes[2].0.as_raw_fd());
        assert_eq!(lp.interest(ids[2]), Some(Interest::WRITABLE));
        assert_eq!(lp.interest(ids[0]), Some(Interest::READABLE));
        assert_eq!(lp.interest(ids[1]), None);
    }

    #[test]
    fn test_next_wait_millis() {
        let mut lp: EventLoop<()> = EventLoop::new();
        let (rx, _tx) = pipe();
        let now = Instant::now();

        let plain = lp.register(rx.as_raw_fd(), Interest::READABLE, |_, _, _| Flow::Continue);
        let a = lp.register_with_timeout(
            rx.as_raw_fd(),
            Interest::READABLE,
            |_, _, _| Flow::Continue,
            |_, _| Flow::Continue,
        );
        let b = lp.register_with_timeout(
            rx.as_raw_fd(),
            Interest::READABLE,
            |_, _, _| Flow::Continue,
            |_, _| Flow::Continue,
        );

        assert_eq!(lp.next_wait_millis(now), -1);

        // Deadline tanpa timeout callback tidak dihitung
        lp.timer(plain).unwrap().arm_at(now);
        assert_eq!(lp.next_wait_millis(now), -1);

        lp.timer(a).unwrap().arm_at(now + Duration::from_micros(1500));
        assert_eq!(lp.next_wait_millis(now), 2);

        lp.timer(b).unwrap().arm_at(now + Duration::from_millis(40));
        assert_eq!(lp.next_wait_millis(now), 2);

        lp.timer(b).unwrap().arm_at(now + Duration::from_millis(1));
        assert_eq!(lp.next_wait_millis(now), 1);

        lp.timer(a).unwrap().arm_at(now);
        assert_eq!(lp.next_wait_millis(now), 0);

        lp.timer(a).unwrap().arm_at(now - Duration::from_millis(3));
        assert_eq!(lp.next_wait_millis(now), 0);

        lp.clear_timeout(a);
        lp.clear_timeout(b);
        assert_eq!(lp.next_wait_millis(now), -1);
    }

    #[test]
    fn test_timeout_fires_once_and_clears() {
        let mut lp: EventLoop<u32> = EventLoop::new();
        let (rx, _tx) = pipe();

        let id = lp.register_with_timeout(
            rx.as_raw_fd(),
            Interest::READABLE,
            |_, _, _| Flow::Continue,
            |fired: &mut u32, _| {
                *fired += 1;
                Flow::Continue
            },
        );

        let mut fired = 0;
        assert!(lp.arm_timeout(id, Duration::ZERO));
        lp.run_once(&mut fired).unwrap();

        assert_eq!(fired, 1);
        assert!(!lp.timer(id).unwrap().is_armed());
        assert_eq!(lp.next_wait_millis(Instant::now()), -1);
    }

    #[test]
    fn test_timeout_can_remove_source() {
        let mut lp: EventLoop<()> = EventLoop::new();
        let (rx, _tx) = pipe();

        let id = lp.register_with_timeout(
            rx.as_raw_fd(),
            Interest::READABLE,
            |_, _, _| Flow::Continue,
            |_, _| Flow::Remove,
        );
        lp.arm_timeout(id, Duration::ZERO);
        lp.run_once(&mut ()).unwrap();

        assert!(!lp.contains(id));
        assert!(lp.is_empty());
    }

    #[test]
    fn test_fatal_stops_dispatch() {
        let mut lp: EventLoop<()> = EventLoop::new();
        let (rx1, _tx1) = ready_pipe();
        let (rx2, _tx2) = ready_pipe();
        let later = Rc::new(Cell::new(false));

        let fatal = lp.register(rx1.as_raw_fd(), Interest::READABLE, |_, _, _| Flow::Fatal);
        let flag = Rc::clone(&later);
        lp.register(rx2.as_raw_fd(), Interest::READABLE, move |_, _, _| {
            flag.set(true);
            Flow::Continue
        });

        match lp.run_once(&mut ()) {
            Err(Error::SourceFatal(id)) => assert_eq!(id, fatal),
            other => panic!("expected fatal, got {:?}", other),
        }
        assert!(!later.get());
        assert_eq!(lp.len(), 2);
    }

    #[test]
    fn test_register_during_dispatch_is_deferred() {
        let mut lp: EventLoop<()> = EventLoop::new();
        let (rx, _tx) = ready_pipe();
        let fd = rx.as_raw_fd();
        let child_calls = Rc::new(Cell::new(0));
        let child_id = Rc::new(Cell::new(None));

        let calls = Rc::clone(&child_calls);
        let slot = Rc::clone(&child_id);
        lp.register(fd, Interest::READABLE, move |_, cx, _| {
            if slot.get().is_none() {
                let calls = Rc::clone(&calls);
                let id = cx.register(fd, Interest::READABLE, move |_, _, _| {
                    calls.set(calls.get() + 1);
                    Flow::Continue
                });
                slot.set(Some(id));
            }
            Flow::Continue
        });

        lp.run_once(&mut ()).unwrap();
        assert_eq!(child_calls.get(), 0);
        assert_eq!(lp.len(), 2);
        assert_tables_aligned(&lp);

        lp.run_once(&mut ()).unwrap();
        assert_eq!(child_calls.get(), 1);
        assert!(lp.contains(child_id.get().unwrap()));
    }

    #[test]
    fn test_control_unregister_marks_other_source() {
        let mut lp: EventLoop<()> = EventLoop::new();
        let (rx1, _tx1) = ready_pipe();
        let (rx2, _tx2) = pipe();

        let victim = lp.register(rx2.as_raw_fd(), Interest::READABLE, |_, _, _| Flow::Continue);
        lp.register(rx1.as_raw_fd(), Interest::READABLE, move |_, cx, _| {
            cx.unregister(victim);
            cx.set_interest(victim, Interest::WRITABLE);
            Flow::Continue
        });

        lp.run_once(&mut ()).unwrap();
        assert!(!lp.contains(victim));
        assert_eq!(lp.len(), 1);
    }

    #[test]
    fn test_event_reports_fd_and_readiness() {
        let mut lp: EventLoop<Vec<(RawFd, bool)>> = EventLoop::new();
        let (rx, _tx) = ready_pipe();
        let fd = rx.as_raw_fd();

        lp.register(fd, Interest::READABLE, |seen: &mut Vec<(RawFd, bool)>, _, event| {
            seen.push((event.fd, event.readiness.is_readable()));
            Flow::Continue
        });

        let mut seen = Vec::new();
        lp.run_once(&mut seen).unwrap();
        assert_eq!(seen, vec![(fd, true)]);
    }

    #[test]
    fn test_requested_interrupt_does_not_skip_ready_events() {
        let mut lp: EventLoop<()> = EventLoop::new();
        let interrupt = Interrupt::new();
        interrupt.request();
        lp.set_interrupt(interrupt.clone());

        // Tanpa EINTR, interrupt tidak memengaruhi dispatch
        let (rx, _tx) = ready_pipe();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        lp.register(rx.as_raw_fd(), Interest::READABLE, move |_, _, _| {
            h.set(h.get() + 1);
            Flow::Continue
        });

        lp.run_once(&mut ()).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_drain_callback_requests_writable() {
        let mut lp: EventLoop<RingBuffer> = EventLoop::new();
        let mut ring = RingBuffer::with_capacity(64).unwrap();
        let (_rx, tx) = pipe();

        let consumer: Rc<Cell<Option<ConsumerId>>> = Rc::new(Cell::new(None));
        let sent = Rc::new(RefCell::new(Vec::<u8>::new()));

        let slot = Rc::clone(&consumer);
        let out = Rc::clone(&sent);
        let id = lp.register(
            tx.as_raw_fd(),
            Interest::READABLE,
            move |ring: &mut RingBuffer, cx, event| {
                if event.readiness.is_writable() {
                    if let Some(consumer) = slot.get() {
                        let chunk = ring.peek(consumer, 0).to_vec();
                        ring.commit(consumer, chunk.len());
                        out.borrow_mut().extend_from_slice(&chunk);
                    }
                    if let Some(handle) = cx.interest_handle(event.source) {
                        handle.remove(Interest::WRITABLE);
                    }
                }
                Flow::Continue
            },
        );

        // Consumer yang socket-nya penuh: tunda kirim sampai fd writable
        let handle = lp.interest_handle(id).unwrap();
        consumer.set(Some(ring.register_consumer(move |reader, force_len| {
            if force_len == 0 && !reader.is_empty() {
                handle.insert(Interest::WRITABLE);
            }
            Drain::Ok
        })));

        ring.queue(b"hello").unwrap();
        assert_eq!(lp.interest(id), Some(Interest::READABLE | Interest::WRITABLE));

        lp.run_once(&mut ring).unwrap();
        assert_eq!(*sent.borrow(), b"hello");
        assert_eq!(lp.interest(id), Some(Interest::READABLE));
    }

    #[test]
    fn test_sigint_during_wait_returns_without_dispatch() {
        let _lock = SIGNAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut lp: EventLoop<()> = EventLoop::new();
        let interrupt = Interrupt::new();
        lp.set_interrupt(interrupt.clone());

        let (rx, _tx) = pipe();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        let id = lp.register_with_timeout(
            rx.as_raw_fd(),
            Interest::READABLE,
            |_, _, _| Flow::Continue,
            move |_, _| {
                f.set(true);
                Flow::Continue
            },
        );
        // Batas atas kalau sinyal datang sebelum poll mulai
        lp.arm_timeout(id, Duration::from_secs(2));

        let guard = SigintGuard::install(&interrupt).unwrap();
        // SAFETY: pthread_self tidak punya precondition
        let this = unsafe { libc::pthread_self() };
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            // SAFETY: thread tujuan menunggu join, jadi masih hidup
            unsafe {
                libc::pthread_kill(this, libc::SIGINT);
            }
        });

        lp.run_once(&mut ()).unwrap();
        sender.join().unwrap();
        drop(guard);

        assert!(interrupt.is_requested());
        assert!(!fired.get());
        assert!(lp.timer(id).unwrap().is_armed());
    }

    static USR1_SEEN: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn on_usr1(_signal: libc::c_int) {
        USR1_SEEN.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn test_wait_retries_after_unrelated_signal() {
        let _lock = SIGNAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut lp: EventLoop<()> = EventLoop::new();
        lp.set_interrupt(Interrupt::new());

        let (rx, mut tx) = pipe();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        lp.register(rx.as_raw_fd(), Interest::READABLE, move |_, _, _| {
            h.set(h.get() + 1);
            Flow::Continue
        });

        // SAFETY: sigaction di-zero lalu diisi; handler hanya atomic increment.
        // Tanpa SA_RESTART supaya poll(2) kembali dengan EINTR
        let previous = unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = on_usr1 as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);

            let mut previous: libc::sigaction = mem::zeroed();
            assert_eq!(libc::sigaction(libc::SIGUSR1, &action, &mut previous), 0);
            previous
        };

        let before = USR1_SEEN.load(Ordering::SeqCst);
        // SAFETY: pthread_self tidak punya precondition
        let this = unsafe { libc::pthread_self() };
        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            // SAFETY: thread tujuan menunggu join, jadi masih hidup
            unsafe {
                libc::pthread_kill(this, libc::SIGUSR1);
            }
            thread::sleep(Duration::from_millis(50));
            tx.write_all(b"x").unwrap();
        });

        lp.run_once(&mut ()).unwrap();
        sender.join().unwrap();

        // SAFETY: `previous` berasal dari sigaction yang sukses di atas
        unsafe {
            libc::sigaction(libc::SIGUSR1, &previous, ptr::null_mut());
        }

        assert!(USR1_SEEN.load(Ordering::SeqCst) > before);
        assert_eq!(hits.get(), 1);
    }
}
