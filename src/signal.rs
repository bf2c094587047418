//! Shutdown request: atomic flag yang di-poll sekali per iterasi loop.
//!
//! SIGINT bisa diarahkan ke flag yang sama lewat `SigintGuard`. Handler-nya
//! hanya melakukan satu atomic store, jadi async-signal-safe.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::Arc;

/// Flag yang dibaca oleh handler SIGINT; null jika tidak ada guard aktif
static SIGINT_TARGET: AtomicPtr<AtomicBool> = AtomicPtr::new(ptr::null_mut());

/// Shareable shutdown flag
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

extern "C" fn on_sigint(_signal: libc::c_int) {
    let target = SIGINT_TARGET.load(Ordering::Acquire);
    if !target.is_null() {
        // SAFETY: guard yang memasang pointer ini memegang Arc-nya sampai
        // handler lama dipulihkan
        unsafe { (*target).store(true, Ordering::Release) };
    }
}

/// SIGINT handler yang aktif selama guard hidup.
///
/// Dipasang tanpa `SA_RESTART` supaya poll(2) kembali dengan EINTR dan loop
/// langsung melihat request. Disposition lama dipulihkan saat drop.
///
/// Hanya satu guard yang boleh aktif per proses; `install` kedua gagal dengan
/// `ErrorKind::AlreadyExists` sampai guard pertama di-drop.
pub struct SigintGuard {
    previous: libc::sigaction,
    // Menjaga flag tetap hidup selama pointer-nya terpasang
    _interrupt: Interrupt,
}

impl SigintGuard {
    pub fn install(interrupt: &Interrupt) -> io::Result<Self> {
        let interrupt = interrupt.clone();
        let target = Arc::as_ptr(&interrupt.flag) as *mut AtomicBool;

        if SIGINT_TARGET
            .compare_exchange(ptr::null_mut(), target, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "another SIGINT guard is already installed",
            ));
        }

        // SAFETY: sigaction di-zero lalu diisi field yang dibutuhkan; pointer
        // yang diberikan ke kernel valid selama call
        let previous = unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = on_sigint as extern "C" fn(libc::c_int) as libc::sighandler_t;
            action.sa_flags = 0;
            libc::sigemptyset(&mut action.sa_mask);

            let mut previous: libc::sigaction = mem::zeroed();
            if libc::sigaction(libc::SIGINT, &action, &mut previous) != 0 {
                let err = io::Error::last_os_error();
                SIGINT_TARGET.store(ptr::null_mut(), Ordering::Release);
                return Err(err);
            }
            previous
        };

        Ok(Self {
            previous,
            _interrupt: interrupt,
        })
    }
}

impl Drop for SigintGuard {
    fn drop(&mut self) {
        // SAFETY: `previous` berasal dari sigaction yang sukses di `install`
        unsafe {
            libc::sigaction(libc::SIGINT, &self.previous, ptr::null_mut());
        }
        // Setelah handler lama kembali, flag boleh dilepas
        SIGINT_TARGET.store(ptr::null_mut(), Ordering::Release);
    }
}

/// Serialisasi test yang memasang signal handler proses
#[cfg(test)]
pub(crate) static SIGNAL_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
