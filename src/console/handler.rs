//! Handler: capability record yang dibangun oleh entry point dan diserahkan
//! ke `Console::new`. Tidak ada discovery otomatis.

use crate::core::RingBuffer;
use crate::error::Result;
use crate::reactor::EventLoop;

/// Akses yang diberikan ke handler saat `init` dan `fini`
pub struct HandlerContext<'a> {
    pub events: &'a mut EventLoop<RingBuffer>,
    pub ring: &'a mut RingBuffer,
}

pub trait Handler {
    fn name(&self) -> &str;

    /// Register source dan consumer milik handler. Error membuat handler
    /// inactive; console tetap jalan.
    fn init(&mut self, cx: &mut HandlerContext<'_>) -> Result<()>;

    /// Teardown: lepas semua source dan consumer yang masih dipegang.
    /// Hanya dipanggil untuk handler yang aktif.
    fn fini(&mut self, cx: &mut HandlerContext<'_>);

    fn baudrate_changed(&mut self, _baudrate: u32) -> Result<()> {
        Ok(())
    }
}
