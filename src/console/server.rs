//! Console server loop

use std::io::{self, Read};

use log::{debug, error, info, warn};

use super::{Device, Handler, HandlerContext, Management};
use crate::config::ConsoleConfig;
use crate::core::RingBuffer;
use crate::error::Result;
use crate::reactor::{Event, EventLoop, Flow, Interest, Readiness, SourceId};
use crate::signal::{Interrupt, SigintGuard};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Running,
    ShuttingDown,
    Stopped,
}

struct Registered {
    handler: Box<dyn Handler>,
    active: bool,
}

/// Serial console aggregator
///
/// Hardware dan management channel didaftarkan sebagai source biasa di event
/// loop yang sama dengan source milik handler.
pub struct Console {
    config: ConsoleConfig,
    ring: RingBuffer,
    events: EventLoop<RingBuffer>,
    handlers: Vec<Registered>,
    device: SourceId,
    management: Option<SourceId>,
    interrupt: Interrupt,
    state: State,
    baudrate: Option<u32>,
}

impl Console {
    /// Membuat console: validasi config, alokasi ring buffer, register
    /// hardware channel, lalu `init` setiap handler sesuai urutan.
    pub fn new<D>(config: ConsoleConfig, device: D, handlers: Vec<Box<dyn Handler>>) -> Result<Self>
    where
        D: Device + 'static,
    {
        config.validate()?;

        let mut ring = RingBuffer::with_capacity(config.buffer_size)?;
        let mut events = EventLoop::new();
        let interrupt = Interrupt::new();
        events.set_interrupt(interrupt.clone());

        let device = register_device(&mut events, device, config.read_chunk);

        info!(
            "{} handler{}",
            handlers.len(),
            if handlers.len() == 1 { "" } else { "s" }
        );

        let mut registered = Vec::with_capacity(handlers.len());
        for mut handler in handlers {
            let mut cx = HandlerContext {
                events: &mut events,
                ring: &mut ring,
            };

            let active = match handler.init(&mut cx) {
                Ok(()) => true,
                Err(e) => {
                    warn!("handler {} failed to init: {}", handler.name(), e);
                    false
                }
            };

            info!(
                "  {} [{}active]",
                handler.name(),
                if active { "" } else { "in" }
            );
            registered.push(Registered { handler, active });
        }

        Ok(Self {
            config,
            ring,
            events,
            handlers: registered,
            device,
            management: None,
            interrupt,
            state: State::Running,
            baudrate: None,
        })
    }

    /// Pasang management channel sebagai source biasa
    pub fn attach_management<M>(&mut self, management: M) -> SourceId
    where
        M: Management + 'static,
    {
        if let Some(old) = self.management.take() {
            self.events.unregister(old);
        }

        let id = register_management(&mut self.events, management);
        self.management = Some(id);
        id
    }

    #[inline(always)]
    pub fn state(&self) -> State {
        self.state
    }

    /// Handle untuk minta shutdown dari luar loop
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn ring(&self) -> &RingBuffer {
        &self.ring
    }

    pub fn events(&self) -> &EventLoop<RingBuffer> {
        &self.events
    }

    pub fn device_source(&self) -> SourceId {
        self.device
    }

    pub fn baudrate(&self) -> Option<u32> {
        self.baudrate
    }

    /// Nama handler yang aktif, sesuai urutan init
    pub fn active_handlers(&self) -> impl Iterator<Item = &str> {
        self.handlers
            .iter()
            .filter(|r| r.active)
            .map(|r| r.handler.name())
    }

    /// Simpan baudrate baru dan beritahu handler yang aktif.
    ///
    /// Konfigurasi termios device ada di luar crate; kegagalan handler hanya di-log.
    pub fn set_baudrate(&mut self, baudrate: u32) {
        self.baudrate = Some(baudrate);

        for r in self.handlers.iter_mut().filter(|r| r.active) {
            if let Err(e) = r.handler.baudrate_changed(baudrate) {
                warn!(
                    "can't set baudrate {} for handler {}: {}",
                    baudrate,
                    r.handler.name(),
                    e
                );
            }
        }
    }

    /// Main loop sampai interrupt atau fatal.
    ///
    /// Interrupt dicek sekali per iterasi, tidak pernah di tengah dispatch.
    pub fn run(&mut self) -> Result<()> {
        let _sigint = if self.config.catch_sigint {
            Some(SigintGuard::install(&self.interrupt)?)
        } else {
            None
        };

        let result = loop {
            if self.state != State::Running {
                break Ok(());
            }

            if self.interrupt.is_requested() {
                info!("received interrupt, exiting");
                break Ok(());
            }

            if let Err(e) = self.run_once() {
                error!("console loop failed: {}", e);
                break Err(e);
            }
        };

        if self.state == State::Running {
            self.state = State::ShuttingDown;
        }

        result
    }

    /// Satu iterasi event loop: wait, dispatch hardware/management/handler source
    pub fn run_once(&mut self) -> Result<()> {
        self.events.run_once(&mut self.ring)
    }

    /// Jalankan `fini` semua handler aktif, lalu lepas ring buffer dan event loop
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if self.state == State::Stopped {
            return;
        }

        for r in self.handlers.iter_mut().filter(|r| r.active) {
            let mut cx = HandlerContext {
                events: &mut self.events,
                ring: &mut self.ring,
            };
            r.handler.fini(&mut cx);
            r.active = false;
            debug!("handler {} finished", r.handler.name());
        }

        self.events.unregister(self.device);
        if let Some(id) = self.management.take() {
            self.events.unregister(id);
        }

        self.state = State::Stopped;
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn register_device<D>(
    events: &mut EventLoop<RingBuffer>,
    mut device: D,
    read_chunk: usize,
) -> SourceId
where
    D: Device + 'static,
{
    let fd = device.as_raw_fd();
    let mut buf = vec![0u8; read_chunk];

    events.register(fd, Interest::READABLE, move |ring, _, event| {
        read_device(&mut device, &mut buf, ring, event)
    })
}

fn read_device<D: Read>(
    device: &mut D,
    buf: &mut [u8],
    ring: &mut RingBuffer,
    event: Event,
) -> Flow {
    if event.readiness.contains(Readiness::INVALID) {
        error!("hardware channel fd {} is invalid", event.fd);
        return Flow::Fatal;
    }

    match device.read(buf) {
        Ok(0) => {
            error!("hardware channel closed");
            Flow::Fatal
        }
        Ok(n) => match ring.queue(&buf[..n]) {
            Ok(()) => Flow::Continue,
            Err(e) => {
                error!("dropping hardware data: {}", e);
                Flow::Fatal
            }
        },
        Err(ref e)
            if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted =>
        {
            Flow::Continue
        }
        Err(e) => {
            error!("error reading from hardware channel: {}", e);
            Flow::Fatal
        }
    }
}

fn register_management<M>(events: &mut EventLoop<RingBuffer>, mut management: M) -> SourceId
where
    M: Management + 'static,
{
    let fd = management.as_raw_fd();

    events.register(fd, Interest::READABLE, move |_, _, event| {
        if event.readiness.contains(Readiness::INVALID) {
            error!("management channel fd {} is invalid", event.fd);
            return Flow::Fatal;
        }

        if let Err(e) = management.process() {
            warn!("management channel: {}", e);
        }
        Flow::Continue
    })
}
