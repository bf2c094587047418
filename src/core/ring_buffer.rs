//! Multi-Consumer Byte Ring Buffer dengan backpressure
//!
//! Satu producer (hardware stream), banyak consumer dengan read cursor sendiri.
//! Satu slot dicadangkan sebagai sentinel full/empty, jadi payload yang bisa
//! ditampung maksimal `capacity - 1` bytes per consumer.
//!
//! Backpressure:
//! - Sebelum write, consumer yang ruangnya kurang dipanggil dengan
//!   `force_len > 0` dan HARUS commit minimal sebanyak itu (boleh blocking).
//! - Consumer yang gagal di-evict. Producer dan consumer lain tetap jalan.
//! - Setelah write, semua consumer dapat notifikasi non-blocking (`force_len == 0`).

use std::fmt;
use std::io;

use log::{debug, warn};
use memmap2::MmapMut;
use thiserror::Error;

/// Opaque handle untuk satu consumer yang terdaftar
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer#{}", self.0)
    }
}

/// Hasil dari drain callback
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Drain {
    /// Consumer masih sehat. Untuk forced drain, berarti `force_len` sudah di-commit.
    Ok,
    /// Consumer minta (atau harus) dilepas dari buffer.
    Remove,
}

/// Payload yang tidak akan pernah muat, bahkan saat buffer kosong
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("payload of {len} bytes can never fit a ring buffer of capacity {capacity}")]
pub struct Overflow {
    pub len: usize,
    pub capacity: usize,
}

/// Drain callback: `(reader, force_len) -> Drain`
///
/// `force_len == 0` adalah notifikasi "ada data baru", consumer bebas
/// memutuskan kapan membaca. `force_len > 0` adalah permintaan sinkron untuk
/// membebaskan minimal `force_len` bytes sebelum return.
pub type DrainFn = Box<dyn FnMut(&mut Reader<'_>, usize) -> Drain>;

struct Consumer {
    id: ConsumerId,
    pos: usize,
    drain: DrainFn,
}

/// View ke unread span milik satu consumer.
///
/// Diberikan ke drain callback supaya consumer bisa `commit` di tengah
/// `queue` tanpa meminjam `RingBuffer` lagi.
pub struct Reader<'a> {
    storage: &'a [u8],
    tail: usize,
    pos: &'a mut usize,
}

impl<'a> Reader<'a> {
    /// Jumlah bytes yang belum dibaca consumer ini
    #[inline(always)]
    pub fn len(&self) -> usize {
        unread(*self.pos, self.tail, self.storage.len())
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contiguous run mulai dari `offset` bytes setelah cursor.
    ///
    /// Panjangnya dibatasi ujung fisik storage; panggil lagi setelah commit
    /// untuk mendapatkan sisa yang wrap ke awal.
    #[inline]
    pub fn peek(&self, offset: usize) -> &'a [u8] {
        peek_at(self.storage, *self.pos, self.tail, offset)
    }

    /// Majukan cursor sebanyak `len` bytes
    ///
    /// # Panics
    /// Panic jika `len` melebihi unread span
    #[inline]
    pub fn commit(&mut self, len: usize) {
        *self.pos = advance(*self.pos, self.tail, self.storage.len(), len);
    }
}

/// Fixed-capacity circular byte store dengan banyak read cursor
pub struct RingBuffer {
    // Anonymous mapping, panjang tepat `capacity`
    storage: MmapMut,
    // Write cursor, selalu < capacity
    tail: usize,
    consumers: Vec<Consumer>,
    next_id: u64,
}

impl RingBuffer {
    /// Membuat ring buffer baru dengan storage mmap anonim.
    ///
    /// Alokasi hanya terjadi sekali di sini, `queue` tidak pernah alokasi storage.
    ///
    /// # Panics
    /// Panic jika `capacity < 2` (tidak ada ruang untuk payload sama sekali)
    pub fn with_capacity(capacity: usize) -> io::Result<Self> {
        assert!(capacity >= 2, "capacity must leave room for at least one byte");

        let storage = MmapMut::map_anon(capacity)?;

        Ok(Self {
            storage,
            tail: 0,
            consumers: Vec::new(),
            next_id: 0,
        })
    }

    /// Kapasitas buffer, termasuk slot sentinel
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    #[inline(always)]
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn contains(&self, id: ConsumerId) -> bool {
        self.consumers.iter().any(|c| c.id == id)
    }

    /// Daftarkan consumer baru. Cursor mulai di `tail`, jadi consumer hanya
    /// melihat data yang di-queue setelah ini.
    pub fn register_consumer<F>(&mut self, drain: F) -> ConsumerId
    where
        F: FnMut(&mut Reader<'_>, usize) -> Drain + 'static,
    {
        let id = ConsumerId(self.next_id);
        self.next_id += 1;

        self.consumers.push(Consumer {
            id,
            pos: self.tail,
            drain: Box::new(drain),
        });

        debug!("{} registered at offset {}", id, self.tail);
        id
    }

    /// Lepas consumer. Id yang sudah tidak ada diabaikan.
    pub fn unregister_consumer(&mut self, id: ConsumerId) {
        self.consumers.retain(|c| c.id != id);
    }

    /// Tulis `bytes` ke buffer dan fan-out ke semua consumer.
    ///
    /// Consumer yang gagal membebaskan ruang saat diminta akan di-evict;
    /// kegagalan itu tidak pernah dikembalikan sebagai error.
    pub fn queue(&mut self, bytes: &[u8]) -> Result<(), Overflow> {
        let capacity = self.capacity();
        let len = bytes.len();

        if len >= capacity {
            return Err(Overflow { len, capacity });
        }

        if len == 0 {
            return Ok(());
        }

        // Phase 1: backpressure, pastikan setiap consumer punya ruang
        let mut i = 0;
        while i < self.consumers.len() {
            if ensure_space(&self.storage, self.tail, &mut self.consumers[i], len) {
                i += 1;
            } else {
                let evicted = self.consumers.remove(i);
                warn!(
                    "{} failed to free {} bytes on demand, evicted",
                    evicted.id, len
                );
            }
        }

        // Phase 2: copy, maksimal dua potong kalau wrap
        let tail = self.tail;
        let first_part = (capacity - tail).min(len);
        self.storage[tail..tail + first_part].copy_from_slice(&bytes[..first_part]);
        if first_part < len {
            self.storage[..len - first_part].copy_from_slice(&bytes[first_part..]);
        }
        self.tail = (tail + len) % capacity;

        // Phase 3: notify non-blocking
        let mut i = 0;
        while i < self.consumers.len() {
            let consumer = &mut self.consumers[i];
            let mut reader = Reader {
                storage: &self.storage,
                tail: self.tail,
                pos: &mut consumer.pos,
            };

            match (consumer.drain)(&mut reader, 0) {
                Drain::Ok => i += 1,
                Drain::Remove => {
                    let removed = self.consumers.remove(i);
                    debug!("{} asked for removal on notify", removed.id);
                }
            }
        }

        Ok(())
    }

    /// Unread bytes untuk consumer `id`; 0 untuk id yang tidak dikenal
    #[inline]
    pub fn unread_len(&self, id: ConsumerId) -> usize {
        self.consumer(id)
            .map(|c| unread(c.pos, self.tail, self.capacity()))
            .unwrap_or(0)
    }

    /// Contiguous view mulai `offset` bytes setelah cursor consumer.
    ///
    /// Kosong jika `offset >= unread_len(id)` atau id tidak dikenal.
    pub fn peek(&self, id: ConsumerId, offset: usize) -> &[u8] {
        match self.consumer(id) {
            Some(c) => peek_at(&self.storage, c.pos, self.tail, offset),
            None => &[],
        }
    }

    /// Majukan cursor consumer `id` sebanyak `len` bytes.
    ///
    /// Id yang sudah di-evict diabaikan.
    ///
    /// # Panics
    /// Panic jika `len > unread_len(id)`
    pub fn commit(&mut self, id: ConsumerId, len: usize) {
        let capacity = self.capacity();
        let tail = self.tail;

        if let Some(c) = self.consumers.iter_mut().find(|c| c.id == id) {
            c.pos = advance(c.pos, tail, capacity, len);
        }
    }

    fn consumer(&self, id: ConsumerId) -> Option<&Consumer> {
        self.consumers.iter().find(|c| c.id == id)
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("tail", &self.tail)
            .field("consumers", &self.consumers.len())
            .finish()
    }
}

#[inline(always)]
fn unread(pos: usize, tail: usize, capacity: usize) -> usize {
    if pos <= tail {
        tail - pos
    } else {
        capacity - pos + tail
    }
}

#[inline]
fn peek_at(storage: &[u8], pos: usize, tail: usize, offset: usize) -> &[u8] {
    let capacity = storage.len();
    let unread = unread(pos, tail, capacity);

    if offset >= unread {
        return &[];
    }

    let start = (pos + offset) % capacity;
    let len = (unread - offset).min(capacity - start);
    &storage[start..start + len]
}

#[inline]
fn advance(pos: usize, tail: usize, capacity: usize, len: usize) -> usize {
    let unread = unread(pos, tail, capacity);
    assert!(
        len <= unread,
        "commit of {} bytes exceeds {} unread bytes",
        len,
        unread
    );
    (pos + len) % capacity
}

/// Pastikan `consumer` punya ruang untuk `len` bytes, forced drain jika perlu.
///
/// Forced drain boleh blocking dan tidak dibatasi waktu.
fn ensure_space(storage: &[u8], tail: usize, consumer: &mut Consumer, len: usize) -> bool {
    let capacity = storage.len();
    let free = capacity - 1 - unread(consumer.pos, tail, capacity);

    if free >= len {
        return true;
    }

    let force_len = len - free;
    let mut reader = Reader {
        storage,
        tail,
        pos: &mut consumer.pos,
    };

    match (consumer.drain)(&mut reader, force_len) {
        Drain::Ok => capacity - 1 - unread(consumer.pos, tail, capacity) >= len,
        Drain::Remove => false,
    }
}
