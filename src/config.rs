//! Console configuration

use crate::error::{Error, Result};

/// Ukuran shared backlog ring buffer
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;

/// Maksimal bytes per read dari hardware channel
pub const DEFAULT_READ_CHUNK: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// Kapasitas ring buffer, termasuk satu slot sentinel
    pub buffer_size: usize,
    pub read_chunk: usize,
    /// Install SIGINT handler selama `Console::run`
    pub catch_sigint: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            read_chunk: DEFAULT_READ_CHUNK,
            catch_sigint: true,
        }
    }
}

impl ConsoleConfig {
    /// Satu read harus selalu muat di ring buffer kosong, jadi
    /// `read_chunk < buffer_size`.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size < 2 {
            return Err(Error::Config(format!(
                "buffer_size {} leaves no room for data",
                self.buffer_size
            )));
        }

        if self.read_chunk == 0 {
            return Err(Error::Config("read_chunk must be non-zero".to_string()));
        }

        if self.read_chunk >= self.buffer_size {
            return Err(Error::Config(format!(
                "read_chunk {} must be smaller than buffer_size {}",
                self.read_chunk, self.buffer_size
            )));
        }

        Ok(())
    }
}
