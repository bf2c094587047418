//! Error types

use std::io;

use thiserror::Error;

use crate::core::Overflow;
use crate::reactor::SourceId;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Overflow(#[from] Overflow),

    /// poll(2) gagal dengan alasan selain EINTR
    #[error("readiness wait failed: {0}")]
    Wait(#[source] io::Error),

    #[error("{0} reported a fatal condition")]
    SourceFatal(SourceId),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("handler {name} failed to initialise: {reason}")]
    Handler { name: String, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
