use std::io;

use thiserror::Error;

/// Recoverable failures. These are reserved for I/O paths that callers can
/// reasonably expect to fail; everything else goes through [`crate::fatal`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Format(String),

    #[error("codec error: {0}")]
    Codec(#[from] ::image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
