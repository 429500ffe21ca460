#![forbid(unsafe_code)]

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::strict_file::OpenMode;

////////////////////////////////////////////////////////////////////////////////

pub const Z_NEED_DICT: i32 = 2;
pub const Z_STREAM_ERROR: i32 = -2;
pub const Z_DATA_ERROR: i32 = -3;
pub const Z_MEM_ERROR: i32 = -4;
pub const Z_BUF_ERROR: i32 = -5;
pub const Z_VERSION_ERROR: i32 = -6;

/// Failure reported by the inflate engine, with a zlib-compatible code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    code: i32,
    message: String,
}

impl DecodeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(Z_DATA_ERROR, message)
    }

    pub fn truncated() -> Self {
        Self::new(Z_BUF_ERROR, "unexpected end of compressed stream")
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("zlib: ")?;
        match self.code {
            Z_STREAM_ERROR => f.write_str("Z_STREAM_ERROR: ")?,
            Z_DATA_ERROR => f.write_str("Z_DATA_ERROR: ")?,
            Z_MEM_ERROR => f.write_str("Z_MEM_ERROR: ")?,
            Z_BUF_ERROR => f.write_str("Z_BUF_ERROR: ")?,
            Z_VERSION_ERROR => f.write_str("Z_VERSION_ERROR: ")?,
            code => write!(f, "[{}]: ", code)?,
        }
        f.write_str(&self.message)
    }
}

impl std::error::Error for DecodeError {}

impl From<flate2::DecompressError> for DecodeError {
    fn from(err: flate2::DecompressError) -> Self {
        match err.needs_dictionary() {
            Some(adler) => Self::new(
                Z_NEED_DICT,
                format!("preset dictionary {:#010x} required", adler),
            ),
            None => Self::data(err.to_string()),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

#[derive(Error, Debug)]
pub enum Error {
    /// Incoherent open mode, rejected before touching the filesystem.
    #[error("open('{}'): mode error: {reason}", .path.display())]
    Config {
        path: PathBuf,
        mode: OpenMode,
        reason: &'static str,
    },

    #[error("open('{}'): is a directory", .path.display())]
    IsDirectory { path: PathBuf },

    #[error("{}: {source}", describe(.op, .path, .mode))]
    Io {
        op: &'static str,
        path: Option<PathBuf>,
        mode: Option<OpenMode>,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The stream already reported an error and must not be read again.
    #[error("stream is unusable after an earlier error")]
    Poisoned,
}

fn describe(op: &str, path: &Option<PathBuf>, mode: &Option<OpenMode>) -> String {
    match (path, mode) {
        (Some(path), Some(mode)) => format!("{}('{}', {})", op, path.display(), mode),
        (Some(path), None) => format!("{}('{}')", op, path.display()),
        _ => op.to_string(),
    }
}

impl Error {
    pub(crate) fn source_read(source: io::Error) -> Self {
        Self::Io {
            op: "read",
            path: None,
            mode: None,
            source,
        }
    }

    fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::Config { .. } => io::ErrorKind::InvalidInput,
            Self::IsDirectory { .. } => io::ErrorKind::Other,
            Self::Io { source, .. } => source.kind(),
            Self::Decode(_) => io::ErrorKind::InvalidData,
            Self::Poisoned => io::ErrorKind::Other,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(err.io_kind(), err)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////
