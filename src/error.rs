//! Error types for zipcat.

use std::io;

/// Result type for zipcat operations.
pub type Result<T> = std::result::Result<T, ZipError>;

/// Error kinds reported by the archive reader and writer.
#[derive(Debug)]
pub enum ZipError {
    /// Malformed or truncated archive: missing/invalid signatures, corrupt
    /// ZIP64 extra field, CRC mismatch, or a local/central header name
    /// disagreement.
    BadZipFile(String),
    /// The structure requires ZIP64 extensions but the caller disabled them.
    LargeZipFile(String),
    /// Unsupported compression method, patched-compressed data, strong
    /// encryption, or an extract-version above 6.3.
    NotImplemented(String),
    /// Password was missing or did not decrypt the entry correctly.
    BadPassword,
    /// Bad mode, pre-1980 date, illegal comment type, entry not found, etc.
    InvalidArgument(String),
    /// Underlying I/O error.
    Io(io::Error),
}

impl std::fmt::Display for ZipError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZipError::BadZipFile(msg) => write!(f, "bad zip file: {msg}"),
            ZipError::LargeZipFile(msg) => write!(f, "{msg} would require ZIP64 extensions"),
            ZipError::NotImplemented(msg) => write!(f, "not implemented: {msg}"),
            ZipError::BadPassword => write!(f, "bad password"),
            ZipError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            ZipError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for ZipError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ZipError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ZipError {
    fn from(err: io::Error) -> Self {
        ZipError::Io(err)
    }
}

impl From<ZipError> for io::Error {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
