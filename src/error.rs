use std::fmt;

/// Error kinds surfaced to callers of the engine.
///
/// These map onto the semantic failures in the spec, not onto any
/// particular backend's own error type — `Io` is the only variant that
/// wraps an external cause.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("no such file: {0}")]
    NoSuchFile(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("atomic move is not supported")]
    AtomicMoveNotSupported,

    #[error("unsupported option: {0}")]
    UnsupportedOption(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("provider mismatch: {0}")]
    ProviderMismatch(String),

    #[error("io error: {0}")]
    Io(#[from] IoError),
}

/// Wraps whatever the backing datastore failed with. Kept as a named
/// struct (rather than `Box<dyn Error>`) so callers can match on
/// `FsError::Io` without downcasting.
#[derive(Debug)]
pub struct IoError {
    message: String,
}

impl IoError {
    pub fn new(message: impl Into<String>) -> Self {
        IoError {
            message: message.into(),
        }
    }
}

impl fmt::Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for IoError {}

pub type Result<T> = std::result::Result<T, FsError>;
