//! Error types for CP/M emulator.

use thiserror::Error;

/// Errors that can occur during CP/M emulation.
#[derive(Error, Debug)]
pub enum CpmError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid file handle: {0}")]
    InvalidHandle(u32),

    #[error("Read-only filesystem")]
    ReadOnly,

    #[error("Invalid FCB")]
    InvalidFcb,

    #[error("End of file")]
    Eof,

    #[error("Invalid drive: {0}")]
    InvalidDrive(char),

    #[error("Drive not mounted: {0}")]
    DriveNotMounted(char),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Disk full")]
    DiskFull,

    #[error("File exists")]
    FileExists,

    #[error("too many active sessions (max {0})")]
    TooManySessions(usize),

    #[error("no such session: {0}")]
    NoSuchSession(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for CP/M operations.
pub type CpmResult<T> = Result<T, CpmError>;
