use thiserror::Error;

/// Errors of the network tester
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or inconsistent settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A start operation was requested before the configuration was written to the device
    #[error("The configuration has not been written to the device")]
    NotConfigured,

    /// Malformed trace or capture data
    #[error("Format error: {0}")]
    Format(String),

    /// A file could not be found
    #[error("File not found: {path}")]
    NotFound { path: String },

    /// The timestamp field does not fit in the packet
    #[error("Packet too short: need {needed} bytes, have {len}")]
    PacketTooShort { needed: usize, len: usize },

    /// The device rejected an operation
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a hardware backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("the device rejected the request: {0}")]
    Rejected(String),

    #[error("no interface {0} on this device")]
    NoSuchInterface(usize),

    #[error("transmission failed on interface {interface}: {reason}")]
    Transmit { interface: usize, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map an I/O error on `path` to `NotFound` when the file does not exist
    pub(crate) fn from_open(err: std::io::Error, path: &std::path::Path) -> Error {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound {
                path: path.display().to_string(),
            }
        } else {
            Error::Io(err)
        }
    }
}
