use thiserror::Error;

/// Validation failures for values arriving from clients.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("invalid MAC address")]
    InvalidMac(String),

    #[error("unrecognized OS")]
    UnrecognizedOs(String),

    #[error("illegal filename: {0}")]
    IllegalFilename(String),
}
