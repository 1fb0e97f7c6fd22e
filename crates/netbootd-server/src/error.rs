//! Error types for the host registry
//!
//! Each component has its own error enum; [`RegistryError`] wraps them for
//! the operations exposed over HTTP.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Host file store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed on `path`
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Answer file payload was not valid base64
    #[error("illegal base64 data: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Rejected client-supplied value (e.g. an upload filename)
    #[error(transparent)]
    Invalid(#[from] netbootd_common::Error),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Provisioning script failures
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script (or its privilege helper) could not be started
    #[error("{script}: {source}")]
    Spawn {
        script: String,
        #[source]
        source: io::Error,
    },

    /// The script ran and exited unsuccessfully
    #[error("{script}: {status}: {stderr}")]
    Failed {
        script: String,
        status: String,
        stderr: String,
    },

    /// The script outlived the configured timeout and was killed
    #[error("{script}: timed out after {timeout:?}")]
    Timeout { script: String, timeout: Duration },
}

/// Errors returned by [`crate::registry::HostRegistry`]
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Invalid(#[from] netbootd_common::Error),

    #[error("host address not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

impl RegistryError {
    /// True for failures caused by the request itself rather than the server
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RegistryError::Invalid(_)
                | RegistryError::Store(StoreError::Decode(_))
                | RegistryError::Store(StoreError::Invalid(_))
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
