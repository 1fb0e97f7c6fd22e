//! Request and response bodies for the `/api` endpoints.
//!
//! Field names are part of the wire format used by existing operator
//! tooling and must not be renamed.

use serde::{Deserialize, Serialize};

/// Body of `PUT /api/host/`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddHostRequest {
    /// Host MAC address
    #[serde(default)]
    pub address: String,
    /// OS kind name (debian, openbsd, alpine)
    #[serde(default)]
    pub os: String,
    /// OS release; informational only
    #[serde(default)]
    pub version: String,
    /// Serial console setting passed to the provisioning script
    #[serde(default)]
    pub serial: String,
    /// Base64-encoded installer answer file
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub disklabel_template: String,
}

/// Body of `DELETE /api/host/`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRequest {
    #[serde(default)]
    pub address: String,
}

/// Plain acknowledgement; also the shape of every error body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddResponse {
    pub message: String,
    /// Provisioning script stdout, one entry per line
    pub output: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostListResponse {
    pub message: String,
    pub addresses: Vec<String>,
}

/// Returned by delete and boot confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostAddressResponse {
    pub mac: String,
    /// Last address reported at boot; empty if never seen
    pub ip: String,
}
