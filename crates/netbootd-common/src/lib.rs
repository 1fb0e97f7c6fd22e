//! Types shared between the netbootd server and its operator client.
//!
//! - [`HostIdentifier`]: MAC-address host names, validated once at the edge
//! - [`OsKind`]: the operating systems a host can be provisioned with
//! - [`models`]: JSON bodies exchanged over `/api`

pub mod error;
pub mod mac;
pub mod models;
pub mod os;

pub use error::Error;
pub use mac::{is_package_filename, is_valid_mac, HostIdentifier, PACKAGE_SUFFIX};
pub use os::OsKind;

pub type Result<T> = std::result::Result<T, Error>;
