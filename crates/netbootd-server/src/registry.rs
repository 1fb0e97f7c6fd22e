//! Host registry service
//!
//! Drives a host through its provisioning lifecycle:
//!
//! ```text
//! UNKNOWN --add--> REGISTERED --booted--> (files removed, address cached)
//!                  REGISTERED --delete--> UNKNOWN
//! ```
//!
//! State is never stored explicitly. A host is registered while its boot menu
//! exists in the [`HostFileStore`]; the [`HostAddressCache`] only adds the
//! address a host reported when it came up.

use crate::cache::HostAddressCache;
use crate::error::{RegistryError, Result};
use crate::script::ScriptRunner;
use crate::store::HostFileStore;
use netbootd_common::models::{
    AddHostRequest, AddResponse, DeleteResponse, HostAddressResponse, HostListResponse,
    MessageResponse,
};
use netbootd_common::{HostIdentifier, OsKind, PACKAGE_SUFFIX};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::io::AsyncRead;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

/// A validated add-host command
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningRequest {
    pub id: HostIdentifier,
    pub os: OsKind,
    /// OS release requested by the operator; not used for file selection
    pub version: String,
    /// Base64 answer file
    pub config: String,
    pub serial: Option<String>,
    pub disklabel_template: String,
}

impl TryFrom<AddHostRequest> for ProvisioningRequest {
    type Error = netbootd_common::Error;

    /// Checks the identifier first, then the OS name
    fn try_from(req: AddHostRequest) -> std::result::Result<Self, Self::Error> {
        let id = HostIdentifier::parse(&req.address)?;
        let os = req.os.parse()?;
        Ok(Self {
            id,
            os,
            version: req.version,
            config: req.config,
            serial: Some(req.serial).filter(|s| !s.is_empty()),
            disklabel_template: req.disklabel_template,
        })
    }
}

/// Per-host async locks so that multi-step writes to one host never
/// interleave. Keyed by the case-folded identifier.
#[derive(Debug, Default)]
struct HostLocks {
    locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HostLocks {
    async fn lock(&self, id: &HostIdentifier) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id.folded()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Host registry
pub struct HostRegistry {
    store: HostFileStore,
    scripts: Arc<dyn ScriptRunner>,
    cache: HostAddressCache,
    locks: HostLocks,
}

impl HostRegistry {
    pub fn new(store: HostFileStore, scripts: Arc<dyn ScriptRunner>) -> Self {
        Self {
            store,
            scripts,
            cache: HostAddressCache::new(),
            locks: HostLocks::default(),
        }
    }

    pub fn store(&self) -> &HostFileStore {
        &self.store
    }

    /// Register a host: write its boot menu, answer file and optional
    /// disklabel template, then run the provisioning script.
    ///
    /// The first failing step is returned as-is and earlier files stay on
    /// disk.
    pub async fn add(&self, request: ProvisioningRequest) -> Result<AddResponse> {
        let id = &request.id;
        let _guard = self.locks.lock(id).await;
        debug!(mac = %id, os = %request.os, version = %request.version, "Adding host");

        self.store.materialize_boot_menu(id, request.os).await?;
        self.store.write_answer_file(id, &request.config).await?;
        self.store
            .write_disklabel_template(id, &request.disklabel_template)
            .await?;

        let output = self
            .scripts
            .run(request.os, id, request.serial.as_deref())
            .await?;

        self.cache.set(id.as_str(), "");
        info!(mac = %id, os = %request.os, "Host configured");

        Ok(AddResponse {
            message: format!("{} configured", id),
            output,
        })
    }

    /// Remove all files of a registered host
    pub async fn delete(&self, address: &str) -> Result<DeleteResponse> {
        let id = HostIdentifier::parse(address)?;
        let _guard = self.locks.lock(&id).await;

        let response = self.remove_host(&id).await?;
        self.cache.clear(id.as_str());
        Ok(response)
    }

    /// Identifiers of all registered hosts, from the directory alone
    pub async fn list(&self) -> Result<HostListResponse> {
        let addresses = self.store.list_host_identifiers().await?;
        Ok(HostListResponse {
            message: format!("config count: {}", addresses.len()),
            addresses,
        })
    }

    /// A host reports that installation finished. Its address (if given,
    /// possibly empty) is remembered and its install-time files are removed.
    pub async fn boot_confirm(&self, address: &str, ip: Option<&str>) -> Result<DeleteResponse> {
        let id = HostIdentifier::parse(address)?;
        let _guard = self.locks.lock(&id).await;

        if let Some(ip) = ip {
            self.cache.set(id.as_str(), ip);
        }
        self.remove_host(&id).await
    }

    /// Last known address of `address`. Unknown hosts get an empty address.
    pub fn address_query(&self, address: &str) -> HostAddressResponse {
        HostAddressResponse {
            mac: address.to_string(),
            ip: self.cache.get(address),
        }
    }

    /// Store an uploaded `<mac>.tgz` package
    pub async fn upload_package<R>(&self, filename: &str, reader: &mut R) -> Result<MessageResponse>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let host = filename
            .strip_suffix(PACKAGE_SUFFIX)
            .and_then(|stem| HostIdentifier::parse(stem).ok());
        let _guard = match &host {
            Some(id) => Some(self.locks.lock(id).await),
            None => None,
        };

        let bytes = self.store.store_package(filename, reader).await?;
        Ok(MessageResponse::new(format!("{} bytes written", bytes)))
    }

    /// Delete the files of `id` if it is registered, matching case-insensitively
    async fn remove_host(&self, id: &HostIdentifier) -> Result<DeleteResponse> {
        let hosts = self.store.list_host_identifiers().await?;
        if !hosts.iter().any(|host| id.matches(host)) {
            return Err(RegistryError::NotFound(id.to_string()));
        }

        let files = self.store.delete_host_files(id).await?;
        info!(mac = %id, count = files.len(), "Host files deleted");
        Ok(DeleteResponse {
            message: format!("deleted: {}", files.len()),
            files,
        })
    }
}

impl std::fmt::Debug for HostRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRegistry")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
