//! Test helpers for the host registry and HTTP API

use crate::error::ScriptError;
use crate::registry::HostRegistry;
use crate::script::ScriptRunner;
use crate::store::HostFileStore;
use crate::AppState;
use async_trait::async_trait;
use axum::Router;
use netbootd_common::{HostIdentifier, OsKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Server name used for boot menu templates in tests
pub const TEST_SERVER_NAME: &str = "netboot";

/// One recorded [`FakeScriptRunner::run`] call
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCall {
    pub os: OsKind,
    pub mac: String,
    pub serial: Option<String>,
}

/// Script runner that records its calls instead of spawning processes
#[derive(Debug, Default)]
pub struct FakeScriptRunner {
    output: Vec<String>,
    failure: Option<String>,
    calls: Mutex<Vec<ScriptCall>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeScriptRunner {
    pub fn succeeding(output: Vec<&str>) -> Self {
        Self {
            output: output.into_iter().map(String::from).collect(),
            ..Default::default()
        }
    }

    pub fn failing(stderr: &str) -> Self {
        Self {
            failure: Some(stderr.to_string()),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<ScriptCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of runs observed in flight at once
    pub fn max_concurrent(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptRunner for FakeScriptRunner {
    async fn run(
        &self,
        os: OsKind,
        id: &HostIdentifier,
        serial: Option<&str>,
    ) -> Result<Vec<String>, ScriptError> {
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.calls.lock().unwrap().push(ScriptCall {
            os,
            mac: id.to_string(),
            serial: serial.map(String::from),
        });
        self.running.fetch_sub(1, Ordering::SeqCst);

        match &self.failure {
            Some(stderr) => Err(ScriptError::Failed {
                script: format!("/root/mkboot.{}", os),
                status: "exit status: 1".to_string(),
                stderr: stderr.clone(),
            }),
            None => Ok(self.output.clone()),
        }
    }
}

/// A provisioning directory holding a boot menu template for every OS
pub fn create_netboot_dir() -> TempDir {
    let tmp = tempfile::tempdir().unwrap();
    for os in OsKind::ALL {
        std::fs::write(
            tmp.path().join(format!("{}-{}.ipxe", TEST_SERVER_NAME, os)),
            format!("#!ipxe\nchain http://boot.local/{}/boot.ipxe\n", os),
        )
        .unwrap();
    }
    tmp
}

pub fn create_test_registry(scripts: Arc<dyn ScriptRunner>) -> (TempDir, HostRegistry) {
    let tmp = create_netboot_dir();
    let store = HostFileStore::new(tmp.path(), TEST_SERVER_NAME);
    (tmp, HostRegistry::new(store, scripts))
}

pub fn create_test_app_state(scripts: Arc<dyn ScriptRunner>) -> (TempDir, AppState) {
    let (tmp, registry) = create_test_registry(scripts);
    (
        tmp,
        AppState {
            registry: Arc::new(registry),
        },
    )
}

/// Full application router over a fresh provisioning directory
pub fn create_test_router(scripts: Arc<dyn ScriptRunner>) -> (TempDir, AppState, Router) {
    let (tmp, state) = create_test_app_state(scripts);
    let router = crate::app(state.clone());
    (tmp, state, router)
}
