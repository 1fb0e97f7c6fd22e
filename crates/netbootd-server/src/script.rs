//! Provisioning script runner
//!
//! After a host's files are written, an OS-specific script prepares the rest
//! of the install media (e.g. unpacking a package, building a boot image). The
//! script is `<script_dir>/mkboot.<os>`, run through a privileged-execution
//! helper as `<helper> <script> <mac> [serial]`.

use crate::error::ScriptError;
use async_trait::async_trait;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use netbootd_common::{HostIdentifier, OsKind};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Filename prefix of provisioning scripts
pub const SCRIPT_PREFIX: &str = "mkboot";

/// Runs the provisioning step for a host
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run the script for `os` against `id`, returning its stdout split into
    /// lines. Output ending in a newline yields a trailing empty line.
    async fn run(
        &self,
        os: OsKind,
        id: &HostIdentifier,
        serial: Option<&str>,
    ) -> Result<Vec<String>, ScriptError>;
}

/// Where scripts live and how they are launched
#[derive(Debug, Clone)]
pub struct ScriptConfig {
    pub script_dir: PathBuf,
    /// Wrapper that elevates privileges (`doas`, `sudo`); `None` runs the
    /// script directly
    pub privilege_helper: Option<PathBuf>,
    /// Kill the script's whole process group after this long. `None` waits
    /// indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            script_dir: PathBuf::from("/root"),
            privilege_helper: Some(PathBuf::from("/usr/bin/doas")),
            timeout: None,
        }
    }
}

/// [`ScriptRunner`] that executes external commands
#[derive(Debug, Clone)]
pub struct CommandScriptRunner {
    config: ScriptConfig,
}

impl CommandScriptRunner {
    pub fn new(config: ScriptConfig) -> Self {
        Self { config }
    }

    pub fn script_path(&self, os: OsKind) -> PathBuf {
        self.config
            .script_dir
            .join(format!("{}.{}", SCRIPT_PREFIX, os))
    }

    fn command(&self, os: OsKind, id: &HostIdentifier, serial: Option<&str>) -> Command {
        let script = self.script_path(os);
        let mut cmd = match &self.config.privilege_helper {
            Some(helper) => {
                let mut cmd = Command::new(helper);
                cmd.arg(&script);
                cmd
            }
            None => Command::new(&script),
        };
        cmd.arg(id.as_str());
        if let Some(serial) = serial {
            cmd.arg(serial);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

/// Read a child pipe to the end in the background
fn collect<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            if let Err(e) = pipe.read_to_end(&mut buf).await {
                debug!(error = %e, "Failed to read script output");
            }
        }
        buf
    })
}

/// SIGKILL the helper and everything it started, then reap the leader
async fn kill_group(child: &mut AsyncGroupChild, script: &str) {
    if let Err(e) = child.kill().await {
        warn!(script = %script, error = %e, "Failed to kill script process group");
    }
    if let Err(e) = child.wait().await {
        warn!(script = %script, error = %e, "Failed to reap killed script");
    }
}

#[async_trait]
impl ScriptRunner for CommandScriptRunner {
    async fn run(
        &self,
        os: OsKind,
        id: &HostIdentifier,
        serial: Option<&str>,
    ) -> Result<Vec<String>, ScriptError> {
        let script = self.script_path(os).display().to_string();
        let mut cmd = self.command(os, id, serial);

        info!(script = %script, mac = %id, serial = ?serial, "Running provisioning script");

        // The helper runs in its own process group so a timeout also reaches
        // anything it forked
        let mut child = cmd.group_spawn().map_err(|source| ScriptError::Spawn {
            script: script.clone(),
            source,
        })?;
        let stdout = collect(child.inner().stdout.take());
        let stderr = collect(child.inner().stderr.take());

        let status = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    error!(script = %script, mac = %id, timeout = ?limit, "Provisioning script timed out");
                    kill_group(&mut child, &script).await;
                    stdout.abort();
                    stderr.abort();
                    return Err(ScriptError::Timeout {
                        script,
                        timeout: limit,
                    });
                }
            },
            None => child.wait().await,
        }
        .map_err(|source| ScriptError::Spawn {
            script: script.clone(),
            source,
        })?;

        let stdout = stdout.await.unwrap_or_default();
        let stderr = stderr.await.unwrap_or_default();
        let stdout = String::from_utf8_lossy(&stdout);
        let stderr = String::from_utf8_lossy(&stderr);

        if !status.success() {
            error!(script = %script, mac = %id, status = %status, "Provisioning script failed");
            for line in stderr.lines() {
                warn!(script = %script, "stderr: {}", line);
            }
            return Err(ScriptError::Failed {
                script,
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        if !stderr.is_empty() {
            debug!(script = %script, stderr = %stderr, "Provisioning script stderr");
        }

        Ok(stdout.split('\n').map(str::to_string).collect())
    }
}
