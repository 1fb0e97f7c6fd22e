//! Server configuration
//!
//! Values come from three layers, later ones winning: built-in defaults, the
//! `key=value` config file (`/etc/nbd.conf`), then command-line flags applied
//! by the binary.

use crate::script::ScriptConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_FILE: &str = "/etc/nbd.conf";
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 2014;
pub const DEFAULT_NETBOOT_NAME: &str = "netboot";
pub const DEFAULT_NETBOOT_DIR: &str = "/var/www/netboot";
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

static CONFIG_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-zA-Z0-9_]+)=(.*)\s*$").unwrap()
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host or IP address to bind
    pub listen_addr: String,
    pub port: u16,
    /// Prefix of the OS boot menu templates (`<name>-<os>.ipxe`)
    pub netboot_name: String,
    /// Provisioning directory served to booting hosts
    pub netboot_dir: PathBuf,
    pub scripts: ScriptConfig,
    /// How long in-flight requests may drain after a shutdown signal
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            port: DEFAULT_PORT,
            netboot_name: DEFAULT_NETBOOT_NAME.to_string(),
            netboot_dir: PathBuf::from(DEFAULT_NETBOOT_DIR),
            scripts: ScriptConfig::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Apply settings from a config file. A missing file leaves the config
    /// untouched and returns `Ok(false)`.
    pub fn load_file(&mut self, path: &Path) -> Result<bool, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file");
                return Ok(false);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        self.apply_str(&text)?;
        info!(path = %path.display(), "Loaded config file");
        Ok(true)
    }

    /// Apply every recognized `key=value` line in `text`
    pub fn apply_str(&mut self, text: &str) -> Result<(), ConfigError> {
        for (key, value) in parse_lines(text) {
            self.set(key, value)?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "netboot_name" => self.netboot_name = value.to_string(),
            "netboot_dir" => self.netboot_dir = PathBuf::from(value),
            "listen_addr" => self.listen_addr = value.to_string(),
            "port" => self.port = value.parse().map_err(|_| invalid())?,
            "script_dir" => self.scripts.script_dir = PathBuf::from(value),
            "privilege_helper" => {
                self.scripts.privilege_helper = Some(value)
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from)
            }
            "script_timeout" => {
                self.scripts.timeout =
                    Some(parse_seconds(value).ok_or_else(invalid)?).filter(|d| !d.is_zero())
            }
            "shutdown_timeout" => {
                self.shutdown_timeout = parse_seconds(value).ok_or_else(invalid)?
            }
            _ => {
                debug!(key, "Ignoring unknown config key");
                return Ok(());
            }
        }
        debug!(key, value, "Config value set");
        Ok(())
    }
}

/// `key=value` pairs from lines matching the config syntax, in file order.
/// Anything else (comments, blank lines) is skipped.
pub fn parse_lines(text: &str) -> Vec<(&str, &str)> {
    text.lines()
        .filter_map(|line| CONFIG_LINE.captures(line))
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str();
            let value = caps.get(2)?.as_str().trim();
            Some((key, value))
        })
        .collect()
}

/// Whole seconds
fn parse_seconds(value: &str) -> Option<Duration> {
    value.parse().ok().map(Duration::from_secs)
}
