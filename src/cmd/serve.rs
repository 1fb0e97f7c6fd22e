use clap::Args;
use color_eyre::eyre::{Result, WrapErr};
use netbootd_server::config::{ServerConfig, DEFAULT_CONFIG_FILE};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Flags for `netbootd serve`. Each one overrides the config file.
#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Config file of key=value lines; a missing file is ignored
    #[arg(long, env = "NETBOOTD_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Listen address
    #[arg(long, env = "NETBOOTD_ADDR")]
    pub addr: Option<String>,

    /// Listen port
    #[arg(long, env = "NETBOOTD_PORT")]
    pub port: Option<u16>,

    /// Server name, selects the `<name>-<os>.ipxe` boot menu templates
    #[arg(long, env = "NETBOOTD_NAME")]
    pub name: Option<String>,

    /// Provisioning directory
    #[arg(long, env = "NETBOOTD_DIR")]
    pub dir: Option<PathBuf>,

    /// Directory holding the mkboot.<os> scripts
    #[arg(long, env = "NETBOOTD_SCRIPT_DIR")]
    pub script_dir: Option<PathBuf>,

    /// Privileged-execution helper used to run scripts
    #[arg(long, env = "NETBOOTD_PRIVILEGE_HELPER", conflicts_with = "no_privilege_helper")]
    pub privilege_helper: Option<PathBuf>,

    /// Run scripts directly without a helper
    #[arg(long)]
    pub no_privilege_helper: bool,

    /// Kill provisioning scripts after this many seconds (0 disables)
    #[arg(long, env = "NETBOOTD_SCRIPT_TIMEOUT")]
    pub script_timeout: Option<u64>,

    /// Seconds to let in-flight requests finish on shutdown
    #[arg(long, env = "NETBOOTD_SHUTDOWN_TIMEOUT")]
    pub shutdown_timeout: Option<u64>,
}

impl ServeArgs {
    /// Defaults, then the config file, then these flags
    pub fn into_config(self) -> Result<ServerConfig> {
        let mut config = ServerConfig::default();
        config
            .load_file(&self.config)
            .wrap_err("Failed to load config file")?;

        if let Some(addr) = self.addr {
            config.listen_addr = addr;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = self.name {
            config.netboot_name = name;
        }
        if let Some(dir) = self.dir {
            config.netboot_dir = dir;
        }
        if let Some(script_dir) = self.script_dir {
            config.scripts.script_dir = script_dir;
        }
        if self.no_privilege_helper {
            config.scripts.privilege_helper = None;
        } else if let Some(helper) = self.privilege_helper {
            config.scripts.privilege_helper = Some(helper);
        }
        if let Some(secs) = self.script_timeout {
            config.scripts.timeout = Some(Duration::from_secs(secs)).filter(|d| !d.is_zero());
        }
        if let Some(secs) = self.shutdown_timeout {
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        debug!(?config, "Effective configuration");
        Ok(config)
    }
}
