// netbootd: network boot provisioning server and its operator client
use clap::CommandFactory;
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use serde_json::Value;
use std::io::stderr;
use std::path::PathBuf;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod cmd;

use cmd::client::{AddOptions, ClientArgs, NetbootClient};
use cmd::serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(author, version, about = "Network boot provisioning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    client: ClientArgs,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the provisioning server in the foreground
    Serve(ServeArgs),
    /// Add a host config
    Add {
        mac: String,
        os: String,
        /// Installer answer file
        response_file: PathBuf,
        /// Package tarball named <mac>.tgz, uploaded before the host is added
        package_file: Option<PathBuf>,
        /// Serial console passed to the provisioning script
        #[arg(long)]
        serial: Option<String>,
        /// Disklabel template file
        #[arg(long)]
        disklabel: Option<PathBuf>,
    },
    /// Upload a package tarball
    Upload { package_file: PathBuf },
    /// List host configs
    Ls,
    /// Delete a host config, or every host with `all`
    Rm { mac: String },
    /// Show the address a host reported after booting
    Address { mac: String },
}

impl Commands {
    fn is_server(&self) -> bool {
        matches!(self, Commands::Serve(_))
    }
}

fn log_filter(server: bool, verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { "info" };
    let default_directives = if server {
        format!(
            "netbootd={level},netbootd_server={level},tower_http={level},hyper=warn",
            level = level
        )
    } else {
        let level = if verbose { "debug" } else { "warn" };
        format!("netbootd={level},reqwest=warn,hyper=warn", level = level)
    };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.into_config()?;
    debug!(?config, "Starting server");
    if let Err(e) = netbootd_server::run(config).await {
        error!("Server failed to run: {:#}", e);
        eprintln!("Error running netbootd: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let server = cli.command.as_ref().is_some_and(Commands::is_server);
    registry()
        .with(log_filter(server, cli.verbose))
        .with(fmt::layer().with_writer(stderr))
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let client = || NetbootClient::new(&cli.client);
    let result = match command {
        Commands::Serve(args) => return serve(args).await,
        Commands::Add {
            mac,
            os,
            response_file,
            package_file,
            serial,
            disklabel,
        } => {
            let options = AddOptions {
                package_file: package_file.as_deref(),
                serial: serial.as_deref(),
                disklabel_file: disklabel.as_deref(),
            };
            client()?.add(&mac, &os, &response_file, options).await?
        }
        Commands::Upload { package_file } => client()?.upload_package(&package_file).await?,
        Commands::Ls => client()?.list().await?,
        Commands::Rm { mac } if mac == "all" => client()?.delete_all().await?,
        Commands::Rm { mac } => client()?.delete(&mac).await?,
        Commands::Address { mac } => client()?.address(&mac).await?,
    };
    print_json(&result)
}
