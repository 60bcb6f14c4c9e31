//! osd binary: daemon and client CLI

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use osd::api::DriverClient;
use osd::common::config::DEFAULT_KVDB;
use osd::common::{parse_driver_arg, Config, DriverOptions};
use osd::volume::available_drivers;
use osd::Daemon;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "osd")]
#[command(about = "Open storage daemon and CLI")]
#[command(version)]
struct Cli {
    /// Start in daemon mode
    #[arg(short, long)]
    daemon: bool,

    /// File to read the configuration from
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// KV store URI, e.g. kv-mem://localhost, etcd://localhost:2379
    #[arg(short, long, default_value = DEFAULT_KVDB)]
    kvdb: String,

    /// Driver name and options: name=mem,kind=file (repeatable)
    #[arg(long = "driver")]
    drivers: Vec<String>,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Output in JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Display version
    Version,

    /// Manage drivers
    Driver {
        #[command(subcommand)]
        command: DriverCommands,
    },

    /// Manage volumes through a running driver
    Volume {
        /// Driver REST API URL
        #[arg(long, default_value = "http://127.0.0.1:9100")]
        url: String,

        /// Driver name
        #[arg(long)]
        driver: String,

        #[command(subcommand)]
        command: VolumeCommands,
    },
}

#[derive(Subcommand)]
enum DriverCommands {
    /// List available drivers
    List,
}

#[derive(Subcommand)]
enum VolumeCommands {
    /// Create a volume
    Create {
        name: String,

        /// Volume option key=value (repeatable)
        #[arg(long = "opt")]
        opts: Vec<String>,
    },

    /// Remove a volume
    Remove { name: String },

    /// Show the driver serving a volume
    Name { name: String },
}

fn init_tracing(level: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn daemon_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.file {
        Some(path) => Config::load(path)
            .with_context(|| format!("unable to read configuration from {}", path.display()))?,
        None => Config::default(),
    };

    // CLI wins over the file when given explicitly.
    if cli.kvdb != DEFAULT_KVDB || cli.file.is_none() {
        config.osd.kvdb = cli.kvdb.clone();
    }
    for arg in &cli.drivers {
        let (name, options) = parse_driver_arg(arg)?;
        config.osd.drivers.insert(name, options);
    }
    if let Some(level) = &cli.log_level {
        config.osd.log_level = level.clone();
    }

    if config.osd.drivers.is_empty() {
        anyhow::bail!("no drivers configured: use --file or --driver name=...");
    }
    config.validate()?;
    Ok(config)
}

fn parse_opts(opts: &[String]) -> anyhow::Result<DriverOptions> {
    opts.iter()
        .map(|opt| {
            opt.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("expected key=value, got {:?}", opt))
        })
        .collect()
}

/// One-line diagnostic for a daemon that stopped with `err`
fn startup_diagnostic(err: &osd::Error) -> String {
    if err.is_fatal() {
        format!("osd startup failed: {}", err)
    } else {
        format!("osd stopped unexpectedly: {}", err)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.daemon {
        let config = daemon_config(&cli)?;
        init_tracing(&config.osd.log_level);
        let daemon = Daemon::new(config.osd);
        if let Err(e) = daemon.serve().await {
            let message = startup_diagnostic(&e);
            tracing::error!("{}", message);
            anyhow::bail!(message);
        }
        return Ok(());
    }

    init_tracing(cli.log_level.as_deref().unwrap_or("warn"));

    match cli.command {
        None => {
            Cli::command().print_help()?;
        }
        Some(Commands::Version) => {
            println!("OSD Version: {}", osd::VERSION);
            println!("OS: {}", std::env::consts::OS);
            println!("Arch: {}", std::env::consts::ARCH);
        }
        Some(Commands::Driver {
            command: DriverCommands::List,
        }) => {
            let drivers = available_drivers();
            if cli.json {
                let list: Vec<_> = drivers
                    .iter()
                    .map(|(name, kind)| serde_json::json!({ "Name": name, "Kind": kind }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else {
                for (name, kind) in drivers {
                    println!("{}\t{}", name, kind);
                }
            }
        }
        Some(Commands::Volume {
            url,
            driver,
            command,
        }) => {
            let client = DriverClient::new(&url, &driver)?;
            match command {
                VolumeCommands::Create { name, opts } => {
                    let id = client.create(&name, parse_opts(&opts)?).await?;
                    println!("{}", id);
                }
                VolumeCommands::Remove { name } => {
                    client.remove(&name).await?;
                    println!("✓ Removed {}", name);
                }
                VolumeCommands::Name { name } => {
                    let response = client.name(&name).await?;
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&response)?);
                    } else {
                        println!(
                            "{}\t{}",
                            response.name.unwrap_or_default(),
                            response.kind.map(|k| k.to_string()).unwrap_or_default()
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
