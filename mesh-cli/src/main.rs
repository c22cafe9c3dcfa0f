//! # relaymesh
//!
//! CLI tool for operating a relaymesh relay bank.
//!
//! ## Commands
//!
//! - `status`: Show persisted state and whether it can be recovered
//! - `watch`: Stream live metrics and mesh health
//! - `fire` / `prime` / `stage`: Operate one relay channel
//! - `sequence run|validate`: Run or check a sequence file
//! - `mesh route|health|links`: Inspect the mesh
//! - `scan`: Ask the controller to rescan the mesh
//!
//! ## Example
//!
//! ```bash
//! # Try everything against the simulated controller
//! relaymesh --simulate scan
//! relaymesh --simulate fire 3 --delay 2
//! relaymesh --simulate sequence run finale.json
//!
//! # Talk to a real bank
//! relaymesh --host 192.168.4.1 watch --seconds 30
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{mesh, relay, sequence, status, watch, AppContext};

/// CLI tool for operating a relaymesh relay bank.
#[derive(Parser, Debug)]
#[command(name = "relaymesh")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: relaymesh.toml in the config directory, if present)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Data directory for persisted relay, mesh and sequence state
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use the simulated controller instead of a real link
    #[arg(long, global = true)]
    simulate: bool,

    /// Controller host (overrides the config file)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show persisted state
    Status,

    /// Stream live metrics and mesh health
    Watch {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        seconds: Option<u64>,
    },

    /// Fire a relay after the confirmation countdown
    Fire {
        /// Relay channel id
        relay: u32,

        /// Node hosting the channel (default: the local bank)
        #[arg(long, short)]
        node: Option<String>,

        /// Delay passed to the controller, in seconds
        #[arg(long, short, default_value = "0")]
        delay: f64,
    },

    /// Re-arm a fired relay
    Prime {
        /// Relay channel id
        relay: u32,

        /// Node hosting the channel (default: the local bank)
        #[arg(long, short)]
        node: Option<String>,
    },

    /// Stage a ready relay
    Stage {
        /// Relay channel id
        relay: u32,

        /// Node hosting the channel (default: the local bank)
        #[arg(long, short)]
        node: Option<String>,
    },

    /// Run or check sequence files
    Sequence {
        #[command(subcommand)]
        action: SequenceAction,
    },

    /// Inspect the mesh
    Mesh {
        #[command(subcommand)]
        action: MeshAction,
    },

    /// Ask the controller to rescan the mesh
    Scan,
}

#[derive(Subcommand, Debug)]
enum SequenceAction {
    /// Run a sequence file
    Run {
        /// JSON file with `name` and `steps`
        file: PathBuf,

        /// Hand the whole sequence to the controller instead of stepping locally
        #[arg(long)]
        on_device: bool,
    },

    /// Check a sequence file without running it
    Validate {
        /// JSON file with `name` and `steps`
        file: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum MeshAction {
    /// Cheapest route between two nodes
    Route {
        /// Source node id
        source: String,
        /// Target node id
        target: String,

        /// Query the controller instead of the last saved mesh
        #[arg(long)]
        live: bool,
    },

    /// Connectivity and stability scores
    Health {
        /// Query the controller instead of the last saved mesh
        #[arg(long)]
        live: bool,
    },

    /// Usable links, strongest anchors first
    Links {
        /// Query the controller instead of the last saved mesh
        #[arg(long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut client_config = config::load(cli.config.as_deref())?;
    config::apply_overrides(&mut client_config, cli.simulate, cli.host);
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => match &client_config.storage.data_dir {
            Some(dir) => dir.clone(),
            None => default_data_dir()?,
        },
    };

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir)
        .await
        .context("Failed to create data directory")?;

    let ctx = AppContext::new(client_config, data_dir);
    match cli.command {
        Commands::Status => status::run(&ctx).await?,
        Commands::Watch { seconds } => watch::run(&ctx, seconds).await?,
        Commands::Fire {
            relay: id,
            node,
            delay,
        } => relay::fire(&ctx, &relay::channel(node, id), delay).await?,
        Commands::Prime { relay: id, node } => relay::prime(&ctx, &relay::channel(node, id)).await?,
        Commands::Stage { relay: id, node } => relay::stage(&ctx, &relay::channel(node, id)).await?,
        Commands::Sequence { action } => match action {
            SequenceAction::Run { file, on_device } => sequence::run(&ctx, &file, on_device).await?,
            SequenceAction::Validate { file } => sequence::validate(&ctx, &file).await?,
        },
        Commands::Mesh { action } => match action {
            MeshAction::Route {
                source,
                target,
                live,
            } => mesh::route(&ctx, &source, &target, live).await?,
            MeshAction::Health { live } => mesh::health(&ctx, live).await?,
            MeshAction::Links { live } => mesh::links(&ctx, live).await?,
        },
        Commands::Scan => mesh::scan(&ctx).await?,
    }

    Ok(())
}

fn init_tracing(verbosity: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        })
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Get the default data directory for relaymesh.
fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "ydun", "relaymesh")
        .context("Could not determine home directory")?;
    Ok(dirs.data_dir().to_path_buf())
}
