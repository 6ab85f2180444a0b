use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use aprs_gateway::log_format::GatewayFormat;

mod commands;

use commands::{IngestOptions, InputKind};

#[derive(Parser, Debug)]
#[command(
    name = "aprs-gateway",
    about = "Decode, deduplicate and track APRS packets heard on RF or received from APRS-IS"
)]
struct Cli {
    /// Configuration file (default: $APRS_GATEWAY_CONFIG or ./aprs-gateway.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Serve Prometheus metrics on this port
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    /// Print the position history when the input ends
    #[arg(long, global = true, default_value_t = false)]
    dump_history: bool,

    /// More logging: -v for debug, -vv for trace
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read TNC2 lines as received from APRS-IS
    Aprsis {
        /// Input file, stdin when omitted
        input: Option<PathBuf>,
    },
    /// Read `PORT[:SUBIF] HEXFRAME` lines, one AX.25 frame per line
    Rf {
        /// Input file, stdin when omitted
        input: Option<PathBuf>,
    },
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .event_format(GatewayFormat {
            ansi: std::io::stderr().is_terminal(),
        })
        .init();
}

fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let (kind, input) = match cli.command {
        Commands::Aprsis { input } => (InputKind::AprsIs, input),
        Commands::Rf { input } => (InputKind::Rf, input),
    };
    let options = IngestOptions {
        kind,
        input,
        config_path: cli.config.unwrap_or_else(aprs_gateway::config::config_path),
        metrics_port: cli.metrics_port,
        dump_history: cli.dump_history,
    };

    // caches and packet buffers are single-threaded
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;
    runtime.block_on(commands::handle_ingest(options))
}
