//! `nanos`: talk to a hardware signer over the simulated USB link.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use nanos_runner::{connect, execute, Request, RunnerConfig, RunnerError};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// YAML configuration with `link:` and `simulator:` sections
    #[clap(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[clap(long, global = true)]
    json: bool,

    /// Log filter, overrides RUST_LOG (e.g. "debug", "nanos_link=trace")
    #[clap(long, global = true)]
    log_level: Option<String>,

    /// Serve Prometheus metrics on this address
    #[cfg(feature = "prometheus")]
    #[clap(long, global = true)]
    metrics_addr: Option<std::net::SocketAddr>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the firmware version
    Version,
    /// Read the address at a derivation index
    Address(AddressArgs),
    /// Sign a 32-byte transaction hash
    Sign(SignArgs),
}

#[derive(Args)]
struct AddressArgs {
    #[clap(long, short = 'i', default_value_t = 0)]
    index: u32,

    /// Do not display the address on the device
    #[clap(long)]
    silent: bool,
}

#[derive(Args)]
struct SignArgs {
    /// Hex-encoded hash, optionally 0x-prefixed
    #[clap(long)]
    hash: String,

    #[clap(long, short = 'i', default_value_t = 0)]
    index: u32,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), RunnerError> {
    let config = match &cli.config {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };

    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = nanos_metrics::install_prometheus_exporter(addr) {
            error!("failed to start metrics exporter: {e}");
        }
    }
    nanos_metrics::describe_metrics();

    let request = match cli.command {
        Commands::Version => Request::Version,
        Commands::Address(args) => Request::Address {
            index: args.index,
            silent: args.silent,
        },
        Commands::Sign(args) => Request::sign_hex(args.index, &args.hash)?,
    };

    let connected = connect(&config)?;
    let output = execute(&connected.signer, &request)?;
    connected.signer.destroy();

    if cli.json {
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("failed to serialize output: {e}"),
        }
    } else {
        println!("{output}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
