// CLI entry point for the CTMP relay.
//
// Builds a `RelayConfig` (defaults, then an optional JSON file, then flags),
// installs the tracing subscriber, and runs the relay on the main thread. The
// process only exits on its own if startup fails. See `server.rs` for the
// networking architecture.
//
// Usage:
//   ctmp-relay [OPTIONS]
//     --config <FILE>          JSON config file
//     --bind <ADDR>            Interface for both ports (default: 0.0.0.0)
//     --source-port <PORT>     Source port (default: 33333)
//     --listener-port <PORT>   Listener port (default: 44444)
//     --log-level <LEVEL>      Log filter when RUST_LOG is unset (default: info)

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ctmp_relay::{RelayConfig, Result, serve};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ctmp-relay")]
#[command(about = "Relay CTMP frames from one source to many listeners")]
#[command(version)]
struct Args {
    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface both ports bind to
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Port for the upstream source
    #[arg(long)]
    source_port: Option<u16>,

    /// Port for downstream listeners
    #[arg(long)]
    listener_port: Option<u16>,

    /// Log filter (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    let result = load_config(&args).and_then(serve);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "relay failed to start");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Defaults, then the config file, then command-line flags.
fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config = match &args.config {
        Some(path) => RelayConfig::from_file(path)?,
        None => RelayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(port) = args.source_port {
        config.source_port = port;
    }
    if let Some(port) = args.listener_port {
        config.listener_port = port;
    }
    Ok(config)
}
