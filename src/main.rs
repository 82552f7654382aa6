use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use api::{DaemonOptions, Transport};

/// Local developer-assist daemon: workspace indexing, retrieval, planning,
/// execution, and review tools over line-delimited JSON-RPC.
#[derive(Debug, Parser)]
#[command(name = "context-daemon", version, about)]
struct Cli {
    /// Workspace directory (the unit of operation).
    #[arg(long, default_value = ".")]
    workspace: PathBuf,

    /// Index the workspace on startup.
    #[arg(long)]
    index: bool,

    /// Watch the workspace and keep the index fresh.
    #[arg(long)]
    watch: bool,

    /// Tool protocol transport.
    #[arg(long, value_enum, default_value_t = TransportArg::Stdio)]
    transport: TransportArg,

    /// Port for the HTTP transport.
    #[arg(long, default_value_t = 8787)]
    port: u16,

    /// Expose the plain-text metrics listener.
    #[arg(long)]
    metrics: bool,

    /// Port for the metrics listener.
    #[arg(long, default_value_t = 9187)]
    metrics_port: u16,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransportArg {
    Stdio,
    Http,
}

/// `RUST_LOG` wins; `CE_DEBUG_INDEX` / `CE_DEBUG_SEARCH` raise the indexing
/// and retrieval crates to debug without touching the rest.
fn build_env_filter() -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if debug_flag("CE_DEBUG_INDEX") {
        filter = filter.add_directive("indexing=debug".parse().expect("valid directive"));
    }
    if debug_flag("CE_DEBUG_SEARCH") {
        filter = filter.add_directive("retrieval=debug".parse().expect("valid directive"));
    }
    filter
}

fn debug_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env when present; a missing file is
    // fine, anything else is a startup error.
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(e) if e.not_found() => {}
        Err(e) => {
            eprintln!("failed to load .env: {e}");
            return ExitCode::from(1);
        }
    }

    // Logs go to stderr: stdout is the JSON-RPC byte stream.
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter())
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let cli = Cli::parse();
    let opts = DaemonOptions {
        workspace: cli.workspace,
        index_on_start: cli.index,
        watch: cli.watch,
        transport: match cli.transport {
            TransportArg::Stdio => Transport::Stdio,
            TransportArg::Http => Transport::Http,
        },
        port: cli.port,
        metrics: cli.metrics,
        metrics_port: cli.metrics_port,
    };

    match api::start(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("startup failed [{}]: {}", e.code, e);
            // Policy violations (offline-mode conflict) exit 2.
            if e.code.starts_with("OfflinePolicy") {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}
