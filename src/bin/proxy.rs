//! PSO Blue Burst intercepting reverse proxy
//!
//! Fronts a set of PSO backend servers:
//! - Accepts game clients on the mapped proxy ports
//! - Captures each session's welcome packet to key the stream ciphers
//! - Logs every packet, decrypted and annotated
//! - Rewrites server redirects so the client never leaves the proxy

use anyhow::{Context, Result};
use clap::Parser;
use pso_proxy::config::{PortMap, ProxyRegistry};
use pso_proxy::proxy::{self, ProxyListener};
use std::fs::File;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// PSO Blue Burst intercepting reverse proxy
#[derive(Parser, Debug)]
#[command(name = "pso-proxy")]
#[command(about = "Intercepting reverse proxy for PSO Blue Burst servers")]
#[command(version)]
struct Args {
    /// Host on which the proxy will listen; also the address stamped into
    /// rewritten redirect packets
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Host on which the PSO servers are listening
    #[arg(long = "serverhost", default_value = "127.0.0.1")]
    server_host: String,

    /// File to which output will be logged (truncated on open)
    #[arg(long)]
    file: Option<PathBuf>,

    /// Don't log timestamps
    #[arg(long = "notime")]
    no_time: bool,

    /// Only print packet names instead of full data
    #[arg(long = "nameonly")]
    name_only: bool,

    /// Verbose per-read tracing
    #[arg(long)]
    debug: bool,

    /// Optional TOML port map overriding the built-in server set
    #[arg(long)]
    config: Option<PathBuf>,

    /// Proxy the patch and data servers as well
    #[arg(long = "with-patch")]
    with_patch: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;

    let host: Ipv4Addr = args
        .host
        .parse()
        .context("proxy host must be an IPv4 address")?;

    let map = match &args.config {
        Some(path) => PortMap::load(path)
            .with_context(|| format!("Failed to load port map {}", path.display()))?,
        None => PortMap::builtin(args.with_patch),
    };

    let registry = Arc::new(ProxyRegistry::new(host, &args.server_host, &map));

    let (bus_tx, bus_rx) = proxy::channel();
    tokio::spawn(proxy::run_consumer(bus_rx, args.name_only));

    // Bind everything up front: a bind failure means the port map is wrong
    // and the process should not come up half-configured.
    let mut listeners = Vec::new();
    for endpoint in registry.endpoints() {
        listeners.push(ProxyListener::bind(endpoint.clone()).await?);
    }

    info!("pso-proxy v{}", pso_proxy::VERSION);
    for listener in listeners {
        tokio::spawn(listener.run(registry.clone(), bus_tx.clone()));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    Ok(())
}

/// Configure the log sink from the flags: level, timestamps, and an
/// optional file target.
fn init_logging(args: &Args) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if args.debug { "debug" } else { "info" }));

    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(args.file.is_none());

    match (&args.file, args.no_time) {
        (Some(path), true) => {
            let file = File::create(path)
                .with_context(|| format!("Unable to open log file {}", path.display()))?;
            fmt.with_writer(Arc::new(file)).without_time().init();
        }
        (Some(path), false) => {
            let file = File::create(path)
                .with_context(|| format!("Unable to open log file {}", path.display()))?;
            fmt.with_writer(Arc::new(file)).init();
        }
        (None, true) => fmt.without_time().init(),
        (None, false) => fmt.init(),
    }
    Ok(())
}
