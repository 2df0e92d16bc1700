use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ukv_server::{serve, Role, ServerConfig, ServerState};

/// In-memory RESP2 server speaking as a node, a cluster or a sentinel.
#[derive(Debug, Parser)]
#[command(name = "ukv-server", version)]
struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:6379")]
    bind: String,

    /// How the server presents itself.
    #[arg(long, value_enum, default_value_t = Role::Single)]
    role: Role,

    /// Password clients must send with AUTH.
    #[arg(long)]
    requirepass: Option<String>,

    /// Number of logical databases.
    #[arg(long, default_value_t = 16)]
    databases: usize,

    /// Expiration sweep period in milliseconds (0 disables the sweep).
    #[arg(long, default_value_t = 100)]
    expire_interval_ms: u64,

    /// Master group name reported in sentinel mode.
    #[arg(long, default_value = "mymaster")]
    master_name: String,

    /// Master address reported in sentinel mode.
    #[arg(long)]
    master_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    if args.role == Role::Sentinel && args.master_addr.is_none() {
        bail!("--master-addr is required in sentinel mode");
    }

    let config = ServerConfig {
        bind: args.bind.clone(),
        role: args.role,
        password: args.requirepass,
        databases: args.databases,
        expire_interval: (args.expire_interval_ms > 0)
            .then(|| Duration::from_millis(args.expire_interval_ms)),
        master_name: args.master_name,
        master_addr: args.master_addr,
    };

    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    let addr = listener.local_addr()?;
    let state = Arc::new(ServerState::new(&config, addr));
    let expirer = config
        .expire_interval
        .map(|interval| state.store().start_expirer(interval));
    info!(%addr, role = ?config.role, "listening");

    tokio::select! {
        result = serve(listener, state) => result.context("accept loop failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down"),
    }

    if let Some(expirer) = expirer {
        expirer.stop();
    }
    Ok(())
}
