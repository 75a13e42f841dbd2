use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use lockstep_netd::{RelayConfig, run_server};

/// Lockstep relay server
#[derive(Parser, Debug)]
#[command(name = "lockstep-netd")]
#[command(about = "Clock-sync and command relay for lockstep peers", long_about = None)]
struct Args {
    /// WebSocket bind address
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,

    /// Keepalive interval advertised to peers, in milliseconds
    #[arg(long, default_value_t = 25_000)]
    ping_interval_ms: u64,

    /// Keepalive timeout advertised to peers, in milliseconds
    #[arg(long, default_value_t = 60_000)]
    ping_timeout_ms: u64,

    /// Ticks between state audits
    #[arg(long, default_value_t = lockstep_netproto::constants::DEFAULT_AUDIT_INTERVAL)]
    audit_interval: i64,

    /// Command delay (ticks) used until peers report their round trips
    #[arg(long, default_value_t = 0)]
    initial_command_delay: i64,

    /// Keep only this many recent ticks in the desync ledger
    #[arg(long)]
    ledger_retention: Option<usize>,

    /// Fixed session random seed (random when omitted)
    #[arg(long)]
    seed: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = RelayConfig {
        ping_interval: Duration::from_millis(args.ping_interval_ms),
        ping_timeout: Duration::from_millis(args.ping_timeout_ms),
        audit_interval: args.audit_interval,
        initial_command_delay: args.initial_command_delay,
        ledger_retention: args.ledger_retention,
        seed: args.seed,
        ..RelayConfig::default()
    };

    // Network layer -> server loop events.
    let (tx, rx) = mpsc::channel(1024);

    let bind_addr: SocketAddr = args.bind.parse()?;
    tokio::spawn(async move {
        if let Err(e) = lockstep_netd::net::ws::run_ws_listener(bind_addr, tx).await {
            tracing::error!(error = %e, "Listener stopped");
        }
    });

    info!("Lockstep relay started on ws://{}", args.bind);
    info!("Log level: {}", args.log_level);

    run_server(rx, config).await
}
