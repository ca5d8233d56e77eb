// CLI entry point for the Dune Timer relay.
//
// Starts a standalone relay that hosts and controllers connect to. The relay
// only routes messages between members of a room; timer state lives on the
// host. See `server.rs` for the networking architecture and `room.rs` for
// membership rules.
//
// Logging goes through `env_logger`; the default filter is `info` (joins,
// moves, disconnects) and `RUST_LOG=debug` adds every relayed event.

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use dune_timer_relay::server::{RelayConfig, start_relay};

#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Room-code relay for Dune Timer hosts and controllers")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 3001)]
    port: u16,

    #[arg(long, default_value_t = 25, help = "Seconds between keep-alive frames")]
    heartbeat_secs: u64,

    #[arg(long, default_value_t = 45, help = "Drop connections silent for this many seconds")]
    idle_timeout_secs: u64,

    #[arg(long, default_value_t = 10, help = "Drop connections that stop reading for this many seconds")]
    write_timeout_secs: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = RelayConfig {
        bind: args.bind,
        port: args.port,
        heartbeat_interval: Duration::from_secs(args.heartbeat_secs),
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        write_timeout: Duration::from_secs(args.write_timeout_secs),
    };
    let (_handle, addr) = start_relay(config.clone())
        .with_context(|| format!("failed to bind relay on {}:{}", config.bind, config.port))?;
    log::info!("relay ready on {addr}; stop with Ctrl+C");

    // The process exits on SIGINT/SIGTERM; relay threads die with it.
    loop {
        std::thread::park();
    }
}
