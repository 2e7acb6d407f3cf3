//! peerchatd: peer-to-peer text chat over direct TCP links.
//!
//! Usage: peerchatd <PORT>

mod shell;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use peerchat_core::config::PeerchatConfig;
use peerchat_services::events;
use peerchatd::local_addr::detect_local_ip;
use peerchatd::{PeerManager, PeerSettings};

#[derive(Debug, Parser)]
#[command(name = "peerchatd", version, about = "Peer-to-peer text chat over direct TCP links")]
struct Args {
    /// Port to listen on for peer connections.
    #[arg(value_parser = clap::value_parser!(u16).range(1024..=65535))]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first: it carries the log filter.
    let (config, config_error) = match PeerchatConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (PeerchatConfig::default(), Some(e)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(e) = config_error {
        tracing::warn!(error = %e, "config load failed, using defaults");
    }

    let my_ip = config
        .network
        .advertise_ip
        .unwrap_or_else(detect_local_ip);
    let settings = PeerSettings::from_config(&config.network, args.port, my_ip);

    let (sink, event_rx) = events::channel();
    let manager = PeerManager::start(settings, Arc::new(sink))
        .await
        .with_context(|| format!("failed to start peer on port {}", args.port))?;
    let manager = Arc::new(manager);

    println!("Chat application started on port {}", manager.my_port());
    println!("My IP: {}", manager.my_ip());
    println!("Type 'help' for available commands\n");

    let printer = tokio::spawn(shell::print_events(event_rx));

    tokio::select! {
        _ = shell::run(Arc::clone(&manager), shell::stdin_lines()) => {}
        _ = tokio::signal::ctrl_c() => {
            println!();
            tracing::info!("shutdown signal received");
        }
    }

    println!("Closing all connections...");
    manager.shutdown().await;
    printer.abort();
    println!("Goodbye!");
    Ok(())
}
