//! robot-node: BFT consensus node composition and static-federation
//! encrypted overlay.

use clap::Parser;
use robot_node::config::{CliArgs, Config};
use robot_node::consensus::Composition;
use robot_node::net::NetworkTransport;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = CliArgs::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate_node_index(args.node_index) {
        error!(error = %e, "configuration error");
        std::process::exit(1);
    }

    let mut composition = match Composition::start(&config, args.node_index).await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to start node");
            std::process::exit(1);
        }
    };

    composition.spawn_pruner(
        Duration::from_millis(config.db.prune_interval_ms),
        config.db.block_history_size,
    );

    info!(
        node_index = args.node_index,
        peer = %composition.local_key(),
        "node started, resuming at view {}",
        composition.initial_state.view_number
    );

    let status_network = composition.network.clone();
    let mut status_interval = tokio::time::interval(Duration::from_secs(30));
    let status_task = tokio::spawn(async move {
        loop {
            status_interval.tick().await;
            info!(
                connected_peers = status_network.connected_peers().len(),
                "status"
            );
        }
    });

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    info!("shutdown signal received, tearing down");
    status_task.abort();
    composition.shutdown().await;
}
