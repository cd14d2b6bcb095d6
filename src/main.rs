//! stratumd — a Stratum v1 proxy bridging ASIC miners to a Bitcoin Core node.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info, warn};
use stratumd_consensus::{CoinbaseConfig, TemplateManager};
use stratumd_mining::{Dispatcher, DispatcherConfig};
use stratumd_rpc::NodeClient;
use tokio::sync::watch;

use config::Config;

const EXIT_OK: u8 = 0;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_NODE_UNAVAILABLE: u8 = 3;

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();

    let runtime = tokio::runtime::Runtime::new().expect("failed to start the tokio runtime");
    ExitCode::from(runtime.block_on(run(config)))
}

async fn run(config: Config) -> u8 {
    let node = Arc::new(NodeClient::new(
        config.node_rpc_url.clone(),
        config.node_rpc_user.clone(),
        config.node_rpc_pass.clone(),
        config.node_timeout,
    ));

    if let Err(e) = node.get_blockchain_info().await {
        error!("node unreachable at startup: {e}");
        return EXIT_NODE_UNAVAILABLE;
    }
    match node.get_network_info().await {
        Ok(_) => info!("connected to Bitcoin Core at {}", config.node_rpc_url),
        Err(e) => warn!("getnetworkinfo failed (continuing anyway): {e}"),
    }

    let coinbase_config = CoinbaseConfig {
        payout_script: config.payout_script.clone(),
        tag: config.coinbase_tag.clone(),
    };
    let (template_manager, job_rx) = TemplateManager::new(node.clone(), coinbase_config, config.poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let manager_for_refresh = template_manager.clone();
    let request_refresh: Arc<dyn Fn() + Send + Sync> = Arc::new(move || manager_for_refresh.request_refresh());

    let dispatcher_config = DispatcherConfig {
        listen_addr: config.listen_addr,
        share_difficulty_floor: config.share_difficulty_floor,
        idle_timeout: config.idle_timeout,
        handshake_timeout: config.handshake_timeout,
    };
    let dispatcher = Arc::new(Dispatcher::new(dispatcher_config, node.clone(), job_rx, request_refresh));

    let manager_task = tokio::spawn(template_manager.clone().run(shutdown_rx.clone()));
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx.clone()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }

    let _ = shutdown_tx.send(true);

    match dispatcher_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("dispatcher exited with an error: {e}"),
        Err(e) => error!("dispatcher task panicked: {e}"),
    }
    if let Err(e) = manager_task.await {
        error!("template manager task panicked: {e}");
    }

    info!("stratumd shut down cleanly");
    EXIT_OK
}
