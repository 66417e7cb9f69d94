//! ChainOps Executor service entry point.
//!
//! Loads the YAML config for the selected environment, wires the logging
//! stack, registers the integration clients and runs the execution engine
//! until interrupted. With the `mock-api` feature (the default) a scriptable
//! in-memory integration is registered under the `Mock` blockchain type so
//! the service runs without live chain connectivity.

use std::sync::Arc;

use tracing::info;

use chainops_executor::blockchain::BlockchainApiClientProvider;
use chainops_executor::config::AppConfig;
use chainops_executor::logging::init_logging;
use chainops_executor::workflow::ExecutionEngine;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env = get_env();
    let config = AppConfig::load(&env).unwrap_or_else(|err| {
        eprintln!("config/{env}.yaml not usable ({err}), falling back to defaults");
        AppConfig::default()
    });
    let _guard = init_logging(&config);

    #[cfg_attr(not(feature = "mock-api"), allow(unused_mut))]
    let mut provider = BlockchainApiClientProvider::new();
    #[cfg(feature = "mock-api")]
    provider.register(
        "Mock".into(),
        Arc::new(chainops_executor::blockchain::mock::MockBlockchainApiClient::new()),
    );

    let engine = ExecutionEngine::start(&config, Arc::new(provider));
    info!(
        workers = config.dispatch.workers,
        queue_capacity = config.dispatch.queue_capacity,
        "execution engine started"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    engine.shutdown();
    Ok(())
}
