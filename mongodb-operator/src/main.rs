mod bootstrap;
mod cache;
mod cli;
mod credentials;
mod k8s;
mod listener;
mod reap;
mod reconcile;
mod sweeper;
mod util;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::Cli;
use mongodb_operator_common::logging::{self, Level};
use tokio_util::sync::CancellationToken;

use cache::ResourceVersionCache;

#[tokio::main]
async fn main() -> ExitCode {
    mongodb_operator_common::init();
    let cli = Cli::parse();

    let loglevel = match cli.parsed_loglevel() {
        Ok(level) => level,
        Err(e) => {
            eprintln!("invalid --loglevel: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::set_min_level(loglevel);

    let client = match kube::Client::try_default().await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("failed to construct Kubernetes client: {e}");
            return ExitCode::FAILURE;
        }
    };

    logging::log(Level::Info, "Supervisor", "starting MongoDB cluster controller".to_string());

    let cache = Arc::new(ResourceVersionCache::new());
    let shutdown = CancellationToken::new();

    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        mongodb_operator_common::shutdown::shutdown_signal().await;
        shutdown_for_signal.cancel();
    });

    let sweeper_task = tokio::spawn(sweeper::run(
        client.clone(),
        cache.clone(),
        Duration::from_secs(cli.periodic_check_interval),
        shutdown.clone(),
    ));
    let listener_task = tokio::spawn(listener::run(
        client.clone(),
        cache.clone(),
        cli.event_listener_timeout,
        shutdown.clone(),
    ));

    let _ = tokio::join!(sweeper_task, listener_task);

    logging::log(Level::Info, "Supervisor", "shutdown complete".to_string());
    ExitCode::SUCCESS
}
