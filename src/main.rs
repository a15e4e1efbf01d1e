// src/main.rs

//! The main entry point for the Muster agent.

use anyhow::Result;
use muster::config::Config;
use muster::core::agent::Agent;
use muster::core::deployer::NoopDeployer;
use muster::core::mainloop::{InternalSubscriber, MainLoop};
use muster::core::messages::WireMessage;
use muster::core::rpc::TcpProcessManagerClient;
use muster::core::rules::RulesBook;
use std::env;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;

/// Placeholder subscriber used until the wire transport is attached: it
/// delivers nothing and honors disconnects.
struct IdleSubscriber;

#[async_trait::async_trait]
impl InternalSubscriber for IdleSubscriber {
    async fn recv(&mut self) -> Option<WireMessage> {
        std::future::pending().await
    }

    fn disconnect(&mut self, _addresses: &[String]) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("Muster version {VERSION}");
        return Ok(());
    }
    if args.len() != 2 {
        eprintln!("Usage: muster /path/to/muster.toml");
        std::process::exit(1);
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .compact()
        .with_ansi(true)
        .init();

    info!("Starting Muster {VERSION}...");

    let config = Config::from_file(&args[1]).await?;
    config.validate()?;

    let rules = match &config.deployment_file {
        Some(path) => RulesBook::load(path)?,
        None => RulesBook::default(),
    };

    let (agent, handles) = Agent::init(&config, rules, Box::new(NoopDeployer))?;

    let main_loop = MainLoop::new(
        IdleSubscriber,
        TcpProcessManagerClient::new(config.rpc_port),
        handles.requests,
        handles.events.clone(),
        handles.bus.clone(),
    );
    let main_loop_handle = main_loop.start();

    info!(
        "Agent '{}' supervising {} host(s).",
        config.local_address,
        config.address_list.len()
    );
    agent.run().await;

    main_loop_handle.stop().await;
    Ok(())
}
