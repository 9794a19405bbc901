//! Bridge Validator Service
//!
//! A validator node for the Hive <-> Ethereum token bridge.
//!
//! ## Overview
//!
//! The validator:
//! 1. Streams Hive blocks and Ethereum bridge events
//! 2. Rotates the head validator every 5000 Hive blocks
//! 3. Proposes payouts while it is head validator
//! 4. Re-validates and countersigns proposals from the head validator
//! 5. Broadcasts Hive payouts once enough validator signatures are collected
//!
//! ## Security Requirements
//!
//! **CRITICAL**: This service holds the validator's Hive active key and an
//! Ethereum signing key. Both are read from environment variables only.

use anyhow::Result;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use bridge_validator::config::Config;
use bridge_validator::node::BridgeNode;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

/// Main application entry point that initializes and runs the validator.
///
/// This function:
/// 1. Initializes logging and tracing
/// 2. Loads configuration from TOML file
/// 3. Builds the node (keys, store, chain clients)
/// 4. Runs until Ctrl-C, then drains in-flight work
#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging (RUST_LOG overrides the default level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Bridge Validator Service");

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        println!("Bridge Validator Service");
        println!();
        println!("Usage: bridge-validator [OPTIONS]");
        println!();
        println!("Options:");
        println!("  --config <path>   Use custom config file path");
        println!("  --help, -h        Show this help message");
        println!();
        println!("Environment variables:");
        println!("  BRIDGE_VALIDATOR_CONFIG_PATH   Path to config file (overrides --config)");
        println!("  BRIDGE_HIVE_ACTIVE_KEY         Hive active key (WIF), name configurable");
        println!("  BRIDGE_ETHEREUM_PRIVATE_KEY    Ethereum private key (hex), name configurable");
        println!("  RUST_LOG                       Log filter (default: info)");
        return Ok(());
    }

    let mut config_path = None;
    let mut i = 1; // Skip program name
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            config_path = Some(args[i + 1].clone());
            i += 1;
        }
        i += 1;
    }

    if let Some(path) = config_path {
        if std::env::var("BRIDGE_VALIDATOR_CONFIG_PATH").is_err() {
            std::env::set_var("BRIDGE_VALIDATOR_CONFIG_PATH", &path);
            info!("Using custom config: {}", path);
        }
    }

    // Load configuration from config/bridge-validator.toml (or BRIDGE_VALIDATOR_CONFIG_PATH)
    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let node = BridgeNode::new(config).await?;
    info!("All components initialized successfully");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, draining workers");
            let _ = shutdown_tx.send(true);
        }
    });

    // Run the node (this blocks until shutdown)
    node.run(shutdown_rx).await
}
