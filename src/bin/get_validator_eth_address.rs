//! Get Ethereum Address from Validator Config
//!
//! This binary reads the validator configuration and outputs the Ethereum address
//! derived from the withdrawal signing key. This address must be registered as a
//! signer of the multi-signature withdrawal contract.

use anyhow::Result;
use bridge_validator::config::Config;
use bridge_validator::crypto::CryptoService;

fn main() -> Result<()> {
    // Load config
    let config = Config::load()?;

    // Create crypto service
    let crypto = CryptoService::new(&config)?;

    // Get Ethereum address
    let eth_address = crypto.get_ethereum_address()?;

    println!("{}", eth_address);

    Ok(())
}
