//! secp256k1 Key Generation Utility
//!
//! This binary generates a new secp256k1 key for a bridge validator.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin generate_keys
//! ```
//!
//! ## Output
//!
//! The script outputs:
//! - Private key (WIF) - set as BRIDGE_HIVE_ACTIVE_KEY when used as Hive active key
//! - Private key (hex) - set as BRIDGE_ETHEREUM_PRIVATE_KEY when used as Ethereum key
//! - Compressed public key (hex)
//! - Ethereum address - register it as a signer of the withdrawal contract
//!
//! Keys go into environment variables, never into the config file.

use anyhow::Result;
use k256::ecdsa::SigningKey;
use rand::Rng;

use bridge_validator::crypto::{encode_wif, ethereum_address};

fn main() -> Result<()> {
    let mut rng = rand::rngs::OsRng;
    let signing_key = loop {
        let mut secret_key_bytes = [0u8; 32];
        rng.fill(&mut secret_key_bytes);
        // Out-of-range scalars are rejected; draw again
        if let Ok(key) = SigningKey::from_bytes(&secret_key_bytes.into()) {
            break key;
        }
    };

    let secret: [u8; 32] = signing_key.to_bytes().into();
    let public_key = signing_key.verifying_key().to_encoded_point(true);

    println!("Generated secp256k1 Key:");
    println!("Private Key (WIF): {}", encode_wif(&secret));
    println!("Private Key (hex): 0x{}", hex::encode(secret));
    println!("Public Key (compressed hex): {}", hex::encode(public_key.as_bytes()));
    println!("Ethereum Address: {}", ethereum_address(signing_key.verifying_key())?);
    println!();
    println!("Export the keys in the environment variables named in config/bridge-validator.toml.");
    Ok(())
}
