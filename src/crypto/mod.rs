//! Cryptographic Operations Module
//!
//! This module handles all cryptographic operations for the bridge validator:
//! secp256k1 key loading, canonical recoverable signatures over Hive transaction
//! digests, signer key recovery, and Ethereum personal-message signatures for
//! withdrawals redeemed by the multi-signature contract.
//!
//! ## Security Requirements
//!
//! **CRITICAL**: Private keys are read from environment variables and must never
//! be exposed or logged.

use anyhow::{Context, Result};
use ethereum_types::U256;
use k256::ecdsa::signature::hazmat::{PrehashSigner, RandomizedPrehashSigner};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha2::Sha256;
use sha3::{Digest, Keccak256};
use tracing::info;

use crate::config::Config;

/// Version byte of Hive wallet import format keys.
const WIF_VERSION: u8 = 0x80;

/// Compact signature header offset for compressed public keys (27 + 4).
const HIVE_COMPACT_HEADER: u8 = 31;

/// Attempts at finding a canonical Hive signature before giving up.
const MAX_CANONICAL_ATTEMPTS: usize = 64;

// ============================================================================
// CRYPTOGRAPHIC SERVICE IMPLEMENTATION
// ============================================================================

/// Holds this node's signing keys.
///
/// The Hive key is the validator's active key (it must appear in the active
/// key authorities of the validator account). The Ethereum key must be one of
/// the signers known to the multi-signature withdrawal contract.
pub struct CryptoService {
    hive_key: SigningKey,
    ethereum_key: SigningKey,
}

impl CryptoService {
    /// Creates a new cryptographic service from the keys named in the configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(CryptoService)` - Successfully created crypto service
    /// * `Err(anyhow::Error)` - A key is missing or malformed
    pub fn new(config: &Config) -> Result<Self> {
        let wif = config.hive.get_active_key()?;
        let hive_secret = decode_wif(&wif).context("Invalid Hive active key")?;

        let ethereum_hex = config.ethereum.get_private_key()?;
        let ethereum_bytes = hex::decode(ethereum_hex.trim().trim_start_matches("0x"))
            .context("Ethereum private key is not hex")?;
        let ethereum_secret: [u8; 32] = ethereum_bytes.try_into().map_err(|bytes: Vec<u8>| {
            anyhow::anyhow!(
                "Invalid Ethereum private key length: expected 32 bytes, got {}",
                bytes.len()
            )
        })?;

        let service = Self::from_secret_bytes(&hive_secret, &ethereum_secret)?;
        info!("Crypto service initialized with keys from environment variables");
        Ok(service)
    }

    /// Creates a service from raw 32-byte secrets.
    pub fn from_secret_bytes(hive_secret: &[u8; 32], ethereum_secret: &[u8; 32]) -> Result<Self> {
        let hive_key = SigningKey::from_bytes(&(*hive_secret).into())
            .map_err(|e| anyhow::anyhow!("Failed to create Hive signing key: {}", e))?;
        let ethereum_key = SigningKey::from_bytes(&(*ethereum_secret).into())
            .map_err(|e| anyhow::anyhow!("Failed to create ECDSA signing key: {}", e))?;
        Ok(Self {
            hive_key,
            ethereum_key,
        })
    }

    /// Compressed SEC1 encoding of the Hive public key.
    pub fn hive_public_key(&self) -> Vec<u8> {
        self.hive_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    /// Signs a Hive transaction digest.
    ///
    /// Hive nodes only accept canonical signatures, so signing is repeated
    /// with fresh nonces until the compact form is canonical.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - 65-byte compact signature (header || r || s), hex encoded
    /// * `Err(anyhow::Error)` - Failed to produce a canonical signature
    pub fn sign_hive_digest(&self, digest: &[u8; 32]) -> Result<String> {
        let mut rng = rand::rngs::OsRng;
        for _ in 0..MAX_CANONICAL_ATTEMPTS {
            let signature: Signature = self
                .hive_key
                .sign_prehash_with_rng(&mut rng, digest)
                .map_err(|e| anyhow::anyhow!("Failed to sign transaction digest: {}", e))?;
            let signature = signature.normalize_s().unwrap_or(signature);
            let recovery_id = RecoveryId::trial_recovery_from_prehash(
                self.hive_key.verifying_key(),
                digest,
                &signature,
            )
            .map_err(|e| anyhow::anyhow!("Failed to compute recovery id: {}", e))?;

            let mut compact = [0u8; 65];
            compact[0] = recovery_id.to_byte() + HIVE_COMPACT_HEADER;
            compact[1..].copy_from_slice(&signature.to_bytes());

            if is_canonical(&compact) {
                return Ok(hex::encode(compact));
            }
        }
        Err(anyhow::anyhow!(
            "No canonical signature found after {} attempts",
            MAX_CANONICAL_ATTEMPTS
        ))
    }

    /// Signs a withdrawal that the multi-signature contract will redeem.
    ///
    /// Message format: keccak256(abi.encodePacked(to, amount, reference)), then
    /// keccak256("\x19Ethereum Signed Message:\n32" || messageHash).
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - ECDSA signature (r || s || v), 0x-prefixed hex
    /// * `Err(anyhow::Error)` - Failed to create signature
    pub fn sign_withdrawal(&self, to: &str, amount: U256, reference: &str) -> Result<String> {
        let message_hash = withdrawal_message_hash(to, amount, reference)?;
        let final_hash = ethereum_signed_message_hash(&message_hash);

        let signature: Signature = self
            .ethereum_key
            .sign_prehash(&final_hash)
            .map_err(|e| anyhow::anyhow!("Failed to sign precomputed hash: {}", e))?;
        let signature = signature.normalize_s().unwrap_or(signature);
        let recovery_id = RecoveryId::trial_recovery_from_prehash(
            self.ethereum_key.verifying_key(),
            &final_hash,
            &signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to compute recovery id: {}", e))?;

        // r || s || v with v in Ethereum format (27 or 28)
        let mut final_sig = Vec::with_capacity(65);
        final_sig.extend_from_slice(&signature.to_bytes());
        final_sig.push(recovery_id.to_byte() + 27);

        info!("Created withdrawal signature for reference {}", reference);
        Ok(format!("0x{}", hex::encode(final_sig)))
    }

    /// Derives the Ethereum address from the ECDSA public key.
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - Ethereum address as hex string (with 0x prefix)
    /// * `Err(anyhow::Error)` - Failed to derive address
    pub fn get_ethereum_address(&self) -> Result<String> {
        ethereum_address(self.ethereum_key.verifying_key())
    }
}

// ============================================================================
// HIVE KEY AND SIGNATURE HELPERS
// ============================================================================

/// Whether a 65-byte compact signature satisfies Hive's canonical form.
pub fn is_canonical(compact: &[u8; 65]) -> bool {
    compact[1] & 0x80 == 0
        && !(compact[1] == 0 && compact[2] & 0x80 == 0)
        && compact[33] & 0x80 == 0
        && !(compact[33] == 0 && compact[34] & 0x80 == 0)
}

/// Recovers the compressed public key that produced a Hive compact signature.
pub fn recover_hive_public_key(digest: &[u8; 32], signature_hex: &str) -> Result<Vec<u8>> {
    let bytes = hex::decode(signature_hex).context("Signature is not hex")?;
    if bytes.len() != 65 {
        return Err(anyhow::anyhow!(
            "Invalid signature length: expected 65 bytes, got {}",
            bytes.len()
        ));
    }

    let recovery_byte = bytes[0]
        .checked_sub(HIVE_COMPACT_HEADER)
        .ok_or_else(|| anyhow::anyhow!("Invalid signature header byte {}", bytes[0]))?;
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| anyhow::anyhow!("Invalid recovery id {}", recovery_byte))?;
    let signature = Signature::from_slice(&bytes[1..])
        .map_err(|e| anyhow::anyhow!("Invalid signature: {}", e))?;

    let key = VerifyingKey::recover_from_prehash(digest, &signature, recovery_id)
        .map_err(|e| anyhow::anyhow!("Failed to recover public key: {}", e))?;
    Ok(key.to_encoded_point(true).as_bytes().to_vec())
}

/// Decodes a Hive public key string (`STM...`) into compressed SEC1 bytes.
///
/// The three-letter address prefix is skipped and the trailing 4-byte checksum
/// is dropped; keys handled here come from chain RPC responses.
pub fn decode_hive_public_key(key: &str) -> Result<Vec<u8>> {
    let body = key
        .get(3..)
        .ok_or_else(|| anyhow::anyhow!("Public key '{}' is too short", key))?;
    let bytes = bs58::decode(body)
        .into_vec()
        .with_context(|| format!("Public key '{}' is not base58", key))?;
    if bytes.len() != 37 {
        return Err(anyhow::anyhow!(
            "Public key '{}' decodes to {} bytes, expected 37",
            key,
            bytes.len()
        ));
    }
    Ok(bytes[..33].to_vec())
}

/// Decodes a wallet import format private key.
pub fn decode_wif(wif: &str) -> Result<[u8; 32]> {
    let bytes = bs58::decode(wif.trim())
        .into_vec()
        .context("WIF key is not base58")?;
    if bytes.len() != 37 || bytes[0] != WIF_VERSION {
        return Err(anyhow::anyhow!("WIF key has an unexpected layout"));
    }

    let checksum = double_sha256(&bytes[..33]);
    if checksum[..4] != bytes[33..] {
        return Err(anyhow::anyhow!("WIF key checksum mismatch"));
    }

    let mut secret = [0u8; 32];
    secret.copy_from_slice(&bytes[1..33]);
    Ok(secret)
}

/// Encodes a private key in wallet import format.
pub fn encode_wif(secret: &[u8; 32]) -> String {
    let mut payload = Vec::with_capacity(37);
    payload.push(WIF_VERSION);
    payload.extend_from_slice(secret);
    let checksum = double_sha256(&payload);
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

// ============================================================================
// ETHEREUM HELPERS
// ============================================================================

/// keccak256(abi.encodePacked(address to, uint256 amount, string reference))
pub fn withdrawal_message_hash(to: &str, amount: U256, reference: &str) -> Result<[u8; 32]> {
    let address = hex::decode(to.trim_start_matches("0x"))
        .with_context(|| format!("Recipient '{}' is not hex", to))?;
    if address.len() != 20 {
        return Err(anyhow::anyhow!("Recipient '{}' is not a 20-byte address", to));
    }

    let mut amount_bytes = [0u8; 32];
    amount.to_big_endian(&mut amount_bytes);

    let mut hasher = Keccak256::new();
    hasher.update(&address);
    hasher.update(amount_bytes);
    hasher.update(reference.as_bytes());
    Ok(hasher.finalize().into())
}

/// keccak256("\x19Ethereum Signed Message:\n32" || message_hash)
pub fn ethereum_signed_message_hash(message_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(b"\x19Ethereum Signed Message:\n32");
    hasher.update(message_hash);
    hasher.finalize().into()
}

/// Ethereum address of a secp256k1 public key: keccak256(x || y)[12..32].
pub fn ethereum_address(verifying_key: &VerifyingKey) -> Result<String> {
    let public_key_point = verifying_key.to_encoded_point(false);
    let public_key_bytes = public_key_point.as_bytes();

    // Uncompressed format: 0x04 || x (32 bytes) || y (32 bytes) = 65 bytes total
    if public_key_bytes.len() != 65 || public_key_bytes[0] != 0x04 {
        return Err(anyhow::anyhow!(
            "Invalid public key format: expected 65 bytes with 0x04 prefix"
        ));
    }

    let hash = Keccak256::digest(&public_key_bytes[1..]);
    Ok(format!("0x{}", hex::encode(&hash[12..32])))
}

/// Recovers the Ethereum address that signed a withdrawal signature.
pub fn recover_withdrawal_signer(message_hash: &[u8; 32], signature_hex: &str) -> Result<String> {
    let bytes = hex::decode(signature_hex.trim_start_matches("0x")).context("Signature is not hex")?;
    if bytes.len() != 65 {
        return Err(anyhow::anyhow!(
            "Invalid signature length: expected 65 bytes, got {}",
            bytes.len()
        ));
    }
    let recovery_id = bytes[64]
        .checked_sub(27)
        .and_then(RecoveryId::from_byte)
        .ok_or_else(|| anyhow::anyhow!("Invalid v byte {}", bytes[64]))?;
    let signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| anyhow::anyhow!("Invalid signature: {}", e))?;

    let final_hash = ethereum_signed_message_hash(message_hash);
    let key = VerifyingKey::recover_from_prehash(&final_hash, &signature, recovery_id)
        .map_err(|e| anyhow::anyhow!("Failed to recover public key: {}", e))?;
    ethereum_address(&key)
}
