//! EVM Client Module
//!
//! This module provides a client for communicating with EVM-compatible blockchain nodes
//! via their JSON-RPC API. It polls bridge transfer events, looks up transactions,
//! decodes bridge call data and signs withdrawals for the multi-signature contract.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethereum_types::U256;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chain::EthereumChain;
use crate::config::Config;
use crate::crypto::CryptoService;

/// Largest block range requested per eth_getLogs call.
const MAX_LOG_RANGE: u64 = 1000;

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// EVM JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: Vec<serde_json::Value>,
    id: u64,
}

/// EVM JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

/// EVM event log entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmLog {
    /// Address of the contract that emitted the event
    pub address: String,
    /// Array of topics (indexed event parameters)
    pub topics: Vec<String>,
    /// Event data (non-indexed parameters)
    pub data: String,
    /// Block number (JSON-RPC uses camelCase: blockNumber)
    #[serde(rename = "blockNumber")]
    pub block_number: String,
    /// Transaction hash (JSON-RPC uses camelCase: transactionHash)
    #[serde(rename = "transactionHash")]
    pub transaction_hash: String,
}

/// EVM transaction details from JSON-RPC
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EvmTransaction {
    /// Transaction hash
    pub hash: String,
    /// Block number (hex string, null while pending)
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    /// From address (sender)
    pub from: String,
    /// To address (recipient/contract, null for contract creation)
    pub to: Option<String>,
    /// Transaction data (calldata)
    pub input: String,
}

/// Decoded `bridgeTransfer(address,uint256,string)` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCallData {
    /// 4-byte method selector, 0x-prefixed hex
    pub selector: String,
    /// Token address argument
    pub token: String,
    /// Amount in token base units
    pub amount: U256,
    /// Hive account that receives the payout
    pub recipient: String,
}

/// Decoded `BridgeTransfer(address indexed sender, uint256 amount, string externalAddress)` log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeTransferLog {
    pub sender: String,
    pub amount: U256,
    /// Hive account that receives the payout
    pub external_address: String,
    pub block_number: u64,
    pub transaction_hash: String,
}

/// Logs found in one polled block range. `to_block` is the last block scanned.
#[derive(Debug, Clone)]
pub struct LogBatch {
    pub logs: Vec<EvmLog>,
    pub to_block: u64,
}

// ============================================================================
// ABI HELPERS
// ============================================================================

/// Whether `value` is a 0x-prefixed 20-byte address. Mixed-case input must
/// carry a valid EIP-55 checksum.
pub fn is_address(value: &str) -> bool {
    let Some(body) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) else {
        return false;
    };
    if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }

    let all_lower = !body.chars().any(|c| c.is_ascii_uppercase());
    let all_upper = !body.chars().any(|c| c.is_ascii_lowercase());
    all_lower || all_upper || to_checksum_address(body) == format!("0x{}", body)
}

/// EIP-55 mixed-case rendering of an address.
pub fn to_checksum_address(address: &str) -> String {
    let lower = address.trim_start_matches("0x").to_ascii_lowercase();
    let hash = Keccak256::digest(lower.as_bytes());

    let checksummed: String = lower
        .chars()
        .enumerate()
        .map(|(i, c)| {
            let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                c.to_ascii_uppercase()
            } else {
                c
            }
        })
        .collect();
    format!("0x{}", checksummed)
}

/// keccak256 of a function or event signature.
pub fn signature_hash(signature: &str) -> [u8; 32] {
    Keccak256::digest(signature.as_bytes()).into()
}

/// 4-byte selector of a function signature, 0x-prefixed hex.
pub fn method_selector(signature: &str) -> String {
    format!("0x{}", hex::encode(&signature_hash(signature)[..4]))
}

/// Event topic of an event signature, 0x-prefixed hex.
pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(signature_hash(signature)))
}

fn word(data: &[u8], index: usize) -> Result<&[u8]> {
    data.get(index * 32..index * 32 + 32)
        .ok_or_else(|| anyhow::anyhow!("ABI data too short for word {}", index))
}

fn word_as_usize(bytes: &[u8]) -> Result<usize> {
    let value = U256::from_big_endian(bytes);
    if value > U256::from(u32::MAX) {
        return Err(anyhow::anyhow!("ABI offset {} out of range", value));
    }
    Ok(value.as_usize())
}

fn decode_string(data: &[u8], offset: usize) -> Result<String> {
    let length_word = data
        .get(offset..offset + 32)
        .ok_or_else(|| anyhow::anyhow!("ABI string offset {} out of range", offset))?;
    let length = word_as_usize(length_word)?;
    let bytes = data
        .get(offset + 32..offset + 32 + length)
        .ok_or_else(|| anyhow::anyhow!("ABI string of length {} truncated", length))?;
    String::from_utf8(bytes.to_vec()).context("ABI string is not UTF-8")
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value.trim_start_matches("0x")).with_context(|| format!("'{}' is not hex", value))
}

/// Decodes `bridgeTransfer(address token, uint256 amount, string recipient)` call data.
pub fn decode_bridge_call_data(input: &str) -> Result<BridgeCallData> {
    let bytes = decode_hex(input)?;
    if bytes.len() < 4 {
        return Err(anyhow::anyhow!("Call data shorter than a method selector"));
    }
    let (selector, args) = bytes.split_at(4);

    let token = format!("0x{}", hex::encode(&word(args, 0)?[12..]));
    let amount = U256::from_big_endian(word(args, 1)?);
    let recipient = decode_string(args, word_as_usize(word(args, 2)?)?)?;

    Ok(BridgeCallData {
        selector: format!("0x{}", hex::encode(selector)),
        token,
        amount,
        recipient,
    })
}

/// Decodes a `BridgeTransfer` log; data = abi.encode(uint256 amount, string externalAddress).
pub fn decode_bridge_log(log: &EvmLog) -> Result<BridgeTransferLog> {
    let sender_topic = log
        .topics
        .get(1)
        .ok_or_else(|| anyhow::anyhow!("Log {} has no sender topic", log.transaction_hash))?;
    let sender_topic = sender_topic.trim_start_matches("0x");
    if sender_topic.len() != 64 {
        return Err(anyhow::anyhow!("Malformed sender topic in log {}", log.transaction_hash));
    }

    let data = decode_hex(&log.data)?;
    let amount = U256::from_big_endian(word(&data, 0)?);
    let external_address = decode_string(&data, word_as_usize(word(&data, 1)?)?)?;

    Ok(BridgeTransferLog {
        sender: format!("0x{}", &sender_topic[24..]),
        amount,
        external_address,
        block_number: parse_quantity(&log.block_number)?,
        transaction_hash: log.transaction_hash.clone(),
    })
}

fn parse_quantity(value: &str) -> Result<u64> {
    u64::from_str_radix(value.strip_prefix("0x").unwrap_or(value), 16)
        .with_context(|| format!("Failed to parse quantity '{}'", value))
}

// ============================================================================
// EVM CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with EVM-compatible blockchain nodes via JSON-RPC
pub struct EvmClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the EVM node (e.g., "http://127.0.0.1:8545")
    base_url: String,
    /// Bridged token contract address
    contract_address: String,
    /// Topic of the bridge transfer event
    bridge_event_topic: String,
    /// Withdrawal signing key
    crypto: Arc<CryptoService>,
}

impl EvmClient {
    /// Creates a new EVM client from the configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create client
    pub fn new(config: &Config, crypto: Arc<CryptoService>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: config.ethereum.rpc_url.clone(),
            contract_address: config.ethereum.contract_address.clone(),
            bridge_event_topic: event_topic(&config.ethereum.bridge_event),
            crypto,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<Option<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: 1,
        };

        let response: JsonRpcResponse<T> = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, self.base_url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", method, self.base_url))?;

        if let Some(error) = response.error {
            return Err(anyhow::anyhow!(
                "JSON-RPC error from {}: {} (code: {})",
                self.base_url,
                error.message,
                error.code
            ));
        }

        Ok(response.result)
    }

    /// Queries the bridge contract for `BridgeTransfer` logs in `[from_block, to_block]`.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<EvmLog>)` - Raw logs, undecoded
    /// * `Err(anyhow::Error)` - Failed to query logs
    pub async fn get_bridge_transfer_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<EvmLog>> {
        let filter = serde_json::json!({
            "address": self.contract_address,
            "topics": [self.bridge_event_topic],
            "fromBlock": format!("0x{:x}", from_block),
            "toBlock": format!("0x{:x}", to_block),
        });

        Ok(self
            .call::<Vec<EvmLog>>("eth_getLogs", vec![filter])
            .await?
            .unwrap_or_default())
    }

    /// Gets the current block number
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Current block number
    /// * `Err(anyhow::Error)` - Failed to query block number
    pub async fn get_block_number(&self) -> Result<u64> {
        let block_number_hex: String = self
            .call("eth_blockNumber", vec![])
            .await?
            .ok_or_else(|| anyhow::anyhow!("No result in eth_blockNumber response"))?;
        parse_quantity(&block_number_hex).context("Failed to parse block number")
    }

    /// Polls bridge logs from `start_block` into `sender` until shutdown.
    ///
    /// Only blocks buried under `finality_depth` confirmations are scanned.
    /// RPC failures are logged and retried on the next poll.
    pub async fn stream_bridge_logs(
        &self,
        start_block: u64,
        finality_depth: u64,
        polling_interval: Duration,
        sender: mpsc::Sender<LogBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut next_block = start_block;
        info!(start_block, finality_depth, "Streaming Ethereum bridge logs");

        while !*shutdown.borrow() {
            match self.poll_logs(next_block, finality_depth).await {
                Ok(Some(batch)) => {
                    let to_block = batch.to_block;
                    if sender.send(batch).await.is_err() {
                        debug!("Log receiver closed, stopping Ethereum stream");
                        return Ok(());
                    }
                    next_block = to_block + 1;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(next_block, "Ethereum log polling failed: {:#}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(polling_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(next_block, "Ethereum log stream stopped");
        Ok(())
    }

    /// Scans the next confirmed range; `Ok(None)` when there is nothing new.
    async fn poll_logs(&self, from_block: u64, finality_depth: u64) -> Result<Option<LogBatch>> {
        let confirmed = self.get_block_number().await?.saturating_sub(finality_depth);
        if confirmed < from_block {
            return Ok(None);
        }

        let to_block = confirmed.min(from_block + MAX_LOG_RANGE - 1);
        let logs = self.get_bridge_transfer_logs(from_block, to_block).await?;
        Ok(Some(LogBatch { logs, to_block }))
    }

    /// Returns the base URL of this client
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl EthereumChain for EvmClient {
    async fn get_transaction(&self, hash: &str) -> Result<Option<EvmTransaction>> {
        // Normalize hash (ensure 0x prefix)
        let hash = if hash.starts_with("0x") {
            hash.to_string()
        } else {
            format!("0x{}", hash)
        };

        self.call("eth_getTransactionByHash", vec![serde_json::json!(hash)])
            .await
    }

    fn decode_call_data(&self, input: &str) -> Result<BridgeCallData> {
        decode_bridge_call_data(input)
    }

    fn sign_withdrawal(&self, to: &str, amount: U256, reference: &str) -> Result<String> {
        self.crypto.sign_withdrawal(to, amount, reference)
    }
}
