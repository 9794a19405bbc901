//! Hive Client Module
//!
//! This module provides a client for communicating with Hive nodes via the
//! `condenser_api` JSON-RPC interface. It streams blocks, looks up transactions
//! and accounts, prepares and signs transactions, and publishes validator
//! control messages as `custom_json` operations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::chain::{hive_serializer, ControlTransport, HiveChain};
use crate::config::Config;
use crate::crypto::{self, CryptoService};
use crate::protocol::{self, ControlMessage};

/// Seconds until a prepared transaction expires (just under the one hour maximum).
pub const TRANSACTION_EXPIRATION_SECS: i64 = 3590;

// ============================================================================
// API RESPONSE STRUCTURES
// ============================================================================

/// Hive JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    method: String,
    params: serde_json::Value,
    id: u64,
}

/// Hive JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    message: String,
}

/// Subset of `get_dynamic_global_properties` used by the validator
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicGlobalProperties {
    pub head_block_number: u64,
    pub head_block_id: String,
    pub last_irreversible_block_num: u64,
}

/// An operation as it appears on the wire: `[name, payload]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiveOperation(pub String, pub serde_json::Value);

impl HiveOperation {
    pub fn name(&self) -> &str {
        &self.0
    }

    /// Decodes the payload when this is a `transfer` operation.
    pub fn as_transfer(&self) -> Option<TransferOperation> {
        if self.0 != "transfer" {
            return None;
        }
        serde_json::from_value(self.1.clone()).ok()
    }

    /// Decodes the payload when this is a `custom_json` operation.
    pub fn as_custom_json(&self) -> Option<CustomJsonOperation> {
        if self.0 != "custom_json" {
            return None;
        }
        serde_json::from_value(self.1.clone()).ok()
    }

    pub fn custom_json(operation: &CustomJsonOperation) -> Result<Self> {
        let payload =
            serde_json::to_value(operation).context("Failed to encode custom_json operation")?;
        Ok(Self("custom_json".to_string(), payload))
    }
}

/// Payload of a `transfer` operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOperation {
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
    /// Asset string, e.g. "50.000 HIVE"
    #[serde(default)]
    pub amount: String,
    #[serde(default)]
    pub memo: String,
}

/// Payload of a `custom_json` operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomJsonOperation {
    #[serde(default)]
    pub required_auths: Vec<String>,
    #[serde(default)]
    pub required_posting_auths: Vec<String>,
    pub id: String,
    pub json: String,
}

/// Hive transaction, signed or unsigned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiveTransaction {
    pub ref_block_num: u16,
    pub ref_block_prefix: u32,
    /// UTC timestamp without zone, e.g. "2024-03-01T12:00:00"
    pub expiration: String,
    pub operations: Vec<HiveOperation>,
    #[serde(default)]
    pub extensions: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signatures: Vec<String>,
    /// Present on transactions returned by the node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_num: Option<u64>,
}

impl HiveTransaction {
    /// Copy without signatures or node-assigned metadata.
    pub fn unsigned(&self) -> Self {
        Self {
            signatures: Vec::new(),
            transaction_id: None,
            block_num: None,
            ..self.clone()
        }
    }
}

/// Block as returned by `condenser_api.get_block`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiveBlock {
    /// Height; filled in by the client since the RPC omits it
    #[serde(default)]
    pub block_num: u64,
    #[serde(default)]
    pub block_id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<HiveTransaction>,
    #[serde(default)]
    pub transaction_ids: Vec<String>,
}

impl HiveBlock {
    /// Id of the transaction at `index`.
    pub fn transaction_id(&self, index: usize) -> Option<&str> {
        self.transaction_ids.get(index).map(String::as_str).or_else(|| {
            self.transactions
                .get(index)
                .and_then(|tx| tx.transaction_id.as_deref())
        })
    }
}

/// Weighted authority: `[[name_or_key, weight], ...]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HiveAuthority {
    pub weight_threshold: u32,
    #[serde(default)]
    pub account_auths: Vec<(String, u32)>,
    #[serde(default)]
    pub key_auths: Vec<(String, u32)>,
}

/// Subset of `get_accounts` used by the validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiveAccount {
    pub name: String,
    pub active: HiveAuthority,
}

// ============================================================================
// HIVE CLIENT IMPLEMENTATION
// ============================================================================

/// Client for communicating with Hive nodes via JSON-RPC
pub struct HiveRpcClient {
    /// HTTP client for making requests
    client: Client,
    /// Base URL of the Hive node (e.g., "https://api.hive.blog")
    base_url: String,
    /// Chain id mixed into transaction digests
    chain_id: Vec<u8>,
    /// This node's validator account
    validator: String,
    /// custom_json id of the validator control channel
    custom_json_id: String,
    /// Signing keys
    crypto: Arc<CryptoService>,
}

impl HiveRpcClient {
    /// Creates a new Hive client from the configuration.
    ///
    /// # Returns
    ///
    /// * `Ok(HiveRpcClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create client or malformed chain id
    pub fn new(config: &Config, crypto: Arc<CryptoService>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;
        let chain_id = hex::decode(&config.hive.chain_id).context("Invalid hive.chain_id")?;

        Ok(Self {
            client,
            base_url: config.hive.rpc_url.clone(),
            chain_id,
            validator: config.validator.username.clone(),
            custom_json_id: config.hive.custom_json_id.clone(),
            crypto,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            method: format!("condenser_api.{}", method),
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

    /// Queries the chain head.
    pub async fn get_dynamic_global_properties(&self) -> Result<DynamicGlobalProperties> {
        self.call("get_dynamic_global_properties", serde_json::json!([]))
            .await?
            .ok_or_else(|| anyhow::anyhow!("No result in get_dynamic_global_properties response"))
    }

    /// Fetches a block. `Ok(None)` when the block is not produced yet.
    pub async fn get_block(&self, block_num: u64) -> Result<Option<HiveBlock>> {
        let block: Option<HiveBlock> = self.call("get_block", serde_json::json!([block_num])).await?;
        Ok(block.map(|mut block| {
            block.block_num = block_num;
            block
        }))
    }

    /// Polls blocks from `start_block` into `sender` until shutdown.
    ///
    /// In production only irreversible blocks are delivered. RPC failures are
    /// logged and retried on the next poll.
    pub async fn stream_blocks(
        &self,
        start_block: u64,
        irreversible: bool,
        polling_interval: Duration,
        sender: mpsc::Sender<HiveBlock>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut next_block = start_block;
        info!(start_block, irreversible, "Streaming Hive blocks");

        while !*shutdown.borrow() {
            match self.poll_blocks(&mut next_block, irreversible, &sender).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!("Block receiver closed, stopping Hive stream");
                    return Ok(());
                }
                Err(e) => warn!(next_block, "Hive block polling failed: {:#}", e),
            }

            tokio::select! {
                _ = tokio::time::sleep(polling_interval) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(next_block, "Hive block stream stopped");
        Ok(())
    }

    /// Delivers every available block; returns `Ok(false)` once the receiver is gone.
    async fn poll_blocks(
        &self,
        next_block: &mut u64,
        irreversible: bool,
        sender: &mpsc::Sender<HiveBlock>,
    ) -> Result<bool> {
        let props = self.get_dynamic_global_properties().await?;
        let head = if irreversible {
            props.last_irreversible_block_num
        } else {
            props.head_block_number
        };

        while *next_block <= head {
            let Some(block) = self.get_block(*next_block).await? else {
                break;
            };
            if sender.send(block).await.is_err() {
                return Ok(false);
            }
            *next_block += 1;
        }
        Ok(true)
    }

    /// Returns the base URL of this client
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl HiveChain for HiveRpcClient {
    async fn get_transaction(&self, id: &str) -> Result<Option<HiveTransaction>> {
        match self
            .call::<HiveTransaction>("get_transaction", serde_json::json!([id]))
            .await
        {
            Ok(tx) => Ok(tx),
            Err(e) if format!("{:#}", e).contains("Unknown Transaction") => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_account(&self, name: &str) -> Result<Option<HiveAccount>> {
        let accounts: Option<Vec<HiveAccount>> = self
            .call("get_accounts", serde_json::json!([[name]]))
            .await?;
        Ok(accounts.and_then(|accounts| accounts.into_iter().next()))
    }

    async fn prepare_transaction(&self, operations: Vec<HiveOperation>) -> Result<HiveTransaction> {
        let props = self.get_dynamic_global_properties().await?;
        let head_block_id =
            hex::decode(&props.head_block_id).context("Invalid head_block_id in global properties")?;
        let prefix_bytes: [u8; 4] = head_block_id
            .get(4..8)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| anyhow::anyhow!("head_block_id is too short"))?;

        let expiration = Utc::now() + ChronoDuration::seconds(TRANSACTION_EXPIRATION_SECS);
        Ok(HiveTransaction {
            ref_block_num: (props.head_block_number & 0xFFFF) as u16,
            ref_block_prefix: u32::from_le_bytes(prefix_bytes),
            expiration: expiration.format(hive_serializer::EXPIRATION_FORMAT).to_string(),
            operations,
            extensions: Vec::new(),
            signatures: Vec::new(),
            transaction_id: None,
            block_num: None,
        })
    }

    fn sign_transaction(&self, transaction: &HiveTransaction) -> Result<String> {
        let digest = hive_serializer::transaction_digest(&self.chain_id, transaction)?;
        self.crypto.sign_hive_digest(&digest)
    }

    fn recover_signer_key(&self, transaction: &HiveTransaction, signature: &str) -> Result<Vec<u8>> {
        let digest = hive_serializer::transaction_digest(&self.chain_id, transaction)?;
        crypto::recover_hive_public_key(&digest, signature)
    }

    async fn broadcast_transaction(&self, transaction: &HiveTransaction) -> Result<String> {
        let id = hive_serializer::transaction_id(transaction)?;
        let _: Option<serde_json::Value> = self
            .call("broadcast_transaction", serde_json::json!([transaction]))
            .await?;
        info!(transaction_id = %id, "Broadcast Hive transaction");
        Ok(id)
    }
}

#[async_trait]
impl ControlTransport for HiveRpcClient {
    async fn send(&self, message: &ControlMessage) -> Result<String> {
        let operation = CustomJsonOperation {
            required_auths: vec![self.validator.clone()],
            required_posting_auths: Vec::new(),
            id: self.custom_json_id.clone(),
            json: protocol::encode(message)?,
        };

        let mut transaction = self
            .prepare_transaction(vec![HiveOperation::custom_json(&operation)?])
            .await?;
        let signature = self.sign_transaction(&transaction)?;
        transaction.signatures.push(signature);

        let id = self.broadcast_transaction(&transaction).await?;
        debug!(message = message.name(), transaction_id = %id, "Sent control message");
        Ok(id)
    }
}
