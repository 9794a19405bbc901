//! Storage Module
//!
//! This module defines the persisted entities of the bridge validator and the
//! collection-style API the core uses to read and mutate them. The store is the
//! single source of truth: every decision reads fresh state from it, and
//! [`BridgeStore::append_signature`] is atomic per reference transaction.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::chain::HiveTransaction;
use crate::error::BridgeError;

pub mod memory;

pub use memory::MemoryStore;

/// Status record holding the current head validator.
pub const HEAD_VALIDATOR: &str = "headValidator";
/// Status record holding the next Hive block to process.
pub const HIVE_CURSOR: &str = "hive_cursor";
/// Status record holding the next Ethereum block to scan.
pub const ETHEREUM_CURSOR: &str = "ethereum_cursor";

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Destination chain of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Hive deposit redeemed on Ethereum with validator-signed withdrawals (burn side)
    #[serde(rename = "ethereum")]
    ToEthereum,
    /// Ethereum bridge transfer paid out as Hive token transfers (mint side)
    #[serde(rename = "hive")]
    ToHive,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::ToEthereum => "ethereum",
            Direction::ToHive => "hive",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validator signature collected for a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectedSignature {
    /// Validator account that produced the signature
    pub signer: String,
    /// Signature in hex format
    pub signature: String,
}

/// The unit of cross-chain work, keyed by the source chain transaction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    #[serde(rename = "chain")]
    pub direction: Direction,
    pub reference_transaction: String,
    /// Payout transaction proposed by the head validator (mint side only)
    #[serde(default)]
    pub proposed_transaction: Option<HiveTransaction>,
    #[serde(rename = "headValidator")]
    pub head_validator_at_creation: String,
    /// Append-only, at most one entry per signer
    #[serde(default)]
    pub signatures: Vec<CollectedSignature>,
    /// Set once the payout has been broadcast; never reset
    #[serde(default)]
    pub is_processed: bool,
    /// Set once the head validator's proposal reached the transport
    #[serde(default)]
    pub proposal_published: bool,
    /// Held by the task currently broadcasting the payout; process-local
    #[serde(skip)]
    pub broadcast_claimed: bool,
    /// Creation time (epoch millis)
    pub created_at: i64,
}

impl ConversionRequest {
    /// A fresh, unprocessed request with no signatures.
    pub fn new(direction: Direction, reference_transaction: &str, head_validator: &str) -> Self {
        Self {
            direction,
            reference_transaction: reference_transaction.to_string(),
            proposed_transaction: None,
            head_validator_at_creation: head_validator.to_string(),
            signatures: Vec::new(),
            is_processed: false,
            proposal_published: false,
            broadcast_claimed: false,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_proposal(mut self, transaction: HiveTransaction) -> Self {
        self.proposed_transaction = Some(transaction);
        self
    }

    pub fn has_signer(&self, signer: &str) -> bool {
        self.signatures.iter().any(|s| s.signer == signer)
    }

    /// Whether a broadcast of the payout may be claimed with `required_signatures`.
    pub fn ready_for_broadcast(&self, required_signatures: usize) -> bool {
        !self.is_processed
            && !self.broadcast_claimed
            && self.proposed_transaction.is_some()
            && self.signatures.len() >= required_signatures.max(1)
    }
}

/// Named singleton status value (head validator, stream cursors).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub name: String,
    pub data: String,
    /// Incremented on every write
    pub version: u64,
    /// Last write (epoch millis)
    pub updated_at: i64,
}

/// Validator membership as known to this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub username: String,
    pub active: bool,
    pub updated_at: i64,
}

/// Limits applied by [`BridgeStore::append_signature`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendPolicy {
    /// Size of the authority set; the signature list never grows past it
    pub max_signatures: usize,
    /// Quorum needed before a broadcast may be claimed
    pub required_signatures: usize,
    /// Whether the caller is the head validator and may claim the broadcast
    pub claim_broadcast: bool,
}

/// Result of an atomic append-and-check.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    /// False for duplicates, full lists and processed requests
    pub appended: bool,
    pub signature_count: usize,
    /// True for exactly one caller per claim; that caller must broadcast and
    /// then call `mark_processed` or `release_broadcast_claim`
    pub broadcast_claimed: bool,
    /// State after the update
    pub request: ConversionRequest,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Collection-style persistence API.
///
/// Implementations must make every method linearizable per key; in particular
/// `append_signature` must append, count and claim in one atomic step.
#[async_trait]
pub trait BridgeStore: Send + Sync {
    async fn find_by_reference_id(
        &self,
        reference_transaction: &str,
    ) -> Result<Option<ConversionRequest>, BridgeError>;

    /// Inserts `request` unless one exists for its reference transaction.
    /// Returns whether the insert happened.
    async fn insert_if_absent(&self, request: ConversionRequest) -> Result<bool, BridgeError>;

    /// Stores a validated proposal, creating the request from `seed` if absent.
    /// Processed requests are left untouched.
    async fn update_proposed_transaction(
        &self,
        seed: ConversionRequest,
        transaction: HiveTransaction,
    ) -> Result<ConversionRequest, BridgeError>;

    /// Atomically appends a signature and claims the broadcast when quorum is met.
    ///
    /// The request is created from `seed` if absent. Duplicate signers and
    /// duplicate signature strings are ignored.
    async fn append_signature(
        &self,
        seed: ConversionRequest,
        signature: CollectedSignature,
        policy: AppendPolicy,
    ) -> Result<AppendOutcome, BridgeError>;

    /// Claims the broadcast of a request that already holds a quorum.
    ///
    /// Returns the claimed request, or `None` when it is unknown, processed,
    /// already claimed, or short of `required_signatures`.
    async fn claim_broadcast(
        &self,
        reference_transaction: &str,
        required_signatures: usize,
    ) -> Result<Option<ConversionRequest>, BridgeError>;

    /// Gives up a broadcast claim after a failed broadcast.
    async fn release_broadcast_claim(&self, reference_transaction: &str) -> Result<(), BridgeError>;

    /// Records that the proposal for the request was published.
    async fn mark_proposal_published(&self, reference_transaction: &str) -> Result<(), BridgeError>;

    /// Marks the request processed. Monotonic.
    async fn mark_processed(&self, reference_transaction: &str) -> Result<(), BridgeError>;

    /// Unprocessed requests, oldest first.
    async fn list_pending(&self) -> Result<Vec<ConversionRequest>, BridgeError>;

    async fn find_status_by_name(&self, name: &str) -> Result<Option<StatusRecord>, BridgeError>;

    /// Writes a status value, bumping its version.
    async fn upsert_status_by_name(&self, name: &str, data: &str) -> Result<StatusRecord, BridgeError>;

    async fn find_validator(&self, username: &str) -> Result<Option<ValidatorRecord>, BridgeError>;

    async fn list_validators(&self) -> Result<Vec<ValidatorRecord>, BridgeError>;

    async fn upsert_validator(&self, username: &str, active: bool) -> Result<ValidatorRecord, BridgeError>;
}

/// Reads the current head validator, if rotation has run.
pub async fn current_head_validator(store: &dyn BridgeStore) -> Result<Option<String>, BridgeError> {
    Ok(store
        .find_status_by_name(HEAD_VALIDATOR)
        .await?
        .map(|record| record.data))
}
