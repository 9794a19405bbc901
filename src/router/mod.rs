//! Event Router
//!
//! Turns raw chain data into canonical conversion events, deduplicates them
//! against the store by source transaction id, and either proposes the payout
//! (head validator) or records the request for later reconciliation (followers).
//!
//! Failures are isolated per item: a malformed transfer or log is logged and
//! skipped without affecting the rest of its block or batch. Items that failed
//! on a chain or storage error are reported as deferred so the caller can
//! redeliver them; a head validator proposal that never reached the transport
//! is published again on redelivery.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::amount::{Asset, FeeRate, TokenAmount};
use crate::chain::ethereum::{self, EvmLog};
use crate::chain::{
    ControlTransport, CustomJsonOperation, HiveBlock, HiveChain, HiveOperation, TransferOperation,
};
use crate::config::Config;
use crate::error::BridgeError;
use crate::protocol::{ControlMessage, ProposedTransaction};
use crate::store::{self, BridgeStore, ConversionRequest, Direction};

// ============================================================================
// CANONICAL EVENTS
// ============================================================================

/// A deposit or burn observed on a source chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionEvent {
    /// Destination chain
    pub direction: Direction,
    /// Source chain transaction id, the dedup key
    pub reference_transaction: String,
    pub sender: String,
    /// Destination chain recipient (Ethereum address or Hive account)
    pub recipient: String,
    pub amount: TokenAmount,
    pub symbol: String,
}

/// JSON payload of a `<prefix>token_transfer` custom_json.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransfer {
    pub to: String,
    pub qty: TokenAmount,
    pub token: String,
    #[serde(default)]
    pub memo: String,
}

/// What the router did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A request already existed for the reference transaction
    Duplicate,
    /// This node is head validator and published a proposal
    Proposed { proposal_transaction: String },
    /// Recorded as follower under the given head validator
    Recorded { head_validator: String },
    /// Failed on a chain or storage error; redeliver the item
    Deferred { reference_transaction: String },
}

/// Parses a Hive transfer; `Ok(None)` unless it targets the deposit account.
pub fn parse_hive_transfer(
    transfer: &TransferOperation,
    transaction_id: &str,
    deposit_account: &str,
) -> Result<Option<ConversionEvent>, BridgeError> {
    if transfer.to != deposit_account {
        return Ok(None);
    }
    if transfer.from.is_empty() || transfer.amount.is_empty() {
        return Err(BridgeError::MalformedMessage(format!(
            "transfer {} is missing from or amount",
            transaction_id
        )));
    }

    let asset = Asset::parse(&transfer.amount)?;
    Ok(Some(ConversionEvent {
        direction: Direction::ToEthereum,
        reference_transaction: transaction_id.to_string(),
        sender: transfer.from.clone(),
        recipient: transfer.memo.trim().to_string(),
        amount: asset.amount,
        symbol: asset.symbol,
    }))
}

/// Parses a bridge transfer log into a payout request on Hive.
pub fn parse_bridge_log(
    log: &EvmLog,
    token_precision: u32,
    token_symbol: &str,
) -> Result<ConversionEvent, BridgeError> {
    let decoded = ethereum::decode_bridge_log(log)
        .map_err(|e| BridgeError::MalformedMessage(format!("{:#}", e)))?;
    Ok(ConversionEvent {
        direction: Direction::ToHive,
        reference_transaction: decoded.transaction_hash,
        sender: decoded.sender,
        recipient: decoded.external_address,
        amount: TokenAmount::from_base_units(decoded.amount, token_precision)?,
        symbol: token_symbol.to_string(),
    })
}

/// Parameters of a payout proposal.
#[derive(Debug, Clone)]
pub struct PayoutTemplate {
    pub deposit_account: String,
    pub token_transfer_id: String,
    pub token_symbol: String,
    pub fee_rate: FeeRate,
}

impl PayoutTemplate {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            deposit_account: config.hive.deposit_account.clone(),
            token_transfer_id: config.hive.token_transfer_id(),
            token_symbol: config.bridge.token_symbol.clone(),
            fee_rate: config.bridge.fee_rate()?,
        })
    }

    /// Two token transfers: the net amount to the recipient and the fee to the
    /// head validator, both authorised by the deposit account.
    pub fn operations(
        &self,
        recipient: &str,
        amount: TokenAmount,
        head_validator: &str,
        reference_transaction: &str,
    ) -> anyhow::Result<Vec<HiveOperation>> {
        let (net, fee) = self.fee_rate.split(amount);
        let payout = TokenTransfer {
            to: recipient.to_string(),
            qty: net,
            token: self.token_symbol.clone(),
            memo: reference_transaction.to_string(),
        };
        let fee_payout = TokenTransfer {
            to: head_validator.to_string(),
            qty: fee,
            token: self.token_symbol.clone(),
            memo: format!("{}% fee for {}", self.fee_rate, reference_transaction),
        };

        [payout, fee_payout]
            .iter()
            .map(|transfer| {
                HiveOperation::custom_json(&CustomJsonOperation {
                    required_auths: vec![self.deposit_account.clone()],
                    required_posting_auths: Vec::new(),
                    id: self.token_transfer_id.clone(),
                    json: serde_json::to_string(transfer)?,
                })
            })
            .collect()
    }
}

/// Logs a failed item; retryable failures become [`RouteOutcome::Deferred`].
fn settle(
    reference_transaction: &str,
    result: Result<RouteOutcome, BridgeError>,
) -> Option<RouteOutcome> {
    match result {
        Ok(outcome) => Some(outcome),
        Err(e) if e.is_retryable() => {
            warn!(reference_transaction, "Conversion deferred until redelivery: {}", e);
            Some(RouteOutcome::Deferred {
                reference_transaction: reference_transaction.to_string(),
            })
        }
        Err(e) => {
            warn!(reference_transaction, "Failed to route conversion: {}", e);
            None
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

pub struct EventRouter {
    hive: Arc<dyn HiveChain>,
    transport: Arc<dyn ControlTransport>,
    store: Arc<dyn BridgeStore>,
    validator: String,
    token_precision: u32,
    payout: PayoutTemplate,
}

impl EventRouter {
    pub fn new(
        config: &Config,
        hive: Arc<dyn HiveChain>,
        transport: Arc<dyn ControlTransport>,
        store: Arc<dyn BridgeStore>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            hive,
            transport,
            store,
            validator: config.validator.username.clone(),
            token_precision: config.ethereum.token_precision,
            payout: PayoutTemplate::from_config(config)?,
        })
    }

    /// Routes one canonical event.
    pub async fn route(&self, event: ConversionEvent) -> Result<RouteOutcome, BridgeError> {
        let reference = event.reference_transaction.clone();
        let republish = match self.store.find_by_reference_id(&reference).await? {
            Some(existing) if self.owns_unpublished_proposal(&existing) => true,
            Some(_) => {
                debug!(reference_transaction = %reference, "Conversion already recorded");
                return Ok(RouteOutcome::Duplicate);
            }
            None => false,
        };
        if event.amount.is_zero() {
            return Err(BridgeError::InvalidAmount(format!(
                "conversion {} carries a zero amount",
                reference
            )));
        }

        let head_validator = store::current_head_validator(self.store.as_ref())
            .await?
            .unwrap_or_default();

        if head_validator != self.validator {
            if republish {
                info!(
                    reference_transaction = %reference,
                    head_validator = %head_validator,
                    "No longer head validator, unpublished proposal left to the new leader"
                );
                return Ok(RouteOutcome::Duplicate);
            }
            let request = ConversionRequest::new(event.direction, &reference, &head_validator);
            if !self.store.insert_if_absent(request).await? {
                return Ok(RouteOutcome::Duplicate);
            }
            info!(
                reference_transaction = %reference,
                chain = %event.direction,
                head_validator = %head_validator,
                "Recorded conversion {} {} from {}",
                event.amount,
                event.symbol,
                event.sender
            );
            return Ok(RouteOutcome::Recorded { head_validator });
        }

        let mut request = ConversionRequest::new(event.direction, &reference, &self.validator);
        let mut proposal = ProposedTransaction {
            chain: event.direction,
            reference_transaction: reference.clone(),
            transaction: None,
        };

        // Prepared again on republish; the earlier one may be close to expiry
        if event.direction == Direction::ToHive {
            let operations = self
                .payout
                .operations(&event.recipient, event.amount, &self.validator, &reference)
                .map_err(|e| BridgeError::MalformedMessage(format!("{:#}", e)))?;
            let transaction = self
                .hive
                .prepare_transaction(operations)
                .await
                .map_err(BridgeError::TransientChain)?;
            request = request.with_proposal(transaction.clone());
            proposal.transaction = Some(transaction);
        }

        if republish {
            if let Some(transaction) = &proposal.transaction {
                self.store
                    .update_proposed_transaction(request, transaction.clone())
                    .await?;
            }
            info!(reference_transaction = %reference, "Publishing proposal again");
        } else if !self.store.insert_if_absent(request).await? {
            return Ok(RouteOutcome::Duplicate);
        }

        let proposal_transaction = self
            .transport
            .send(&ControlMessage::ProposedTransaction(proposal))
            .await
            .map_err(BridgeError::TransientChain)?;
        self.store.mark_proposal_published(&reference).await?;
        info!(
            reference_transaction = %reference,
            chain = %event.direction,
            proposal_transaction = %proposal_transaction,
            "Proposed conversion of {} {} to {}",
            event.amount,
            event.symbol,
            event.recipient
        );
        Ok(RouteOutcome::Proposed {
            proposal_transaction,
        })
    }

    /// A request this node created as head validator whose proposal never
    /// reached the transport, so no peer can have signed it.
    fn owns_unpublished_proposal(&self, request: &ConversionRequest) -> bool {
        request.head_validator_at_creation == self.validator
            && !request.proposal_published
            && !request.is_processed
            && request.signatures.is_empty()
    }

    /// Routes every deposit-account transfer in a block, in block order.
    pub async fn route_hive_block(&self, block: &HiveBlock) -> Vec<RouteOutcome> {
        let mut outcomes = Vec::new();

        for (index, transaction) in block.transactions.iter().enumerate() {
            let Some(transaction_id) = block.transaction_id(index) else {
                warn!(
                    block_num = block.block_num,
                    index, "Skipping transfers of a transaction without id"
                );
                continue;
            };
            for operation in &transaction.operations {
                let Some(transfer) = operation.as_transfer() else {
                    continue;
                };
                let result = match parse_hive_transfer(
                    &transfer,
                    transaction_id,
                    &self.payout.deposit_account,
                ) {
                    Ok(Some(event)) => self.route(event).await,
                    Ok(None) => continue,
                    Err(e) => Err(e),
                };
                outcomes.extend(settle(transaction_id, result));
            }
        }

        outcomes
    }

    /// Routes a batch of bridge transfer logs.
    pub async fn route_bridge_logs(&self, logs: &[EvmLog]) -> Vec<RouteOutcome> {
        let mut outcomes = Vec::new();

        for log in logs {
            let result = match parse_bridge_log(log, self.token_precision, &self.payout.token_symbol) {
                Ok(event) => self.route(event).await,
                Err(e) => Err(e),
            };
            outcomes.extend(settle(&log.transaction_hash, result));
        }

        outcomes
    }
}
