//! Conversion Validator
//!
//! A follower countersigns the head validator's proposal only after re-checking
//! it against the source chain. Each direction has its own rule set; the first
//! violated rule rejects the proposal and no signature is produced. Rejections
//! are never retried here, only through redelivery of the proposal.

use ethereum_types::U256;
use std::sync::Arc;
use tracing::{info, warn};

use crate::amount::{Asset, FeeRate, TokenAmount};
use crate::chain::ethereum::method_selector;
use crate::chain::{
    BridgeCallData, EthereumChain, EvmTransaction, HiveChain, HiveOperation, HiveTransaction,
};
use crate::config::Config;
use crate::error::{BridgeError, ValidationError};
use crate::protocol::ProposedTransaction;
use crate::router::TokenTransfer;
use crate::store::{BridgeStore, ConversionRequest, Direction};

// ============================================================================
// MINT SIDE: ETHEREUM BRIDGE TRANSFER PAID OUT ON HIVE
// ============================================================================

/// Rules for countersigning a Hive payout of an Ethereum bridge transfer.
#[derive(Debug, Clone)]
pub struct MintRules {
    pub contract_address: String,
    /// Expected 4-byte selector, 0x-prefixed hex
    pub method_selector: String,
    pub token_transfer_id: String,
    pub token_symbol: String,
    pub fee_rate: FeeRate,
    pub token_precision: u32,
}

impl MintRules {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            contract_address: config.ethereum.contract_address.clone(),
            method_selector: method_selector(&config.ethereum.contract_method),
            token_transfer_id: config.hive.token_transfer_id(),
            token_symbol: config.bridge.token_symbol.clone(),
            fee_rate: config.bridge.fee_rate()?,
            token_precision: config.ethereum.token_precision,
        })
    }

    fn token_transfer_at(
        &self,
        operations: &[HiveOperation],
        index: usize,
    ) -> Result<Option<String>, ValidationError> {
        let Some(operation) = operations.get(index) else {
            return Err(ValidationError::OperationCount(operations.len()));
        };
        Ok(operation
            .as_custom_json()
            .filter(|custom_json| custom_json.id == self.token_transfer_id)
            .map(|custom_json| custom_json.json))
    }

    fn parse_payload(json: &str, index: usize) -> Result<TokenTransfer, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::MalformedPayload {
            index,
            reason: e.to_string(),
        })
    }

    /// Applies the mint-side rules in order.
    ///
    /// `call_data` is `None` when the referenced transaction's input could not
    /// be decoded as a bridge call.
    pub fn check(
        &self,
        reference: &EvmTransaction,
        call_data: Option<&BridgeCallData>,
        proposal: &HiveTransaction,
        head_validator: &str,
    ) -> Result<(), ValidationError> {
        // 1. sent to the bridge contract
        let to = reference.to.clone().unwrap_or_default();
        if !to.eq_ignore_ascii_case(&self.contract_address) {
            return Err(ValidationError::WrongContract {
                expected: self.contract_address.clone(),
                actual: to,
            });
        }

        // 2. calls the bridge method
        let call_data = match call_data {
            Some(call_data) if call_data.selector.eq_ignore_ascii_case(&self.method_selector) => {
                call_data
            }
            other => {
                return Err(ValidationError::WrongMethod {
                    expected: self.method_selector.clone(),
                    actual: other
                        .map(|c| c.selector.clone())
                        .unwrap_or_else(|| reference.input.chars().take(10).collect()),
                })
            }
        };

        // 3. first operation is a token transfer
        let operations = &proposal.operations;
        let payout_json = self
            .token_transfer_at(operations, 0)?
            .ok_or(ValidationError::NotTokenTransfer { index: 0 })?;

        // 4. both payloads parse
        let payout = Self::parse_payload(&payout_json, 0)?;
        let fee_operation = operations
            .get(1)
            .ok_or(ValidationError::OperationCount(operations.len()))?;
        let fee_json = fee_operation
            .as_custom_json()
            .map(|custom_json| custom_json.json)
            .ok_or_else(|| ValidationError::MalformedPayload {
                index: 1,
                reason: format!("'{}' operation carries no JSON payload", fee_operation.name()),
            })?;
        let fee_payout = Self::parse_payload(&fee_json, 1)?;

        // 5. net amount matches the burned amount minus the fee
        let amount = TokenAmount::from_base_units(call_data.amount, self.token_precision)
            .map_err(|e| ValidationError::InvalidAmount(e.to_string()))?;
        let (net, fee) = self.fee_rate.split(amount);
        if payout.qty != net {
            return Err(ValidationError::AmountMismatch {
                expected: net,
                proposed: payout.qty,
            });
        }

        // 6. bridged token
        if payout.token != self.token_symbol {
            return Err(ValidationError::TokenMismatch {
                expected: self.token_symbol.clone(),
                proposed: payout.token,
            });
        }

        // 7. recipient from the call data
        if call_data.recipient != payout.to {
            return Err(ValidationError::RecipientMismatch {
                expected: call_data.recipient.clone(),
                proposed: payout.to,
            });
        }

        // 8. payout and fee only
        if operations.len() != 2 {
            return Err(ValidationError::OperationCount(operations.len()));
        }

        // 9. fee is a token transfer too
        if self.token_transfer_at(operations, 1)?.is_none() {
            return Err(ValidationError::NotTokenTransfer { index: 1 });
        }

        // 10. fee amount
        if fee_payout.qty != fee {
            return Err(ValidationError::FeeMismatch {
                expected: fee,
                proposed: fee_payout.qty,
            });
        }

        // 11. fee goes to the head validator
        if fee_payout.to != head_validator {
            return Err(ValidationError::FeeRecipientMismatch {
                expected: head_validator.to_string(),
                proposed: fee_payout.to,
            });
        }

        Ok(())
    }
}

// ============================================================================
// BURN SIDE: HIVE DEPOSIT REDEEMED ON ETHEREUM
// ============================================================================

/// Rules for signing an Ethereum withdrawal of a Hive deposit.
#[derive(Debug, Clone)]
pub struct BurnRules {
    pub deposit_account: String,
    pub token_precision: u32,
}

impl BurnRules {
    pub fn from_config(config: &Config) -> Self {
        Self {
            deposit_account: config.hive.deposit_account.clone(),
            token_precision: config.ethereum.token_precision,
        }
    }

    /// Applies the burn-side rules; returns the withdrawal recipient and amount
    /// in token base units.
    pub fn check(
        &self,
        reference: &HiveTransaction,
        is_address: impl Fn(&str) -> bool,
    ) -> Result<(String, U256), ValidationError> {
        let transfer = reference
            .operations
            .first()
            .and_then(HiveOperation::as_transfer)
            .ok_or(ValidationError::NotTransfer)?;

        if transfer.to != self.deposit_account {
            return Err(ValidationError::NotDepositAccount(transfer.to));
        }

        let recipient = transfer.memo.trim().to_string();
        if !is_address(&recipient) {
            return Err(ValidationError::InvalidMemoAddress(transfer.memo));
        }

        let amount = Asset::parse(&transfer.amount)
            .and_then(|asset| asset.amount.to_base_units(self.token_precision))
            .map_err(|e| ValidationError::InvalidAmount(e.to_string()))?;
        Ok((recipient, amount))
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

pub struct ConversionValidator {
    hive: Arc<dyn HiveChain>,
    ethereum: Arc<dyn EthereumChain>,
    store: Arc<dyn BridgeStore>,
    mint: MintRules,
    burn: BurnRules,
}

impl ConversionValidator {
    pub fn new(
        config: &Config,
        hive: Arc<dyn HiveChain>,
        ethereum: Arc<dyn EthereumChain>,
        store: Arc<dyn BridgeStore>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            hive,
            ethereum,
            store,
            mint: MintRules::from_config(config)?,
            burn: BurnRules::from_config(config),
        })
    }

    /// Validates a proposal and returns this node's signature over it.
    pub async fn validate(
        &self,
        proposal: &ProposedTransaction,
        head_validator: &str,
    ) -> Result<String, BridgeError> {
        let reference = &proposal.reference_transaction;
        let result = match proposal.chain {
            Direction::ToHive => {
                self.validate_mint(reference, proposal.transaction.as_ref(), head_validator)
                    .await
            }
            Direction::ToEthereum => self.validate_burn(reference).await,
        };

        match &result {
            Ok(_) => info!(
                reference_transaction = %reference,
                chain = %proposal.chain,
                "Proposal validated and signed"
            ),
            Err(e) => warn!(
                reference_transaction = %reference,
                chain = %proposal.chain,
                "Proposal rejected: {}",
                e
            ),
        }
        result
    }

    /// Mint side: checks the proposed Hive payout against the Ethereum bridge
    /// transfer, stores it, and signs it.
    pub async fn validate_mint(
        &self,
        reference: &str,
        proposal: Option<&HiveTransaction>,
        head_validator: &str,
    ) -> Result<String, BridgeError> {
        let proposal = proposal.ok_or(ValidationError::MissingProposal)?.unsigned();

        let transaction = self
            .ethereum
            .get_transaction(reference)
            .await
            .map_err(BridgeError::TransientChain)?
            .ok_or_else(|| ValidationError::ReferenceNotFound(reference.to_string()))?;
        let call_data = self.ethereum.decode_call_data(&transaction.input).ok();

        self.mint
            .check(&transaction, call_data.as_ref(), &proposal, head_validator)?;

        let seed = ConversionRequest::new(Direction::ToHive, reference, head_validator);
        self.store
            .update_proposed_transaction(seed, proposal.clone())
            .await?;

        self.hive
            .sign_transaction(&proposal)
            .map_err(BridgeError::TransientChain)
    }

    /// Burn side: checks the Hive deposit and signs the Ethereum withdrawal.
    pub async fn validate_burn(&self, reference: &str) -> Result<String, BridgeError> {
        let transaction = self
            .hive
            .get_transaction(reference)
            .await
            .map_err(BridgeError::TransientChain)?
            .ok_or_else(|| ValidationError::ReferenceNotFound(reference.to_string()))?;

        let (to, amount) = self
            .burn
            .check(&transaction, |value| self.ethereum.is_address(value))?;

        self.ethereum
            .sign_withdrawal(&to, amount, reference)
            .map_err(BridgeError::TransientChain)
    }
}
