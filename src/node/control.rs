//! Control message handling.
//!
//! Messages for one reference transaction arrive in block order. Proposals are validated
//! and answered with this node's signature; signatures go to the aggregator;
//! governance messages update the validator list.

use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregator::{AggregationOutcome, SignatureAggregator};
use crate::chain::ControlTransport;
use crate::error::BridgeError;
use crate::protocol::{ControlMessage, InboundMessage, ProposedTransaction, SignatureMessage};
use crate::store::{self, BridgeStore};
use crate::validator::ConversionValidator;

/// What handling a control message produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Proposal validated; signature published in the given transaction
    Signed { signature_transaction: String },
    Aggregated(AggregationOutcome),
    ValidatorUpdated { username: String, active: bool },
    /// Logged only
    Observed,
}

pub struct ControlHandler {
    validator: Arc<ConversionValidator>,
    aggregator: Arc<SignatureAggregator>,
    transport: Arc<dyn ControlTransport>,
    store: Arc<dyn BridgeStore>,
}

impl ControlHandler {
    pub fn new(
        validator: Arc<ConversionValidator>,
        aggregator: Arc<SignatureAggregator>,
        transport: Arc<dyn ControlTransport>,
        store: Arc<dyn BridgeStore>,
    ) -> Self {
        Self {
            validator,
            aggregator,
            transport,
            store,
        }
    }

    pub async fn handle(&self, inbound: &InboundMessage) -> Result<ControlOutcome, BridgeError> {
        match &inbound.message {
            ControlMessage::ProposedTransaction(proposal) => {
                self.on_proposal(proposal, &inbound.transaction_id).await
            }
            ControlMessage::Signature(signature) => self
                .aggregator
                .on_signature(signature, &inbound.sender)
                .await
                .map(ControlOutcome::Aggregated),
            ControlMessage::WhitelistValidator(nomination) => {
                self.store.upsert_validator(&nomination.username, true).await?;
                info!(validator = %nomination.username, "Validator whitelisted");
                Ok(ControlOutcome::ValidatorUpdated {
                    username: nomination.username.clone(),
                    active: true,
                })
            }
            ControlMessage::ProposeNewValidator(nomination) => {
                if self.store.find_validator(&nomination.username).await?.is_some() {
                    debug!(validator = %nomination.username, "Proposed validator already known");
                    return Ok(ControlOutcome::Observed);
                }
                self.store.upsert_validator(&nomination.username, false).await?;
                info!(
                    validator = %nomination.username,
                    proposer = %inbound.sender,
                    "New validator proposed"
                );
                Ok(ControlOutcome::ValidatorUpdated {
                    username: nomination.username.clone(),
                    active: false,
                })
            }
            ControlMessage::ProposeValidatorRemoval(nomination) => {
                info!(
                    validator = %nomination.username,
                    proposer = %inbound.sender,
                    "Validator removal proposed"
                );
                Ok(ControlOutcome::Observed)
            }
            ControlMessage::NetworkState(state) => {
                debug!(sender = %inbound.sender, "Network state: {}", state);
                Ok(ControlOutcome::Observed)
            }
        }
    }

    async fn on_proposal(
        &self,
        proposal: &ProposedTransaction,
        proposal_transaction: &str,
    ) -> Result<ControlOutcome, BridgeError> {
        info!(
            reference_transaction = %proposal.reference_transaction,
            chain = %proposal.chain,
            "New proposal received"
        );

        let head_validator = store::current_head_validator(self.store.as_ref())
            .await?
            .ok_or_else(|| BridgeError::StateConflict("no head validator recorded yet".to_string()))?;
        let signature = self.validator.validate(proposal, &head_validator).await?;

        let signature_transaction = self
            .transport
            .send(&ControlMessage::Signature(SignatureMessage {
                chain: proposal.chain,
                reference_transaction: proposal.reference_transaction.clone(),
                proposal_transaction: proposal_transaction.to_string(),
                signature,
            }))
            .await
            .map_err(BridgeError::TransientChain)?;

        Ok(ControlOutcome::Signed {
            signature_transaction,
        })
    }
}
