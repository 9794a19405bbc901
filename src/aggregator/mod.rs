//! Signature Aggregator / Broadcaster
//!
//! Collects validator signatures per reference transaction. Signatures are
//! verified against the claimed signer's keys and the deposit account's
//! authority, then appended through the store's atomic append-and-check.
//! When quorum is reached on the head validator, exactly one caller wins the
//! broadcast claim and publishes the payout.
//!
//! A request can hold a quorum with nobody broadcasting it: the node restarted
//! or a broadcast failed and released its claim. [`SignatureAggregator::resume_broadcasts`]
//! picks those up through the same claim.
//!
//! Withdrawals to Ethereum are redeemed by users, so their signatures are only
//! recorded.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::authority;
use crate::chain::HiveChain;
use crate::crypto;
use crate::error::BridgeError;
use crate::protocol::SignatureMessage;
use crate::store::{self, AppendPolicy, BridgeStore, CollectedSignature, ConversionRequest, Direction};

/// Result of handling one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationOutcome {
    /// Signature stored (or ignored as duplicate); no broadcast by this call
    Recorded {
        appended: bool,
        signature_count: usize,
        required_signatures: usize,
    },
    /// Quorum reached and the payout was broadcast by this call
    Broadcast {
        transaction_id: String,
        signature_count: usize,
    },
}

pub struct SignatureAggregator {
    hive: Arc<dyn HiveChain>,
    store: Arc<dyn BridgeStore>,
    deposit_account: String,
    validator: String,
}

impl SignatureAggregator {
    pub fn new(
        hive: Arc<dyn HiveChain>,
        store: Arc<dyn BridgeStore>,
        deposit_account: &str,
        validator: &str,
    ) -> Self {
        Self {
            hive,
            store,
            deposit_account: deposit_account.to_string(),
            validator: validator.to_string(),
        }
    }

    /// Handles a signature message sent by `claimed_signer`.
    pub async fn on_signature(
        &self,
        message: &SignatureMessage,
        claimed_signer: &str,
    ) -> Result<AggregationOutcome, BridgeError> {
        let reference = &message.reference_transaction;

        if message.chain == Direction::ToHive {
            self.verify_hive_signer(reference, &message.signature, claimed_signer)
                .await?;
        }

        let authority =
            authority::fetch_authority_info(self.hive.as_ref(), &self.deposit_account).await?;
        if !authority.contains(claimed_signer) {
            return Err(BridgeError::Authorization(format!(
                "{} is not an authority of {}",
                claimed_signer, self.deposit_account
            )));
        }

        let head_validator = store::current_head_validator(self.store.as_ref())
            .await?
            .unwrap_or_default();
        let policy = AppendPolicy {
            max_signatures: authority.max_signatures(),
            required_signatures: authority.required_signatures,
            claim_broadcast: message.chain == Direction::ToHive && head_validator == self.validator,
        };

        let outcome = self
            .store
            .append_signature(
                ConversionRequest::new(message.chain, reference, &head_validator),
                CollectedSignature {
                    signer: claimed_signer.to_string(),
                    signature: message.signature.clone(),
                },
                policy,
            )
            .await?;

        info!(
            reference_transaction = %reference,
            signer = claimed_signer,
            chain = %message.chain,
            appended = outcome.appended,
            "Signature {}/{} collected",
            outcome.signature_count,
            authority.required_signatures
        );

        if !outcome.broadcast_claimed {
            return Ok(AggregationOutcome::Recorded {
                appended: outcome.appended,
                signature_count: outcome.signature_count,
                required_signatures: authority.required_signatures,
            });
        }

        self.broadcast(&outcome.request, authority.required_signatures)
            .await
    }

    /// Broadcasts every pending payout that already holds a quorum.
    ///
    /// Does nothing unless this node is the head validator. Failed broadcasts
    /// are logged and left for the next pass.
    pub async fn resume_broadcasts(&self) -> Result<Vec<AggregationOutcome>, BridgeError> {
        let head_validator = store::current_head_validator(self.store.as_ref()).await?;
        if head_validator.as_deref() != Some(self.validator.as_str()) {
            return Ok(Vec::new());
        }

        let candidates: Vec<ConversionRequest> = self
            .store
            .list_pending()
            .await?
            .into_iter()
            .filter(|request| request.direction == Direction::ToHive && request.ready_for_broadcast(1))
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let authority =
            authority::fetch_authority_info(self.hive.as_ref(), &self.deposit_account).await?;
        let mut outcomes = Vec::new();
        for candidate in candidates {
            let reference = &candidate.reference_transaction;
            let Some(request) = self
                .store
                .claim_broadcast(reference, authority.required_signatures)
                .await?
            else {
                continue;
            };
            info!(
                reference_transaction = %reference,
                signature_count = request.signatures.len(),
                "Resuming payout broadcast"
            );
            match self.broadcast(&request, authority.required_signatures).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(reference_transaction = %reference, "Payout still pending: {}", e),
            }
        }
        Ok(outcomes)
    }

    /// Recovers the key behind a signature over the stored proposal and
    /// requires it among the claimed signer's active keys.
    async fn verify_hive_signer(
        &self,
        reference: &str,
        signature: &str,
        claimed_signer: &str,
    ) -> Result<(), BridgeError> {
        let proposal = self
            .store
            .find_by_reference_id(reference)
            .await?
            .and_then(|request| request.proposed_transaction)
            .ok_or_else(|| {
                BridgeError::StateConflict(format!("no proposal stored for {}", reference))
            })?;

        let recovered = self
            .hive
            .recover_signer_key(&proposal.unsigned(), signature)
            .map_err(|e| BridgeError::Authorization(format!("unrecoverable signature: {:#}", e)))?;

        let account = authority::fetch_account(self.hive.as_ref(), claimed_signer).await?;
        let signed_by_claimed = account.active.key_auths.iter().any(|(key, _)| {
            crypto::decode_hive_public_key(key).map_or(false, |decoded| decoded == recovered)
        });
        if !signed_by_claimed {
            return Err(BridgeError::Authorization(format!(
                "signature for {} was not produced by {}",
                reference, claimed_signer
            )));
        }
        Ok(())
    }

    /// Broadcasts the claimed payout, then marks it processed or releases the claim.
    async fn broadcast(
        &self,
        request: &ConversionRequest,
        required_signatures: usize,
    ) -> Result<AggregationOutcome, BridgeError> {
        let reference = &request.reference_transaction;
        let Some(proposal) = &request.proposed_transaction else {
            self.store.release_broadcast_claim(reference).await?;
            return Err(BridgeError::StateConflict(format!(
                "broadcast claimed for {} without a proposal",
                reference
            )));
        };

        // Hive rejects transactions carrying more signatures than needed
        let mut transaction = proposal.unsigned();
        transaction.signatures = request
            .signatures
            .iter()
            .take(required_signatures.max(1))
            .map(|s| s.signature.clone())
            .collect();
        let signature_count = transaction.signatures.len();

        match self.hive.broadcast_transaction(&transaction).await {
            Ok(transaction_id) => {
                self.store.mark_processed(reference).await?;
                info!(
                    reference_transaction = %reference,
                    transaction_id = %transaction_id,
                    signature_count,
                    "Payout broadcast"
                );
                Ok(AggregationOutcome::Broadcast {
                    transaction_id,
                    signature_count,
                })
            }
            Err(e) => {
                error!(reference_transaction = %reference, "Payout broadcast failed: {:#}", e);
                self.store.release_broadcast_claim(reference).await?;
                debug!(reference_transaction = %reference, "Broadcast claim released");
                Err(BridgeError::TransientChain(e))
            }
        }
    }
}
