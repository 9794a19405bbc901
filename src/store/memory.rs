//! In-Memory Store
//!
//! All collections live behind a single async mutex, which makes every store
//! operation atomic (including append-and-check). When a snapshot path is
//! configured, the whole state is rewritten to a JSON file after each
//! mutation and reloaded on startup, so collected signatures survive a restart.
//! A mutation whose snapshot write fails is undone in memory as well.
//! Broadcast claims are never written: after a restart every request with a
//! quorum can be claimed again.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chain::HiveTransaction;
use crate::error::BridgeError;
use crate::store::{
    AppendOutcome, AppendPolicy, BridgeStore, CollectedSignature, ConversionRequest, StatusRecord,
    ValidatorRecord,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    conversions: HashMap<String, ConversionRequest>,
    #[serde(default)]
    status: HashMap<String, StatusRecord>,
    #[serde(default)]
    validators: HashMap<String, ValidatorRecord>,
}

/// In-memory [`BridgeStore`] with optional JSON snapshots.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    snapshot_path: Option<PathBuf>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store without persistence.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            snapshot_path: None,
        }
    }

    /// Opens a store backed by `path`, loading the snapshot if it exists.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
            let state: StoreState = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;
            info!(
                conversions = state.conversions.len(),
                "Loaded store snapshot from {}",
                path.display()
            );
            state
        } else {
            StoreState::default()
        };

        Ok(Self {
            state: Mutex::new(state),
            snapshot_path: Some(path),
        })
    }

    /// Rewrites the snapshot; called with the state lock held.
    async fn persist(&self, state: &StoreState) -> Result<(), BridgeError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let content = serde_json::to_vec_pretty(state)
            .context("Failed to serialize store snapshot")
            .map_err(BridgeError::Storage)?;
        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp_path.display()))
            .map_err(BridgeError::Storage)?;
        tokio::fs::rename(&tmp_path, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))
            .map_err(BridgeError::Storage)?;
        debug!("Store snapshot written to {}", path.display());
        Ok(())
    }

    /// Persists the state, putting `previous` back for `reference` if the write fails.
    async fn persist_or_restore(
        &self,
        state: &mut StoreState,
        reference: &str,
        previous: Option<ConversionRequest>,
    ) -> Result<(), BridgeError> {
        if let Err(e) = self.persist(state).await {
            match previous {
                Some(request) => {
                    state.conversions.insert(reference.to_string(), request);
                }
                None => {
                    state.conversions.remove(reference);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl BridgeStore for MemoryStore {
    async fn find_by_reference_id(
        &self,
        reference_transaction: &str,
    ) -> Result<Option<ConversionRequest>, BridgeError> {
        let state = self.state.lock().await;
        Ok(state.conversions.get(reference_transaction).cloned())
    }

    async fn insert_if_absent(&self, request: ConversionRequest) -> Result<bool, BridgeError> {
        let mut state = self.state.lock().await;
        if state.conversions.contains_key(&request.reference_transaction) {
            return Ok(false);
        }
        let reference = request.reference_transaction.clone();
        state.conversions.insert(reference.clone(), request);
        self.persist_or_restore(&mut state, &reference, None).await?;
        Ok(true)
    }

    async fn update_proposed_transaction(
        &self,
        seed: ConversionRequest,
        transaction: HiveTransaction,
    ) -> Result<ConversionRequest, BridgeError> {
        let mut state = self.state.lock().await;
        let reference = seed.reference_transaction.clone();
        let previous = state.conversions.get(&reference).cloned();
        let request = state.conversions.entry(reference.clone()).or_insert(seed);
        if !request.is_processed {
            request.proposed_transaction = Some(transaction);
        }
        let updated = request.clone();
        self.persist_or_restore(&mut state, &reference, previous).await?;
        Ok(updated)
    }

    async fn append_signature(
        &self,
        seed: ConversionRequest,
        signature: CollectedSignature,
        policy: AppendPolicy,
    ) -> Result<AppendOutcome, BridgeError> {
        let mut state = self.state.lock().await;
        let reference = seed.reference_transaction.clone();
        let previous = state.conversions.get(&reference).cloned();
        let created = previous.is_none();
        let request = state.conversions.entry(reference.clone()).or_insert(seed);

        let duplicate = request
            .signatures
            .iter()
            .any(|s| s.signer == signature.signer || s.signature == signature.signature);
        let appended = !request.is_processed
            && !duplicate
            && request.signatures.len() < policy.max_signatures;
        if appended {
            request.signatures.push(signature);
        }

        let signature_count = request.signatures.len();
        let broadcast_claimed =
            policy.claim_broadcast && request.ready_for_broadcast(policy.required_signatures);
        if broadcast_claimed {
            request.broadcast_claimed = true;
        }

        let request = request.clone();
        if appended || created {
            self.persist_or_restore(&mut state, &reference, previous).await?;
        }

        Ok(AppendOutcome {
            appended,
            signature_count,
            broadcast_claimed,
            request,
        })
    }

    async fn claim_broadcast(
        &self,
        reference_transaction: &str,
        required_signatures: usize,
    ) -> Result<Option<ConversionRequest>, BridgeError> {
        let mut state = self.state.lock().await;
        let Some(request) = state.conversions.get_mut(reference_transaction) else {
            return Ok(None);
        };
        if !request.ready_for_broadcast(required_signatures) {
            return Ok(None);
        }
        request.broadcast_claimed = true;
        Ok(Some(request.clone()))
    }

    async fn release_broadcast_claim(&self, reference_transaction: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let request = state
            .conversions
            .get_mut(reference_transaction)
            .ok_or_else(|| {
                BridgeError::StateConflict(format!("no request for {}", reference_transaction))
            })?;
        request.broadcast_claimed = false;
        Ok(())
    }

    async fn mark_proposal_published(&self, reference_transaction: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let request = state
            .conversions
            .get_mut(reference_transaction)
            .ok_or_else(|| {
                BridgeError::StateConflict(format!("no request for {}", reference_transaction))
            })?;
        if request.proposal_published {
            return Ok(());
        }
        let previous = request.clone();
        request.proposal_published = true;
        self.persist_or_restore(&mut state, reference_transaction, Some(previous))
            .await
    }

    async fn mark_processed(&self, reference_transaction: &str) -> Result<(), BridgeError> {
        let mut state = self.state.lock().await;
        let request = state
            .conversions
            .get_mut(reference_transaction)
            .ok_or_else(|| {
                BridgeError::StateConflict(format!("no request for {}", reference_transaction))
            })?;
        request.is_processed = true;
        request.broadcast_claimed = false;
        self.persist(&state).await
    }

    async fn list_pending(&self) -> Result<Vec<ConversionRequest>, BridgeError> {
        let state = self.state.lock().await;
        let mut pending: Vec<ConversionRequest> = state
            .conversions
            .values()
            .filter(|request| !request.is_processed)
            .cloned()
            .collect();
        pending.sort_by_key(|request| request.created_at);
        Ok(pending)
    }

    async fn find_status_by_name(&self, name: &str) -> Result<Option<StatusRecord>, BridgeError> {
        let state = self.state.lock().await;
        Ok(state.status.get(name).cloned())
    }

    async fn upsert_status_by_name(&self, name: &str, data: &str) -> Result<StatusRecord, BridgeError> {
        let mut state = self.state.lock().await;
        let version = state.status.get(name).map_or(1, |record| record.version + 1);
        let record = StatusRecord {
            name: name.to_string(),
            data: data.to_string(),
            version,
            updated_at: Self::now_millis(),
        };
        state.status.insert(name.to_string(), record.clone());
        self.persist(&state).await?;
        Ok(record)
    }

    async fn find_validator(&self, username: &str) -> Result<Option<ValidatorRecord>, BridgeError> {
        let state = self.state.lock().await;
        Ok(state.validators.get(username).cloned())
    }

    async fn list_validators(&self) -> Result<Vec<ValidatorRecord>, BridgeError> {
        let state = self.state.lock().await;
        let mut validators: Vec<ValidatorRecord> = state.validators.values().cloned().collect();
        validators.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(validators)
    }

    async fn upsert_validator(&self, username: &str, active: bool) -> Result<ValidatorRecord, BridgeError> {
        let mut state = self.state.lock().await;
        let record = ValidatorRecord {
            username: username.to_string(),
            active,
            updated_at: Self::now_millis(),
        };
        state.validators.insert(username.to_string(), record.clone());
        self.persist(&state).await?;
        Ok(record)
    }
}
