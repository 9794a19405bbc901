//! Leader rotation.
//!
//! Re-evaluates the head validator once per epoch, whenever no head validator
//! is recorded, and once on startup. An epoch counts as evaluated only after a
//! successful rotation, so a failed attempt is retried on the next block.
//! This is the only writer of the `headValidator` status record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::authority::{self, HEARTBEAT_BLOCKS, ROTATION_EPOCH_BLOCKS};
use crate::chain::HiveChain;
use crate::error::BridgeError;
use crate::store::{BridgeStore, HEAD_VALIDATOR};

const NO_EPOCH: u64 = u64::MAX;

/// Emitted whenever the stored head validator changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationEvent {
    pub block_num: u64,
    pub previous: Option<String>,
    pub head_validator: String,
}

pub struct LeaderRotationMonitor {
    hive: Arc<dyn HiveChain>,
    store: Arc<dyn BridgeStore>,
    deposit_account: String,
    /// Epoch of the last successful rotation; `NO_EPOCH` before the first
    rotated_epoch: AtomicU64,
    events: broadcast::Sender<RotationEvent>,
}

impl LeaderRotationMonitor {
    pub fn new(hive: Arc<dyn HiveChain>, store: Arc<dyn BridgeStore>, deposit_account: &str) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            hive,
            store,
            deposit_account: deposit_account.to_string(),
            rotated_epoch: AtomicU64::new(NO_EPOCH),
            events,
        }
    }

    /// Subscribes to head validator changes.
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.events.subscribe()
    }

    /// Handles a new Hive block height.
    ///
    /// Returns the rotation event when the head validator changed.
    pub async fn on_block(&self, block_num: u64) -> Result<Option<RotationEvent>, BridgeError> {
        let current = self.store.find_status_by_name(HEAD_VALIDATOR).await?;
        let epoch = block_num / ROTATION_EPOCH_BLOCKS;

        if current.is_none() || self.rotated_epoch.load(Ordering::SeqCst) != epoch {
            let previous = current.map(|record| record.data);
            let event = self.rotate(block_num, previous).await?;
            self.rotated_epoch.store(epoch, Ordering::SeqCst);
            return Ok(event);
        }

        if block_num % HEARTBEAT_BLOCKS == 0 {
            info!(
                block_num,
                head_validator = current.map(|record| record.data).unwrap_or_default(),
                "Heartbeat"
            );
        }
        Ok(None)
    }

    async fn rotate(
        &self,
        block_num: u64,
        previous: Option<String>,
    ) -> Result<Option<RotationEvent>, BridgeError> {
        let account = authority::fetch_account(self.hive.as_ref(), &self.deposit_account).await?;
        let authorities = authority::account_authorities(&account);
        let head_validator = authority::resolve_leader(block_num, &authorities)?;

        if previous.as_deref() == Some(head_validator.as_str()) {
            return Ok(None);
        }

        self.store
            .upsert_status_by_name(HEAD_VALIDATOR, &head_validator)
            .await?;
        info!(
            block_num,
            previous = previous.as_deref().unwrap_or("none"),
            head_validator = %head_validator,
            "Head validator rotated"
        );

        let event = RotationEvent {
            block_num,
            previous,
            head_validator,
        };
        if self.events.send(event.clone()).is_err() {
            debug!(block_num, "Rotation event had no subscribers");
        }
        Ok(Some(event))
    }
}
