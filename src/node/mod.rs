//! Node Runtime
//!
//! Wires the chain adapters, store and core components together and runs one
//! worker per stream:
//!
//! - Hive blocks: leader rotation, deposit routing, then control message extraction
//! - control messages: proposals, signatures and governance, in block order per
//!   reference transaction, spread over parallel lanes
//! - Ethereum bridge logs: transfer routing
//!
//! Streams are independent of each other. A block or batch holding a deferred
//! conversion is retried after a delay and its cursor is not advanced, so later
//! input waits behind it. Shutdown stops the streamers; the workers drain what
//! is already queued and exit. Persisted state is left as is and aggregation
//! resumes from it on restart.

use anyhow::{Context, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::{AggregationOutcome, SignatureAggregator};
use crate::api::ApiServer;
use crate::authority::{self, LeaderRotationMonitor, HEARTBEAT_BLOCKS};
use crate::chain::ethereum::LogBatch;
use crate::chain::{ControlTransport, EthereumChain, EvmClient, HiveBlock, HiveChain, HiveRpcClient};
use crate::config::{Config, Environment};
use crate::crypto::CryptoService;
use crate::protocol::{self, InboundMessage};
use crate::router::{EventRouter, RouteOutcome};
use crate::store::{BridgeStore, MemoryStore, ETHEREUM_CURSOR, HIVE_CURSOR};
use crate::validator::ConversionValidator;

pub mod control;

pub use control::{ControlHandler, ControlOutcome};

const BLOCK_CHANNEL_CAPACITY: usize = 64;
const CONTROL_CHANNEL_CAPACITY: usize = 256;
const LOG_CHANNEL_CAPACITY: usize = 16;
const CONTROL_LANES: usize = 8;
const CONTROL_LANE_CAPACITY: usize = 32;
const RETRY_DELAY: Duration = Duration::from_secs(5);

// ============================================================================
// CORE
// ============================================================================

/// Chain-independent processing shared by all workers.
pub struct NodeCore {
    store: Arc<dyn BridgeStore>,
    rotation: LeaderRotationMonitor,
    router: EventRouter,
    control: ControlHandler,
    aggregator: Arc<SignatureAggregator>,
    validator: String,
    custom_json_id: String,
    deposit_account: String,
}

impl NodeCore {
    pub fn new(
        config: &Config,
        hive: Arc<dyn HiveChain>,
        ethereum: Arc<dyn EthereumChain>,
        transport: Arc<dyn ControlTransport>,
        store: Arc<dyn BridgeStore>,
    ) -> Result<Self> {
        let deposit_account = config.hive.deposit_account.clone();
        let validator = Arc::new(ConversionValidator::new(
            config,
            hive.clone(),
            ethereum,
            store.clone(),
        )?);
        let aggregator = Arc::new(SignatureAggregator::new(
            hive.clone(),
            store.clone(),
            &deposit_account,
            &config.validator.username,
        ));

        Ok(Self {
            rotation: LeaderRotationMonitor::new(hive.clone(), store.clone(), &deposit_account),
            router: EventRouter::new(config, hive, transport.clone(), store.clone())?,
            control: ControlHandler::new(validator, aggregator.clone(), transport, store.clone()),
            aggregator,
            validator: config.validator.username.clone(),
            store,
            custom_json_id: config.hive.custom_json_id.clone(),
            deposit_account,
        })
    }

    pub fn rotation(&self) -> &LeaderRotationMonitor {
        &self.rotation
    }

    /// Processes one Hive block and returns the control messages it carried.
    ///
    /// Returns `None` when a deposit in the block was deferred: the cursor stays
    /// on the block and the caller delivers it again.
    pub async fn handle_hive_block(&self, block: &HiveBlock) -> Option<Vec<InboundMessage>> {
        match self.rotation.on_block(block.block_num).await {
            Ok(Some(event)) if event.head_validator == self.validator => {
                self.resume_broadcasts().await;
            }
            Ok(_) if block.block_num % HEARTBEAT_BLOCKS == 0 => {
                self.resume_broadcasts().await;
            }
            Ok(_) => {}
            Err(e) => error!(block_num = block.block_num, "Leader rotation failed: {}", e),
        }

        let outcomes = self.router.route_hive_block(block).await;
        if has_deferred(&outcomes) {
            warn!(block_num = block.block_num, "Hive block deferred");
            return None;
        }
        let messages =
            protocol::extract_messages(block, &self.custom_json_id, &self.deposit_account);

        let next = (block.block_num + 1).to_string();
        if let Err(e) = self.store.upsert_status_by_name(HIVE_CURSOR, &next).await {
            warn!(block_num = block.block_num, "Failed to store Hive cursor: {}", e);
        }
        Some(messages)
    }

    /// Processes one polled range of bridge logs.
    ///
    /// Returns false when a transfer was deferred; the cursor is left in place.
    pub async fn handle_log_batch(&self, batch: &LogBatch) -> bool {
        if !batch.logs.is_empty() {
            info!(count = batch.logs.len(), to_block = batch.to_block, "Bridge transfers found");
        }
        let outcomes = self.router.route_bridge_logs(&batch.logs).await;
        if has_deferred(&outcomes) {
            warn!(to_block = batch.to_block, "Bridge log batch deferred");
            return false;
        }

        let next = (batch.to_block + 1).to_string();
        if let Err(e) = self.store.upsert_status_by_name(ETHEREUM_CURSOR, &next).await {
            warn!(to_block = batch.to_block, "Failed to store Ethereum cursor: {}", e);
        }
        true
    }

    /// Broadcasts payouts that reached quorum without being broadcast.
    pub async fn resume_broadcasts(&self) -> Vec<AggregationOutcome> {
        match self.aggregator.resume_broadcasts().await {
            Ok(outcomes) => {
                if !outcomes.is_empty() {
                    info!(count = outcomes.len(), "Resumed payout broadcasts");
                }
                outcomes
            }
            Err(e) => {
                warn!("Failed to resume payout broadcasts: {}", e);
                Vec::new()
            }
        }
    }

    /// Handles one control message; failures are logged, never propagated.
    pub async fn handle_control(&self, inbound: &InboundMessage) -> Option<ControlOutcome> {
        match self.control.handle(inbound).await {
            Ok(outcome) => {
                debug!(
                    message = inbound.message.name(),
                    sender = %inbound.sender,
                    "Control message handled: {:?}",
                    outcome
                );
                Some(outcome)
            }
            Err(e) if e.is_rejection() => {
                warn!(
                    message = inbound.message.name(),
                    sender = %inbound.sender,
                    transaction_id = %inbound.transaction_id,
                    "Control message rejected: {}",
                    e
                );
                None
            }
            Err(e) => {
                error!(
                    message = inbound.message.name(),
                    sender = %inbound.sender,
                    transaction_id = %inbound.transaction_id,
                    "Control message failed: {}",
                    e
                );
                None
            }
        }
    }
}

fn has_deferred(outcomes: &[RouteOutcome]) -> bool {
    outcomes
        .iter()
        .any(|outcome| matches!(outcome, RouteOutcome::Deferred { .. }))
}

/// Waits before delivering deferred input again; false once shutdown is requested.
async fn wait_for_retry(shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    let changed = tokio::select! {
        _ = tokio::time::sleep(RETRY_DELAY) => return true,
        changed = shutdown.changed() => changed,
    };
    changed.is_ok() && !*shutdown.borrow()
}

/// Handles blocks in order and forwards their control messages.
pub async fn run_hive_worker(
    core: Arc<NodeCore>,
    mut blocks: mpsc::Receiver<HiveBlock>,
    control: mpsc::Sender<InboundMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(block) = blocks.recv().await {
        let messages = loop {
            if let Some(messages) = core.handle_hive_block(&block).await {
                break messages;
            }
            if !wait_for_retry(&mut shutdown).await {
                info!(block_num = block.block_num, "Hive worker stopped on a deferred block");
                return;
            }
        };
        for message in messages {
            if control.send(message).await.is_err() {
                warn!("Control worker stopped, dropping control messages");
                return;
            }
        }
    }
    debug!("Hive worker stopped");
}

fn lane_index(key: &str, lanes: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

/// Handles control messages on parallel lanes.
///
/// Messages with the same ordering key always share a lane, so each reference
/// transaction sees its messages in block order.
pub async fn run_control_worker(core: Arc<NodeCore>, mut messages: mpsc::Receiver<InboundMessage>) {
    let mut lanes = Vec::with_capacity(CONTROL_LANES);
    let mut handles = Vec::with_capacity(CONTROL_LANES);
    for _ in 0..CONTROL_LANES {
        let (lane_tx, mut lane_rx) = mpsc::channel::<InboundMessage>(CONTROL_LANE_CAPACITY);
        let core = core.clone();
        handles.push(tokio::spawn(async move {
            while let Some(message) = lane_rx.recv().await {
                core.handle_control(&message).await;
            }
        }));
        lanes.push(lane_tx);
    }

    while let Some(message) = messages.recv().await {
        let lane = &lanes[lane_index(message.message.ordering_key(), lanes.len())];
        if lane.send(message).await.is_err() {
            warn!("Control lane stopped, dropping control message");
        }
    }

    drop(lanes);
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Control lane panicked: {}", e);
        }
    }
    debug!("Control worker stopped");
}

/// Handles bridge log batches in order.
pub async fn run_ethereum_worker(
    core: Arc<NodeCore>,
    mut batches: mpsc::Receiver<LogBatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    while let Some(batch) = batches.recv().await {
        while !core.handle_log_batch(&batch).await {
            if !wait_for_retry(&mut shutdown).await {
                info!(to_block = batch.to_block, "Ethereum worker stopped on a deferred batch");
                return;
            }
        }
    }
    debug!("Ethereum worker stopped");
}

// ============================================================================
// NODE
// ============================================================================

/// A fully wired validator node backed by the JSON-RPC adapters.
pub struct BridgeNode {
    config: Config,
    hive: Arc<HiveRpcClient>,
    ethereum: Arc<EvmClient>,
    store: Arc<dyn BridgeStore>,
    core: Arc<NodeCore>,
}

impl BridgeNode {
    /// Builds the node: keys, store, adapters and core components.
    ///
    /// Fails when keys are missing or the deposit account has no authorities.
    pub async fn new(config: Config) -> Result<Self> {
        let crypto = Arc::new(CryptoService::new(&config)?);
        let store: Arc<dyn BridgeStore> = match &config.storage.snapshot_path {
            Some(path) => Arc::new(MemoryStore::open(path).await?),
            None => Arc::new(MemoryStore::new()),
        };

        let hive = Arc::new(HiveRpcClient::new(&config, crypto.clone())?);
        let ethereum = Arc::new(EvmClient::new(&config, crypto)?);

        let account = authority::fetch_account(hive.as_ref(), &config.hive.deposit_account)
            .await
            .context("Failed to load the deposit account")?;
        if authority::account_authorities(&account).is_empty() {
            return Err(anyhow::anyhow!(
                "Deposit account {} has no account authorities",
                config.hive.deposit_account
            ));
        }

        let core = Arc::new(NodeCore::new(
            &config,
            hive.clone(),
            ethereum.clone(),
            hive.clone(),
            store.clone(),
        )?);

        Ok(Self {
            config,
            hive,
            ethereum,
            store,
            core,
        })
    }

    async fn stored_cursor(&self, name: &str) -> Result<Option<u64>> {
        let Some(record) = self.store.find_status_by_name(name).await? else {
            return Ok(None);
        };
        let cursor = record
            .data
            .parse()
            .with_context(|| format!("Stored cursor {} is not a block number", name))?;
        Ok(Some(cursor))
    }

    async fn hive_start_block(&self) -> Result<u64> {
        if let Some(cursor) = self.stored_cursor(HIVE_CURSOR).await? {
            return Ok(cursor);
        }
        if let Some(start) = self.config.hive.start_block {
            return Ok(start);
        }
        let props = self.hive.get_dynamic_global_properties().await?;
        Ok(match self.config.environment {
            Environment::Production => props.last_irreversible_block_num,
            Environment::Development => props.head_block_number,
        })
    }

    async fn ethereum_start_block(&self, finality_depth: u64) -> Result<u64> {
        if let Some(cursor) = self.stored_cursor(ETHEREUM_CURSOR).await? {
            return Ok(cursor);
        }
        if let Some(start) = self.config.ethereum.start_block {
            return Ok(start);
        }
        Ok(self
            .ethereum
            .get_block_number()
            .await?
            .saturating_sub(finality_depth))
    }

    /// Runs until `shutdown` flips to true, then drains the workers.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let environment = self.config.environment;
        let irreversible = environment == Environment::Production;
        let finality_depth = self.config.ethereum.finality_depth(environment);

        let hive_start = self.hive_start_block().await?;
        let ethereum_start = self.ethereum_start_block(finality_depth).await?;
        info!(
            validator = %self.config.validator.username,
            hive_start, ethereum_start, "Bridge validator starting"
        );

        self.core.resume_broadcasts().await;

        let (block_tx, block_rx) = mpsc::channel(BLOCK_CHANNEL_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (log_tx, log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);

        let mut tasks: Vec<(&str, JoinHandle<()>)> = Vec::new();

        let hive = self.hive.clone();
        let hive_interval = Duration::from_millis(self.config.hive.polling_interval_ms);
        let hive_shutdown = shutdown.clone();
        tasks.push((
            "hive stream",
            tokio::spawn(async move {
                if let Err(e) = hive
                    .stream_blocks(hive_start, irreversible, hive_interval, block_tx, hive_shutdown)
                    .await
                {
                    error!("Hive stream failed: {:#}", e);
                }
            }),
        ));

        let ethereum = self.ethereum.clone();
        let ethereum_interval = Duration::from_millis(self.config.ethereum.polling_interval_ms);
        let ethereum_shutdown = shutdown.clone();
        tasks.push((
            "ethereum stream",
            tokio::spawn(async move {
                if let Err(e) = ethereum
                    .stream_bridge_logs(
                        ethereum_start,
                        finality_depth,
                        ethereum_interval,
                        log_tx,
                        ethereum_shutdown,
                    )
                    .await
                {
                    error!("Ethereum stream failed: {:#}", e);
                }
            }),
        ));

        tasks.push((
            "hive worker",
            tokio::spawn(run_hive_worker(
                self.core.clone(),
                block_rx,
                control_tx,
                shutdown.clone(),
            )),
        ));
        tasks.push((
            "control worker",
            tokio::spawn(run_control_worker(self.core.clone(), control_rx)),
        ));
        tasks.push((
            "ethereum worker",
            tokio::spawn(run_ethereum_worker(self.core.clone(), log_rx, shutdown.clone())),
        ));

        if self.config.api.enabled {
            let server = ApiServer::new(
                self.config.api.clone(),
                &self.config.validator.username,
                self.store.clone(),
            );
            let api_shutdown = shutdown.clone();
            tasks.push((
                "api server",
                tokio::spawn(async move {
                    if let Err(e) = server.run(api_shutdown).await {
                        error!("API server failed: {:#}", e);
                    }
                }),
            ));
        }

        for (name, task) in tasks {
            if let Err(e) = task.await {
                error!("Task {} panicked: {}", name, e);
            }
        }

        info!("Bridge validator stopped");
        Ok(())
    }
}
