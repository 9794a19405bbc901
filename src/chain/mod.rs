//! Chain Adapters
//!
//! Capability traits through which the bridge core talks to both ledgers and to
//! the other validators. Each adapter is constructed once at startup and shared
//! by reference (`Arc<dyn ...>`) with every component that needs it.
//!
//! Concrete JSON-RPC implementations live in [`hive`] and [`ethereum`].

use async_trait::async_trait;
use ethereum_types::U256;

use crate::protocol::ControlMessage;

pub mod ethereum;
pub mod hive;
pub mod hive_serializer;

pub use ethereum::{BridgeCallData, BridgeTransferLog, EvmClient, EvmTransaction};
pub use hive::{
    CustomJsonOperation, HiveAccount, HiveAuthority, HiveBlock, HiveOperation, HiveRpcClient,
    HiveTransaction, TransferOperation,
};

/// Hive (chain B) capabilities used by the core.
#[async_trait]
pub trait HiveChain: Send + Sync {
    /// Looks up a transaction by id. `Ok(None)` when the node does not know it.
    async fn get_transaction(&self, id: &str) -> anyhow::Result<Option<HiveTransaction>>;

    /// Fetches an account including its active authority.
    async fn get_account(&self, name: &str) -> anyhow::Result<Option<HiveAccount>>;

    /// Fills in reference block and expiration for an unsigned transaction.
    async fn prepare_transaction(
        &self,
        operations: Vec<HiveOperation>,
    ) -> anyhow::Result<HiveTransaction>;

    /// Signs the transaction digest with this node's active key.
    fn sign_transaction(&self, transaction: &HiveTransaction) -> anyhow::Result<String>;

    /// Recovers the compressed public key behind a signature over `transaction`.
    fn recover_signer_key(
        &self,
        transaction: &HiveTransaction,
        signature: &str,
    ) -> anyhow::Result<Vec<u8>>;

    /// Broadcasts a fully signed transaction and returns its id.
    async fn broadcast_transaction(&self, transaction: &HiveTransaction) -> anyhow::Result<String>;
}

/// Ethereum (chain A) capabilities used by the core.
#[async_trait]
pub trait EthereumChain: Send + Sync {
    /// Looks up a transaction by hash. `Ok(None)` when the node does not know it.
    async fn get_transaction(&self, hash: &str) -> anyhow::Result<Option<EvmTransaction>>;

    /// Decodes bridge method call data.
    fn decode_call_data(&self, input: &str) -> anyhow::Result<BridgeCallData>;

    fn is_address(&self, value: &str) -> bool {
        ethereum::is_address(value)
    }

    /// Signs a withdrawal the multi-signature contract will honour.
    fn sign_withdrawal(&self, to: &str, amount: U256, reference: &str) -> anyhow::Result<String>;
}

/// Outbound side of the validator control channel.
#[async_trait]
pub trait ControlTransport: Send + Sync {
    /// Publishes a control message to all validators; returns the carrying transaction id.
    async fn send(&self, message: &ControlMessage) -> anyhow::Result<String>;
}
