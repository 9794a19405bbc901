//! Shared test helpers for unit tests
//!
//! The module is organized into several categories:
//! - **Configuration Builders**: test configurations, optionally pointing at mock servers
//! - **Validator Identities**: deterministic keys for the validators in the authority set
//! - **Fake Adapters**: in-memory implementations of the chain and transport traits
//! - **ABI Encoders**: bridge call data and bridge transfer logs as the chain returns them

#![allow(dead_code)]

use async_trait::async_trait;
use ethereum_types::U256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use bridge_validator::amount::TokenAmount;
use bridge_validator::chain::ethereum::{self, EvmLog};
use bridge_validator::chain::hive_serializer;
use bridge_validator::chain::{
    BridgeCallData, ControlTransport, EthereumChain, EvmTransaction, HiveAccount, HiveAuthority,
    HiveChain, HiveOperation, HiveTransaction, TransferOperation,
};
use bridge_validator::config::Config;
use bridge_validator::crypto::{self, CryptoService};
use bridge_validator::protocol::ControlMessage;
use bridge_validator::router::PayoutTemplate;

// ============================================================================
// CONSTANTS
// ============================================================================

// -------------------------------- ACCOUNTS --------------------------------

/// Multi-signature deposit account of the default config
pub const DEPOSIT_ACCOUNT: &str = "bridge-deposit";

/// Validator accounts in the deposit account's authority order
pub const VALIDATOR_ONE: &str = "validator-one";
pub const VALIDATOR_TWO: &str = "validator-two";
pub const VALIDATOR_THREE: &str = "validator-three";

/// An account with keys but no authority over the deposit account
pub const OUTSIDER: &str = "outsider";

/// Hive account receiving a mint-side payout
pub const DUMMY_HIVE_RECIPIENT: &str = "alice";

/// Hive account sending a burn-side deposit
pub const DUMMY_HIVE_SENDER: &str = "bob";

// ------------------------------- ETHEREUM ---------------------------------

/// Bridge contract address of the default config
pub const BRIDGE_CONTRACT: &str = "0x00000000000000000000000000000000000000aa";

/// Token address passed to the bridge method
pub const DUMMY_TOKEN_ADDR_EVM: &str = "0x00000000000000000000000000000000000000cc";

/// Ethereum user burning tokens
pub const DUMMY_SENDER_ADDR_EVM: &str = "0x00000000000000000000000000000000000000dd";

/// Ethereum withdrawal recipient (lowercase, no checksum)
pub const DUMMY_RECIPIENT_ADDR_EVM: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

// ---------------------------- REFERENCE IDS -------------------------------

/// Ethereum transaction hash of a bridge transfer
pub const DUMMY_ETH_TX_HASH: &str =
    "0x1111111111111111111111111111111111111111111111111111111111111111";

/// Hive transaction id of a deposit
pub const DUMMY_HIVE_TX_ID: &str = "2222222222222222222222222222222222222222";

/// Token precision of the default config
pub const TOKEN_PRECISION: u32 = 18;

// ============================================================================
// CONFIGURATION BUILDERS
// ============================================================================

/// Build a test config with the default accounts and placeholder endpoints.
pub fn build_test_config() -> Config {
    Config::default()
}

/// Build a test config whose node is `validator`.
pub fn build_test_config_for(validator: &str) -> Config {
    let mut config = Config::default();
    config.validator.username = validator.to_string();
    config
}

/// Build a test config pointing both RPC endpoints at mock servers.
pub fn build_test_config_with_rpc(hive_url: &str, ethereum_url: &str) -> Config {
    let mut config = Config::default();
    config.hive.rpc_url = hive_url.to_string();
    config.ethereum.rpc_url = ethereum_url.to_string();
    config
}

/// Whole tokens expressed in Ethereum base units.
pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * U256::exp10(TOKEN_PRECISION as usize)
}

// ============================================================================
// VALIDATOR IDENTITIES
// ============================================================================

/// Deterministic key material for a named validator.
#[derive(Clone)]
pub struct TestValidator {
    pub name: String,
    pub crypto: Arc<CryptoService>,
}

impl TestValidator {
    /// `seed` must be non-zero.
    pub fn new(name: &str, seed: u8) -> Self {
        let crypto = CryptoService::from_secret_bytes(&[seed; 32], &[seed.wrapping_add(100); 32])
            .expect("test keys are valid scalars");
        Self {
            name: name.to_string(),
            crypto: Arc::new(crypto),
        }
    }

    /// Hive public key string as returned by `get_accounts`.
    ///
    /// The checksum is not verified by the validator, so it is left zeroed.
    pub fn public_key_string(&self) -> String {
        let mut bytes = self.crypto.hive_public_key();
        bytes.extend_from_slice(&[0u8; 4]);
        format!("STM{}", bs58::encode(bytes).into_string())
    }

    /// This validator's signature over `transaction`.
    pub fn sign(&self, chain_id: &[u8], transaction: &HiveTransaction) -> String {
        let digest = hive_serializer::transaction_digest(chain_id, &transaction.unsigned())
            .expect("test transaction serializes");
        self.crypto
            .sign_hive_digest(&digest)
            .expect("canonical signature found")
    }

    pub fn account(&self) -> HiveAccount {
        HiveAccount {
            name: self.name.clone(),
            active: HiveAuthority {
                weight_threshold: 1,
                account_auths: Vec::new(),
                key_auths: vec![(self.public_key_string(), 1)],
            },
        }
    }
}

/// The three validators of the default authority set plus an outsider.
pub fn test_validators() -> Vec<TestValidator> {
    vec![
        TestValidator::new(VALIDATOR_ONE, 1),
        TestValidator::new(VALIDATOR_TWO, 2),
        TestValidator::new(VALIDATOR_THREE, 3),
    ]
}

/// Deposit account with weight-1 account authorities and the given threshold.
pub fn deposit_account(authorities: &[&str], weight_threshold: u32) -> HiveAccount {
    HiveAccount {
        name: DEPOSIT_ACCOUNT.to_string(),
        active: HiveAuthority {
            weight_threshold,
            account_auths: authorities.iter().map(|a| (a.to_string(), 1)).collect(),
            key_auths: Vec::new(),
        },
    }
}

fn chain_id(config: &Config) -> Vec<u8> {
    hex::decode(&config.hive.chain_id).expect("default chain id is hex")
}

// ============================================================================
// FAKE ADAPTERS
// ============================================================================

/// In-memory Hive chain signing with a real key.
pub struct FakeHive {
    pub chain_id: Vec<u8>,
    signer: TestValidator,
    accounts: Mutex<HashMap<String, HiveAccount>>,
    transactions: Mutex<HashMap<String, HiveTransaction>>,
    broadcasts: Mutex<Vec<HiveTransaction>>,
    fail_broadcast: AtomicBool,
    fail_accounts: AtomicBool,
}

impl FakeHive {
    /// A chain where the deposit account is governed by the three test
    /// validators with threshold 2, signing as `signer`.
    pub fn new(config: &Config, signer: &TestValidator) -> Self {
        let hive = Self {
            chain_id: chain_id(config),
            signer: signer.clone(),
            accounts: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            broadcasts: Mutex::new(Vec::new()),
            fail_broadcast: AtomicBool::new(false),
            fail_accounts: AtomicBool::new(false),
        };
        hive.set_account(deposit_account(&[VALIDATOR_ONE, VALIDATOR_TWO, VALIDATOR_THREE], 2));
        for validator in test_validators() {
            hive.set_account(validator.account());
        }
        hive.set_account(TestValidator::new(OUTSIDER, 9).account());
        hive
    }

    pub fn set_account(&self, account: HiveAccount) {
        self.accounts
            .lock()
            .unwrap()
            .insert(account.name.clone(), account);
    }

    pub fn add_transaction(&self, id: &str, transaction: HiveTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(id.to_string(), transaction);
    }

    pub fn broadcasts(&self) -> Vec<HiveTransaction> {
        self.broadcasts.lock().unwrap().clone()
    }

    pub fn set_fail_broadcast(&self, fail: bool) {
        self.fail_broadcast.store(fail, Ordering::SeqCst);
    }

    /// Makes account lookups fail like an unreachable node.
    pub fn set_fail_accounts(&self, fail: bool) {
        self.fail_accounts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl HiveChain for FakeHive {
    async fn get_transaction(&self, id: &str) -> anyhow::Result<Option<HiveTransaction>> {
        Ok(self.transactions.lock().unwrap().get(id).cloned())
    }

    async fn get_account(&self, name: &str) -> anyhow::Result<Option<HiveAccount>> {
        if self.fail_accounts.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("connection refused"));
        }
        Ok(self.accounts.lock().unwrap().get(name).cloned())
    }

    async fn prepare_transaction(
        &self,
        operations: Vec<HiveOperation>,
    ) -> anyhow::Result<HiveTransaction> {
        Ok(HiveTransaction {
            ref_block_num: 4660,
            ref_block_prefix: 0xdeadbeef,
            expiration: "2030-01-01T00:00:00".to_string(),
            operations,
            extensions: Vec::new(),
            signatures: Vec::new(),
            transaction_id: None,
            block_num: None,
        })
    }

    fn sign_transaction(&self, transaction: &HiveTransaction) -> anyhow::Result<String> {
        Ok(self.signer.sign(&self.chain_id, transaction))
    }

    fn recover_signer_key(
        &self,
        transaction: &HiveTransaction,
        signature: &str,
    ) -> anyhow::Result<Vec<u8>> {
        let digest = hive_serializer::transaction_digest(&self.chain_id, transaction)?;
        crypto::recover_hive_public_key(&digest, signature)
    }

    async fn broadcast_transaction(&self, transaction: &HiveTransaction) -> anyhow::Result<String> {
        tokio::task::yield_now().await;
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("node rejected the transaction"));
        }
        self.broadcasts.lock().unwrap().push(transaction.clone());
        hive_serializer::transaction_id(transaction)
    }
}

/// In-memory Ethereum chain signing withdrawals with a real key.
pub struct FakeEthereum {
    crypto: Arc<CryptoService>,
    transactions: Mutex<HashMap<String, EvmTransaction>>,
}

impl FakeEthereum {
    pub fn new(signer: &TestValidator) -> Self {
        Self {
            crypto: signer.crypto.clone(),
            transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_transaction(&self, transaction: EvmTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(transaction.hash.clone(), transaction);
    }
}

#[async_trait]
impl EthereumChain for FakeEthereum {
    async fn get_transaction(&self, hash: &str) -> anyhow::Result<Option<EvmTransaction>> {
        Ok(self.transactions.lock().unwrap().get(hash).cloned())
    }

    fn decode_call_data(&self, input: &str) -> anyhow::Result<BridgeCallData> {
        ethereum::decode_bridge_call_data(input)
    }

    fn sign_withdrawal(&self, to: &str, amount: U256, reference: &str) -> anyhow::Result<String> {
        self.crypto.sign_withdrawal(to, amount, reference)
    }
}

/// Control transport that records every message it delivers.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<ControlMessage>>,
    counter: AtomicUsize,
    attempts: AtomicUsize,
    failures: AtomicUsize,
}

impl RecordingTransport {
    pub fn sent(&self) -> Vec<ControlMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Send attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Fails the next `count` sends.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl ControlTransport for RecordingTransport {
    async fn send(&self, message: &ControlMessage) -> anyhow::Result<String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow::anyhow!("transport unavailable"));
        }
        self.sent.lock().unwrap().push(message.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("control-tx-{}", n))
    }
}

// ============================================================================
// DEFAULT TRANSACTION CREATORS
// ============================================================================

/// Payout proposal as the head validator builds it.
pub async fn create_payout_proposal(
    config: &Config,
    hive: &FakeHive,
    recipient: &str,
    amount: TokenAmount,
    head_validator: &str,
) -> HiveTransaction {
    let operations = PayoutTemplate::from_config(config)
        .expect("default fee parses")
        .operations(recipient, amount, head_validator, DUMMY_ETH_TX_HASH)
        .expect("operations encode");
    hive.prepare_transaction(operations)
        .await
        .expect("fake prepare never fails")
}

/// Ethereum transaction calling the bridge method.
pub fn create_bridge_transaction(amount: U256, recipient: &str) -> EvmTransaction {
    EvmTransaction {
        hash: DUMMY_ETH_TX_HASH.to_string(),
        block_number: Some("0x10".to_string()),
        from: DUMMY_SENDER_ADDR_EVM.to_string(),
        to: Some(BRIDGE_CONTRACT.to_string()),
        input: encode_bridge_call(DUMMY_TOKEN_ADDR_EVM, amount, recipient),
    }
}

/// Hive transaction transferring `amount` to `to` with `memo`.
pub fn create_hive_transfer(to: &str, amount: &str, memo: &str) -> HiveTransaction {
    let transfer = TransferOperation {
        from: DUMMY_HIVE_SENDER.to_string(),
        to: to.to_string(),
        amount: amount.to_string(),
        memo: memo.to_string(),
    };
    HiveTransaction {
        ref_block_num: 1,
        ref_block_prefix: 2,
        expiration: "2030-01-01T00:00:00".to_string(),
        operations: vec![HiveOperation(
            "transfer".to_string(),
            serde_json::to_value(transfer).unwrap(),
        )],
        extensions: Vec::new(),
        signatures: Vec::new(),
        transaction_id: Some(DUMMY_HIVE_TX_ID.to_string()),
        block_num: Some(100),
    }
}

// ============================================================================
// ABI ENCODERS
// ============================================================================

fn address_word(address: &str) -> String {
    format!("{:0>64}", address.trim_start_matches("0x"))
}

fn uint_word(value: U256) -> String {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    hex::encode(bytes)
}

fn string_tail(value: &str) -> String {
    let mut padded = value.as_bytes().to_vec();
    padded.resize((value.len() + 31) / 32 * 32, 0);
    format!("{}{}", uint_word(U256::from(value.len())), hex::encode(padded))
}

/// Call data of `bridgeTransfer(address,uint256,string)`.
pub fn encode_bridge_call(token: &str, amount: U256, recipient: &str) -> String {
    format!(
        "{}{}{}{}{}",
        ethereum::method_selector("bridgeTransfer(address,uint256,string)"),
        address_word(token),
        uint_word(amount),
        uint_word(U256::from(0x60)),
        string_tail(recipient)
    )
}

/// A `BridgeTransfer(address indexed, uint256, string)` log.
pub fn encode_bridge_log(sender: &str, amount: U256, recipient: &str, transaction_hash: &str) -> EvmLog {
    EvmLog {
        address: BRIDGE_CONTRACT.to_string(),
        topics: vec![
            ethereum::event_topic("BridgeTransfer(address,uint256,string)"),
            format!("0x{}", address_word(sender)),
        ],
        data: format!(
            "0x{}{}{}",
            uint_word(amount),
            uint_word(U256::from(0x40)),
            string_tail(recipient)
        ),
        block_number: "0x10".to_string(),
        transaction_hash: transaction_hash.to_string(),
    }
}
