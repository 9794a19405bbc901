//! Configuration Management Module
//!
//! This module handles loading and managing configuration for the bridge validator.
//! Configuration includes chain endpoints, bridge parameters, the validator identity
//! and the names of the environment variables holding its signing keys.

use serde::{Deserialize, Serialize};

use crate::amount::FeeRate;

// ============================================================================
// CONFIGURATION STRUCTURES
// ============================================================================

/// Deployment tier. Production only consumes irreversible / confirmed blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Main configuration structure containing all service settings.
///
/// This structure holds configuration for:
/// - Hive chain connection details and the bridge deposit account
/// - Ethereum chain connection details and bridge contract
/// - Bridge token and fee parameters
/// - This node's validator identity
/// - Persistence and API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Deployment tier
    #[serde(default)]
    pub environment: Environment,
    /// Hive chain configuration (deposit account, P2P custom_json namespace)
    pub hive: HiveChainConfig,
    /// Ethereum chain configuration (bridge contract, token precision)
    pub ethereum: EthereumChainConfig,
    /// Bridged token and validator fee
    pub bridge: BridgeConfig,
    /// This node's validator identity
    pub validator: ValidatorConfig,
    /// Persistence configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// API server configuration (host, port)
    #[serde(default)]
    pub api: ApiConfig,
}

/// Configuration for the Hive chain connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiveChainConfig {
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Chain id (hex) mixed into transaction digests
    #[serde(default = "default_hive_chain_id")]
    pub chain_id: String,
    /// Multi-signature account that receives deposits and owns the bridged token
    pub deposit_account: String,
    /// custom_json id carrying validator control messages
    pub custom_json_id: String,
    /// Prefix of the token transfer custom_json id (`<prefix>token_transfer`)
    #[serde(default)]
    pub token_transfer_prefix: String,
    /// Polling interval for new blocks in milliseconds
    #[serde(default = "default_hive_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// First block to process when no cursor has been stored yet
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Environment variable name containing the validator's active key (WIF)
    #[serde(default = "default_hive_active_key_env")]
    pub active_key_env: String,
}

/// Configuration for the Ethereum chain connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumChainConfig {
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Chain ID (e.g., 31337 for Hardhat, 1 for Ethereum mainnet)
    pub chain_id: u64,
    /// Address of the bridged token contract that emits bridge events
    pub contract_address: String,
    /// Signature of the bridge method users call to burn tokens
    #[serde(default = "default_contract_method")]
    pub contract_method: String,
    /// Signature of the event emitted by the bridge method
    #[serde(default = "default_bridge_event")]
    pub bridge_event: String,
    /// Token decimals on Ethereum
    pub token_precision: u32,
    /// Confirmations required before a log is consumed in production
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
    /// Polling interval for new logs in milliseconds
    #[serde(default = "default_ethereum_polling_interval_ms")]
    pub polling_interval_ms: u64,
    /// First block to scan when no cursor has been stored yet
    #[serde(default)]
    pub start_block: Option<u64>,
    /// Environment variable name containing the Ethereum private key (hex)
    #[serde(default = "default_ethereum_private_key_env")]
    pub private_key_env: String,
}

/// Bridged token and fee parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Token symbol used in Hive token transfers
    pub token_symbol: String,
    /// Validator fee percentage (e.g. "1" or "0.25")
    pub fee_pct: String,
}

/// This node's validator identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Hive account name of this validator
    pub username: String,
}

/// Persistence configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// JSON snapshot file; state is kept in memory only when unset
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

/// API server configuration for external communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Whether to start the API server
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    /// Host address to bind the API server to
    pub host: String,
    /// Port number to bind the API server to
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            host: "127.0.0.1".to_string(),
            port: 3340,
        }
    }
}

fn default_hive_chain_id() -> String {
    "beeab0de00000000000000000000000000000000000000000000000000000000".to_string()
}

fn default_hive_polling_interval_ms() -> u64 {
    3000
}

fn default_hive_active_key_env() -> String {
    "BRIDGE_HIVE_ACTIVE_KEY".to_string()
}

fn default_contract_method() -> String {
    "bridgeTransfer(address,uint256,string)".to_string()
}

fn default_bridge_event() -> String {
    "BridgeTransfer(address,uint256,string)".to_string()
}

fn default_confirmations() -> u64 {
    12
}

fn default_ethereum_polling_interval_ms() -> u64 {
    5000
}

fn default_ethereum_private_key_env() -> String {
    "BRIDGE_ETHEREUM_PRIVATE_KEY".to_string()
}

fn default_api_enabled() -> bool {
    true
}

// ============================================================================
// DERIVED VALUES
// ============================================================================

impl HiveChainConfig {
    /// custom_json id used for token transfers in payout proposals.
    pub fn token_transfer_id(&self) -> String {
        format!("{}token_transfer", self.token_transfer_prefix)
    }

    /// Loads the active key (WIF) from the environment variable.
    pub fn get_active_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.active_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the validator's Hive active key (WIF).",
                self.active_key_env
            )
        })
    }
}

impl EthereumChainConfig {
    /// Loads the Ethereum private key (hex) from the environment variable.
    pub fn get_private_key(&self) -> anyhow::Result<String> {
        std::env::var(&self.private_key_env).map_err(|_| {
            anyhow::anyhow!(
                "Environment variable '{}' not set. Please set it with the validator's Ethereum private key (hex).",
                self.private_key_env
            )
        })
    }

    /// Number of blocks a log must be buried under before it is consumed.
    pub fn finality_depth(&self, environment: Environment) -> u64 {
        match environment {
            Environment::Production => self.confirmations,
            Environment::Development => 0,
        }
    }
}

impl BridgeConfig {
    pub fn fee_rate(&self) -> anyhow::Result<FeeRate> {
        FeeRate::parse_percent(&self.fee_pct).map_err(|e| anyhow::anyhow!("Invalid bridge.fee_pct: {}", e))
    }
}

// ============================================================================
// CONFIGURATION LOADING AND MANAGEMENT
// ============================================================================

impl Config {
    /// Validates the configuration.
    ///
    /// # Returns
    ///
    /// - `Ok(())` - Configuration is valid
    /// - `Err(anyhow::Error)` - A field is missing or malformed
    pub fn validate(&self) -> anyhow::Result<()> {
        url::Url::parse(&self.hive.rpc_url)
            .map_err(|e| anyhow::anyhow!("Configuration error: invalid hive.rpc_url '{}': {}", self.hive.rpc_url, e))?;
        url::Url::parse(&self.ethereum.rpc_url).map_err(|e| {
            anyhow::anyhow!("Configuration error: invalid ethereum.rpc_url '{}': {}", self.ethereum.rpc_url, e)
        })?;

        if self.hive.deposit_account.trim().is_empty() {
            return Err(anyhow::anyhow!("Configuration error: hive.deposit_account must not be empty"));
        }
        if self.hive.custom_json_id.trim().is_empty() {
            return Err(anyhow::anyhow!("Configuration error: hive.custom_json_id must not be empty"));
        }
        if self.validator.username.trim().is_empty() {
            return Err(anyhow::anyhow!("Configuration error: validator.username must not be empty"));
        }
        if self.bridge.token_symbol.trim().is_empty() {
            return Err(anyhow::anyhow!("Configuration error: bridge.token_symbol must not be empty"));
        }

        let chain_id = hex::decode(&self.hive.chain_id)
            .map_err(|e| anyhow::anyhow!("Configuration error: hive.chain_id is not hex: {}", e))?;
        if chain_id.len() != 32 {
            return Err(anyhow::anyhow!(
                "Configuration error: hive.chain_id must be 32 bytes, got {}",
                chain_id.len()
            ));
        }

        if !crate::chain::ethereum::is_address(&self.ethereum.contract_address) {
            return Err(anyhow::anyhow!(
                "Configuration error: ethereum.contract_address '{}' is not an Ethereum address",
                self.ethereum.contract_address
            ));
        }

        if self.ethereum.token_precision > 36 {
            return Err(anyhow::anyhow!(
                "Configuration error: ethereum.token_precision {} exceeds 36",
                self.ethereum.token_precision
            ));
        }

        self.bridge.fee_rate()?;
        Ok(())
    }

    /// Loads configuration from the TOML file.
    ///
    /// This function:
    /// 1. Checks if config/bridge-validator.toml (or BRIDGE_VALIDATOR_CONFIG_PATH) exists
    /// 2. If it exists, loads and parses the configuration
    /// 3. Validates the configuration
    /// 4. If it doesn't exist, returns an error asking user to copy template
    pub fn load() -> anyhow::Result<Self> {
        let config_path = std::env::var("BRIDGE_VALIDATOR_CONFIG_PATH")
            .unwrap_or_else(|_| "config/bridge-validator.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/bridge-validator.template.toml config/bridge-validator.toml\n\
                Then edit config/bridge-validator.toml with your actual values.",
                config_path
            ))
        }
    }

    /// Creates a default configuration with placeholder values.
    ///
    /// Suitable for local development and tests; production deployments must
    /// replace the endpoints, accounts and contract addresses.
    #[allow(clippy::should_implement_trait)]
    pub fn default() -> Self {
        Self {
            environment: Environment::Development,
            hive: HiveChainConfig {
                rpc_url: "http://127.0.0.1:8091".to_string(),
                chain_id: default_hive_chain_id(),
                deposit_account: "bridge-deposit".to_string(),
                custom_json_id: "bridge_validators".to_string(),
                token_transfer_prefix: "sm_".to_string(),
                polling_interval_ms: default_hive_polling_interval_ms(),
                start_block: None,
                active_key_env: default_hive_active_key_env(),
            },
            ethereum: EthereumChainConfig {
                rpc_url: "http://127.0.0.1:8545".to_string(),
                chain_id: 31337,
                contract_address: "0x00000000000000000000000000000000000000aa".to_string(),
                contract_method: default_contract_method(),
                bridge_event: default_bridge_event(),
                token_precision: 18,
                confirmations: default_confirmations(),
                polling_interval_ms: default_ethereum_polling_interval_ms(),
                start_block: None,
                private_key_env: default_ethereum_private_key_env(),
            },
            bridge: BridgeConfig {
                token_symbol: "TOKEN".to_string(),
                fee_pct: "1".to_string(),
            },
            validator: ValidatorConfig {
                username: "validator-one".to_string(),
            },
            storage: StorageConfig::default(),
            api: ApiConfig::default(),
        }
    }
}
