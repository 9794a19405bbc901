//! Authority Resolution
//!
//! Pure functions over the deposit account's on-chain active authority: who the
//! head validator is at a given block height, and how many validator signatures
//! a payout needs. Nothing here is cached; callers fetch the account fresh for
//! every decision because the authority can change between epochs.

use crate::chain::{HiveAccount, HiveChain};
use crate::error::BridgeError;

pub mod rotation;

pub use rotation::{LeaderRotationMonitor, RotationEvent};

/// Blocks per head validator epoch.
pub const ROTATION_EPOCH_BLOCKS: u64 = 5000;

/// Blocks between heartbeat log lines.
pub const HEARTBEAT_BLOCKS: u64 = 1000;

/// Signing requirements of the deposit account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityInfo {
    /// Active authority weight threshold
    pub threshold: u32,
    /// Weight carried by a single authority
    pub weight_per_authority: u32,
    /// `threshold / weight_per_authority`, floored
    pub required_signatures: usize,
    /// Accounts allowed to sign for the deposit account
    pub auths: Vec<String>,
}

impl AuthorityInfo {
    pub fn contains(&self, identity: &str) -> bool {
        self.auths.iter().any(|auth| auth == identity)
    }

    /// Upper bound on signatures collected per request.
    pub fn max_signatures(&self) -> usize {
        self.auths.len()
    }
}

/// Head validator at `block_height`: `authorities[(block_height / 5000) % len]`.
pub fn resolve_leader(block_height: u64, authorities: &[String]) -> Result<String, BridgeError> {
    if authorities.is_empty() {
        return Err(BridgeError::EmptyAuthoritySet);
    }
    let epoch = block_height / ROTATION_EPOCH_BLOCKS;
    let index = (epoch % authorities.len() as u64) as usize;
    Ok(authorities[index].clone())
}

/// Account authorities of the active authority, in on-chain order.
pub fn account_authorities(account: &HiveAccount) -> Vec<String> {
    account
        .active
        .account_auths
        .iter()
        .map(|(name, _)| name.clone())
        .collect()
}

/// Derives the signing requirements from an account's active authority.
///
/// The weight of one authority is taken from the first account authority,
/// falling back to the first key authority.
pub fn resolve_threshold(account: &HiveAccount) -> Result<AuthorityInfo, BridgeError> {
    let active = &account.active;
    let weight_per_authority = active
        .account_auths
        .first()
        .or_else(|| active.key_auths.first())
        .map(|(_, weight)| *weight)
        .ok_or(BridgeError::EmptyAuthoritySet)?;

    if weight_per_authority == 0 {
        return Err(BridgeError::Authorization(format!(
            "account {} has a zero-weight authority",
            account.name
        )));
    }

    Ok(AuthorityInfo {
        threshold: active.weight_threshold,
        weight_per_authority,
        required_signatures: (active.weight_threshold / weight_per_authority) as usize,
        auths: account_authorities(account),
    })
}

/// Fetches `account_name` and returns its account, failing when it does not exist.
pub async fn fetch_account(hive: &dyn HiveChain, account_name: &str) -> Result<HiveAccount, BridgeError> {
    hive.get_account(account_name)
        .await
        .map_err(BridgeError::TransientChain)?
        .ok_or_else(|| {
            BridgeError::TransientChain(anyhow::anyhow!("account {} not found", account_name))
        })
}

/// Fetches the deposit account and resolves its signing requirements.
pub async fn fetch_authority_info(
    hive: &dyn HiveChain,
    deposit_account: &str,
) -> Result<AuthorityInfo, BridgeError> {
    let account = fetch_account(hive, deposit_account).await?;
    resolve_threshold(&account)
}
