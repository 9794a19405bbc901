//! Error Taxonomy
//!
//! Errors raised by the bridge core. Adapters and startup code use
//! `anyhow::Result`; everything that makes a decision about a conversion
//! request returns [`BridgeError`] so callers can tell a rejected proposal
//! from a flaky RPC node.

use thiserror::Error;

use crate::amount::TokenAmount;

// ============================================================================
// VALIDATION ERRORS
// ============================================================================

/// A conversion validation rule that a proposal violated.
///
/// Validation is fail-fast: the first violated rule is reported and no
/// signature is produced. These are never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The referenced Ethereum transaction does not call the bridge contract
    #[error("transaction must be sent to the bridge contract {expected}, got {actual}")]
    WrongContract { expected: String, actual: String },

    /// The call data does not invoke the configured bridge method
    #[error("method selector must be {expected}, got {actual}")]
    WrongMethod { expected: String, actual: String },

    /// An operation is not a `custom_json` tagged with the token transfer id
    #[error("operation {index} must be a token transfer custom_json")]
    NotTokenTransfer { index: usize },

    /// An operation's embedded JSON payload could not be parsed
    #[error("operation {index} carries an unparsable payload: {reason}")]
    MalformedPayload { index: usize, reason: String },

    /// Net payout quantity differs from the amount burned on Ethereum
    #[error("amount sent [{expected}] must match proposed amount [{proposed}]")]
    AmountMismatch {
        expected: TokenAmount,
        proposed: TokenAmount,
    },

    /// Proposed token symbol differs from the bridged token
    #[error("proposed transfer currency [{proposed}] does not match expected currency [{expected}]")]
    TokenMismatch { expected: String, proposed: String },

    /// Payout recipient differs from the recipient encoded in the call data
    #[error("recipient on transaction [{expected}] must match proposed recipient [{proposed}]")]
    RecipientMismatch { expected: String, proposed: String },

    /// The proposal does not contain exactly two operations
    #[error("exactly 2 operations allowed, got {0}")]
    OperationCount(usize),

    /// Validator fee quantity differs from the configured fee percentage
    #[error("validator fee [{expected}] does not match proposed fee [{proposed}]")]
    FeeMismatch {
        expected: TokenAmount,
        proposed: TokenAmount,
    },

    /// Fee is paid to someone other than the current head validator
    #[error("proposed transaction sends fee to [{proposed}] instead of head validator [{expected}]")]
    FeeRecipientMismatch { expected: String, proposed: String },

    /// The referenced Hive transaction does not start with a transfer
    #[error("referenced transaction is not a transfer")]
    NotTransfer,

    /// The referenced Hive transfer was not sent to the deposit account
    #[error("recipient [{0}] is not the deposit account")]
    NotDepositAccount(String),

    /// The transfer memo is not a valid Ethereum address
    #[error("memo [{0}] is not an ethereum address")]
    InvalidMemoAddress(String),

    /// The referenced source transaction could not be found on chain
    #[error("reference transaction {0} not found")]
    ReferenceNotFound(String),

    /// A mint-side proposal arrived without a transaction body
    #[error("proposed transaction is required")]
    MissingProposal,

    /// An amount in the referenced transaction could not be interpreted
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

// ============================================================================
// BRIDGE ERRORS
// ============================================================================

/// Top-level error for conversion routing, validation and aggregation.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A conversion validation rule was violated
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Signer outside the authority set, or an unauthorized governance message
    #[error("unauthorized: {0}")]
    Authorization(String),

    /// RPC failure or connection loss; the adapter redelivers
    #[error("chain request failed: {0:#}")]
    TransientChain(anyhow::Error),

    /// Undecodable control message payload
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Concurrent update lost a race on the same reference transaction
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Persistence layer failure
    #[error("storage failure: {0:#}")]
    Storage(anyhow::Error),

    /// The bridge account has no account authorities to rotate through
    #[error("authority list is empty")]
    EmptyAuthoritySet,

    /// An event carried an amount that cannot be represented exactly
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

impl BridgeError {
    /// Whether the error is a local, expected rejection rather than a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BridgeError::Validation(_)
                | BridgeError::Authorization(_)
                | BridgeError::MalformedMessage(_)
        )
    }

    /// Whether redelivering the same input may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::TransientChain(_) | BridgeError::Storage(_))
    }
}
