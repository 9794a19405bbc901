//! Bridge Validator Library
//!
//! This crate implements a validator node for a Hive <-> Ethereum token bridge.
//! Validators watch both chains for bridge transfers, rotate a head validator
//! that proposes payouts, countersign proposals after re-validating them
//! against the source chain, and broadcast payouts once the deposit account's
//! signature threshold is met.

pub mod aggregator;
pub mod amount;
pub mod api;
pub mod authority;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod node;
pub mod protocol;
pub mod router;
pub mod store;
pub mod validator;

// Re-export commonly used types
pub use aggregator::{AggregationOutcome, SignatureAggregator};
pub use amount::{Asset, FeeRate, TokenAmount};
pub use authority::{resolve_leader, resolve_threshold, AuthorityInfo, LeaderRotationMonitor};
pub use config::{Config, Environment};
pub use crypto::CryptoService;
pub use error::{BridgeError, ValidationError};
pub use node::{BridgeNode, NodeCore};
pub use protocol::{ControlMessage, InboundMessage};
pub use router::{ConversionEvent, EventRouter, RouteOutcome};
pub use store::{BridgeStore, ConversionRequest, Direction, MemoryStore};
pub use validator::ConversionValidator;
