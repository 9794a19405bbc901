//! Validator Control Protocol
//!
//! Validators coordinate through `custom_json` operations on Hive. Each
//! operation carries an envelope `{"name": <message name>, "data": <JSON string>}`
//! and is authorised by the sending validator (`required_auths[0]`).
//!
//! Decoding produces a typed [`ControlMessage`] or a `MalformedMessage` /
//! `Authorization` error; callers log and drop those, never abort.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::chain::{CustomJsonOperation, HiveBlock, HiveTransaction};
use crate::error::BridgeError;
use crate::store::Direction;

// ============================================================================
// MESSAGE TYPES
// ============================================================================

/// A head validator's proposal for a conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedTransaction {
    /// Destination chain
    pub chain: Direction,
    pub reference_transaction: String,
    /// Unsigned payout transaction; absent for withdrawals to Ethereum
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_embedded_transaction",
        deserialize_with = "deserialize_embedded_transaction"
    )]
    pub transaction: Option<HiveTransaction>,
}

/// A validator's signature over a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureMessage {
    pub chain: Direction,
    pub reference_transaction: String,
    /// Id of the Hive transaction that carried the proposal
    pub proposal_transaction: String,
    pub signature: String,
}

/// Governance payload naming a validator account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorNomination {
    pub username: String,
}

/// Every control message validators exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    ProposedTransaction(ProposedTransaction),
    Signature(SignatureMessage),
    /// Accepted only when authorised by the deposit account
    WhitelistValidator(ValidatorNomination),
    ProposeNewValidator(ValidatorNomination),
    ProposeValidatorRemoval(ValidatorNomination),
    /// Free-form network status, logged only
    NetworkState(serde_json::Value),
}

impl ControlMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::ProposedTransaction(_) => "proposed_transaction",
            ControlMessage::Signature(_) => "signature",
            ControlMessage::WhitelistValidator(_) => "whitelist_validator",
            ControlMessage::ProposeNewValidator(_) => "propose_new_validator",
            ControlMessage::ProposeValidatorRemoval(_) => "propose_validator_removal",
            ControlMessage::NetworkState(_) => "network_state",
        }
    }

    /// Messages sharing a key must be handled in order; different keys are independent.
    pub fn ordering_key(&self) -> &str {
        match self {
            ControlMessage::ProposedTransaction(m) => &m.reference_transaction,
            ControlMessage::Signature(m) => &m.reference_transaction,
            ControlMessage::WhitelistValidator(m)
            | ControlMessage::ProposeNewValidator(m)
            | ControlMessage::ProposeValidatorRemoval(m) => &m.username,
            ControlMessage::NetworkState(_) => "",
        }
    }

    fn data(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            ControlMessage::ProposedTransaction(m) => serde_json::to_value(m),
            ControlMessage::Signature(m) => serde_json::to_value(m),
            ControlMessage::WhitelistValidator(m)
            | ControlMessage::ProposeNewValidator(m)
            | ControlMessage::ProposeValidatorRemoval(m) => serde_json::to_value(m),
            ControlMessage::NetworkState(v) => Ok(v.clone()),
        }
    }
}

/// A decoded message together with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Authorising account of the carrying operation
    pub sender: String,
    /// Id of the Hive transaction that carried the message
    pub transaction_id: String,
    pub block_num: u64,
    pub message: ControlMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    name: String,
    data: String,
}

fn serialize_embedded_transaction<S: Serializer>(
    transaction: &Option<HiveTransaction>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match transaction {
        Some(tx) => {
            let encoded = serde_json::to_string(tx).map_err(serde::ser::Error::custom)?;
            serializer.serialize_str(&encoded)
        }
        None => serializer.serialize_none(),
    }
}

/// Accepts the transaction either as a JSON object or as a JSON-encoded string.
fn deserialize_embedded_transaction<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<HiveTransaction>, D::Error> {
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    match raw {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

// ============================================================================
// ENCODING / DECODING
// ============================================================================

/// Encodes a message into the `custom_json` envelope string.
pub fn encode(message: &ControlMessage) -> anyhow::Result<String> {
    let data = serde_json::to_string(&message.data()?)?;
    Ok(serde_json::to_string(&Envelope {
        name: message.name().to_string(),
        data,
    })?)
}

/// Decodes the message payload for a message name.
pub fn decode(name: &str, data: &str) -> Result<ControlMessage, BridgeError> {
    fn parse<T: serde::de::DeserializeOwned>(name: &str, data: &str) -> Result<T, BridgeError> {
        serde_json::from_str(data)
            .map_err(|e| BridgeError::MalformedMessage(format!("{} payload: {}", name, e)))
    }

    Ok(match name {
        "proposed_transaction" => ControlMessage::ProposedTransaction(parse(name, data)?),
        "signature" => ControlMessage::Signature(parse(name, data)?),
        "whitelist_validator" => ControlMessage::WhitelistValidator(parse(name, data)?),
        "propose_new_validator" => ControlMessage::ProposeNewValidator(parse(name, data)?),
        "propose_validator_removal" => ControlMessage::ProposeValidatorRemoval(parse(name, data)?),
        "network_state" => ControlMessage::NetworkState(parse(name, data)?),
        other => {
            return Err(BridgeError::MalformedMessage(format!(
                "unknown message name '{}'",
                other
            )))
        }
    })
}

/// Decodes a `custom_json` operation into an inbound message.
///
/// Returns `Ok(None)` for operations outside the control channel. Whitelist
/// messages not authorised by `governance_account` are rejected.
pub fn decode_operation(
    operation: &CustomJsonOperation,
    transaction_id: &str,
    block_num: u64,
    custom_json_id: &str,
    governance_account: &str,
) -> Result<Option<InboundMessage>, BridgeError> {
    if operation.id != custom_json_id {
        return Ok(None);
    }
    let Some(sender) = operation.required_auths.first() else {
        return Ok(None);
    };

    let envelope: Envelope = serde_json::from_str(&operation.json)
        .map_err(|e| BridgeError::MalformedMessage(format!("envelope: {}", e)))?;
    let message = decode(&envelope.name, &envelope.data)?;

    if matches!(message, ControlMessage::WhitelistValidator(_)) && sender != governance_account {
        return Err(BridgeError::Authorization(format!(
            "whitelist_validator from {} instead of {}",
            sender, governance_account
        )));
    }

    Ok(Some(InboundMessage {
        sender: sender.clone(),
        transaction_id: transaction_id.to_string(),
        block_num,
        message,
    }))
}

/// Extracts every control message in a block, in block order.
///
/// Undecodable or unauthorised messages are logged and skipped.
pub fn extract_messages(
    block: &HiveBlock,
    custom_json_id: &str,
    governance_account: &str,
) -> Vec<InboundMessage> {
    let mut messages = Vec::new();

    for (index, transaction) in block.transactions.iter().enumerate() {
        let Some(transaction_id) = block.transaction_id(index) else {
            warn!(
                block_num = block.block_num,
                index, "Skipping control messages of a transaction without id"
            );
            continue;
        };
        for operation in &transaction.operations {
            let Some(custom_json) = operation.as_custom_json() else {
                continue;
            };
            match decode_operation(
                &custom_json,
                transaction_id,
                block.block_num,
                custom_json_id,
                governance_account,
            ) {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => {}
                Err(e) => warn!(
                    block_num = block.block_num,
                    transaction_id, "Dropping control message: {}", e
                ),
            }
        }
    }

    messages
}
