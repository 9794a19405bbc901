//! Hive binary transaction serialization.
//!
//! Only the operations the validator itself signs are supported: `custom_json`
//! (operation id 18). Everything is little-endian, strings and arrays are
//! prefixed with an unsigned LEB128 length.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};

use crate::chain::hive::{HiveOperation, HiveTransaction};

/// Layout of `HiveTransaction::expiration`.
pub const EXPIRATION_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

const CUSTOM_JSON_OPERATION_ID: u64 = 18;

/// Serializes the signed part of a transaction (signatures excluded).
pub fn serialize_transaction(transaction: &HiveTransaction) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(&transaction.ref_block_num.to_le_bytes());
    out.extend_from_slice(&transaction.ref_block_prefix.to_le_bytes());
    out.extend_from_slice(&expiration_seconds(&transaction.expiration)?.to_le_bytes());

    write_varint(&mut out, transaction.operations.len() as u64);
    for operation in &transaction.operations {
        write_operation(&mut out, operation)?;
    }

    if !transaction.extensions.is_empty() {
        return Err(anyhow::anyhow!("Transaction extensions are not supported"));
    }
    write_varint(&mut out, 0);
    Ok(out)
}

/// sha256(chain_id || serialized transaction)
pub fn transaction_digest(chain_id: &[u8], transaction: &HiveTransaction) -> Result<[u8; 32]> {
    let serialized = serialize_transaction(transaction)?;
    let mut hasher = Sha256::new();
    hasher.update(chain_id);
    hasher.update(&serialized);
    Ok(hasher.finalize().into())
}

/// Transaction id: first 20 bytes of sha256(serialized transaction), hex.
pub fn transaction_id(transaction: &HiveTransaction) -> Result<String> {
    let serialized = serialize_transaction(transaction)?;
    let hash = Sha256::digest(&serialized);
    Ok(hex::encode(&hash[..20]))
}

fn expiration_seconds(expiration: &str) -> Result<u32> {
    let parsed = NaiveDateTime::parse_from_str(expiration, EXPIRATION_FORMAT)
        .with_context(|| format!("Invalid expiration '{}'", expiration))?;
    u32::try_from(parsed.and_utc().timestamp())
        .with_context(|| format!("Expiration '{}' out of range", expiration))
}

fn write_operation(out: &mut Vec<u8>, operation: &HiveOperation) -> Result<()> {
    let Some(custom_json) = operation.as_custom_json() else {
        return Err(anyhow::anyhow!(
            "Serialization of '{}' operations is not supported",
            operation.name()
        ));
    };

    write_varint(out, CUSTOM_JSON_OPERATION_ID);
    write_string_array(out, &custom_json.required_auths);
    write_string_array(out, &custom_json.required_posting_auths);
    write_string(out, &custom_json.id);
    write_string(out, &custom_json.json);
    Ok(())
}

fn write_string_array(out: &mut Vec<u8>, values: &[String]) {
    write_varint(out, values.len() as u64);
    for value in values {
        write_string(out, value);
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    write_varint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}
