//! Unit tests for the Hive JSON-RPC client
//!
//! These tests run the client against a mock condenser_api node.

use bridge_validator::chain::hive_serializer;
use bridge_validator::chain::{ControlTransport, HiveChain, HiveRpcClient, HiveTransaction};
use bridge_validator::crypto;
use bridge_validator::protocol::{ControlMessage, ValidatorNomination};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[path = "mod.rs"]
mod test_helpers;

use test_helpers::{
    build_test_config_with_rpc, create_hive_transfer, TestValidator, DEPOSIT_ACCOUNT,
    DUMMY_HIVE_TX_ID, VALIDATOR_ONE,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Setup a mock Hive node and a client signing as validator-one
async fn setup_mock_server() -> (MockServer, HiveRpcClient, TestValidator) {
    let mock_server = MockServer::start().await;
    let config = build_test_config_with_rpc(&mock_server.uri(), "http://127.0.0.1:1");
    let validator = TestValidator::new(VALIDATOR_ONE, 1);
    let client =
        HiveRpcClient::new(&config, validator.crypto.clone()).expect("Failed to create HiveRpcClient");
    (mock_server, client, validator)
}

fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "result": result
    }))
}

async fn mount_global_properties(mock_server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "condenser_api.get_dynamic_global_properties"})))
        .respond_with(rpc_result(json!({
            "head_block_number": 0x0001_2345,
            "head_block_id": "0001234500112233445566778899aabbccddeeff",
            "last_irreversible_block_num": 0x0001_2330,
            "time": "2024-03-01T12:00:00"
        })))
        .mount(mock_server)
        .await;
}

// ============================================================================
// QUERY TESTS
// ============================================================================

/// Test that blocks carry the requested height
/// Why: condenser_api.get_block omits the block number
#[tokio::test]
async fn test_get_block() {
    let (mock_server, client, _) = setup_mock_server().await;
    let transaction = create_hive_transfer(DEPOSIT_ACCOUNT, "5.000 HIVE", "0xabc");

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "condenser_api.get_block", "params": [100]})))
        .respond_with(rpc_result(json!({
            "block_id": "00000064aa",
            "timestamp": "2024-03-01T12:00:00",
            "witness": "someone",
            "transactions": [transaction],
            "transaction_ids": [DUMMY_HIVE_TX_ID]
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "condenser_api.get_block"})))
        .respond_with(rpc_result(serde_json::Value::Null))
        .mount(&mock_server)
        .await;

    let block = client.get_block(100).await.unwrap().expect("block exists");
    assert_eq!(block.block_num, 100);
    assert_eq!(block.transaction_id(0), Some(DUMMY_HIVE_TX_ID));
    let transfer = block.transactions[0].operations[0].as_transfer().unwrap();
    assert_eq!(transfer.to, DEPOSIT_ACCOUNT);

    assert!(client.get_block(101).await.unwrap().is_none());
}

/// Test that the head and irreversible heights are read
#[tokio::test]
async fn test_get_dynamic_global_properties() {
    let (mock_server, client, _) = setup_mock_server().await;
    mount_global_properties(&mock_server).await;

    let props = client.get_dynamic_global_properties().await.unwrap();
    assert_eq!(props.head_block_number, 0x0001_2345);
    assert_eq!(props.last_irreversible_block_num, 0x0001_2330);
}

/// Test that an unknown transaction is reported as absent, not as a failure
/// What is tested: get_transaction against the node's "Unknown Transaction" error
/// Why: Validators look up references that may not exist; that is a rejection, not an outage
#[tokio::test]
async fn test_get_transaction_unknown() {
    let (mock_server, client, _) = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "condenser_api.get_transaction"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32000, "message": "Assert Exception: Unknown Transaction 1234"}
        })))
        .mount(&mock_server)
        .await;

    assert!(client.get_transaction("1234").await.unwrap().is_none());
}

/// Test that other RPC errors are propagated
#[tokio::test]
async fn test_get_transaction_error() {
    let (mock_server, client, _) = setup_mock_server().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32603, "message": "Internal Error"}
        })))
        .mount(&mock_server)
        .await;

    assert!(client.get_transaction(DUMMY_HIVE_TX_ID).await.is_err());
}

/// Test that a known transaction is returned with its operations
#[tokio::test]
async fn test_get_transaction_found() {
    let (mock_server, client, _) = setup_mock_server().await;
    let transaction = create_hive_transfer(DEPOSIT_ACCOUNT, "5.000 HIVE", "0xabc");

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "condenser_api.get_transaction",
            "params": [DUMMY_HIVE_TX_ID]
        })))
        .respond_with(rpc_result(serde_json::to_value(&transaction).unwrap()))
        .mount(&mock_server)
        .await;

    let found = client.get_transaction(DUMMY_HIVE_TX_ID).await.unwrap().unwrap();
    assert_eq!(found, transaction);
}

/// Test that accounts are read with their active authority
#[tokio::test]
async fn test_get_account() {
    let (mock_server, client, validator) = setup_mock_server().await;

    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "condenser_api.get_accounts",
            "params": [[VALIDATOR_ONE]]
        })))
        .respond_with(rpc_result(json!([{
            "name": VALIDATOR_ONE,
            "balance": "1.000 HIVE",
            "active": {
                "weight_threshold": 1,
                "account_auths": [],
                "key_auths": [[validator.public_key_string(), 1]]
            }
        }])))
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "condenser_api.get_accounts"})))
        .respond_with(rpc_result(json!([])))
        .mount(&mock_server)
        .await;

    let account = client.get_account(VALIDATOR_ONE).await.unwrap().unwrap();
    assert_eq!(account, validator.account());
    assert!(client.get_account("nobody").await.unwrap().is_none());
}

// ============================================================================
// TRANSACTION TESTS
// ============================================================================

/// Test that prepared transactions reference the head block
/// What is tested: ref_block_num and ref_block_prefix from the head block id
/// Why: Hive rejects transactions with a mismatched TaPoS reference
#[tokio::test]
async fn test_prepare_transaction() {
    let (mock_server, client, _) = setup_mock_server().await;
    mount_global_properties(&mock_server).await;

    let transaction = client.prepare_transaction(Vec::new()).await.unwrap();
    assert_eq!(transaction.ref_block_num, 0x2345);
    assert_eq!(transaction.ref_block_prefix, 0x3322_1100);
    assert!(transaction.signatures.is_empty());
    assert!(chrono::NaiveDateTime::parse_from_str(&transaction.expiration, "%Y-%m-%dT%H:%M:%S").is_ok());
}

/// Test that control messages are published as signed custom_json transactions
/// What is tested: ControlTransport::send against the mock node
/// Why: Peers only accept control messages authorised by the sending validator
#[tokio::test]
async fn test_send_control_message() {
    let (mock_server, client, validator) = setup_mock_server().await;
    mount_global_properties(&mock_server).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "condenser_api.broadcast_transaction"})))
        .respond_with(rpc_result(json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let message = ControlMessage::ProposeNewValidator(ValidatorNomination {
        username: "newcomer".to_string(),
    });
    let transaction_id = client.send(&message).await.unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    let broadcast = requests
        .iter()
        .filter_map(|request| serde_json::from_slice::<serde_json::Value>(&request.body).ok())
        .find(|body| body["method"] == "condenser_api.broadcast_transaction")
        .expect("broadcast request sent");
    let sent: HiveTransaction = serde_json::from_value(broadcast["params"][0].clone()).unwrap();

    assert_eq!(hive_serializer::transaction_id(&sent).unwrap(), transaction_id);
    let operation = sent.operations[0].as_custom_json().unwrap();
    assert_eq!(operation.id, "bridge_validators");
    assert_eq!(operation.required_auths, vec![VALIDATOR_ONE.to_string()]);

    assert_eq!(sent.signatures.len(), 1);
    let chain_id = hex::decode(&build_test_config_with_rpc("", "").hive.chain_id).unwrap();
    let digest = hive_serializer::transaction_digest(&chain_id, &sent.unsigned()).unwrap();
    let signer = crypto::recover_hive_public_key(&digest, &sent.signatures[0]).unwrap();
    assert_eq!(signer, validator.crypto.hive_public_key());
}
