//! Unit tests for fixed-point token amounts and fee splitting

use bridge_validator::amount::{Asset, FeeRate, TokenAmount};
use bridge_validator::error::BridgeError;
use ethereum_types::U256;

// ============================================================================
// TOKEN AMOUNT TESTS
// ============================================================================

/// Test that decimal strings parse into thousandths
/// What is tested: parse_decimal with whole, partial and padded fractions
/// Why: Hive quantities are compared exactly, so "99", "99.0" and "99.000" must agree
#[test]
fn test_parse_decimal() {
    assert_eq!(TokenAmount::parse_decimal("99").unwrap().milli(), 99_000);
    assert_eq!(TokenAmount::parse_decimal("99.5").unwrap().milli(), 99_500);
    assert_eq!(TokenAmount::parse_decimal("0.001").unwrap().milli(), 1);
    assert_eq!(TokenAmount::parse_decimal("1.250000").unwrap().milli(), 1_250);
}

/// Test that malformed or over-precise decimals are rejected
/// What is tested: parse_decimal error paths
/// Why: Parsing must never silently round a proposed quantity
#[test]
fn test_parse_decimal_rejects_invalid() {
    for value in ["", "-1", "1.2.3", "abc", ".5", "1.0001"] {
        assert!(
            matches!(TokenAmount::parse_decimal(value), Err(BridgeError::InvalidAmount(_))),
            "'{}' should be rejected",
            value
        );
    }
}

/// Test that amounts always render with three decimals
/// Why: Token transfer payloads carry quantities in this exact form
#[test]
fn test_display_three_decimals() {
    assert_eq!(TokenAmount::from_milli(99_000).to_string(), "99.000");
    assert_eq!(TokenAmount::from_milli(1).to_string(), "0.001");
    assert_eq!(TokenAmount::from_milli(0).to_string(), "0.000");
}

/// Test that amounts serialize as strings
/// What is tested: serde representation inside a JSON payload
/// Why: The token transfer `qty` field is a string on the wire
#[test]
fn test_serde_as_string() {
    let json = serde_json::to_string(&TokenAmount::from_milli(1_500)).unwrap();
    assert_eq!(json, "\"1.500\"");
    let parsed: TokenAmount = serde_json::from_str("\"1.5\"").unwrap();
    assert_eq!(parsed, TokenAmount::from_milli(1_500));
}

/// Test conversion from Ethereum base units with half-up rounding
/// What is tested: from_base_units at 18 decimals
/// Why: The payout is derived from the burned amount; rounding must be deterministic
#[test]
fn test_from_base_units_rounds_half_up() {
    let exact = U256::from(100u64) * U256::exp10(18);
    assert_eq!(TokenAmount::from_base_units(exact, 18).unwrap().milli(), 100_000);

    let half = U256::from(1_234_500_000_000_000_000u64);
    assert_eq!(TokenAmount::from_base_units(half, 18).unwrap().milli(), 1_235);

    let below_half = U256::from(1_234_499_999_999_999_999u64);
    assert_eq!(TokenAmount::from_base_units(below_half, 18).unwrap().milli(), 1_234);
}

/// Test conversion for tokens with fewer than three decimals
/// Why: Low-precision tokens scale up instead of rounding
#[test]
fn test_from_base_units_low_precision() {
    assert_eq!(TokenAmount::from_base_units(U256::from(150u64), 2).unwrap().milli(), 1_500);
    assert_eq!(TokenAmount::from_base_units(U256::from(7u64), 0).unwrap().milli(), 7_000);
}

/// Test conversion into Ethereum base units
/// What is tested: to_base_units for high and low precision tokens
/// Why: Withdrawal signatures commit to the exact base unit amount
#[test]
fn test_to_base_units() {
    let amount = TokenAmount::parse_decimal("50.000").unwrap();
    assert_eq!(
        amount.to_base_units(18).unwrap(),
        U256::from(50u64) * U256::exp10(18)
    );
    assert_eq!(amount.to_base_units(0).unwrap(), U256::from(50u64));

    let fractional = TokenAmount::parse_decimal("0.5").unwrap();
    assert!(fractional.to_base_units(0).is_err(), "0.5 has no 0-decimal representation");
}

/// Test that amounts too large for the fixed-point range are rejected
/// Why: Overflow must surface as an error rather than a wrapped quantity
#[test]
fn test_from_base_units_overflow() {
    assert!(TokenAmount::from_base_units(U256::MAX, 3).is_err());
}

// ============================================================================
// ASSET TESTS
// ============================================================================

/// Test that Hive asset strings parse into amount and symbol
/// Why: Deposit transfers carry their amount as "<number> <symbol>"
#[test]
fn test_asset_parse() {
    let asset = Asset::parse("50.000 HIVE").unwrap();
    assert_eq!(asset.amount.milli(), 50_000);
    assert_eq!(asset.symbol, "HIVE");
    assert_eq!(asset.to_string(), "50.000 HIVE");

    assert!(Asset::parse("50.000").is_err());
    assert!(Asset::parse("50.000 HIVE extra").is_err());
}

// ============================================================================
// FEE RATE TESTS
// ============================================================================

/// Test that a 1% fee on 100 tokens splits into 99 and 1
/// What is tested: FeeRate::split for the default fee
/// Why: Proposals and validators must agree on both legs of the payout
#[test]
fn test_split_one_percent() {
    let rate = FeeRate::parse_percent("1").unwrap();
    let (net, fee) = rate.split(TokenAmount::from_milli(100_000));
    assert_eq!(net.to_string(), "99.000");
    assert_eq!(fee.to_string(), "1.000");
}

/// Test that the split always conserves the total
/// What is tested: net + fee == amount across awkward amounts and rates
/// Why: No thousandth may be created or lost by fee rounding
#[test]
fn test_split_conserves_total() {
    for rate in ["0", "0.25", "1", "2.5", "33.33"] {
        let rate = FeeRate::parse_percent(rate).unwrap();
        for milli in [1u64, 7, 999, 1_001, 123_457, 10_000_000_001] {
            let (net, fee) = rate.split(TokenAmount::from_milli(milli));
            assert_eq!(net.milli() + fee.milli(), milli, "rate {} amount {}", rate, milli);
        }
    }
}

/// Test fee percentage parsing and display
/// What is tested: parse_percent bounds and the Display form used in fee memos
/// Why: The memo "<fee>% fee for <ref>" is part of the signed proposal
#[test]
fn test_fee_rate_parse_and_display() {
    assert_eq!(FeeRate::parse_percent("1").unwrap().basis_points(), 100);
    assert_eq!(FeeRate::parse_percent("0.5").unwrap().to_string(), "0.5");
    assert_eq!(FeeRate::parse_percent("0.25").unwrap().to_string(), "0.25");
    assert_eq!(FeeRate::parse_percent("1").unwrap().to_string(), "1");

    assert!(FeeRate::parse_percent("100").is_err());
    assert!(FeeRate::parse_percent("0.125").is_err());
    assert!(FeeRate::parse_percent("-1").is_err());
}
