//! User operation request/response models
//!
//! Models for the POST /api/submit_op endpoint. The request body is accepted
//! loosely (every field optional, integers as numbers or strings) so that shape
//! problems surface as a `ValidationError` instead of a body rejection.

use alloy::primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::str::FromStr;

/// A pre-signed user operation, immutable once accepted
///
/// Only `sender` and `nonce` carry meaning for the relay; every other field is
/// passed through to the encoder untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    pub sender: Address,
    pub nonce: U256,
    pub init_code: Bytes,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub signature: Bytes,
    pub paymaster_and_data: Bytes,
}

/// Raw submission body as received over HTTP
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOperationRequest {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub nonce: Option<Box<RawValue>>,
    #[serde(default)]
    pub init_code: Option<String>,
    #[serde(default)]
    pub call_data: Option<String>,
    #[serde(default)]
    pub call_gas_limit: Option<Box<RawValue>>,
    #[serde(default)]
    pub verification_gas_limit: Option<Box<RawValue>>,
    #[serde(default)]
    pub pre_verification_gas: Option<Box<RawValue>>,
    #[serde(default)]
    pub max_fee_per_gas: Option<Box<RawValue>>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<Box<RawValue>>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub paymaster_and_data: Option<String>,
}

/// Response for a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitOperationResponse {
    pub op_hash: String,
}

/// Error body shared by all operation endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Malformed intake input. Nothing is persisted when this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field `{field}`: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl TryFrom<SubmitOperationRequest> for UserOperation {
    type Error = ValidationError;

    fn try_from(req: SubmitOperationRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            sender: parse_address("sender", req.sender)?,
            nonce: parse_quantity("nonce", req.nonce)?,
            init_code: parse_bytes("initCode", req.init_code)?,
            call_data: parse_bytes("callData", req.call_data)?,
            call_gas_limit: parse_quantity("callGasLimit", req.call_gas_limit)?,
            verification_gas_limit: parse_quantity(
                "verificationGasLimit",
                req.verification_gas_limit,
            )?,
            pre_verification_gas: parse_quantity("preVerificationGas", req.pre_verification_gas)?,
            max_fee_per_gas: parse_quantity("maxFeePerGas", req.max_fee_per_gas)?,
            max_priority_fee_per_gas: parse_quantity(
                "maxPriorityFeePerGas",
                req.max_priority_fee_per_gas,
            )?,
            signature: parse_bytes("signature", req.signature)?,
            paymaster_and_data: parse_bytes("paymasterAndData", req.paymaster_and_data)?,
        })
    }
}

fn parse_address(field: &'static str, value: Option<String>) -> Result<Address, ValidationError> {
    let raw = value.ok_or_else(|| ValidationError::new(field, "field is required"))?;
    Address::from_str(raw.trim())
        .map_err(|e| ValidationError::new(field, format!("not a 20-byte hex address: {}", e)))
}

fn parse_bytes(field: &'static str, value: Option<String>) -> Result<Bytes, ValidationError> {
    let raw = value.ok_or_else(|| ValidationError::new(field, "field is required"))?;
    let raw = raw.trim();
    if !raw.starts_with("0x") {
        return Err(ValidationError::new(field, "hex data must start with 0x"));
    }
    Bytes::from_str(raw).map_err(|e| ValidationError::new(field, format!("invalid hex data: {}", e)))
}

/// Accepts a JSON number or a decimal / 0x-hex string that fits in 256 bits
///
/// Numbers are read from their raw JSON text, so values past `u64::MAX` (192-bit
/// key nonces) keep full precision.
fn parse_quantity(field: &'static str, value: Option<Box<RawValue>>) -> Result<U256, ValidationError> {
    let invalid = || ValidationError::new(field, "must be a non-negative integer");

    let raw = match value {
        Some(raw) if raw.get().trim() != "null" => raw,
        _ => return Err(ValidationError::new(field, "field is required")),
    };
    let text = raw.get().trim();

    if text.starts_with('"') {
        let s: String = serde_json::from_str(text).map_err(|_| invalid())?;
        let s = s.trim();
        if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
            return Err(invalid());
        }
        return U256::from_str(s).map_err(|_| invalid());
    }

    // Plain integer literal only: no sign, fraction or exponent
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    U256::from_str_radix(text, 10).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn valid_body() -> Value {
        json!({
            "sender": "0x00000000000000000000000000000000000000aa",
            "nonce": 0,
            "initCode": "0x",
            "callData": "0xb61d27f6",
            "callGasLimit": 100000,
            "verificationGasLimit": "100000",
            "preVerificationGas": "0x5208",
            "maxFeePerGas": 2000000000u64,
            "maxPriorityFeePerGas": 1000000000u64,
            "signature": "0x1234",
            "paymasterAndData": "0x"
        })
    }

    fn parse(body: Value) -> Result<UserOperation, ValidationError> {
        let req: SubmitOperationRequest = serde_json::from_value(body).unwrap();
        UserOperation::try_from(req)
    }

    #[test]
    fn test_valid_operation_parses() {
        let op = parse(valid_body()).unwrap();
        assert_eq!(op.nonce, U256::ZERO);
        assert_eq!(op.verification_gas_limit, U256::from(100_000u64));
        assert_eq!(op.pre_verification_gas, U256::from(21_000u64));
        assert_eq!(op.call_data.as_ref(), &[0xb6, 0x1d, 0x27, 0xf6]);
        assert!(op.init_code.is_empty());
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let mut body = valid_body();
        body.as_object_mut().unwrap().remove("signature");
        let err = parse(body).unwrap_err();
        assert_eq!(err.field, "signature");
    }

    #[test]
    fn test_negative_gas_is_rejected() {
        let mut body = valid_body();
        body["callGasLimit"] = json!(-1);
        assert_eq!(parse(body).unwrap_err().field, "callGasLimit");

        let mut body = valid_body();
        body["maxFeePerGas"] = json!("-5");
        assert_eq!(parse(body).unwrap_err().field, "maxFeePerGas");
    }

    #[test]
    fn test_fractional_and_non_numeric_quantities_are_rejected() {
        let mut body = valid_body();
        body["nonce"] = json!(1.5);
        assert_eq!(parse(body).unwrap_err().field, "nonce");

        let mut body = valid_body();
        body["preVerificationGas"] = json!(true);
        assert_eq!(parse(body).unwrap_err().field, "preVerificationGas");
    }

    #[test]
    fn test_quantities_past_u64_keep_precision() {
        let body = valid_body().to_string().replacen(
            "\"nonce\":0",
            "\"nonce\":18446744073709551616",
            1,
        );
        let req: SubmitOperationRequest = serde_json::from_str(&body).unwrap();
        let op = UserOperation::try_from(req).unwrap();
        assert_eq!(op.nonce, U256::from(u64::MAX) + U256::from(1u64));

        // 192-bit key in the high bits, sequence 5 in the low 64
        let key_nonce = (U256::from(1u64) << 200usize) + U256::from(5u64);
        let body = valid_body()
            .to_string()
            .replacen("\"nonce\":0", &format!("\"nonce\":{}", key_nonce), 1);
        let req: SubmitOperationRequest = serde_json::from_str(&body).unwrap();
        assert_eq!(UserOperation::try_from(req).unwrap().nonce, key_nonce);
    }

    #[test]
    fn test_number_past_256_bits_or_in_exponent_form_is_rejected() {
        let too_big = format!("{}0", U256::MAX);
        let body = valid_body()
            .to_string()
            .replacen("\"nonce\":0", &format!("\"nonce\":{}", too_big), 1);
        let req: SubmitOperationRequest = serde_json::from_str(&body).unwrap();
        assert_eq!(UserOperation::try_from(req).unwrap_err().field, "nonce");

        let body = valid_body()
            .to_string()
            .replacen("\"callGasLimit\":100000", "\"callGasLimit\":1e5", 1);
        let req: SubmitOperationRequest = serde_json::from_str(&body).unwrap();
        assert_eq!(UserOperation::try_from(req).unwrap_err().field, "callGasLimit");
    }

    #[test]
    fn test_bad_sender_is_rejected() {
        let mut body = valid_body();
        body["sender"] = json!("0xAA");
        assert_eq!(parse(body).unwrap_err().field, "sender");
    }

    #[test]
    fn test_bytes_require_hex_prefix() {
        let mut body = valid_body();
        body["paymasterAndData"] = json!("deadbeef");
        assert_eq!(parse(body).unwrap_err().field, "paymasterAndData");
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let op = parse(valid_body()).unwrap();
        let value = serde_json::to_value(&op).unwrap();
        assert!(value.get("maxPriorityFeePerGas").is_some());
        assert!(value.get("paymasterAndData").is_some());
        let back: UserOperation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }
}
