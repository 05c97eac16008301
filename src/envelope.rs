//! Envelope JSON parsing (part of C8): enforces the exact shape invariants
//! from spec.md sections 3 and 6 before any field is trusted.

use serde_json::Value;
use std::collections::HashSet;

use crate::error::TokenError;
use crate::keys::decode_base64;
use crate::recipient::ProtocolVersion;

/// A parsed, shape-validated envelope. `signature` and the intermediate
/// key's `signatures` are already base64-decoded; `signed_message` stays an
/// opaque string until after signature verification (spec.md section 3).
#[derive(Debug, Clone)]
pub struct Envelope {
    pub protocol_version: ProtocolVersion,
    pub signature: Vec<u8>,
    pub signed_message: String,
    pub intermediate_signing_key: Option<IntermediateSigningKey>,
}

#[derive(Debug, Clone)]
pub struct IntermediateSigningKey {
    /// Raw JSON string; parsed into `{keyValue, keyExpiration, ...}` only
    /// after its signatures verify (spec.md section 4.5).
    pub signed_key: String,
    pub signatures: Vec<Vec<u8>>,
}

pub fn parse(sealed: &str, expected_version: ProtocolVersion) -> Result<Envelope, TokenError> {
    check_no_duplicate_top_level_keys(sealed)?;

    let value: Value = serde_json::from_str(sealed)
        .map_err(|e| TokenError::EnvelopeShape(format!("invalid JSON: {e}")))?;
    let object = value
        .as_object()
        .ok_or_else(|| TokenError::EnvelopeShape("envelope must be a JSON object".into()))?;

    let expected_key_count = match expected_version {
        ProtocolVersion::ECv1 => 3,
        ProtocolVersion::ECv2 => 4,
    };
    if object.len() != expected_key_count {
        return Err(TokenError::EnvelopeShape(format!(
            "expected exactly {expected_key_count} keys for {}, got {}",
            expected_version.as_str(),
            object.len()
        )));
    }

    let protocol_version_field = field_str(object, "protocolVersion")?;
    if protocol_version_field != expected_version.as_str() {
        return Err(TokenError::EnvelopeShape(format!(
            "protocolVersion field is {protocol_version_field}, expected {}",
            expected_version.as_str()
        )));
    }

    let signature = decode_base64(field_str(object, "signature")?)?;
    let signed_message = field_str(object, "signedMessage")?.to_string();

    let intermediate_signing_key = match expected_version {
        ProtocolVersion::ECv1 => None,
        ProtocolVersion::ECv2 => {
            let value = object
                .get("intermediateSigningKey")
                .ok_or_else(|| TokenError::EnvelopeShape("missing intermediateSigningKey".into()))?;
            Some(parse_intermediate_signing_key(value)?)
        }
    };

    Ok(Envelope {
        protocol_version: expected_version,
        signature,
        signed_message,
        intermediate_signing_key,
    })
}

fn parse_intermediate_signing_key(value: &Value) -> Result<IntermediateSigningKey, TokenError> {
    let object = value
        .as_object()
        .ok_or_else(|| TokenError::EnvelopeShape("intermediateSigningKey must be a JSON object".into()))?;
    if object.len() != 2 {
        return Err(TokenError::EnvelopeShape(format!(
            "intermediateSigningKey must have exactly 2 keys, got {}",
            object.len()
        )));
    }

    let signed_key = field_str(object, "signedKey")?.to_string();
    check_no_duplicate_top_level_keys(&signed_key)?;

    let signatures_value = object
        .get("signatures")
        .and_then(Value::as_array)
        .ok_or_else(|| TokenError::EnvelopeShape("intermediateSigningKey.signatures must be an array".into()))?;
    if signatures_value.is_empty() {
        return Err(TokenError::EnvelopeShape("intermediateSigningKey.signatures must not be empty".into()));
    }

    let signatures = signatures_value
        .iter()
        .map(|entry| {
            let s = entry
                .as_str()
                .ok_or_else(|| TokenError::EnvelopeShape("signatures entries must be strings".into()))?;
            decode_base64(s)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(IntermediateSigningKey { signed_key, signatures })
}

fn field_str<'a>(object: &'a serde_json::Map<String, Value>, key: &str) -> Result<&'a str, TokenError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| TokenError::EnvelopeShape(format!("missing or non-string field: {key}")))
}

/// Scan `raw`'s top JSON-object nesting level for a repeated key name.
/// `serde_json::Value` silently keeps the last occurrence of a duplicate
/// key; a conforming sender never emits one, so we treat it as a tamper
/// signal (spec.md section 9: "reject duplicate keys if feasible").
fn check_no_duplicate_top_level_keys(raw: &str) -> Result<(), TokenError> {
    let bytes = raw.as_bytes();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escape = false;
    let mut key_start = 0usize;
    let mut pending_key: Option<String> = None;
    let mut seen = HashSet::new();

    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            if escape {
                escape = false;
            } else if b == b'\\' {
                escape = true;
            } else if b == b'"' {
                in_string = false;
                if depth == 1 && pending_key.is_none() {
                    pending_key = Some(raw[key_start..i].to_string());
                }
            }
        } else {
            match b {
                b'"' => {
                    in_string = true;
                    key_start = i + 1;
                }
                b'{' | b'[' => depth += 1,
                b'}' | b']' => depth -= 1,
                b':' => {
                    if depth == 1 {
                        if let Some(key) = pending_key.take() {
                            if !seen.insert(key.clone()) {
                                return Err(TokenError::EnvelopeShape(format!("duplicate key: {key}")));
                            }
                        }
                    }
                }
                b',' => pending_key = None,
                _ => {}
            }
        }
        i += 1;
    }
    Ok(())
}
