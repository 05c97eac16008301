//! Sender-key provider (C4) and trusted-keys JSON parser (C5).
//!
//! A provider answers "what EC public keys might have signed this, for
//! protocol version V". A `Recipient` carries an ordered list of these and
//! consults them in order; see `recipient::Recipient::verify_any`.

use std::sync::Arc;

use p256::ecdsa::VerifyingKey;
use serde::Deserialize;

use crate::clock::Clock;
use crate::error::TokenError;
use crate::keys::parse_spki_public_key_b64;
use crate::recipient::ProtocolVersion;

/// External collaborator that fetches the Google trusted-keys JSON document
/// (e.g. an HTTP client backed by `GooglePaymentsPublicKeysManager`'s cache).
/// Out of scope per spec.md: the fetcher's own caching/refresh policy.
pub trait KeyFetcher: Send + Sync {
    fn fetch(&self) -> Result<String, TokenError>;
}

/// Polymorphic source of sender verifying keys (spec.md section 4.3).
pub enum SenderKeyProvider {
    /// A fixed list of keys; never fails.
    Literal(Vec<VerifyingKey>),
    /// Parses a trusted-keys JSON document on every call.
    TrustedJson(String),
    /// Delegates to an external fetcher on every call, then parses as above.
    Fetching(Arc<dyn KeyFetcher>),
}

impl SenderKeyProvider {
    /// Return the sender public keys usable for `version`, or a `KeyFetch`
    /// error if none are available (including upstream fetch failures).
    pub fn get(&self, version: ProtocolVersion, clock: &dyn Clock) -> Result<Vec<VerifyingKey>, TokenError> {
        match self {
            SenderKeyProvider::Literal(keys) => Ok(keys.clone()),
            SenderKeyProvider::TrustedJson(json) => parse_trusted_keys(json, version, clock),
            SenderKeyProvider::Fetching(fetcher) => {
                let json = fetcher.fetch()?;
                parse_trusted_keys(&json, version, clock)
            }
        }
    }
}

#[derive(Deserialize)]
struct TrustedKeysDocument {
    keys: Vec<TrustedKeyEntry>,
}

#[derive(Deserialize)]
struct TrustedKeyEntry {
    #[serde(rename = "keyValue")]
    key_value: String,
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    #[serde(rename = "keyExpiration")]
    key_expiration: Option<String>,
}

/// Parse the Google trusted-keys JSON format (spec.md section 3), returning
/// only the keys matching `version` whose `keyExpiration` (if present) is
/// strictly in the future. `keyExpiration` is required for `ECv2`; a missing
/// or malformed expiration excludes that entry rather than failing the whole
/// parse (spec.md: "expired entries are silently skipped" — we treat
/// not-verifiably-unexpired the same way).
pub fn parse_trusted_keys(
    json: &str,
    version: ProtocolVersion,
    clock: &dyn Clock,
) -> Result<Vec<VerifyingKey>, TokenError> {
    let document: TrustedKeysDocument =
        serde_json::from_str(json).map_err(|e| TokenError::KeyFetch(format!("invalid trusted keys JSON: {e}")))?;

    let now = clock.now_millis();
    let mut keys = Vec::new();

    for entry in document.keys {
        if entry.protocol_version != version.as_str() {
            continue;
        }
        match entry.key_expiration.as_deref() {
            Some(expiration) => match expiration.parse::<i64>() {
                Ok(expiration_ms) if expiration_ms > now => {}
                _ => continue,
            },
            None => {
                if version == ProtocolVersion::ECv2 {
                    continue;
                }
            }
        }
        if let Ok(key) = parse_spki_public_key_b64(&entry.key_value) {
            keys.push(key);
        }
    }

    if keys.is_empty() {
        return Err(TokenError::KeyFetch(
            "no trusted keys available for this protocol version".into(),
        ));
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use p256::ecdsa::SigningKey;
    use p256::pkcs8::EncodePublicKey;

    fn sample_key_b64() -> (SigningKey, String) {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let spki = signing_key
            .verifying_key()
            .to_public_key_der()
            .unwrap();
        (signing_key, crate::keys::encode_base64(spki.as_bytes()))
    }

    #[test]
    fn literal_provider_never_errors_and_ignores_version() {
        let (_sk, key_b64) = sample_key_b64();
        let key = parse_spki_public_key_b64(&key_b64).unwrap();
        let provider = SenderKeyProvider::Literal(vec![key]);
        let clock = FixedClock(0);
        assert_eq!(provider.get(ProtocolVersion::ECv1, &clock).unwrap().len(), 1);
        assert_eq!(provider.get(ProtocolVersion::ECv2, &clock).unwrap().len(), 1);
    }

    #[test]
    fn trusted_json_filters_by_version_and_expiration() {
        let (_sk1, key1) = sample_key_b64();
        let (_sk2, key2) = sample_key_b64();
        let json = format!(
            r#"{{"keys":[
                {{"keyValue":"{key1}","protocolVersion":"ECv1","keyExpiration":"99999999999999"}},
                {{"keyValue":"{key2}","protocolVersion":"ECv1","keyExpiration":"1"}}
            ]}}"#
        );
        let provider = SenderKeyProvider::TrustedJson(json);
        let clock = FixedClock(1_000_000);
        let keys = provider.get(ProtocolVersion::ECv1, &clock).unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn ecv1_accepts_missing_expiration_ecv2_does_not() {
        let (_sk, key) = sample_key_b64();
        let json = format!(r#"{{"keys":[{{"keyValue":"{key}","protocolVersion":"ECv1"}}]}}"#);
        let clock = FixedClock(0);

        let provider = SenderKeyProvider::TrustedJson(json.clone());
        assert_eq!(provider.get(ProtocolVersion::ECv1, &clock).unwrap().len(), 1);

        let json_v2 = json.replace("ECv1", "ECv2");
        let provider_v2 = SenderKeyProvider::TrustedJson(json_v2);
        assert!(provider_v2.get(ProtocolVersion::ECv2, &clock).is_err());
    }

    #[test]
    fn malformed_expiration_excludes_the_entry_not_the_whole_parse() {
        let (_sk1, key1) = sample_key_b64();
        let (_sk2, key2) = sample_key_b64();
        let json = format!(
            r#"{{"keys":[
                {{"keyValue":"{key1}","protocolVersion":"ECv1","keyExpiration":"not-a-number"}},
                {{"keyValue":"{key2}","protocolVersion":"ECv1","keyExpiration":"99999999999999"}}
            ]}}"#
        );
        let provider = SenderKeyProvider::TrustedJson(json);
        let clock = FixedClock(0);
        let keys = provider.get(ProtocolVersion::ECv1, &clock).unwrap();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn empty_result_is_a_key_fetch_error() {
        let json = r#"{"keys":[]}"#.to_string();
        let provider = SenderKeyProvider::TrustedJson(json);
        let clock = FixedClock(0);
        assert!(matches!(
            provider.get(ProtocolVersion::ECv1, &clock),
            Err(TokenError::KeyFetch(_))
        ));
    }

    struct FailingFetcher;
    impl KeyFetcher for FailingFetcher {
        fn fetch(&self) -> Result<String, TokenError> {
            Err(TokenError::KeyFetch("network unreachable".into()))
        }
    }

    #[test]
    fn fetching_provider_propagates_fetch_errors() {
        let provider = SenderKeyProvider::Fetching(Arc::new(FailingFetcher));
        let clock = FixedClock(0);
        assert!(provider.get(ProtocolVersion::ECv1, &clock).is_err());
    }
}
