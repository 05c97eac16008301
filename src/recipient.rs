//! Recipient configuration and the unsealing pipeline (C8): the component
//! that ties envelope parsing, signature verification, decryption, and
//! expiration checking into `Recipient::unseal`.

use std::sync::Arc;

use p256::ecdsa::VerifyingKey;
use serde::Deserialize;

use crate::clock::{Clock, SystemClock};
use crate::ecdsa;
use crate::envelope::{self, IntermediateSigningKey};
use crate::error::TokenError;
use crate::hybrid::{HybridDecrypter, RecipientKem};
use crate::keys::{parse_pkcs8_private_key_b64, parse_spki_public_key_b64};
use crate::length_value::encode;
use crate::sender_keys::{KeyFetcher, SenderKeyProvider};

/// Bound to the literal ASCII bytes Google uses as HKDF `info` for both
/// protocol versions (spec.md section 4.4 and the resolved Open Question in
/// SPEC_FULL.md section 5).
const GOOGLE_CONTEXT_INFO_ECV1: &[u8] = b"Google";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    ECv1,
    ECv2,
}

impl ProtocolVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolVersion::ECv1 => "ECv1",
            ProtocolVersion::ECv2 => "ECv2",
        }
    }
}

#[derive(Deserialize)]
struct IntermediateSigningKeyPayload {
    #[serde(rename = "keyValue")]
    key_value: String,
    #[serde(rename = "keyExpiration")]
    key_expiration: String,
}

#[derive(Deserialize)]
struct PayloadExpiration {
    #[serde(rename = "messageExpiration")]
    message_expiration: Option<String>,
}

/// Builds a `Recipient`. Mirrors the teacher's validate-at-`build()` style:
/// cheap setters accumulate configuration, `build()` checks invariants once.
pub struct RecipientBuilder {
    protocol_version: Option<ProtocolVersion>,
    sender_id: String,
    recipient_id: Option<String>,
    sender_key_providers: Vec<SenderKeyProvider>,
    decrypters: Vec<HybridDecrypter>,
    clock: Arc<dyn Clock>,
}

impl Default for RecipientBuilder {
    fn default() -> Self {
        Self {
            protocol_version: None,
            sender_id: "Google".to_string(),
            recipient_id: None,
            sender_key_providers: Vec::new(),
            decrypters: Vec::new(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl RecipientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Defaults to `"Google"`; spec.md treats a different `senderId` as
    /// integrator-controlled (e.g. payment processors rebranding the flow).
    pub fn sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    pub fn recipient_id(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    pub fn add_sender_verifying_key_der(mut self, der: &[u8]) -> Result<Self, TokenError> {
        let key = crate::keys::parse_spki_public_key(der)?;
        self.push_literal_key(key);
        Ok(self)
    }

    pub fn add_sender_verifying_key_b64(mut self, b64: &str) -> Result<Self, TokenError> {
        let key = parse_spki_public_key_b64(b64)?;
        self.push_literal_key(key);
        Ok(self)
    }

    fn push_literal_key(&mut self, key: VerifyingKey) {
        if let Some(SenderKeyProvider::Literal(keys)) = self.sender_key_providers.last_mut() {
            keys.push(key);
        } else {
            self.sender_key_providers.push(SenderKeyProvider::Literal(vec![key]));
        }
    }

    /// Configure a static trusted-keys JSON document (spec.md section 3) as a
    /// sender-key source, filtered by protocol version and expiration at
    /// lookup time.
    pub fn sender_verifying_keys_json(mut self, json: impl Into<String>) -> Self {
        self.sender_key_providers.push(SenderKeyProvider::TrustedJson(json.into()));
        self
    }

    /// Configure an external fetcher (e.g. an HTTP client) as a sender-key
    /// source, invoked fresh on every `unseal` call.
    pub fn fetch_sender_verifying_keys_with(mut self, fetcher: Arc<dyn KeyFetcher>) -> Self {
        self.sender_key_providers.push(SenderKeyProvider::Fetching(fetcher));
        self
    }

    pub fn add_recipient_private_key_der(mut self, der: &[u8]) -> Result<Self, TokenError> {
        self.decrypters.push(HybridDecrypter::from_private_key_der(der)?);
        Ok(self)
    }

    pub fn add_recipient_private_key_b64(mut self, b64: &str) -> Result<Self, TokenError> {
        let secret = parse_pkcs8_private_key_b64(b64)?;
        self.decrypters.push(HybridDecrypter::from_secret_key(
            &secret,
            crate::secure_buffer::locking_mode_from_env(),
        )?);
        Ok(self)
    }

    /// Register an HSM-backed (or otherwise external) recipient key.
    pub fn add_recipient_kem(mut self, kem: Arc<dyn RecipientKem>) -> Self {
        self.decrypters.push(HybridDecrypter::from_kem(kem));
        self
    }

    /// Override the clock used for expiration checks. Tests only; a
    /// production `Recipient` always uses `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<Recipient, TokenError> {
        let protocol_version = self
            .protocol_version
            .ok_or_else(|| TokenError::Configuration("protocol_version is required".into()))?;
        let recipient_id = self
            .recipient_id
            .ok_or_else(|| TokenError::Configuration("recipient_id is required".into()))?;
        if self.sender_key_providers.is_empty() {
            return Err(TokenError::Configuration(
                "at least one sender verifying key source is required".into(),
            ));
        }
        if self.decrypters.is_empty() {
            return Err(TokenError::Configuration(
                "at least one recipient private key is required".into(),
            ));
        }

        Ok(Recipient {
            protocol_version,
            sender_id: self.sender_id,
            recipient_id,
            sender_key_providers: self.sender_key_providers,
            decrypters: self.decrypters,
            clock: self.clock,
        })
    }
}

/// An immutable, fully-configured recipient. Build one with
/// `RecipientBuilder` and reuse it across many `unseal` calls.
pub struct Recipient {
    protocol_version: ProtocolVersion,
    sender_id: String,
    recipient_id: String,
    sender_key_providers: Vec<SenderKeyProvider>,
    decrypters: Vec<HybridDecrypter>,
    clock: Arc<dyn Clock>,
}

impl Recipient {
    pub fn builder() -> RecipientBuilder {
        RecipientBuilder::new()
    }

    /// Unseal `sealed`, a Google Payment Method Token JSON envelope, to its
    /// plaintext payload. Runs the full pipeline from spec.md section 4:
    /// parse, verify (ECv2: intermediate key first), decrypt, check
    /// expiration.
    pub fn unseal(&self, sealed: &str) -> Result<String, TokenError> {
        let envelope = envelope::parse(sealed, self.protocol_version)?;

        let signed_bytes = encode(&[
            &self.sender_id,
            &self.recipient_id,
            self.protocol_version.as_str(),
            &envelope.signed_message,
        ]);

        let signing_key = match &envelope.intermediate_signing_key {
            None => None,
            Some(isk) => Some(self.verify_intermediate_signing_key(isk)?),
        };

        match &signing_key {
            Some(key) => {
                ecdsa::verify(key, &signed_bytes, &envelope.signature)?;
            }
            None => {
                let candidates = self.collect_sender_keys()?;
                self.verify_any(&candidates, &signed_bytes, std::slice::from_ref(&envelope.signature))?;
            }
        }

        let plaintext_bytes = self.decrypt_any(&envelope.signed_message)?;
        let plaintext = String::from_utf8(plaintext_bytes)
            .map_err(|_| TokenError::Decryption)?;

        self.check_payload_expiration(&plaintext)?;
        Ok(plaintext)
    }

    fn collect_sender_keys(&self) -> Result<Vec<VerifyingKey>, TokenError> {
        let mut keys = Vec::new();
        let mut last_err = None;
        for provider in &self.sender_key_providers {
            match provider.get(self.protocol_version, self.clock.as_ref()) {
                Ok(mut provider_keys) => keys.append(&mut provider_keys),
                Err(e) => last_err = Some(e),
            }
        }
        if keys.is_empty() {
            return Err(last_err.unwrap_or_else(|| {
                TokenError::KeyFetch("no sender verifying keys configured".into())
            }));
        }
        Ok(keys)
    }

    /// Verify the intermediate signing key's `signedKey` against the
    /// configured sender keys, then parse and return its embedded public key
    /// (spec.md section 4.5). At least one of `signatures` must verify, and
    /// the key must not be expired.
    fn verify_intermediate_signing_key(
        &self,
        isk: &IntermediateSigningKey,
    ) -> Result<VerifyingKey, TokenError> {
        let signed_bytes = encode(&[&self.sender_id, self.protocol_version.as_str(), &isk.signed_key]);
        let candidates = self.collect_sender_keys()?;
        self.verify_any(&candidates, &signed_bytes, &isk.signatures)?;

        let payload: IntermediateSigningKeyPayload = serde_json::from_str(&isk.signed_key)
            .map_err(|e| TokenError::EnvelopeShape(format!("invalid intermediate signing key payload: {e}")))?;

        let expiration_ms: i64 = payload
            .key_expiration
            .parse()
            .map_err(|_| TokenError::Expiration("intermediate signing key has a malformed keyExpiration".into()))?;
        if expiration_ms <= self.clock.now_millis() {
            return Err(TokenError::Expiration("intermediate signing key has expired".into()));
        }

        parse_spki_public_key_b64(&payload.key_value)
    }

    /// Succeed if any `(key, signature)` pair in the cross product verifies.
    /// Used both for the outer envelope signature and the intermediate
    /// key's signature list (spec.md invariants 3 and 4: "at least one of N
    /// signatures must verify against at least one configured key").
    fn verify_any(
        &self,
        keys: &[VerifyingKey],
        message: &[u8],
        signatures: &[Vec<u8>],
    ) -> Result<(), TokenError> {
        for signature in signatures {
            for key in keys {
                if ecdsa::verify(key, message, signature).is_ok() {
                    return Ok(());
                }
            }
        }
        Err(TokenError::Signature)
    }

    /// Try each configured recipient key in order, returning the first
    /// successful decryption (spec.md invariant 5: supports key rotation
    /// without requiring a specific key order).
    fn decrypt_any(&self, signed_message: &str) -> Result<Vec<u8>, TokenError> {
        // This is decoding the ciphertext envelope, not an envelope-shape
        // field, so a bad base64 here is a decryption failure (spec.md
        // section 7), not `EnvelopeShape`.
        let ciphertext = crate::keys::decode_base64(signed_message).map_err(|_| TokenError::Decryption)?;
        for decrypter in &self.decrypters {
            if let Ok(plaintext) = decrypter.decrypt(&ciphertext, GOOGLE_CONTEXT_INFO_ECV1) {
                return Ok(plaintext);
            }
        }
        Err(TokenError::Decryption)
    }

    /// Check `messageExpiration` inside the decrypted payload, if the
    /// payload parses as a JSON object carrying that field (spec.md section
    /// 4.6: the payload's own contents are otherwise opaque to this crate).
    fn check_payload_expiration(&self, plaintext: &str) -> Result<(), TokenError> {
        let payload: PayloadExpiration = match serde_json::from_str(plaintext) {
            Ok(payload) => payload,
            Err(_) => return Ok(()),
        };
        if let Some(expiration) = payload.message_expiration {
            let expiration_ms: i64 = expiration
                .parse()
                .map_err(|_| TokenError::Expiration("payload has a malformed messageExpiration".into()))?;
            if expiration_ms <= self.clock.now_millis() {
                return Err(TokenError::Expiration("payload has expired".into()));
            }
        }
        Ok(())
    }
}
