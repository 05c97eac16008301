//! Key codec (C2): X.509 SPKI -> EC public key, PKCS#8 -> EC private key.
//!
//! Out of scope per spec.md: certificate-path validation. These decoders
//! only unwrap the SPKI/PKCS#8 wrapper around a raw NIST P-256 key; they
//! never look at a certificate chain.

use base64::{engine::general_purpose::STANDARD, Engine};
use p256::ecdsa::VerifyingKey;
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use p256::SecretKey;

use crate::error::TokenError;

/// Decode a base64 string into raw bytes, mapping failures to
/// `TokenError::EnvelopeShape`. Appropriate for envelope and trusted-keys
/// document fields; callers decoding a ciphertext as part of hybrid
/// decryption should map the error to `TokenError::Decryption` instead,
/// since a bad base64 `signedMessage` is a decryption failure, not a shape
/// error (spec.md section 7).
pub fn decode_base64(value: &str) -> Result<Vec<u8>, TokenError> {
    STANDARD
        .decode(value)
        .map_err(|e| TokenError::EnvelopeShape(format!("invalid base64: {e}")))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Parse a DER-encoded X.509 `SubjectPublicKeyInfo` into a P-256 verifying key.
pub fn parse_spki_public_key(der: &[u8]) -> Result<VerifyingKey, TokenError> {
    VerifyingKey::from_public_key_der(der)
        .map_err(|_| TokenError::EnvelopeShape("invalid SPKI EC public key".into()))
}

/// Parse a base64-encoded DER SPKI public key.
pub fn parse_spki_public_key_b64(b64: &str) -> Result<VerifyingKey, TokenError> {
    parse_spki_public_key(&decode_base64(b64)?)
}

/// Parse a DER-encoded PKCS#8 private key into a P-256 secret key.
pub fn parse_pkcs8_private_key(der: &[u8]) -> Result<SecretKey, TokenError> {
    SecretKey::from_pkcs8_der(der)
        .map_err(|_| TokenError::Configuration("invalid PKCS#8 EC private key".into()))
}

/// Parse a base64-encoded DER PKCS#8 private key.
pub fn parse_pkcs8_private_key_b64(b64: &str) -> Result<SecretKey, TokenError> {
    parse_pkcs8_private_key(&decode_base64(b64)?)
}
