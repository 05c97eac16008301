//! ECDSA verifier (C3): ECDSA-SHA256 over DER-encoded signatures, NIST P-256.
//!
//! Verification never reveals which check failed beyond "signature invalid" —
//! there is exactly one way this function can fail.

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};

use crate::error::TokenError;

/// Verify `der_signature` over `message` with `public_key`.
pub fn verify(
    public_key: &VerifyingKey,
    message: &[u8],
    der_signature: &[u8],
) -> Result<(), TokenError> {
    let signature = Signature::from_der(der_signature).map_err(|_| TokenError::Signature)?;
    public_key
        .verify(message, &signature)
        .map_err(|_| TokenError::Signature)
}
