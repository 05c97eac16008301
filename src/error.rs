//! Error taxonomy for the payment method token recipient.
//!
//! All cryptographic failures fold to one of the variants below; callers
//! should not try to recover a finer-grained reason than the variant itself
//! gives them (see `unseal`'s module docs for why).

/// A single opaque failure kind per `spec.md` section 7. Distinguishing
/// variants exist for tests and for callers that need to tell "you configured
/// me wrong" apart from "this token is bad", but no variant ever carries
/// which cryptographic sub-step actually failed.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Raised from `RecipientBuilder::build`, never from `unseal`.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The envelope JSON doesn't have the shape `spec.md` requires for the
    /// configured protocol version.
    #[error("malformed envelope: {0}")]
    EnvelopeShape(String),

    /// No (key, signature) pair verified.
    #[error("signature verification failed")]
    Signature,

    /// No configured decrypter produced plaintext.
    #[error("decryption failed")]
    Decryption,

    /// An intermediate signing key or the decrypted payload is expired, or
    /// carries an expiration field that doesn't parse as a decimal.
    #[error("expired: {0}")]
    Expiration(String),

    /// A sender-key provider failed to produce any usable key.
    #[error("failed to fetch trusted signing keys: {0}")]
    KeyFetch(String),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}
