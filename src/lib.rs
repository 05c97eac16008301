//! pmt_recipient - recipient-side unsealing for Google Payment Method Token
//! envelopes (ECv1/ECv2).
//!
//! This crate implements the `PaymentMethodTokenRecipient` pipeline: parse a
//! sealed JSON envelope, verify its ECDSA signature (with an intermediate
//! signing key step for ECv2), hybrid-decrypt the payload, and check payload
//! expiration. Sender-side token construction, the trusted-keys HTTP
//! fetcher, and certificate-path validation are explicitly out of scope; see
//! `sender_keys::KeyFetcher` and `hybrid::RecipientKem` for the seams where
//! callers plug those in.
//!
//! # Security model
//!
//! Recipient private key material is copied into locked, zero-on-drop
//! memory (`secure_buffer::SecureBuffer`) for as long as a `Recipient` is
//! alive, and is never logged: every failure mode folds to one of a small
//! set of opaque `TokenError` variants (see `error`), deliberately
//! withholding which cryptographic sub-step failed.

pub mod clock;
pub mod ecdsa;
pub mod envelope;
pub mod error;
pub mod hybrid;
pub mod keys;
pub mod length_value;
pub mod recipient;
pub mod secure_buffer;
pub mod sender_keys;

#[cfg(any(test, feature = "testing"))]
pub mod test_support;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::TokenError;
pub use hybrid::{HybridDecrypter, RecipientKem};
pub use recipient::{ProtocolVersion, Recipient, RecipientBuilder};
pub use sender_keys::{KeyFetcher, SenderKeyProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export for convenience
pub mod prelude {
    pub use crate::error::TokenError;
    pub use crate::hybrid::RecipientKem;
    pub use crate::recipient::{ProtocolVersion, Recipient, RecipientBuilder};
    pub use crate::sender_keys::KeyFetcher;
}
