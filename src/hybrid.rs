//! Hybrid decrypter (C6) and recipient KEM interface (C7).
//!
//! An ECIES construction: ECDH between an ephemeral sender key and the
//! recipient's long-term key produces a shared secret; HKDF-SHA256 stretches
//! that into an AES key and a MAC key; AES-256-CTR plus HMAC-SHA256 is the
//! DEM. The wire layout this module expects (spec.md section 4.4 treats the
//! exact framing as "the external contract of the underlying hybrid
//! primitive"):
//!
//! ```text
//! [ 65 bytes: ephemeral EC public key, uncompressed SEC1 P-256 ]
//! [ 16 bytes: AES-CTR IV                                       ]
//! [  N bytes: AES-256-CTR ciphertext                           ]
//! [ 32 bytes: HMAC-SHA256 tag over (point || iv || ciphertext) ]
//! ```

use std::sync::Arc;

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::{PublicKey, SecretKey};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::TokenError;
use crate::secure_buffer::{locking_mode_from_env, LockingMode, SecureBuffer};

type Aes256Ctr128BE = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const EPHEMERAL_POINT_LEN: usize = 65; // uncompressed SEC1 point: 0x04 || x || y
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;
const AES_KEY_LEN: usize = 32;
const MAC_KEY_LEN: usize = 32;

/// Delegate for the ECDH step (C7), so a recipient can keep its long-term
/// private key in an HSM instead of handing raw scalar bytes to this crate.
pub trait RecipientKem: Send + Sync {
    /// Perform ECDH between the recipient's private key and
    /// `ephemeral_public_key`, returning the raw shared secret (the curve's
    /// x-coordinate, big-endian) that feeds the HKDF step.
    fn shared_secret(&self, ephemeral_public_key: &PublicKey) -> Result<Vec<u8>, TokenError>;
}

enum KeySource {
    PrivateKey(SecureBuffer),
    Kem(Arc<dyn RecipientKem>),
}

/// One recipient decryption key. A `Recipient` tries its configured
/// decrypters in order and returns the first success (spec.md section 4.4).
pub struct HybridDecrypter {
    source: KeySource,
}

impl HybridDecrypter {
    /// Build a decrypter from a raw PKCS#8 DER recipient private key. The
    /// scalar is copied into locked, zero-on-drop memory; see
    /// `secure_buffer`.
    pub fn from_private_key_der(der: &[u8]) -> Result<Self, TokenError> {
        let secret = SecretKey::from_pkcs8_der(der)
            .map_err(|_| TokenError::Configuration("invalid recipient PKCS#8 private key".into()))?;
        Self::from_secret_key(&secret, locking_mode_from_env())
    }

    /// Build a decrypter from an already-parsed secret key.
    pub fn from_secret_key(secret: &SecretKey, mode: LockingMode) -> Result<Self, TokenError> {
        let mut scalar_bytes = secret.to_bytes();
        let buffer = SecureBuffer::from_slice_with_mode(&scalar_bytes, mode)?;
        scalar_bytes.zeroize();
        Ok(Self { source: KeySource::PrivateKey(buffer) })
    }

    /// Build a decrypter that delegates the ECDH step to `kem`.
    pub fn from_kem(kem: Arc<dyn RecipientKem>) -> Self {
        Self { source: KeySource::Kem(kem) }
    }

    /// Decrypt `ciphertext`, binding the derivation to `context_info`
    /// (spec.md: the literal ASCII bytes `"Google"` for both ECv1 and ECv2).
    pub fn decrypt(&self, ciphertext: &[u8], context_info: &[u8]) -> Result<Vec<u8>, TokenError> {
        if ciphertext.len() < EPHEMERAL_POINT_LEN + IV_LEN + TAG_LEN {
            return Err(TokenError::Decryption);
        }

        let (point_bytes, rest) = ciphertext.split_at(EPHEMERAL_POINT_LEN);
        let (body, tag) = rest.split_at(rest.len() - TAG_LEN);
        let (iv, body_ct) = body.split_at(IV_LEN);

        let ephemeral_public_key =
            PublicKey::from_sec1_bytes(point_bytes).map_err(|_| TokenError::Decryption)?;

        let mut shared_secret = match &self.source {
            KeySource::PrivateKey(buffer) => {
                let secret = SecretKey::from_slice(buffer.as_slice()).map_err(|_| TokenError::Decryption)?;
                let shared = p256::ecdh::diffie_hellman(
                    secret.to_nonzero_scalar(),
                    ephemeral_public_key.as_affine(),
                );
                shared.raw_secret_bytes().to_vec()
            }
            KeySource::Kem(kem) => kem.shared_secret(&ephemeral_public_key)?,
        };

        let hk = Hkdf::<Sha256>::new(None, &shared_secret);
        shared_secret.zeroize();

        let mut okm = [0u8; AES_KEY_LEN + MAC_KEY_LEN];
        hk.expand(context_info, &mut okm)
            .map_err(|_| TokenError::Decryption)?;
        let mut aes_key = [0u8; AES_KEY_LEN];
        let mut mac_key = [0u8; MAC_KEY_LEN];
        aes_key.copy_from_slice(&okm[..AES_KEY_LEN]);
        mac_key.copy_from_slice(&okm[AES_KEY_LEN..]);
        okm.zeroize();

        let mut mac = HmacSha256::new_from_slice(&mac_key).map_err(|_| TokenError::Decryption)?;
        mac_key.zeroize();
        mac.update(point_bytes);
        mac.update(iv);
        mac.update(body_ct);
        let tag_check = mac.verify_slice(tag);

        if tag_check.is_err() {
            aes_key.zeroize();
            return Err(TokenError::Decryption);
        }

        let mut plaintext = body_ct.to_vec();
        let mut cipher = Aes256Ctr128BE::new(aes_key.as_slice().into(), iv.into());
        cipher.apply_keystream(&mut plaintext);
        aes_key.zeroize();

        Ok(plaintext)
    }
}
