//! Sender-side fixtures for tests only. Sender-side token construction is
//! explicitly out of scope for this crate (spec.md section 1); this module
//! exists purely so unit and integration tests can play the sender's role
//! when exercising the recipient pipeline, gated behind the `testing`
//! feature so it never ships in a production build.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::{PublicKey, SecretKey};
use sha2::Sha256;

type Aes256Ctr128BE = ctr::Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

const AES_KEY_LEN: usize = 32;
const MAC_KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

/// Seal `plaintext` to `recipient_public`, mirroring
/// `HybridDecrypter::decrypt`'s wire layout exactly.
pub fn seal_for_tests(recipient_public: &PublicKey, context_info: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let ephemeral_secret = SecretKey::random(&mut rand::rngs::OsRng);
    let ephemeral_public = ephemeral_secret.public_key();
    let point_encoded = ephemeral_public.to_encoded_point(false);
    let point_bytes = point_encoded.as_bytes();

    let shared = p256::ecdh::diffie_hellman(
        ephemeral_secret.to_nonzero_scalar(),
        recipient_public.as_affine(),
    );

    let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes());
    let mut okm = [0u8; AES_KEY_LEN + MAC_KEY_LEN];
    hk.expand(context_info, &mut okm).expect("okm length fits HKDF-SHA256 output");
    let aes_key = &okm[..AES_KEY_LEN];
    let mac_key = &okm[AES_KEY_LEN..];

    let mut iv = [0u8; IV_LEN];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut iv);

    let mut ciphertext = plaintext.to_vec();
    let mut cipher = Aes256Ctr128BE::new(aes_key.into(), (&iv).into());
    cipher.apply_keystream(&mut ciphertext);

    let mut mac = HmacSha256::new_from_slice(mac_key).expect("HMAC accepts any key length");
    mac.update(point_bytes);
    mac.update(&iv);
    mac.update(&ciphertext);
    let tag = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(point_bytes.len() + IV_LEN + ciphertext.len() + tag.len());
    out.extend_from_slice(point_bytes);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&tag);
    out
}

/// Sign `message` with `signing_key`, returning a DER-encoded signature.
pub fn sign_der(signing_key: &SigningKey, message: &[u8]) -> Vec<u8> {
    let signature: Signature = signing_key.sign(message);
    signature.to_der().as_bytes().to_vec()
}
