//! End-to-end coverage of the scenarios and invariants from the protocol's
//! external interface: a fake sender (via `pmt_recipient::test_support`,
//! gated behind the `testing` feature) builds envelopes, and a real
//! `Recipient` unseals them.

use std::sync::Arc;

use p256::ecdsa::SigningKey;
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey};
use p256::SecretKey;

use pmt_recipient::test_support::{seal_for_tests, sign_der};
use pmt_recipient::{FixedClock, ProtocolVersion, Recipient, TokenError};

fn length_value(parts: &[&str]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in parts {
        let bytes = part.as_bytes();
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(bytes);
    }
    out
}

fn b64(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(bytes)
}

struct SenderFixture {
    sender_signing_key: SigningKey,
    recipient_secret: SecretKey,
}

fn build_ecv1_envelope(fixture: &SenderFixture, sender_id: &str, recipient_id: &str, plaintext: &[u8]) -> String {
    let ciphertext = seal_for_tests(&fixture.recipient_secret.public_key(), b"Google", plaintext);
    let signed_message = b64(&ciphertext);
    let signed_bytes = length_value(&[sender_id, recipient_id, "ECv1", &signed_message]);
    let signature = sign_der(&fixture.sender_signing_key, &signed_bytes);
    format!(
        r#"{{"protocolVersion":"ECv1","signature":"{}","signedMessage":"{}"}}"#,
        b64(&signature),
        signed_message,
    )
}

fn recipient_for(fixture: &SenderFixture, recipient_id: &str, now_ms: i64) -> Recipient {
    Recipient::builder()
        .protocol_version(ProtocolVersion::ECv1)
        .recipient_id(recipient_id)
        .add_sender_verifying_key_der(
            fixture.sender_signing_key.verifying_key().to_public_key_der().unwrap().as_bytes(),
        )
        .unwrap()
        .add_recipient_private_key_der(fixture.recipient_secret.to_pkcs8_der().unwrap().as_bytes())
        .unwrap()
        .clock(Arc::new(FixedClock(now_ms)))
        .build()
        .unwrap()
}

fn fresh_fixture() -> SenderFixture {
    SenderFixture {
        sender_signing_key: SigningKey::random(&mut rand::rngs::OsRng),
        recipient_secret: SecretKey::random(&mut rand::rngs::OsRng),
    }
}

/// S1: a well-formed ECv1 envelope round-trips to its original plaintext.
#[test]
fn s1_well_formed_ecv1_round_trips() {
    let fixture = fresh_fixture();
    let recipient = recipient_for(&fixture, "merchant-1", 0);
    let sealed = build_ecv1_envelope(&fixture, "Google", "merchant-1", br#"{"amount":"10.00"}"#);

    let plaintext = recipient.unseal(&sealed).unwrap();
    assert_eq!(plaintext, r#"{"amount":"10.00"}"#);
}

/// S2: flipping a byte of `signedMessage` breaks the signature, not the
/// decryption — the failure must be `Signature`.
#[test]
fn s2_tampered_signed_message_fails_signature_not_decryption() {
    let fixture = fresh_fixture();
    let recipient = recipient_for(&fixture, "merchant-1", 0);
    let sealed = build_ecv1_envelope(&fixture, "Google", "merchant-1", b"{}");

    let tampered = flip_first_signed_message_char(&sealed);
    assert!(matches!(recipient.unseal(&tampered), Err(TokenError::Signature)));
}

/// Flip the first character of the `signedMessage` field, guaranteed to
/// change the field's value regardless of what that character actually is
/// (the wire format always starts with an uncompressed SEC1 point, so the
/// first base64 character is never actually `'A'`, making a naive
/// string-literal substring swap unsafe here).
fn flip_first_signed_message_char(sealed: &str) -> String {
    let mut value: serde_json::Value = serde_json::from_str(sealed).unwrap();
    let signed_message = value["signedMessage"].as_str().unwrap().to_string();
    let mut chars: Vec<char> = signed_message.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    value["signedMessage"] = serde_json::Value::String(chars.into_iter().collect());
    serde_json::to_string(&value).unwrap()
}

/// Invariant 3: a recipientId mismatch between sender and recipient fails
/// with `Signature`, never `Decryption` — signature verification runs first.
#[test]
fn invariant3_recipient_id_mismatch_fails_signature_first() {
    let fixture = fresh_fixture();
    let recipient = recipient_for(&fixture, "merchant-OTHER", 0);
    let sealed = build_ecv1_envelope(&fixture, "Google", "merchant-1", b"{}");

    assert!(matches!(recipient.unseal(&sealed), Err(TokenError::Signature)));
}

/// Invariant 6: signer rotation. A recipient configured with multiple
/// sender-key providers (here: a literal-keys provider carrying a key that
/// did not sign this envelope, plus a trusted-JSON provider carrying the key
/// that did) succeeds because the union of provider keys is tried.
#[test]
fn invariant6_signer_rotation_succeeds_when_any_provider_has_the_verifying_key() {
    let fixture = fresh_fixture();
    let wrong_signing_key = SigningKey::random(&mut rand::rngs::OsRng);
    let sealed = build_ecv1_envelope(&fixture, "Google", "merchant-1", b"{}");

    let correct_key_b64 =
        b64(fixture.sender_signing_key.verifying_key().to_public_key_der().unwrap().as_bytes());
    let trusted_keys_json =
        format!(r#"{{"keys":[{{"keyValue":"{correct_key_b64}","protocolVersion":"ECv1"}}]}}"#);

    let recipient = Recipient::builder()
        .protocol_version(ProtocolVersion::ECv1)
        .recipient_id("merchant-1")
        .add_sender_verifying_key_der(wrong_signing_key.verifying_key().to_public_key_der().unwrap().as_bytes())
        .unwrap()
        .sender_verifying_keys_json(trusted_keys_json)
        .add_recipient_private_key_der(fixture.recipient_secret.to_pkcs8_der().unwrap().as_bytes())
        .unwrap()
        .clock(Arc::new(FixedClock(0)))
        .build()
        .unwrap();

    assert!(recipient.unseal(&sealed).is_ok());
}

/// S3 / invariant 8: an expired intermediate signing key fails with
/// `Expiration` even though its own signature (and the outer signature)
/// verify correctly.
#[test]
fn s3_expired_intermediate_signing_key_fails_even_with_valid_signatures() {
    let root_signing_key = SigningKey::random(&mut rand::rngs::OsRng);
    let intermediate_signing_key = SigningKey::random(&mut rand::rngs::OsRng);
    let recipient_secret = SecretKey::random(&mut rand::rngs::OsRng);

    let signed_key = format!(
        r#"{{"keyValue":"{}","keyExpiration":"0"}}"#,
        b64(intermediate_signing_key.verifying_key().to_public_key_der().unwrap().as_bytes()),
    );
    let isk_signed_bytes = length_value(&["Google", "ECv2", &signed_key]);
    let isk_signature = sign_der(&root_signing_key, &isk_signed_bytes);

    let ciphertext = seal_for_tests(&recipient_secret.public_key(), b"Google", b"{}");
    let signed_message = b64(&ciphertext);
    let outer_signed_bytes = length_value(&["Google", "merchant-1", "ECv2", &signed_message]);
    let outer_signature = sign_der(&intermediate_signing_key, &outer_signed_bytes);

    let sealed = format!(
        r#"{{"protocolVersion":"ECv2","signature":"{}","signedMessage":"{}","intermediateSigningKey":{{"signedKey":"{}","signatures":["{}"]}}}}"#,
        b64(&outer_signature),
        signed_message,
        signed_key.replace('"', "\\\""),
        b64(&isk_signature),
    );

    let recipient = Recipient::builder()
        .protocol_version(ProtocolVersion::ECv2)
        .recipient_id("merchant-1")
        .add_sender_verifying_key_der(root_signing_key.verifying_key().to_public_key_der().unwrap().as_bytes())
        .unwrap()
        .add_recipient_private_key_der(recipient_secret.to_pkcs8_der().unwrap().as_bytes())
        .unwrap()
        .clock(Arc::new(FixedClock(1_000_000)))
        .build()
        .unwrap();

    assert!(matches!(recipient.unseal(&sealed), Err(TokenError::Expiration(_))));
}

/// S4: two signatures on `intermediateSigningKey`, only the second is
/// valid against the configured sender key; verification still succeeds
/// because at-least-one-of-N semantics apply.
#[test]
fn s4_second_of_two_intermediate_signatures_valid_still_succeeds() {
    let root_signing_key = SigningKey::random(&mut rand::rngs::OsRng);
    let unrelated_signing_key = SigningKey::random(&mut rand::rngs::OsRng);
    let intermediate_signing_key = SigningKey::random(&mut rand::rngs::OsRng);
    let recipient_secret = SecretKey::random(&mut rand::rngs::OsRng);

    let signed_key = format!(
        r#"{{"keyValue":"{}","keyExpiration":"99999999999999"}}"#,
        b64(intermediate_signing_key.verifying_key().to_public_key_der().unwrap().as_bytes()),
    );
    let isk_signed_bytes = length_value(&["Google", "ECv2", &signed_key]);
    let bad_signature = sign_der(&unrelated_signing_key, &isk_signed_bytes);
    let good_signature = sign_der(&root_signing_key, &isk_signed_bytes);

    let ciphertext = seal_for_tests(&recipient_secret.public_key(), b"Google", b"{}");
    let signed_message = b64(&ciphertext);
    let outer_signed_bytes = length_value(&["Google", "merchant-1", "ECv2", &signed_message]);
    let outer_signature = sign_der(&intermediate_signing_key, &outer_signed_bytes);

    let sealed = format!(
        r#"{{"protocolVersion":"ECv2","signature":"{}","signedMessage":"{}","intermediateSigningKey":{{"signedKey":"{}","signatures":["{}","{}"]}}}}"#,
        b64(&outer_signature),
        signed_message,
        signed_key.replace('"', "\\\""),
        b64(&bad_signature),
        b64(&good_signature),
    );

    let recipient = Recipient::builder()
        .protocol_version(ProtocolVersion::ECv2)
        .recipient_id("merchant-1")
        .add_sender_verifying_key_der(root_signing_key.verifying_key().to_public_key_der().unwrap().as_bytes())
        .unwrap()
        .add_recipient_private_key_der(recipient_secret.to_pkcs8_der().unwrap().as_bytes())
        .unwrap()
        .clock(Arc::new(FixedClock(0)))
        .build()
        .unwrap();

    assert!(recipient.unseal(&sealed).is_ok());
}

/// S5 / invariant 5: key rotation. The recipient carries two private keys;
/// the ciphertext was sealed to the second. Both configured orderings
/// succeed.
#[test]
fn s5_key_rotation_succeeds_regardless_of_configured_key_order() {
    let fixture_with_rotated_keys = |order_reversed: bool| {
        let sender_signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let old_key = SecretKey::random(&mut rand::rngs::OsRng);
        let new_key = SecretKey::random(&mut rand::rngs::OsRng);

        let ciphertext = seal_for_tests(&new_key.public_key(), b"Google", b"{}");
        let signed_message = b64(&ciphertext);
        let signed_bytes = length_value(&["Google", "merchant-1", "ECv1", &signed_message]);
        let signature = sign_der(&sender_signing_key, &signed_bytes);
        let sealed = format!(
            r#"{{"protocolVersion":"ECv1","signature":"{}","signedMessage":"{}"}}"#,
            b64(&signature),
            signed_message,
        );

        let mut builder = Recipient::builder()
            .protocol_version(ProtocolVersion::ECv1)
            .recipient_id("merchant-1")
            .add_sender_verifying_key_der(sender_signing_key.verifying_key().to_public_key_der().unwrap().as_bytes())
            .unwrap();

        let (first, second) = if order_reversed { (&new_key, &old_key) } else { (&old_key, &new_key) };
        builder = builder
            .add_recipient_private_key_der(first.to_pkcs8_der().unwrap().as_bytes())
            .unwrap()
            .add_recipient_private_key_der(second.to_pkcs8_der().unwrap().as_bytes())
            .unwrap();

        let recipient = builder.clock(Arc::new(FixedClock(0))).build().unwrap();
        recipient.unseal(&sealed)
    };

    assert!(fixture_with_rotated_keys(false).is_ok());
    assert!(fixture_with_rotated_keys(true).is_ok());
}

/// S6 / invariant 7: `messageExpiration` is checked strictly against "now".
#[test]
fn s6_payload_expiration_is_enforced_strictly() {
    let fixture = fresh_fixture();
    let recipient = recipient_for(&fixture, "merchant-1", 1_000_000);

    let expired = build_ecv1_envelope(&fixture, "Google", "merchant-1", br#"{"messageExpiration":"0"}"#);
    assert!(matches!(recipient.unseal(&expired), Err(TokenError::Expiration(_))));

    let not_expired =
        build_ecv1_envelope(&fixture, "Google", "merchant-1", br#"{"messageExpiration":"99999999999999"}"#);
    assert!(recipient.unseal(&not_expired).is_ok());
}

/// A payload that doesn't parse as JSON is treated opaquely: no expiration
/// check applies, and unsealing still succeeds.
#[test]
fn non_json_payload_skips_expiration_check() {
    let fixture = fresh_fixture();
    let recipient = recipient_for(&fixture, "merchant-1", 0);
    let sealed = build_ecv1_envelope(&fixture, "Google", "merchant-1", b"not json at all");

    assert_eq!(recipient.unseal(&sealed).unwrap(), "not json at all");
}
