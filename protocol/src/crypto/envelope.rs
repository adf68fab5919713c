//! # Hybrid Envelope Codec
//!
//! The channel's sole security boundary. After key exchange, no payload in
//! either direction is legitimate unless it passed through [`open`] or was
//! produced by [`seal`].
//!
//! ## Construction
//!
//! `seal` draws a fresh random AES-256 key and 96-bit nonce for every call,
//! encrypts the plaintext with AES-256-GCM, and wraps the AES key with the
//! recipient's RSA public key under OAEP(SHA-256). The envelope is the
//! tuple (wrapped key, nonce, tag, ciphertext), each base64-encoded.
//!
//! A fresh symmetric key per call is not an optimization target. Reusing a
//! key/nonce pair across GCM messages lets an attacker recover plaintext
//! XORs and forge tags, so the key is never cached, never derived, never
//! reused.
//!
//! ## Failure behavior
//!
//! `open` collapses every failure (bad base64, short fields, RSA failure,
//! tag failure) into the same [`EnvelopeError::OpenFailed`]. The caller
//! learns the envelope was rejected and nothing else.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH};

/// Errors from sealing or opening an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope encryption failed")]
    SealFailed,

    #[error("envelope rejected")]
    OpenFailed,
}

/// A hybrid-encrypted message as it travels on the wire.
///
/// All four fields are base64. The GCM tag is carried separately from the
/// ciphertext to match what clients built on Node's `crypto` or WebCrypto
/// produce and expect.
/// Missing fields deserialize to empty strings and fail in [`open`]
/// rather than failing JSON parsing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Envelope {
    /// The one-time AES-256 key, wrapped with RSA-OAEP(SHA-256).
    pub encrypted_key: String,
    /// The 96-bit GCM nonce.
    pub nonce: String,
    /// The 128-bit GCM authentication tag.
    pub tag: String,
    /// The AES-256-GCM ciphertext (without the tag).
    pub ciphertext: String,
}

/// Seal `plaintext` for `recipient`.
pub fn seal(plaintext: &[u8], recipient: &RsaPublicKey) -> Result<Envelope, EnvelopeError> {
    let mut key = [0u8; AES_KEY_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut key);
    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EnvelopeError::SealFailed)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let mut sealed = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| EnvelopeError::SealFailed)?;

    // aes-gcm appends the tag; the wire format carries it separately.
    let tag = sealed.split_off(sealed.len() - AES_TAG_LENGTH);
    let ciphertext = sealed;

    let wrapped_key = recipient
        .encrypt(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), &key)
        .map_err(|_| EnvelopeError::SealFailed)?;

    Ok(Envelope {
        encrypted_key: BASE64.encode(wrapped_key),
        nonce: BASE64.encode(nonce_bytes),
        tag: BASE64.encode(tag),
        ciphertext: BASE64.encode(ciphertext),
    })
}

/// Open an envelope with the recipient's private key.
///
/// Any structural or cryptographic failure returns the same error.
pub fn open(envelope: &Envelope, recipient: &RsaPrivateKey) -> Result<Vec<u8>, EnvelopeError> {
    let wrapped_key = decode(&envelope.encrypted_key)?;
    let nonce_bytes = decode(&envelope.nonce)?;
    let tag = decode(&envelope.tag)?;
    let ciphertext = decode(&envelope.ciphertext)?;

    if nonce_bytes.len() != AES_NONCE_LENGTH || tag.len() != AES_TAG_LENGTH {
        return Err(EnvelopeError::OpenFailed);
    }

    let key = recipient
        .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
        .map_err(|_| EnvelopeError::OpenFailed)?;
    if key.len() != AES_KEY_LENGTH {
        return Err(EnvelopeError::OpenFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| EnvelopeError::OpenFailed)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);

    cipher
        .decrypt(nonce, sealed.as_ref())
        .map_err(|_| EnvelopeError::OpenFailed)
}

fn decode(field: &str) -> Result<Vec<u8>, EnvelopeError> {
    BASE64.decode(field).map_err(|_| EnvelopeError::OpenFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::SessionKeyPair;

    fn test_pair() -> SessionKeyPair {
        SessionKeyPair::generate().unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let pair = test_pair();
        let plaintext = br#"{"pageId":"abc","amount":"100"}"#;

        let envelope = seal(plaintext, pair.public_key()).unwrap();
        let recovered = open(&envelope, pair.private_key()).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_fresh_key_and_nonce_per_seal() {
        // Two seals of identical plaintext under the same recipient must
        // differ in every random component.
        let pair = test_pair();
        let a = seal(b"identical", pair.public_key()).unwrap();
        let b = seal(b"identical", pair.public_key()).unwrap();

        assert_ne!(a.encrypted_key, b.encrypted_key);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_private_key_fails() {
        let sender_view = test_pair();
        let other = test_pair();

        let envelope = seal(b"secret", sender_view.public_key()).unwrap();
        assert!(open(&envelope, other.private_key()).is_err());
    }

    #[test]
    fn test_tampered_fields_all_fail_the_same() {
        let pair = test_pair();
        let envelope = seal(b"payload", pair.public_key()).unwrap();

        let tamper = |f: &dyn Fn(&mut Envelope)| {
            let mut e = envelope.clone();
            f(&mut e);
            open(&e, pair.private_key())
        };

        let cases: Vec<Box<dyn Fn(&mut Envelope)>> = vec![
            Box::new(|e| e.encrypted_key = BASE64.encode([0u8; 256])),
            Box::new(|e| e.nonce = BASE64.encode([0u8; 12])),
            Box::new(|e| e.tag = BASE64.encode([0u8; 16])),
            Box::new(|e| e.ciphertext.push_str("AAAA")),
            Box::new(|e| e.nonce = "!!not-base64!!".into()),
            Box::new(|e| e.tag = BASE64.encode([0u8; 3])),
        ];
        for (i, case) in cases.iter().enumerate() {
            match tamper(case) {
                Err(EnvelopeError::OpenFailed) => {}
                other => panic!("case {} returned {:?}", i, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_empty_plaintext() {
        let pair = test_pair();
        let envelope = seal(b"", pair.public_key()).unwrap();
        assert!(envelope.ciphertext.is_empty());
        assert_eq!(open(&envelope, pair.private_key()).unwrap(), b"");
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let pair = test_pair();
        let envelope = seal(b"x", pair.public_key()).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        for field in ["encryptedKey", "nonce", "tag", "ciphertext"] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
    }
}
