//! Crypto primitives (C1): PIN-derived key material and AES-256-GCM AEAD.
//!
//! Mirrors the teacher's `server.rs`/`client.rs` key-derivation idiom
//! (SHA-256 of a secret plus a salt) but swaps the cipher for AES-256-GCM
//! and the derivation for PBKDF2-HMAC-SHA256, per spec.md §3/§4.1.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::config::{DERIVED_KEY_LEN, PBKDF2_ITERATIONS, SESSION_SALT};
use crate::error::CryptoError;

pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// PBKDF2-HMAC-SHA256(pin, salt, 10_000 iterations, 32 bytes). Byte-identical
/// on both sides of the wire as long as `pin` matches.
pub fn derive_key(pin: &str) -> [u8; DERIVED_KEY_LEN] {
    let mut out = [0u8; DERIVED_KEY_LEN];
    pbkdf2_hmac::<Sha256>(
        pin.as_bytes(),
        SESSION_SALT.as_bytes(),
        PBKDF2_ITERATIONS,
        &mut out,
    );
    out
}

/// base64(standard, no-wrap) of SHA-256(pin ‖ salt). Sent by the receiver
/// during `AUSTREAM_AUTH:<pin_hash>`.
pub fn hash_pin(pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(pin.as_bytes());
    hasher.update(SESSION_SALT.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Encrypt `plaintext` under `key`, returning `nonce(12) ‖ ciphertext ‖ tag(16)`.
/// A fresh 96-bit nonce is drawn from a CSPRNG on every call — callers MUST
/// NOT reuse a nonce for a given key.
pub fn encrypt(key: &[u8; DERIVED_KEY_LEN], plaintext: &[u8]) -> Vec<u8> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    // AES-256-GCM with a 96-bit random nonce and a 32-byte key never fails
    // to encrypt; the `Result` only models an (unreachable) buffer-length
    // invariant in the `aead` crate's generic API.
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .expect("AES-256-GCM encryption cannot fail for valid key/nonce lengths");
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt a `nonce ‖ ciphertext ‖ tag` blob. Fails when the blob is shorter
/// than `nonce + tag` or the authentication tag does not verify.
pub fn decrypt(key: &[u8; DERIVED_KEY_LEN], blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Truncated);
    }
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(&blob[..NONCE_LEN]);
    cipher
        .decrypt(nonce, &blob[NONCE_LEN..])
        .map_err(|_| CryptoError::AuthenticationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn key_derivation_is_deterministic() {
        assert_eq!(derive_key("123456"), derive_key("123456"));
        assert_ne!(derive_key("123456"), derive_key("654321"));
    }

    #[test]
    fn pin_hash_matches_reference_sha256() {
        let mut hasher = Sha256::new();
        hasher.update(b"123456");
        hasher.update(SESSION_SALT.as_bytes());
        let expected = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
        assert_eq!(hash_pin("123456"), expected);
    }

    #[test]
    fn aead_round_trip() {
        let key = derive_key("000000");
        let plaintext = vec![7u8; 1920];
        let blob = encrypt(&key, &plaintext);
        assert_eq!(decrypt(&key, &blob).unwrap(), plaintext);
    }

    #[test]
    fn aead_rejects_bit_flip_in_ciphertext() {
        let key = derive_key("000000");
        let plaintext = vec![7u8; 1920];
        let mut blob = encrypt(&key, &plaintext);
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(decrypt(&key, &blob).is_err());
    }

    #[test]
    fn aead_rejects_truncated_blob() {
        let key = derive_key("000000");
        assert!(decrypt(&key, &[0u8; 10]).is_err());
    }

    #[test]
    fn nonces_are_not_reused_across_calls() {
        let key = derive_key("111111");
        let a = encrypt(&key, b"same plaintext");
        let b = encrypt(&key, b"same plaintext");
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
    }
}
