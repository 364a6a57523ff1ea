//! AES-256-GCM sealing for client secrets.
//!
//! Each secret is sealed separately with a fresh random nonce. The stored
//! form is a single base64 string of `nonce || ciphertext || tag`, so the
//! table needs no separate nonce column.

use crate::error::{RegistryError, Result};
use crate::keys::MasterKey;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Turns master key material into a 32-byte AES key.
///
/// Accepts exactly 32 raw bytes, or base64 text (surrounding whitespace
/// ignored) that decodes to 32 bytes. An empty key is always rejected.
pub fn resolve_key(key: &MasterKey) -> Result<[u8; KEY_SIZE]> {
    let raw = key.as_bytes();
    if raw.is_empty() {
        return Err(RegistryError::Crypto(
            "master key is empty (key acquisition failed)".to_string(),
        ));
    }

    if let Ok(bytes) = <[u8; KEY_SIZE]>::try_from(raw) {
        return Ok(bytes);
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| RegistryError::Crypto(format!(
            "master key must be {} raw bytes or base64, got {} bytes",
            KEY_SIZE,
            raw.len()
        )))?;

    let decoded = BASE64
        .decode(text.trim())
        .map_err(|e| RegistryError::Crypto(format!("master key is not valid base64: {}", e)))?;

    <[u8; KEY_SIZE]>::try_from(decoded.as_slice()).map_err(|_| {
        RegistryError::Crypto(format!(
            "master key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            decoded.len()
        ))
    })
}

fn cipher_for(key: &MasterKey) -> Result<Aes256Gcm> {
    let key_bytes = resolve_key(key)?;
    Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| RegistryError::Crypto(format!("failed to create cipher: {}", e)))
}

/// Seals a plaintext secret under the master key.
///
/// Sealing the same plaintext twice yields different envelopes.
pub fn seal(plaintext: &str, key: &MasterKey) -> Result<String> {
    let cipher = cipher_for(key)?;

    // Generate random nonce (never reuse!)
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|e| RegistryError::Crypto(format!("encryption failed: {}", e)))?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);

    Ok(BASE64.encode(envelope))
}

/// Opens an envelope produced by [`seal`].
///
/// Fails on a wrong key, a truncated or tampered envelope, or non-UTF-8
/// plaintext. Never returns partially decrypted data.
pub fn open(envelope: &str, key: &MasterKey) -> Result<String> {
    let cipher = cipher_for(key)?;

    let bytes = BASE64
        .decode(envelope)
        .map_err(|e| RegistryError::Crypto(format!("failed to decode sealed secret: {}", e)))?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(RegistryError::Crypto(format!(
            "sealed secret too short: {} bytes",
            bytes.len()
        )));
    }

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
        RegistryError::Crypto("decryption failed (wrong key or corrupted data)".to_string())
    })?;

    String::from_utf8(plaintext)
        .map_err(|_| RegistryError::Crypto("decrypted secret is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn key(byte: u8) -> MasterKey {
        MasterKey::from_bytes(vec![byte; KEY_SIZE])
    }

    #[test]
    fn test_resolve_raw_and_base64_keys() {
        assert_eq!(resolve_key(&key(7)).unwrap(), [7u8; KEY_SIZE]);

        // Key receivers commonly print base64 followed by a newline
        let printed = format!("{}\n", BASE64.encode([9u8; KEY_SIZE]));
        let resolved = resolve_key(&MasterKey::from_bytes(printed.into_bytes())).unwrap();
        assert_eq!(resolved, [9u8; KEY_SIZE]);
    }

    #[test]
    fn test_resolve_rejects_bad_keys() {
        for bad in [
            MasterKey::empty(),
            MasterKey::from_bytes(vec![1u8; 16]),
            MasterKey::from_bytes(BASE64.encode([0u8; 16]).into_bytes()),
            MasterKey::from_bytes(b"not-valid-base64!@#$".to_vec()),
            MasterKey::from_bytes(vec![0xff, 0xfe, 0xfd]),
        ] {
            assert_eq!(resolve_key(&bad).unwrap_err().kind(), ErrorKind::Crypto);
        }
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = key(0);
        let sealed = seal("my-client-secret-12345", &key).unwrap();

        assert_ne!(sealed, "my-client-secret-12345");
        assert_eq!(open(&sealed, &key).unwrap(), "my-client-secret-12345");
    }

    #[test]
    fn test_different_nonces() {
        let key = key(0);

        let sealed1 = seal("same-plaintext", &key).unwrap();
        let sealed2 = seal("same-plaintext", &key).unwrap();

        // Random nonces give distinct envelopes
        assert_ne!(sealed1, sealed2);

        assert_eq!(open(&sealed1, &key).unwrap(), "same-plaintext");
        assert_eq!(open(&sealed2, &key).unwrap(), "same-plaintext");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = seal("secret", &key(0)).unwrap();
        let err = open(&sealed, &key(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let key = key(0);
        let sealed = seal("secret", &key).unwrap();

        let mut bytes = BASE64.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);

        assert_eq!(open(&tampered, &key).unwrap_err().kind(), ErrorKind::Crypto);
    }

    #[test]
    fn test_truncated_and_garbage_envelopes_fail() {
        let key = key(0);
        assert!(open("", &key).is_err());
        assert!(open(&BASE64.encode([0u8; 8]), &key).is_err());
        assert!(open("plaintext-secret", &key).is_err());
    }

    #[test]
    fn test_empty_key_cannot_seal() {
        let err = seal("secret", &MasterKey::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }
}
