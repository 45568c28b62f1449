//! LSA secret decryption primitives.
//!
//! Windows Vista and newer protect LSA secrets with an AES-256-ECB variation:
//! the encryption key is first passed through a custom derivation function
//! (SHA-256 over the key followed by 1000 absorptions of a 32-byte salt
//! taken from the secret blob itself), then the ciphertext is decrypted
//! block by block with no chaining and no padding.
//!
//! Secret blob layout:
//! ```text
//! +0x00  header (opaque, 28 bytes)
//! +0x1C  salt (32 bytes)
//! +0x3C  ciphertext (multiple of 16 bytes)
//! ```

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes256;
use sha2::{Digest, Sha256};

use crate::error::{JoinError, JoinResult};

/// Derived AES keys are always 256-bit.
pub const DERIVED_KEY_LEN: usize = 32;

/// AES block size.
const BLOCK_LEN: usize = 16;

/// Byte range of the salt inside a secret blob.
const SALT_START: usize = 28;
/// First ciphertext byte; also the minimum blob length.
const CIPHERTEXT_START: usize = 60;

/// Number of times the salt is absorbed into the digest. Fixed by the
/// Windows implementation for wire compatibility, not a work factor —
/// never change it.
const KDF_SALT_ROUNDS: usize = 1000;

/// Derive a 256-bit AES key from an encryption key and a blob salt.
///
/// Deterministic: same `(secret, salt)` always yields the same key. The
/// result is ephemeral and never persisted.
pub fn derive_key(secret: &[u8], salt: &[u8]) -> [u8; DERIVED_KEY_LEN] {
    let mut sha256 = Sha256::new();
    sha256.update(secret);
    for _ in 0..KDF_SALT_ROUNDS {
        sha256.update(salt);
    }
    sha256.finalize().into()
}

/// Decrypt `ciphertext` with AES-256 in ECB mode.
///
/// No padding is removed; the caller interprets the plaintext layout.
/// Fails with [`JoinError::MalformedCiphertext`] unless the length is a
/// whole number of 16-byte blocks.
pub fn decrypt_block(key: &[u8; DERIVED_KEY_LEN], ciphertext: &[u8]) -> JoinResult<Vec<u8>> {
    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(JoinError::MalformedCiphertext {
            len: ciphertext.len(),
        });
    }

    let cipher = Aes256::new(GenericArray::from_slice(key));
    let mut plaintext = ciphertext.to_vec();
    for block in plaintext.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
    Ok(plaintext)
}

/// Decrypt an LSA secret blob with the provided encryption key.
///
/// Extracts the salt at bytes [28, 60) and the ciphertext at [60..], derives
/// the per-blob AES key, and returns the raw plaintext. Fails with
/// [`JoinError::MalformedBlob`] if the blob cannot hold a salt.
pub fn decrypt_secret(blob: &[u8], key: &[u8]) -> JoinResult<Vec<u8>> {
    if blob.len() < CIPHERTEXT_START {
        return Err(JoinError::MalformedBlob { len: blob.len() });
    }

    let salt = &blob[SALT_START..CIPHERTEXT_START];
    let ciphertext = &blob[CIPHERTEXT_START..];
    decrypt_block(&derive_key(key, salt), ciphertext)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use aes::cipher::BlockEncrypt;

    /// ECB encryption counterpart, used to build blob fixtures.
    pub(crate) fn encrypt_block(key: &[u8; DERIVED_KEY_LEN], plaintext: &[u8]) -> Vec<u8> {
        assert_eq!(plaintext.len() % BLOCK_LEN, 0, "fixture must be block-aligned");
        let cipher = Aes256::new(GenericArray::from_slice(key));
        let mut out = plaintext.to_vec();
        for block in out.chunks_exact_mut(BLOCK_LEN) {
            cipher.encrypt_block(GenericArray::from_mut_slice(block));
        }
        out
    }

    /// Build a well-formed secret blob around `plaintext`.
    pub(crate) fn make_blob(key: &[u8], salt: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
        let mut blob = vec![0u8; SALT_START];
        blob.extend_from_slice(salt);
        blob.extend_from_slice(&encrypt_block(&derive_key(key, salt), plaintext));
        blob
    }

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key(b"boot key material", b"salt salt salt salt salt salt 32");
        let b = derive_key(b"boot key material", b"salt salt salt salt salt salt 32");
        assert_eq!(a, b);
    }

    #[test]
    fn derive_key_is_salt_sensitive() {
        let mut salt = [0x5Au8; 32];
        let a = derive_key(b"key", &salt);
        salt[17] ^= 0x01; // single bit flip
        let b = derive_key(b"key", &salt);
        assert_ne!(a, b);
    }

    #[test]
    fn derive_key_is_secret_sensitive() {
        let salt = [0x11u8; 32];
        assert_ne!(derive_key(b"key-a", &salt), derive_key(b"key-b", &salt));
    }

    #[test]
    fn decrypt_block_rejects_partial_blocks() {
        let key = [7u8; DERIVED_KEY_LEN];
        let err = decrypt_block(&key, &[0u8; 17]).unwrap_err();
        assert!(matches!(err, JoinError::MalformedCiphertext { len: 17 }));
    }

    #[test]
    fn decrypt_block_roundtrip() {
        let key = derive_key(b"secret", &[3u8; 32]);
        let plaintext = [0xA5u8; 48];
        let ciphertext = encrypt_block(&key, &plaintext);
        assert_ne!(ciphertext, plaintext);
        assert_eq!(decrypt_block(&key, &ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn decrypt_secret_rejects_short_blob() {
        let err = decrypt_secret(&[0u8; 59], b"key").unwrap_err();
        assert!(matches!(err, JoinError::MalformedBlob { len: 59 }));
    }

    #[test]
    fn decrypt_secret_rejects_misaligned_ciphertext() {
        // 28 header + 32 salt + 9 ciphertext bytes
        let err = decrypt_secret(&[0u8; 69], b"key").unwrap_err();
        assert!(matches!(err, JoinError::MalformedCiphertext { len: 9 }));
    }

    #[test]
    fn decrypt_secret_recovers_plaintext() {
        let key = [0xC3u8; 16];
        let salt = [0x66u8; 32];
        let plaintext = b"sixteen byte msg".repeat(2);
        let blob = make_blob(&key, &salt, &plaintext);
        assert_eq!(decrypt_secret(&blob, &key).unwrap(), plaintext);
    }

    #[test]
    fn empty_ciphertext_yields_empty_plaintext() {
        // A 60-byte blob is valid and carries no ciphertext at all.
        let blob = [0u8; 60];
        assert!(decrypt_secret(&blob, b"key").unwrap().is_empty());
    }
}
