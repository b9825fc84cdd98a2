use crate::sync::result_error::error::Error;
use crate::sync::result_error::result::Result;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt::{Debug, Formatter};
use zeroize::Zeroize;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
/// Only this many leading bytes of the sealed stream feed the integrity
/// code, so a corrupt artifact fails fast without decrypting everything.
const INTEGRITY_PREFIX_LEN: usize = 4096;

/// Encryption metadata persisted in the store next to the fingerprint.
///
/// Losing this row makes the artifact unrecoverable by design: the key is
/// generated fresh per content change and never derived from anything.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionMeta {
    /// Base64 of the artifact key, XOR-masked with a salt taken from the
    /// entry's content hash.
    pub key: String,
    /// Base64 nonce.
    pub iv: String,
    /// Base64 integrity code over the sealed stream's prefix.
    pub integrity: String,
    /// Compression method tag applied before sealing, if any.
    pub method: Option<String>,
    /// Size of the compressed stream that was sealed, if compressed.
    pub compressed_size: Option<u64>,
}

impl Debug for EncryptionMeta {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionMeta")
            .field("key", &"###REDACTED###")
            .field("iv", &self.iv)
            .field("integrity", &self.integrity)
            .field("method", &self.method)
            .field("compressed_size", &self.compressed_size)
            .finish()
    }
}

/// Derives the XOR mask from an entry's content hash. The stored key alone
/// is useless without the matching fingerprint row.
fn salt_from_hash(content_hash: &str) -> Result<[u8; KEY_LEN]> {
    let digest = STANDARD
        .decode(content_hash)
        .map_err(|e| Error::Crypto(format!("invalid content hash encoding: {e}")))?;
    let mut salt = [0u8; KEY_LEN];
    for (s, d) in salt.iter_mut().zip(digest.iter()) {
        *s = *d;
    }
    Ok(salt)
}

fn xor_mask(key: &[u8; KEY_LEN], salt: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    for i in 0..KEY_LEN {
        out[i] = key[i] ^ salt[i];
    }
    out
}

fn integrity_code(sealed_input: &[u8]) -> String {
    let prefix = &sealed_input[..sealed_input.len().min(INTEGRITY_PREFIX_LEN)];
    STANDARD.encode(Sha256::digest(prefix))
}

/// Seals one artifact stream with a fresh random key and nonce.
///
/// `data` is the stream to encrypt, already compressed if the policy says
/// so; `method`/`compressed_size` are carried into the metadata verbatim.
pub fn seal(
    data: &[u8],
    content_hash: &str,
    method: Option<&str>,
    compressed_size: Option<u64>,
) -> Result<(Vec<u8>, EncryptionMeta)> {
    let mut key = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut key);
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Crypto(format!("failed to create cipher: {e}")))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce_bytes), data)
        .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

    let salt = salt_from_hash(content_hash)?;
    let mut masked = xor_mask(&key, &salt);
    let meta = EncryptionMeta {
        key: STANDARD.encode(masked),
        iv: STANDARD.encode(nonce_bytes),
        integrity: integrity_code(data),
        method: method.map(String::from),
        compressed_size,
    };
    key.zeroize();
    masked.zeroize();

    Ok((ciphertext, meta))
}

/// Opens one sealed artifact. The authentication tag and the prefix
/// integrity code are both verified before any plaintext is handed out; a
/// mismatch yields `DecryptionIntegrity` and no partial output.
pub fn open(ciphertext: &[u8], meta: &EncryptionMeta, content_hash: &str) -> Result<Vec<u8>> {
    let masked = STANDARD
        .decode(&meta.key)
        .map_err(|e| Error::Crypto(format!("invalid stored key encoding: {e}")))?;
    if masked.len() != KEY_LEN {
        return Err(Error::Crypto(format!(
            "stored key has {} bytes, expected {KEY_LEN}",
            masked.len()
        )));
    }
    let nonce_bytes = STANDARD
        .decode(&meta.iv)
        .map_err(|e| Error::Crypto(format!("invalid stored iv encoding: {e}")))?;
    if nonce_bytes.len() != NONCE_LEN {
        return Err(Error::Crypto(format!(
            "stored iv has {} bytes, expected {NONCE_LEN}",
            nonce_bytes.len()
        )));
    }

    let salt = salt_from_hash(content_hash)?;
    let mut masked_arr = [0u8; KEY_LEN];
    masked_arr.copy_from_slice(&masked);
    let mut key = xor_mask(&masked_arr, &salt);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Crypto(format!("failed to create cipher: {e}")))?;
    key.zeroize();

    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext)
        .map_err(|_| {
            Error::DecryptionIntegrity("authentication tag mismatch, artifact corrupt or metadata stale".into())
        })?;

    if integrity_code(&plaintext) != meta.integrity {
        return Err(Error::DecryptionIntegrity(
            "stream prefix does not match the stored integrity code".into(),
        ));
    }
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::fingerprint::fingerprint_reader;

    fn hash_of(data: &[u8]) -> String {
        fingerprint_reader(data).unwrap().hash
    }

    #[test]
    fn test_seal_open_round_trip() {
        let data = b"the save file contents".to_vec();
        let hash = hash_of(&data);

        let (ciphertext, meta) = seal(&data, &hash, None, None).unwrap();
        assert_ne!(ciphertext, data);

        let opened = open(&ciphertext, &meta, &hash).unwrap();
        assert_eq!(opened, data);
    }

    #[test]
    fn test_fresh_key_and_nonce_per_seal() {
        let data = b"same content".to_vec();
        let hash = hash_of(&data);

        let (c1, m1) = seal(&data, &hash, None, None).unwrap();
        let (c2, m2) = seal(&data, &hash, None, None).unwrap();
        assert_ne!(c1, c2);
        assert_ne!(m1.key, m2.key);
        assert_ne!(m1.iv, m2.iv);
        assert_eq!(m1.integrity, m2.integrity);
    }

    #[test]
    fn test_corrupted_ciphertext_fails_integrity() {
        let data = b"precious bytes".to_vec();
        let hash = hash_of(&data);
        let (mut ciphertext, meta) = seal(&data, &hash, None, None).unwrap();
        ciphertext[3] ^= 0x01;

        match open(&ciphertext, &meta, &hash) {
            Err(Error::DecryptionIntegrity(_)) => (),
            other => panic!("Expected DecryptionIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_content_hash_fails() {
        let data = b"precious bytes".to_vec();
        let hash = hash_of(&data);
        let (ciphertext, meta) = seal(&data, &hash, None, None).unwrap();

        let wrong_hash = hash_of(b"other content");
        match open(&ciphertext, &meta, &wrong_hash) {
            Err(Error::DecryptionIntegrity(_)) => (),
            other => panic!("Expected DecryptionIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn test_meta_carries_compression_info() {
        let data = b"compressed stream".to_vec();
        let hash = hash_of(&data);
        let (_, meta) = seal(&data, &hash, Some("xz"), Some(17)).unwrap();
        assert_eq!(meta.method.as_deref(), Some("xz"));
        assert_eq!(meta.compressed_size, Some(17));
    }

    #[test]
    fn test_debug_redacts_key() {
        let data = b"x".to_vec();
        let hash = hash_of(&data);
        let (_, meta) = seal(&data, &hash, None, None).unwrap();
        let dbg = format!("{meta:?}");
        assert!(dbg.contains("###REDACTED###"));
        assert!(!dbg.contains(&meta.key));
    }
}
