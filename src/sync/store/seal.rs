//! At-rest sealing of the metadata store file.
//!
//! A sealed store is the whole sqlite file encrypted with AES-256-GCM under
//! an Argon2id-derived key, behind a small self-describing header. Sealing
//! and unsealing always go through a sibling temp file and an atomic rename.

use crate::sync::result_error::error::Error;
use crate::sync::result_error::result::Result;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use zeroize::Zeroize;

const SEAL_MAGIC: &[u8; 8] = b"SSEALDB1";
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// Where passphrases come from; the engine never talks to a terminal
/// directly so tests can feed passphrases programmatically.
pub trait PassphraseSource {
    fn read(&self, prompt: &str) -> Result<String>;
}

pub struct TerminalPassphrase;

impl PassphraseSource for TerminalPassphrase {
    fn read(&self, prompt: &str) -> Result<String> {
        Ok(rpassword::prompt_password(prompt)?)
    }
}

/// Fixed passphrase source for non-interactive use.
pub struct StaticPassphrase(pub String);

impl PassphraseSource for StaticPassphrase {
    fn read(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

fn derive_key(passphrase: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| Error::Crypto(format!("key derivation failed: {e}")))?;
    Ok(key)
}

pub fn seal_bytes(plain: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut key = derive_key(passphrase, &salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Crypto(format!("failed to create cipher: {e}")))?;
    key.zeroize();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plain)
        .map_err(|e| Error::Crypto(format!("store sealing failed: {e}")))?;

    let mut out = Vec::with_capacity(SEAL_MAGIC.len() + SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(SEAL_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub fn unseal_bytes(data: &[u8], passphrase: &str) -> Result<Vec<u8>> {
    let header_len = SEAL_MAGIC.len() + SALT_LEN + NONCE_LEN;
    if data.len() < header_len || &data[..SEAL_MAGIC.len()] != SEAL_MAGIC {
        return Err(Error::CorruptStore("sealed store header is malformed".into()));
    }
    let salt = &data[SEAL_MAGIC.len()..SEAL_MAGIC.len() + SALT_LEN];
    let nonce = &data[SEAL_MAGIC.len() + SALT_LEN..header_len];
    let ciphertext = &data[header_len..];

    let mut key = derive_key(passphrase, salt)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::Crypto(format!("failed to create cipher: {e}")))?;
    key.zeroize();
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::AuthenticationRequired("store passphrase rejected".into()))
}

pub fn is_sealed<P: AsRef<Path>>(path: P) -> Result<bool> {
    let data = fs::read(path.as_ref())?;
    Ok(data.len() >= SEAL_MAGIC.len() && &data[..SEAL_MAGIC.len()] == SEAL_MAGIC)
}

/// An existing unsealed store must look like sqlite; anything else is
/// corruption, not something to silently reinitialize over.
pub fn verify_plain_sqlite<P: AsRef<Path>>(path: P) -> Result<()> {
    let data = fs::read(path.as_ref())?;
    if data.is_empty() || data.starts_with(SQLITE_MAGIC) {
        Ok(())
    } else {
        Err(Error::CorruptStore(format!(
            "{:?} is neither a sqlite database nor a sealed store",
            path.as_ref()
        )))
    }
}

fn swap_in(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        Error::CorruptStore(format!("store path {:?} has no parent directory", path))
    })?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(contents)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| Error::from(e.error))?;
    Ok(())
}

/// Decrypts a sealed store in place (one atomic swap).
pub fn unseal_file(path: &Path, passphrase: &str) -> Result<()> {
    let plain = unseal_bytes(&fs::read(path)?, passphrase)?;
    swap_in(path, &plain)
}

/// Encrypts a plaintext store in place (one atomic swap).
pub fn seal_file(path: &Path, passphrase: &str) -> Result<()> {
    let sealed = seal_bytes(&fs::read(path)?, passphrase)?;
    swap_in(path, &sealed)
}
