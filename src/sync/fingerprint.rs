use crate::sync::kv::{DomainFilter, KvStore};
use crate::sync::result_error::result::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const CHUNK_SIZE: usize = 65536;

/// Content fingerprint used for change detection: byte count plus a
/// base64-encoded SHA-512 digest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub size: u64,
    pub hash: String,
}

impl Fingerprint {
    pub fn matches(&self, size: u64, hash: &str) -> bool {
        self.size == size && self.hash == hash
    }
}

/// Streams a regular file through SHA-512 in fixed-size chunks.
pub fn fingerprint_file<P: AsRef<Path>>(path: P) -> Result<Fingerprint> {
    fingerprint_reader(File::open(path)?)
}

pub fn fingerprint_reader<R: Read>(mut reader: R) -> Result<Fingerprint> {
    let mut hasher = Sha512::new();
    let mut buf = [0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok(Fingerprint {
        size,
        hash: STANDARD.encode(hasher.finalize()),
    })
}

/// Structural fingerprint of a key-value mount: every in-scope (key, value)
/// pair hashed in sorted key order, so the result is invariant to the
/// backend's native iteration order.
pub fn fingerprint_kv(store: &dyn KvStore, filter: Option<&DomainFilter>) -> Result<Fingerprint> {
    let mut hasher = Sha512::new();
    let mut size = 0u64;
    for key in store.list_keys(filter)? {
        let value = store.get(&key)?.unwrap_or_default();
        hasher.update(&key);
        hasher.update(&value);
        size += (key.len() + value.len()) as u64;
    }
    Ok(Fingerprint {
        size,
        hash: STANDARD.encode(hasher.finalize()),
    })
}
