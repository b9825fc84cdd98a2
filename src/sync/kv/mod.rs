pub mod sled_store;
pub mod table;

use crate::sync::result_error::result::Result;
use std::collections::HashSet;

/// Marker prefix for tagged-metadata keys: `META:<domain>`.
const META_PREFIX: &[u8] = b"META:";
/// Leading marker byte for domain-scoped record keys: `_<domain>\x00\x01...`.
const RECORD_MARKER: u8 = b'_';
/// Separator between the domain label and the record remainder.
const DOMAIN_SEPARATOR: &[u8] = b"\x00\x01";
/// Sentinel key that belongs to every domain.
const VERSION_SENTINEL: &[u8] = b"VERSION";

/// Ordered access to an embedded key-value store.
///
/// `list_keys` must yield keys in sorted order so fingerprints are
/// deterministic regardless of the backing store's native iteration order.
pub trait KvStore {
    fn list_keys(&self, filter: Option<&DomainFilter>) -> Result<Vec<Vec<u8>>>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete(&mut self, key: &[u8]) -> Result<()>;
}

/// Restricts which keys participate in an entry, by embedded domain label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainFilter {
    domains: HashSet<Vec<u8>>,
}

impl DomainFilter {
    pub fn new<I, S>(domains: I) -> DomainFilter
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        DomainFilter {
            domains: domains.into_iter().map(Into::into).collect(),
        }
    }

    /// Classifies a key by its structural prefix and checks the embedded
    /// domain label against the allowed set. Keys that fit none of the
    /// conventions carry no domain and are filtered out.
    pub fn allows(&self, key: &[u8]) -> bool {
        if key == VERSION_SENTINEL {
            return true;
        }
        if let Some(domain) = key.strip_prefix(META_PREFIX) {
            return self.domains.contains(domain);
        }
        if key.first() == Some(&RECORD_MARKER) {
            let body = &key[1..];
            if let Some(idx) = body
                .windows(DOMAIN_SEPARATOR.len())
                .position(|w| w == DOMAIN_SEPARATOR)
            {
                return self.domains.contains(&body[..idx]);
            }
        }
        false
    }
}

/// Filter check with the absent-filter convention: no filter passes all keys.
pub fn key_in_scope(filter: Option<&DomainFilter>, key: &[u8]) -> bool {
    filter.map(|f| f.allows(key)).unwrap_or(true)
}
