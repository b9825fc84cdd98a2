use crate::sync::kv::{key_in_scope, DomainFilter, KvStore};
use crate::sync::result_error::result::Result;
use std::path::Path;

/// Embedded key-value mount backed by a sled database directory.
pub struct SledKvStore {
    db: sled::Db,
}

impl SledKvStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<SledKvStore> {
        Ok(SledKvStore {
            db: sled::open(path)?,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl KvStore for SledKvStore {
    fn list_keys(&self, filter: Option<&DomainFilter>) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        for item in self.db.iter() {
            let (key, _) = item?;
            if key_in_scope(filter, &key) {
                keys.push(key.to_vec());
            }
        }
        // sled iterates in key order already; sort anyway since the trait
        // contract, not the backend, owns the ordering guarantee.
        keys.sort_unstable();
        Ok(keys)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.db.remove(key)?;
        Ok(())
    }
}
