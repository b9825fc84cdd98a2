use crate::sync::kv::{DomainFilter, KvStore};
use crate::sync::result_error::error::Error;
use crate::sync::result_error::result::Result;
use rusqlite::Connection;
use std::path::Path;

/// Artifact suffix marking the portable tabular container format.
pub static CONTAINER_EXT: &str = "kvdb";

const ENTRIES_TABLE: &str = "CREATE TABLE entries (
key BLOB,
value BLOB,
PRIMARY KEY(key)
);";

/// Materializes the in-scope keys of a mount into a fresh tabular container,
/// one row per pair, in sorted key order.
///
/// Returns the number of exported rows.
pub fn export_to_table(
    store: &dyn KvStore,
    filter: Option<&DomainFilter>,
    dest: &Path,
) -> Result<usize> {
    let mut conn = Connection::open(dest)?;
    conn.execute_batch(ENTRIES_TABLE)?;

    let keys = store.list_keys(filter)?;
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare("INSERT INTO entries (key, value) VALUES (?1, ?2);")?;
        for key in &keys {
            let value = store.get(key)?.ok_or_else(|| {
                Error::CorruptStore(format!("key {:?} vanished during export", key))
            })?;
            stmt.execute((key, &value))?;
        }
    }
    tx.commit()?;
    Ok(keys.len())
}

/// Replays a tabular container into a mount.
///
/// In-scope keys already present are deleted first so stale keys are not
/// resurrected next to the replayed ones.
///
/// Returns the number of imported rows.
pub fn import_from_table(
    src: &Path,
    store: &mut dyn KvStore,
    filter: Option<&DomainFilter>,
) -> Result<usize> {
    let conn = Connection::open(src)?;

    for key in store.list_keys(filter)? {
        store.delete(&key)?;
    }

    let mut stmt = conn.prepare("SELECT key, value FROM entries ORDER BY key;")?;
    let mut rows = stmt.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let key: Vec<u8> = row.get(0)?;
        let value: Vec<u8> = row.get(1)?;
        store.put(&key, &value)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::kv::sled_store::SledKvStore;
    use tempfile::TempDir;

    fn populated_store(temp: &TempDir) -> SledKvStore {
        let mut store = SledKvStore::open(temp.path().join("src-db")).unwrap();
        store.put(b"VERSION", b"1").unwrap();
        store.put(b"META:profile", b"m").unwrap();
        store.put(b"_profile\x00\x01uid", b"alice").unwrap();
        store.put(b"_options\x00\x01volume", b"3").unwrap();
        store
    }

    #[test]
    fn test_export_import_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = populated_store(&temp);
        let container = temp.path().join("out.kvdb");

        let exported = export_to_table(&store, None, &container).unwrap();
        assert_eq!(exported, 4);

        let mut restored = SledKvStore::open(temp.path().join("dst-db")).unwrap();
        let imported = import_from_table(&container, &mut restored, None).unwrap();
        assert_eq!(imported, 4);
        assert_eq!(
            restored.get(b"_profile\x00\x01uid").unwrap(),
            Some(b"alice".to_vec())
        );
        assert_eq!(restored.list_keys(None).unwrap().len(), 4);
    }

    #[test]
    fn test_export_respects_domain_filter() {
        let temp = TempDir::new().unwrap();
        let store = populated_store(&temp);
        let container = temp.path().join("out.kvdb");

        let filter = DomainFilter::new([b"profile".to_vec()]);
        let exported = export_to_table(&store, Some(&filter), &container).unwrap();
        assert_eq!(exported, 3); // VERSION + META:profile + _profile record
    }

    #[test]
    fn test_import_deletes_stale_in_scope_keys() {
        let temp = TempDir::new().unwrap();
        let store = populated_store(&temp);
        let container = temp.path().join("out.kvdb");
        let filter = DomainFilter::new([b"profile".to_vec()]);
        export_to_table(&store, Some(&filter), &container).unwrap();

        let mut dest = SledKvStore::open(temp.path().join("dst-db")).unwrap();
        // Stale in-scope key that the container does not carry.
        dest.put(b"_profile\x00\x01stale", b"old").unwrap();
        // Out-of-scope key that must survive the import.
        dest.put(b"_options\x00\x01volume", b"9").unwrap();

        import_from_table(&container, &mut dest, Some(&filter)).unwrap();

        assert_eq!(dest.get(b"_profile\x00\x01stale").unwrap(), None);
        assert_eq!(
            dest.get(b"_options\x00\x01volume").unwrap(),
            Some(b"9".to_vec())
        );
        assert_eq!(
            dest.get(b"_profile\x00\x01uid").unwrap(),
            Some(b"alice".to_vec())
        );
    }
}
