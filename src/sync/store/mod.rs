pub mod seal;

use crate::sync::encrypt::EncryptionMeta;
use crate::sync::result_error::error::Error;
use crate::sync::result_error::result::Result;
use crate::sync::store::seal::PassphraseSource;
use itertools::Itertools;
use rusqlite::{Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{info, warn};

pub static DB_FILE_NAME: &str = "data.db";

/// Running engine's schema version. A store written by a newer engine is
/// refused, an older one is migrated in place.
const VERSION: [i64; 4] = [1, 0, 1, 1];

const VERSION_TABLE: &str = "CREATE TABLE version (
id TEXT,
v1 INT,
v2 INT,
v3 INT,
v4 INT,
PRIMARY KEY(id)
);";
// AUTOINCREMENT keeps ids monotonic across deletes; an id-indexed artifact
// path must never be able to point at a later record's ciphertext.
const FILES_TABLE: &str = "CREATE TABLE files (
id INTEGER PRIMARY KEY AUTOINCREMENT,
file TEXT,
size INT,
program TEXT,
hash TEXT,
compression TEXT
);";
const FILES_REBUILD: &str = "ALTER TABLE files RENAME TO files_old;
CREATE TABLE files (
id INTEGER PRIMARY KEY AUTOINCREMENT,
file TEXT,
size INT,
program TEXT,
hash TEXT,
compression TEXT
);
INSERT INTO files (id, file, size, program, hash)
SELECT id, file, size, program, hash FROM files_old;
DROP TABLE files_old;";
const FILETYPE_TABLE: &str = "CREATE TABLE filetype (
id INT,
type INT,
PRIMARY KEY(id)
);";
const ENCRYPTION_TABLE: &str = "CREATE TABLE encryption (
id INT,
key TEXT,
iv TEXT,
integrity TEXT,
method TEXT,
compressed_size INT,
PRIMARY KEY(id)
);";

/// Kind tag for records that are not plain files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    KvStore,
}

impl RecordKind {
    fn to_int(self) -> i64 {
        match self {
            RecordKind::KvStore => 1,
        }
    }

    fn from_int(v: i64) -> Result<RecordKind> {
        match v {
            1 => Ok(RecordKind::KvStore),
            other => Err(Error::CorruptStore(format!("unknown record kind {other}"))),
        }
    }
}

/// One persisted row: the last successfully backed up state of a logical
/// entry. `kind` absent means plain file; `encryption` present means the
/// on-disk artifact is ciphertext. `compression` is the method tag of a
/// plain artifact (an encrypted one records its method in `encryption`),
/// so restore never has to guess from the artifact's file name.
#[derive(Clone, Debug)]
pub struct FileRecord {
    pub id: i64,
    pub name: String,
    pub program: String,
    pub size: u64,
    pub hash: String,
    pub compression: Option<String>,
    pub kind: Option<RecordKind>,
    pub encryption: Option<EncryptionMeta>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StoreOptions {
    pub encrypt: bool,
    pub change_key: bool,
    pub optimize: bool,
}

/// Shared, serialized handle to the metadata store.
///
/// One coarse lock serializes all row operations; transactions are
/// single-row and short, so per-program worker threads interleave safely.
pub struct MetaStore {
    conn: Mutex<Connection>,
    path: PathBuf,
    reseal: Option<String>,
}

impl MetaStore {
    pub fn open(
        dest: &Path,
        options: &StoreOptions,
        passphrases: &dyn PassphraseSource,
    ) -> Result<MetaStore> {
        let path = dest.join(DB_FILE_NAME);
        let mut reseal = None;

        if path.exists() {
            if seal::is_sealed(&path)? {
                let pass = passphrases.read("Please input the password of the database: ")?;
                seal::unseal_file(&path, &pass)?;
                if options.encrypt {
                    reseal = Some(if options.change_key {
                        passphrases.read("Please input the new password of the database: ")?
                    } else {
                        pass
                    });
                } else {
                    warn!("Store was sealed but encrypt_db is off, leaving it unsealed");
                }
            } else {
                seal::verify_plain_sqlite(&path)?;
                if options.encrypt {
                    reseal =
                        Some(passphrases.read("Please input the password of the database: ")?);
                }
            }
        } else if options.encrypt {
            reseal = Some(passphrases.read("Please input the password of the database: ")?);
        }

        let conn = Connection::open(&path)?;
        if options.optimize {
            info!("Optimizing metadata store");
            conn.execute_batch("VACUUM;")?;
        }

        let store = MetaStore {
            conn: Mutex::new(conn),
            path,
            reseal,
        };
        store.check_or_create_schema()?;
        Ok(store)
    }

    /// Flushes and, when configured, seals the store back at rest. Must be
    /// called after every worker has finished.
    pub fn close(self) -> Result<()> {
        let conn = self
            .conn
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        conn.close().map_err(|(_, e)| Error::from(e))?;
        if let Some(pass) = &self.reseal {
            info!("Sealing metadata store at rest");
            seal::seal_file(&self.path, pass)?;
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_or_create_schema(&self) -> Result<()> {
        let mut conn = self.lock();

        let tables: HashSet<String> = conn
            .prepare("SELECT name FROM main.sqlite_master WHERE type='table';")?
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;

        if !tables.contains("version") {
            let tx = conn.transaction()?;
            tx.execute_batch(VERSION_TABLE)?;
            tx.execute_batch(FILES_TABLE)?;
            tx.execute_batch(FILETYPE_TABLE)?;
            tx.execute_batch(ENCRYPTION_TABLE)?;
            tx.execute(
                "INSERT INTO version VALUES ('main', ?1, ?2, ?3, ?4);",
                rusqlite::params![VERSION[0], VERSION[1], VERSION[2], VERSION[3]],
            )?;
            tx.commit()?;
            return Ok(());
        }

        let found: [i64; 4] = conn
            .query_row(
                "SELECT v1, v2, v3, v4 FROM version WHERE id='main';",
                [],
                |row| Ok([row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?]),
            )
            .optional()?
            .ok_or_else(|| Error::CorruptStore("version table has no main row".into()))?;

        if found > VERSION {
            return Err(Error::StoreVersion {
                found: found.iter().join("."),
                supported: VERSION.iter().join("."),
            });
        }
        if found < VERSION {
            info!(
                "Migrating metadata store schema {} -> {}",
                found.iter().join("."),
                VERSION.iter().join(".")
            );
            let tx = conn.transaction()?;
            if found < [1, 0, 0, 1] {
                tx.execute_batch(FILETYPE_TABLE)?;
            }
            if found < [1, 0, 1, 0] {
                tx.execute_batch(ENCRYPTION_TABLE)?;
            }
            if found < [1, 0, 1, 1] {
                // Migrated records keep a NULL compression column; the next
                // backup run retransfers anything that does not match its
                // resolved policy and fills the column in.
                tx.execute_batch(FILES_REBUILD)?;
            }
            tx.execute(
                "UPDATE version SET v1=?1, v2=?2, v3=?3, v4=?4 WHERE id='main';",
                rusqlite::params![VERSION[0], VERSION[1], VERSION[2], VERSION[3]],
            )?;
            tx.commit()?;
        }
        Ok(())
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
        let kind = match row.get::<_, Option<i64>>(5)? {
            Some(v) => Some(
                RecordKind::from_int(v)
                    .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(5, v))?,
            ),
            None => None,
        };
        let encryption = match row.get::<_, Option<String>>(6)? {
            Some(key) => Some(EncryptionMeta {
                key,
                iv: row.get(7)?,
                integrity: row.get(8)?,
                method: row.get(9)?,
                compressed_size: row.get::<_, Option<i64>>(10)?.map(|v| v as u64),
            }),
            None => None,
        };
        Ok(FileRecord {
            id: row.get(0)?,
            name: row.get(1)?,
            program: row.get(2)?,
            size: row.get::<_, i64>(3)? as u64,
            hash: row.get(4)?,
            compression: row.get(11)?,
            kind,
            encryption,
        })
    }

    pub fn get_record(&self, program: &str, name: &str) -> Result<Option<FileRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                "SELECT files.id, files.file, files.program, files.size, files.hash, \
                 filetype.type, encryption.key, encryption.iv, encryption.integrity, \
                 encryption.method, encryption.compressed_size, files.compression \
                 FROM files \
                 LEFT JOIN filetype ON files.id=filetype.id \
                 LEFT JOIN encryption ON files.id=encryption.id \
                 WHERE files.program=?1 AND files.file=?2;",
                (program, name),
                Self::record_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// All names currently tracked for a program, for orphan reconciliation.
    pub fn list_names(&self, program: &str) -> Result<HashSet<String>> {
        let conn = self.lock();
        let names = conn
            .prepare("SELECT file FROM files WHERE program=?1;")?
            .query_map([program], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<_, _>>()?;
        Ok(names)
    }

    /// Inserts a placeholder row and returns its surrogate id. The id is
    /// needed up front when the artifact path is indexed by it; the real
    /// fingerprint lands via `update_record` after the transfer succeeds.
    pub fn add_record(
        &self,
        program: &str,
        name: &str,
        kind: Option<RecordKind>,
    ) -> Result<i64> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO files (file, size, program, hash) VALUES (?1, 0, ?2, '');",
            (name, program),
        )?;
        let id = tx.last_insert_rowid();
        if let Some(kind) = kind {
            tx.execute(
                "INSERT INTO filetype VALUES (?1, ?2);",
                (id, kind.to_int()),
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    pub fn update_record(
        &self,
        id: i64,
        size: u64,
        hash: &str,
        compression: Option<&str>,
        encryption: Option<&EncryptionMeta>,
    ) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE files SET size=?1, hash=?2, compression=?3 WHERE id=?4;",
            (size as i64, hash, compression, id),
        )?;
        tx.execute("DELETE FROM encryption WHERE id=?1;", [id])?;
        if let Some(enc) = encryption {
            tx.execute(
                "INSERT INTO encryption VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
                rusqlite::params![
                    id,
                    enc.key,
                    enc.iv,
                    enc.integrity,
                    enc.method,
                    enc.compressed_size.map(|v| v as i64)
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn remove_record(&self, id: i64) -> Result<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM files WHERE id=?1;", [id])?;
        tx.execute("DELETE FROM filetype WHERE id=?1;", [id])?;
        tx.execute("DELETE FROM encryption WHERE id=?1;", [id])?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::store::seal::StaticPassphrase;
    use tempfile::TempDir;

    fn open_plain(dir: &Path) -> MetaStore {
        MetaStore::open(
            dir,
            &StoreOptions::default(),
            &StaticPassphrase(String::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_fresh_store_and_record_lifecycle() {
        let temp = TempDir::new().unwrap();
        let store = open_plain(temp.path());

        assert!(store.get_record("P", "save.dat").unwrap().is_none());
        assert!(store.list_names("P").unwrap().is_empty());

        let id = store.add_record("P", "save.dat", None).unwrap();
        store.update_record(id, 4, "hash-a", None, None).unwrap();

        let record = store.get_record("P", "save.dat").unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.size, 4);
        assert_eq!(record.hash, "hash-a");
        assert!(record.compression.is_none());
        assert!(record.kind.is_none());
        assert!(record.encryption.is_none());

        store.update_record(id, 8, "hash-b", Some("gz"), None).unwrap();
        let record = store.get_record("P", "save.dat").unwrap().unwrap();
        assert_eq!((record.size, record.hash.as_str()), (8, "hash-b"));
        assert_eq!(record.compression.as_deref(), Some("gz"));

        store.remove_record(id).unwrap();
        assert!(store.get_record("P", "save.dat").unwrap().is_none());
        store.close().unwrap();
    }

    #[test]
    fn test_ids_are_never_reused() {
        let temp = TempDir::new().unwrap();
        let store = open_plain(temp.path());
        let id1 = store.add_record("P", "a", None).unwrap();
        store.remove_record(id1).unwrap();
        let id2 = store.add_record("P", "b", None).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_kind_and_encryption_round_trip() {
        let temp = TempDir::new().unwrap();
        let store = open_plain(temp.path());

        let id = store
            .add_record("P", "settings", Some(RecordKind::KvStore))
            .unwrap();
        let enc = EncryptionMeta {
            key: "a2V5".into(),
            iv: "aXY=".into(),
            integrity: "aW50".into(),
            method: Some("xz".into()),
            compressed_size: Some(99),
        };
        store.update_record(id, 7, "hash", None, Some(&enc)).unwrap();

        let record = store.get_record("P", "settings").unwrap().unwrap();
        assert_eq!(record.kind, Some(RecordKind::KvStore));
        assert_eq!(record.encryption, Some(enc));

        // Re-update without encryption clears the row.
        store.update_record(id, 7, "hash", None, None).unwrap();
        let record = store.get_record("P", "settings").unwrap().unwrap();
        assert!(record.encryption.is_none());
    }

    #[test]
    fn test_list_names_scoped_by_program() {
        let temp = TempDir::new().unwrap();
        let store = open_plain(temp.path());
        store.add_record("P", "a", None).unwrap();
        store.add_record("P", "b", None).unwrap();
        store.add_record("Q", "c", None).unwrap();

        let names = store.list_names("P").unwrap();
        assert_eq!(names, HashSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_newer_store_version_is_refused() {
        let temp = TempDir::new().unwrap();
        {
            let store = open_plain(temp.path());
            let conn = store.lock();
            conn.execute("UPDATE version SET v1=99 WHERE id='main';", [])
                .unwrap();
        }
        match MetaStore::open(
            temp.path(),
            &StoreOptions::default(),
            &StaticPassphrase(String::new()),
        ) {
            Err(Error::StoreVersion { found, .. }) => assert!(found.starts_with("99")),
            other => panic!("Expected StoreVersion error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_migration_from_base_schema() {
        let temp = TempDir::new().unwrap();
        {
            let conn = Connection::open(temp.path().join(DB_FILE_NAME)).unwrap();
            conn.execute_batch(VERSION_TABLE).unwrap();
            // The original files layout, before compression tracking.
            conn.execute_batch(
                "CREATE TABLE files (
                 id INTEGER,
                 file TEXT,
                 size INT,
                 program TEXT,
                 hash TEXT,
                 PRIMARY KEY(id)
                 );",
            )
            .unwrap();
            conn.execute("INSERT INTO files VALUES (1, 'old.dat', 4, 'P', 'h');", [])
                .unwrap();
            conn.execute("INSERT INTO version VALUES ('main', 1, 0, 0, 0);", [])
                .unwrap();
        }
        let store = open_plain(temp.path());

        // Existing rows survive, with no compression method recorded.
        let old = store.get_record("P", "old.dat").unwrap().unwrap();
        assert_eq!(old.id, 1);
        assert!(old.compression.is_none());

        // Migrated tables are usable immediately, and removing the highest
        // row must not hand its id to the next insert.
        let id = store
            .add_record("P", "kv", Some(RecordKind::KvStore))
            .unwrap();
        let record = store.get_record("P", "kv").unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.kind, Some(RecordKind::KvStore));
        store.remove_record(id).unwrap();
        let next = store.add_record("P", "kv2", None).unwrap();
        assert!(next > id);
    }

    #[test]
    fn test_sealed_store_round_trip() {
        let temp = TempDir::new().unwrap();
        let options = StoreOptions {
            encrypt: true,
            ..Default::default()
        };
        let pass = StaticPassphrase("correct-horse".into());

        let store = MetaStore::open(temp.path(), &options, &pass).unwrap();
        let id = store.add_record("P", "save.dat", None).unwrap();
        store.update_record(id, 4, "hash", None, None).unwrap();
        store.close().unwrap();

        assert!(seal::is_sealed(temp.path().join(DB_FILE_NAME)).unwrap());

        // Wrong passphrase is rejected before any schema work.
        match MetaStore::open(
            temp.path(),
            &options,
            &StaticPassphrase("wrong-pass".into()),
        ) {
            Err(Error::AuthenticationRequired(_)) => (),
            other => panic!("Expected AuthenticationRequired, got {:?}", other.map(|_| ())),
        }

        let store = MetaStore::open(temp.path(), &options, &pass).unwrap();
        let record = store.get_record("P", "save.dat").unwrap().unwrap();
        assert_eq!(record.size, 4);
        store.close().unwrap();
    }

    #[test]
    fn test_change_key_reseals_under_new_passphrase() {
        let temp = TempDir::new().unwrap();
        let options = StoreOptions {
            encrypt: true,
            ..Default::default()
        };
        let store =
            MetaStore::open(temp.path(), &options, &StaticPassphrase("old-pass".into())).unwrap();
        store.add_record("P", "a", None).unwrap();
        store.close().unwrap();

        // Rekey: old passphrase unseals, new one seals.
        struct Sequenced(std::sync::Mutex<Vec<String>>);
        impl PassphraseSource for Sequenced {
            fn read(&self, _prompt: &str) -> Result<String> {
                Ok(self.0.lock().unwrap().remove(0))
            }
        }
        let rekey_options = StoreOptions {
            encrypt: true,
            change_key: true,
            ..Default::default()
        };
        let seq = Sequenced(std::sync::Mutex::new(vec![
            "old-pass".into(),
            "new-pass".into(),
        ]));
        let store = MetaStore::open(temp.path(), &rekey_options, &seq).unwrap();
        store.close().unwrap();

        let store =
            MetaStore::open(temp.path(), &options, &StaticPassphrase("new-pass".into())).unwrap();
        assert_eq!(store.list_names("P").unwrap().len(), 1);
        store.close().unwrap();
    }

    #[test]
    fn test_garbage_file_is_corrupt_store() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(DB_FILE_NAME), b"not a database").unwrap();
        match MetaStore::open(
            temp.path(),
            &StoreOptions::default(),
            &StaticPassphrase(String::new()),
        ) {
            Err(Error::CorruptStore(_)) => (),
            other => panic!("Expected CorruptStore, got {:?}", other.map(|_| ())),
        }
    }
}
