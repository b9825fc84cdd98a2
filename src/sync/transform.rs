//! Artifact placement and transfer.
//!
//! Every logical entry has exactly one canonical artifact path under the
//! destination, derived from the resolved policy. The locations a record's
//! current artifact can occupy are derived from the record itself, never
//! guessed from file names; a successful backup leaves the canonical path
//! present and the record's previous location absent.

use crate::sync::compress::{CompressorBuilder, CompressorConfig};
use crate::sync::encrypt::{self, EncryptionMeta};
use crate::sync::finish::Finish;
use crate::sync::kv::table::CONTAINER_EXT;
use crate::sync::policy::Policy;
use crate::sync::result_error::result::Result;
use crate::sync::store::{FileRecord, RecordKind};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::{fs, io};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Directory under the destination holding every encrypted artifact.
pub const ENCRYPT_DIR: &str = ".encrypt";
/// Subdirectory of [`ENCRYPT_DIR`] for artifacts indexed by surrogate id
/// instead of logical name.
pub const ID_DIR: &str = ".id";

/// Logical name with the container suffix applied for key-value entries.
fn base_file_name(name: &str, kind: Option<RecordKind>) -> String {
    match kind {
        Some(RecordKind::KvStore) => format!("{name}.{CONTAINER_EXT}"),
        None => name.to_string(),
    }
}

/// The single path a successful backup of this entry must occupy.
///
/// Plain artifacts live at `<dest>/<program>/<name>` with the compression
/// suffix appended. Encrypted artifacts never carry a compression suffix;
/// with filename protection they collapse to an id-indexed path that leaks
/// neither program nor name.
pub fn canonical_path(
    dest: &Path,
    program: &str,
    name: &str,
    kind: Option<RecordKind>,
    policy: &Policy,
    id: i64,
) -> PathBuf {
    let base = base_file_name(name, kind);
    if policy.encrypt {
        if policy.protect_filename {
            dest.join(ENCRYPT_DIR).join(ID_DIR).join(id.to_string())
        } else {
            dest.join(ENCRYPT_DIR).join(program).join(base)
        }
    } else {
        let mut path = dest.join(program).join(base);
        if let Some(ext) = policy.compress.file_ext() {
            path = suffixed(&path, ext);
        }
        path
    }
}

/// The locations a record's artifact can occupy, derived from its persisted
/// state. A plain record has exactly one: the method tag doubles as the
/// compression suffix. An encrypted record has two, since filename
/// protection is a policy choice the record does not carry.
fn recorded_paths(dest: &Path, record: &FileRecord) -> Vec<PathBuf> {
    let base = base_file_name(&record.name, record.kind);
    if record.encryption.is_some() {
        vec![
            dest.join(ENCRYPT_DIR).join(&record.program).join(&base),
            dest.join(ENCRYPT_DIR)
                .join(ID_DIR)
                .join(record.id.to_string()),
        ]
    } else {
        let mut path = dest.join(&record.program).join(base);
        if let Some(method) = &record.compression {
            path = suffixed(&path, method);
        }
        vec![path]
    }
}

fn suffixed(path: &Path, ext: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".");
    s.push(ext);
    PathBuf::from(s)
}

/// Removes the artifact a superseded record state left behind, sparing
/// `keep`. Run after a retransfer so a policy change converges the
/// destination without touching any sibling entry's artifact.
pub fn remove_displaced(dest: &Path, previous: &FileRecord, keep: &Path) -> Result<()> {
    for path in recorded_paths(dest, previous) {
        if path != keep && path.is_file() {
            debug!(
                "{}: removing displaced artifact {}",
                previous.program,
                path.display()
            );
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Removes every artifact of the record. Used when the record itself goes
/// away.
pub fn purge_artifacts(dest: &Path, record: &FileRecord) -> Result<()> {
    for path in recorded_paths(dest, record) {
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// Locates the current artifact of a record. Encrypted records are searched
/// by name first, then by surrogate id.
pub fn find_artifact(dest: &Path, record: &FileRecord) -> Option<PathBuf> {
    recorded_paths(dest, record)
        .into_iter()
        .find(|path| path.is_file())
}

/// Transfers one source file to its canonical artifact path.
///
/// The artifact is assembled in a temp file next to its final location and
/// moved in with a rename, so a crash mid-transfer never leaves a partial
/// artifact at the canonical path. Returns the encryption metadata the
/// record must carry, or `None` for plain artifacts.
pub fn store_artifact(
    src: &Path,
    canonical: &Path,
    program: &str,
    name: &str,
    policy: &Policy,
    content_hash: &str,
) -> Result<Option<EncryptionMeta>> {
    let parent = canonical.parent().unwrap_or(canonical);
    fs::create_dir_all(parent)?;
    let original_size = fs::metadata(src)?.len();

    if policy.encrypt {
        let mut compressed = Vec::new();
        let mut compressor = policy.compress.build_compressor(&mut compressed)?;
        io::copy(&mut File::open(src)?, &mut compressor)?;
        compressor.finish()?;
        let (method, compressed_size) = if policy.compress.is_none() {
            (None, None)
        } else {
            log_compression(program, name, original_size, compressed.len() as u64);
            (policy.compress.method_name(), Some(compressed.len() as u64))
        };
        let (ciphertext, meta) = encrypt::seal(&compressed, content_hash, method, compressed_size)?;
        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&ciphertext)?;
        tmp.flush()?;
        tmp.persist(canonical).map_err(|e| e.error)?;
        Ok(Some(meta))
    } else {
        let tmp = NamedTempFile::new_in(parent)?;
        let mut compressor = policy.compress.build_compressor(tmp)?;
        io::copy(&mut File::open(src)?, &mut compressor)?;
        let tmp = compressor.finish()?;
        if !policy.compress.is_none() {
            let compressed_size = tmp.as_file().metadata()?.len();
            log_compression(program, name, original_size, compressed_size);
        }
        tmp.persist(canonical).map_err(|e| e.error)?;
        Ok(None)
    }
}

/// Reconstructs the original stream from an artifact into `dest_file`,
/// undoing encryption and compression as recorded. The write is staged in a
/// temp file and renamed in, so an existing file at `dest_file` is either
/// fully replaced or left untouched.
pub fn restore_artifact(artifact: &Path, dest_file: &Path, record: &FileRecord) -> Result<()> {
    let parent = dest_file.parent().unwrap_or(dest_file);
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;

    match &record.encryption {
        Some(meta) => {
            let mut ciphertext = Vec::new();
            File::open(artifact)?.read_to_end(&mut ciphertext)?;
            let sealed = encrypt::open(&ciphertext, meta, &record.hash)?;
            let config = match &meta.method {
                Some(method) => CompressorConfig::from_method_name(method)?,
                None => CompressorConfig::None,
            };
            let mut decompressor = config.build_decompressor(sealed.as_slice())?;
            io::copy(&mut decompressor, &mut tmp)?;
        }
        None => {
            let config = match &record.compression {
                Some(method) => CompressorConfig::from_method_name(method)?,
                None => CompressorConfig::None,
            };
            let mut decompressor = config.build_decompressor(File::open(artifact)?)?;
            io::copy(&mut decompressor, &mut tmp)?;
        }
    }
    tmp.flush()?;
    tmp.persist(dest_file).map_err(|e| e.error)?;
    Ok(())
}

fn log_compression(program: &str, name: &str, original: u64, compressed: u64) {
    let ratio = if original == 0 {
        100.0
    } else {
        compressed as f64 / original as f64 * 100.0
    };
    info!(
        "{program}: {name} compressed {} -> {} ({ratio:.2}%)",
        sizeof_fmt(original),
        sizeof_fmt(compressed),
    );
}

/// Human-readable byte count, binary units.
pub fn sizeof_fmt(size: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut value = size as f64;
    for unit in UNITS {
        if value < 1024.0 {
            return if *unit == "B" {
                format!("{size}B")
            } else {
                format!("{value:.1}{unit}")
            };
        }
        value /= 1024.0;
    }
    format!("{value:.1}EiB")
}
