//! Backup and restore orchestration.
//!
//! One worker thread per program; workers share the metadata store handle
//! and never touch each other's namespace, so the only synchronization is
//! the store's own lock. A failing entry aborts the rest of its program;
//! the other workers run to completion and the run fails at the end with
//! every error aggregated.

use crate::sync::config::{ProgramConfig, SyncConfig};
use crate::sync::fingerprint::{self, Fingerprint};
use crate::sync::kv::sled_store::SledKvStore;
use crate::sync::kv::{table, DomainFilter};
use crate::sync::policy::PolicyOverrides;
use crate::sync::resolve::{self, LogicalEntry};
use crate::sync::result_error::error::Error;
use crate::sync::result_error::result::{convert_error_vec, Result};
use crate::sync::result_error::WithMsg;
use crate::sync::store::{FileRecord, MetaStore, RecordKind};
use crate::sync::transform;
use clap::ValueEnum;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::thread;
use tempfile::NamedTempFile;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Transfer changed source entries into the destination tree.
    Backup,
    /// Rebuild source entries from the destination tree.
    Restore,
}

/// Runs one action over the selected programs, all workers to completion.
///
/// `selected` empty means every configured program. Unknown names are a
/// configuration error before any worker starts.
pub fn run(
    config: &SyncConfig,
    store: &MetaStore,
    action: Action,
    selected: &[String],
) -> Result<()> {
    let programs = select_programs(config, selected)?;
    let errors = thread::scope(|scope| {
        let handles: Vec<_> = programs
            .iter()
            .map(|program| {
                scope.spawn(move || {
                    match action {
                        Action::Backup => backup_program(program, &config.policy, &config.dest, store),
                        Action::Restore => restore_program(program, &config.policy, &config.dest, store),
                    }
                    .with_msg(format!("program {:?}", program.name))
                })
            })
            .collect();
        let mut errors = Vec::new();
        for (handle, program) in handles.into_iter().zip(programs.iter()) {
            match handle.join() {
                Ok(Ok(())) => (),
                Ok(Err(e)) => errors.push(e),
                Err(_) => errors.push(Error::Config(format!(
                    "worker for program {:?} panicked",
                    program.name
                ))),
            }
        }
        errors
    });
    convert_error_vec(errors)
}

fn select_programs<'a>(
    config: &'a SyncConfig,
    selected: &[String],
) -> Result<Vec<&'a ProgramConfig>> {
    if selected.is_empty() {
        return Ok(config.programs.iter().collect());
    }
    let mut programs = Vec::with_capacity(selected.len());
    for name in selected {
        match config.programs.iter().find(|p| p.name.as_ref() == name) {
            Some(program) => programs.push(program),
            None => {
                return Err(Error::Config(format!("unknown program {name:?}")));
            }
        }
    }
    Ok(programs)
}

fn domain_filter(domains: Option<&Vec<String>>) -> Option<DomainFilter> {
    domains.map(|d| DomainFilter::new(d.iter().cloned()))
}

fn entry_fingerprint(entry: &LogicalEntry) -> Result<Fingerprint> {
    match entry.kind {
        None => fingerprint::fingerprint_file(&entry.source),
        Some(RecordKind::KvStore) => {
            let kv = SledKvStore::open(&entry.source)?;
            let filter = domain_filter(entry.domains.as_ref());
            fingerprint::fingerprint_kv(&kv, filter.as_ref())
        }
    }
}

/// Transfers one entry to its canonical artifact and persists the new
/// fingerprint. The artifact a previous record state left elsewhere is
/// removed once the new one is in place.
fn transfer(
    entry: &LogicalEntry,
    program: &str,
    dest: &Path,
    store: &MetaStore,
    id: i64,
    print: &Fingerprint,
    previous: Option<&FileRecord>,
) -> Result<()> {
    let canonical = transform::canonical_path(dest, program, &entry.name, entry.kind, &entry.policy, id);
    let meta = match entry.kind {
        None => transform::store_artifact(
            &entry.source,
            &canonical,
            program,
            &entry.name,
            &entry.policy,
            &print.hash,
        )?,
        Some(RecordKind::KvStore) => {
            // The store is flattened into a tabular container first; the
            // container file is then transferred like any other file.
            let staged = NamedTempFile::new()?;
            let kv = SledKvStore::open(&entry.source)?;
            let filter = domain_filter(entry.domains.as_ref());
            table::export_to_table(&kv, filter.as_ref(), staged.path())?;
            transform::store_artifact(
                staged.path(),
                &canonical,
                program,
                &entry.name,
                &entry.policy,
                &print.hash,
            )?
        }
    };
    let compression = if entry.policy.encrypt {
        None
    } else {
        entry.policy.compress.method_name()
    };
    store.update_record(id, print.size, &print.hash, compression, meta.as_ref())?;
    match previous {
        Some(record) => transform::remove_displaced(dest, record, &canonical),
        None => Ok(()),
    }
}

fn backup_entry(
    entry: &LogicalEntry,
    program: &str,
    dest: &Path,
    store: &MetaStore,
) -> Result<()> {
    let print = entry_fingerprint(entry)?;
    let existing = store.get_record(program, &entry.name)?;

    let record = match existing {
        Some(record) if record.kind != entry.kind => {
            // The rule changed what this name is; the old state is useless.
            warn!("{program}: {} changed kind, replacing", entry.name);
            transform::purge_artifacts(dest, &record)?;
            store.remove_record(record.id)?;
            None
        }
        other => other,
    };

    let record = match record {
        None => {
            let id = store.add_record(program, &entry.name, entry.kind)?;
            transfer(entry, program, dest, store, id, &print, None)?;
            info!("{program}: Add {}", entry.name);
            return Ok(());
        }
        Some(record) => record,
    };

    let unchanged = print.matches(record.size, &record.hash)
        && record.encryption.is_some() == entry.policy.encrypt
        && (entry.policy.encrypt
            || record.compression.as_deref() == entry.policy.compress.method_name());
    if !unchanged {
        transfer(entry, program, dest, store, record.id, &print, Some(&record))?;
        info!("{program}: Update {}", entry.name);
        return Ok(());
    }

    let canonical =
        transform::canonical_path(dest, program, &entry.name, entry.kind, &entry.policy, record.id);
    match transform::find_artifact(dest, &record) {
        Some(found) if found == canonical => {
            info!("{program}: Skip {}", entry.name);
            Ok(())
        }
        Some(found) if entry.policy.encrypt => {
            // Filename-protection toggled; the ciphertext itself is still
            // valid, so a rename is enough.
            if let Some(parent) = canonical.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&found, &canonical)?;
            info!("{program}: Move {}", entry.name);
            Ok(())
        }
        _ => {
            // The artifact went missing under the record's own path.
            transfer(entry, program, dest, store, record.id, &print, Some(&record))?;
            info!("{program}: Update {}", entry.name);
            Ok(())
        }
    }
}

fn backup_program(
    program: &ProgramConfig,
    global: &PolicyOverrides,
    dest: &Path,
    store: &MetaStore,
) -> Result<()> {
    let resolution = resolve::resolve_program(program, global)?;
    let mut visited = HashSet::new();

    // A failed entry aborts the rest of the program, and in particular the
    // orphan sweep: with entries unvisited the sweep would retire records
    // that are still live.
    for entry in &resolution.entries {
        backup_entry(entry, &program.name, dest, store)
            .with_msg(format!("entry {:?}", entry.name))?;
        visited.insert(entry.name.clone());
    }

    // Records no rule produced this run are gone from the rule set, unless
    // the whole rule source is just transiently missing.
    let mut orphans: Vec<String> = store
        .list_names(&program.name)?
        .into_iter()
        .filter(|name| !visited.contains(name) && !resolution.covers_absent(name))
        .collect();
    orphans.sort();
    for name in orphans {
        if let Some(record) = store.get_record(&program.name, &name)? {
            transform::purge_artifacts(dest, &record)?;
            store.remove_record(record.id)?;
            info!("{}: Remove {name}", program.name);
        }
    }
    Ok(())
}

fn restore_entry(
    name: &str,
    program: &ProgramConfig,
    map: &resolve::NameMap,
    dest: &Path,
    store: &MetaStore,
) -> Result<()> {
    let Some(record) = store.get_record(&program.name, name)? else {
        return Ok(());
    };
    let Some(target) = map.lookup(name) else {
        warn!("{}: no rule maps {name:?}, skipping", program.name);
        return Ok(());
    };
    if target.kind != record.kind {
        return Err(Error::TypeMismatch {
            program: program.name.to_string(),
            name: name.to_string(),
        });
    }
    let Some(artifact) = transform::find_artifact(dest, &record) else {
        return Err(Error::CorruptStore(format!(
            "artifact missing for {}/{name}",
            program.name
        )));
    };

    match record.kind {
        None => {
            if target.path.is_file() {
                if let Ok(print) = fingerprint::fingerprint_file(&target.path) {
                    if print.matches(record.size, &record.hash) {
                        info!("{}: Skip {name}", program.name);
                        return Ok(());
                    }
                }
            }
            transform::restore_artifact(&artifact, &target.path, &record)?;
        }
        Some(RecordKind::KvStore) => {
            let filter = domain_filter(target.domains.as_ref());
            let mut kv = SledKvStore::open(&target.path)?;
            if fingerprint::fingerprint_kv(&kv, filter.as_ref())?
                .matches(record.size, &record.hash)
            {
                info!("{}: Skip {name}", program.name);
                return Ok(());
            }
            let staged = NamedTempFile::new()?;
            transform::restore_artifact(&artifact, staged.path(), &record)?;
            table::import_from_table(staged.path(), &mut kv, filter.as_ref())?;
            kv.flush()?;
        }
    }
    info!("{}: Restore {name}", program.name);
    Ok(())
}

fn restore_program(
    program: &ProgramConfig,
    global: &PolicyOverrides,
    dest: &Path,
    store: &MetaStore,
) -> Result<()> {
    let map = resolve::name_map(program)?;
    let mut names: Vec<String> = store.list_names(&program.name)?.into_iter().collect();
    names.sort();

    for name in &names {
        restore_entry(name, program, &map, dest, store).with_msg(format!("entry {name:?}"))?;
    }

    // Files under the rules with no record are leftovers from a state the
    // backup no longer describes.
    let recorded: HashSet<&String> = names.iter().collect();
    for entry in resolve::resolve_program(program, global)?.entries {
        if entry.kind.is_none()
            && entry.policy.remove_old_files
            && !recorded.contains(&entry.name)
        {
            fs::remove_file(&entry.source)?;
            info!("{}: Remove {}", program.name, entry.name);
        }
    }
    Ok(())
}
