//! Rule resolution: expands a program's configured rules into the logical
//! entries that currently exist at the source.
//!
//! Resolution is deterministic: directory walks are sorted, duplicate names
//! keep their first occurrence, and every entry carries its fully resolved
//! policy. A rule whose source is missing produces no entries but is
//! reported as absent, so a transiently unavailable source does not count
//! as removed from the rule set.

use crate::sync::config::{FileRule, FullRule, KvRule, PathRule, ProgramConfig};
use crate::sync::pattern::EntryFilter;
use crate::sync::policy::{Policy, PolicyOverrides};
use crate::sync::result_error::error::Error;
use crate::sync::result_error::result::Result;
use crate::sync::store::RecordKind;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// One concrete thing to transfer: a file or a key-value store that exists
/// at the source right now.
#[derive(Debug)]
pub struct LogicalEntry {
    /// Destination-relative logical name, `/`-separated.
    pub name: String,
    /// Absolute source path.
    pub source: PathBuf,
    /// `None` for plain files.
    pub kind: Option<RecordKind>,
    pub policy: Policy,
    /// Domain restriction for key-value entries; `None` copies everything.
    pub domains: Option<Vec<String>>,
}

/// Outcome of resolving one program's rules.
#[derive(Debug)]
pub struct Resolution {
    pub entries: Vec<LogicalEntry>,
    /// Aliases of rules whose source is currently missing. Names under
    /// these aliases stay tracked; the source being gone right now is not
    /// the same as the rule being gone.
    pub absent: Vec<String>,
}

impl Resolution {
    /// Whether a stored name belongs to a rule that is configured but
    /// currently has no source.
    pub fn covers_absent(&self, name: &str) -> bool {
        self.absent.iter().any(|alias| {
            name == alias
                || name
                    .strip_prefix(alias.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// Maps stored logical names back to absolute source paths for restore.
/// One mapping per rule, longest alias checked first so nested aliases
/// cannot shadow each other.
pub struct NameMap {
    mappings: Vec<RuleTarget>,
}

struct RuleTarget {
    alias: String,
    root: PathBuf,
    kind: Option<RecordKind>,
    domains: Option<Vec<String>>,
}

/// Where one stored name lands at the source, and what the rule says it is.
#[derive(Debug, PartialEq)]
pub struct RestoreTarget {
    pub path: PathBuf,
    pub kind: Option<RecordKind>,
    pub domains: Option<Vec<String>>,
}

impl NameMap {
    pub fn lookup(&self, name: &str) -> Option<RestoreTarget> {
        for target in &self.mappings {
            if name == target.alias {
                return Some(RestoreTarget {
                    path: target.root.clone(),
                    kind: target.kind,
                    domains: target.domains.clone(),
                });
            }
            // Prefix matches only make sense for path rules, where a
            // directory expands into many names.
            if target.kind.is_some() {
                continue;
            }
            if let Some(rest) = name.strip_prefix(target.alias.as_str()) {
                if let Some(rest) = rest.strip_prefix('/') {
                    return Some(RestoreTarget {
                        path: target.root.join(rest),
                        kind: None,
                        domains: None,
                    });
                }
            }
        }
        None
    }
}

fn rule_alias_and_source(
    path: &Path,
    name: Option<&str>,
    base: &Path,
) -> Result<(String, PathBuf)> {
    let alias = match name {
        Some(name) => name.to_string(),
        None if path.is_absolute() => {
            return Err(Error::Config(format!(
                "absolute path {path:?} requires an explicit name"
            )))
        }
        None => path.to_string_lossy().into_owned(),
    };
    let source = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    Ok((alias, source))
}

fn is_hidden(rel: &Path) -> bool {
    rel.components().any(|c| match c {
        Component::Normal(s) => s.to_string_lossy().starts_with('.'),
        _ => false,
    })
}

/// Expands one program's rules into the logical entries present on disk.
pub fn resolve_program(program: &ProgramConfig, global: &PolicyOverrides) -> Result<Resolution> {
    let mut resolution = Resolution {
        entries: Vec::new(),
        absent: Vec::new(),
    };
    let mut seen = HashSet::new();
    for rule in &program.files {
        match rule {
            FileRule::Plain(path) => resolve_path_rule(
                &PathRule::builder().path(path.as_str()).build(),
                program,
                global,
                &mut resolution,
                &mut seen,
            )?,
            FileRule::Full(FullRule::Path(path_rule)) => {
                resolve_path_rule(path_rule, program, global, &mut resolution, &mut seen)?
            }
            FileRule::Full(FullRule::Kv(kv_rule)) => {
                resolve_kv_rule(kv_rule, program, global, &mut resolution, &mut seen)?
            }
        }
    }
    Ok(resolution)
}

fn push_entry(
    program: &ProgramConfig,
    resolution: &mut Resolution,
    seen: &mut HashSet<String>,
    entry: LogicalEntry,
) {
    if seen.insert(entry.name.clone()) {
        resolution.entries.push(entry);
    } else {
        warn!(
            "{}: duplicate logical name {:?}, keeping the first rule",
            program.name, entry.name
        );
    }
}

fn resolve_path_rule(
    rule: &PathRule,
    program: &ProgramConfig,
    global: &PolicyOverrides,
    resolution: &mut Resolution,
    seen: &mut HashSet<String>,
) -> Result<()> {
    let policy = Policy::resolve(&rule.policy, &program.policy, global);
    let (alias, source) = rule_alias_and_source(&rule.path, rule.name.as_deref(), &program.base)?;

    if source.is_file() {
        push_entry(
            program,
            resolution,
            seen,
            LogicalEntry {
                name: alias,
                source,
                kind: None,
                policy,
                domains: None,
            },
        );
        return Ok(());
    }
    if !source.is_dir() {
        warn!("{}: source missing for {:?}", program.name, source);
        resolution.absent.push(alias);
        return Ok(());
    }

    let filter = EntryFilter::compile(&rule.include, &rule.exclude, policy.regex_patterns)?;
    for walked in WalkDir::new(&source)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            // Prunes hidden subtrees early so the walk never descends them.
            !policy.ignore_hidden
                || e.depth() == 0
                || !e.file_name().to_string_lossy().starts_with('.')
        })
    {
        let walked = walked?;
        if !walked.file_type().is_file() {
            continue;
        }
        let rel = walked.path().strip_prefix(&source)?.to_path_buf();
        if policy.ignore_hidden && is_hidden(&rel) {
            continue;
        }
        if !filter.keeps(&rel, walked.path()) {
            continue;
        }
        let name = format!("{alias}/{}", rel.to_string_lossy());
        push_entry(
            program,
            resolution,
            seen,
            LogicalEntry {
                name,
                source: walked.path().to_path_buf(),
                kind: None,
                policy: policy.clone(),
                domains: None,
            },
        );
    }
    Ok(())
}

fn resolve_kv_rule(
    rule: &KvRule,
    program: &ProgramConfig,
    global: &PolicyOverrides,
    resolution: &mut Resolution,
    seen: &mut HashSet<String>,
) -> Result<()> {
    let policy = Policy::resolve(&rule.policy, &program.policy, global);
    let (alias, source) = rule_alias_and_source(&rule.path, rule.name.as_deref(), &program.base)?;
    if !source.is_dir() {
        warn!(
            "{}: key-value store missing for {:?}",
            program.name, source
        );
        resolution.absent.push(alias);
        return Ok(());
    }
    push_entry(
        program,
        resolution,
        seen,
        LogicalEntry {
            name: alias,
            source,
            kind: Some(RecordKind::KvStore),
            policy,
            domains: rule.domains.clone(),
        },
    );
    Ok(())
}

/// Builds the restore-time name mapping for one program. Longer aliases go
/// first so `saves/extra` wins over `saves` for names under both.
pub fn name_map(program: &ProgramConfig) -> Result<NameMap> {
    let mut mappings = Vec::new();
    for rule in &program.files {
        let (path, name, kind, domains): (&Path, Option<&str>, _, _) = match rule {
            FileRule::Plain(path) => (Path::new(path), None, None, None),
            FileRule::Full(FullRule::Path(r)) => (&r.path, r.name.as_deref(), None, None),
            FileRule::Full(FullRule::Kv(r)) => (
                &r.path,
                r.name.as_deref(),
                Some(RecordKind::KvStore),
                r.domains.clone(),
            ),
        };
        let (alias, root) = rule_alias_and_source(path, name, &program.base)?;
        mappings.push(RuleTarget {
            alias,
            root,
            kind,
            domains,
        });
    }
    mappings.sort_by(|a, b| b.alias.len().cmp(&a.alias.len()));
    Ok(NameMap { mappings })
}
