use crate::sync::pattern::PatternConfig;
use crate::sync::policy::PolicyOverrides;
use crate::sync::validate::{validate_dir_exist_or_created, validate_program_name};
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::result;
use std::sync::Arc;
use validator::{Validate, ValidationError, ValidationErrors};

/// Top-level configuration: one destination tree, many tracked programs.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Backup destination root; artifacts land under `<dest>/<program>/`.
    #[validate(custom(function = validate_dest))]
    #[builder(into)]
    pub dest: Arc<Path>,
    /// Keep the metadata store sealed at rest with a passphrase.
    #[serde(default)]
    #[builder(default)]
    pub encrypt_db: bool,
    /// Global policy defaults, overridable per program and per rule.
    #[serde(default)]
    #[builder(default)]
    pub policy: PolicyOverrides,
    #[validate(nested, custom(function = validate_unique_programs))]
    pub programs: Vec<ProgramConfig>,
}

fn validate_dest(dir: &Arc<Path>) -> result::Result<(), ValidationError> {
    validate_dir_exist_or_created(dir)
}

fn validate_unique_programs(
    programs: &Vec<ProgramConfig>,
) -> result::Result<(), ValidationError> {
    let mut seen = HashSet::new();
    for prog in programs {
        if !seen.insert(prog.name.as_ref()) {
            return Err(ValidationError::new("DuplicateProgram")
                .with_message(format!("duplicate program name {:?}", prog.name).into()));
        }
    }
    Ok(())
}

/// One tracked program: a base directory plus the file rules under it.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Validate, Builder)]
#[serde(deny_unknown_fields)]
pub struct ProgramConfig {
    #[validate(custom(function = validate_name))]
    #[builder(into)]
    pub name: Arc<str>,
    #[builder(into)]
    pub base: Arc<Path>,
    #[validate(length(min = 1), nested)]
    pub files: Vec<FileRule>,
    #[serde(default)]
    #[builder(default)]
    pub policy: PolicyOverrides,
}

fn validate_name(name: &Arc<str>) -> result::Result<(), ValidationError> {
    validate_program_name(name)
}

/// One file rule. A bare string is shorthand for a path rule with defaults.
#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(untagged)]
pub enum FileRule {
    Plain(String),
    Full(FullRule),
}

#[derive(Clone, Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum FullRule {
    Path(PathRule),
    Kv(KvRule),
}

/// A literal file or a directory tree to expand.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Builder)]
#[serde(deny_unknown_fields)]
pub struct PathRule {
    #[builder(into)]
    pub path: PathBuf,
    /// Logical-name alias; mandatory when `path` is absolute.
    #[builder(into)]
    pub name: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub include: Vec<PatternConfig>,
    #[serde(default)]
    #[builder(default)]
    pub exclude: Vec<PatternConfig>,
    #[serde(default)]
    #[builder(default)]
    pub policy: PolicyOverrides,
}

/// An embedded key-value store mount, optionally restricted to domains.
#[skip_serializing_none]
#[derive(Clone, Serialize, Deserialize, Debug, Builder)]
#[serde(deny_unknown_fields)]
pub struct KvRule {
    #[builder(into)]
    pub path: PathBuf,
    pub name: Option<String>,
    pub domains: Option<Vec<String>>,
    #[serde(default)]
    #[builder(default)]
    pub policy: PolicyOverrides,
}

fn absolute_needs_alias(path: &Path, name: Option<&String>) -> result::Result<(), ValidationErrors> {
    if path.is_absolute() && name.is_none() {
        let mut errors = ValidationErrors::new();
        errors.add(
            "path",
            ValidationError::new("AmbiguousName").with_message(
                format!("absolute path {:?} requires an explicit name", path).into(),
            ),
        );
        return Err(errors);
    }
    Ok(())
}

impl Validate for FileRule {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            FileRule::Plain(s) => absolute_needs_alias(Path::new(s), None),
            FileRule::Full(r) => r.validate(),
        }
    }
}

impl Validate for FullRule {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            FullRule::Path(r) => {
                absolute_needs_alias(&r.path, r.name.as_ref())?;
                r.policy.validate()
            }
            FullRule::Kv(r) => {
                absolute_needs_alias(&r.path, r.name.as_ref())?;
                r.policy.validate()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn minimal_yaml(dest: &Path) -> String {
        format!(
            "dest: {:?}\nprograms:\n  - name: P\n    base: /g\n    files:\n      - save.dat\n",
            dest
        )
    }

    #[test]
    fn test_minimal_config_parses_and_validates() {
        let temp = TempDir::new().unwrap();
        let config: SyncConfig = serde_yml::from_str(&minimal_yaml(temp.path())).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.programs.len(), 1);
        assert_eq!(config.programs[0].name.as_ref(), "P");
        match &config.programs[0].files[0] {
            FileRule::Plain(s) => assert_eq!(s, "save.dat"),
            other => panic!("Expected plain rule, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_program_names_rejected() {
        let temp = TempDir::new().unwrap();
        let yaml = format!(
            "dest: {:?}\nprograms:\n  - name: P\n    base: /g\n    files: [a]\n  - name: P\n    base: /h\n    files: [b]\n",
            temp.path()
        );
        let config: SyncConfig = serde_yml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_files_rejected() {
        let temp = TempDir::new().unwrap();
        let yaml = format!(
            "dest: {:?}\nprograms:\n  - name: P\n    base: /g\n    files: []\n",
            temp.path()
        );
        let config: SyncConfig = serde_yml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_absolute_path_without_alias_rejected() {
        let rule = FileRule::Full(FullRule::Path(
            PathRule::builder().path("/abs/save.dat").build(),
        ));
        assert!(rule.validate().is_err());

        let rule = FileRule::Full(FullRule::Path(
            PathRule::builder()
                .path("/abs/save.dat")
                .name("save.dat")
                .build(),
        ));
        assert!(rule.validate().is_ok());

        let rule = FileRule::Plain("/abs/save.dat".into());
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_full_rule_yaml_forms() {
        let yaml = r#"
- save.dat
- type: path
  path: saves
  exclude: ["*.tmp"]
  policy:
    compress:
      method: xz
- type: kv
  path: leveldb
  name: settings
  domains: [profile, options]
  policy:
    encrypt: true
"#;
        let rules: Vec<FileRule> = serde_yml::from_str(yaml).unwrap();
        assert_eq!(rules.len(), 3);
        match &rules[2] {
            FileRule::Full(FullRule::Kv(kv)) => {
                assert_eq!(kv.name.as_deref(), Some("settings"));
                assert_eq!(kv.domains.as_ref().unwrap().len(), 2);
                assert_eq!(kv.policy.encrypt, Some(true));
            }
            other => panic!("Expected kv rule, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let temp = TempDir::new().unwrap();
        let yaml = format!(
            "dest: {:?}\nbogus: 1\nprograms:\n  - name: P\n    base: /g\n    files: [a]\n",
            temp.path()
        );
        assert!(serde_yml::from_str::<SyncConfig>(&yaml).is_err());
    }
}
