use crate::sync::compress::CompressorConfig;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::result;
use validator::{Validate, ValidationErrors};

/// Per-scope policy knobs as written in the configuration file.
///
/// Every field is optional; absence falls through to the next scope in the
/// entry -> program -> global chain.
#[skip_serializing_none]
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    pub compress: Option<CompressorConfig>,
    pub encrypt: Option<bool>,
    pub protect_filename: Option<bool>,
    pub remove_old_files: Option<bool>,
    pub ignore_hidden: Option<bool>,
    /// Treat bare include/exclude patterns as regular expressions instead of
    /// the literal/wildcard classification.
    pub regex_patterns: Option<bool>,
}

impl Validate for PolicyOverrides {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match &self.compress {
            Some(c) => c.validate(),
            None => Ok(()),
        }
    }
}

/// Fully resolved policy attached to one logical entry for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct Policy {
    pub compress: CompressorConfig,
    pub encrypt: bool,
    pub protect_filename: bool,
    pub remove_old_files: bool,
    pub ignore_hidden: bool,
    pub regex_patterns: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            compress: CompressorConfig::None,
            encrypt: false,
            protect_filename: false,
            remove_old_files: true,
            ignore_hidden: true,
            regex_patterns: false,
        }
    }
}

fn first_present<T: Clone>(entry: &Option<T>, program: &Option<T>, global: &Option<T>) -> Option<T> {
    entry
        .as_ref()
        .or(program.as_ref())
        .or(global.as_ref())
        .cloned()
}

impl Policy {
    /// Most specific scope wins, absence falls through to the hard-coded
    /// defaults.
    pub fn resolve(
        entry: &PolicyOverrides,
        program: &PolicyOverrides,
        global: &PolicyOverrides,
    ) -> Policy {
        let defaults = Policy::default();
        Policy {
            compress: first_present(&entry.compress, &program.compress, &global.compress)
                .unwrap_or(defaults.compress),
            encrypt: first_present(&entry.encrypt, &program.encrypt, &global.encrypt)
                .unwrap_or(defaults.encrypt),
            protect_filename: first_present(
                &entry.protect_filename,
                &program.protect_filename,
                &global.protect_filename,
            )
            .unwrap_or(defaults.protect_filename),
            remove_old_files: first_present(
                &entry.remove_old_files,
                &program.remove_old_files,
                &global.remove_old_files,
            )
            .unwrap_or(defaults.remove_old_files),
            ignore_hidden: first_present(
                &entry.ignore_hidden,
                &program.ignore_hidden,
                &global.ignore_hidden,
            )
            .unwrap_or(defaults.ignore_hidden),
            regex_patterns: first_present(
                &entry.regex_patterns,
                &program.regex_patterns,
                &global.regex_patterns,
            )
            .unwrap_or(defaults.regex_patterns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_all_scopes_empty() {
        let empty = PolicyOverrides::default();
        let policy = Policy::resolve(&empty, &empty, &empty);
        assert_eq!(policy, Policy::default());
        assert!(policy.ignore_hidden);
        assert!(policy.remove_old_files);
        assert!(!policy.encrypt);
    }

    #[test]
    fn test_entry_scope_wins() {
        let entry = PolicyOverrides {
            encrypt: Some(false),
            ..Default::default()
        };
        let program = PolicyOverrides {
            encrypt: Some(true),
            protect_filename: Some(true),
            ..Default::default()
        };
        let global = PolicyOverrides {
            encrypt: Some(true),
            ignore_hidden: Some(false),
            ..Default::default()
        };

        let policy = Policy::resolve(&entry, &program, &global);
        assert!(!policy.encrypt);
        assert!(policy.protect_filename);
        assert!(!policy.ignore_hidden);
    }

    #[test]
    fn test_program_scope_falls_through_to_global() {
        let empty = PolicyOverrides::default();
        let global = PolicyOverrides {
            remove_old_files: Some(false),
            ..Default::default()
        };
        let policy = Policy::resolve(&empty, &empty, &global);
        assert!(!policy.remove_old_files);
    }

    #[test]
    fn test_explicit_no_compression_overrides_program() {
        let entry = PolicyOverrides {
            compress: Some(CompressorConfig::None),
            ..Default::default()
        };
        let program = PolicyOverrides {
            compress: Some(CompressorConfig::Xz(Default::default())),
            ..Default::default()
        };
        let policy = Policy::resolve(&entry, &program, &PolicyOverrides::default());
        assert!(policy.compress.is_none());
    }

    #[test]
    fn test_overrides_yaml_deserialization() {
        let yaml = "encrypt: true\ncompress:\n  method: gzip\n  level: 4\n";
        let overrides: PolicyOverrides = serde_yml::from_str(yaml).unwrap();
        assert_eq!(overrides.encrypt, Some(true));
        assert_eq!(
            overrides.compress.as_ref().and_then(|c| c.file_ext()),
            Some("gz")
        );
        assert!(overrides.validate().is_ok());
    }
}
