use crate::sync::result_error::result::Result;
use globset::{GlobBuilder, GlobMatcher};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One include/exclude pattern as written in the configuration.
///
/// A bare string is classified when compiled: a wildcard pattern if it
/// contains `*` or `?`, otherwise a literal relative/absolute path. The map
/// form forces regular-expression matching.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PatternConfig {
    Plain(String),
    Regex {
        regex: String,
        #[serde(default)]
        case_insensitive: bool,
    },
}

enum Matcher {
    Literal(PathBuf),
    Glob(GlobMatcher),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, rel: &Path, abs: &Path) -> bool {
        match self {
            Matcher::Literal(p) => {
                if p.is_absolute() {
                    abs == p
                } else {
                    rel == p
                }
            }
            Matcher::Glob(g) => g.is_match(rel),
            // Anchored at the start of the relative path, like a prefix match.
            Matcher::Regex(re) => re
                .find(&rel.to_string_lossy())
                .is_some_and(|m| m.start() == 0),
        }
    }
}

/// A compiled list of patterns; matches if any single pattern matches.
pub struct PatternSet {
    matchers: Vec<Matcher>,
}

impl PatternSet {
    pub fn compile(configs: &[PatternConfig], regex_default: bool) -> Result<PatternSet> {
        let mut matchers = Vec::with_capacity(configs.len());
        for config in configs {
            matchers.push(match config {
                PatternConfig::Plain(s) if regex_default => {
                    Matcher::Regex(RegexBuilder::new(s).build()?)
                }
                PatternConfig::Plain(s) if s.contains('*') || s.contains('?') => {
                    // Wildcards cross path separators, matching the whole
                    // relative path like a substituted regular expression.
                    Matcher::Glob(
                        GlobBuilder::new(s)
                            .literal_separator(false)
                            .build()?
                            .compile_matcher(),
                    )
                }
                PatternConfig::Plain(s) => Matcher::Literal(PathBuf::from(s)),
                PatternConfig::Regex {
                    regex,
                    case_insensitive,
                } => Matcher::Regex(
                    RegexBuilder::new(regex)
                        .case_insensitive(*case_insensitive)
                        .build()?,
                ),
            });
        }
        Ok(PatternSet { matchers })
    }

    pub fn matches(&self, rel: &Path, abs: &Path) -> bool {
        self.matchers.iter().any(|m| m.is_match(rel, abs))
    }
}

/// Include/exclude filter for one directory rule.
///
/// Exclude is checked before include; a missing include list means
/// include-all.
pub struct EntryFilter {
    include: Option<PatternSet>,
    exclude: Option<PatternSet>,
}

impl EntryFilter {
    pub fn compile(
        include: &[PatternConfig],
        exclude: &[PatternConfig],
        regex_default: bool,
    ) -> Result<EntryFilter> {
        Ok(EntryFilter {
            include: if include.is_empty() {
                None
            } else {
                Some(PatternSet::compile(include, regex_default)?)
            },
            exclude: if exclude.is_empty() {
                None
            } else {
                Some(PatternSet::compile(exclude, regex_default)?)
            },
        })
    }

    pub fn keeps(&self, rel: &Path, abs: &Path) -> bool {
        if let Some(exclude) = &self.exclude {
            if exclude.matches(rel, abs) {
                return false;
            }
        }
        match &self.include {
            Some(include) => include.matches(rel, abs),
            None => true,
        }
    }
}
