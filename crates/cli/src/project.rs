//! Project manifest loader
//!
//! Plain-text, line-oriented manifests: one `directive value` pair per
//! line, `#` comments, blank lines ignored. Unknown directives and
//! duplicates are rejected with `file:line: message` diagnostics so
//! editors can jump straight to the offending line.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Optimisation level requested by a manifest or `-O` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    O0,
    #[default]
    O1,
    O2,
}

impl OptLevel {
    pub fn parse(token: &str) -> Option<OptLevel> {
        match token {
            "O0" => Some(OptLevel::O0),
            "O1" => Some(OptLevel::O1),
            "O2" => Some(OptLevel::O2),
            _ => None,
        }
    }

    pub fn pipeline_name(&self) -> &'static str {
        match self {
            OptLevel::O0 => "O0",
            OptLevel::O1 => "O1",
            OptLevel::O2 => "O2",
        }
    }
}

/// Source language of a project. Frontends are external to this crate;
/// the loader records the declaration so the driver can report what is
/// missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectLang {
    Zia,
    Basic,
}

/// Parsed project manifest.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub name: String,
    pub version: Option<String>,
    pub lang: Option<ProjectLang>,
    pub entry: Option<PathBuf>,
    pub sources: Vec<PathBuf>,
    pub excludes: Vec<PathBuf>,
    pub optimize: OptLevel,
    pub bounds_checks: bool,
    pub overflow_checks: bool,
    pub null_checks: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        ProjectConfig {
            name: String::new(),
            version: None,
            lang: None,
            entry: None,
            sources: Vec::new(),
            excludes: Vec::new(),
            optimize: OptLevel::default(),
            bounds_checks: false,
            overflow_checks: true,
            null_checks: true,
        }
    }
}

fn manifest_err(path: &Path, line: usize, message: impl Into<String>) -> String {
    format!("{}:{}: {}", path.display(), line, message.into())
}

fn parse_switch(value: &str, path: &Path, line: usize, directive: &str) -> Result<bool, String> {
    match value {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => Err(manifest_err(
            path,
            line,
            format!("invalid value '{}' for '{}' (expected on|off)", other, directive),
        )),
    }
}

/// Parse manifest text. `path` is used only for diagnostics.
pub fn parse_manifest(path: &Path, text: &str) -> Result<ProjectConfig, String> {
    let mut config = ProjectConfig::default();
    let mut seen: HashSet<&str> = HashSet::new();

    let mut check_duplicate = |directive: &'static str, line: usize| -> Result<(), String> {
        if !seen.insert(directive) {
            return Err(manifest_err(
                path,
                line,
                format!("duplicate directive '{}'", directive),
            ));
        }
        Ok(())
    };

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (directive, value) = match line.split_once(char::is_whitespace) {
            Some((d, v)) => (d, v.trim()),
            None => (line, ""),
        };
        if value.is_empty() {
            return Err(manifest_err(
                path,
                line_no,
                format!("missing value for '{}'", directive),
            ));
        }

        match directive {
            "project" => {
                check_duplicate("project", line_no)?;
                config.name = value.to_string();
            }
            "version" => {
                check_duplicate("version", line_no)?;
                config.version = Some(value.to_string());
            }
            "lang" => {
                check_duplicate("lang", line_no)?;
                config.lang = Some(match value {
                    "zia" => ProjectLang::Zia,
                    "basic" => ProjectLang::Basic,
                    other => {
                        return Err(manifest_err(
                            path,
                            line_no,
                            format!("unknown language '{}'", other),
                        ))
                    }
                });
            }
            "entry" => {
                check_duplicate("entry", line_no)?;
                config.entry = Some(PathBuf::from(value));
            }
            "sources" => {
                config.sources.push(PathBuf::from(value));
            }
            "exclude" => {
                config.excludes.push(PathBuf::from(value));
            }
            "optimize" => {
                check_duplicate("optimize", line_no)?;
                config.optimize = OptLevel::parse(value).ok_or_else(|| {
                    manifest_err(path, line_no, format!("unknown optimize level '{}'", value))
                })?;
            }
            "bounds-checks" => {
                check_duplicate("bounds-checks", line_no)?;
                config.bounds_checks = parse_switch(value, path, line_no, "bounds-checks")?;
            }
            "overflow-checks" => {
                check_duplicate("overflow-checks", line_no)?;
                config.overflow_checks = parse_switch(value, path, line_no, "overflow-checks")?;
            }
            "null-checks" => {
                check_duplicate("null-checks", line_no)?;
                config.null_checks = parse_switch(value, path, line_no, "null-checks")?;
            }
            other => {
                return Err(manifest_err(
                    path,
                    line_no,
                    format!("unknown directive '{}'", other),
                ));
            }
        }
    }

    if config.name.is_empty() {
        return Err(format!("{}: missing 'project' directive", path.display()));
    }
    Ok(config)
}

/// Load a manifest from disk.
pub fn load_manifest(path: &Path) -> Result<ProjectConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    parse_manifest(path, &text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ProjectConfig, String> {
        parse_manifest(Path::new("viper.proj"), text)
    }

    #[test]
    fn test_full_manifest() {
        let config = parse(
            "# demo project\nproject demo\nversion 1.2.3\nlang basic\nentry src/main.bas\nsources src\nexclude src/old\noptimize O2\nbounds-checks on\noverflow-checks off\nnull-checks on\n",
        )
        .unwrap();
        assert_eq!(config.name, "demo");
        assert_eq!(config.version.as_deref(), Some("1.2.3"));
        assert_eq!(config.lang, Some(ProjectLang::Basic));
        assert_eq!(config.optimize, OptLevel::O2);
        assert!(config.bounds_checks);
        assert!(!config.overflow_checks);
        assert!(config.null_checks);
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.excludes.len(), 1);
    }

    #[test]
    fn test_unknown_directive() {
        let err = parse("project demo\nflavour spicy\n").unwrap_err();
        assert!(err.contains("viper.proj:2:"), "{}", err);
        assert!(err.contains("unknown directive 'flavour'"), "{}", err);
    }

    #[test]
    fn test_duplicate_directive() {
        let err = parse("project a\nproject b\n").unwrap_err();
        assert!(err.contains("viper.proj:2:"), "{}", err);
        assert!(err.contains("duplicate directive 'project'"), "{}", err);
    }

    #[test]
    fn test_bad_switch_value() {
        let err = parse("project demo\nbounds-checks maybe\n").unwrap_err();
        assert!(err.contains("invalid value 'maybe'"), "{}", err);
    }

    #[test]
    fn test_repeatable_sources() {
        let config = parse("project demo\nsources a\nsources b\n").unwrap();
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn test_missing_project_name() {
        let err = parse("version 1.0.0\n").unwrap_err();
        assert!(err.contains("missing 'project' directive"), "{}", err);
    }
}
