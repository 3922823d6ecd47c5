//! `KEY=VALUE` environment file parsing.

use std::collections::BTreeMap;
use std::path::Path;

use stevedore_common::error::ConfigError;

/// Parsed contents of an environment file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    vars: BTreeMap<String, String>,
}

impl EnvFile {
    /// Returns the value for `key`, if set.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Returns the value for `key` when it is set and not blank.
    #[must_use]
    pub fn non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    /// Consumes the file, returning all variables.
    #[must_use]
    pub fn into_vars(self) -> BTreeMap<String, String> {
        self.vars
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variables were declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Reads and parses the environment file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError::MissingEnvFile`] if the file does not exist, or any
/// error from [`parse`].
pub fn load(path: &Path) -> Result<EnvFile, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::MissingEnvFile {
                path: path.to_path_buf(),
            });
        }
        Err(e) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };
    tracing::debug!(path = %path.display(), "parsing environment file");
    parse(&content, path)
}

/// Parses environment file content. `path` is only used in errors.
///
/// Blank lines and lines starting with `#` are skipped. An optional
/// `export ` prefix is accepted, and values wrapped in matching quotes are
/// unquoted. Later duplicates win.
///
/// # Errors
///
/// Returns [`ConfigError::MalformedLine`] for a line without `=` or with an
/// empty key.
pub fn parse(content: &str, path: &Path) -> Result<EnvFile, ConfigError> {
    let mut vars = BTreeMap::new();
    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").map_or(line, str::trim_start);
        let malformed = || ConfigError::MalformedLine {
            path: path.to_path_buf(),
            line: idx + 1,
            content: raw.to_string(),
        };
        let (key, value) = line.split_once('=').ok_or_else(malformed)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed());
        }
        let _ = vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    Ok(EnvFile { vars })
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(content: &str) -> Result<EnvFile, ConfigError> {
        parse(content, Path::new(".env"))
    }

    #[test]
    fn parses_pairs_and_skips_comments() {
        let env = parse_str("# project\n\nCOMPOSE_PROJECT_NAME=viewiemedia\nAPP_ENV=local\n")
            .expect("should parse");
        assert_eq!(env.len(), 2);
        assert_eq!(env.get("COMPOSE_PROJECT_NAME"), Some("viewiemedia"));
        assert_eq!(env.get("APP_ENV"), Some("local"));
    }

    #[test]
    fn value_may_contain_equals() {
        let env = parse_str("DSN=mysql://u:p@db/app?x=1").expect("should parse");
        assert_eq!(env.get("DSN"), Some("mysql://u:p@db/app?x=1"));
    }

    #[test]
    fn strips_quotes_and_export_prefix() {
        let env = parse_str("export A=\"one two\"\nB='three'\nC=\"unbalanced'").expect("parse");
        assert_eq!(env.get("A"), Some("one two"));
        assert_eq!(env.get("B"), Some("three"));
        assert_eq!(env.get("C"), Some("\"unbalanced'"));
    }

    #[test]
    fn empty_value_is_kept_but_not_non_empty() {
        let env = parse_str("COMPOSE_PROJECT_NAME=").expect("parse");
        assert_eq!(env.get("COMPOSE_PROJECT_NAME"), Some(""));
        assert_eq!(env.non_empty("COMPOSE_PROJECT_NAME"), None);
    }

    #[test]
    fn later_duplicate_wins() {
        let env = parse_str("A=1\nA=2").expect("parse");
        assert_eq!(env.get("A"), Some("2"));
    }

    #[test]
    fn line_without_equals_is_malformed() {
        let err = parse_str("A=1\nJUSTAKEY\n").unwrap_err();
        match err {
            ConfigError::MalformedLine { line, content, .. } => {
                assert_eq!(line, 2);
                assert_eq!(content, "JUSTAKEY");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn empty_key_is_malformed() {
        assert!(matches!(
            parse_str("=value"),
            Err(ConfigError::MalformedLine { line: 1, .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = load(&dir.path().join(".env")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvFile { .. }));
    }
}
