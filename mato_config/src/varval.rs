//! The var:val config file format used by host programs and modules for
//! their own settings (spec §6), ported from
//! `original_source/mato/mato_config.c`'s hand-rolled state machine.
//!
//! Format: one `key: value` pair per line, `#` starts a line comment,
//! whitespace around both the key and the value is ignored. A key that
//! appears more than once is shadowed by its last occurrence, matching the
//! original's insert-at-head list with head-first lookup.

use std::collections::HashMap;
use std::path::Path;

use mato_common::Result;

/// A parsed var:val config file.
#[derive(Debug, Clone, Default)]
pub struct VarValConfig {
    values: HashMap<String, String>,
}

impl VarValConfig {
    /// Reads and parses a var:val config file from disk. Unlike
    /// [`crate::NodesConfig::read`], a missing file is not fatal here — the
    /// spec only calls the *nodes* config mandatory; module-local var:val
    /// files are optional and every accessor already takes a default.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(mato_common::Error::Configuration(format!(
                "cannot read config {}: {e}",
                path.as_ref().display()
            ))),
        }
    }

    /// Parses var:val config text directly.
    pub fn parse(text: &str) -> Self {
        let mut values = HashMap::new();
        for raw_line in text.lines() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before,
                None => raw_line,
            };
            let Some((key, val)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            let val = val.trim();
            if key.is_empty() {
                continue;
            }
            // Last occurrence wins: plain insert overwrite reproduces the
            // original's head-first lookup over a prepend-only list.
            values.insert(key.to_owned(), val.to_owned());
        }
        Self { values }
    }

    /// `mato_config_get_strval`: returns `default` verbatim when `key` is
    /// absent.
    pub fn get_str<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.values.get(key).map(String::as_str).unwrap_or(default)
    }

    /// `mato_config_get_intval`: a present-but-unparseable value silently
    /// falls back to `default`, matching `sscanf`'s behavior of leaving the
    /// output untouched on a failed conversion.
    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        self.values
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// `mato_config_get_doubleval`.
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.values
            .get(key)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_basic_pairs() {
        let text = "name: hello world\ncount: 42\nratio: 3.5\n";
        let cfg = VarValConfig::parse(text);
        assert_eq!(cfg.get_str("name", "?"), "hello world");
        assert_eq!(cfg.get_i64("count", 0), 42);
        assert_eq!(cfg.get_f64("ratio", 0.0), 3.5);
    }

    #[test]
    fn missing_key_returns_default() {
        let cfg = VarValConfig::parse("");
        assert_eq!(cfg.get_str("missing", "fallback"), "fallback");
        assert_eq!(cfg.get_i64("missing", -1), -1);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "# a full line comment\nfoo: bar # trailing comment\n\n";
        let cfg = VarValConfig::parse(text);
        assert_eq!(cfg.get_str("foo", "?"), "bar");
    }

    #[test]
    fn later_definition_shadows_earlier() {
        let text = "x: 1\nx: 2\n";
        let cfg = VarValConfig::parse(text);
        assert_eq!(cfg.get_i64("x", 0), 2);
    }

    #[test]
    fn unparseable_numeric_value_falls_back_to_default() {
        let text = "count: not-a-number\n";
        let cfg = VarValConfig::parse(text);
        assert_eq!(cfg.get_i64("count", 7), 7);
    }
}
