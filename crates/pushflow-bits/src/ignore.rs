//! `.cfignore` handling

use crate::error::{BitsError, Result};
use glob::{MatchOptions, Pattern};
use std::fs;
use std::path::Path;

pub const IGNORE_FILE: &str = ".cfignore";

/// Always left out of the archive
const DEFAULT_IGNORES: [&str; 9] = [
    ".cfignore",
    ".DS_Store",
    ".git",
    ".gitignore",
    ".hg",
    ".svn",
    "_darcs",
    "manifest.yaml",
    "manifest.yml",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Rule {
    pattern: Pattern,
    /// Pattern contains a `/` and is matched against the whole relative path
    anchored: bool,
    negated: bool,
}

impl Rule {
    fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let (negated, body) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let body = body.trim_end_matches('/');
        let anchored = body.contains('/');
        let body = body.trim_start_matches('/');
        if body.is_empty() {
            return Ok(None);
        }

        let pattern = Pattern::new(body).map_err(|e| BitsError::InvalidPattern {
            pattern: line.to_string(),
            message: e.msg.to_string(),
        })?;
        Ok(Some(Self {
            pattern,
            anchored,
            negated,
        }))
    }

    fn matches(&self, components: &[&str]) -> bool {
        if self.anchored {
            (1..=components.len())
                .any(|n| self.pattern.matches_with(&components[..n].join("/"), MATCH_OPTIONS))
        } else {
            components
                .iter()
                .any(|c| self.pattern.matches_with(c, MATCH_OPTIONS))
        }
    }
}

/// Ordered ignore rules; the last matching rule decides.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    rules: Vec<Rule>,
}

impl IgnoreRules {
    /// Default rules plus the lines of `text`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut rules = Vec::new();
        for line in DEFAULT_IGNORES.iter().copied().chain(text.lines()) {
            if let Some(rule) = Rule::parse(line)? {
                rules.push(rule);
            }
        }
        Ok(Self { rules })
    }

    /// Rules for `dir`, reading its `.cfignore` when present.
    pub fn for_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(IGNORE_FILE);
        if path.is_file() {
            tracing::debug!("Reading ignore file: {}", path.display());
            Self::parse(&fs::read_to_string(&path)?)
        } else {
            Self::parse("")
        }
    }

    /// Whether `relative` (a path inside the app directory) is left out.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        let components: Vec<&str> = relative
            .components()
            .filter_map(|c| c.as_os_str().to_str())
            .collect();
        if components.is_empty() {
            return false;
        }

        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(&components))
            .is_some_and(|rule| !rule.negated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ignores() {
        let rules = IgnoreRules::parse("").unwrap();
        assert!(rules.is_ignored(Path::new(".git")));
        assert!(rules.is_ignored(Path::new(".git/HEAD")));
        assert!(rules.is_ignored(Path::new("manifest.yml")));
        assert!(!rules.is_ignored(Path::new("app.rb")));
    }

    #[test]
    fn test_patterns() {
        let rules = IgnoreRules::parse("# comment\n*.log\ntmp/\n/config/secrets.yml\n").unwrap();
        assert!(rules.is_ignored(Path::new("server.log")));
        assert!(rules.is_ignored(Path::new("logs/server.log")));
        assert!(rules.is_ignored(Path::new("tmp/cache/file")));
        assert!(rules.is_ignored(Path::new("config/secrets.yml")));
        assert!(!rules.is_ignored(Path::new("config/app.yml")));
    }

    #[test]
    fn test_negation_reincludes() {
        let rules = IgnoreRules::parse("*.log\n!keep.log\n").unwrap();
        assert!(rules.is_ignored(Path::new("a.log")));
        assert!(!rules.is_ignored(Path::new("keep.log")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            IgnoreRules::parse("[unclosed"),
            Err(BitsError::InvalidPattern { .. })
        ));
    }
}
