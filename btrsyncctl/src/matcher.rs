//! Selecting source subvolumes by path: a single exact target, or
//! everything under a glob, refined by include/exclude glob lists.

use anyhow::{bail, Result};
use libbtrsync::paths;
use regex::Regex;

/// Translate a shell glob into a regex body. As with the matching rules
/// this mirrors, `*` crosses directory separators.
fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut rx = String::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => rx.push_str(".*"),
            '?' => rx.push('.'),
            '[' => {
                let mut j = i + 1;
                if j < chars.len() && chars[j] == '!' {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ']' {
                    j += 1;
                }
                while j < chars.len() && chars[j] != ']' {
                    j += 1;
                }
                if j >= chars.len() {
                    rx.push_str(r"\[");
                } else {
                    let inner: String = chars[i + 1..j].iter().collect();
                    rx.push('[');
                    if let Some(rest) = inner.strip_prefix('!') {
                        rx.push('^');
                        rx.push_str(&rest.replace('\\', r"\\"));
                    } else {
                        rx.push_str(&inner.replace('\\', r"\\"));
                    }
                    rx.push(']');
                    i = j;
                }
            }
            c => rx.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    rx
}

fn full_match(glob: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^{}$", glob_to_regex(glob)))?)
}

enum MatchBase {
    /// Exactly one path; processing stops after it is handled.
    Single(String),
    /// Everything at or below a glob; the matched remainder is what the
    /// include/exclude lists see.
    Under(Regex),
}

pub struct PathMatch {
    base: MatchBase,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
}

impl PathMatch {
    pub fn single(path: impl Into<String>) -> Self {
        Self {
            base: MatchBase::Single(path.into()),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn under_glob(glob: &str) -> Result<Self> {
        if paths::is_abs(glob) {
            bail!("glob must specify a relative path");
        }
        let glob = if glob.ends_with('*') {
            glob.to_string()
        } else {
            paths::join(glob, "*")
        };
        let prefix = &glob[..glob.len() - 1];
        let under = Regex::new(&format!("^{}(.*)$", glob_to_regex(prefix)))?;
        Ok(Self {
            base: MatchBase::Under(under),
            include: Vec::new(),
            exclude: Vec::new(),
        })
    }

    pub fn include(&mut self, globs: &[String]) -> Result<()> {
        for glob in globs {
            self.include.push(full_match(glob)?);
        }
        Ok(())
    }

    pub fn exclude(&mut self, globs: &[String]) -> Result<()> {
        for glob in globs {
            self.exclude.push(full_match(glob)?);
        }
        Ok(())
    }

    fn base_match<'a>(&self, path: &'a str) -> Option<&'a str> {
        match &self.base {
            MatchBase::Single(target) => {
                if path == target {
                    Some(path)
                } else {
                    None
                }
            }
            MatchBase::Under(under) => under.captures(path).map(|c| c.get(1).expect("capture group").as_str()),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        let rpath = match self.base_match(path) {
            Some(rpath) => rpath,
            None => return false,
        };
        if !self.include.is_empty() && !self.include.iter().any(|rx| rx.is_match(rpath)) {
            return false;
        }
        !self.exclude.iter().any(|rx| rx.is_match(rpath))
    }

    /// Whether processing should stop after the volumes in `paths` have
    /// been handled.
    pub fn stop(&self, paths: &[String]) -> bool {
        match &self.base {
            MatchBase::Single(target) => {
                debug_assert!(paths.iter().any(|p| p == target));
                true
            }
            MatchBase::Under(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_matches_exact_path_only() {
        let matcher = PathMatch::single("snaps/vol");
        assert!(matcher.matches("snaps/vol"));
        assert!(!matcher.matches("snaps/vol2"));
        assert!(!matcher.matches("vol"));
        assert!(matcher.stop(&["snaps/vol".to_string()]));
    }

    #[test]
    fn under_glob_matches_subtree() {
        let matcher = PathMatch::under_glob("snaps").unwrap();
        assert!(matcher.matches("snaps/a"));
        assert!(matcher.matches("snaps/deep/b"));
        assert!(!matcher.matches("other/a"));
        assert!(!matcher.stop(&["snaps/a".to_string()]));
    }

    #[test]
    fn under_glob_star_matches_everything() {
        let matcher = PathMatch::under_glob("*").unwrap();
        assert!(matcher.matches("any"));
        assert!(matcher.matches("any/depth/works"));
    }

    #[test]
    fn under_glob_rejects_absolute() {
        assert!(PathMatch::under_glob("/abs").is_err());
    }

    #[test]
    fn include_limits_matches() {
        let mut matcher = PathMatch::under_glob("snaps").unwrap();
        matcher.include(&["daily-*".to_string()]).unwrap();
        assert!(matcher.matches("snaps/daily-2023"));
        assert!(!matcher.matches("snaps/weekly-2023"));
    }

    #[test]
    fn exclude_wins_over_include() {
        let mut matcher = PathMatch::under_glob("snaps").unwrap();
        matcher.include(&["daily-*".to_string()]).unwrap();
        matcher.exclude(&["daily-2020*".to_string()]).unwrap();
        assert!(matcher.matches("snaps/daily-2023"));
        assert!(!matcher.matches("snaps/daily-2020-01"));
    }

    #[test]
    fn glob_translation() {
        assert_eq!(glob_to_regex("a*b"), "a.*b");
        assert_eq!(glob_to_regex("a?b"), "a.b");
        assert_eq!(glob_to_regex("a.b"), r"a\.b");
        assert_eq!(glob_to_regex("v[0-9]"), "v[0-9]");
        assert_eq!(glob_to_regex("v[!0-9]"), "v[^0-9]");
        assert_eq!(glob_to_regex("v["), r"v\[");
    }
}
