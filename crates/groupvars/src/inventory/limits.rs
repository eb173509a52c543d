//! Limit pattern matching over group memberships.
//!
//! Every limit is a regular expression wrapped in `^` and `$`. The anchors
//! are concatenated as-is, so a top-level alternation such as `web|db`
//! anchors only its outer branches.

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Invalid limit pattern '{limit}': {source}")]
pub struct LimitError {
    pub limit: String,
    #[source]
    pub source: regex::Error,
}

/// A set of limits compiled once for a matching session.
#[derive(Debug, Clone, Default)]
pub struct LimitSet {
    patterns: Vec<Regex>,
}

impl LimitSet {
    /// Compiles every limit as `^limit$`. The first invalid pattern aborts
    /// compilation.
    pub fn compile<S: AsRef<str>>(limits: &[S]) -> Result<Self, LimitError> {
        let patterns = limits
            .iter()
            .map(|limit| {
                let limit = limit.as_ref();
                Regex::new(&format!("^{}$", limit)).map_err(|source| LimitError {
                    limit: limit.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when no limits were given.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Every limit must match at least one group.
    pub fn matches_all<S: AsRef<str>>(&self, membership: &[S]) -> bool {
        if self.is_empty() {
            return true;
        }
        if membership.is_empty() {
            return false;
        }

        self.patterns.iter().all(|pattern| {
            membership
                .iter()
                .any(|group| pattern.is_match(group.as_ref()))
        })
    }

    /// Groups matching at least one limit, in membership order with
    /// duplicates kept. Without limits the whole membership is returned.
    pub fn matching_groups<S: AsRef<str>>(&self, membership: &[S]) -> Vec<String> {
        let mut groups = Vec::with_capacity(membership.len());
        for group in membership {
            let group: &str = group.as_ref();
            if self.is_empty() || self.patterns.iter().any(|p| p.is_match(group)) {
                groups.push(group.to_string());
            }
        }
        groups
    }
}

/// Whether `membership` satisfies all `limits`.
pub fn match_limits<S: AsRef<str>, L: AsRef<str>>(
    membership: &[S],
    limits: &[L],
) -> Result<bool, LimitError> {
    if limits.is_empty() {
        return Ok(true);
    }
    Ok(LimitSet::compile(limits)?.matches_all(membership))
}

/// The membership groups selected by `limits`.
pub fn valid_groups<S: AsRef<str>, L: AsRef<str>>(
    membership: &[S],
    limits: &[L],
) -> Result<Vec<String>, LimitError> {
    Ok(LimitSet::compile(limits)?.matching_groups(membership))
}
