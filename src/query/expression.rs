//! Query compilation.
//!
//! A query is whitespace-separated terms, all of which must match
//! (AND semantics). Double quotes group a phrase into one term. Matching is
//! case-insensitive. A plain term is a substring match on the file name;
//! `*`/`?` wildcards match within the name; a term containing `/` matches
//! against the full path, with wildcards free to span segments.

use memchr::memmem;

use crate::error::{IndexError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledTerm {
    /// Plain substring match on the entry name.
    NameSubstring(String),
    /// Wildcard match on the entry name.
    NameWildcard(String),
    /// Substring/wildcard match on the full path (pattern pre-wrapped in
    /// `*...*`).
    PathPattern(String),
}

impl CompiledTerm {
    fn matches(&self, name_lower: &str, path_lower: &str) -> bool {
        match self {
            Self::NameSubstring(needle) => {
                memmem::find(name_lower.as_bytes(), needle.as_bytes()).is_some()
            }
            Self::NameWildcard(pattern) => wildcard_matches(pattern, name_lower),
            Self::PathPattern(pattern) => wildcard_matches(pattern, path_lower),
        }
    }
}

/// A compiled search expression.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    terms: Vec<CompiledTerm>,
    needs_path: bool,
}

impl CompiledQuery {
    /// Compiles a raw query string.
    pub fn compile(raw: &str) -> Result<Self> {
        let tokens = tokenize(raw);
        if tokens.is_empty() {
            return Err(IndexError::QueryParse(
                "query must contain at least one term".to_string(),
            ));
        }

        let mut terms = Vec::with_capacity(tokens.len());
        for token in tokens {
            let lowered = token.to_ascii_lowercase().replace('\\', "/");
            if lowered.contains('/') {
                let trimmed = lowered.trim_matches('/');
                if trimmed.is_empty() {
                    return Err(IndexError::QueryParse(
                        "path term contains no matchable text".to_string(),
                    ));
                }
                terms.push(CompiledTerm::PathPattern(format!("*{trimmed}*")));
            } else if lowered.contains('*') || lowered.contains('?') {
                terms.push(CompiledTerm::NameWildcard(lowered));
            } else {
                terms.push(CompiledTerm::NameSubstring(lowered));
            }
        }

        let needs_path = terms
            .iter()
            .any(|term| matches!(term, CompiledTerm::PathPattern(_)));
        Ok(Self { terms, needs_path })
    }

    /// True when any term inspects the full path (lets the evaluator skip
    /// lowercasing paths for pure name queries).
    pub fn needs_path(&self) -> bool {
        self.needs_path
    }

    /// True when the entry matches every term.
    pub fn matches(&self, name_lower: &str, path_lower: &str) -> bool {
        self.terms
            .iter()
            .all(|term| term.matches(name_lower, path_lower))
    }

    /// The first name-matching term, used for ranking.
    pub fn primary_name_term(&self) -> Option<&str> {
        self.terms.iter().find_map(|term| match term {
            CompiledTerm::NameSubstring(needle) => Some(needle.as_str()),
            _ => None,
        })
    }

    #[cfg(test)]
    pub(crate) fn terms(&self) -> &[CompiledTerm] {
        &self.terms
    }
}

/// Splits a query into terms, honoring double-quoted phrases.
fn tokenize(raw: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for ch in raw.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    terms.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        terms.push(current);
    }
    terms
}

/// Matches a pattern with `*` and `?` wildcards against a candidate string.
pub fn wildcard_matches(pattern: &str, candidate: &str) -> bool {
    let pattern_chars = pattern.chars().collect::<Vec<_>>();
    let candidate_chars = candidate.chars().collect::<Vec<_>>();

    let mut pattern_index = 0usize;
    let mut candidate_index = 0usize;
    let mut star_index: Option<usize> = None;
    let mut star_candidate_index = 0usize;

    while candidate_index < candidate_chars.len() {
        if pattern_index < pattern_chars.len()
            && (pattern_chars[pattern_index] == '?'
                || pattern_chars[pattern_index] == candidate_chars[candidate_index])
        {
            pattern_index += 1;
            candidate_index += 1;
            continue;
        }

        if pattern_index < pattern_chars.len() && pattern_chars[pattern_index] == '*' {
            star_index = Some(pattern_index);
            pattern_index += 1;
            star_candidate_index = candidate_index;
            continue;
        }

        if let Some(last_star_index) = star_index {
            pattern_index = last_star_index + 1;
            star_candidate_index += 1;
            candidate_index = star_candidate_index;
            continue;
        }

        return false;
    }

    while pattern_index < pattern_chars.len() && pattern_chars[pattern_index] == '*' {
        pattern_index += 1;
    }

    pattern_index == pattern_chars.len()
}
