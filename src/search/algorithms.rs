// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! String matching algorithms selectable per query test. Expensive
//! representations (regex, glob) are compiled once when the test is
//! finalized.

use crate::search::QueryError;

#[derive(Debug)]
pub enum MatchAlgorithm {
    Exact(String),
    Begin(String),
    End(String),
    Substring(String),
    Pattern(glob::Pattern),
    Regex(regex::Regex),
    Fuzzy { pattern: String, max_distance: usize },
}

impl MatchAlgorithm {
    pub fn exact(pattern: &str) -> Self {
        Self::Exact(pattern.to_owned())
    }

    pub fn pattern(pattern: &str) -> Result<Self, QueryError> {
        glob::Pattern::new(pattern)
            .map(Self::Pattern)
            .map_err(|e| QueryError::BadPattern {
                pattern: pattern.to_owned(),
                reason: e.to_string(),
            })
    }

    pub fn regex(pattern: &str) -> Result<Self, QueryError> {
        regex::Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| QueryError::BadPattern {
                pattern: pattern.to_owned(),
                reason: e.to_string(),
            })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(p) => candidate == p,
            Self::Begin(p) => candidate.starts_with(p.as_str()),
            Self::End(p) => candidate.ends_with(p.as_str()),
            Self::Substring(p) => candidate.contains(p.as_str()),
            Self::Pattern(p) => p.matches(candidate),
            Self::Regex(r) => r.is_match(candidate),
            Self::Fuzzy {
                pattern,
                max_distance,
            } => levenshtein(pattern, candidate) <= *max_distance,
        }
    }
}

/// Plain edit distance, two-row table.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", ""), 0);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("vim", "vi"), 1);
        assert_eq!(levenshtein("", "xyz"), 3);
    }

    #[test]
    fn test_algorithms() {
        assert!(MatchAlgorithm::exact("vim").matches("vim"));
        assert!(!MatchAlgorithm::exact("vim").matches("gvim"));
        assert!(MatchAlgorithm::Begin("vi".into()).matches("vim"));
        assert!(MatchAlgorithm::End("im".into()).matches("vim"));
        assert!(MatchAlgorithm::Substring("ed".into()).matches("xedit"));
        assert!(MatchAlgorithm::pattern("v?m*").unwrap().matches("vim-like"));
        assert!(MatchAlgorithm::regex("^editor").unwrap().matches("editors at work"));
        assert!(!MatchAlgorithm::regex("^editor").unwrap().matches("an editor"));
        let fuzzy = MatchAlgorithm::Fuzzy {
            pattern: "vim".into(),
            max_distance: 2,
        };
        assert!(fuzzy.matches("vi"));
        assert!(fuzzy.matches("nvim"));
        assert!(!fuzzy.matches("emacs"));
    }

    #[test]
    fn test_bad_patterns_are_reported() {
        assert!(MatchAlgorithm::regex("(unclosed").is_err());
        assert!(MatchAlgorithm::pattern("[unclosed").is_err());
    }
}
