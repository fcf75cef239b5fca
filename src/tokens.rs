//! Translation between tokens and token IDs.

use std::collections::HashMap;
use std::io::BufRead;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Something that assigns token IDs.
///
/// IDs run from `0` to `num_ids() - 1`. The last ID is reserved for tokens
/// that aren't in the vocabulary.
pub trait Vocabulary {
    /// Get the ID for `token`, or the out-of-vocabulary ID.
    fn id(&self, token: &str) -> usize;

    /// Get the token for `id`. Returns `None` for the out-of-vocabulary ID.
    fn token(&self, id: usize) -> Option<&str>;

    /// Number of IDs, including the out-of-vocabulary ID.
    fn num_ids(&self) -> usize;

    fn ids<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<usize>
    where
        Self: Sized,
    {
        tokens.iter().map(|t| self.id(t.as_ref())).collect()
    }
}

/// A sorted list of distinct tokens. Each token's index is its ID.
///
/// `TokenSet::len()` is the ID used for tokens not in the set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    tokens: Vec<String>,
}

impl TokenSet {
    pub fn new<I>(tokens: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        tokens.sort();
        tokens.dedup();
        TokenSet { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.tokens.iter().map(String::as_str)
    }
}

impl Vocabulary for TokenSet {
    fn id(&self, token: &str) -> usize {
        self.tokens
            .binary_search_by(|t| t.as_str().cmp(token))
            .unwrap_or(self.tokens.len())
    }

    fn token(&self, id: usize) -> Option<&str> {
        self.tokens.get(id).map(String::as_str)
    }

    fn num_ids(&self) -> usize {
        self.tokens.len() + 1
    }
}

/// Tally of how many times each token occurs in a corpus.
#[derive(Debug, Clone, Default)]
pub struct TokenCounts {
    counts: HashMap<String, u64>,
}

impl TokenCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tokens<I>(tokens: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut counts = TokenCounts::new();
        for token in tokens {
            counts.add(token.as_ref());
        }
        counts
    }

    pub fn add(&mut self, token: &str) {
        match self.counts.get_mut(token) {
            Some(n) => *n += 1,
            None => {
                self.counts.insert(token.to_string(), 1);
            }
        }
    }

    pub fn count(&self, token: &str) -> u64 {
        self.counts.get(token).copied().unwrap_or(0)
    }

    pub fn num_distinct(&self) -> usize {
        self.counts.len()
    }

    /// The `n` most frequent tokens. If there are fewer than `n` distinct
    /// tokens, all of them are returned.
    pub fn most_common(&self, n: usize) -> Vec<String> {
        let mut entries: Vec<(&String, u64)> = self.counts.iter().map(|(t, &c)| (t, c)).collect();
        // Break ties by token so the vocabulary is reproducible.
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        entries.truncate(n);
        entries.into_iter().map(|(t, _)| t.clone()).collect()
    }
}

/// Read a corpus with one document per line and whitespace between tokens.
/// Blank lines are skipped.
pub fn read_documents<R: BufRead>(reader: R) -> impl Iterator<Item = Result<Vec<String>>> {
    reader.lines().enumerate().filter_map(|(i, line)| {
        let line = match line.with_context(|| format!("error reading corpus line {}", i + 1)) {
            Ok(line) => line,
            Err(err) => return Some(Err(err)),
        };
        let doc: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        if doc.is_empty() {
            None
        } else {
            Some(Ok(doc))
        }
    })
}
