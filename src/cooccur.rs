use std::sync::{Mutex, MutexGuard, PoisonError};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::sparse::{SparseMatrix, SparseVector};
use crate::tokens::Vocabulary;

/// Tallies co-occurrences of tokens in a stream of tokenized documents.
///
/// Entry `(i, j)` of the matrix counts word `j` in the context of word `i`.
/// Every co-occurrence is added to both `(i, j)` and `(j, i)`, so the matrix
/// stays symmetric.
pub struct CooccurCounter<'v, V> {
    vocab: &'v V,

    /// `vocab.num_ids()` square.
    matrix: SparseMatrix,

    /// Maximum distance between two words for them to co-occur. If 0, all
    /// words in a document co-occur.
    pub window: usize,

    /// If true, a co-occurrence at distance `d` counts as `1/d` instead of 1.
    pub weight_words: bool,
}

impl<'v, V: Vocabulary> CooccurCounter<'v, V> {
    pub fn new(vocab: &'v V, window: usize, weight_words: bool) -> Self {
        let n = vocab.num_ids();
        CooccurCounter {
            vocab,
            matrix: SparseMatrix::new(n, n),
            window,
            weight_words,
        }
    }

    pub fn matrix(&self) -> &SparseMatrix {
        &self.matrix
    }

    pub fn into_matrix(self) -> SparseMatrix {
        self.matrix
    }

    /// Add all the co-occurrences in one tokenized document.
    pub fn add<S: AsRef<str>>(&mut self, document: &[S]) {
        let ids = self.vocab.ids(document);
        let matrix = &mut self.matrix;
        for_each_pair(&ids, self.window, self.weight_words, |a, b, weight| {
            matrix.add(a, b, weight);
            matrix.add(b, a, weight);
        });
    }

    /// Add the co-occurrences of many documents, in parallel.
    ///
    /// Documents are pulled from `documents` by rayon's worker threads. The
    /// matrix is fully updated when this returns.
    pub fn add_all<I, S>(&mut self, documents: I)
    where
        I: IntoIterator<Item = Vec<S>>,
        I::IntoIter: Send,
        S: AsRef<str> + Send,
        V: Sync,
    {
        let vocab = self.vocab;
        let window = self.window;
        let weight_words = self.weight_words;
        let rows = RowLocks::new(self.matrix.take_rows());
        debug!(threads = rayon::current_num_threads(), "counting co-occurrences");

        let num_docs = documents
            .into_iter()
            .par_bridge()
            .map(|doc| {
                let ids = vocab.ids(&doc);
                for_each_pair(&ids, window, weight_words, |a, b, weight| {
                    rows.add_pair(a, b, weight);
                });
            })
            .count();

        self.matrix.restore_rows(rows.into_rows());
        info!(
            documents = num_docs,
            entries = self.matrix.num_entries(),
            "co-occurrence counting done"
        );
    }
}

/// Call `f(id_i, id_j, weight)` for every pair of positions `j < i` within
/// the window.
fn for_each_pair<F>(ids: &[usize], window: usize, weight_words: bool, mut f: F)
where
    F: FnMut(usize, usize, f32),
{
    for i in 0..ids.len() {
        let start = if window == 0 { 0 } else { i.saturating_sub(window) };
        for j in (start..i).rev() {
            let weight = if weight_words {
                1.0 / (i - j) as f32
            } else {
                1.0
            };
            f(ids[i], ids[j], weight);
        }
    }
}

/// One lock per matrix row, index-aligned with the rows.
///
/// Invariant: when a thread holds two row locks, it took the lower-numbered
/// one first. Both mirrored cells of a pair are written under both locks, so
/// `(a, b)` and `(b, a)` see the same sequence of additions.
struct RowLocks {
    rows: Vec<Mutex<SparseVector>>,
}

impl RowLocks {
    fn new(rows: Vec<SparseVector>) -> Self {
        RowLocks {
            rows: rows.into_iter().map(Mutex::new).collect(),
        }
    }

    fn lock(&self, row: usize) -> MutexGuard<'_, SparseVector> {
        self.rows[row].lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `value` to both `(a, b)` and `(b, a)`.
    fn add_pair(&self, a: usize, b: usize, value: f32) {
        if a == b {
            let mut row = self.lock(a);
            row.add(a, value);
            row.add(a, value);
            return;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let mut lo_row = self.lock(lo);
        let mut hi_row = self.lock(hi);
        lo_row.add(hi, value);
        hi_row.add(lo, value);
    }

    fn into_rows(self) -> Vec<SparseVector> {
        self.rows
            .into_iter()
            .map(|row| row.into_inner().unwrap_or_else(PoisonError::into_inner))
            .collect()
    }
}
