//! Sparse storage for word co-occurrence counts.

use std::io::{Read, Write};

use anyhow::{ensure, Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A vector with potentially many zero entries.
///
/// Only entries that have been written are stored. `indices` is kept sorted
/// and free of duplicates; `values[k]` is the value at `indices[k]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    /// Total number of elements, including implicit zeros.
    len: usize,
    indices: Vec<usize>,
    values: Vec<f32>,
}

impl SparseVector {
    pub fn new(len: usize) -> Self {
        SparseVector {
            len,
            indices: vec![],
            values: vec![],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of stored entries.
    pub fn num_entries(&self) -> usize {
        self.indices.len()
    }

    /// Positions of the stored entries, in increasing order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    fn position(&self, i: usize) -> Result<usize, usize> {
        assert!(
            i < self.len,
            "index {i} out of range for sparse vector of length {}",
            self.len
        );
        self.indices.binary_search(&i)
    }

    /// Read the entry at `i`. Entries that were never written are 0.
    ///
    /// *Panics* if `i >= self.len()`.
    pub fn get(&self, i: usize) -> f32 {
        match self.position(i) {
            Ok(k) => self.values[k],
            Err(_) => 0.0,
        }
    }

    /// Overwrite the entry at `i`, storing it if it wasn't stored yet.
    ///
    /// *Panics* if `i >= self.len()`.
    pub fn set(&mut self, i: usize, value: f32) {
        match self.position(i) {
            Ok(k) => self.values[k] = value,
            Err(k) => {
                self.indices.insert(k, i);
                self.values.insert(k, value);
            }
        }
    }

    /// Add `value` to the entry at `i`.
    ///
    /// *Panics* if `i >= self.len()`.
    pub fn add(&mut self, i: usize, value: f32) {
        match self.position(i) {
            Ok(k) => self.values[k] += value,
            Err(k) => {
                self.indices.insert(k, i);
                self.values.insert(k, value);
            }
        }
    }

    /// Iterate over `(index, value)` for each stored entry.
    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.indices.iter().copied().zip(self.values.iter().copied())
    }

    fn validate(&self, expected_len: usize) -> Result<()> {
        ensure!(
            self.len == expected_len,
            "row has length {}, expected {expected_len}",
            self.len
        );
        ensure!(
            self.indices.len() == self.values.len(),
            "row has {} indices but {} values",
            self.indices.len(),
            self.values.len()
        );
        ensure!(
            self.indices.windows(2).all(|w| w[0] < w[1]),
            "row indices are not strictly increasing"
        );
        if let Some(&last) = self.indices.last() {
            ensure!(last < self.len, "row index {last} out of range");
        }
        Ok(())
    }
}

/// A sparse matrix for storing word co-occurrences.
///
/// Every row has the same logical length, the number of columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    cols: usize,
    rows: Vec<SparseVector>,
}

impl SparseMatrix {
    /// Create a zero matrix.
    pub fn new(rows: usize, cols: usize) -> Self {
        SparseMatrix {
            cols,
            rows: vec![SparseVector::new(cols); rows],
        }
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> &[SparseVector] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> &SparseVector {
        &self.rows[i]
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.rows[row].get(col)
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.rows[row].set(col, value);
    }

    pub fn add(&mut self, row: usize, col: usize, value: f32) {
        self.rows[row].add(col, value);
    }

    /// Number of entries that have been written with `set` or `add`.
    pub fn num_entries(&self) -> usize {
        self.rows.iter().map(SparseVector::num_entries).sum()
    }

    /// Pick a stored entry uniformly at random by scanning the rows.
    ///
    /// This costs O(rows) per draw. For many draws against a matrix that
    /// isn't changing, use an [`EntryPicker`](crate::EntryPicker).
    ///
    /// Returns `None` if the matrix has no stored entries.
    pub fn random_entry<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(usize, usize)> {
        let num_entries = self.num_entries();
        if num_entries == 0 {
            return None;
        }

        let mut idx = rng.gen_range(0..num_entries);
        for (r, row) in self.rows.iter().enumerate() {
            if idx < row.num_entries() {
                return Some((r, row.indices[idx]));
            }
            idx -= row.num_entries();
        }
        unreachable!("offset is less than the number of entries")
    }

    /// Take the rows out, leaving the matrix with no rows.
    pub(crate) fn take_rows(&mut self) -> Vec<SparseVector> {
        std::mem::take(&mut self.rows)
    }

    pub(crate) fn restore_rows(&mut self, rows: Vec<SparseVector>) {
        assert!(self.rows.is_empty());
        assert!(rows.iter().all(|row| row.len() == self.cols));
        self.rows = rows;
    }

    /// Check the structural invariants of every row.
    pub fn validate(&self) -> Result<()> {
        for (i, row) in self.rows.iter().enumerate() {
            row.validate(self.cols)
                .with_context(|| format!("invalid sparse matrix row {i}"))?;
        }
        Ok(())
    }

    /// Check that every stored entry is a positive, finite count.
    pub fn check_counts(&self) -> Result<()> {
        for (i, row) in self.rows.iter().enumerate() {
            for (j, x) in row.iter() {
                ensure!(
                    x.is_finite() && x > 0.0,
                    "co-occurrence count at ({i}, {j}) is {x}, expected a positive number"
                );
            }
        }
        Ok(())
    }

    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        bincode::serialize_into(&mut writer, self).context("error writing co-occurrence matrix")?;
        writer.flush().context("error writing co-occurrence matrix")
    }

    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let matrix: SparseMatrix =
            bincode::deserialize_from(reader).context("error reading co-occurrence matrix")?;
        matrix.validate()?;
        Ok(matrix)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn matches_dense() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut dense = [0.0f32; 3 * 4];
        let mut sparse = SparseMatrix::new(3, 4);
        let mut touched = HashSet::new();

        for _ in 0..100 {
            let row = rng.gen_range(0..3);
            let col = rng.gen_range(0..4);
            let val: f32 = rng.gen();
            if rng.gen() {
                sparse.add(row, col, val);
                dense[row * 4 + col] += val;
            } else {
                sparse.set(row, col, val);
                dense[row * 4 + col] = val;
            }
            touched.insert((row, col));
            assert_eq!(sparse.num_entries(), touched.len());
            for r in 0..3 {
                for c in 0..4 {
                    assert_eq!(sparse.get(r, c), dense[r * 4 + c], "matrices out of sync");
                }
            }
        }
        sparse.validate().unwrap();
    }

    #[test]
    fn insertion_keeps_order() {
        let mut v = SparseVector::new(10);
        for i in [7, 2, 9, 0, 5, 2] {
            v.add(i, 1.0);
        }
        assert_eq!(v.indices(), &[0, 2, 5, 7, 9]);
        assert_eq!(v.values(), &[1.0, 2.0, 1.0, 1.0, 1.0]);
        assert_eq!(v.get(3), 0.0);
        v.set(2, 0.0);
        assert_eq!(v.num_entries(), 5);
    }

    #[test]
    #[should_panic]
    fn out_of_range() {
        let mut v = SparseVector::new(4);
        v.set(4, 1.0);
    }

    #[test]
    fn random_entry_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        let matrix = SparseMatrix::new(5, 5);
        assert_eq!(matrix.random_entry(&mut rng), None);
    }

    #[test]
    fn random_entry_hits_stored() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut matrix = SparseMatrix::new(4, 4);
        matrix.set(3, 1, 0.5);
        matrix.set(1, 3, 0.2);
        matrix.set(0, 3, 0.3);

        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let entry = matrix.random_entry(&mut rng).unwrap();
            assert!(matrix.get(entry.0, entry.1) != 0.0);
            seen.insert(entry);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn check_counts() {
        let mut matrix = SparseMatrix::new(3, 3);
        matrix.set(0, 1, 2.0);
        matrix.set(1, 0, 0.5);
        matrix.check_counts().unwrap();

        matrix.set(2, 2, 0.0);
        let err = matrix.check_counts().unwrap_err();
        assert!(err.to_string().contains("(2, 2)"), "{err}");

        matrix.set(2, 2, f32::NAN);
        assert!(matrix.check_counts().is_err());
        matrix.set(2, 2, -1.0);
        assert!(matrix.check_counts().is_err());
        matrix.set(2, 2, 1.0);
        matrix.check_counts().unwrap();
    }

    #[test]
    fn save_load() {
        let mut matrix = SparseMatrix::new(4, 4);
        matrix.set(3, 1, 0.5);
        matrix.set(1, 3, 0.2);
        matrix.set(0, 3, 0.3);

        let mut buf = vec![];
        matrix.save(&mut buf).unwrap();
        let loaded = SparseMatrix::load(&buf[..]).unwrap();
        assert_eq!(loaded, matrix);
    }

    #[test]
    fn load_rejects_bad_row() {
        let mut matrix = SparseMatrix::new(2, 3);
        matrix.set(0, 1, 1.0);
        matrix.rows[1] = SparseVector::new(5);

        let mut buf = vec![];
        matrix.save(&mut buf).unwrap();
        let err = SparseMatrix::load(&buf[..]).unwrap_err();
        assert!(format!("{err:#}").contains("row 1"), "{err:#}");
    }
}
