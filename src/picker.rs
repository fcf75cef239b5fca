use rand::rngs::StdRng;
use rand::Rng;

use crate::sparse::SparseMatrix;

/// Selects stored entries of a matrix uniformly at random.
///
/// Every stored entry is equally likely, regardless of its value.
///
/// The picker holds a shared borrow of the matrix, so the matrix can't change
/// while the picker is alive. Each training worker owns its own picker with
/// its own random source.
pub struct EntryPicker<'m> {
    matrix: &'m SparseMatrix,
    /// `offsets_per_row[r]` is the number of stored entries in rows `0..=r`.
    offsets_per_row: Vec<usize>,
    num_entries: usize,
    rng: StdRng,
}

impl<'m> EntryPicker<'m> {
    pub fn new(matrix: &'m SparseMatrix, rng: StdRng) -> Self {
        let mut num_entries = 0;
        let offsets_per_row = matrix
            .rows()
            .iter()
            .map(|row| {
                num_entries += row.num_entries();
                num_entries
            })
            .collect();
        EntryPicker {
            matrix,
            offsets_per_row,
            num_entries,
            rng,
        }
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Pick a random `(row, col)` among the stored entries, or `None` if the
    /// matrix is empty.
    pub fn pick(&mut self) -> Option<(usize, usize)> {
        if self.num_entries == 0 {
            return None;
        }
        let offset = self.rng.gen_range(0..self.num_entries);
        let row = self.offsets_per_row.partition_point(|&end| end <= offset);
        let row_obj = self.matrix.row(row);
        let row_start = self.offsets_per_row[row] - row_obj.num_entries();
        Some((row, row_obj.indices()[offset - row_start]))
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn uniform_over_entries() {
        const NUM_ITERS: usize = 1_000_000;

        let mut matrix = SparseMatrix::new(3, 4);
        matrix.set(2, 3, 15.0);
        matrix.set(1, 3, 4.0);
        matrix.set(2, 0, 9.0);

        let mut picker = EntryPicker::new(&matrix, StdRng::seed_from_u64(1234));
        let mut sum = 0.0f64;
        for _ in 0..NUM_ITERS {
            let (row, col) = picker.pick().unwrap();
            sum += matrix.get(row, col) as f64;
        }
        let mean = sum / NUM_ITERS as f64;
        let expected = 28.0 / 3.0;
        assert!(
            (mean - expected).abs() < 1e-2,
            "mean should be {expected} but got {mean}"
        );
    }

    #[test]
    fn skips_empty_rows() {
        let mut matrix = SparseMatrix::new(6, 6);
        matrix.set(0, 5, 1.0);
        matrix.set(4, 1, 1.0);
        matrix.set(4, 2, 1.0);

        let mut picker = EntryPicker::new(&matrix, StdRng::seed_from_u64(7));
        assert_eq!(picker.num_entries(), 3);
        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            match picker.pick().unwrap() {
                (0, 5) => counts[0] += 1,
                (4, 1) => counts[1] += 1,
                (4, 2) => counts[2] += 1,
                other => panic!("picked unstored entry {other:?}"),
            }
        }
        assert!(counts.iter().all(|&c| c > 800), "{counts:?}");
    }

    #[test]
    fn empty_matrix() {
        let matrix = SparseMatrix::new(3, 3);
        let mut picker = EntryPicker::new(&matrix, StdRng::seed_from_u64(0));
        assert_eq!(picker.pick(), None);
    }
}
