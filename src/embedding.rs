use std::io::{Read, Write};

use anyhow::{ensure, Context, Result};
use ndarray::prelude::*;
use ordered_float::OrderedFloat;

use crate::tokens::{TokenSet, Vocabulary};

/// A trained word embedding.
///
/// Row `k` of `vectors` is the vector for token ID `k`. The last row belongs
/// to the out-of-vocabulary ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    tokens: TokenSet,
    vectors: Array2<f32>,
}

impl Embedding {
    pub fn new(tokens: TokenSet, vectors: Array2<f32>) -> Result<Self> {
        ensure!(
            vectors.nrows() == tokens.num_ids(),
            "embedding has {} rows but the vocabulary has {} IDs",
            vectors.nrows(),
            tokens.num_ids()
        );
        Ok(Embedding { tokens, vectors })
    }

    /// Embedding vector length (number of dimensions).
    pub fn dim(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn num_rows(&self) -> usize {
        self.vectors.nrows()
    }

    pub fn tokens(&self) -> &TokenSet {
        &self.tokens
    }

    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    pub fn embed(&self, token: &str) -> ArrayView1<'_, f32> {
        self.embed_id(self.tokens.id(token))
    }

    pub fn embed_id(&self, id: usize) -> ArrayView1<'_, f32> {
        self.vectors.row(id)
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.tokens.token(id)
    }

    /// Find the `n` token IDs closest to `query` by Euclidean distance,
    /// nearest first.
    ///
    /// If `n` is more than the number of IDs, all IDs are returned.
    pub fn lookup(&self, query: ArrayView1<'_, f32>, n: usize) -> Result<Vec<usize>> {
        ensure!(
            query.len() == self.dim(),
            "query vector has length {}, but the embedding has {} dimensions",
            query.len(),
            self.dim()
        );
        let mut by_distance: Vec<(usize, f32)> = self
            .vectors
            .rows()
            .into_iter()
            .enumerate()
            .map(|(id, row)| {
                let d: f32 = row
                    .iter()
                    .zip(query.iter())
                    .map(|(&a, &b)| (a - b) * (a - b))
                    .sum();
                (id, d)
            })
            .collect();
        by_distance.sort_by_key(|&(id, d)| (OrderedFloat(d), id));
        by_distance.truncate(n);
        Ok(by_distance.into_iter().map(|(id, _)| id).collect())
    }

    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        let data: Vec<f32> = self.vectors.iter().copied().collect();
        bincode::serialize_into(
            &mut writer,
            &(&self.tokens, self.vectors.nrows() as u64, self.vectors.ncols() as u64, data),
        )
        .context("error writing embedding")?;
        writer.flush().context("error writing embedding")
    }

    pub fn load<R: Read>(reader: R) -> Result<Self> {
        let (tokens, rows, cols, data): (TokenSet, u64, u64, Vec<f32>) =
            bincode::deserialize_from(reader).context("error reading embedding")?;
        let vectors = Array2::from_shape_vec((rows as usize, cols as usize), data)
            .context("embedding data doesn't match its shape")?;
        Embedding::new(tokens, vectors)
    }

    /// Write the vectors in the word2vec format: a header line with the
    /// number of words and the vector size, then each word followed by its
    /// vector, either as text or as raw little-endian `f32`s.
    ///
    /// The out-of-vocabulary row is not written.
    pub fn write_word2vec<W: Write>(&self, mut fo: W, binary: bool) -> Result<()> {
        writeln!(fo, "{} {}", self.tokens.len(), self.dim()).context("error writing output file")?;
        for (word, row) in self.tokens.iter().zip(self.vectors.rows()) {
            write!(fo, "{word} ").context("error writing output file")?;
            if binary {
                let row = row.to_vec();
                fo.write_all(bytemuck::cast_slice::<f32, u8>(&row))
                    .context("error writing output file")?;
            } else {
                for f in row {
                    write!(fo, "{f} ").context("error writing output file")?;
                }
            }
            writeln!(fo).context("error writing output file")?;
        }
        fo.flush().context("error writing output file")
    }
}
