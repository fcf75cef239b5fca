//! GloVe training with AdaGrad.

use std::io::{Read, Write};
use std::num::NonZeroUsize;
use std::sync::mpsc;
use std::thread;

use anyhow::{ensure, Context, Result};
use ndarray::prelude::*;
use ndarray::Zip;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::embedding::Embedding;
use crate::picker::EntryPicker;
use crate::sparse::SparseMatrix;
use crate::tokens::TokenSet;
use crate::weighter::Weighter;

/// Default learning rate from the GloVe paper.
pub const DEFAULT_RATE: f64 = 0.05;

/// Trains a GloVe model using the AdaGrad variant of stochastic gradient
/// descent.
///
/// A `Trainer` can be saved and loaded to pause and resume training.
#[derive(Debug, Clone, PartialEq)]
pub struct Trainer {
    cooccur: SparseMatrix,

    /// Weighting applied to co-occurrence counts in the loss.
    pub weighter: Weighter,

    /// The learning rate. Even if this is constant, AdaGrad reduces the
    /// effective rate for each parameter as it is updated.
    pub rate: f64,

    /// Word vectors and context vectors, one row per token ID.
    vectors: Array2<f32>,
    ctx_vectors: Array2<f32>,

    biases: Array1<f32>,
    ctx_biases: Array1<f32>,

    /// AdaGrad sums of squared gradients, one per parameter.
    ada_vectors: Array2<f32>,
    ada_ctx_vectors: Array2<f32>,
    ada_biases: Array1<f32>,
    ada_ctx_biases: Array1<f32>,

    num_updates: u64,
}

/// Gradient of the loss for one sampled entry.
struct Gradient {
    word: usize,
    ctx: usize,
    cost: f32,
    word_vec: Array1<f32>,
    ctx_vec: Array1<f32>,
    word_bias: f32,
    ctx_bias: f32,
}

/// Apply one AdaGrad update to a single parameter.
///
/// `history` accumulates the squared gradients. A parameter whose history is
/// still zero is left alone rather than divided by zero.
pub fn adagrad_step(param: &mut f32, history: &mut f32, grad: f32, rate: f32) {
    *history += grad * grad;
    if *history > 0.0 {
        *param -= rate * grad / history.sqrt();
    }
}

impl Trainer {
    /// Create a trainer with random initial vectors, a standard weighter and
    /// a learning rate of [`DEFAULT_RATE`].
    ///
    /// *Panics* if `cooccur` isn't square or stores a count that isn't
    /// positive (see [`SparseMatrix::check_counts`]).
    pub fn new(vec_size: usize, cooccur: SparseMatrix) -> Self {
        Self::with_rng(vec_size, cooccur, &mut rand::thread_rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(vec_size: usize, cooccur: SparseMatrix, rng: &mut R) -> Self {
        assert!(vec_size > 0, "vector size must be positive");
        assert_eq!(
            cooccur.num_rows(),
            cooccur.num_cols(),
            "co-occurrence matrix must be square"
        );
        if let Err(err) = cooccur.check_counts() {
            panic!("{err:#}");
        }
        let n = cooccur.num_rows();
        let scale = (1.0 / vec_size as f32).sqrt();
        let vectors = Array2::<f32>::random_using((n, vec_size), StandardNormal, rng) * scale;
        let ctx_vectors = Array2::<f32>::random_using((n, vec_size), StandardNormal, rng) * scale;
        Trainer {
            cooccur,
            weighter: Weighter::default(),
            rate: DEFAULT_RATE,
            vectors,
            ctx_vectors,
            biases: Array1::zeros(n),
            ctx_biases: Array1::zeros(n),
            ada_vectors: Array2::zeros((n, vec_size)),
            ada_ctx_vectors: Array2::zeros((n, vec_size)),
            ada_biases: Array1::zeros(n),
            ada_ctx_biases: Array1::zeros(n),
            num_updates: 0,
        }
    }

    pub fn cooccur(&self) -> &SparseMatrix {
        &self.cooccur
    }

    pub fn vec_size(&self) -> usize {
        self.vectors.ncols()
    }

    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        self.vectors.view()
    }

    pub fn ctx_vectors(&self) -> ArrayView2<'_, f32> {
        self.ctx_vectors.view()
    }

    pub fn biases(&self) -> ArrayView1<'_, f32> {
        self.biases.view()
    }

    pub fn ctx_biases(&self) -> ArrayView1<'_, f32> {
        self.ctx_biases.view()
    }

    /// Total number of samples applied so far, across all calls to `update`.
    pub fn num_updates(&self) -> u64 {
        self.num_updates
    }

    /// Apply a mini-batch of `n` sampled updates and return the average cost.
    ///
    /// Gradients are computed in parallel, all against the parameters as they
    /// were at the start of the batch. They are then applied one at a time on
    /// the calling thread.
    pub fn update(&mut self, n: usize) -> Result<f64> {
        ensure!(
            self.cooccur.num_entries() > 0,
            "co-occurrence matrix has no entries to train on"
        );
        if n == 0 {
            return Ok(0.0);
        }

        let num_workers = thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
            .min(n);
        debug!(workers = num_workers, samples = n, "computing gradients");

        let (tx, rx) = mpsc::channel::<Gradient>();
        let mut seeds = rand::thread_rng();
        thread::scope(|s| {
            let this: &Trainer = self;
            for w in 0..num_workers {
                let count = n * (w + 1) / num_workers - n * w / num_workers;
                let rng = StdRng::seed_from_u64(seeds.gen());
                let tx = tx.clone();
                s.spawn(move || {
                    let mut picker = EntryPicker::new(&this.cooccur, rng);
                    for _ in 0..count {
                        let Some((ctx, word)) = picker.pick() else {
                            break;
                        };
                        if tx.send(this.gradient(ctx, word)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(tx);

        let mut total_cost = 0.0f64;
        for grad in rx {
            total_cost += grad.cost as f64;
            self.apply(&grad);
            self.num_updates += 1;
        }
        let cost = total_cost / n as f64;
        debug!(cost, num_updates = self.num_updates, "batch applied");
        Ok(cost)
    }

    /// Mean weighted loss over every stored co-occurrence entry.
    pub fn mean_cost(&self) -> f64 {
        let mut total = 0.0f64;
        let mut count = 0usize;
        for (ctx, row) in self.cooccur.rows().iter().enumerate() {
            for (word, x) in row.iter() {
                let (_, cost) = self.residual(ctx, word, x);
                total += cost as f64;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            total / count as f64
        }
    }

    /// Returns `(weight, s)` and the cost `weight * s^2` for entry
    /// `(ctx, word)` with count `x`, where `s` is the model's error on
    /// `ln(x)`.
    fn residual(&self, ctx: usize, word: usize, x: f32) -> ((f32, f32), f32) {
        let weight = self.weighter.weight(x as f64) as f32;
        let s = self.vectors.row(word).dot(&self.ctx_vectors.row(ctx))
            + self.biases[word]
            + self.ctx_biases[ctx]
            - x.ln();
        ((weight, s), weight * s * s)
    }

    fn gradient(&self, ctx: usize, word: usize) -> Gradient {
        let x = self.cooccur.get(ctx, word);
        let ((weight, s), cost) = self.residual(ctx, word, x);
        let scale = 2.0 * weight * s;
        Gradient {
            word,
            ctx,
            cost,
            word_vec: self.ctx_vectors.row(ctx).mapv(|v| scale * v),
            ctx_vec: self.vectors.row(word).mapv(|v| scale * v),
            word_bias: scale,
            ctx_bias: scale,
        }
    }

    fn apply(&mut self, grad: &Gradient) {
        let rate = self.rate as f32;
        Zip::from(self.vectors.row_mut(grad.word))
            .and(self.ada_vectors.row_mut(grad.word))
            .and(&grad.word_vec)
            .for_each(|p, h, &g| adagrad_step(p, h, g, rate));
        Zip::from(self.ctx_vectors.row_mut(grad.ctx))
            .and(self.ada_ctx_vectors.row_mut(grad.ctx))
            .and(&grad.ctx_vec)
            .for_each(|p, h, &g| adagrad_step(p, h, g, rate));
        adagrad_step(
            &mut self.biases[grad.word],
            &mut self.ada_biases[grad.word],
            grad.word_bias,
            rate,
        );
        adagrad_step(
            &mut self.ctx_biases[grad.ctx],
            &mut self.ada_ctx_biases[grad.ctx],
            grad.ctx_bias,
            rate,
        );
    }

    /// Copy the current parameters into an embedding.
    ///
    /// If `average` is true, each token's vector is the mean of its word
    /// vector and its context vector.
    pub fn embedding(&self, tokens: TokenSet, average: bool) -> Result<Embedding> {
        let vectors = if average {
            (&self.vectors + &self.ctx_vectors) * 0.5
        } else {
            self.vectors.clone()
        };
        Embedding::new(tokens, vectors)
    }

    /// Write the full training state, one record per field.
    pub fn save<W: Write>(&self, mut writer: W) -> Result<()> {
        let w = &mut writer;
        write_record(w, &self.cooccur, "co-occurrence matrix")?;
        write_record(w, &self.weighter, "weighter")?;
        write_record(w, &self.rate, "learning rate")?;
        write_record(w, &(self.vectors.nrows() as u64), "row count")?;
        write_record(w, &(self.vectors.ncols() as u64), "column count")?;
        write_record(w, &flat(&self.vectors), "word vectors")?;
        write_record(w, &flat(&self.ctx_vectors), "context vectors")?;
        write_record(w, &flat(&self.ada_vectors), "word vector AdaGrad history")?;
        write_record(w, &flat(&self.ada_ctx_vectors), "context vector AdaGrad history")?;
        write_record(w, &flat(&self.biases), "word biases")?;
        write_record(w, &flat(&self.ctx_biases), "context biases")?;
        write_record(w, &flat(&self.ada_biases), "word bias AdaGrad history")?;
        write_record(w, &flat(&self.ada_ctx_biases), "context bias AdaGrad history")?;
        write_record(w, &self.num_updates, "update count")?;
        w.flush().context("error writing trainer")
    }

    /// Read a trainer written by [`Trainer::save`].
    pub fn load<R: Read>(mut reader: R) -> Result<Self> {
        let r = &mut reader;
        let cooccur: SparseMatrix = read_record(r, "co-occurrence matrix")?;
        cooccur.validate()?;
        cooccur.check_counts()?;
        let weighter: Weighter = read_record(r, "weighter")?;
        let rate: f64 = read_record(r, "learning rate")?;
        let rows = read_record::<_, u64>(r, "row count")? as usize;
        let cols = read_record::<_, u64>(r, "column count")? as usize;
        ensure!(
            rows == cooccur.num_rows() && rows == cooccur.num_cols(),
            "trainer has {rows} rows but the co-occurrence matrix is {}x{}",
            cooccur.num_rows(),
            cooccur.num_cols()
        );

        let vectors = read_matrix(r, rows, cols, "word vectors")?;
        let ctx_vectors = read_matrix(r, rows, cols, "context vectors")?;
        let ada_vectors = read_matrix(r, rows, cols, "word vector AdaGrad history")?;
        let ada_ctx_vectors = read_matrix(r, rows, cols, "context vector AdaGrad history")?;
        let biases = read_vector(r, rows, "word biases")?;
        let ctx_biases = read_vector(r, rows, "context biases")?;
        let ada_biases = read_vector(r, rows, "word bias AdaGrad history")?;
        let ada_ctx_biases = read_vector(r, rows, "context bias AdaGrad history")?;
        let num_updates: u64 = read_record(r, "update count")?;

        Ok(Trainer {
            cooccur,
            weighter,
            rate,
            vectors,
            ctx_vectors,
            biases,
            ctx_biases,
            ada_vectors,
            ada_ctx_vectors,
            ada_biases,
            ada_ctx_biases,
            num_updates,
        })
    }
}

fn flat<D: Dimension>(a: &Array<f32, D>) -> Vec<f32> {
    a.iter().copied().collect()
}

fn write_record<W: Write, T: Serialize + ?Sized>(w: &mut W, value: &T, what: &str) -> Result<()> {
    bincode::serialize_into(w, value).with_context(|| format!("error writing {what}"))
}

fn read_record<R: Read, T: DeserializeOwned>(r: &mut R, what: &str) -> Result<T> {
    bincode::deserialize_from(r).with_context(|| format!("error reading {what}"))
}

fn read_matrix<R: Read>(r: &mut R, rows: usize, cols: usize, what: &str) -> Result<Array2<f32>> {
    let data: Vec<f32> = read_record(r, what)?;
    Array2::from_shape_vec((rows, cols), data)
        .with_context(|| format!("{what} don't match the {rows}x{cols} shape"))
}

fn read_vector<R: Read>(r: &mut R, len: usize, what: &str) -> Result<Array1<f32>> {
    let data: Vec<f32> = read_record(r, what)?;
    ensure!(
        data.len() == len,
        "{what} have length {}, expected {len}",
        data.len()
    );
    Ok(Array1::from(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cooccur::CooccurCounter;
    use crate::weighter::StandardWeighter;

    fn example_matrix() -> SparseMatrix {
        let mut m = SparseMatrix::new(4, 4);
        m.set(3, 1, 0.5);
        m.set(1, 3, 0.2);
        m.set(0, 3, 0.3);
        m
    }

    fn corpus_matrix() -> (TokenSet, SparseMatrix) {
        let vocab = TokenSet::new(["the", "cat", "dog", "sat", "ran", "on", "mat", "log"]);
        let mut counter = CooccurCounter::new(&vocab, 2, false);
        for doc in [
            "the cat sat on the mat",
            "the dog sat on the log",
            "the cat ran",
            "the dog ran on the mat",
        ] {
            let doc: Vec<&str> = doc.split(' ').collect();
            counter.add(&doc);
        }
        let matrix = counter.into_matrix();
        (vocab, matrix)
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(17);
        let (_, matrix) = corpus_matrix();
        let mut trainer = Trainer::with_rng(6, matrix, &mut rng);
        trainer.biases.mapv_inplace(|_| rng.gen_range(-0.5..0.5));
        trainer.ctx_biases.mapv_inplace(|_| rng.gen_range(-0.5..0.5));

        let (ctx, word) = trainer.cooccur.random_entry(&mut rng).unwrap();
        let x = trainer.cooccur.get(ctx, word);
        let grad = trainer.gradient(ctx, word);
        let h = 1e-3f32;

        fn err(claimed: f32, measured: f32) -> f32 {
            let d = measured.abs().max(0.01);
            (claimed - measured).abs() / d
        }

        let cost_at = |t: &Trainer| t.residual(ctx, word, x).1;
        let check = |claimed: f32, t_minus: &Trainer, t_plus: &Trainer, what: &str| {
            let measured = (cost_at(t_plus) - cost_at(t_minus)) / (2.0 * h);
            let error = err(claimed, measured);
            assert!(
                error < 0.02,
                "{what}: computed {claimed}, measured {measured}, error {error}"
            );
        };

        for k in 0..trainer.vec_size() {
            let mut minus = trainer.clone();
            let mut plus = trainer.clone();
            minus.vectors[[word, k]] -= h;
            plus.vectors[[word, k]] += h;
            check(grad.word_vec[k], &minus, &plus, "word vector");

            let mut minus = trainer.clone();
            let mut plus = trainer.clone();
            minus.ctx_vectors[[ctx, k]] -= h;
            plus.ctx_vectors[[ctx, k]] += h;
            check(grad.ctx_vec[k], &minus, &plus, "context vector");
        }

        let mut minus = trainer.clone();
        let mut plus = trainer.clone();
        minus.biases[word] -= h;
        plus.biases[word] += h;
        check(grad.word_bias, &minus, &plus, "word bias");

        let mut minus = trainer.clone();
        let mut plus = trainer.clone();
        minus.ctx_biases[ctx] -= h;
        plus.ctx_biases[ctx] += h;
        check(grad.ctx_bias, &minus, &plus, "context bias");
    }

    #[test]
    fn adagrad_damping() {
        let mut param = 1.0f32;
        let mut history = 0.0f32;
        let mut last_step = f32::INFINITY;
        for _ in 0..100 {
            let before = param;
            adagrad_step(&mut param, &mut history, 0.3, 0.05);
            let step = (before - param).abs();
            assert!(step > 0.0);
            assert!(step <= last_step, "step grew from {last_step} to {step}");
            last_step = step;
        }
    }

    #[test]
    fn adagrad_zero_gradient() {
        let mut param = 0.25f32;
        let mut history = 0.0f32;
        adagrad_step(&mut param, &mut history, 0.0, 0.05);
        assert_eq!(param, 0.25);
        assert_eq!(history, 0.0);
    }

    #[test]
    fn training_reduces_cost() {
        let mut rng = StdRng::seed_from_u64(3);
        let (_, matrix) = corpus_matrix();
        let mut trainer = Trainer::with_rng(10, matrix, &mut rng);
        let before = trainer.mean_cost();
        for _ in 0..50 {
            let cost = trainer.update(200).unwrap();
            assert!(cost.is_finite());
        }
        let after = trainer.mean_cost();
        assert_eq!(trainer.num_updates(), 50 * 200);
        assert!(after < before, "cost went from {before} to {after}");
        assert!(trainer.vectors.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn update_requires_entries() {
        let mut trainer = Trainer::new(4, SparseMatrix::new(3, 3));
        assert!(trainer.update(10).is_err());
        assert_eq!(trainer.num_updates(), 0);
    }

    #[test]
    fn embedding_is_a_snapshot() {
        let (vocab, matrix) = corpus_matrix();
        let mut trainer = Trainer::new(5, matrix);
        let plain = trainer.embedding(vocab.clone(), false).unwrap();
        let averaged = trainer.embedding(vocab, true).unwrap();
        assert_eq!(plain.vectors(), trainer.vectors());
        let expected = (&trainer.vectors + &trainer.ctx_vectors) / 2.0;
        assert_eq!(averaged.vectors(), expected.view());

        trainer.update(100).unwrap();
        assert_ne!(plain.vectors(), trainer.vectors());
    }

    #[test]
    fn save_load() {
        let mut trainer = Trainer::new(15, example_matrix());
        trainer.weighter = StandardWeighter {
            power: 0.78,
            max: 1337.0,
        }
        .into();
        trainer.rate = 0.9;
        trainer.num_updates = 666;

        let mut buf = vec![];
        trainer.save(&mut buf).unwrap();
        let loaded = Trainer::load(&buf[..]).unwrap();
        assert_eq!(loaded, trainer);
    }

    #[test]
    fn load_truncated() {
        let mut trainer = Trainer::new(3, example_matrix());
        trainer.update(5).unwrap();
        let mut buf = vec![];
        trainer.save(&mut buf).unwrap();
        // Cut into the last record.
        buf.truncate(buf.len() - 4);
        let err = Trainer::load(&buf[..]).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("error reading update count"), "{msg}");
    }

    #[test]
    #[should_panic(expected = "(2, 2)")]
    fn new_rejects_zero_count() {
        let mut m = SparseMatrix::new(3, 3);
        m.set(0, 1, 3.0);
        m.set(1, 0, 3.0);
        m.set(2, 2, 0.0);
        Trainer::new(4, m);
    }

    #[test]
    fn load_rejects_zero_count() {
        let mut trainer = Trainer::new(4, example_matrix());
        trainer.cooccur.set(2, 2, 0.0);
        let mut buf = vec![];
        trainer.save(&mut buf).unwrap();
        let err = Trainer::load(&buf[..]).unwrap_err();
        assert!(format!("{err:#}").contains("(2, 2)"), "{err:#}");
    }
}
