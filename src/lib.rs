//! Word embeddings with GloVe: co-occurrence counting and AdaGrad training.

mod sparse;
pub use sparse::{SparseMatrix, SparseVector};

mod picker;
pub use picker::EntryPicker;

pub mod tokens;
pub use tokens::{TokenCounts, TokenSet, Vocabulary};

mod cooccur;
pub use cooccur::CooccurCounter;

mod weighter;
pub use weighter::{StandardWeighter, Weighter};

mod trainer;
pub use trainer::{adagrad_step, Trainer, DEFAULT_RATE};

mod embedding;
pub use embedding::Embedding;
