use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use glove::{SparseMatrix, TokenSet, Trainer, Vocabulary, Weighter};

#[derive(Parser)]
#[command(about = "Train GloVe word vectors from a co-occurrence matrix", long_about = None)]
struct Options {
    /// Vocabulary and co-occurrence matrix written by glove-cooccur
    #[arg(long = "cooccur", value_name = "FILE")]
    cooccur_file: PathBuf,

    /// Use FILE to save the resulting word vectors
    #[arg(long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Set size of word vectors (a resumed trainer keeps its own size)
    #[arg(long = "size", default_value_t = 100, conflicts_with = "resume")]
    vec_size: usize,

    /// Set the learning rate; default is 0.05
    #[arg(long)]
    rate: Option<f64>,

    /// Exponent of the weighting function; default is 0.75
    #[arg(long)]
    power: Option<f64>,

    /// Co-occurrence count at which the weight reaches 1; default is 100
    #[arg(long = "x-max")]
    x_max: Option<f64>,

    /// Number of samples per mini-batch
    #[arg(long, default_value_t = 100_000)]
    batch: usize,

    /// Number of mini-batches to run
    #[arg(long, default_value_t = 1000)]
    iter: usize,

    /// Resume training from a trainer state saved with --state
    #[arg(long, value_name = "FILE")]
    resume: Option<PathBuf>,

    /// Save the trainer state to FILE so training can be resumed
    #[arg(long, value_name = "FILE")]
    state: Option<PathBuf>,

    /// Use the average of word and context vectors
    #[arg(long)]
    average: bool,

    /// Save the resulting vectors in binary mode
    #[arg(long, group = "format")]
    binary: bool,

    /// Save the embedding in bincode format
    #[arg(long, group = "format")]
    bincode: bool,
}

fn load_cooccur(path: &Path) -> Result<(TokenSet, SparseMatrix)> {
    let mut f = BufReader::new(
        File::open(path).with_context(|| format!("error opening co-occurrence file {path:?}"))?,
    );
    let vocab: TokenSet = bincode::deserialize_from(&mut f).context("error reading vocabulary")?;
    let matrix = SparseMatrix::load(&mut f)?;
    matrix.check_counts()?;
    ensure!(
        matrix.num_rows() == vocab.num_ids(),
        "co-occurrence matrix has {} rows but the vocabulary has {} IDs",
        matrix.num_rows(),
        vocab.num_ids()
    );
    Ok((vocab, matrix))
}

fn build_trainer(options: &Options, matrix: SparseMatrix) -> Result<Trainer> {
    let mut trainer = match &options.resume {
        Some(path) => {
            let f = File::open(path).with_context(|| format!("error opening trainer state {path:?}"))?;
            let trainer = Trainer::load(BufReader::new(f))
                .with_context(|| format!("failed to resume from {path:?}"))?;
            ensure!(
                trainer.cooccur().num_rows() == matrix.num_rows(),
                "saved trainer doesn't match the vocabulary"
            );
            if trainer.cooccur() != &matrix {
                warn!("resumed trainer has its own co-occurrence counts; ignoring --cooccur counts");
            }
            info!(num_updates = trainer.num_updates(), "resuming training");
            trainer
        }
        None => Trainer::new(options.vec_size, matrix),
    };

    if let Some(rate) = options.rate {
        trainer.rate = rate;
    }
    if options.power.is_some() || options.x_max.is_some() {
        let Weighter::Standard(mut w) = trainer.weighter;
        if let Some(power) = options.power {
            w.power = power;
        }
        if let Some(max) = options.x_max {
            w.max = max;
        }
        trainer.weighter = w.into();
    }
    Ok(trainer)
}

fn run(options: &Options) -> Result<()> {
    ensure!(options.vec_size > 0, "vector size must be positive");
    let (vocab, matrix) = load_cooccur(&options.cooccur_file)?;
    ensure!(matrix.num_entries() > 0, "no co-occurrences to train on");
    println!(
        "Starting training using {} entries for {} words",
        matrix.num_entries(),
        vocab.len()
    );
    let mut trainer = build_trainer(options, matrix)?;

    let pb = ProgressBar::new(options.iter as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .context("bad progress bar template")?,
    );
    for _ in 0..options.iter {
        let cost = trainer.update(options.batch)?;
        pb.set_message(format!("cost={cost:.4}"));
        pb.inc(1);
    }
    pb.finish();
    info!(
        num_updates = trainer.num_updates(),
        mean_cost = trainer.mean_cost(),
        "training done"
    );

    if let Some(path) = &options.state {
        let fo = BufWriter::new(File::create(path).context("error creating state file")?);
        trainer.save(fo)?;
    }

    let embedding = trainer.embedding(vocab, options.average)?;
    let fo = BufWriter::new(File::create(&options.output_file).context("error creating output file")?);
    if options.bincode {
        embedding.save(fo)
    } else {
        embedding.write_word2vec(fo, options.binary)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Result<Options, clap::Error> {
        let mut args = vec!["glove-train", "--cooccur", "c.bin", "--output", "v.txt"];
        args.extend_from_slice(extra);
        Options::try_parse_from(args)
    }

    #[test]
    fn size_conflicts_with_resume() {
        let opts = parse(&["--resume", "s.bin"]).unwrap();
        assert_eq!(opts.vec_size, 100);
        assert!(parse(&["--size", "50"]).is_ok());
        assert!(parse(&["--size", "50", "--resume", "s.bin"]).is_err());
    }
}
