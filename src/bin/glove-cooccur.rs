use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use glove::tokens::read_documents;
use glove::{CooccurCounter, TokenCounts, TokenSet};

#[derive(Parser)]
#[command(about = "Count word co-occurrences for GloVe training", long_about = None)]
struct Options {
    /// Use text data from FILE, one document per line
    #[arg(long = "train", value_name = "FILE")]
    train_file: PathBuf,

    /// Save the vocabulary and co-occurrence matrix to FILE
    #[arg(long = "output", value_name = "FILE")]
    output_file: PathBuf,

    /// Keep only the N most common words
    #[arg(long = "vocab-size", value_name = "N", default_value_t = 100_000)]
    vocab_size: usize,

    /// Set max distance between co-occurring words (0 = whole document)
    #[arg(long, default_value_t = 10)]
    window: usize,

    /// Count a co-occurrence at distance d as 1/d
    #[arg(long)]
    weight_words: bool,
}

fn run(options: &Options) -> Result<()> {
    let start = Instant::now();
    let f = File::open(&options.train_file)
        .with_context(|| format!("error opening training file {:?}", options.train_file))?;
    let documents = read_documents(BufReader::new(f)).collect::<Result<Vec<Vec<String>>>>()?;

    let counts = TokenCounts::from_tokens(documents.iter().flatten());
    let vocab = TokenSet::new(counts.most_common(options.vocab_size));
    info!(
        documents = documents.len(),
        distinct = counts.num_distinct(),
        vocab = vocab.len(),
        "vocabulary built"
    );

    let mut counter = CooccurCounter::new(&vocab, options.window, options.weight_words);
    counter.add_all(documents);
    let matrix = counter.into_matrix();

    let mut fo = BufWriter::new(
        File::create(&options.output_file).context("error creating output file")?,
    );
    bincode::serialize_into(&mut fo, &vocab).context("error writing vocabulary")?;
    matrix.save(&mut fo)?;
    fo.flush().context("error writing output file")?;

    println!(
        "{} entries for {} words in {:.2}s",
        matrix.num_entries(),
        vocab.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
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
