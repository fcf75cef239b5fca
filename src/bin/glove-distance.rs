use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Array1;

use glove::{Embedding, Vocabulary};

/// number of closest words that will be shown
const N: usize = 40;

#[derive(Parser)]
#[command(about = "Show the nearest words in a trained GloVe embedding", long_about = None)]
struct Options {
    /// Embedding saved by glove-train with --bincode
    #[arg(value_name = "FILE")]
    file_name: PathBuf,
}

fn run(options: &Options) -> Result<()> {
    let f = File::open(&options.file_name).context("error opening input file")?;
    let embedding = Embedding::load(BufReader::new(f))?;
    let oov = embedding.tokens().num_ids() - 1;

    let mut line = String::new();
    'outer: loop {
        print!("Enter word or sentence (EXIT to break): ");
        let _ = std::io::stdout().flush();

        line.clear();
        if std::io::stdin().read_line(&mut line).context("error reading stdin")? == 0 {
            break;
        }
        if line.trim() == "EXIT" {
            break;
        }

        let mut bi: Vec<usize> = vec![];
        for word in line.split_whitespace() {
            println!();
            print!("Word: {word}  Position in vocabulary: ");
            let id = embedding.tokens().id(word);
            if id == oov {
                println!("None");
                println!("Out of dictionary word!");
                continue 'outer;
            }
            println!("{id}");
            bi.push(id);
        }
        if bi.is_empty() {
            continue;
        }

        println!();
        println!("                                              Word       Euclidean distance");
        println!("---------------------------------------------------------------------------");

        let mut vec = Array1::<f32>::zeros(embedding.dim());
        for &i in &bi {
            vec += &embedding.embed_id(i);
        }
        vec /= bi.len() as f32;

        let nearest = embedding.lookup(vec.view(), N + bi.len() + 1)?;
        for id in nearest
            .into_iter()
            .filter(|c| *c != oov && !bi.contains(c))
            .take(N)
        {
            let diff = &embedding.embed_id(id) - &vec;
            let dist = diff.dot(&diff).sqrt();
            println!("{:>50}\t\t{:8.6}", embedding.token(id).unwrap_or(""), dist);
        }
    }
    Ok(())
}

fn main() {
    let options = Options::parse();
    if let Err(err) = run(&options) {
        eprintln!("{err:#}");
        process::exit(1);
    }
}
