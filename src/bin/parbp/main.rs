//! parbp CLI: time the parallel succinct-tree construction.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Instant;

use parbp::{BitVec, SuccinctTree};

#[derive(Debug, Parser)]
#[command(name = "parbp")]
#[command(about = "Parallel succinct-tree construction over balanced parentheses", long_about = None)]
#[command(version)]
struct Cli {
    /// Input parentheses sequence, e.g. "((()))(())"
    input: String,

    /// Number of worker threads (defaults to all available cores)
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let bits = BitVec::from_parentheses(&cli.input).context("invalid input sequence")?;
    let n = bits.len();

    let workers = cli
        .threads
        .unwrap_or_else(rayon::current_num_threads)
        .max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("failed to build thread pool")?;

    let start = Instant::now();
    let _tree = pool
        .install(|| SuccinctTree::new(bits))
        .context("index construction failed")?;
    let seconds = start.elapsed().as_secs_f64();

    println!("{},{},{},{:.6}", workers, cli.input, n, seconds);
    Ok(())
}
