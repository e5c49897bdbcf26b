//! CLI dispatcher for the proof-of-liabilities pipeline
//!
//! Four commands, one snapshot per run:
//!
//! - `generate N K` — write N synthetic secret batches of K accounts each.
//! - `prove N` — read N secret batches, emit the three-layer proof chain
//!   (stripped artifacts to `public/`, custodian copies to `secret/`).
//! - `verify N` — custodian-side full verification of a proving run.
//! - `userverify PATH` — verify a single holder's bundle.
//!
//! Any failure prints one diagnostic line to stderr and exits non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use solvency::artifacts::Layout;
use solvency::{generator, prover, verifier};

#[derive(Parser)]
#[command(name = "solvency")]
#[command(about = "Batch prover and verifier for a liability commitment", version)]
struct Cli {
    /// Root directory for all artifacts.
    #[arg(long, default_value = "out")]
    out: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate synthetic secret batches for development and testing
    Generate {
        /// Number of batch files to produce
        batches: usize,
        /// Accounts per batch (at most 1024)
        accounts_per_batch: usize,
    },
    /// Prove: read secret batches and emit the three-layer proof chain
    Prove {
        /// Number of secret batches to read
        batches: usize,
    },
    /// Full custodian-side verification of a proving run
    Verify {
        /// Number of bottom-level proofs to verify
        batches: usize,
    },
    /// Verify an account holder's bundle
    Userverify {
        /// Path to the bundle JSON
        path: PathBuf,
    },
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Generate {
            batches,
            accounts_per_batch,
        } => {
            generator::generate_data(batches, accounts_per_batch, &Layout::new(&cli.out))?;
            println!("generated {batches} secret batch(es) of {accounts_per_batch} account(s)");
        }
        Command::Prove { batches } => {
            let (bottoms, _top) = prover::prove(batches, &cli.out)?;
            println!("proved {} batch(es); proof chain written", bottoms.len());
        }
        Command::Verify { batches } => {
            verifier::verify_full_run(batches, &cli.out)?;
            println!("verification succeeded");
        }
        Command::Userverify { path } => {
            verifier::verify_user_bundle_file(&path)?;
            println!("user verification succeeded");
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
