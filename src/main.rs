//! Structural-variation genotyper.
//!
//! Genotypes a catalog of deletions and inversions against a sequenced
//! sample without aligning a single read: diagnostic k-mers are chosen
//! from each event, their observations in the sample are attributed to
//! loci via flanking markers, and a linear program allocates the counts to
//! per-event genotypes.

mod bio;
mod cli;
mod config;
mod counts;
mod io;
mod lp;
mod pipeline;
mod sv;
mod utils;

use anyhow::Result;
use clap::Parser;
use log::error;

use cli::{run_cli, Cli};

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if let Err(e) = run_cli(cli) {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}
