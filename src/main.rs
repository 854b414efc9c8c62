//! `sdoc`: check SDoc projects and query their traceability.

use clap::Parser;

mod cli;

fn main() -> anyhow::Result<()> {
    cli::Cli::parse().run()
}
