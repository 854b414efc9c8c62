use std::path::PathBuf;

use clap::Parser;
use sdoc::{Config, LinkKind, NodeId};
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Report cycles among links of one kind")]
pub struct Cycles {
    /// The SDoc files making up the project
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// The link kind to check
    #[arg(long, short, default_value = "TracesTo")]
    kind: LinkKind,
}

impl Cycles {
    #[instrument(level = "debug", skip(self, config), fields(kind = %self.kind))]
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let index = super::load_project(&self.files, config)?;
        let cycles = index.detect_cycles(&self.kind);

        if cycles.is_empty() {
            println!("{}", format!("no {} cycles", self.kind).success());
            return Ok(());
        }
        for cycle in &cycles {
            let path: Vec<&str> = cycle
                .nodes
                .iter()
                .chain(std::iter::once(cycle.nodes.first()))
                .map(NodeId::as_str)
                .collect();
            println!("{}", path.join(" -> ").warning());
        }
        println!("{} {} cycles", cycles.len(), self.kind);
        Ok(())
    }
}
