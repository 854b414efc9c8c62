use std::path::PathBuf;

use clap::Parser;
use sdoc::Config;
use tracing::instrument;

use super::{terminal::Colorize, trace::describe};

#[derive(Debug, Parser)]
#[command(about = "List the nodes matching a query")]
pub struct Query {
    /// The query, for example `(node.is_requirement and node["STATUS"] == "Draft")`
    query: sdoc::Query,

    /// The SDoc files making up the project
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Print only the number of matches
    #[arg(long)]
    count: bool,
}

impl Query {
    #[instrument(level = "debug", skip_all)]
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let index = super::load_project(&self.files, config)?;
        let found = index.find(&self.query);

        if self.count {
            println!("{}", found.len());
            return Ok(());
        }
        if found.is_empty() {
            println!("{}", "no matching nodes".dim());
        }
        for node in &found {
            println!("{}", describe(node));
        }
        Ok(())
    }
}
