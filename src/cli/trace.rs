use std::path::PathBuf;

use clap::Parser;
use sdoc::{Config, Direction, LinkKind, Node};
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "List the nodes linked to a node")]
pub struct Trace {
    /// The identifier of the node
    id: String,

    /// The SDoc files making up the project
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// List the nodes this one is traced from instead
    #[arg(long, short)]
    backward: bool,

    /// Only follow links of this kind (`ParentOf` for the hierarchy)
    #[arg(long, short)]
    kind: Option<LinkKind>,
}

impl Trace {
    #[instrument(level = "debug", skip(self, config), fields(id = %self.id))]
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let index = super::load_project(&self.files, config)?;
        let direction = if self.backward {
            Direction::Backward
        } else {
            Direction::Forward
        };

        let nodes = match &self.kind {
            Some(kind) => index.query_trace_kind(&self.id, direction, kind)?,
            None => index.query_trace(&self.id, direction)?,
        };

        if nodes.is_empty() {
            println!("{}", format!("nothing traced from {}", self.id).dim());
        }
        for node in &nodes {
            println!("{}", describe(node));
        }
        Ok(())
    }
}

/// One line per node: identifier, kind and title.
pub fn describe(node: &Node) -> String {
    let title = node
        .text("TITLE")
        .map(|title| format!("  {title}"))
        .unwrap_or_default();
    format!(
        "{}  {}{title}",
        node.id().as_str().info(),
        node.kind().dim()
    )
}
