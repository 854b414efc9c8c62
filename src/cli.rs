use std::path::{Path, PathBuf};

mod check;
mod cycles;
mod query;
mod terminal;
mod trace;

use anyhow::Context;
use check::Check;
use clap::ArgAction;
use cycles::Cycles;
use query::Query;
use sdoc::{Config, DocumentId, ProjectIndex, Source};
use trace::Trace;

#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    pub fn run(self) -> anyhow::Result<()> {
        Self::setup_logging(self.verbose);

        let config = match &self.config {
            Some(path) => Config::load(path).map_err(anyhow::Error::msg)?,
            None => Config::default(),
        };
        self.command.run(&config)
    }

    fn setup_logging(verbosity: u8) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let level = match verbosity {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        };

        let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .init();
    }
}

#[derive(Debug, clap::Parser)]
pub enum Command {
    /// Parse and validate documents, reporting every diagnostic
    Check(Check),

    /// List the nodes linked to a node
    ///
    /// Forward lists children and referenced nodes; backward lists the parent
    /// and referencing nodes.
    Trace(Trace),

    /// List the nodes matching a query
    Query(Query),

    /// Report cycles among links of one kind
    Cycles(Cycles),
}

impl Command {
    fn run(self, config: &Config) -> anyhow::Result<()> {
        match self {
            Self::Check(command) => command.run(config)?,
            Self::Trace(command) => command.run(config)?,
            Self::Query(command) => command.run(config)?,
            Self::Cycles(command) => command.run(config)?,
        }
        Ok(())
    }
}

/// Reads the given files and builds the project index.
///
/// Each document is identified by its path as given.
fn load_project(files: &[PathBuf], config: &Config) -> anyhow::Result<ProjectIndex> {
    let sources = files
        .iter()
        .map(|path| read_source(path))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(ProjectIndex::load(&sources, config))
}

fn read_source(path: &Path) -> anyhow::Result<Source> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let document = DocumentId::new(path.display().to_string())?;
    Ok(Source::new(document, text))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use clap::Parser;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn documents_are_named_by_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.sdoc");
        fs::write(&path, "[DOCUMENT]\nTITLE: A\n\n[REQUIREMENT]\nUID: REQ-1\n").unwrap();

        let index = load_project(&[path.clone()], &Config::default()).unwrap();

        assert_eq!(index.documents()[0].as_str(), path.display().to_string());
        assert!(index.node("REQ-1").is_ok());
    }

    #[test]
    fn missing_files_are_an_error() {
        let dir = TempDir::new().unwrap();
        let result = load_project(&[dir.path().join("missing.sdoc")], &Config::default());
        assert!(result.is_err());
    }

    #[test]
    fn parses_global_flags_after_the_subcommand() {
        let cli = Cli::try_parse_from(["sdoc", "check", "a.sdoc", "-vv", "--config", "c.toml"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
    }
}
