use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use sdoc::{Config, Diagnostic, Severity};
use tracing::instrument;

use super::terminal::Colorize;

#[derive(Debug, Parser)]
#[command(about = "Parse and validate documents, reporting every diagnostic")]
pub struct Check {
    /// The SDoc files making up the project
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Output format
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    output: OutputFormat,

    /// Suppress warnings
    #[arg(long, short)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl Check {
    #[instrument(level = "debug", skip(self, config))]
    pub fn run(self, config: &Config) -> anyhow::Result<()> {
        let index = super::load_project(&self.files, config)?;
        let diagnostics: Vec<Diagnostic> = index
            .diagnostics()
            .into_iter()
            .filter(|diagnostic| !self.quiet || diagnostic.severity == Severity::Error)
            .collect();
        let errors = diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Error)
            .count();

        match self.output {
            OutputFormat::Text => {
                for diagnostic in &diagnostics {
                    println!("{}", render(diagnostic));
                }
                let summary = format!(
                    "{} documents, {} nodes: {errors} errors, {} warnings",
                    index.documents().len(),
                    index.len(),
                    diagnostics.len() - errors,
                );
                if errors == 0 {
                    println!("{}", summary.success());
                } else {
                    println!("{}", summary.error());
                }
            }
            OutputFormat::Json => {
                serde_json::to_writer_pretty(std::io::stdout(), &diagnostics)
                    .context("failed to render json output")?;
                println!();
            }
        }

        if errors > 0 {
            anyhow::bail!("{errors} errors found");
        }
        Ok(())
    }
}

fn render(diagnostic: &Diagnostic) -> String {
    let severity = match diagnostic.severity {
        Severity::Error => "error".error(),
        Severity::Warning => "warning".warning(),
    };
    format!(
        "{}: {severity}[{:?}]: {}",
        diagnostic.location, diagnostic.code, diagnostic.message
    )
}
