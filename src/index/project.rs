use std::sync::Arc;

use parking_lot::RwLock;
use tracing::instrument;

use super::{ProjectIndex, Source};
use crate::domain::{Config, Diagnostics};

/// The current index of a project.
///
/// Readers take a handle to the current [`ProjectIndex`] and keep using it
/// for as long as they like. A rebuild constructs the new index without
/// holding any lock and then swaps it in, so every reader sees either the
/// previous index or the new one, never a partially built state.
#[derive(Debug)]
pub struct Project {
    config: Config,
    current: RwLock<Arc<ProjectIndex>>,
}

impl Project {
    /// A project with no documents.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let index = ProjectIndex::build(Vec::new(), Diagnostics::new(), &config);
        Self {
            config,
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// A project built from sources.
    #[must_use]
    pub fn load(sources: &[Source], config: Config) -> Self {
        let index = ProjectIndex::load(sources, &config);
        Self {
            config,
            current: RwLock::new(Arc::new(index)),
        }
    }

    /// The configuration used for every build.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// A handle to the current index.
    #[must_use]
    pub fn index(&self) -> Arc<ProjectIndex> {
        Arc::clone(&self.current.read())
    }

    /// Rebuilds the index from sources and makes it current.
    ///
    /// Returns the index it replaced.
    #[instrument(level = "info", skip_all, fields(documents = sources.len()))]
    pub fn rebuild(&self, sources: &[Source]) -> Arc<ProjectIndex> {
        let index = ProjectIndex::load(sources, &self.config);
        self.replace(index)
    }

    /// Makes an index current, returning the one it replaced.
    pub fn replace(&self, index: ProjectIndex) -> Arc<ProjectIndex> {
        let previous = std::mem::replace(&mut *self.current.write(), Arc::new(index));
        tracing::debug!(nodes = previous.len(), "previous index retired");
        previous
    }
}

impl Default for Project {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
