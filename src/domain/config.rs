use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::schema::LinkKind;

/// Configuration for building and checking a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Versions", into = "Versions")]
pub struct Config {
    /// Link kinds whose cycles are permitted.
    ///
    /// Cycles among links of any other kind are reported as warnings when the
    /// project is built. For example, two requirements may duplicate each
    /// other.
    cyclic_link_kinds: Vec<String>,

    /// Whether documents are parsed in parallel when a project is loaded.
    pub parallel: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cyclic_link_kinds: default_cyclic_link_kinds(),
            parallel: true,
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the TOML content is
    /// invalid.
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;
        toml::from_str(&content).map_err(|e| format!("Failed to parse config file: {e}"))
    }

    /// Saves the configuration to a TOML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized to TOML or if
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content =
            toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content).map_err(|e| format!("Failed to write config file: {e}"))
    }

    /// Returns the link kinds whose cycles are permitted.
    #[must_use]
    pub fn cyclic_link_kinds(&self) -> &[String] {
        &self.cyclic_link_kinds
    }

    /// Checks if cycles among links of this kind are permitted.
    ///
    /// The hierarchy kind never is.
    #[must_use]
    pub fn allows_cycles(&self, kind: &LinkKind) -> bool {
        if kind.is_hierarchy() {
            return false;
        }
        let name = kind.to_string();
        self.cyclic_link_kinds.iter().any(|k| *k == name)
    }

    /// Permits cycles among links of a kind.
    ///
    /// Returns `true` if the kind was added, `false` if it was already
    /// permitted.
    pub fn allow_cycles(&mut self, kind: &LinkKind) -> bool {
        let name = kind.to_string();
        if self.cyclic_link_kinds.contains(&name) {
            false
        } else {
            self.cyclic_link_kinds.push(name);
            true
        }
    }
}

fn default_cyclic_link_kinds() -> Vec<String> {
    vec![LinkKind::Duplicates.to_string()]
}

const fn default_parallel() -> bool {
    true
}

/// The serialized versions of the configuration.
/// This allows for future changes to the configuration format and to the domain
/// type without breaking compatibility.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "_version")]
enum Versions {
    #[serde(rename = "1")]
    V1 {
        #[serde(default = "default_cyclic_link_kinds")]
        cyclic_link_kinds: Vec<String>,

        #[serde(default = "default_parallel")]
        parallel: bool,
    },
}

impl From<Versions> for Config {
    fn from(versions: Versions) -> Self {
        match versions {
            Versions::V1 {
                cyclic_link_kinds,
                parallel,
            } => Self {
                cyclic_link_kinds,
                parallel,
            },
        }
    }
}

impl From<Config> for Versions {
    fn from(config: Config) -> Self {
        Self::V1 {
            cyclic_link_kinds: config.cyclic_link_kinds,
            parallel: config.parallel,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn load_reads_valid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"_version = \"1\"\ncyclic_link_kinds = [\"Verifies\"]\nparallel = false\n")
            .unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.cyclic_link_kinds(), &["Verifies".to_string()]);
        assert!(!config.parallel);
        assert!(config.allows_cycles(&LinkKind::Custom("Verifies".to_string())));
        assert!(!config.allows_cycles(&LinkKind::Duplicates));
    }

    #[test]
    fn load_missing_file_returns_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.toml");

        let error = Config::load(&missing).unwrap_err();
        assert!(error.starts_with("Failed to read config file:"));
    }

    #[test]
    fn load_invalid_toml_returns_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"_version = \"1\"\nparallel = \"yes\"\n")
            .unwrap();

        let error = Config::load(file.path()).unwrap_err();
        assert!(error.starts_with("Failed to parse config file:"));
    }

    #[test]
    fn empty_file_returns_default() {
        let expected = Config::default();
        let actual: Config = toml::from_str(r#"_version = "1""#).unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn save_then_load_keeps_settings() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("sdoc.toml");
        let mut config = Config::default();
        assert!(config.allow_cycles(&LinkKind::TracesTo));
        assert!(!config.allow_cycles(&LinkKind::TracesTo));

        config.save(&path).unwrap();
        let loaded = Config::load(&path).unwrap();

        assert_eq!(loaded, config);
        assert!(loaded.allows_cycles(&LinkKind::TracesTo));
    }

    #[test]
    fn hierarchy_cycles_are_never_allowed() {
        let mut config = Config::default();
        config.allow_cycles(&LinkKind::ParentOf);
        assert!(!config.allows_cycles(&LinkKind::ParentOf));
    }
}
