use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "classquery.toml";

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) session: SessionConfig,
    #[serde(default)]
    pub(crate) decompiler: DecompilerConfig,
    #[serde(default)]
    pub(crate) telemetry: TelemetryConfig,
}

/// Session opened eagerly when the server starts.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct SessionConfig {
    pub(crate) input: Option<PathBuf>,
    pub(crate) output: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct DecompilerConfig {
    /// Argv prefix of an external decompiler; the `.class` path is appended.
    pub(crate) command: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct TelemetryConfig {
    pub(crate) otlp_endpoint: Option<String>,
}

impl Config {
    /// Load the explicit config file, or `./classquery.toml` when it exists.
    ///
    /// A missing explicit file is an error; a missing default file yields defaults.
    pub(crate) fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }
}
