//! Engine configuration and resource limits.
//!
//! Configuration is plain TOML:
//!
//! ```toml
//! default_term_limit = 1000
//! warn_on_multi_group_filter = true
//!
//! [limits]
//! query_in_memory_rows_limit = 500000
//! ```
//!
//! Every key is optional; missing keys fall back to [`EngineConfig::default`].

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EngineError, Result};

/// Environment variable consulted by [`EngineConfig::load`] when no explicit path is given.
pub const CONFIG_ENV_VAR: &str = "IMHOTEP_GROUPBY_CONFIG";

/// Default ceiling on the number of rows (groups) a query may hold in memory.
pub const DEFAULT_IN_MEMORY_ROWS_LIMIT: u64 = 1_000_000;

/// Resource ceilings enforced before operations that multiply the group count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum number of groups/rows a single query may materialize.
    pub query_in_memory_rows_limit: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            query_in_memory_rows_limit: DEFAULT_IN_MEMORY_ROWS_LIMIT,
        }
    }
}

impl Limits {
    /// Creates limits with the given row ceiling.
    pub const fn with_rows_limit(query_in_memory_rows_limit: u64) -> Self {
        Self {
            query_in_memory_rows_limit,
        }
    }

    /// Returns `true` when `rows` fits under the ceiling.
    pub fn satisfies_in_memory_rows(&self, rows: u64) -> bool {
        rows <= self.query_in_memory_rows_limit
    }

    /// Fails with [`EngineError::RowLimitExceeded`] when `rows` is over the ceiling.
    pub fn assert_in_memory_rows(&self, rows: u64) -> Result<()> {
        if self.satisfies_in_memory_rows(rows) {
            Ok(())
        } else {
            Err(EngineError::RowLimitExceeded {
                requested: rows,
                limit: self.query_in_memory_rows_limit,
            })
        }
    }
}

/// Tunables for an [`EzSession`](crate::session::EzSession).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Term limit applied by FTGS enumeration when a caller passes `0`.
    pub default_term_limit: u64,
    /// Emit the advisory warning for term/query filters over several groups.
    pub warn_on_multi_group_filter: bool,
    /// Row ceilings.
    pub limits: Limits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_term_limit: 0,
            warn_on_multi_group_filter: true,
            limits: Limits::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `explicit`, then from [`CONFIG_ENV_VAR`], then defaults.
    ///
    /// A path that is named but missing is an error; the absence of any path is not.
    pub fn load(explicit: Option<PathBuf>) -> std::result::Result<Self, ConfigError> {
        let path = explicit.or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));
        match path {
            Some(path) => read_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Parses configuration from a TOML document.
    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse { path: None, source })
    }

    /// Serializes the configuration back to TOML.
    pub fn to_toml_string(&self) -> std::result::Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }
}

fn read_file(path: &Path) -> std::result::Result<EngineConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: Some(path.to_path_buf()),
        source,
    })
}

/// Failures while loading or storing [`EngineConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read engine config {path}: {source}")]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Config contents were not valid TOML for [`EngineConfig`].
    #[error("failed to parse engine config: {source}")]
    Parse {
        /// File that failed, when parsing from disk.
        path: Option<PathBuf>,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// Config could not be rendered as TOML.
    #[error("failed to serialize engine config: {source}")]
    Serialize {
        /// Underlying TOML error.
        source: toml::ser::Error,
    },
}
