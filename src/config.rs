//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/hstree/hstree.toml`
//! 3. Explicit config file (`--config`)
//! 4. Environment variables: `HSTREE_*` prefix, `__` between sections

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::application::services::{RetryPolicy, TraversalSettings};
use crate::application::ApplicationError;
use crate::domain::DEFAULT_MAX_LEAF_DEPTH;
use crate::util::path::expand_path;

/// Traversal limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TraversalConfig {
    /// Maximum logged steps per classification
    pub max_steps: u32,
    /// Batch sessions (and oracle calls) in flight at once
    pub concurrency: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            max_steps: 10,
            concurrency: 4,
        }
    }
}

/// Session blob sealing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// MAC secret; never printed. Falls back to the key file when unset.
    #[serde(skip_serializing)]
    pub key: Option<String>,
    /// Generated on first use when `key` is unset
    pub key_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key: None,
            key_path: default_data_file("session.key"),
        }
    }
}

/// Decision oracle endpoint and call policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of an OpenAI-compatible API
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Per-request timeout
    pub timeout_secs: u64,
    /// Attempts per decision, first call included
    pub retries: u32,
    /// Fixed pause between attempts
    pub backoff_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".into(),
            model: "o3-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            timeout_secs: 60,
            retries: 3,
            backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawTraversalConfig {
    pub max_steps: Option<u32>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSessionConfig {
    pub key: Option<String>,
    pub key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawOracleConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub timeout_secs: Option<u64>,
    pub retries: Option<u32>,
    pub backoff_ms: Option<u64>,
}

/// Raw settings for intermediate parsing.
///
/// `None` means "not specified in this layer, inherit from below".
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub store_path: Option<PathBuf>,
    pub separator: Option<String>,
    pub max_leaf_depth: Option<i64>,
    pub traversal: RawTraversalConfig,
    pub oracle: RawOracleConfig,
    pub session: RawSessionConfig,
}

/// Unified configuration for hstree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Persisted hierarchy store
    pub store_path: PathBuf,
    /// Joins descriptions in display paths
    pub separator: String,
    /// Rows at or below this depth never become parents
    pub max_leaf_depth: i64,
    pub traversal: TraversalConfig,
    pub oracle: OracleConfig,
    pub session: SessionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_path: default_data_file("hs_code_tree.json"),
            separator: " > ".into(),
            max_leaf_depth: DEFAULT_MAX_LEAF_DEPTH,
            traversal: TraversalConfig::default(),
            oracle: OracleConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

fn default_data_file(name: &str) -> PathBuf {
    ProjectDirs::from("", "", "hstree")
        .map(|dirs| dirs.data_dir().join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Get the XDG config directory for hstree.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "hstree").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("hstree.toml"))
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Merge overlay config onto self: overlay wins wherever it says something.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        let oracle = &overlay.oracle;
        let session = &overlay.session;
        Self {
            store_path: overlay
                .store_path
                .clone()
                .unwrap_or_else(|| self.store_path.clone()),
            separator: overlay
                .separator
                .clone()
                .unwrap_or_else(|| self.separator.clone()),
            max_leaf_depth: overlay.max_leaf_depth.unwrap_or(self.max_leaf_depth),
            traversal: TraversalConfig {
                max_steps: overlay
                    .traversal
                    .max_steps
                    .unwrap_or(self.traversal.max_steps),
                concurrency: overlay
                    .traversal
                    .concurrency
                    .unwrap_or(self.traversal.concurrency),
            },
            oracle: OracleConfig {
                endpoint: oracle
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| self.oracle.endpoint.clone()),
                model: oracle
                    .model
                    .clone()
                    .unwrap_or_else(|| self.oracle.model.clone()),
                api_key_env: oracle
                    .api_key_env
                    .clone()
                    .unwrap_or_else(|| self.oracle.api_key_env.clone()),
                timeout_secs: oracle.timeout_secs.unwrap_or(self.oracle.timeout_secs),
                retries: oracle.retries.unwrap_or(self.oracle.retries),
                backoff_ms: oracle.backoff_ms.unwrap_or(self.oracle.backoff_ms),
            },
            session: SessionConfig {
                key: session.key.clone().or_else(|| self.session.key.clone()),
                key_path: session
                    .key_path
                    .clone()
                    .unwrap_or_else(|| self.session.key_path.clone()),
            },
        }
    }

    /// Load settings with layered precedence.
    ///
    /// An explicit `config_file` must exist; the global file is optional.
    pub fn load(config_file: Option<&Path>) -> Result<Self, ApplicationError> {
        // 1. Start with defaults
        let mut current = Self::default();

        // 2. Global config
        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                debug!("Loading global config {}", global_path.display());
                current = current.merge_with(&load_raw_settings(&global_path)?);
            }
        }

        // 3. Explicit config file
        if let Some(path) = config_file {
            debug!("Loading config {}", path.display());
            current = current.merge_with(&load_raw_settings(path)?);
        }

        // 4. Environment overrides
        current = Self::apply_env_overrides(current)?;

        current.expand_paths();
        current.validate()?;
        Ok(current)
    }

    /// Apply HSTREE_* environment variables as explicit overrides.
    fn apply_env_overrides(settings: Self) -> Result<Self, ApplicationError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("HSTREE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_err)?;

        let raw = RawSettings {
            store_path: config.get_string("store_path").ok().map(PathBuf::from),
            separator: config.get_string("separator").ok(),
            max_leaf_depth: env_number(&config, "max_leaf_depth")?,
            traversal: RawTraversalConfig {
                max_steps: env_number(&config, "traversal.max_steps")?,
                concurrency: env_number(&config, "traversal.concurrency")?,
            },
            oracle: RawOracleConfig {
                endpoint: config.get_string("oracle.endpoint").ok(),
                model: config.get_string("oracle.model").ok(),
                api_key_env: config.get_string("oracle.api_key_env").ok(),
                timeout_secs: env_number(&config, "oracle.timeout_secs")?,
                retries: env_number(&config, "oracle.retries")?,
                backoff_ms: env_number(&config, "oracle.backoff_ms")?,
            },
            session: RawSessionConfig {
                key: config.get_string("session.key").ok(),
                key_path: config.get_string("session.key_path").ok().map(PathBuf::from),
            },
        };
        Ok(settings.merge_with(&raw))
    }

    /// Expand `~`, `$VAR` and `${VAR}` in path-like fields.
    fn expand_paths(&mut self) {
        self.store_path = expand_path(&self.store_path);
        self.session.key_path = expand_path(&self.session.key_path);
    }

    /// Reject settings that would make classification impossible.
    pub fn validate(&self) -> Result<(), ApplicationError> {
        let problem = if self.traversal.max_steps == 0 {
            Some("traversal.max_steps must be at least 1")
        } else if self.oracle.retries == 0 {
            Some("oracle.retries must be at least 1")
        } else if self.oracle.timeout_secs == 0 {
            Some("oracle.timeout_secs must be at least 1")
        } else if self.oracle.model.trim().is_empty() {
            Some("oracle.model must not be empty")
        } else if self.traversal.concurrency == 0 {
            Some("traversal.concurrency must be at least 1")
        } else if self.session.key.as_deref().is_some_and(|k| k.trim().is_empty()) {
            Some("session.key must not be empty when set")
        } else if self.max_leaf_depth < 0 {
            Some("max_leaf_depth must not be negative")
        } else {
            None
        };
        match problem {
            Some(message) => Err(ApplicationError::Config {
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.oracle.retries,
            backoff: Duration::from_millis(self.oracle.backoff_ms),
        }
    }

    pub fn traversal_settings(&self) -> TraversalSettings {
        TraversalSettings {
            max_steps: self.traversal.max_steps,
            retry: self.retry_policy(),
            separator: self.separator.clone(),
            concurrency: self.traversal.concurrency,
        }
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# hstree configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/hstree/hstree.toml
#   File:   --config <path>
#   Env:    HSTREE_* environment variables, sections joined by "__"
#           e.g. HSTREE_ORACLE__MODEL=gpt-4o-mini

# Persisted hierarchy store written by `hstree build`
# store_path = "~/.local/share/hstree/hs_code_tree.json"

# Separator for human readable classification paths
# separator = " > "

# Source rows at or below this indent are always leaves
# max_leaf_depth = 9

[traversal]
# Hard cap on steps per classification
# max_steps = 10

# Products of a batch classified (and oracle requests sent) at once
# concurrency = 4

[oracle]
# Any OpenAI-compatible chat completions API
# endpoint = "https://api.openai.com/v1"
# model = "o3-mini"

# Environment variable holding the API key
# api_key_env = "OPENAI_API_KEY"

# Per-request timeout in seconds
# timeout_secs = 60

# Attempts per decision and the pause between them
# retries = 3
# backoff_ms = 2000

[session]
# Secret sealing session blobs; prefer HSTREE_SESSION__KEY over writing it here.
# Without it a random key is generated into key_path on first use.
# key = "..."
# key_path = "~/.local/share/hstree/session.key"
"#
        .to_string()
    }
}

/// Read a numeric env override, failing loudly on garbage.
fn env_number<T>(config: &Config, key: &str) -> Result<Option<T>, ApplicationError>
where
    T: for<'de> Deserialize<'de>,
{
    match config.get::<T>(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(ApplicationError::Config {
            message: format!("{}: {}", key, e),
        }),
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
