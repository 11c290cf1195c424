//! TOML-based configuration for Tabula.
//!
//! Supports a config file (tabula.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [connection]
//! dialect = "oracle"
//! dsn = "${WAREHOUSE_DSN}"
//!
//! [pool]
//! max_open_conns = 20
//! max_idle_conns = 5
//! acquire_timeout_ms = 5000
//!
//! [governor]
//! preview_row_ceiling = 100000
//! export_row_ceiling = 1000000
//! cost_ceiling = 1000000
//! query_timeout_secs = 300
//!
//! [compiler]
//! max_depth = 8
//! max_leaves = 64
//! max_in_operands = 999
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::sql::Dialect;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Unsupported dialect: {0}")]
    UnsupportedDialect(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Target database connection.
    pub connection: ConnectionSettings,

    /// Connection pool sizing and acquisition behavior.
    pub pool: PoolSettings,

    /// Governor ceilings: row limits, cost threshold, timeouts,
    /// per-class concurrency.
    pub governor: GovernorSettings,

    /// Predicate compiler ceilings.
    pub compiler: CompilerSettings,
}

/// Connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Target dialect (duckdb, oracle).
    pub dialect: String,

    /// Data source name (supports ${ENV_VAR} expansion).
    pub dsn: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            dialect: "duckdb".to_string(),
            dsn: String::new(),
        }
    }
}

impl ConnectionSettings {
    /// Get the configured dialect.
    pub fn dialect(&self) -> Result<Dialect, SettingsError> {
        Dialect::from_str(&self.dialect)
            .map_err(|_| SettingsError::UnsupportedDialect(self.dialect.clone()))
    }

    /// Get the DSN with environment variables expanded.
    pub fn resolved_dsn(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.dsn)
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of open connections.
    pub max_open_conns: u32,

    /// Maximum number of idle connections kept around.
    pub max_idle_conns: u32,

    /// How long one acquisition attempt waits for a free slot.
    pub acquire_timeout_ms: u64,

    /// Acquisition attempts before giving up with pool exhaustion.
    pub acquire_retries: u32,

    /// Pause between acquisition attempts.
    pub retry_backoff_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open_conns: 10,
            max_idle_conns: 5,
            acquire_timeout_ms: 5000,
            acquire_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

/// Execution governor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GovernorSettings {
    /// Largest page a preview may request; larger limits are clamped.
    pub preview_row_ceiling: u64,

    /// Hard cap on exported rows; exceeding it aborts the export.
    pub export_row_ceiling: u64,

    /// Reject queries whose estimated cardinality exceeds this, when the
    /// dialect can estimate at all.
    pub cost_ceiling: u64,

    /// Wall-clock execution timeout per statement.
    pub query_timeout_secs: u64,

    /// Concurrent preview executions.
    pub preview_concurrency: usize,

    /// Concurrent export executions.
    pub export_concurrency: usize,

    /// Rows fetched per cursor chunk during exports.
    pub export_chunk_rows: u64,
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            preview_row_ceiling: 100_000,
            export_row_ceiling: 1_000_000,
            cost_ceiling: 1_000_000,
            query_timeout_secs: 300,
            preview_concurrency: 32,
            export_concurrency: 8,
            export_chunk_rows: 10_000,
        }
    }
}

/// Predicate compiler ceilings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Maximum filter tree nesting depth.
    pub max_depth: usize,

    /// Maximum number of leaf conditions across the tree.
    pub max_leaves: usize,

    /// Maximum operand count for a single IN condition.
    pub max_in_operands: usize,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            max_depth: 8,
            max_leaves: 64,
            max_in_operands: 999,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `TABULA_CONFIG`
    /// 2. `./tabula.toml`
    /// 3. `~/.config/tabula/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("TABULA_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("tabula.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("tabula").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        // Return defaults if no config file found
        Ok(Settings::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            // Check for ${VAR} or $VAR
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next(); // consume '}'
                        break;
                    }
                    var_name.push(ch);
                    chars.next();
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                // $VAR (ends at non-alphanumeric/underscore)
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    // Just a lone $, keep it
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}
