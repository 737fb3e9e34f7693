//! Layered configuration.
//!
//! Built-in defaults, then an optional TOML file, then command-line flags;
//! later layers win.

use crate::cli::{ClientOpts, DaemonOpts, JournalFormat};
use crate::protocol::{CLIENT_DIR, DEFAULT_BUFFER_SIZE, DEFAULT_HOST, DEFAULT_PORT, SERVER_DIR};
use crate::url::{parse_remote, Remote};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("buffer size must be greater than zero")]
    ZeroBufferSize,
    #[error("not a ferry address: {0}")]
    BadRemote(String),
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            buffer_size: default_buffer_size(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_server_dir")]
    pub server_dir: PathBuf,
    #[serde(default = "default_client_dir")]
    pub client_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            server_dir: default_server_dir(),
            client_dir: default_client_dir(),
        }
    }
}

/// Unset level means each binary's own default
#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub journal: Option<PathBuf>,
    #[serde(default)]
    pub journal_format: JournalFormat,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_server_dir() -> PathBuf {
    PathBuf::from(SERVER_DIR)
}

fn default_client_dir() -> PathBuf {
    PathBuf::from(CLIENT_DIR)
}

impl TomlConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }
}

fn check_buffer_size(n: usize) -> Result<usize, ConfigError> {
    if n == 0 {
        Err(ConfigError::ZeroBufferSize)
    } else {
        Ok(n)
    }
}

/// Resolved `ferryd` configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub bind: String,
    pub root: PathBuf,
    pub buffer_size: usize,
    pub journal: Option<PathBuf>,
    pub journal_format: JournalFormat,
    pub log_level: String,
}

impl ServerSettings {
    pub fn load(opts: DaemonOpts) -> Result<Self, ConfigError> {
        let file = TomlConfig::load(opts.config.as_deref())?;
        Self::merge(opts, file)
    }

    /// Flags over file values over defaults
    pub fn merge(opts: DaemonOpts, file: TomlConfig) -> Result<Self, ConfigError> {
        let bind = opts.bind.unwrap_or_else(|| {
            Remote::new(file.network.host.clone(), file.network.port).addr()
        });
        Ok(Self {
            bind,
            root: opts.root.unwrap_or(file.storage.server_dir),
            buffer_size: check_buffer_size(opts.buffer_size.unwrap_or(file.network.buffer_size))?,
            journal: opts.journal.or(file.logging.journal),
            journal_format: opts.journal_format.unwrap_or(file.logging.journal_format),
            log_level: opts
                .log_level
                .or(file.logging.level)
                .unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Resolved `ferry` configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub remote: Remote,
    pub download_dir: PathBuf,
    pub buffer_size: usize,
    pub assume_yes: bool,
    pub connect_on_start: bool,
    pub log_level: String,
}

impl ClientSettings {
    pub fn load(opts: ClientOpts) -> Result<Self, ConfigError> {
        let file = TomlConfig::load(opts.config.as_deref())?;
        Self::merge(opts, file)
    }

    pub fn merge(opts: ClientOpts, file: TomlConfig) -> Result<Self, ConfigError> {
        let remote = match opts.remote {
            Some(r) => parse_remote(&r).ok_or(ConfigError::BadRemote(r))?,
            None => Remote::new(file.network.host, file.network.port),
        };
        Ok(Self {
            remote,
            download_dir: opts.download_dir.unwrap_or(file.storage.client_dir),
            buffer_size: check_buffer_size(opts.buffer_size.unwrap_or(file.network.buffer_size))?,
            assume_yes: opts.yes,
            connect_on_start: opts.connect,
            // the shell owns the terminal; keep logs quiet unless asked
            log_level: opts
                .log_level
                .or(file.logging.level)
                .unwrap_or_else(|| "warn".to_string()),
        })
    }
}
