//! Configuration management for shellpane.
//!
//! Settings are read from `~/.shellpane/config.toml`. Every field is
//! optional; command line flags override the file.
//!
//! ```toml
//! # Shell to run (default: $SHELL, then /bin/sh)
//! shell = "/bin/bash"
//!
//! # TERM value advertised to the shell
//! term = "xterm-256color"
//!
//! # Output/input encoding: auto, utf-8, latin1
//! encoding = "auto"
//!
//! # Largest single read from the PTY, in bytes
//! read_chunk_size = 4096
//!
//! # Hold escape sequences split across reads until they complete
//! hold_partial_sequences = true
//!
//! # Log level when SHELLPANE_LOG is not set
//! log_level = "info"
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::pty::{MAX_READ_CHUNK_SIZE, READ_CHUNK_SIZE};
use crate::core::term::{Encoding, ParserOptions};

/// Shell used when neither the config nor `$SHELL` names one
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Advertises 256-color support
pub const DEFAULT_TERM: &str = "xterm-256color";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shell command
    pub shell: Option<String>,
    /// TERM value for the shell
    pub term: String,
    /// Encoding name
    pub encoding: String,
    /// Largest single read from the PTY
    pub read_chunk_size: usize,
    /// Buffer escape sequences split across reads
    pub hold_partial_sequences: bool,
    /// Default log filter
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            term: DEFAULT_TERM.to_string(),
            encoding: "auto".to_string(),
            read_chunk_size: READ_CHUNK_SIZE,
            hold_partial_sequences: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// A missing file (or no home directory) yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::get_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::get_config_path().ok_or(ConfigError::NoHome)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        self.save_to(&path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Directory holding the config and log files
    pub fn config_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".shellpane"))
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Shell to run: config, then `$SHELL`, then `/bin/sh`
    pub fn shell_command(&self) -> String {
        self.shell
            .clone()
            .filter(|shell| !shell.trim().is_empty())
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| FALLBACK_SHELL.to_string())
    }

    /// Get the encoding, falling back to the locale for unknown names
    pub fn get_encoding(&self) -> Encoding {
        Encoding::by_name(&self.encoding).unwrap_or_else(|| {
            warn!("Unknown encoding {:?}, using locale default", self.encoding);
            Encoding::from_locale()
        })
    }

    /// Read chunk size clamped to what the PTY accepts
    pub fn chunk_size(&self) -> usize {
        self.read_chunk_size.clamp(1, MAX_READ_CHUNK_SIZE)
    }

    pub fn parser_options(&self) -> ParserOptions {
        ParserOptions {
            hold_partial_sequences: self.hold_partial_sequences,
            encoding: self.get_encoding(),
        }
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}
