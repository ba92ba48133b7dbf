//! Configuration file support.
//!
//! Values are layered: built-in defaults, then `config.toml`, then command
//! line flags (applied by the binary).
//!
//! ```toml
//! [sync]
//! block_size = 1048576
//! digest = "blake3"
//! io_timeout_secs = 300
//!
//! [ssh]
//! port = 22
//! user = "root"
//! identity_file = "~/.ssh/id_ed25519"
//! options = ["StrictHostKeyChecking=no"]
//! remote_command = "blocksync"
//!
//! [connect]
//! attempts = 3
//! initial_delay_ms = 500
//! max_delay_ms = 5000
//! handshake_timeout_secs = 30
//! ```

use crate::block::{validate_block_size, DEFAULT_BLOCK_SIZE};
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::transport::server::DEFAULT_REMOTE_COMMAND;
use crate::transport::{RetryPolicy, DEFAULT_IO_TIMEOUT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "BLOCKSYNC_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncSection {
    pub block_size: u64,
    pub digest: DigestAlgorithm,
    /// 0 disables the per-read timeout
    pub io_timeout_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            digest: DigestAlgorithm::default(),
            io_timeout_secs: DEFAULT_IO_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshSection {
    pub port: u16,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub options: Vec<String>,
    pub remote_command: String,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            port: 22,
            user: None,
            identity_file: None,
            options: Vec::new(),
            remote_command: DEFAULT_REMOTE_COMMAND.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectSection {
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for ConnectSection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            attempts: policy.attempts,
            initial_delay_ms: policy.initial_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            handshake_timeout_secs: policy.handshake_timeout.as_secs(),
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub sync: SyncSection,
    pub ssh: SshSection,
    pub connect: ConnectSection,
}

impl Config {
    /// Default location: `<config dir>/blocksync/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("blocksync").join("config.toml"))
    }

    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used if present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        validate_block_size(config.sync.block_size)?;
        if let Some(key) = &config.ssh.identity_file {
            config.ssh.identity_file = Some(expand_tilde(key));
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.connect.attempts.max(1),
            initial_delay: Duration::from_millis(self.connect.initial_delay_ms),
            max_delay: Duration::from_millis(self.connect.max_delay_ms),
            handshake_timeout: Duration::from_secs(self.connect.handshake_timeout_secs),
        }
    }

    /// Per-read timeout, `None` when disabled.
    pub fn io_timeout(&self) -> Option<Duration> {
        timeout_from_secs(self.sync.io_timeout_secs)
    }
}

/// Seconds to a timeout, with `0` meaning no limit.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    match secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

/// Expand tilde (~) in paths to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}
