//! Error types for blocksync sessions.
//!
//! Every variant is fatal to the session. Only connection establishment is
//! retried (see [`crate::transport::connect_with_retry`]).

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while synchronising a device.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport could not be established, or the peer exited abnormally.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The target advertised a different device than the one requested.
    #[error("Dest device ({expected}) doesn't match with the remote host ({advertised})")]
    DevicePathMismatch {
        /// Device path requested by the source
        expected: String,
        /// Device path the target reported
        advertised: String,
    },

    /// Source and target disagree on block size.
    #[error("Source block size ({local}) doesn't match with the remote host ({remote})")]
    BlockSizeMismatch {
        /// Block size configured locally
        local: u64,
        /// Block size the target reported
        remote: u64,
    },

    /// The target device cannot hold the source device.
    #[error("Source device size ({source_size}) is bigger than target device size ({target_size})")]
    DeviceTooSmall {
        /// Source device size in bytes
        source_size: u64,
        /// Target device size in bytes
        target_size: u64,
    },

    /// A local device could not be opened, read or written.
    #[error("Device error on {}: {source}", .path.display())]
    Device {
        /// Device path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The target announced itself but never reported a device size.
    #[error("Error accessing device {device} on remote host")]
    RemoteDeviceUnavailable {
        /// Device path on the target
        device: String,
    },

    /// A control token was missing, malformed or cut short.
    #[error("Protocol error: {0}")]
    Framing(String),

    /// The peer did not answer in time.
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What we were waiting for
        what: &'static str,
        /// Configured limit
        after: Duration,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a device error for `path`.
    pub fn device(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Device {
            path: path.into(),
            source,
        }
    }

    /// True for errors raised while validating negotiated parameters.
    pub fn is_mismatch(&self) -> bool {
        matches!(
            self,
            Self::DevicePathMismatch { .. }
                | Self::BlockSizeMismatch { .. }
                | Self::DeviceTooSmall { .. }
        )
    }
}

/// Result type for blocksync operations.
pub type Result<T> = std::result::Result<T, Error>;
