//! Source mode sync - drives a target started over SSH or as a local subprocess.

use crate::config::Config;
use crate::digest::DigestAlgorithm;
use crate::error::Result;
use crate::progress::ProgressCallback;
use crate::sync::{SourceSync, SyncStats};
use crate::transport::server::{LocalConnector, SshConfig, SshConnector};
use crate::transport::Connector;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where the target role runs.
#[derive(Debug, Clone)]
pub enum TargetLocation {
    /// Over SSH on another host
    Remote(SshConfig),
    /// As a child process of this one
    Local { program: Option<PathBuf> },
}

/// Options for one source-side session.
#[derive(Clone)]
pub struct PushOptions {
    pub block_size: u64,
    pub digest: DigestAlgorithm,
    pub progress: Arc<dyn ProgressCallback>,
}

/// Push `source` onto `dest` on the target described by `location`.
pub async fn sync_push(
    source: &Path,
    location: &TargetLocation,
    dest: &str,
    config: &Config,
    options: PushOptions,
) -> Result<SyncStats> {
    let connector: Box<dyn Connector> = match location {
        TargetLocation::Remote(ssh) => Box::new(SshConnector::new(ssh.clone())),
        TargetLocation::Local {
            program: Some(program),
        } => Box::new(LocalConnector::new(program)),
        TargetLocation::Local { program: None } => Box::new(LocalConnector::current_exe()?),
    };

    let sync = SourceSync::new(source, dest, options.block_size)
        .with_digest(options.digest)
        .with_retry(config.retry_policy())
        .with_io_timeout(config.io_timeout())
        .with_progress(options.progress);

    let stats = sync.run(connector.as_ref()).await?;

    tracing::info!(
        "Completed in {} seconds: same: {}, diff: {}, {} bytes sent",
        stats.elapsed.as_secs(),
        stats.same_blocks,
        stats.diff_blocks,
        stats.bytes_sent
    );
    Ok(stats)
}
