//! Target mode - runs when invoked as `blocksync target <device>`.
//!
//! Stdout carries protocol bytes only. Everything human-readable goes
//! through `tracing` to stderr.

use crate::error::Result;
use crate::sync::{TargetStats, TargetSync};
use crate::transport::Transport;
use std::time::Duration;
use tokio::io;

/// Main target entry point: serve one session on stdin/stdout.
///
/// Every read from the source is bounded by `io_timeout`.
pub async fn run_server(
    target: TargetSync,
    io_timeout: Option<Duration>,
) -> Result<TargetStats> {
    let mut transport =
        Transport::new(io::stdin(), io::stdout()).with_io_timeout(io_timeout);
    let result = target.run(&mut transport).await;
    if let Err(e) = &result {
        tracing::error!("Target session on {} failed: {}", target.device.display(), e);
    }
    result
}
