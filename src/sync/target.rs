//! Target role: reactive digest producer and patch applier.

use crate::block::{validate_block_size, BlockSegmenter};
use crate::device::Device;
use crate::digest::DigestAlgorithm;
use crate::error::Result;
use crate::protocol::{self, TargetHello, Verdict};
use crate::transport::Transport;
use std::path::PathBuf;

/// Target configuration
#[derive(Debug, Clone)]
pub struct TargetSync {
    /// Device to bring in sync
    pub device: PathBuf,
    /// Block size
    pub block_size: u64,
    /// Digest algorithm
    pub digest: DigestAlgorithm,
    /// Bytes to synchronise; `None` covers the whole device
    pub length: Option<u64>,
}

/// What the target did during a session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TargetStats {
    pub same_blocks: u64,
    pub diff_blocks: u64,
    pub bytes_written: u64,
}

impl TargetSync {
    pub fn new(device: impl Into<PathBuf>, block_size: u64, digest: DigestAlgorithm) -> Self {
        Self {
            device: device.into(),
            block_size,
            digest,
            length: None,
        }
    }

    pub fn with_length(mut self, length: Option<u64>) -> Self {
        self.length = length;
        self
    }

    /// Serve one session over `transport`.
    ///
    /// The identity line goes out before the device is opened, so a source
    /// can tell an unreachable host from an unusable device.
    pub async fn run(&self, transport: &mut Transport) -> Result<TargetStats> {
        validate_block_size(self.block_size)?;

        let hello = TargetHello::new(self.device.to_string_lossy(), self.block_size);
        protocol::write_hello(transport, &hello).await?;

        let mut device = Device::open_read_write(&self.device).await?;
        protocol::write_size(transport, device.size()).await?;

        let length = self
            .length
            .map_or(device.size(), |len| len.min(device.size()));
        let segmenter = BlockSegmenter::new(length, self.block_size)?;
        tracing::debug!(
            "Serving {} ({} of {} bytes, {} blocks, {})",
            self.device.display(),
            length,
            device.size(),
            segmenter.block_count(),
            self.digest
        );

        let mut stats = TargetStats::default();
        let mut block_buf = Vec::with_capacity(self.block_size as usize);
        let mut patch_buf = Vec::with_capacity(self.block_size as usize);

        for block in segmenter.blocks() {
            device.read_block(&block, &mut block_buf).await?;
            let digest = self.digest.digest(&block_buf);
            protocol::write_digest(transport, &digest).await?;

            match protocol::read_verdict(transport).await? {
                Verdict::Same => stats.same_blocks += 1,
                Verdict::Diff => {
                    patch_buf.resize(block.len, 0);
                    transport
                        .read_payload(&mut patch_buf, "block payload")
                        .await?;
                    device.rewrite_block(&block, &patch_buf).await?;
                    stats.diff_blocks += 1;
                    stats.bytes_written += block.len as u64;
                    tracing::trace!("Patched block {} ({} bytes)", block.index, block.len);
                }
            }
        }

        device.sync().await?;

        tracing::info!(
            "Target done: same: {}, diff: {}, {} bytes written",
            stats.same_blocks,
            stats.diff_blocks,
            stats.bytes_written
        );
        Ok(stats)
    }
}
