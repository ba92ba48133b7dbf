//! Source role: validates the target, then drives the block comparison.

use crate::block::{validate_block_size, BlockSegmenter};
use crate::device::Device;
use crate::digest::DigestAlgorithm;
use crate::error::{Error, Result};
use crate::progress::{NoOpCallback, ProgressCallback, ProgressEvent};
use crate::protocol::{self, TargetHello, Verdict};
use crate::sync::SyncStats;
use crate::transport::{connect_with_retry, Connector, RetryPolicy, TargetRequest, Transport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source configuration and driver.
pub struct SourceSync {
    /// Local device holding the reference data
    pub source: PathBuf,
    /// Device path on the target host
    pub dest: String,
    pub block_size: u64,
    pub digest: DigestAlgorithm,
    pub retry: RetryPolicy,
    /// Limit for each read from the target once connected
    pub io_timeout: Option<Duration>,
    progress: Arc<dyn ProgressCallback>,
}

impl SourceSync {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<String>, block_size: u64) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            block_size,
            digest: DigestAlgorithm::default(),
            retry: RetryPolicy::default(),
            io_timeout: None,
            progress: Arc::new(NoOpCallback),
        }
    }

    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Run a full session against a target reached through `connector`.
    pub async fn run<C>(&self, connector: &C) -> Result<SyncStats>
    where
        C: Connector + ?Sized,
    {
        validate_block_size(self.block_size)?;

        let mut device = Device::open_read_only(&self.source).await?;
        tracing::info!(
            "Block size is {:.1} MB",
            self.block_size as f64 / (1024.0 * 1024.0)
        );

        let request = TargetRequest {
            device: self.dest.clone(),
            block_size: self.block_size,
            digest: self.digest,
            length: device.size(),
        };
        tracing::info!("Connecting to {}", connector.describe());
        let (mut transport, hello) =
            connect_with_retry(connector, &request, &self.retry, self.io_timeout).await?;

        self.check_hello(&hello)?;
        self.check_size(&mut transport, device.size()).await?;

        let stats = self.exchange(&mut device, &mut transport).await?;
        transport.finish().await?;
        Ok(stats)
    }

    fn check_hello(&self, hello: &TargetHello) -> Result<()> {
        if hello.device != self.dest {
            return Err(Error::DevicePathMismatch {
                expected: self.dest.clone(),
                advertised: hello.device.clone(),
            });
        }
        if hello.block_size != self.block_size {
            return Err(Error::BlockSizeMismatch {
                local: self.block_size,
                remote: hello.block_size,
            });
        }
        Ok(())
    }

    async fn check_size(&self, transport: &mut Transport, local_size: u64) -> Result<()> {
        let remote_size = protocol::read_size(transport).await?.ok_or_else(|| {
            Error::RemoteDeviceUnavailable {
                device: self.dest.clone(),
            }
        })?;
        if local_size > remote_size {
            return Err(Error::DeviceTooSmall {
                source_size: local_size,
                target_size: remote_size,
            });
        }
        Ok(())
    }

    /// The per-block lockstep loop, after negotiation succeeded.
    pub async fn exchange(
        &self,
        device: &mut Device,
        transport: &mut Transport,
    ) -> Result<SyncStats> {
        let segmenter = BlockSegmenter::new(device.size(), self.block_size)?;
        let mut stats = SyncStats {
            total_blocks: segmenter.block_count(),
            ..SyncStats::default()
        };

        self.progress.on_progress(ProgressEvent::Started {
            total_blocks: stats.total_blocks,
            block_size: self.block_size,
            device_size: device.size(),
        });
        tracing::info!("Starting sync...");

        let started = Instant::now();
        let mut buf = Vec::with_capacity(self.block_size as usize);

        for block in segmenter.blocks() {
            device.read_block(&block, &mut buf).await?;
            let local = self.digest.digest(&buf);
            let remote = protocol::read_digest(transport).await?;

            let verdict = if local == remote {
                protocol::write_verdict(transport, Verdict::Same).await?;
                stats.same_blocks += 1;
                Verdict::Same
            } else {
                protocol::write_verdict(transport, Verdict::Diff).await?;
                transport.write_payload(&buf).await?;
                stats.diff_blocks += 1;
                stats.bytes_sent += block.len as u64;
                tracing::debug!("Block {} differs, sent {} bytes", block.index, block.len);
                Verdict::Diff
            };

            stats.bytes_scanned += block.len as u64;
            stats.elapsed = started.elapsed();
            self.progress.on_progress(ProgressEvent::Block {
                index: block.index,
                verdict,
                stats: stats.clone(),
            });
        }

        stats.elapsed = started.elapsed();
        self.progress.on_progress(ProgressEvent::Finished {
            stats: stats.clone(),
        });
        Ok(stats)
    }
}
