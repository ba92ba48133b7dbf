//! Progress reporting for the source role.
//!
//! Reporters observe the session through [`ProgressEvent`]s and never feed
//! anything back into it.

use crate::protocol::Verdict;
use crate::sync::SyncStats;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Events emitted while a session runs.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Negotiation succeeded, block processing is about to start.
    Started {
        total_blocks: u64,
        block_size: u64,
        device_size: u64,
    },
    /// One block has been compared (and sent, if it differed).
    Block {
        index: u64,
        verdict: Verdict,
        stats: SyncStats,
    },
    /// All blocks processed.
    Finished { stats: SyncStats },
}

/// Callback for progress events.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

/// A no-op progress callback that ignores all events.
pub struct NoOpCallback;

impl ProgressCallback for NoOpCallback {
    fn on_progress(&self, _event: ProgressEvent) {}
}

/// A function-based progress callback.
pub struct FnCallback<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    f: F,
}

impl<F> FnCallback<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ProgressCallback for FnCallback<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        (self.f)(event)
    }
}

/// Helper to create an Arc-wrapped callback from a closure.
pub fn callback<F>(f: F) -> Arc<dyn ProgressCallback>
where
    F: Fn(ProgressEvent) + Send + Sync + 'static,
{
    Arc::new(FnCallback::new(f))
}

/// Throughput in MB/s (MiB, as the summary reports).
pub fn rate_mb_per_sec(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / (1024.0 * 1024.0) / secs
}

fn summary_line(stats: &SyncStats) -> String {
    format!(
        "same: {}, diff: {}, {}/{}, {:5.1} MB/s",
        stats.same_blocks,
        stats.diff_blocks,
        stats.blocks_done(),
        stats.total_blocks,
        rate_mb_per_sec(stats.bytes_scanned, stats.elapsed)
    )
}

// =============================================================================
// Indicatif-based progress callback
// =============================================================================

/// Progress bar on stderr, redrawn a few times per second.
pub struct IndicatifCallback {
    bar: ProgressBar,
}

impl IndicatifCallback {
    pub fn new() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(4));
        bar.set_style(Self::style());
        Self { bar }
    }

    fn style() -> ProgressStyle {
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} blocks ({elapsed}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-")
    }
}

impl Default for IndicatifCallback {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCallback for IndicatifCallback {
    fn on_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total_blocks, .. } => {
                self.bar.set_length(total_blocks);
                self.bar.set_position(0);
            }
            ProgressEvent::Block { stats, .. } => {
                self.bar.set_position(stats.blocks_done());
                self.bar.set_message(format!(
                    "same: {}, diff: {}, {:5.1} MB/s",
                    stats.same_blocks,
                    stats.diff_blocks,
                    rate_mb_per_sec(stats.bytes_scanned, stats.elapsed)
                ));
            }
            ProgressEvent::Finished { stats } => {
                self.bar.finish_with_message(summary_line(&stats));
            }
        }
    }
}

// =============================================================================
// Log-based progress callback
// =============================================================================

/// Periodic `tracing` summaries, for non-interactive runs.
pub struct LogCallback {
    interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl LogCallback {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(None),
        }
    }

    fn due(&self) -> bool {
        let Ok(mut last) = self.last.lock() else {
            return false;
        };
        let now = Instant::now();
        match *last {
            Some(t) if now.duration_since(t) < self.interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

impl Default for LogCallback {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl ProgressCallback for LogCallback {
    fn on_progress(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started {
                total_blocks,
                block_size,
                device_size,
            } => {
                tracing::info!(
                    "Starting sync: {} blocks of {} bytes ({} bytes)",
                    total_blocks,
                    block_size,
                    device_size
                );
                self.due();
            }
            ProgressEvent::Block { stats, .. } => {
                let last_block = stats.blocks_done() >= stats.total_blocks;
                if self.due() || last_block {
                    tracing::info!("{}", summary_line(&stats));
                }
            }
            ProgressEvent::Finished { stats } => {
                tracing::info!(
                    "Completed in {} seconds ({})",
                    stats.elapsed.as_secs(),
                    summary_line(&stats)
                );
            }
        }
    }
}
