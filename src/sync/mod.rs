//! Source and target synchronizers.
//!
//! The source drives a strictly lockstep exchange, one block at a time:
//!
//! ```text
//! target: read block i -> send digest -> wait verdict -> [read payload, rewrite block i]
//! source: read block i -> recv digest -> compare -> send verdict [+ payload]
//! ```

pub mod server_mode;
pub mod source;
pub mod target;

pub use source::SourceSync;
pub use target::{TargetStats, TargetSync};

use std::time::Duration;

/// Statistics for a source-side session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Blocks whose digests matched
    pub same_blocks: u64,

    /// Blocks replaced on the target
    pub diff_blocks: u64,

    /// Blocks in the session
    pub total_blocks: u64,

    /// Source bytes read and hashed so far
    pub bytes_scanned: u64,

    /// Payload bytes pushed to the target
    pub bytes_sent: u64,

    /// Time since block processing started
    pub elapsed: Duration,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks_done(&self) -> u64 {
        self.same_blocks + self.diff_blocks
    }

    /// Average scan rate in bytes per second.
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.bytes_scanned as f64 / secs
        }
    }
}
