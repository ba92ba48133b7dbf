//! Block-level differential synchronisation of raw devices.
//!
//! A *target* process owns the device to update and answers with one digest
//! per block. A *source* process owns the reference data, compares digests
//! and pushes only the blocks that differ. Both sides walk the device in the
//! same fixed-size blocks, in lockstep, over a pair of byte streams.

pub mod block;
pub mod config;
pub mod device;
pub mod digest;
pub mod error;
pub mod logging;
pub mod progress;
pub mod protocol;
pub mod server;
pub mod sync;
pub mod transport;

pub use block::{Block, BlockSegmenter, DEFAULT_BLOCK_SIZE, MAX_BLOCK_SIZE};
pub use config::Config;
pub use device::{AccessMode, Device};
pub use digest::{BlockDigest, DigestAlgorithm};
pub use error::{Error, Result};
pub use protocol::{TargetHello, Verdict};
pub use sync::{SourceSync, SyncStats, TargetStats, TargetSync};
pub use transport::{Connector, RetryPolicy, TargetRequest, Transport};
