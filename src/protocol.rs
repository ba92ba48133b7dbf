//! Line-oriented wire protocol.
//!
//! ```text
//! target -> source   "<device-path> <block-size>\n"   once, at startup
//! target -> source   "<size-in-bytes>\n"              once, after opening the device
//! target -> source   "<hex-digest>\n"                 per block
//! source -> target   "same\n" | "diff\n"              per block
//! source -> target   <block bytes>                    after "diff" only, no terminator
//! ```
//!
//! No block index is carried. Both sides walk the same block sequence,
//! derived from the validated block size and session length.

use crate::digest::BlockDigest;
use crate::error::{Error, Result};
use crate::transport::Transport;
use std::fmt;

/// Verdict token for an unchanged block
pub const SAME_TOKEN: &str = "same";

/// Verdict token for a block that will be replaced
pub const DIFF_TOKEN: &str = "diff";

/// The source's judgement of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Same,
    Diff,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Same => SAME_TOKEN,
            Self::Diff => DIFF_TOKEN,
        }
    }

    pub fn parse(token: &str) -> Result<Self> {
        match token {
            SAME_TOKEN => Ok(Self::Same),
            DIFF_TOKEN => Ok(Self::Diff),
            other => Err(Error::Framing(format!("unexpected verdict {:?}", other))),
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First control message from the target: which device, which block size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHello {
    pub device: String,
    pub block_size: u64,
}

impl TargetHello {
    pub fn new(device: impl Into<String>, block_size: u64) -> Self {
        Self {
            device: device.into(),
            block_size,
        }
    }

    pub fn encode(&self) -> String {
        format!("{} {}", self.device, self.block_size)
    }

    /// Parse an identity line. The device path may contain spaces, so the
    /// block size is taken from after the last one.
    pub fn decode(line: &str) -> Result<Self> {
        let (device, block_size) = line
            .rsplit_once(' ')
            .ok_or_else(|| Error::Framing(format!("malformed identity line {:?}", line)))?;
        if device.is_empty() {
            return Err(Error::Framing(format!(
                "identity line {:?} has no device path",
                line
            )));
        }
        let block_size = block_size.parse::<u64>().map_err(|_| {
            Error::Framing(format!("invalid block size in identity line {:?}", line))
        })?;
        Ok(Self::new(device, block_size))
    }
}

fn parse_size(line: &str) -> Result<u64> {
    line.trim()
        .parse::<u64>()
        .map_err(|_| Error::Framing(format!("invalid device size {:?}", line)))
}

// =============================================================================
// Transport helpers
// =============================================================================

pub async fn write_hello(t: &mut Transport, hello: &TargetHello) -> Result<()> {
    t.write_line(&hello.encode()).await
}

pub async fn read_hello(t: &mut Transport) -> Result<TargetHello> {
    let line = t.expect_line("target identity").await?;
    TargetHello::decode(&line)
}

pub async fn write_size(t: &mut Transport, size: u64) -> Result<()> {
    t.write_line(&size.to_string()).await
}

/// Read the device size line. `None` means the target closed the stream
/// instead, which is how it reports a device it could not open.
pub async fn read_size(t: &mut Transport) -> Result<Option<u64>> {
    match t.read_line("device size").await? {
        Some(line) => parse_size(&line).map(Some),
        None => Ok(None),
    }
}

pub async fn write_digest(t: &mut Transport, digest: &BlockDigest) -> Result<()> {
    t.write_line(&digest.to_hex()).await
}

pub async fn read_digest(t: &mut Transport) -> Result<BlockDigest> {
    let line = t.expect_line("block digest").await?;
    BlockDigest::from_hex(line.trim_end_matches('\r'))
}

pub async fn write_verdict(t: &mut Transport, verdict: Verdict) -> Result<()> {
    t.write_line(verdict.as_str()).await
}

pub async fn read_verdict(t: &mut Transport) -> Result<Verdict> {
    let line = t.expect_line("verdict").await?;
    Verdict::parse(&line)
}
