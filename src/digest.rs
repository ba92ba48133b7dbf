//! Block digests.
//!
//! Both supported algorithms produce 32-byte digests, carried on the wire as
//! 64 lowercase hex characters.

use crate::error::{Error, Result};
use clap::ValueEnum;
use serde::Deserialize;
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Digest length in bytes
pub const DIGEST_LEN: usize = 32;

/// Digest length on the wire (hex characters)
pub const DIGEST_HEX_LEN: usize = DIGEST_LEN * 2;

/// Hash function used to fingerprint blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Blake3,
    Sha256,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blake3 => "blake3",
            Self::Sha256 => "sha256",
        }
    }

    /// Fingerprint a block.
    pub fn digest(&self, data: &[u8]) -> BlockDigest {
        match self {
            Self::Blake3 => BlockDigest(*blake3::hash(data).as_bytes()),
            Self::Sha256 => BlockDigest(Sha256::digest(data).into()),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Content fingerprint of one block.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDigest([u8; DIGEST_LEN]);

impl BlockDigest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a digest token as sent by the target.
    pub fn from_hex(token: &str) -> Result<Self> {
        if token.len() != DIGEST_HEX_LEN {
            return Err(Error::Framing(format!(
                "digest token has {} characters, expected {}",
                token.len(),
                DIGEST_HEX_LEN
            )));
        }
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(token, &mut bytes)
            .map_err(|e| Error::Framing(format!("invalid digest token {:?}: {}", token, e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockDigest({})", self.to_hex())
    }
}

impl fmt::Display for BlockDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
