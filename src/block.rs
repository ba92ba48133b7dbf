//! Device segmentation into fixed-size blocks.
//!
//! A device of `size` bytes is cut into `ceil(size / block_size)` blocks,
//! visited in ascending order. Every block is `block_size` long except the
//! last, which holds the remainder when `size` is not a multiple.

use crate::error::{Error, Result};

/// Default block size (1 MiB)
pub const DEFAULT_BLOCK_SIZE: u64 = 1024 * 1024;

/// Largest accepted block size (64 MiB). One block is held in memory per side.
pub const MAX_BLOCK_SIZE: u64 = 64 * 1024 * 1024;

/// A contiguous byte range of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// 0-based position in the device
    pub index: u64,
    /// Byte offset of the first byte
    pub offset: u64,
    /// Length in bytes
    pub len: usize,
}

impl Block {
    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.len as u64
    }
}

/// Check a block size against the accepted range.
pub fn validate_block_size(block_size: u64) -> Result<()> {
    if block_size == 0 || block_size > MAX_BLOCK_SIZE {
        return Err(Error::Config(format!(
            "block size {} out of range (1..={})",
            block_size, MAX_BLOCK_SIZE
        )));
    }
    Ok(())
}

/// Partitions `size` bytes into blocks of `block_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSegmenter {
    size: u64,
    block_size: u64,
}

impl BlockSegmenter {
    pub fn new(size: u64, block_size: u64) -> Result<Self> {
        validate_block_size(block_size)?;
        Ok(Self { size, block_size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Number of blocks covering the device.
    pub fn block_count(&self) -> u64 {
        self.size.div_ceil(self.block_size)
    }

    /// Length of the final block, or 0 for an empty device.
    pub fn last_block_len(&self) -> usize {
        match self.size % self.block_size {
            0 if self.size == 0 => 0,
            0 => self.block_size as usize,
            rem => rem as usize,
        }
    }

    /// The block at `index`, if it lies within the device.
    pub fn block(&self, index: u64) -> Option<Block> {
        if index >= self.block_count() {
            return None;
        }
        let offset = index * self.block_size;
        let len = (self.size - offset).min(self.block_size) as usize;
        Some(Block { index, offset, len })
    }

    /// Iterate all blocks in ascending order.
    pub fn blocks(&self) -> Blocks {
        Blocks {
            segmenter: *self,
            next: 0,
        }
    }
}

/// Iterator over the blocks of a [`BlockSegmenter`].
#[derive(Debug, Clone)]
pub struct Blocks {
    segmenter: BlockSegmenter,
    next: u64,
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.segmenter.block(self.next)?;
        self.next += 1;
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.segmenter.block_count() - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Blocks {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_exact_multiple() {
        let seg = BlockSegmenter::new(10_485_760, MIB).unwrap();
        assert_eq!(seg.block_count(), 10);
        assert_eq!(seg.last_block_len(), MIB as usize);

        let blocks: Vec<_> = seg.blocks().collect();
        assert_eq!(blocks.len(), 10);
        assert!(blocks.iter().all(|b| b.len == MIB as usize));
        assert_eq!(blocks[9].end(), 10_485_760);
    }

    #[test]
    fn test_partial_last_block() {
        let seg = BlockSegmenter::new(10_500_000, MIB).unwrap();
        assert_eq!(seg.block_count(), 11);
        assert_eq!(seg.last_block_len(), 14_240);

        let last = seg.blocks().last().unwrap();
        assert_eq!(last.index, 10);
        assert_eq!(last.offset, 10 * MIB);
        assert_eq!(last.len, 14_240);
    }

    #[test]
    fn test_empty_device() {
        let seg = BlockSegmenter::new(0, MIB).unwrap();
        assert_eq!(seg.block_count(), 0);
        assert_eq!(seg.last_block_len(), 0);
        assert!(seg.blocks().next().is_none());
    }

    #[test]
    fn test_device_smaller_than_block() {
        let seg = BlockSegmenter::new(100, MIB).unwrap();
        assert_eq!(seg.block_count(), 1);
        assert_eq!(seg.block(0).unwrap().len, 100);
        assert!(seg.block(1).is_none());
    }

    #[test]
    fn test_invalid_block_size() {
        assert!(matches!(
            BlockSegmenter::new(100, 0),
            Err(Error::Config(_))
        ));
        assert!(BlockSegmenter::new(100, MAX_BLOCK_SIZE + 1).is_err());
        assert!(BlockSegmenter::new(100, MAX_BLOCK_SIZE).is_ok());
    }

    #[test]
    fn test_size_hint() {
        let seg = BlockSegmenter::new(25, 10).unwrap();
        let mut blocks = seg.blocks();
        assert_eq!(blocks.len(), 3);
        blocks.next();
        assert_eq!(blocks.len(), 2);
    }

    proptest! {
        #[test]
        fn blocks_cover_device_exactly(size in 0u64..1_000_000, block_size in 1u64..70_000) {
            let seg = BlockSegmenter::new(size, block_size).unwrap();
            let blocks: Vec<_> = seg.blocks().collect();

            prop_assert_eq!(blocks.len() as u64, size.div_ceil(block_size));

            let mut expected_offset = 0u64;
            for (i, block) in blocks.iter().enumerate() {
                prop_assert_eq!(block.index, i as u64);
                prop_assert_eq!(block.offset, expected_offset);
                prop_assert!(block.len > 0);
                expected_offset = block.end();
            }
            prop_assert_eq!(expected_offset, size);

            if let Some(last) = blocks.last() {
                let rem = size % block_size;
                let want = if rem == 0 { block_size } else { rem };
                prop_assert_eq!(last.len as u64, want);
            }
        }
    }
}
