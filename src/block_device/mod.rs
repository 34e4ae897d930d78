//! sdio-fat - Block Device support
//!
//! Generic code for handling block devices.

mod block;
mod memory;

pub use block::*;
pub use memory::{MemoryBlockDevice, MemoryError};

/// Represents a block device - a device which can read and write blocks (or
/// sectors). Only supports devices which are <= 2 TiB in size.
pub trait BlockDevice {
    /// The errors that the `BlockDevice` can return. Must be debug formattable.
    type Error: core::fmt::Debug;
    /// Read one or more blocks, starting at the given block index.
    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error>;
    /// Write one or more blocks, starting at the given block index.
    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error>;
    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error>;

    /// Read a single block.
    fn read_block(&mut self, block_idx: BlockIdx, reason: &str) -> Result<Block, Self::Error> {
        let mut blocks = [Block::new()];
        self.read(&mut blocks, block_idx, reason)?;
        let [block] = blocks;
        Ok(block)
    }

    /// Write a single block.
    fn write_block(&mut self, block: &Block, block_idx: BlockIdx) -> Result<(), Self::Error> {
        self.write(core::slice::from_ref(block), block_idx)
    }
}

impl<T> BlockDevice for &mut T
where
    T: BlockDevice,
{
    type Error = T::Error;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        (*self).read(blocks, start_block_idx, reason)
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        (*self).write(blocks, start_block_idx)
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        (*self).num_blocks()
    }
}
