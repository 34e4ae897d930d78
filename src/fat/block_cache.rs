//! A one-block write-back cache for FAT and directory sectors.

use crate::{Block, BlockCount, BlockDevice, BlockIdx};

#[derive(Debug)]
pub(crate) struct BlockCache {
    block: Block,
    idx: Option<BlockIdx>,
    dirty: bool,
    // A dirty block is written `copies` times, `stride` blocks apart. This
    // keeps every FAT copy in step with the first.
    copies: u32,
    stride: BlockCount,
}

impl BlockCache {
    pub(crate) const fn new() -> Self {
        Self {
            block: Block::new(),
            idx: None,
            dirty: false,
            copies: 1,
            stride: BlockCount(0),
        }
    }

    pub(crate) fn set_mirrors(&mut self, copies: u32, stride: BlockCount) {
        self.copies = copies.max(1);
        self.stride = stride;
    }

    /// The block for reading.
    pub(crate) fn load<BD>(
        &mut self,
        block_device: &mut BD,
        idx: BlockIdx,
        reason: &str,
    ) -> Result<&Block, BD::Error>
    where
        BD: BlockDevice,
    {
        self.fill(block_device, idx, reason)?;
        Ok(&self.block)
    }

    /// The block for modification. It is written back on the next flush or
    /// when another block is loaded.
    pub(crate) fn load_mut<BD>(
        &mut self,
        block_device: &mut BD,
        idx: BlockIdx,
        reason: &str,
    ) -> Result<&mut Block, BD::Error>
    where
        BD: BlockDevice,
    {
        self.fill(block_device, idx, reason)?;
        self.dirty = true;
        Ok(&mut self.block)
    }

    fn fill<BD>(&mut self, block_device: &mut BD, idx: BlockIdx, reason: &str) -> Result<(), BD::Error>
    where
        BD: BlockDevice,
    {
        if self.idx == Some(idx) {
            return Ok(());
        }
        self.flush(block_device)?;
        self.idx = None;
        block_device.read(core::slice::from_mut(&mut self.block), idx, reason)?;
        self.idx = Some(idx);
        Ok(())
    }

    pub(crate) fn flush<BD>(&mut self, block_device: &mut BD) -> Result<(), BD::Error>
    where
        BD: BlockDevice,
    {
        if let (true, Some(idx)) = (self.dirty, self.idx) {
            for copy in 0..self.copies {
                let target = idx + BlockCount(copy * self.stride.0);
                block_device.write(core::slice::from_ref(&self.block), target)?;
            }
            self.dirty = false;
        }
        Ok(())
    }

    /// Drop the cached block without writing it back.
    pub(crate) fn invalidate(&mut self) {
        self.idx = None;
        self.dirty = false;
    }

    /// Drop the cached block if it lies in `start..start + count`.
    pub(crate) fn forget_range(&mut self, start: BlockIdx, count: BlockCount) {
        if let Some(idx) = self.idx {
            if idx >= start && idx < start + count {
                self.invalidate();
            }
        }
    }
}
