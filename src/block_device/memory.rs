use super::{Block, BlockCount, BlockDevice, BlockIdx};

/// Errors from the RAM disk.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// The transfer touched a block past the end of the backing memory.
    OutOfRange {
        /// First block that does not exist
        block: BlockIdx,
    },
}

/// A `BlockDevice` over a plain byte slice, e.g. a disk image loaded into RAM.
#[derive(Debug)]
pub struct MemoryBlockDevice<'a> {
    memory: &'a mut [u8],
}

impl<'a> MemoryBlockDevice<'a> {
    /// Wrap `memory`. Trailing bytes that do not fill a whole block are ignored.
    pub fn new(memory: &'a mut [u8]) -> Self {
        Self { memory }
    }

    /// Give the memory back.
    pub fn release(self) -> &'a mut [u8] {
        self.memory
    }

    fn block_bytes(&self, block_idx: u32) -> Result<core::ops::Range<usize>, MemoryError> {
        let start = block_idx as usize * Block::LEN;
        let end = start + Block::LEN;
        if end > self.memory.len() {
            Err(MemoryError::OutOfRange {
                block: BlockIdx(block_idx),
            })
        } else {
            Ok(start..end)
        }
    }
}

impl<'a> BlockDevice for MemoryBlockDevice<'a> {
    type Error = MemoryError;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        _reason: &str,
    ) -> Result<(), Self::Error> {
        for (idx, block) in blocks.iter_mut().enumerate() {
            let range = self.block_bytes(start_block_idx.0 + idx as u32)?;
            block.contents.copy_from_slice(&self.memory[range]);
        }
        Ok(())
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        for (idx, block) in blocks.iter().enumerate() {
            let range = self.block_bytes(start_block_idx.0 + idx as u32)?;
            self.memory[range].copy_from_slice(&block.contents);
        }
        Ok(())
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        Ok(BlockCount((self.memory.len() / Block::LEN) as u32))
    }
}
