//! A RAM-backed SDIO host.
//!
//! Emulates a card well enough to exercise `SdCard` without hardware: block
//! storage, a card state that stays busy for a configurable number of polls
//! after erase/write, and a DMA engine whose completions only fire when told
//! to. Handy for host-side tests and for bringing up code before the board
//! arrives.

use crate::{Block, BlockIdx};

use super::{CardInfo, CardState, CardType, CardVersion, Completion, Direction, HostError, SdioHost};

struct Pending<B> {
    buffer: B,
    start: BlockIdx,
}

/// An `SdioHost` over a slice of blocks.
pub struct MemoryHost<'a, B> {
    blocks: &'a mut [Block],
    relative_address: u32,
    erase_value: u8,
    erase_busy_polls: u32,
    write_busy_polls: u32,
    busy_polls: u32,
    stuck: bool,
    fail_next: Option<HostError>,
    logical: Option<(u32, u32)>,
    pending_read: Option<Pending<B>>,
    pending_write: Option<Pending<B>>,
    finished: [Option<Completion<B, HostError>>; 2],
}

impl<'a, B> MemoryHost<'a, B>
where
    B: AsRef<[Block]> + AsMut<[Block]>,
{
    /// A card whose storage is `blocks`. Erased blocks read back as zeros.
    pub fn new(blocks: &'a mut [Block]) -> Self {
        MemoryHost {
            blocks,
            relative_address: 1,
            erase_value: 0x00,
            erase_busy_polls: 3,
            write_busy_polls: 0,
            busy_polls: 0,
            stuck: false,
            fail_next: None,
            logical: None,
            pending_read: None,
            pending_write: None,
            finished: [None, None],
        }
    }

    /// The byte value erased blocks read back as.
    pub fn set_erase_value(&mut self, value: u8) {
        self.erase_value = value;
    }

    /// How many state polls report `Programming` after an erase.
    pub fn set_erase_busy_polls(&mut self, polls: u32) {
        self.erase_busy_polls = polls;
    }

    /// How many state polls report `Programming` after a synchronous write.
    pub fn set_write_busy_polls(&mut self, polls: u32) {
        self.write_busy_polls = polls;
    }

    /// Make the card stay in `Programming` forever (or release it again).
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    /// Report `count` logical blocks of `size` bytes instead of the storage
    /// size.
    pub fn set_logical_blocks(&mut self, count: u32, size: u32) {
        self.logical = Some((count, size));
    }

    /// Fail the next request with `error`.
    pub fn fail_next(&mut self, error: HostError) {
        self.fail_next = Some(error);
    }

    /// The storage behind the card.
    pub fn blocks(&self) -> &[Block] {
        self.blocks
    }

    /// Is a DMA transfer waiting to be fired?
    pub fn is_pending(&self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.pending_read.is_some(),
            Direction::Write => self.pending_write.is_some(),
        }
    }

    /// Finish the outstanding DMA transfer in `direction`, as the DMA
    /// interrupt would. Returns `false` if nothing was outstanding.
    pub fn fire(&mut self, direction: Direction) -> bool {
        let pending = match direction {
            Direction::Read => self.pending_read.take(),
            Direction::Write => self.pending_write.take(),
        };
        let Pending { mut buffer, start } = match pending {
            Some(p) => p,
            None => return false,
        };
        let result = match direction {
            Direction::Read => self.copy_out(buffer.as_mut(), start),
            Direction::Write => self.copy_in(buffer.as_ref(), start),
        };
        let completion = Completion {
            direction,
            start,
            result: result.map(|_| buffer.as_ref().len() * Block::LEN),
            buffer,
        };
        if self.finished[0].is_none() {
            self.finished[0] = Some(completion);
        } else {
            self.finished[1] = Some(completion);
        }
        true
    }

    fn check_range(&self, start: BlockIdx, count: usize) -> Result<core::ops::Range<usize>, HostError> {
        let first = start.0 as usize;
        let end = first + count;
        if end > self.blocks.len() {
            Err(HostError::Error)
        } else {
            Ok(first..end)
        }
    }

    fn copy_out(&self, dest: &mut [Block], start: BlockIdx) -> Result<(), HostError> {
        let range = self.check_range(start, dest.len())?;
        dest.clone_from_slice(&self.blocks[range]);
        Ok(())
    }

    fn copy_in(&mut self, src: &[Block], start: BlockIdx) -> Result<(), HostError> {
        let range = self.check_range(start, src.len())?;
        self.blocks[range].clone_from_slice(src);
        Ok(())
    }

    fn injected(&mut self) -> Result<(), HostError> {
        match self.fail_next.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<'a, B> SdioHost for MemoryHost<'a, B>
where
    B: AsRef<[Block]> + AsMut<[Block]>,
{
    type DmaBuffer = B;

    fn card_info(&mut self) -> Result<CardInfo, HostError> {
        self.injected()?;
        let count = self.blocks.len() as u32;
        let (logical_count, logical_size) = self.logical.unwrap_or((count, Block::LEN_U32));
        Ok(CardInfo {
            card_type: CardType::HighCapacity,
            card_version: CardVersion::V2,
            relative_address: self.relative_address,
            block_count: count,
            block_size: Block::LEN_U32,
            logical_block_count: logical_count,
            logical_block_size: logical_size,
        })
    }

    fn card_state(&mut self) -> CardState {
        if self.stuck {
            CardState::Programming
        } else if self.busy_polls > 0 {
            self.busy_polls -= 1;
            CardState::Programming
        } else if self.pending_read.is_some() {
            CardState::Sending
        } else if self.pending_write.is_some() {
            CardState::Receiving
        } else {
            CardState::Transfer
        }
    }

    fn erase(&mut self, start: BlockIdx, end: BlockIdx) -> Result<(), HostError> {
        self.injected()?;
        if end < start {
            return Err(HostError::Error);
        }
        let range = self.check_range(start, (end.0 - start.0) as usize + 1)?;
        let value = self.erase_value;
        for block in &mut self.blocks[range] {
            *block = Block::filled(value);
        }
        self.busy_polls = self.erase_busy_polls;
        Ok(())
    }

    fn read_blocks(
        &mut self,
        blocks: &mut [Block],
        start: BlockIdx,
        _timeout_ms: u32,
    ) -> Result<(), HostError> {
        self.injected()?;
        if self.pending_read.is_some() || self.pending_write.is_some() {
            return Err(HostError::Busy);
        }
        self.copy_out(blocks, start)
    }

    fn write_blocks(
        &mut self,
        blocks: &[Block],
        start: BlockIdx,
        _timeout_ms: u32,
    ) -> Result<(), HostError> {
        self.injected()?;
        if self.pending_read.is_some() || self.pending_write.is_some() {
            return Err(HostError::Busy);
        }
        self.copy_in(blocks, start)?;
        self.busy_polls = self.write_busy_polls;
        Ok(())
    }

    fn start_read_dma(
        &mut self,
        buffer: Self::DmaBuffer,
        start: BlockIdx,
    ) -> Result<(), (HostError, Self::DmaBuffer)> {
        if let Err(e) = self.injected() {
            return Err((e, buffer));
        }
        if self.pending_read.is_some() {
            return Err((HostError::Busy, buffer));
        }
        self.pending_read = Some(Pending { buffer, start });
        Ok(())
    }

    fn start_write_dma(
        &mut self,
        buffer: Self::DmaBuffer,
        start: BlockIdx,
    ) -> Result<(), (HostError, Self::DmaBuffer)> {
        if let Err(e) = self.injected() {
            return Err((e, buffer));
        }
        if self.pending_write.is_some() {
            return Err((HostError::Busy, buffer));
        }
        self.pending_write = Some(Pending { buffer, start });
        Ok(())
    }

    fn take_completion(&mut self) -> Option<Completion<Self::DmaBuffer, HostError>> {
        let first = self.finished[0].take();
        self.finished[0] = self.finished[1].take();
        first
    }
}
