//! sdio-fat - SD card over an SDIO host
//!
//! Implements block I/O on an SD card behind some generic SDIO host
//! peripheral, both polled (with a timeout) and DMA driven (with a completion
//! callback).
//!
//! The SDIO command layer lives in the host driver; see [`SdioHost`].

mod completion;
mod host;
pub mod memory;


pub use completion::{Completion, CompletionSink, EchoSink};
pub use host::{CardInfo, CardState, CardType, CardVersion, Direction, HostError, SdioHost};

use embedded_hal::blocking::delay::DelayMs;

use crate::{Block, BlockCount, BlockDevice, BlockIdx};

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// The possible errors `SdCard` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We could not read the card description
    QueryFailed,
    /// A transfer did not finish within its timeout
    TransferTimeout,
    /// A transfer failed
    TransferError,
    /// The host was still busy with an earlier request
    Busy,
    /// A DMA transfer in this direction has not completed yet
    TransferInFlight,
    /// The card refused the erase command
    EraseFailed,
    /// The card did not return to the transfer state in time. Carries the
    /// last state we saw.
    ReadyTimeout(CardState),
}

impl From<HostError> for Error {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Error => Error::TransferError,
            HostError::Busy => Error::Busy,
            HostError::Timeout => Error::TransferTimeout,
        }
    }
}

/// Timing options for an `SdCard`.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SdCardConfig {
    /// Timeout handed to the host for synchronous transfers made through the
    /// `BlockDevice` trait.
    pub transfer_timeout_ms: u32,
    /// How long to wait for the card to leave the programming state after a
    /// synchronous write.
    pub ready_timeout_ms: u32,
    /// How long to wait for the card to finish an erase.
    pub erase_timeout_ms: u32,
    /// Delay between two card state polls.
    pub poll_interval_ms: u32,
}

impl Default for SdCardConfig {
    fn default() -> Self {
        SdCardConfig {
            transfer_timeout_ms: 1000,
            ready_timeout_ms: 1000,
            erase_timeout_ms: 30_000,
            poll_interval_ms: 1,
        }
    }
}

/// An SD card reached through an SDIO host.
pub struct SdCard<H, D>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    host: H,
    delay: D,
    config: SdCardConfig,
    read_in_flight: bool,
    write_in_flight: bool,
}

impl<H, D> SdCard<H, D>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    /// Wrap an initialised host. Card identification and bus setup must have
    /// happened already.
    pub fn new(host: H, delay: D, config: SdCardConfig) -> Self {
        SdCard {
            host,
            delay,
            config,
            read_in_flight: false,
            write_in_flight: false,
        }
    }

    /// Give back the host and the delay provider.
    pub fn release(self) -> (H, D) {
        (self.host, self.delay)
    }

    /// Access the host driver.
    pub fn host(&mut self) -> &mut H {
        &mut self.host
    }

    /// The timing options in use.
    pub fn config(&self) -> &SdCardConfig {
        &self.config
    }

    /// Read the card description.
    pub fn card_info(&mut self) -> Result<CardInfo, Error> {
        self.host.card_info().map_err(|e| {
            warn!("card info query failed: {:?}", e);
            Error::QueryFailed
        })
    }

    /// Read the card state.
    pub fn card_state(&mut self) -> CardState {
        self.host.card_state()
    }

    /// Erase the blocks `start..=end` and wait for the card to finish.
    ///
    /// The card state is polled every `poll_interval_ms` until it is back in
    /// `Transfer`, for at most `erase_timeout_ms`.
    pub fn erase(&mut self, start: BlockIdx, end: BlockIdx) -> Result<(), Error> {
        debug!("erase blocks {}..={}", start.0, end.0);
        self.host.erase(start, end).map_err(|e| {
            warn!("erase refused: {:?}", e);
            Error::EraseFailed
        })?;
        let timeout = self.config.erase_timeout_ms;
        self.wait_ready(timeout)
    }

    /// Poll the card state until it is `Transfer`, giving up after
    /// `timeout_ms`.
    pub fn wait_ready(&mut self, timeout_ms: u32) -> Result<(), Error> {
        let step = self.config.poll_interval_ms;
        let mut waited: u32 = 0;
        loop {
            let state = self.host.card_state();
            if state == CardState::Transfer {
                trace!("card ready after {} ms", waited);
                return Ok(());
            }
            if waited >= timeout_ms {
                warn!("card stuck in {:?} after {} ms", state, waited);
                return Err(Error::ReadyTimeout(state));
            }
            self.delay.delay_ms(step);
            waited = waited.saturating_add(step.max(1));
        }
    }

    /// Read `blocks.len()` blocks starting at `start`, blocking until done or
    /// until `timeout_ms` expired.
    pub fn read_blocks(
        &mut self,
        blocks: &mut [Block],
        start: BlockIdx,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        trace!("read {} blocks at {}", blocks.len(), start.0);
        self.host
            .read_blocks(blocks, start, timeout_ms)
            .map_err(Error::from)
    }

    /// Write `blocks.len()` blocks starting at `start`, blocking until the
    /// data was sent and the card finished programming it.
    pub fn write_blocks(
        &mut self,
        blocks: &[Block],
        start: BlockIdx,
        timeout_ms: u32,
    ) -> Result<(), Error> {
        trace!("write {} blocks at {}", blocks.len(), start.0);
        self.host.write_blocks(blocks, start, timeout_ms)?;
        let timeout = self.config.ready_timeout_ms;
        self.wait_ready(timeout)
    }

    /// Start a DMA read into `buffer`. Returns once the host accepted the
    /// request; the buffer comes back through
    /// [`dispatch_completion`](Self::dispatch_completion).
    pub fn read_blocks_dma(
        &mut self,
        buffer: H::DmaBuffer,
        start: BlockIdx,
    ) -> Result<(), (Error, H::DmaBuffer)> {
        if self.read_in_flight {
            return Err((Error::TransferInFlight, buffer));
        }
        trace!("DMA read {} blocks at {}", buffer.as_ref().len(), start.0);
        self.host
            .start_read_dma(buffer, start)
            .map_err(|(e, buffer)| (Error::from(e), buffer))?;
        self.read_in_flight = true;
        Ok(())
    }

    /// Start a DMA write from `buffer`. Returns once the host accepted the
    /// request; the buffer comes back through
    /// [`dispatch_completion`](Self::dispatch_completion).
    pub fn write_blocks_dma(
        &mut self,
        buffer: H::DmaBuffer,
        start: BlockIdx,
    ) -> Result<(), (Error, H::DmaBuffer)> {
        if self.write_in_flight {
            return Err((Error::TransferInFlight, buffer));
        }
        trace!("DMA write {} blocks at {}", buffer.as_ref().len(), start.0);
        self.host
            .start_write_dma(buffer, start)
            .map_err(|(e, buffer)| (Error::from(e), buffer))?;
        self.write_in_flight = true;
        Ok(())
    }

    /// Is a DMA transfer in the given direction still outstanding?
    pub fn dma_in_flight(&self, direction: Direction) -> bool {
        match direction {
            Direction::Read => self.read_in_flight,
            Direction::Write => self.write_in_flight,
        }
    }

    /// Hand a finished DMA transfer to `sink`. Call this from the
    /// transfer-complete interrupt (or poll it). Returns `false` when
    /// nothing had finished.
    pub fn dispatch_completion<S>(&mut self, sink: &mut S) -> bool
    where
        S: CompletionSink<H::DmaBuffer>,
    {
        let completion = match self.host.take_completion() {
            Some(c) => c.map_err(Error::from),
            None => return false,
        };
        match completion.direction {
            Direction::Read => {
                self.read_in_flight = false;
                sink.on_read_complete(completion);
            }
            Direction::Write => {
                self.write_in_flight = false;
                sink.on_write_complete(completion);
            }
        }
        true
    }
}

impl<H, D> BlockDevice for SdCard<H, D>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    type Error = Error;

    fn read(
        &mut self,
        blocks: &mut [Block],
        start_block_idx: BlockIdx,
        reason: &str,
    ) -> Result<(), Self::Error> {
        trace!("block read for {}", reason);
        let timeout = self.config.transfer_timeout_ms;
        self.read_blocks(blocks, start_block_idx, timeout)
    }

    fn write(&mut self, blocks: &[Block], start_block_idx: BlockIdx) -> Result<(), Self::Error> {
        let timeout = self.config.transfer_timeout_ms;
        self.write_blocks(blocks, start_block_idx, timeout)
    }

    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        let info = self.card_info()?;
        let per_logical = (info.logical_block_size / Block::LEN_U32).max(1);
        info.logical_block_count
            .checked_mul(per_logical)
            .map(BlockCount)
            .ok_or_else(|| {
                warn!(
                    "card reports {} blocks of {} bytes",
                    info.logical_block_count, info.logical_block_size
                );
                Error::QueryFailed
            })
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
