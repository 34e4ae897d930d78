//! The boundary to the SDIO host peripheral driver.
//!
//! Everything below this trait (command/response sequencing, bus width, clock
//! setup, interrupt wiring) belongs to the vendor HAL. The card driver only
//! needs the operations listed here.

use crate::{Block, BlockIdx};

use super::completion::Completion;

/// Status codes an SDIO host reports for a failed request.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The request failed (CRC, FIFO under/overrun, card error, ...)
    Error,
    /// The host is still busy with a previous request
    Busy,
    /// The request did not finish in the allotted time
    Timeout,
}

/// Which way a transfer moves data.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Card to memory
    Read,
    /// Memory to card
    Write,
}

/// Card capacity class, numbered like the vendor HAL does.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardType {
    /// SDSC, byte addressed
    StandardCapacity,
    /// SDHC / SDXC, block addressed
    HighCapacity,
    /// Secured card
    Secured,
    /// Anything else the host reported
    Unknown(u32),
}

impl CardType {
    /// Decode the numeric card type.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::StandardCapacity,
            1 => Self::HighCapacity,
            3 => Self::Secured,
            other => Self::Unknown(other),
        }
    }

    /// The numeric card type.
    pub fn code(&self) -> u32 {
        match self {
            Self::StandardCapacity => 0,
            Self::HighCapacity => 1,
            Self::Secured => 3,
            Self::Unknown(other) => *other,
        }
    }
}

/// SD physical layer version.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardVersion {
    /// Version 1.x
    V1,
    /// Version 2.x or later
    V2,
    /// Anything else the host reported
    Unknown(u32),
}

impl CardVersion {
    /// Decode the numeric card version.
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => Self::V1,
            1 => Self::V2,
            other => Self::Unknown(other),
        }
    }

    /// The numeric card version.
    pub fn code(&self) -> u32 {
        match self {
            Self::V1 => 0,
            Self::V2 => 1,
            Self::Unknown(other) => *other,
        }
    }
}

/// A snapshot of what the host knows about the inserted card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// Capacity class
    pub card_type: CardType,
    /// Physical layer version
    pub card_version: CardVersion,
    /// Relative card address assigned during identification
    pub relative_address: u32,
    /// Number of physical blocks
    pub block_count: u32,
    /// Size of a physical block in bytes
    pub block_size: u32,
    /// Number of logical blocks
    pub logical_block_count: u32,
    /// Size of a logical block in bytes
    pub logical_block_size: u32,
}

impl CardInfo {
    /// Card capacity in MiB.
    ///
    /// The division by 1024 happens before the multiplication, so the
    /// result truncates the same way the firmware's report always has.
    pub fn capacity_mb(&self) -> u32 {
        self.block_count / 1024 * self.block_size / 1024
    }
}

/// The state machine position of the card, as reported by CMD13.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardState {
    /// Powered up, not yet identified
    Ready,
    /// Identification in progress
    Identification,
    /// Identified, not selected
    Standby,
    /// Selected and idle; the only state that accepts data transfers
    Transfer,
    /// Sending data to the host
    Sending,
    /// Receiving data from the host
    Receiving,
    /// Writing received data or erasing
    Programming,
    /// Deselected while programming
    Disconnected,
    /// The host could not read the state
    Error,
}

impl CardState {
    /// Decode the state code used by the vendor HAL. Unknown codes map to
    /// `Error`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => Self::Ready,
            2 => Self::Identification,
            3 => Self::Standby,
            4 => Self::Transfer,
            5 => Self::Sending,
            6 => Self::Receiving,
            7 => Self::Programming,
            8 => Self::Disconnected,
            _ => Self::Error,
        }
    }

    /// The state code used by the vendor HAL.
    pub fn code(&self) -> u32 {
        match self {
            Self::Ready => 1,
            Self::Identification => 2,
            Self::Standby => 3,
            Self::Transfer => 4,
            Self::Sending => 5,
            Self::Receiving => 6,
            Self::Programming => 7,
            Self::Disconnected => 8,
            Self::Error => 0xFF,
        }
    }
}

/// The operations the card driver needs from an SDIO host peripheral.
///
/// Synchronous transfers block until the data has moved or `timeout_ms` ran
/// out; the host enforces the timeout. DMA transfers take ownership of their
/// buffer and return as soon as the host accepted the request. When the
/// transfer finishes, the host's interrupt handler records it and
/// `take_completion` hands it out exactly once.
pub trait SdioHost {
    /// Memory the DMA engine reads from or writes into.
    type DmaBuffer: AsRef<[Block]> + AsMut<[Block]>;

    /// Query the card description.
    fn card_info(&mut self) -> Result<CardInfo, HostError>;

    /// Query the card state (CMD13). Failures are reported as
    /// `CardState::Error`.
    fn card_state(&mut self) -> CardState;

    /// Start erasing `start..=end`. Returns once the card accepted the
    /// command; the card stays busy afterwards.
    fn erase(&mut self, start: BlockIdx, end: BlockIdx) -> Result<(), HostError>;

    /// Read `blocks.len()` blocks starting at `start`.
    fn read_blocks(
        &mut self,
        blocks: &mut [Block],
        start: BlockIdx,
        timeout_ms: u32,
    ) -> Result<(), HostError>;

    /// Write `blocks.len()` blocks starting at `start`.
    fn write_blocks(
        &mut self,
        blocks: &[Block],
        start: BlockIdx,
        timeout_ms: u32,
    ) -> Result<(), HostError>;

    /// Start a DMA read filling `buffer`. On refusal the buffer comes back.
    fn start_read_dma(
        &mut self,
        buffer: Self::DmaBuffer,
        start: BlockIdx,
    ) -> Result<(), (HostError, Self::DmaBuffer)>;

    /// Start a DMA write from `buffer`. On refusal the buffer comes back.
    fn start_write_dma(
        &mut self,
        buffer: Self::DmaBuffer,
        start: BlockIdx,
    ) -> Result<(), (HostError, Self::DmaBuffer)>;

    /// Take a finished DMA transfer, if there is one.
    fn take_completion(&mut self) -> Option<Completion<Self::DmaBuffer, HostError>>;
}
