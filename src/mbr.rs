//! sdio-fat - Master Boot Record
//!
//! Cards straight from the shop usually carry an MBR with one FAT partition;
//! cards formatted by this crate do not (the volume starts at block 0).

use crate::{Block, BlockCount, BlockDevice, BlockIdx};
use core::fmt::Debug;

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

/// Errors reading the partition table.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug)]
pub enum Error<BlockDeviceError>
where
    BlockDeviceError: Debug,
{
    /// The block device failed
    DeviceError(BlockDeviceError),
    /// Block 0 does not end in 0x55AA
    InvalidMbrSignature,
    /// The status byte is neither 0x00 nor 0x80
    InvalidPartitionStatus,
    /// The partition entry is empty
    EmptyPartition,
}

/// One of the four primary partitions.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PartitionNumber {
    /// First entry
    One,
    /// Second entry
    Two,
    /// Third entry
    Three,
    /// Fourth entry
    Four,
}

impl PartitionNumber {
    /// Map 1..=4 to a partition number.
    pub fn from_number(number: usize) -> Option<Self> {
        let partition = match number {
            1 => Self::One,
            2 => Self::Two,
            3 => Self::Three,
            4 => Self::Four,
            _ => return None,
        };
        Some(partition)
    }
}

/// The partition type byte.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PartitionType {
    /// 0x0B
    Fat32ChsLba,
    /// 0x0C
    Fat32Lba,
    /// 0x0E
    Fat16Lba,
    /// 0x06
    Fat16,
    /// Something we don't mount
    Unknown(u8),
}

impl PartitionType {
    /// Marker for a FAT32 partition. What Macosx disk utility (and also SD-Card formatter?)
    /// use.
    const FAT32_CHS_LBA: u8 = 0x0B;
    /// Marker for a FAT32 partition. Sometimes also use for FAT16 formatted
    /// partitions.
    const FAT32_LBA: u8 = 0x0C;
    /// Marker for a FAT16 partition with LBA. Seen on a Raspberry Pi SD card.
    const FAT16_LBA: u8 = 0x0E;
    /// Marker for a FAT16 partition. Seen on a card formatted with the official
    /// SD-Card formatter.
    const FAT16: u8 = 0x06;

    /// Decode the type byte.
    pub fn from_u8(value: u8) -> Self {
        match value {
            Self::FAT32_CHS_LBA => Self::Fat32ChsLba,
            Self::FAT32_LBA => Self::Fat32Lba,
            Self::FAT16_LBA => Self::Fat16Lba,
            Self::FAT16 => Self::Fat16,
            _ => Self::Unknown(value),
        }
    }

    /// Encode the type byte.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::Fat32ChsLba => Self::FAT32_CHS_LBA,
            Self::Fat32Lba => Self::FAT32_LBA,
            Self::Fat16Lba => Self::FAT16_LBA,
            Self::Fat16 => Self::FAT16,
            Self::Unknown(value) => value,
        }
    }

    /// Could this partition hold a FAT volume?
    pub fn is_fat(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// A primary partition entry.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Partition {
    /// What the partition claims to contain
    pub ty: PartitionType,
    /// First block of the partition
    pub lba_start: BlockIdx,
    /// Length of the partition
    pub block_count: BlockCount,
}

impl Partition {
    const STATUS_IDX: usize = 0;
    const TYPE_IDX: usize = 4;
    const LBA_START_IDX: usize = 8;
    const NUM_BLOCKS_IDX: usize = 12;
    pub(crate) const PARTITION_INFO_LENGTH: usize = 16;

    /// Parse a 16-byte partition entry.
    pub fn from_info<E>(info: &[u8; Self::PARTITION_INFO_LENGTH]) -> Result<Self, Error<E>>
    where
        E: Debug,
    {
        let pstatus = info[Self::STATUS_IDX];
        if pstatus != 0x80 && pstatus != 0x00 {
            return Err(Error::InvalidPartitionStatus);
        }

        let le32 = |at: usize| u32::from_le_bytes([info[at], info[at + 1], info[at + 2], info[at + 3]]);
        let lba_start = le32(Self::LBA_START_IDX);
        let num_blocks = le32(Self::NUM_BLOCKS_IDX);
        if num_blocks == 0 {
            return Err(Error::EmptyPartition);
        }

        Ok(Partition {
            ty: PartitionType::from_u8(info[Self::TYPE_IDX]),
            lba_start: BlockIdx(lba_start),
            block_count: BlockCount(num_blocks),
        })
    }

    /// Encode this partition as a 16-byte entry (no CHS addresses).
    pub fn to_info(&self) -> [u8; Self::PARTITION_INFO_LENGTH] {
        let mut info = [0u8; Self::PARTITION_INFO_LENGTH];
        info[Self::TYPE_IDX] = self.ty.to_u8();
        info[Self::LBA_START_IDX..Self::LBA_START_IDX + 4]
            .copy_from_slice(&self.lba_start.0.to_le_bytes());
        info[Self::NUM_BLOCKS_IDX..Self::NUM_BLOCKS_IDX + 4]
            .copy_from_slice(&self.block_count.0.to_le_bytes());
        info
    }
}

/// The partition table in block 0.
pub struct Mbr;

impl Mbr {
    const FOOTER_START: usize = 510;
    const FOOTER_VALUE: u16 = 0xAA55;
    const PARTITION1_START: usize = 446;
    const PARTITION2_START: usize = Self::PARTITION1_START + Partition::PARTITION_INFO_LENGTH;
    const PARTITION3_START: usize = Self::PARTITION2_START + Partition::PARTITION_INFO_LENGTH;
    const PARTITION4_START: usize = Self::PARTITION3_START + Partition::PARTITION_INFO_LENGTH;

    /// Read block 0 and return the requested partition.
    pub fn read_partition<BlockDev>(
        block_dev: &mut BlockDev,
        partition_num: PartitionNumber,
    ) -> Result<Partition, Error<BlockDev::Error>>
    where
        BlockDev: BlockDevice,
    {
        let first_block = block_dev
            .read_block(BlockIdx(0), "read_mbr")
            .map_err(Error::DeviceError)?;
        Self::parse_partition(&first_block, partition_num)
    }

    /// Pick the requested partition out of an already-read block 0.
    pub fn parse_partition<E>(
        first_block: &Block,
        partition_num: PartitionNumber,
    ) -> Result<Partition, Error<E>>
    where
        E: Debug,
    {
        let footer = u16::from_le_bytes([
            first_block[Self::FOOTER_START],
            first_block[Self::FOOTER_START + 1],
        ]);

        if footer != Self::FOOTER_VALUE {
            return Err(Error::InvalidMbrSignature);
        }

        let pinfo_start = Self::entry_start(partition_num);
        let mut pinfo = [0u8; Partition::PARTITION_INFO_LENGTH];
        pinfo.copy_from_slice(&first_block[pinfo_start..pinfo_start + Partition::PARTITION_INFO_LENGTH]);
        let partition = Partition::from_info(&pinfo)?;
        trace!("partition {:?}: {:?}", partition_num, partition);
        Ok(partition)
    }

    /// Write `partition` into entry `partition_num` of `block` and stamp the
    /// signature.
    pub fn set_partition(block: &mut Block, partition_num: PartitionNumber, partition: &Partition) {
        let start = Self::entry_start(partition_num);
        block[start..start + Partition::PARTITION_INFO_LENGTH].copy_from_slice(&partition.to_info());
        block[Self::FOOTER_START..Self::FOOTER_START + 2]
            .copy_from_slice(&Self::FOOTER_VALUE.to_le_bytes());
    }

    fn entry_start(partition_num: PartitionNumber) -> usize {
        match partition_num {
            PartitionNumber::One => Self::PARTITION1_START,
            PartitionNumber::Two => Self::PARTITION2_START,
            PartitionNumber::Three => Self::PARTITION3_START,
            PartitionNumber::Four => Self::PARTITION4_START,
        }
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
