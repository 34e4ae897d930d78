//! Creating a fresh FAT16 or FAT32 volume.
//!
//! The volume always starts at block 0 without a partition table (a
//! "superfloppy"), with two FATs and 512 byte sectors. Cluster sizes follow
//! the Microsoft defaults unless the caller asks for a specific size.

use crate::{time::TimeSource, Block, BlockCount, BlockDevice, BlockIdx};

use super::{
    bios_param_block::{BiosParameterBlock, BiosParameterBlockRaw, FsInfoRaw},
    cluster::FatEntry,
    DriveId, FatError, FatType, FatVolume, MountState,
};

#[cfg(feature = "log")]
use log::{debug, info};

#[cfg(feature = "defmt-log")]
use defmt::{debug, info};

/// Why a volume could not be formatted.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// The work area must hold at least [`MIN_WORK_BLOCKS`] blocks
    WorkAreaTooSmall,
    /// Not a power-of-two multiple of 512 bytes, up to 64 KiB
    InvalidAllocationUnit(u32),
    /// Too few clusters for the requested FAT type
    VolumeTooSmall,
    /// Too many clusters for the requested FAT type
    VolumeTooLarge,
}

/// Smallest work area `format` accepts.
pub const MIN_WORK_BLOCKS: usize = 4;

/// Where everything goes on a freshly formatted volume.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Layout {
    /// FAT16 or FAT32
    pub fat_type: FatType,
    /// Sectors in the volume
    pub total_sectors: u32,
    /// Sectors per cluster
    pub sectors_per_cluster: u32,
    /// Sectors before the first FAT
    pub reserved_sectors: u32,
    /// Copies of the FAT
    pub num_fats: u32,
    /// Sectors per FAT copy
    pub fat_size: u32,
    /// Slots in the FAT16 root directory
    pub root_entries: u32,
    /// Data clusters
    pub cluster_count: u32,
}

impl Layout {
    const FAT16_MIN_CLUSTERS: u32 = 4085;
    const FAT16_MAX_CLUSTERS: u32 = 65524;
    const FAT32_MIN_CLUSTERS: u32 = 65525;
    const FAT32_MAX_CLUSTERS: u32 = 0x0FFF_FFF5;

    /// Plan a volume of `total_sectors`. An `alloc_unit_bytes` of 0 picks
    /// the default cluster size for that size.
    pub fn new(
        fat_type: FatType,
        total_sectors: u32,
        alloc_unit_bytes: u32,
    ) -> Result<Self, FormatError> {
        let sectors_per_cluster = if alloc_unit_bytes == 0 {
            Self::default_sectors_per_cluster(fat_type, total_sectors)?
        } else {
            Self::sectors_per_cluster_for(alloc_unit_bytes)?
        };

        let (reserved_sectors, root_entries) = match fat_type {
            FatType::Fat16 => (1, 512),
            FatType::Fat32 => (32, 0),
        };
        let num_fats = 2;
        let root_dir_sectors = BiosParameterBlock::compute_root_dir_sectors(root_entries, Block::LEN_U32);

        // Sizing rule from the Microsoft FAT specification. It can
        // overestimate the FAT by a little, never underestimate it.
        let tmp1 = total_sectors
            .checked_sub(reserved_sectors + root_dir_sectors)
            .ok_or(FormatError::VolumeTooSmall)?;
        let mut tmp2 = (256 * sectors_per_cluster) + num_fats;
        if fat_type == FatType::Fat32 {
            tmp2 /= 2;
        }
        let fat_size = (tmp1 + (tmp2 - 1)) / tmp2;

        let data_sectors = tmp1
            .checked_sub(num_fats * fat_size)
            .ok_or(FormatError::VolumeTooSmall)?;
        let cluster_count = data_sectors / sectors_per_cluster;

        let (min, max) = match fat_type {
            FatType::Fat16 => (Self::FAT16_MIN_CLUSTERS, Self::FAT16_MAX_CLUSTERS),
            FatType::Fat32 => (Self::FAT32_MIN_CLUSTERS, Self::FAT32_MAX_CLUSTERS),
        };
        if cluster_count < min {
            return Err(FormatError::VolumeTooSmall);
        }
        if cluster_count > max {
            return Err(FormatError::VolumeTooLarge);
        }

        Ok(Self {
            fat_type,
            total_sectors,
            sectors_per_cluster,
            reserved_sectors,
            num_fats,
            fat_size,
            root_entries,
            cluster_count,
        })
    }

    fn sectors_per_cluster_for(alloc_unit_bytes: u32) -> Result<u32, FormatError> {
        let sectors = alloc_unit_bytes / Block::LEN_U32;
        if alloc_unit_bytes % Block::LEN_U32 != 0 || !sectors.is_power_of_two() || sectors > 128 {
            Err(FormatError::InvalidAllocationUnit(alloc_unit_bytes))
        } else {
            Ok(sectors)
        }
    }

    /// The Microsoft default cluster size table.
    pub fn default_sectors_per_cluster(
        fat_type: FatType,
        total_sectors: u32,
    ) -> Result<u32, FormatError> {
        let table: &[(u32, u32)] = match fat_type {
            FatType::Fat16 => &[
                (8400, 0),
                (32680, 2),
                (262_144, 4),
                (524_288, 8),
                (1_048_576, 16),
                (2_097_152, 32),
                (4_194_304, 64),
            ],
            FatType::Fat32 => &[
                (66600, 0),
                (532_480, 1),
                (16_777_216, 8),
                (33_554_432, 16),
                (67_108_864, 32),
                (u32::MAX, 64),
            ],
        };
        match table.iter().find(|(limit, _)| total_sectors <= *limit) {
            Some((_, 0)) => Err(FormatError::VolumeTooSmall),
            Some((_, sectors)) => Ok(*sectors),
            None => Err(FormatError::VolumeTooLarge),
        }
    }

    /// Sectors taken by the FAT16 root directory.
    pub fn root_dir_sectors(&self) -> u32 {
        BiosParameterBlock::compute_root_dir_sectors(self.root_entries, Block::LEN_U32)
    }

    /// First sector of cluster 2.
    pub fn data_start(&self) -> u32 {
        self.reserved_sectors + self.num_fats * self.fat_size + self.root_dir_sectors()
    }

    fn boot_sector(&self, serial: u32) -> Block {
        let mut bpb = BiosParameterBlockRaw::new(Block::new());
        bpb.set_oem_name(b"MSDOS5.0");
        bpb.set_bytes_per_sec(Block::LEN as u16);
        bpb.set_sec_per_clu(self.sectors_per_cluster as u8);
        bpb.set_rsvd_sec_cnt(self.reserved_sectors as u16);
        bpb.set_num_fats(self.num_fats as u8);
        bpb.set_root_ent_cnt(self.root_entries as u16);
        bpb.set_media(0xF8);
        bpb.set_sectors_per_track(63);
        bpb.set_number_of_heads(255);
        bpb.set_hidden_sectors(0);
        match self.fat_type {
            FatType::Fat16 => {
                bpb.set_jmp_boot(&[0xEB, 0x3C, 0x90]);
                if self.total_sectors < 0x1_0000 {
                    bpb.set_tot_sec_16(self.total_sectors as u16);
                } else {
                    bpb.set_tot_sec_32(self.total_sectors);
                }
                bpb.set_fat_sz_16(self.fat_size as u16);
                bpb.set_drv_num_16(0x80);
                bpb.set_boot_sig_16(0x29);
                bpb.set_vol_id_16(serial);
                bpb.set_vol_lab_16(b"NO NAME    ");
                bpb.set_fil_sys_type_16(b"FAT16   ");
            }
            FatType::Fat32 => {
                bpb.set_jmp_boot(&[0xEB, 0x58, 0x90]);
                bpb.set_tot_sec_32(self.total_sectors);
                bpb.set_fat_sz_32(self.fat_size);
                bpb.set_ext_flags(0);
                bpb.set_fs_ver(0);
                bpb.set_root_clus(2);
                bpb.set_fs_info(1);
                bpb.set_bk_boot_sec(6);
                bpb.set_drv_num_32(0x80);
                bpb.set_boot_sig_32(0x29);
                bpb.set_vol_id_32(serial);
                bpb.set_vol_lab_32(b"NO NAME    ");
                bpb.set_fil_sys_type_32(b"FAT32   ");
            }
        }
        bpb.set_signature(&BiosParameterBlock::SIGNATURE);
        bpb.into_block()
    }

    /// First sector of each FAT: the media entry, the end-of-chain entry and
    /// for FAT32 the end of the one-cluster root directory.
    fn first_fat_sector(&self) -> Block {
        let mut block = Block::new();
        match self.fat_type {
            FatType::Fat16 => {
                block[0..2].copy_from_slice(&0xFFF8u16.to_le_bytes());
                block[2..4].copy_from_slice(&(FatEntry::FAT16_FINAL.0 as u16).to_le_bytes());
            }
            FatType::Fat32 => {
                block[0..4].copy_from_slice(&0x0FFF_FFF8u32.to_le_bytes());
                block[4..8].copy_from_slice(&FatEntry::FAT32_FINAL.0.to_le_bytes());
                block[8..12].copy_from_slice(&FatEntry::FAT32_FINAL.0.to_le_bytes());
            }
        }
        block
    }
}

impl<BD, TS> FatVolume<BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    /// Create a new, empty FAT volume spanning the whole device. Everything
    /// on the device is lost.
    ///
    /// `work` is scratch space for the writes; it must hold at least
    /// [`MIN_WORK_BLOCKS`] blocks and larger areas make formatting faster.
    /// Afterwards the drive is registered but not mounted; the next access
    /// mounts the new volume.
    pub fn format(
        &mut self,
        drive: DriveId,
        fat_type: FatType,
        alloc_unit_bytes: u32,
        work: &mut [Block],
    ) -> Result<Layout, FatError<BD::Error>> {
        if drive != self.config.drive {
            return Err(FatError::InvalidDrive);
        }
        if self.open_files() > 0 {
            return Err(FatError::FilesOpen);
        }
        if work.len() < MIN_WORK_BLOCKS {
            return Err(FatError::Format(FormatError::WorkAreaTooSmall));
        }
        let total = self
            .block_device
            .num_blocks()
            .map_err(FatError::DeviceError)?;
        let layout = Layout::new(fat_type, total.0, alloc_unit_bytes)?;
        // The serial only has to differ between volumes; without a clock 0
        // will do.
        let serial = self.time_source.now().map(|t| t.0).unwrap_or(0);
        info!(
            "formatting {:?}: {} sectors, {} per cluster, {} clusters",
            layout.fat_type, layout.total_sectors, layout.sectors_per_cluster, layout.cluster_count
        );

        self.fat_cache.invalidate();
        self.dir_cache.invalidate();
        self.state = MountState::Pending;

        // Boot sector, reserved area, FATs and the root directory start out
        // zeroed.
        let root_end = match fat_type {
            FatType::Fat16 => layout.data_start(),
            FatType::Fat32 => layout.data_start() + layout.sectors_per_cluster,
        };
        self.fill_zero(work, BlockIdx(0), BlockCount(root_end))?;

        let fat_sector = layout.first_fat_sector();
        for copy in 0..layout.num_fats {
            let idx = BlockIdx(layout.reserved_sectors + copy * layout.fat_size);
            self.write_one(&fat_sector, idx)?;
        }

        let boot = layout.boot_sector(serial);
        if fat_type == FatType::Fat32 {
            let fs_info = FsInfoRaw::empty().into_block();
            self.write_one(&fs_info, BlockIdx(1))?;
            self.write_one(&boot, BlockIdx(6))?;
            self.write_one(&fs_info, BlockIdx(7))?;
        }
        // Until this write block 0 is blank and nothing mounts.
        self.write_one(&boot, BlockIdx(0))?;
        debug!("format done");
        Ok(layout)
    }

    fn write_one(&mut self, block: &Block, idx: BlockIdx) -> Result<(), FatError<BD::Error>> {
        self.block_device
            .write(core::slice::from_ref(block), idx)
            .map_err(FatError::DeviceError)
    }

    fn fill_zero(
        &mut self,
        work: &mut [Block],
        start: BlockIdx,
        count: BlockCount,
    ) -> Result<(), FatError<BD::Error>> {
        for block in work.iter_mut() {
            *block = Block::new();
        }
        let mut idx = start;
        let mut left = count.0;
        while left > 0 {
            let n = left.min(work.len() as u32);
            self.block_device
                .write(&work[..n as usize], idx)
                .map_err(FatError::DeviceError)?;
            idx += BlockCount(n);
            left -= n;
        }
        Ok(())
    }
}
