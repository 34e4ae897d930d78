//! The BIOS Parameter Block at the start of every FAT volume, and the FAT32
//! FSInfo sector.

use core::num::{NonZeroU16, NonZeroU32, NonZeroU8};

use crate::Block;

use super::FatType;

/// A parsed and validated boot sector.
#[derive(Debug, Clone)]
pub struct BiosParameterBlock {
    fat_type: FatType,
    fat_size: u32,
    reserved_sector_count: NonZeroU16,
    bytes_per_sector: NonZeroU16,
    sectors_per_cluster: NonZeroU8,
    media: NonZeroU8,
    num_fats: u8,
    total_sector_count: NonZeroU32,
    root_entry_count: u16,
    root_dir_sectors: u32,
    cluster_count: u32,
    raw: BiosParameterBlockRaw,
}

/// Why a boot sector was rejected.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BpbError {
    /// Too few clusters for FAT16
    Fat12NotSupported,
    /// A FAT32-only field was requested from a FAT16 volume
    Fat32Field(&'static str),
    /// The media byte is not one of the allowed values
    InvalidMedia(u8),
    /// Neither sector count field is set
    BothSectorCountsZero,
    /// Both sector count fields are set
    BothSectorCountsNotZero,
    /// The root directory does not fill whole sectors
    RootEntryCountSize,
    /// A FAT32 specific check failed
    Fat32(Fat32BpbError),
    /// Not a power of two between 512 and 4096
    InvalidBytesPerSector(u16),
    /// A valid sector size, but not the 512 bytes our blocks have
    UnsupportedBytesPerSector(u16),
    /// Not a power of two between 1 and 128
    InvalidSectorsPerCluster(u8),
    /// The reserved area must at least hold the boot sector
    ReservedSectorCountZero,
    /// No FAT copies
    NoFats,
    /// The FAT has zero length
    FatSizeZero,
    /// The metadata areas are larger than the volume
    VolumeTooSmall,
    /// Bytes 510 and 511 are not 0x55 0xAA
    InvalidSignature([u8; 2]),
}

/// Checks that only apply to FAT32 boot sectors.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fat32BpbError {
    /// The 16-bit sector count must be zero
    Count16NotZero,
    /// The 16-bit FAT size must be zero
    FatSize16NotZero,
    /// FAT32 has no fixed root directory
    RootEntryCountNotZero,
    /// We only know version 0.0
    FsVerNotZero,
    /// The root directory cluster is out of range
    InvalidRootCluster(u32),
    /// The backup boot sector is neither absent nor at sector 6
    InvalidBackupBootSector(u16),
}

/// The BPB_Reserved and BS_* fields are not verified.
impl BiosParameterBlock {
    /// Bytes 510 and 511 of a boot sector.
    pub const SIGNATURE: [u8; 2] = [0x55, 0xAA];

    /// Parse and validate the boot sector in `block`.
    pub fn new(block: Block) -> Result<Self, BpbError> {
        let raw = BiosParameterBlockRaw::new(block);

        let signature = raw.signature_word();
        if signature != Self::SIGNATURE {
            return Err(BpbError::InvalidSignature(signature));
        }

        let reserved_sector_count =
            NonZeroU16::new(raw.rsvd_sec_cnt()).ok_or(BpbError::ReservedSectorCountZero)?;

        let bytes_per_sector = Self::bytes_per_sector_checked(raw.bytes_per_sec())?;

        let size_16 = raw.fat_sz_16();
        let size_32 = raw.fat_sz_32();

        let fat_size = if size_16 == 0 {
            size_32
        } else {
            u32::from(size_16)
        };
        if fat_size == 0 {
            return Err(BpbError::FatSizeZero);
        }

        let num_fats = raw.num_fats();
        if num_fats == 0 {
            return Err(BpbError::NoFats);
        }

        let sectors_per_cluster = Self::sectors_per_cluster_checked(raw.sec_per_clu())?;

        let media = Self::media_checked(raw.media())?;

        let root_entry_count = raw.root_ent_cnt();

        let total_sector_count = Self::total_sector_count_checked(&raw)?;

        let root_dir_sectors = Self::compute_root_dir_sectors(
            u32::from(root_entry_count),
            u32::from(bytes_per_sector.get()),
        );
        let data_sectors = Self::compute_data_sectors(
            fat_size,
            total_sector_count.get(),
            u32::from(reserved_sector_count.get()),
            u32::from(num_fats),
            root_dir_sectors,
        )
        .ok_or(BpbError::VolumeTooSmall)?;
        let cluster_count =
            Self::compute_cluster_count(data_sectors, NonZeroU32::from(sectors_per_cluster));

        let mut me = Self {
            // Assume we have FAT16, to be overwritten later
            fat_type: FatType::Fat16,
            fat_size,
            reserved_sector_count,
            bytes_per_sector,
            sectors_per_cluster,
            media,
            num_fats,
            total_sector_count,
            root_entry_count,
            root_dir_sectors,
            cluster_count,
            raw,
        };

        me.fat_type = me.compute_fat_type()?;

        let verification_error = me
            .verify_root_entry_count()
            .or_else(|| me.verify_total_sector_count())
            .or_else(|| me.verify_fat_size());

        if let Some(err) = verification_error {
            return Err(err);
        }

        if me.fat_type == FatType::Fat32 {
            me.fs_version()?;
            me.root_cluster()?;
            me.bk_boot_sector()?;
        }

        Ok(me)
    }

    /// Sectors before the first FAT.
    pub fn reserved_sector_count(&self) -> NonZeroU16 {
        self.reserved_sector_count
    }

    /// Always 512 for volumes we mount.
    pub fn bytes_per_sector(&self) -> NonZeroU16 {
        self.bytes_per_sector
    }

    /// Sectors in one cluster.
    pub fn sectors_per_cluster(&self) -> NonZeroU8 {
        self.sectors_per_cluster
    }

    /// Sectors in one copy of the FAT.
    pub fn fat_size(&self) -> u32 {
        self.fat_size
    }

    /// Number of FAT copies.
    pub fn num_fats(&self) -> u8 {
        self.num_fats
    }

    /// FAT16 or FAT32, as decided by the cluster count.
    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    /// The media descriptor byte.
    pub fn media(&self) -> NonZeroU8 {
        self.media
    }

    /// Sectors in the whole volume.
    pub fn total_sector_count(&self) -> NonZeroU32 {
        self.total_sector_count
    }

    /// Entries in the FAT16 root directory (0 on FAT32).
    pub fn root_entry_count(&self) -> u16 {
        self.root_entry_count
    }

    /// Sectors taken by the FAT16 root directory (0 on FAT32).
    pub fn root_dir_sectors(&self) -> u32 {
        self.root_dir_sectors
    }

    /// The volume serial number.
    pub fn volume_id(&self) -> u32 {
        match self.fat_type {
            FatType::Fat16 => self.raw.vol_id_16(),
            FatType::Fat32 => self.raw.vol_id_32(),
        }
    }

    /// Sectors needed for `root_entry_count` 32-byte entries.
    pub fn compute_root_dir_sectors(root_entry_count: u32, bytes_per_sector: u32) -> u32 {
        ((root_entry_count * 32) + (bytes_per_sector - 1)) / bytes_per_sector
    }

    /// Number of data clusters.
    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    /// Highest valid cluster number.
    pub fn maximum_valid_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    /// Number of FAT entries in use, including the two reserved ones.
    pub fn total_cluster_count(&self) -> u32 {
        self.cluster_count + 2
    }

    fn compute_data_sectors(
        fat_size: u32,
        total_sector_count: u32,
        reserved_sectors: u32,
        num_fats: u32,
        root_dir_sectors: u32,
    ) -> Option<u32> {
        let metadata = num_fats
            .checked_mul(fat_size)?
            .checked_add(reserved_sectors)?
            .checked_add(root_dir_sectors)?;
        total_sector_count.checked_sub(metadata)
    }

    fn compute_cluster_count(data_sectors: u32, sectors_per_cluster: NonZeroU32) -> u32 {
        data_sectors / sectors_per_cluster.get()
    }

    fn compute_fat_type(&self) -> Result<FatType, BpbError> {
        if self.cluster_count < 4085 {
            Err(BpbError::Fat12NotSupported)
        } else if self.cluster_count < 65525 {
            Ok(FatType::Fat16)
        } else {
            Ok(FatType::Fat32)
        }
    }

    fn sectors_per_cluster_checked(sectors_per_cluster: u8) -> Result<NonZeroU8, BpbError> {
        match NonZeroU8::new(sectors_per_cluster) {
            Some(value) if sectors_per_cluster.is_power_of_two() => Ok(value),
            _ => Err(BpbError::InvalidSectorsPerCluster(sectors_per_cluster)),
        }
    }

    fn total_sector_count_checked(raw: &BiosParameterBlockRaw) -> Result<NonZeroU32, BpbError> {
        let sec_16 = raw.tot_sec_16();
        let sec_32 = raw.tot_sec_32();
        match (NonZeroU32::new(u32::from(sec_16)), NonZeroU32::new(sec_32)) {
            (Some(count), None) | (None, Some(count)) => Ok(count),
            (Some(_), Some(_)) => Err(BpbError::BothSectorCountsNotZero),
            (None, None) => Err(BpbError::BothSectorCountsZero),
        }
    }

    fn bytes_per_sector_checked(bytes_per_sec: u16) -> Result<NonZeroU16, BpbError> {
        match bytes_per_sec {
            512 => NonZeroU16::new(bytes_per_sec).ok_or(BpbError::InvalidBytesPerSector(0)),
            1024 | 2048 | 4096 => Err(BpbError::UnsupportedBytesPerSector(bytes_per_sec)),
            _ => Err(BpbError::InvalidBytesPerSector(bytes_per_sec)),
        }
    }

    fn media_checked(media: u8) -> Result<NonZeroU8, BpbError> {
        match media {
            0xF0 | 0xF8..=0xFF => NonZeroU8::new(media).ok_or(BpbError::InvalidMedia(media)),
            _ => Err(BpbError::InvalidMedia(media)),
        }
    }

    fn verify_total_sector_count(&self) -> Option<BpbError> {
        match self.fat_type {
            FatType::Fat16 => None,
            FatType::Fat32 => {
                if self.raw.tot_sec_16() == 0 {
                    None
                } else {
                    Some(BpbError::Fat32(Fat32BpbError::Count16NotZero))
                }
            }
        }
    }

    fn verify_root_entry_count(&self) -> Option<BpbError> {
        let value = self.root_entry_count;
        match self.fat_type {
            FatType::Fat16 => {
                let bytes_per_sec = u32::from(self.bytes_per_sector().get());
                let multiplied = u32::from(value) * 32;
                if value != 0 && multiplied % bytes_per_sec == 0 {
                    None
                } else {
                    Some(BpbError::RootEntryCountSize)
                }
            }
            FatType::Fat32 => {
                if value != 0 {
                    Some(BpbError::Fat32(Fat32BpbError::RootEntryCountNotZero))
                } else {
                    None
                }
            }
        }
    }

    fn verify_fat_size(&self) -> Option<BpbError> {
        match self.fat_type {
            FatType::Fat16 => None,
            FatType::Fat32 => {
                if self.raw.fat_sz_16() == 0 {
                    None
                } else {
                    Some(BpbError::Fat32(Fat32BpbError::FatSize16NotZero))
                }
            }
        }
    }

    // All following functions are fat32 only
    fn fat32_only(&self, field_name: &'static str) -> Result<(), BpbError> {
        if self.fat_type == FatType::Fat32 {
            Ok(())
        } else {
            Err(BpbError::Fat32Field(field_name))
        }
    }

    /// FAT mirroring flags.
    pub fn ext_flags(&self) -> Result<u16, BpbError> {
        self.fat32_only("ext_flags")?;
        Ok(self.raw.ext_flags())
    }

    /// File system version, always 0.
    pub fn fs_version(&self) -> Result<u16, BpbError> {
        self.fat32_only("fs_version")?;
        let value = self.raw.fs_ver();
        if value == 0 {
            Ok(value)
        } else {
            Err(BpbError::Fat32(Fat32BpbError::FsVerNotZero))
        }
    }

    /// First cluster of the root directory.
    pub fn root_cluster(&self) -> Result<u32, BpbError> {
        self.fat32_only("root_cluster")?;
        let value = self.raw.root_clus();
        if value >= 2 && value <= self.maximum_valid_cluster() {
            Ok(value)
        } else {
            Err(BpbError::Fat32(Fat32BpbError::InvalidRootCluster(value)))
        }
    }

    /// Sector of the FSInfo structure, relative to the volume start.
    pub fn fs_info(&self) -> Result<u16, BpbError> {
        self.fat32_only("fs_info")?;
        Ok(self.raw.fs_info())
    }

    /// Sector of the backup boot sector, or 0.
    pub fn bk_boot_sector(&self) -> Result<u16, BpbError> {
        self.fat32_only("bk_boot_sector")?;
        let value = self.raw.bk_boot_sec();
        if value == 0 || value == 6 {
            Ok(value)
        } else {
            Err(BpbError::Fat32(Fat32BpbError::InvalidBackupBootSector(
                value,
            )))
        }
    }
}

/// Field level access to a boot sector.
#[derive(Debug, Clone)]
pub struct BiosParameterBlockRaw {
    block: Block,
}

impl BiosParameterBlockRaw {
    /// Wrap a boot sector.
    pub fn new(block: Block) -> Self {
        Self { block }
    }

    /// Unwrap the boot sector.
    pub fn into_block(self) -> Block {
        self.block
    }

    fn data(&self) -> &[u8] {
        &self.block.contents
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.block.contents
    }

    define_field!(bytes_per_sec, u16, 11);
    define_field!(sec_per_clu, u8, 13);
    define_field!(rsvd_sec_cnt, u16, 14);
    define_field!(num_fats, u8, 16);
    define_field!(root_ent_cnt, u16, 17);
    define_field!(tot_sec_16, u16, 19);
    define_field!(media, u8, 21);
    define_field!(fat_sz_16, u16, 22);
    define_field!(sectors_per_track, u16, 24);
    define_field!(number_of_heads, u16, 26);
    define_field!(hidden_sectors, u32, 28);
    define_field!(tot_sec_32, u32, 32);
    define_field!(vol_id_16, u32, 39);

    // FAT32 specific structure
    define_field!(fat_sz_32, u32, 36);
    define_field!(ext_flags, u16, 40);
    define_field!(fs_ver, u16, 42);
    define_field!(root_clus, u32, 44);
    define_field!(fs_info, u16, 48);
    define_field!(bk_boot_sec, u16, 50);
    define_field!(vol_id_32, u32, 67);

    define_field!(set set_jmp_boot, [u8; 3], 0);
    define_field!(set set_oem_name, [u8; 8], 3);
    define_field!(set set_bytes_per_sec, u16, 11);
    define_field!(set set_sec_per_clu, u8, 13);
    define_field!(set set_rsvd_sec_cnt, u16, 14);
    define_field!(set set_num_fats, u8, 16);
    define_field!(set set_root_ent_cnt, u16, 17);
    define_field!(set set_tot_sec_16, u16, 19);
    define_field!(set set_media, u8, 21);
    define_field!(set set_fat_sz_16, u16, 22);
    define_field!(set set_sectors_per_track, u16, 24);
    define_field!(set set_number_of_heads, u16, 26);
    define_field!(set set_hidden_sectors, u32, 28);
    define_field!(set set_tot_sec_32, u32, 32);

    // FAT16 extended boot record
    define_field!(set set_drv_num_16, u8, 36);
    define_field!(set set_boot_sig_16, u8, 38);
    define_field!(set set_vol_id_16, u32, 39);
    define_field!(set set_vol_lab_16, [u8; 11], 43);
    define_field!(set set_fil_sys_type_16, [u8; 8], 54);

    // FAT32 extended boot record
    define_field!(set set_fat_sz_32, u32, 36);
    define_field!(set set_ext_flags, u16, 40);
    define_field!(set set_fs_ver, u16, 42);
    define_field!(set set_root_clus, u32, 44);
    define_field!(set set_fs_info, u16, 48);
    define_field!(set set_bk_boot_sec, u16, 50);
    define_field!(set set_drv_num_32, u8, 64);
    define_field!(set set_boot_sig_32, u8, 66);
    define_field!(set set_vol_id_32, u32, 67);
    define_field!(set set_vol_lab_32, [u8; 11], 71);
    define_field!(set set_fil_sys_type_32, [u8; 8], 82);

    define_field!(set set_signature, [u8; 2], 510);

    fn signature_word(&self) -> [u8; 2] {
        let d = self.data();
        [d[510], d[511]]
    }
}

/// The FAT32 FSInfo sector, a hint of the free cluster count and of where
/// to look for the next free cluster.
#[derive(Debug, Clone)]
pub struct FsInfoRaw {
    block: Block,
}

impl FsInfoRaw {
    const LEAD_SIG: u32 = 0x4161_5252;
    const STRUC_SIG: u32 = 0x6141_7272;
    const TRAIL_SIG: u32 = 0xAA55_0000;

    /// Either count is unknown.
    pub const UNKNOWN: u32 = 0xFFFF_FFFF;

    /// A fresh FSInfo sector with both hints unknown.
    pub fn empty() -> Self {
        let mut me = Self {
            block: Block::new(),
        };
        me.set_lead_sig(Self::LEAD_SIG);
        me.set_struc_sig(Self::STRUC_SIG);
        me.set_free_count(Self::UNKNOWN);
        me.set_nxt_free(Self::UNKNOWN);
        me.set_trail_sig(Self::TRAIL_SIG);
        me
    }

    /// Wrap an FSInfo sector read from disk.
    pub fn new(block: Block) -> Self {
        Self { block }
    }

    /// Unwrap the sector.
    pub fn into_block(self) -> Block {
        self.block
    }

    /// Are all three signatures in place?
    pub fn is_valid(&self) -> bool {
        self.lead_sig() == Self::LEAD_SIG
            && self.struc_sig() == Self::STRUC_SIG
            && self.trail_sig() == Self::TRAIL_SIG
    }

    fn data(&self) -> &[u8] {
        &self.block.contents
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.block.contents
    }

    define_field!(lead_sig, u32, 0);
    define_field!(struc_sig, u32, 484);
    define_field!(free_count, u32, 488);
    define_field!(nxt_free, u32, 492);
    define_field!(trail_sig, u32, 508);

    define_field!(set set_lead_sig, u32, 0);
    define_field!(set set_struc_sig, u32, 484);
    define_field!(set set_free_count, u32, 488);
    define_field!(set set_nxt_free, u32, 492);
    define_field!(set set_trail_sig, u32, 508);
}
