//! sdio-fat - FAT16/FAT32 volumes
//!
//! A [`FatVolume`] sits on top of any [`BlockDevice`] and provides what a
//! data logger needs: mount and format, free space, directories with 8.3
//! names, and files read or written sequentially. Long file names, FAT12
//! and exFAT are not supported.
//!
//! Nothing is allocated: metadata goes through two one-block caches (one for
//! the FAT, one for directories) and every open file has its own block
//! buffer.

use core::fmt;

use crate::{
    mbr::{Mbr, PartitionNumber},
    time::{FatTimestamp, TimeSource},
    Block, BlockCount, BlockDevice, BlockIdx,
};

use self::{
    bios_param_block::{BiosParameterBlock, BpbError, FsInfoRaw},
    block_cache::BlockCache,
    file::{File, MAX_OPEN_FILES},
};

pub mod bios_param_block;
mod block_cache;
pub mod cluster;
pub mod directory;
pub mod file;
pub mod format;
mod path;

#[cfg(test)]
mod test;

pub use self::cluster::Cluster;
pub use self::directory::{Attributes, DirEntry, DirIter, ShortName, ShortNameError};
pub use self::file::{FileHandle, Line, Lines, OpenMode, LINE_CAPACITY};
pub use self::format::{FormatError, Layout};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

/// The two FAT variants we handle.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    /// 4085 to 65524 clusters, 16-bit FAT entries
    Fat16,
    /// 65525 clusters or more, 28-bit FAT entries
    Fat32,
}

impl FatType {
    /// The file system type number FatFs reports (2 for FAT16, 3 for FAT32).
    pub fn code(self) -> u8 {
        match self {
            FatType::Fat16 => 2,
            FatType::Fat32 => 3,
        }
    }
}

/// Everything that can go wrong on a FAT volume.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatError<E> {
    /// The block device failed
    DeviceError(E),
    /// The boot sector is not a usable FAT16/FAT32 boot sector
    Bpb(BpbError),
    /// Neither block 0 nor the first partition holds a FAT volume
    NoFilesystem,
    /// The drive has not been mounted
    NotMounted,
    /// No such drive
    InvalidDrive,
    /// Formatting was refused
    Format(FormatError),
    /// The file or directory does not exist
    NotFound,
    /// A file of that name is in the way
    AlreadyExists,
    /// A path component is a file
    NotADirectory,
    /// Files cannot be opened on directories
    IsADirectory,
    /// Only empty directories can be removed
    DirectoryNotEmpty,
    /// The FAT16 root directory has no free slot
    DirectoryFull,
    /// No free cluster left
    DiskFull,
    /// Not a valid 8.3 path
    InvalidPath,
    /// Every file slot is in use
    TooManyOpenFiles,
    /// The file is open already
    FileAlreadyOpen,
    /// The handle does not refer to an open file
    InvalidHandle,
    /// The operation needs all files closed
    FilesOpen,
    /// The file data could not be read
    ReadFailed,
    /// The file was not opened for writing
    WriteFailed,
    /// Seek past the end of the file
    InvalidSeek,
    /// The clock could not supply a time stamp
    ClockUnavailable,
    /// A cluster chain is broken at this cluster
    BadCluster(u32),
}

impl<E> From<BpbError> for FatError<E> {
    fn from(e: BpbError) -> Self {
        Self::Bpb(e)
    }
}

impl<E> From<FormatError> for FatError<E> {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

/// Logical drive number, as in the `"0:"` path prefix.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveId(pub u8);

/// Options for a `FatVolume`.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeConfig {
    /// The drive this volume answers to
    pub drive: DriveId,
    /// Report sizes in KiB using the real sector size instead of assuming
    /// 512 byte sectors and reporting MiB.
    pub variable_sector_size: bool,
}

/// An amount of storage as `disk_info` reports it.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Space {
    /// Mebibytes, rounded down
    MiB(u32),
    /// Kibibytes, rounded down
    KiB(u32),
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Space::MiB(n) => write!(f, "{} MB", n),
            Space::KiB(n) => write!(f, "{} KB", n),
        }
    }
}

/// Size and usage of a mounted volume.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    /// Which drive
    pub drive: DriveId,
    /// FAT16 or FAT32
    pub fat_type: FatType,
    /// Bytes per sector
    pub sector_size: u16,
    /// Sectors per cluster
    pub sectors_per_cluster: u32,
    /// Data clusters on the volume
    pub total_clusters: u32,
    /// Data clusters not in use
    pub free_clusters: u32,
    /// See [`VolumeConfig::variable_sector_size`]
    pub variable_sector_size: bool,
}

impl VolumeInfo {
    /// Sectors in the data area.
    pub fn total_sectors(&self) -> u32 {
        self.total_clusters * self.sectors_per_cluster
    }

    /// Sectors in free clusters.
    pub fn free_sectors(&self) -> u32 {
        self.free_clusters * self.sectors_per_cluster
    }

    /// Bytes per cluster.
    pub fn cluster_bytes(&self) -> u32 {
        self.sectors_per_cluster * u32::from(self.sector_size)
    }

    /// Size of the data area.
    pub fn total_space(&self) -> Space {
        self.space(self.total_sectors())
    }

    /// Free space.
    pub fn free_space(&self) -> Space {
        self.space(self.free_sectors())
    }

    fn space(&self, sectors: u32) -> Space {
        if self.variable_sector_size {
            let bytes = u64::from(sectors) * u64::from(self.sector_size);
            Space::KiB((bytes >> 10) as u32)
        } else {
            // 2048 sectors of 512 bytes make a MiB.
            Space::MiB(sectors >> 11)
        }
    }
}

/// Where things are on a mounted volume. Block numbers are absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Geometry {
    pub(crate) fat_type: FatType,
    pub(crate) base: BlockIdx,
    pub(crate) sectors_per_cluster: u32,
    pub(crate) fat_start: BlockIdx,
    pub(crate) fat_size: u32,
    pub(crate) num_fats: u32,
    pub(crate) root_dir_start: BlockIdx,
    pub(crate) root_dir_sectors: u32,
    pub(crate) data_start: BlockIdx,
    pub(crate) cluster_count: u32,
    pub(crate) root_cluster: Cluster,
    pub(crate) fs_info: Option<BlockIdx>,
}

impl Geometry {
    fn new(base: BlockIdx, bpb: &BiosParameterBlock) -> Result<Self, BpbError> {
        let fat_start = base + BlockCount(u32::from(bpb.reserved_sector_count().get()));
        let fat_size = bpb.fat_size();
        let num_fats = u32::from(bpb.num_fats());
        let root_dir_start = fat_start + BlockCount(num_fats * fat_size);
        let root_dir_sectors = bpb.root_dir_sectors();
        let (root_cluster, fs_info) = match bpb.fat_type() {
            FatType::Fat16 => (Cluster::EMPTY, None),
            FatType::Fat32 => {
                let fs_info = match bpb.fs_info()? {
                    0 | 0xFFFF => None,
                    sector => Some(base + BlockCount(u32::from(sector))),
                };
                (Cluster(bpb.root_cluster()?), fs_info)
            }
        };
        Ok(Self {
            fat_type: bpb.fat_type(),
            base,
            sectors_per_cluster: u32::from(bpb.sectors_per_cluster().get()),
            fat_start,
            fat_size,
            num_fats,
            root_dir_start,
            root_dir_sectors,
            data_start: root_dir_start + BlockCount(root_dir_sectors),
            cluster_count: bpb.cluster_count(),
            root_cluster,
            fs_info,
        })
    }

    pub(crate) fn cluster_bytes(&self) -> u32 {
        self.sectors_per_cluster * Block::LEN_U32
    }

    pub(crate) fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    pub(crate) fn is_valid_cluster(&self, cluster: Cluster) -> bool {
        cluster.0 >= Cluster::FIRST.0 && cluster.0 <= self.max_cluster()
    }

    /// First block of a data cluster.
    pub(crate) fn cluster_start(&self, cluster: Cluster) -> BlockIdx {
        self.data_start + BlockCount((cluster.0 - Cluster::FIRST.0) * self.sectors_per_cluster)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MountState {
    Unmounted,
    /// Registered; the boot sector is read on first use.
    Pending,
    Mounted(Geometry),
}

/// A FAT16 or FAT32 volume on a block device.
pub struct FatVolume<BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    block_device: BD,
    time_source: TS,
    config: VolumeConfig,
    state: MountState,
    fat_cache: BlockCache,
    dir_cache: BlockCache,
    files: [Option<File>; MAX_OPEN_FILES],
    next_file_id: u32,
    next_free: u32,
    free_clusters: Option<u32>,
    fs_info_dirty: bool,
}

impl<BD, TS> core::fmt::Debug for FatVolume<BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FatVolume")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("open_files", &self.open_files())
            .finish()
    }
}

impl<BD, TS> FatVolume<BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    /// Create an unmounted volume. Nothing is read until [`mount`](Self::mount).
    pub fn new(block_device: BD, time_source: TS, config: VolumeConfig) -> Self {
        Self {
            block_device,
            time_source,
            config,
            state: MountState::Unmounted,
            fat_cache: BlockCache::new(),
            dir_cache: BlockCache::new(),
            files: [Self::NO_FILE; MAX_OPEN_FILES],
            next_file_id: 0,
            next_free: Cluster::FIRST.0,
            free_clusters: None,
            fs_info_dirty: false,
        }
    }

    /// Give back the block device and the time source. Unwritten data in
    /// open files is lost; close them first.
    pub fn release(self) -> (BD, TS) {
        (self.block_device, self.time_source)
    }

    /// Access the block device.
    pub fn device(&mut self) -> &mut BD {
        &mut self.block_device
    }

    /// The options this volume was created with.
    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    /// Is the volume mounted (not merely registered)?
    pub fn is_mounted(&self) -> bool {
        matches!(self.state, MountState::Mounted(_))
    }

    /// FAT16 or FAT32, mounting first if needed.
    pub fn fat_type(&mut self) -> Result<FatType, FatError<BD::Error>> {
        Ok(self.geometry()?.fat_type)
    }

    /// Register `drive`. With `mount_now` the boot sector is read and checked
    /// straight away; otherwise that happens on first use. An unformatted
    /// card is reported as `NoFilesystem` and left alone.
    pub fn mount(&mut self, drive: DriveId, mount_now: bool) -> Result<(), FatError<BD::Error>> {
        if drive != self.config.drive {
            return Err(FatError::InvalidDrive);
        }
        if self.open_files() > 0 {
            return Err(FatError::FilesOpen);
        }
        if let MountState::Mounted(_) = self.state {
            self.sync()?;
        }
        self.state = MountState::Pending;
        if mount_now {
            self.geometry()?;
        }
        Ok(())
    }

    /// Write back cached metadata and forget the volume.
    pub fn unmount(&mut self) -> Result<(), FatError<BD::Error>> {
        if self.open_files() > 0 {
            return Err(FatError::FilesOpen);
        }
        if let MountState::Mounted(_) = self.state {
            self.sync()?;
        }
        self.fat_cache.invalidate();
        self.dir_cache.invalidate();
        self.state = MountState::Unmounted;
        debug!("unmounted drive {}", self.config.drive.0);
        Ok(())
    }

    /// Report size and free space. Free space is found by scanning the
    /// whole FAT.
    pub fn disk_info(&mut self) -> Result<VolumeInfo, FatError<BD::Error>> {
        let g = self.geometry()?;
        let free_clusters = self.count_free_clusters(&g)?;
        Ok(VolumeInfo {
            drive: self.config.drive,
            fat_type: g.fat_type,
            sector_size: Block::LEN as u16,
            sectors_per_cluster: g.sectors_per_cluster,
            total_clusters: g.cluster_count,
            free_clusters,
            variable_sector_size: self.config.variable_sector_size,
        })
    }

    /// The current time from the volume's time source.
    pub fn now(&mut self) -> Result<FatTimestamp, FatError<BD::Error>> {
        self.time_source.now().map_err(|e| {
            warn!("no time stamp: {:?}", e);
            FatError::ClockUnavailable
        })
    }

    /// Write back the FAT and directory caches and the FSInfo hints.
    pub fn sync(&mut self) -> Result<(), FatError<BD::Error>> {
        let g = match self.state {
            MountState::Mounted(g) => g,
            _ => return Ok(()),
        };
        self.fat_cache
            .flush(&mut self.block_device)
            .map_err(FatError::DeviceError)?;
        self.dir_cache
            .flush(&mut self.block_device)
            .map_err(FatError::DeviceError)?;
        if let (true, Some(idx)) = (self.fs_info_dirty, g.fs_info) {
            let block = self
                .block_device
                .read_block(idx, "fs_info")
                .map_err(FatError::DeviceError)?;
            let mut fs_info = FsInfoRaw::new(block);
            if fs_info.is_valid() {
                fs_info.set_free_count(self.free_clusters.unwrap_or(FsInfoRaw::UNKNOWN));
                fs_info.set_nxt_free(self.next_free);
                self.block_device
                    .write_block(&fs_info.into_block(), idx)
                    .map_err(FatError::DeviceError)?;
            }
        }
        self.fs_info_dirty = false;
        Ok(())
    }

    /// Remove a `"N:"` prefix, checking it names our drive.
    pub(crate) fn strip_drive<'p>(&self, path: &'p str) -> Result<&'p str, FatError<BD::Error>> {
        match path::split_drive(path) {
            (None, rest) => Ok(rest),
            (Some(drive), rest) => match drive.parse::<u8>() {
                Ok(n) if DriveId(n) == self.config.drive => Ok(rest),
                Ok(_) => Err(FatError::InvalidDrive),
                Err(_) => Err(FatError::InvalidPath),
            },
        }
    }

    /// The layout of the mounted volume, mounting a registered one first.
    pub(crate) fn geometry(&mut self) -> Result<Geometry, FatError<BD::Error>> {
        match self.state {
            MountState::Mounted(g) => Ok(g),
            MountState::Unmounted => Err(FatError::NotMounted),
            MountState::Pending => {
                let g = self.read_geometry()?;
                self.state = MountState::Mounted(g);
                Ok(g)
            }
        }
    }

    fn read_geometry(&mut self) -> Result<Geometry, FatError<BD::Error>> {
        let first = self
            .block_device
            .read_block(BlockIdx(0), "mount")
            .map_err(FatError::DeviceError)?;
        let (base, bpb) = match BiosParameterBlock::new(first.clone()) {
            Ok(bpb) => (BlockIdx(0), bpb),
            Err(bpb_error) => match Mbr::parse_partition::<BD::Error>(&first, PartitionNumber::One) {
                Ok(partition) if partition.ty.is_fat() => {
                    let boot = self
                        .block_device
                        .read_block(partition.lba_start, "mount_partition")
                        .map_err(FatError::DeviceError)?;
                    (partition.lba_start, BiosParameterBlock::new(boot)?)
                }
                _ => {
                    debug!("no FAT volume on drive: {:?}", bpb_error);
                    return Err(FatError::NoFilesystem);
                }
            },
        };
        let g = Geometry::new(base, &bpb)?;

        self.fat_cache.invalidate();
        self.dir_cache.invalidate();
        self.fat_cache.set_mirrors(g.num_fats, BlockCount(g.fat_size));
        self.next_free = Cluster::FIRST.0;
        self.free_clusters = None;
        self.fs_info_dirty = false;
        if let Some(idx) = g.fs_info {
            let fs_info = FsInfoRaw::new(
                self.block_device
                    .read_block(idx, "fs_info")
                    .map_err(FatError::DeviceError)?,
            );
            if fs_info.is_valid() && g.is_valid_cluster(Cluster(fs_info.nxt_free())) {
                self.next_free = fs_info.nxt_free();
            }
        }
        debug!(
            "mounted {:?} at block {}: {} clusters of {} sectors",
            g.fat_type, base.0, g.cluster_count, g.sectors_per_cluster
        );
        Ok(g)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
