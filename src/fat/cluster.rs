//! Clusters and the File Allocation Table.

use crate::{time::TimeSource, Block, BlockCount, BlockDevice, BlockIdx};

use super::{FatError, FatType, FatVolume, Geometry};

#[cfg(feature = "log")]
use log::{trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{trace, warn};

/// A cluster number. Data clusters start at 2; 0 in a directory entry means
/// "no cluster".
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cluster(pub u32);

impl Cluster {
    /// The first data cluster.
    pub const FIRST: Cluster = Cluster(2);
    /// Stored for empty files, and in ".." entries pointing at the root.
    pub const EMPTY: Cluster = Cluster(0);

    /// Wrap a cluster number.
    pub fn new(cluster_number: u32) -> Self {
        Self(cluster_number)
    }

    /// Is this a data cluster rather than a placeholder?
    pub fn is_allocated(&self) -> bool {
        self.0 >= Self::FIRST.0
    }
}

/// The value of one FAT slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FatEntry(pub(crate) u32);

impl FatEntry {
    pub const FREE: Self = Self(0);

    pub const FAT32_BAD: Self = Self(0x0FFF_FFF7);
    pub const FAT32_FINAL: Self = Self(0x0FFF_FFFF);
    const FAT32_RESERVED_RANGE_START: u32 = 0x0FFF_FFF8;

    pub const FAT16_BAD: Self = Self(0xFFF7);
    pub const FAT16_FINAL: Self = Self(0xFFFF);
    const FAT16_RESERVED_RANGE_START: u32 = 0xFFF8;

    pub fn end_of_chain(fat_type: FatType) -> Self {
        match fat_type {
            FatType::Fat16 => Self::FAT16_FINAL,
            FatType::Fat32 => Self::FAT32_FINAL,
        }
    }

    pub fn is_free(&self) -> bool {
        *self == Self::FREE
    }

    pub fn is_bad(&self, fat_type: FatType) -> bool {
        match fat_type {
            FatType::Fat16 => *self == Self::FAT16_BAD,
            FatType::Fat32 => *self == Self::FAT32_BAD,
        }
    }

    pub fn is_final(&self, fat_type: FatType) -> bool {
        match fat_type {
            FatType::Fat16 => self.0 >= Self::FAT16_RESERVED_RANGE_START,
            FatType::Fat32 => self.0 >= Self::FAT32_RESERVED_RANGE_START,
        }
    }
}

impl<BD, TS> FatVolume<BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    fn fat_position(g: &Geometry, cluster: Cluster) -> (BlockIdx, usize) {
        let fat_offset = match g.fat_type {
            FatType::Fat16 => cluster.0 * 2,
            FatType::Fat32 => cluster.0 * 4,
        };
        let sector = g.fat_start + BlockCount(fat_offset / Block::LEN_U32);
        (sector, (fat_offset % Block::LEN_U32) as usize)
    }

    pub(crate) fn read_fat(
        &mut self,
        g: &Geometry,
        cluster: Cluster,
    ) -> Result<FatEntry, FatError<BD::Error>> {
        let (sector, offset) = Self::fat_position(g, cluster);
        let block = self
            .fat_cache
            .load(&mut self.block_device, sector, "read_fat")
            .map_err(FatError::DeviceError)?;
        let d = &block.contents[offset..];
        let value = match g.fat_type {
            FatType::Fat16 => u32::from(u16::from_le_bytes([d[0], d[1]])),
            FatType::Fat32 => u32::from_le_bytes([d[0], d[1], d[2], d[3]]) & 0x0FFF_FFFF,
        };
        Ok(FatEntry(value))
    }

    pub(crate) fn write_fat(
        &mut self,
        g: &Geometry,
        cluster: Cluster,
        entry: FatEntry,
    ) -> Result<(), FatError<BD::Error>> {
        let (sector, offset) = Self::fat_position(g, cluster);
        let block = self
            .fat_cache
            .load_mut(&mut self.block_device, sector, "write_fat")
            .map_err(FatError::DeviceError)?;
        let d = &mut block.contents[offset..];
        match g.fat_type {
            FatType::Fat16 => d[0..2].copy_from_slice(&(entry.0 as u16).to_le_bytes()),
            FatType::Fat32 => {
                // The top four bits are reserved and must be preserved.
                let old = u32::from_le_bytes([d[0], d[1], d[2], d[3]]);
                let value = (old & 0xF000_0000) | (entry.0 & 0x0FFF_FFFF);
                d[0..4].copy_from_slice(&value.to_le_bytes());
            }
        }
        Ok(())
    }

    /// The cluster after `cluster` in its chain, or `None` at the end.
    pub(crate) fn next_cluster(
        &mut self,
        g: &Geometry,
        cluster: Cluster,
    ) -> Result<Option<Cluster>, FatError<BD::Error>> {
        let entry = self.read_fat(g, cluster)?;
        if entry.is_final(g.fat_type) {
            Ok(None)
        } else if entry.is_free() || entry.is_bad(g.fat_type) || !g.is_valid_cluster(Cluster(entry.0)) {
            warn!("broken chain at cluster {}: {:x}", cluster.0, entry.0);
            Err(FatError::BadCluster(cluster.0))
        } else {
            Ok(Some(Cluster(entry.0)))
        }
    }

    /// Find a free cluster, mark it as the end of a chain and link it after
    /// `prev`.
    pub(crate) fn alloc_cluster(
        &mut self,
        g: &Geometry,
        prev: Option<Cluster>,
    ) -> Result<Cluster, FatError<BD::Error>> {
        let last = g.max_cluster();
        let mut candidate = if g.is_valid_cluster(Cluster(self.next_free)) {
            self.next_free
        } else {
            Cluster::FIRST.0
        };
        for _ in 0..g.cluster_count {
            if self.read_fat(g, Cluster(candidate))?.is_free() {
                let cluster = Cluster(candidate);
                self.write_fat(g, cluster, FatEntry::end_of_chain(g.fat_type))?;
                if let Some(prev) = prev {
                    self.write_fat(g, prev, FatEntry(candidate))?;
                }
                self.next_free = if candidate >= last {
                    Cluster::FIRST.0
                } else {
                    candidate + 1
                };
                if let Some(free) = self.free_clusters.as_mut() {
                    *free = free.saturating_sub(1);
                }
                self.fs_info_dirty = true;
                // Whatever the cache held from this cluster's previous life is stale.
                self.dir_cache
                    .forget_range(g.cluster_start(cluster), BlockCount(g.sectors_per_cluster));
                trace!("allocated cluster {}", candidate);
                return Ok(cluster);
            }
            candidate = if candidate >= last {
                Cluster::FIRST.0
            } else {
                candidate + 1
            };
        }
        warn!("no free cluster left");
        Err(FatError::DiskFull)
    }

    /// Return every cluster of the chain starting at `start` to the free pool.
    pub(crate) fn free_chain(
        &mut self,
        g: &Geometry,
        start: Cluster,
    ) -> Result<(), FatError<BD::Error>> {
        let mut current = Some(start);
        let mut remaining = g.cluster_count;
        while let Some(cluster) = current {
            if !g.is_valid_cluster(cluster) || remaining == 0 {
                return Err(FatError::BadCluster(cluster.0));
            }
            remaining -= 1;
            let entry = self.read_fat(g, cluster)?;
            self.write_fat(g, cluster, FatEntry::FREE)?;
            if let Some(free) = self.free_clusters.as_mut() {
                *free += 1;
            }
            self.fs_info_dirty = true;
            current = if entry.is_final(g.fat_type) {
                None
            } else if entry.is_free() || entry.is_bad(g.fat_type) {
                return Err(FatError::BadCluster(cluster.0));
            } else {
                Some(Cluster(entry.0))
            };
        }
        trace!("freed chain at cluster {}", start.0);
        Ok(())
    }

    /// Scan the whole FAT.
    pub(crate) fn count_free_clusters(&mut self, g: &Geometry) -> Result<u32, FatError<BD::Error>> {
        let mut free = 0;
        for number in Cluster::FIRST.0..=g.max_cluster() {
            if self.read_fat(g, Cluster(number))?.is_free() {
                free += 1;
            }
        }
        self.free_clusters = Some(free);
        Ok(free)
    }

    /// Fill a cluster with zeros, bypassing the caches.
    pub(crate) fn zero_cluster(
        &mut self,
        g: &Geometry,
        cluster: Cluster,
    ) -> Result<(), FatError<BD::Error>> {
        let start = g.cluster_start(cluster);
        let count = BlockCount(g.sectors_per_cluster);
        self.dir_cache.forget_range(start, count);
        let zeros = [Block::new()];
        for idx in start.range(count) {
            self.block_device
                .write(&zeros, idx)
                .map_err(FatError::DeviceError)?;
        }
        Ok(())
    }
}
