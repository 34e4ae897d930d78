//! Directory entries, directory traversal and path lookup.

use core::fmt::{self, Write};

use crate::{time::FatTimestamp, time::TimeSource, BlockCount, BlockDevice, BlockIdx};

use super::{cluster::Cluster, path, FatError, FatType, FatVolume, Geometry};

#[cfg(feature = "log")]
use log::debug;

#[cfg(feature = "defmt-log")]
use defmt::debug;

bitflags::bitflags! {
    /// The attribute byte of a directory entry.
    #[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
    pub struct Attributes: u8 {
        const READ_ONLY = (1 << 0);
        const HIDDEN = (1 << 1);
        const SYSTEM = (1 << 2);
        const VOLUME_ID = (1 << 3);
        const DIRECTORY = (1 << 4);
        const ARCHIVE = (1 << 5);
    }
}

impl Attributes {
    /// Long file name fragments set the four low bits and nothing else.
    pub fn is_long_name(&self) -> bool {
        self.bits() & 0x3F == 0x0F
    }

    /// Is the DIRECTORY bit set?
    pub fn is_dir(&self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    /// Is this the volume label?
    pub fn is_volume_label(&self) -> bool {
        self.contains(Self::VOLUME_ID) && !self.is_long_name()
    }
}

/// Why a name is not a valid 8.3 name.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShortNameError {
    /// Nothing before the extension
    Empty,
    /// More than eight characters before the period
    BaseTooLong,
    /// More than three characters after the period
    ExtensionTooLong,
    /// A character FAT does not allow in short names
    InvalidCharacter(u8),
    /// A leading or second period
    MisplacedPeriod,
}

/// An 8.3 file name, space padded and upper case as stored on disk.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct ShortName {
    contents: [u8; 11],
}

impl ShortName {
    /// The "." entry of a directory.
    pub const DOT: ShortName = ShortName {
        contents: *b".          ",
    };
    /// The ".." entry of a directory.
    pub const DOTDOT: ShortName = ShortName {
        contents: *b"..         ",
    };

    /// Convert `"readme.txt"` into `README  TXT`.
    pub fn new(name: &str) -> Result<Self, ShortNameError> {
        match name {
            "." => return Ok(Self::DOT),
            ".." => return Ok(Self::DOTDOT),
            _ => {}
        }
        let mut contents = [b' '; 11];
        let mut idx = 0;
        let mut seen_period = false;
        for ch in name.bytes() {
            if ch == b'.' {
                if seen_period || idx == 0 {
                    return Err(ShortNameError::MisplacedPeriod);
                }
                seen_period = true;
                idx = 8;
                continue;
            }
            let ch = Self::check_char(ch)?;
            if seen_period && idx >= 11 {
                return Err(ShortNameError::ExtensionTooLong);
            }
            if !seen_period && idx >= 8 {
                return Err(ShortNameError::BaseTooLong);
            }
            contents[idx] = ch;
            idx += 1;
        }
        if contents[0] == b' ' {
            return Err(ShortNameError::Empty);
        }
        Ok(Self { contents })
    }

    fn check_char(ch: u8) -> Result<u8, ShortNameError> {
        match ch {
            b'a'..=b'z' => Ok(ch.to_ascii_uppercase()),
            b'A'..=b'Z' | b'0'..=b'9' => Ok(ch),
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'(' | b')' | b'-' | b'@' | b'^' | b'_'
            | b'`' | b'{' | b'}' | b'~' => Ok(ch),
            _ => Err(ShortNameError::InvalidCharacter(ch)),
        }
    }

    /// Take the name field of a directory entry as is.
    pub fn from_raw(contents: [u8; 11]) -> Self {
        Self { contents }
    }

    /// The eleven bytes as stored on disk.
    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.contents
    }

    /// The part before the period, without padding.
    pub fn base_name(&self) -> &[u8] {
        trim_padding(&self.contents[0..8])
    }

    /// The part after the period, without padding.
    pub fn extension(&self) -> &[u8] {
        trim_padding(&self.contents[8..11])
    }

    /// Is this "." or ".."?
    pub fn is_dot(&self) -> bool {
        *self == Self::DOT || *self == Self::DOTDOT
    }
}

fn trim_padding(mut name: &[u8]) -> &[u8] {
    while let [rest @ .., b' '] = name {
        name = rest;
    }
    name
}

impl fmt::Display for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, &b) in self.base_name().iter().enumerate() {
            // 0x05 stands in for a leading 0xE5, which marks deleted entries.
            let b = if i == 0 && b == 0x05 { 0xE5 } else { b };
            f.write_char(char::from(b))?;
        }
        let ext = self.extension();
        if !ext.is_empty() {
            f.write_char('.')?;
            for &b in ext {
                f.write_char(char::from(b))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ShortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShortName(\"{}\")", self)
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for ShortName {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "{=[u8]:a}", &self.contents[..])
    }
}

/// Where a directory entry lives: a block and the slot inside it.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct DirLocation {
    pub(crate) block: BlockIdx,
    pub(crate) index: usize,
}

impl DirLocation {
    pub(crate) fn range(&self) -> core::ops::Range<usize> {
        let start = self.index * DirEntryRaw::<&[u8]>::LEN;
        start..start + DirEntryRaw::<&[u8]>::LEN
    }
}

/// A file or directory as seen in its parent directory.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: ShortName,
    attributes: Attributes,
    file_size: u32,
    first_cluster: Cluster,
    created: FatTimestamp,
    modified: FatTimestamp,
    location: DirLocation,
}

impl DirEntry {
    pub(crate) fn from_raw<T>(raw: &DirEntryRaw<T>, fat_type: FatType, location: DirLocation) -> Self
    where
        T: AsRef<[u8]>,
    {
        Self {
            name: ShortName::from_raw(raw.name()),
            attributes: raw.attributes(),
            file_size: raw.file_size(),
            first_cluster: raw.first_cluster(fat_type),
            created: FatTimestamp::from_fat(raw.crt_date(), raw.crt_time()),
            modified: FatTimestamp::from_fat(raw.wrt_date(), raw.wrt_time()),
            location,
        }
    }

    /// The 8.3 name.
    pub fn name(&self) -> &ShortName {
        &self.name
    }

    /// The attribute bits.
    pub fn attributes(&self) -> Attributes {
        self.attributes
    }

    /// Is this a directory?
    pub fn is_dir(&self) -> bool {
        self.attributes.is_dir()
    }

    /// Size in bytes (0 for directories).
    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    /// First cluster of the contents, `Cluster::EMPTY` for empty files.
    pub fn first_cluster(&self) -> Cluster {
        self.first_cluster
    }

    /// Creation time.
    pub fn created(&self) -> FatTimestamp {
        self.created
    }

    /// Last modification time.
    pub fn modified(&self) -> FatTimestamp {
        self.modified
    }

    pub(crate) fn location(&self) -> DirLocation {
        self.location
    }
}

/// Field level access to a 32-byte directory entry.
#[derive(Debug)]
pub struct DirEntryRaw<T> {
    data: T,
}

impl<T> DirEntryRaw<T>
where
    T: AsRef<[u8]>,
{
    /// Size of one entry.
    pub const LEN: usize = 32;

    /// Wrap 32 bytes.
    pub fn new(data: T) -> Self {
        Self { data }
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// The raw name field.
    pub fn name(&self) -> [u8; 11] {
        let mut name = [0u8; 11];
        name.copy_from_slice(&self.data()[0..11]);
        name
    }

    define_field!(attr, u8, 11);
    define_field!(crt_time_tenth, u8, 13);
    define_field!(crt_time, u16, 14);
    define_field!(crt_date, u16, 16);
    define_field!(lst_acc_date, u16, 18);
    define_field!(fst_clus_hi, u16, 20);
    define_field!(wrt_time, u16, 22);
    define_field!(wrt_date, u16, 24);
    define_field!(fst_clus_lo, u16, 26);
    define_field!(file_size, u32, 28);

    /// The attribute bits.
    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_truncate(self.attr())
    }

    /// FAT16 keeps the high half for other uses; it is ignored there.
    pub fn first_cluster(&self, fat_type: FatType) -> Cluster {
        let lo = u32::from(self.fst_clus_lo());
        match fat_type {
            FatType::Fat16 => Cluster(lo),
            FatType::Fat32 => Cluster((u32::from(self.fst_clus_hi()) << 16) | lo),
        }
    }

    /// Marks the end of the directory; all following entries are unused.
    pub fn is_end(&self) -> bool {
        self.data()[0] == 0x00
    }

    /// A deleted entry, free for reuse.
    pub fn is_deleted(&self) -> bool {
        self.data()[0] == 0xE5
    }
}

impl<T> DirEntryRaw<T>
where
    T: AsRef<[u8]> + AsMut<[u8]>,
{
    fn data_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }

    define_field!(set set_name, [u8; 11], 0);
    define_field!(set set_attr, u8, 11);
    define_field!(set set_nt_res, u8, 12);
    define_field!(set set_crt_time_tenth, u8, 13);
    define_field!(set set_crt_time, u16, 14);
    define_field!(set set_crt_date, u16, 16);
    define_field!(set set_lst_acc_date, u16, 18);
    define_field!(set set_fst_clus_hi, u16, 20);
    define_field!(set set_wrt_time, u16, 22);
    define_field!(set set_wrt_date, u16, 24);
    define_field!(set set_fst_clus_lo, u16, 26);
    define_field!(set set_file_size, u32, 28);

    /// Store both halves of the cluster number.
    pub fn set_first_cluster(&mut self, cluster: Cluster) {
        self.set_fst_clus_hi((cluster.0 >> 16) as u16);
        self.set_fst_clus_lo(cluster.0 as u16);
    }

    /// Record a modification at `now`.
    pub fn set_modified(&mut self, now: FatTimestamp) {
        self.set_wrt_time(now.time());
        self.set_wrt_date(now.date());
        self.set_lst_acc_date(now.date());
    }

    /// Fill in a brand new entry.
    pub fn init(&mut self, name: &ShortName, attributes: Attributes, cluster: Cluster, now: FatTimestamp) {
        self.set_name(name.as_bytes());
        self.set_attr(attributes.bits());
        self.set_nt_res(0);
        self.set_crt_time_tenth(0);
        self.set_crt_time(now.time());
        self.set_crt_date(now.date());
        self.set_modified(now);
        self.set_first_cluster(cluster);
        self.set_file_size(0);
    }

    /// Free the entry for reuse.
    pub fn mark_deleted(&mut self) {
        self.data_mut()[0] = 0xE5;
    }
}

/// Which directory: the root, or one that starts at a cluster.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum DirStart {
    Root,
    Cluster(Cluster),
}

impl DirStart {
    /// Directory entries point at the root with cluster 0.
    pub(crate) fn from_entry_cluster(cluster: Cluster) -> Self {
        if cluster.is_allocated() {
            DirStart::Cluster(cluster)
        } else {
            DirStart::Root
        }
    }

    /// The cluster to store in the ".." entry of a child.
    pub(crate) fn dotdot_cluster(&self) -> Cluster {
        match self {
            DirStart::Root => Cluster::EMPTY,
            DirStart::Cluster(cluster) => *cluster,
        }
    }
}

/// Walks the sectors of a directory: a fixed region for the FAT16 root,
/// a cluster chain otherwise.
#[derive(Debug, Clone)]
pub(crate) struct DirSectors {
    fixed: Option<(BlockIdx, u32)>,
    cluster: Cluster,
    next_sector: u32,
}

impl DirSectors {
    pub(crate) fn new(g: &Geometry, start: DirStart) -> Self {
        let (fixed, cluster) = match (start, g.fat_type) {
            (DirStart::Root, FatType::Fat16) => {
                (Some((g.root_dir_start, g.root_dir_sectors)), Cluster::EMPTY)
            }
            (DirStart::Root, FatType::Fat32) => (None, g.root_cluster),
            (DirStart::Cluster(cluster), _) => (None, cluster),
        };
        Self {
            fixed,
            cluster,
            next_sector: 0,
        }
    }

    pub(crate) fn next<BD, TS>(
        &mut self,
        volume: &mut FatVolume<BD, TS>,
        g: &Geometry,
    ) -> Result<Option<BlockIdx>, FatError<BD::Error>>
    where
        BD: BlockDevice,
        TS: TimeSource,
    {
        if let Some((start, count)) = self.fixed {
            if self.next_sector >= count {
                return Ok(None);
            }
            let idx = start + BlockCount(self.next_sector);
            self.next_sector += 1;
            return Ok(Some(idx));
        }
        if !g.is_valid_cluster(self.cluster) {
            return Err(FatError::BadCluster(self.cluster.0));
        }
        if self.next_sector == g.sectors_per_cluster {
            match volume.next_cluster(g, self.cluster)? {
                Some(next) => {
                    self.cluster = next;
                    self.next_sector = 0;
                }
                None => return Ok(None),
            }
        }
        let idx = g.cluster_start(self.cluster) + BlockCount(self.next_sector);
        self.next_sector += 1;
        Ok(Some(idx))
    }

    /// The cluster being walked; `None` for the fixed FAT16 root.
    pub(crate) fn cluster(&self) -> Option<Cluster> {
        match self.fixed {
            Some(_) => None,
            None => Some(self.cluster),
        }
    }
}

/// Walks the 32-byte slots of a directory.
#[derive(Debug, Clone)]
pub(crate) struct EntryCursor {
    sectors: DirSectors,
    block: Option<BlockIdx>,
    index: usize,
}

impl EntryCursor {
    const ENTRIES_PER_BLOCK: usize = 16;

    pub(crate) fn new(g: &Geometry, start: DirStart) -> Self {
        Self {
            sectors: DirSectors::new(g, start),
            block: None,
            index: 0,
        }
    }

    pub(crate) fn next<BD, TS>(
        &mut self,
        volume: &mut FatVolume<BD, TS>,
        g: &Geometry,
    ) -> Result<Option<(DirLocation, [u8; 32])>, FatError<BD::Error>>
    where
        BD: BlockDevice,
        TS: TimeSource,
    {
        let block = match self.block {
            Some(block) if self.index < Self::ENTRIES_PER_BLOCK => block,
            _ => match self.sectors.next(volume, g)? {
                Some(block) => {
                    self.block = Some(block);
                    self.index = 0;
                    block
                }
                None => return Ok(None),
            },
        };
        let location = DirLocation {
            block,
            index: self.index,
        };
        self.index += 1;
        let contents = volume
            .dir_cache
            .load(&mut volume.block_device, block, "read_dir")
            .map_err(FatError::DeviceError)?;
        let mut entry = [0u8; 32];
        entry.copy_from_slice(&contents[location.range()]);
        Ok(Some((location, entry)))
    }
}

/// Lazily yields the entries of one directory. Deleted entries, long name
/// fragments, the volume label and the "." and ".." entries are skipped.
/// Stops at the end of the directory and after the first error.
pub struct DirIter<'a, BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    volume: &'a mut FatVolume<BD, TS>,
    geometry: Geometry,
    cursor: EntryCursor,
    finished: bool,
}

impl<'a, BD, TS> core::fmt::Debug for DirIter<'a, BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DirIter")
            .field("cursor", &self.cursor)
            .field("finished", &self.finished)
            .finish()
    }
}

impl<'a, BD, TS> Iterator for DirIter<'a, BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    type Item = Result<DirEntry, FatError<BD::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let (location, bytes) = match self.cursor.next(self.volume, &self.geometry) {
                Ok(Some(slot)) => slot,
                Ok(None) => break,
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };
            let raw = DirEntryRaw::new(&bytes[..]);
            if raw.is_end() {
                break;
            }
            if is_hidden_slot(&raw) {
                continue;
            }
            return Some(Ok(DirEntry::from_raw(&raw, self.geometry.fat_type, location)));
        }
        self.finished = true;
        None
    }
}

/// Slots that never show up as files: deleted, long name parts, the volume
/// label, "." and "..".
fn is_hidden_slot<T>(raw: &DirEntryRaw<T>) -> bool
where
    T: AsRef<[u8]>,
{
    let attributes = raw.attributes();
    raw.is_deleted()
        || attributes.is_long_name()
        || attributes.is_volume_label()
        || ShortName::from_raw(raw.name()).is_dot()
}

impl<BD, TS> FatVolume<BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    /// Look `name` up in one directory.
    pub(crate) fn find_in_dir(
        &mut self,
        g: &Geometry,
        dir: DirStart,
        name: &ShortName,
    ) -> Result<Option<DirEntry>, FatError<BD::Error>> {
        let mut cursor = EntryCursor::new(g, dir);
        while let Some((location, bytes)) = cursor.next(self, g)? {
            let raw = DirEntryRaw::new(&bytes[..]);
            if raw.is_end() {
                break;
            }
            let attributes = raw.attributes();
            if raw.is_deleted() || attributes.is_long_name() || attributes.is_volume_label() {
                continue;
            }
            if &raw.name() == name.as_bytes() {
                return Ok(Some(DirEntry::from_raw(&raw, g.fat_type, location)));
            }
        }
        Ok(None)
    }

    /// Follow `components` from the root, each of which must be a directory.
    pub(crate) fn resolve_dir(
        &mut self,
        g: &Geometry,
        components: path::Components<'_>,
    ) -> Result<DirStart, FatError<BD::Error>> {
        let mut dir = DirStart::Root;
        for component in components {
            let name = ShortName::new(component).map_err(|_| FatError::InvalidPath)?;
            match self.find_in_dir(g, dir, &name)? {
                Some(entry) if entry.is_dir() => {
                    dir = DirStart::from_entry_cluster(entry.first_cluster())
                }
                Some(_) => return Err(FatError::NotADirectory),
                None => return Err(FatError::NotFound),
            }
        }
        Ok(dir)
    }

    /// Split `path` into its parent directory and final name.
    pub(crate) fn locate(
        &mut self,
        path: &str,
    ) -> Result<(Geometry, DirStart, ShortName), FatError<BD::Error>> {
        let path = self.strip_drive(path)?;
        let g = self.geometry()?;
        let (parent, last) = path::split_last(path);
        let last = last.ok_or(FatError::InvalidPath)?;
        let name = ShortName::new(last).map_err(|_| FatError::InvalidPath)?;
        let dir = self.resolve_dir(&g, path::Components::new(parent))?;
        Ok((g, dir, name))
    }

    /// The first unused slot of a directory. A full cluster chain is
    /// extended by one zeroed cluster; the fixed FAT16 root cannot grow.
    pub(crate) fn find_free_slot(
        &mut self,
        g: &Geometry,
        dir: DirStart,
    ) -> Result<DirLocation, FatError<BD::Error>> {
        let mut cursor = EntryCursor::new(g, dir);
        while let Some((location, bytes)) = cursor.next(self, g)? {
            if bytes[0] == 0x00 || bytes[0] == 0xE5 {
                return Ok(location);
            }
        }
        let last = cursor.sectors.cluster().ok_or(FatError::DirectoryFull)?;
        let fresh = self.alloc_cluster(g, Some(last))?;
        self.zero_cluster(g, fresh)?;
        debug!("directory grew by cluster {}", fresh.0);
        Ok(DirLocation {
            block: g.cluster_start(fresh),
            index: 0,
        })
    }

    /// Edit the directory entry at `location` in place.
    pub(crate) fn update_entry<F>(
        &mut self,
        location: DirLocation,
        f: F,
    ) -> Result<(), FatError<BD::Error>>
    where
        F: FnOnce(&mut DirEntryRaw<&mut [u8]>),
    {
        let block = self
            .dir_cache
            .load_mut(&mut self.block_device, location.block, "update_dir")
            .map_err(FatError::DeviceError)?;
        let mut raw = DirEntryRaw::new(&mut block.contents[location.range()]);
        f(&mut raw);
        Ok(())
    }

    fn dir_is_empty(&mut self, g: &Geometry, dir: DirStart) -> Result<bool, FatError<BD::Error>> {
        let mut cursor = EntryCursor::new(g, dir);
        while let Some((_, bytes)) = cursor.next(self, g)? {
            let raw = DirEntryRaw::new(&bytes[..]);
            if raw.is_end() {
                break;
            }
            if !is_hidden_slot(&raw) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Look up a file or directory.
    pub fn stat(&mut self, path: &str) -> Result<DirEntry, FatError<BD::Error>> {
        let (g, dir, name) = self.locate(path)?;
        self.find_in_dir(&g, dir, &name)?.ok_or(FatError::NotFound)
    }

    /// Does `path` name a file or directory?
    pub fn exists(&mut self, path: &str) -> Result<bool, FatError<BD::Error>> {
        match self.stat(path) {
            Ok(_) => Ok(true),
            Err(FatError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Create a directory. Succeeds without change when it already exists.
    pub fn mkdir(&mut self, path: &str) -> Result<(), FatError<BD::Error>> {
        let (g, parent, name) = self.locate(path)?;
        match self.find_in_dir(&g, parent, &name)? {
            Some(entry) if entry.is_dir() => return Ok(()),
            Some(_) => return Err(FatError::AlreadyExists),
            None if name.is_dot() => return Err(FatError::InvalidPath),
            None => {}
        }
        let now = self.now()?;
        let slot = self.find_free_slot(&g, parent)?;
        let cluster = self.alloc_cluster(&g, None)?;
        self.zero_cluster(&g, cluster)?;

        let first = g.cluster_start(cluster);
        let block = self
            .dir_cache
            .load_mut(&mut self.block_device, first, "mkdir")
            .map_err(FatError::DeviceError)?;
        let (dot, rest) = block.contents.split_at_mut(DirEntryRaw::<&[u8]>::LEN);
        DirEntryRaw::new(dot).init(&ShortName::DOT, Attributes::DIRECTORY, cluster, now);
        DirEntryRaw::new(&mut rest[..DirEntryRaw::<&[u8]>::LEN]).init(
            &ShortName::DOTDOT,
            Attributes::DIRECTORY,
            parent.dotdot_cluster(),
            now,
        );

        self.update_entry(slot, |raw| {
            raw.init(&name, Attributes::DIRECTORY, cluster, now)
        })?;
        debug!("mkdir {} at cluster {}", path, cluster.0);
        self.sync()
    }

    /// Delete a file or an empty directory and free its clusters.
    pub fn remove(&mut self, path: &str) -> Result<(), FatError<BD::Error>> {
        let (g, dir, name) = self.locate(path)?;
        if name.is_dot() {
            return Err(FatError::InvalidPath);
        }
        let entry = self.find_in_dir(&g, dir, &name)?.ok_or(FatError::NotFound)?;
        if self.is_open(entry.location()) {
            return Err(FatError::FileAlreadyOpen);
        }
        if entry.is_dir() && !self.dir_is_empty(&g, DirStart::Cluster(entry.first_cluster()))? {
            return Err(FatError::DirectoryNotEmpty);
        }
        self.update_entry(entry.location(), |raw| raw.mark_deleted())?;
        if entry.first_cluster().is_allocated() {
            self.free_chain(&g, entry.first_cluster())?;
        }
        debug!("removed {}", path);
        self.sync()
    }

    /// Iterate over the entries of the directory at `path` (`""` or `"/"`
    /// for the root). Call again to start over.
    pub fn scan(&mut self, path: &str) -> Result<DirIter<'_, BD, TS>, FatError<BD::Error>> {
        let path = self.strip_drive(path)?;
        let geometry = self.geometry()?;
        let dir = self.resolve_dir(&geometry, path::Components::new(path))?;
        Ok(DirIter {
            volume: self,
            geometry,
            cursor: EntryCursor::new(&geometry, dir),
            finished: false,
        })
    }
}
