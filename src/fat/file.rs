//! Open files: handles, byte and line I/O.

use core::fmt;

use crate::{time::TimeSource, Block, BlockCount, BlockDevice, BlockIdx};

use super::{
    cluster::Cluster,
    directory::{Attributes, DirLocation},
    FatError, FatVolume, Geometry,
};

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// How many files can be open at once.
pub const MAX_OPEN_FILES: usize = 4;

/// How to open a file.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file, or truncate it to zero length if it exists.
    CreateAlways,
    /// Open an existing file for reading only.
    ReadOnly,
    /// Open or create the file and start writing at its end.
    Append,
}

impl OpenMode {
    fn writable(self) -> bool {
        self != OpenMode::ReadOnly
    }
}

/// Refers to an open file. Not `Clone`: `close` takes it by value, so a
/// closed file cannot be used again.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, PartialEq, Eq)]
pub struct FileHandle {
    id: u32,
    slot: usize,
}

impl FileHandle {
    /// Unique number of this open file.
    pub fn id(&self) -> u32 {
        self.id
    }
}

/// The state of one open file.
#[derive(Debug)]
pub(crate) struct File {
    id: u32,
    mode: OpenMode,
    entry: DirLocation,
    first_cluster: Option<Cluster>,
    size: u32,
    position: u32,
    // Cluster number of the `.0`th cluster of the file, so sequential
    // access does not walk the chain from the start every time.
    cluster: Option<(u32, Cluster)>,
    buffer: Block,
    buffer_idx: Option<BlockIdx>,
    buffer_dirty: bool,
    entry_dirty: bool,
}

impl File {
    fn new(mode: OpenMode, entry: DirLocation, first_cluster: Cluster, size: u32) -> Self {
        Self {
            id: 0,
            mode,
            entry,
            first_cluster: if first_cluster.is_allocated() {
                Some(first_cluster)
            } else {
                None
            },
            size,
            position: if mode == OpenMode::Append { size } else { 0 },
            cluster: None,
            buffer: Block::new(),
            buffer_idx: None,
            buffer_dirty: false,
            entry_dirty: false,
        }
    }

    pub(crate) fn entry(&self) -> DirLocation {
        self.entry
    }
}

/// Longest line `lines` yields in one piece.
pub const LINE_CAPACITY: usize = 128;

/// One line of a text file, including its `\n` unless the line was longer
/// than [`LINE_CAPACITY`] or the file ended first.
#[derive(Clone)]
pub struct Line {
    contents: [u8; LINE_CAPACITY],
    len: usize,
}

impl Line {
    fn new() -> Self {
        Self {
            contents: [0u8; LINE_CAPACITY],
            len: 0,
        }
    }

    /// The bytes as read.
    pub fn as_bytes(&self) -> &[u8] {
        &self.contents[..self.len]
    }

    /// The line as text, if it is valid UTF-8.
    pub fn as_str(&self) -> Result<&str, core::str::Utf8Error> {
        core::str::from_utf8(self.as_bytes())
    }

    /// The bytes without the trailing `\n` or `\r\n`.
    pub fn trim_end(&self) -> &[u8] {
        let mut bytes = self.as_bytes();
        if let [rest @ .., b'\n'] = bytes {
            bytes = rest;
        }
        if let [rest @ .., b'\r'] = bytes {
            bytes = rest;
        }
        bytes
    }

    /// Does this piece end a line?
    pub fn is_complete(&self) -> bool {
        self.as_bytes().last() == Some(&b'\n')
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Ok(text) => write!(f, "Line({:?})", text),
            Err(_) => write!(f, "Line({:?})", self.as_bytes()),
        }
    }
}

/// Reads a file line by line. Ends at the end of the file or after the
/// first error.
pub struct Lines<'a, BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    volume: &'a mut FatVolume<BD, TS>,
    handle: &'a FileHandle,
    finished: bool,
}

impl<'a, BD, TS> Iterator for Lines<'a, BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    type Item = Result<Line, FatError<BD::Error>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut line = Line::new();
        match self.volume.read_line(self.handle, &mut line.contents) {
            Ok(0) => {
                self.finished = true;
                None
            }
            Ok(len) => {
                line.len = len;
                Some(Ok(line))
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Lets `core::fmt` write straight into a file.
struct FileWriter<'a, BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    volume: &'a mut FatVolume<BD, TS>,
    handle: &'a FileHandle,
    written: usize,
    error: Option<FatError<BD::Error>>,
}

impl<'a, BD, TS> fmt::Write for FileWriter<'a, BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    fn write_str(&mut self, s: &str) -> fmt::Result {
        match self.volume.write(self.handle, s.as_bytes()) {
            Ok(n) => {
                self.written += n;
                if n == s.len() {
                    Ok(())
                } else {
                    self.error = Some(FatError::DiskFull);
                    Err(fmt::Error)
                }
            }
            Err(e) => {
                self.error = Some(e);
                Err(fmt::Error)
            }
        }
    }
}

impl<BD, TS> FatVolume<BD, TS>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    pub(crate) const NO_FILE: Option<File> = None;

    pub(crate) fn is_open(&self, entry: DirLocation) -> bool {
        self.files.iter().flatten().any(|f| f.entry() == entry)
    }

    /// Number of files currently open.
    pub fn open_files(&self) -> usize {
        self.files.iter().flatten().count()
    }

    /// Open the file at `path`.
    pub fn open(&mut self, path: &str, mode: OpenMode) -> Result<FileHandle, FatError<BD::Error>> {
        let (g, dir, name) = self.locate(path)?;
        let slot = self
            .files
            .iter()
            .position(Option::is_none)
            .ok_or(FatError::TooManyOpenFiles)?;
        let existing = self.find_in_dir(&g, dir, &name)?;
        if let Some(entry) = &existing {
            if entry.is_dir() {
                return Err(FatError::IsADirectory);
            }
            if self.is_open(entry.location()) {
                return Err(FatError::FileAlreadyOpen);
            }
        }

        let mut file = match (mode, existing) {
            (OpenMode::ReadOnly, None) => return Err(FatError::NotFound),
            (OpenMode::ReadOnly, Some(entry)) | (OpenMode::Append, Some(entry)) => {
                File::new(mode, entry.location(), entry.first_cluster(), entry.file_size())
            }
            (OpenMode::CreateAlways, Some(entry)) => {
                let now = self.now()?;
                if entry.first_cluster().is_allocated() {
                    self.free_chain(&g, entry.first_cluster())?;
                }
                self.update_entry(entry.location(), |raw| {
                    raw.set_first_cluster(Cluster::EMPTY);
                    raw.set_file_size(0);
                    raw.set_modified(now);
                    raw.set_attr(raw.attr() | Attributes::ARCHIVE.bits());
                })?;
                File::new(mode, entry.location(), Cluster::EMPTY, 0)
            }
            (_, None) => {
                if name.is_dot() {
                    return Err(FatError::InvalidPath);
                }
                let now = self.now()?;
                let location = self.find_free_slot(&g, dir)?;
                self.update_entry(location, |raw| {
                    raw.init(&name, Attributes::ARCHIVE, Cluster::EMPTY, now)
                })?;
                File::new(mode, location, Cluster::EMPTY, 0)
            }
        };
        self.sync()?;

        self.next_file_id = self.next_file_id.wrapping_add(1);
        file.id = self.next_file_id;
        debug!("opened {} as file {} ({:?})", path, file.id, mode);
        let handle = FileHandle { id: file.id, slot };
        self.files[slot] = Some(file);
        Ok(handle)
    }

    fn take_file(&mut self, handle: &FileHandle) -> Result<File, FatError<BD::Error>> {
        let slot = self
            .files
            .get_mut(handle.slot)
            .ok_or(FatError::InvalidHandle)?;
        match slot {
            Some(file) if file.id == handle.id => {}
            _ => return Err(FatError::InvalidHandle),
        }
        slot.take().ok_or(FatError::InvalidHandle)
    }

    fn file_ref(&self, handle: &FileHandle) -> Result<&File, FatError<BD::Error>> {
        match self.files.get(handle.slot) {
            Some(Some(file)) if file.id == handle.id => Ok(file),
            _ => Err(FatError::InvalidHandle),
        }
    }

    /// Run `f` on the file behind `handle`. The file is moved out of its
    /// slot meanwhile so `f` can borrow the volume freely.
    fn with_open_file<R, F>(&mut self, handle: &FileHandle, f: F) -> Result<R, FatError<BD::Error>>
    where
        F: FnOnce(&mut Self, &Geometry, &mut File) -> Result<R, FatError<BD::Error>>,
    {
        let g = self.geometry()?;
        let mut file = self.take_file(handle)?;
        let result = f(self, &g, &mut file);
        self.files[handle.slot] = Some(file);
        result
    }

    /// The cluster holding byte `index * cluster_bytes` of the file,
    /// optionally growing the chain to reach it.
    fn file_cluster(
        &mut self,
        g: &Geometry,
        file: &mut File,
        index: u32,
        allocate: bool,
    ) -> Result<Cluster, FatError<BD::Error>> {
        let (mut at, mut cluster) = match (file.cluster, file.first_cluster) {
            (Some((at, cluster)), _) if at <= index => (at, cluster),
            (_, Some(first)) => (0, first),
            (_, None) => {
                if !allocate {
                    return Err(FatError::ReadFailed);
                }
                let first = self.alloc_cluster(g, None)?;
                file.first_cluster = Some(first);
                file.entry_dirty = true;
                (0, first)
            }
        };
        while at < index {
            cluster = match self.next_cluster(g, cluster)? {
                Some(next) => next,
                None if allocate => self.alloc_cluster(g, Some(cluster))?,
                None => {
                    warn!("file {} is shorter than its size", file.id);
                    return Err(FatError::ReadFailed);
                }
            };
            at += 1;
        }
        file.cluster = Some((index, cluster));
        Ok(cluster)
    }

    /// The block holding the byte at the file position.
    fn file_block(
        &mut self,
        g: &Geometry,
        file: &mut File,
        allocate: bool,
    ) -> Result<BlockIdx, FatError<BD::Error>> {
        let cluster_bytes = g.cluster_bytes();
        let cluster = self.file_cluster(g, file, file.position / cluster_bytes, allocate)?;
        let sector = (file.position % cluster_bytes) / Block::LEN_U32;
        Ok(g.cluster_start(cluster) + BlockCount(sector))
    }

    fn flush_file_buffer(&mut self, file: &mut File) -> Result<(), FatError<BD::Error>> {
        if let (true, Some(idx)) = (file.buffer_dirty, file.buffer_idx) {
            trace!("file {}: write back block {}", file.id, idx.0);
            self.block_device
                .write(core::slice::from_ref(&file.buffer), idx)
                .map_err(FatError::DeviceError)?;
            file.buffer_dirty = false;
        }
        Ok(())
    }

    /// Bring block `idx` into the file buffer. A `fresh` block lies wholly
    /// past the end of the file and need not be read.
    fn load_file_block(
        &mut self,
        file: &mut File,
        idx: BlockIdx,
        fresh: bool,
    ) -> Result<(), FatError<BD::Error>> {
        if file.buffer_idx == Some(idx) {
            return Ok(());
        }
        self.flush_file_buffer(file)?;
        file.buffer_idx = None;
        if fresh {
            file.buffer = Block::new();
        } else {
            self.block_device
                .read(core::slice::from_mut(&mut file.buffer), idx, "read_file")
                .map_err(FatError::DeviceError)?;
        }
        file.buffer_idx = Some(idx);
        Ok(())
    }

    fn read_file(
        &mut self,
        g: &Geometry,
        file: &mut File,
        buf: &mut [u8],
        stop_at_newline: bool,
    ) -> Result<usize, FatError<BD::Error>> {
        let mut done = 0;
        while done < buf.len() && file.position < file.size {
            let idx = self.file_block(g, file, false)?;
            self.load_file_block(file, idx, false)?;
            let offset = (file.position % Block::LEN_U32) as usize;
            let remaining = (file.size - file.position) as usize;
            let mut n = (Block::LEN - offset).min(buf.len() - done).min(remaining);
            let mut found_newline = false;
            if stop_at_newline {
                if let Some(nl) = file.buffer[offset..offset + n].iter().position(|&b| b == b'\n') {
                    n = nl + 1;
                    found_newline = true;
                }
            }
            buf[done..done + n].copy_from_slice(&file.buffer[offset..offset + n]);
            done += n;
            file.position += n as u32;
            if found_newline {
                break;
            }
        }
        Ok(done)
    }

    fn write_file(
        &mut self,
        g: &Geometry,
        file: &mut File,
        data: &[u8],
    ) -> Result<usize, FatError<BD::Error>> {
        if !file.mode.writable() {
            return Err(FatError::WriteFailed);
        }
        let mut done = 0;
        while done < data.len() {
            let room = (u32::MAX - file.position) as usize;
            if room == 0 {
                break;
            }
            let idx = match self.file_block(g, file, true) {
                Ok(idx) => idx,
                Err(FatError::DiskFull) if done > 0 => break,
                Err(e) => return Err(e),
            };
            let offset = (file.position % Block::LEN_U32) as usize;
            let fresh = offset == 0 && file.position >= file.size;
            self.load_file_block(file, idx, fresh)?;
            let n = (Block::LEN - offset).min(data.len() - done).min(room);
            file.buffer[offset..offset + n].copy_from_slice(&data[done..done + n]);
            file.buffer_dirty = true;
            done += n;
            file.position += n as u32;
            if file.position > file.size {
                file.size = file.position;
            }
            file.entry_dirty = true;
        }
        Ok(done)
    }

    fn flush_file(&mut self, file: &mut File) -> Result<(), FatError<BD::Error>> {
        self.flush_file_buffer(file)?;
        let mut clock = Ok(());
        if file.entry_dirty {
            // Size and first cluster are recorded even without a time stamp,
            // otherwise the chain would be lost.
            let now = match self.now() {
                Ok(now) => Some(now),
                Err(e) => {
                    clock = Err(e);
                    None
                }
            };
            let first = file.first_cluster.unwrap_or(Cluster::EMPTY);
            let size = file.size;
            self.update_entry(file.entry, |raw| {
                raw.set_first_cluster(first);
                raw.set_file_size(size);
                if let Some(now) = now {
                    raw.set_modified(now);
                }
                raw.set_attr(raw.attr() | Attributes::ARCHIVE.bits());
            })?;
            file.entry_dirty = false;
        }
        self.sync()?;
        clock
    }

    /// Read up to `buf.len()` bytes. Returns 0 at the end of the file.
    pub fn read(&mut self, handle: &FileHandle, buf: &mut [u8]) -> Result<usize, FatError<BD::Error>> {
        self.with_open_file(handle, |volume, g, file| volume.read_file(g, file, buf, false))
    }

    /// Read one line into `buf`: up to and including the next `\n`, or until
    /// `buf` is full. Returns 0 at the end of the file.
    pub fn read_line(
        &mut self,
        handle: &FileHandle,
        buf: &mut [u8],
    ) -> Result<usize, FatError<BD::Error>> {
        self.with_open_file(handle, |volume, g, file| volume.read_file(g, file, buf, true))
    }

    /// Iterate over the remaining lines of the file.
    pub fn lines<'a>(&'a mut self, handle: &'a FileHandle) -> Lines<'a, BD, TS> {
        Lines {
            volume: self,
            handle,
            finished: false,
        }
    }

    /// Write `data` at the file position. Returns how many bytes were
    /// written, which is less than `data.len()` only when the disk is full.
    pub fn write(&mut self, handle: &FileHandle, data: &[u8]) -> Result<usize, FatError<BD::Error>> {
        self.with_open_file(handle, |volume, g, file| volume.write_file(g, file, data))
    }

    /// Write `text` followed by `\n`.
    pub fn write_line(&mut self, handle: &FileHandle, text: &str) -> Result<usize, FatError<BD::Error>> {
        let mut written = self.write(handle, text.as_bytes())?;
        if written == text.len() {
            written += self.write(handle, b"\n")?;
        }
        if written == text.len() + 1 {
            Ok(written)
        } else {
            Err(FatError::DiskFull)
        }
    }

    /// Write formatted text, e.g. `volume.write_fmt(&h, format_args!("n={}\n", n))`.
    pub fn write_fmt(
        &mut self,
        handle: &FileHandle,
        args: fmt::Arguments<'_>,
    ) -> Result<usize, FatError<BD::Error>> {
        let mut writer = FileWriter {
            volume: self,
            handle,
            written: 0,
            error: None,
        };
        match fmt::write(&mut writer, args) {
            Ok(()) => Ok(writer.written),
            Err(_) => Err(writer.error.take().unwrap_or(FatError::WriteFailed)),
        }
    }

    /// Has the position reached the end of the file?
    pub fn is_eof(&self, handle: &FileHandle) -> Result<bool, FatError<BD::Error>> {
        let file = self.file_ref(handle)?;
        Ok(file.position >= file.size)
    }

    /// The byte offset of the next read or write.
    pub fn position(&self, handle: &FileHandle) -> Result<u32, FatError<BD::Error>> {
        Ok(self.file_ref(handle)?.position)
    }

    /// The current size in bytes.
    pub fn file_size(&self, handle: &FileHandle) -> Result<u32, FatError<BD::Error>> {
        Ok(self.file_ref(handle)?.size)
    }

    /// Move the position. It may not go past the end of the file.
    pub fn seek(&mut self, handle: &FileHandle, position: u32) -> Result<(), FatError<BD::Error>> {
        self.with_open_file(handle, |_, _, file| {
            if position > file.size {
                return Err(FatError::InvalidSeek);
            }
            file.position = position;
            Ok(())
        })
    }

    /// Write cached data and the directory entry to the card.
    pub fn flush(&mut self, handle: &FileHandle) -> Result<(), FatError<BD::Error>> {
        self.with_open_file(handle, |volume, _, file| volume.flush_file(file))
    }

    /// Flush and close the file. The handle is released even when the flush
    /// fails.
    pub fn close(&mut self, handle: FileHandle) -> Result<(), FatError<BD::Error>> {
        let mut file = self.take_file(&handle)?;
        debug!("closing file {}", file.id);
        self.flush_file(&mut file)
    }

    /// Open `path`, run `f` on it and close it again, whatever `f` returns.
    pub fn with_file<R, F>(&mut self, path: &str, mode: OpenMode, f: F) -> Result<R, FatError<BD::Error>>
    where
        F: FnOnce(&mut Self, &FileHandle) -> Result<R, FatError<BD::Error>>,
    {
        let handle = self.open(path, mode)?;
        let result = f(self, &handle);
        let closed = self.close(handle);
        let value = result?;
        closed?;
        Ok(value)
    }
}
