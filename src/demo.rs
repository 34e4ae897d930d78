//! sdio-fat - Demo reports
//!
//! The operations behind the data logger's test menu. Each one logs what it
//! does in the firmware's wording, returns the outcome, and never panics.
//! The card tests touch blocks 0 to 10 only, so run them on a card without a
//! file system you care about.

use crate::{
    fat::{DirEntry, FatError, FatVolume, FileHandle, OpenMode, Space, VolumeInfo},
    sample_file::{self, SampleFileError, SampleHeader},
    sdio::{CardInfo, Error, SdCard, SdioHost},
    time::TimeSource,
    Block, BlockDevice, BlockIdx,
};
use embedded_hal::blocking::delay::DelayMs;

use log::{info, warn};

/// Last block `erase_blocks` clears.
pub const ERASE_END: BlockIdx = BlockIdx(10);
/// The block the polled write/read test uses.
pub const TEST_BLOCK: BlockIdx = BlockIdx(5);
/// The block the DMA test uses.
pub const DMA_BLOCK: BlockIdx = BlockIdx(6);
/// What the polled write test stores, NUL terminated on the card.
pub const GREETING: &str = "Hello, welcome to UPC";

const SEPARATOR: &str = "--------------------------------";

/// Log the card description.
pub fn show_card_info<H, D>(sd: &mut SdCard<H, D>) -> Result<CardInfo, Error>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    let card = match sd.card_info() {
        Ok(card) => card,
        Err(e) => {
            warn!("HAL_SD_GetCardInfo() error! {:?}", e);
            return Err(e);
        }
    };
    info!("*** HAL_SD_GetCardInfo() info ***");
    info!("Card Type = {}", card.card_type.code());
    info!("Card Version = {}", card.card_version.code());
    info!("Relative Card Address = {}", card.relative_address);
    info!("Block Count = {}", card.block_count);
    info!("Block Size(Bytes) = {}", card.block_size);
    info!("Logic Block Count = {}", card.logical_block_count);
    info!("Logic Block Size = {}", card.logical_block_size);
    info!("SD Card Capacity(MB) = {}", card.capacity_mb());
    Ok(card)
}

/// Erase blocks 0 to 10 and wait for the card.
pub fn erase_blocks<H, D>(sd: &mut SdCard<H, D>) -> Result<(), Error>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    info!("*** Erasing blocks ***");
    if let Err(e) = sd.erase(BlockIdx(0), ERASE_END) {
        warn!("Erase blocks error: {:?}", e);
        return Err(e);
    }
    info!("Erase blocks success");
    info!("GetCardState() = {}", sd.card_state().code());
    info!("Blocks 0-{} is erased.", ERASE_END.0);
    Ok(())
}

/// Write [`GREETING`] to block 5 with a polled transfer.
pub fn test_write<H, D>(sd: &mut SdCard<H, D>) -> Result<(), Error>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    info!("*** Writing blocks ***");
    let mut block = Block::new();
    block.contents[..GREETING.len()].copy_from_slice(GREETING.as_bytes());
    let timeout = sd.config().transfer_timeout_ms;
    match sd.write_blocks(core::slice::from_ref(&block), TEST_BLOCK, timeout) {
        Ok(()) => {
            info!("Write to Block {} is OK", TEST_BLOCK.0);
            info!("The string is : {}", GREETING);
            Ok(())
        }
        Err(e) => {
            warn!("Write to Block {} is error: {:?}", TEST_BLOCK.0, e);
            Err(e)
        }
    }
}

/// Read block 5 back and log the string in it.
pub fn test_read<H, D>(sd: &mut SdCard<H, D>) -> Result<Block, Error>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    info!("*** Reading blocks ***");
    let mut block = Block::new();
    let timeout = sd.config().transfer_timeout_ms;
    match sd.read_blocks(core::slice::from_mut(&mut block), TEST_BLOCK, timeout) {
        Ok(()) => {
            info!("Read Block {} is OK", TEST_BLOCK.0);
            match c_string(&block) {
                Some(text) => info!("The string is : {}", text),
                None => info!("The block holds no text"),
            }
            Ok(block)
        }
        Err(e) => {
            warn!("Read Block {} is error: {:?}", TEST_BLOCK.0, e);
            Err(e)
        }
    }
}

/// The text up to the first NUL, if it is UTF-8.
pub fn c_string(block: &Block) -> Option<&str> {
    let end = block
        .contents
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(Block::LEN);
    core::str::from_utf8(&block.contents[..end]).ok()
}

/// Fill `block` with the DMA test pattern: byte `i` holds `i` (mod 256).
pub fn dma_pattern(block: &mut Block) {
    for (i, b) in block.contents.iter_mut().enumerate() {
        *b = i as u8;
    }
}

/// Fill `buffer` with the test pattern and start writing it to block 6. The result arrives through
/// [`SdCard::dispatch_completion`].
pub fn start_dma_write<H, D>(
    sd: &mut SdCard<H, D>,
    mut buffer: H::DmaBuffer,
) -> Result<(), (Error, H::DmaBuffer)>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    info!("*** DMA Writing blocks ***");
    for block in buffer.as_mut().iter_mut() {
        dma_pattern(block);
    }
    if let Some(first) = buffer.as_ref().first() {
        let w = &first.contents[10..15];
        info!("Writing block {}", DMA_BLOCK.0);
        info!("Data in [10:15] is: {},{},{},{},{}", w[0], w[1], w[2], w[3], w[4]);
    }
    info!("HAL_SD_WriteBlocks_DMA() is called");
    sd.write_blocks_dma(buffer, DMA_BLOCK).map_err(|(e, buffer)| {
        warn!("DMA write refused: {:?}", e);
        (e, buffer)
    })
}

/// Start reading block 6 into `buffer`.
pub fn start_dma_read<H, D>(
    sd: &mut SdCard<H, D>,
    buffer: H::DmaBuffer,
) -> Result<(), (Error, H::DmaBuffer)>
where
    H: SdioHost,
    D: DelayMs<u32>,
{
    info!("*** DMA Reading blocks ***");
    info!("HAL_SD_ReadBlocks_DMA() is called");
    sd.read_blocks_dma(buffer, DMA_BLOCK).map_err(|(e, buffer)| {
        warn!("DMA read refused: {:?}", e);
        (e, buffer)
    })
}

/// Log size and free space of the volume.
pub fn report_disk_info<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
) -> Result<VolumeInfo, FatError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    let disk = match volume.disk_info() {
        Ok(disk) => disk,
        Err(e) => {
            warn!("f_getfree() error: {:?}", e);
            return Err(e);
        }
    };
    info!("*** FAT disk info ***");
    info!("FAT type = {}", disk.fat_type.code());
    info!("[1=FAT12,2=FAT16,3=FAT32,4=EXFAT]");
    info!("Sector size(bytes) = {}", disk.sector_size);
    info!("Cluster size(sectors) = {}", disk.sectors_per_cluster);
    info!("Total cluster count = {}", disk.total_clusters);
    info!("Total sector count = {}", disk.total_sectors());
    log_space("Total", disk.total_space());
    info!("Free cluster count = {}", disk.free_clusters);
    info!("Free sector count = {}", disk.free_sectors());
    log_space("Free", disk.free_space());
    info!("Get FAT disk info OK");
    Ok(disk)
}

fn log_space(what: &str, space: Space) {
    match space {
        Space::MiB(n) => info!("{} space(MB) = {}", what, n),
        Space::KiB(n) => info!("{} space(KB) = {}", what, n),
    }
}

/// List a directory. Returns the number of entries.
pub fn report_dir<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    path: &str,
) -> Result<usize, FatError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    let entries = match volume.scan(path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to open directory: {} ({:?})", path, e);
            return Err(e);
        }
    };
    info!("All entries in dir {}", path);
    info!("{}", SEPARATOR);
    let mut count = 0;
    for entry in entries {
        match entry {
            Ok(entry) if entry.is_dir() => info!("DIR   {}", entry.name()),
            Ok(entry) => info!("FILE  {}", entry.name()),
            Err(e) => {
                warn!("Scan dir stopped: {:?}", e);
                return Err(e);
            }
        }
        count += 1;
    }
    info!("{}", SEPARATOR);
    info!("Scan dir OK");
    Ok(count)
}

/// Create (or overwrite) the three line text file.
pub fn write_txt_file<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    path: &str,
    year: u16,
    month: u8,
    day: u8,
) -> Result<(), FatError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    let result = volume.with_file(path, OpenMode::CreateAlways, |volume, file| {
        volume.write_line(file, "Line1: Hello FatFS")?;
        volume.write_line(file, "Line2: UPC, Qingdao")?;
        volume.write_fmt(
            file,
            format_args!("Line3: Date={:04}-{:02}-{:02}\n", year, month, day),
        )?;
        Ok(())
    });
    match &result {
        Ok(()) => info!("Successfully wrote to TXT file: {}", path),
        Err(e) => warn!("Error: Failed to write TXT file: {} ({:?})", path, e),
    }
    result
}

/// Create (or overwrite) a sample file of `point_count` demo samples.
pub fn write_bin_file<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    path: &str,
    point_count: u32,
    frequency: u32,
) -> Result<SampleHeader, SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    let result = write_samples_to(volume, path, point_count, frequency);
    match &result {
        Ok(_) => info!("Successfully wrote to BIN file: {}", path),
        Err(e) => warn!("Error: Failed to write BIN file: {} ({:?})", path, e),
    }
    result
}

fn write_samples_to<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    path: &str,
    point_count: u32,
    frequency: u32,
) -> Result<SampleHeader, SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    let file = volume.open(path, OpenMode::CreateAlways)?;
    let written = sample_file::write_samples(
        volume,
        &file,
        frequency,
        (0..point_count).map(sample_file::demo_sample),
    );
    let closed = volume.close(file);
    let header = written?;
    closed?;
    Ok(header)
}

/// Log a text file line by line. Returns the number of lines.
pub fn read_txt_file<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    path: &str,
) -> Result<usize, FatError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    info!("Reading TXT file: {}", path);
    info!("{}", SEPARATOR);
    let file = match volume.open(path, OpenMode::ReadOnly) {
        Ok(file) => file,
        Err(e) => {
            log_open_error(path, &e);
            return Err(e);
        }
    };
    let mut count = 0;
    let mut failure = None;
    for line in volume.lines(&file) {
        match line {
            Ok(line) => {
                match core::str::from_utf8(line.trim_end()) {
                    Ok(text) => info!("{}", text),
                    Err(_) => info!("{:?}", line.trim_end()),
                }
                count += 1;
            }
            Err(e) => failure = Some(e),
        }
    }
    let closed = volume.close(file);
    if let Some(e) = failure {
        warn!("Error reading {}: {:?}", path, e);
        return Err(e);
    }
    closed?;
    info!("{}", SEPARATOR);
    info!("TXT file read completed");
    Ok(count)
}

/// Log the header of a sample file and samples 5 and 16.
pub fn read_bin_file<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    path: &str,
) -> Result<SampleHeader, SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    info!("Reading BIN file: {}", path);
    info!("{}", SEPARATOR);
    let file = match volume.open(path, OpenMode::ReadOnly) {
        Ok(file) => file,
        Err(e) => {
            log_open_error(path, &e);
            return Err(e.into());
        }
    };
    let result = read_samples_from(volume, &file);
    let closed = volume.close(file);
    let header = match result {
        Ok(header) => header,
        Err(e) => {
            warn!("Error reading {}: {:?}", path, e);
            return Err(e);
        }
    };
    closed?;
    info!("{}", SEPARATOR);
    info!("BIN file read completed");
    Ok(header)
}

fn read_samples_from<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    file: &FileHandle,
) -> Result<SampleHeader, SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    let header = sample_file::read_header(volume, file)?;
    info!(
        "Header: {}",
        core::str::from_utf8(sample_file::IDENTIFIER)
            .unwrap_or("")
            .trim_end()
    );
    info!("Point count: {}", header.point_count);
    info!("Sampling frequency: {}", header.frequency);

    let mut chunk = [0u32; 16];
    let mut index = 0usize;
    info!("Sample values:");
    loop {
        let n = sample_file::read_samples(volume, file, &mut chunk)?;
        if n == 0 {
            break;
        }
        for (offset, value) in chunk[..n].iter().enumerate() {
            let i = index + offset;
            if i == 5 || i == 16 {
                info!("  value[{}] = {}", i, value);
            }
        }
        index += n;
    }
    if index != header.point_count as usize {
        warn!("expected {} samples, found {}", header.point_count, index);
        return Err(SampleFileError::Truncated);
    }
    Ok(header)
}

/// Log size, attributes, name and modification time of a file.
pub fn file_info<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    path: &str,
) -> Result<DirEntry, FatError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    info!("File info of: {}", path);
    info!("{}", SEPARATOR);
    let entry = match volume.stat(path) {
        Ok(entry) => entry,
        Err(e) => {
            log_open_error(path, &e);
            return Err(e);
        }
    };
    let modified = entry.modified();
    info!("File size(bytes) = {}", entry.file_size());
    info!("File attribute = 0x{:X}", entry.attributes().bits());
    info!("File name = {}", entry.name());
    info!(
        "File Date = {:04}-{:02}-{:02}",
        modified.year(),
        modified.month(),
        modified.day()
    );
    info!(
        "File Time = {:02}:{:02}:{:02}",
        modified.hours(),
        modified.minutes(),
        modified.seconds()
    );
    info!("{}", SEPARATOR);
    info!("File info retrieved successfully");
    Ok(entry)
}

/// The demo's "Write files" menu entry: four files and two directories.
pub fn write_demo_files<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
) -> Result<(), SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    write_txt_file(volume, "readme.txt", 2019, 3, 5)?;
    write_txt_file(volume, "help.txt", 2016, 11, 15)?;
    write_bin_file(volume, "ADC500.dat", 20, 500)?;
    write_bin_file(volume, "ADC1000.dat", 50, 1000)?;
    for dir in &["0:/SubDir1", "0:/MyDocs"] {
        volume.mkdir(dir)?;
        info!("Created directory: {}", dir);
    }
    Ok(())
}

fn log_open_error<E>(path: &str, e: &FatError<E>)
where
    E: core::fmt::Debug,
{
    match e {
        FatError::NotFound => warn!("Error: File {} does not exist", path),
        other => warn!("Error: Failed to open file {} ({:?})", path, other),
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
