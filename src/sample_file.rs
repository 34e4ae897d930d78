//! sdio-fat - ADC sample files
//!
//! The binary log format the data logger writes:
//!
//! ```text
//! "ADC1-IN5\n"             identifier line
//! u32 LE                   number of points
//! u32 LE                   sampling frequency in Hz
//! u32 LE * points          the samples
//! ```

use core::convert::TryFrom;

use crate::{
    fat::{FatError, FatVolume, FileHandle},
    time::TimeSource,
    BlockDevice,
};

#[cfg(feature = "log")]
use log::{debug, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, warn};

/// The identifier line every sample file starts with.
pub const IDENTIFIER: &[u8] = b"ADC1-IN5\n";

/// Errors reading or writing a sample file.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleFileError<E> {
    /// The file system failed
    Fat(FatError<E>),
    /// The file does not start with [`IDENTIFIER`]
    BadIdentifier,
    /// The file ends before the header or a sample is complete
    Truncated,
    /// More samples than a FAT file can hold
    TooManySamples,
}

impl<E> From<FatError<E>> for SampleFileError<E> {
    fn from(e: FatError<E>) -> Self {
        Self::Fat(e)
    }
}

/// The fields after the identifier line.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SampleHeader {
    /// Number of samples that follow
    pub point_count: u32,
    /// Sampling frequency in Hz
    pub frequency: u32,
}

impl SampleHeader {
    /// Size of the header on disk, identifier included.
    pub const LEN: usize = IDENTIFIER.len() + 8;

    /// Size of the whole file on disk, `None` past the 4 GiB FAT limit.
    pub fn file_len(&self) -> Option<u32> {
        self.point_count
            .checked_mul(4)?
            .checked_add(Self::LEN as u32)
    }
}

/// The value the demo logger stores as sample `index`.
pub fn demo_sample(index: u32) -> u32 {
    1000 + index
}

/// Write a complete sample file to `handle`, which should be freshly created.
pub fn write_samples<BD, TS, I>(
    volume: &mut FatVolume<BD, TS>,
    handle: &FileHandle,
    frequency: u32,
    samples: I,
) -> Result<SampleHeader, SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
    I: ExactSizeIterator<Item = u32>,
{
    let header = SampleHeader {
        point_count: u32::try_from(samples.len()).map_err(|_| SampleFileError::TooManySamples)?,
        frequency,
    };
    if header.file_len().is_none() {
        return Err(SampleFileError::TooManySamples);
    }
    write_all(volume, handle, IDENTIFIER)?;
    write_all(volume, handle, &header.point_count.to_le_bytes())?;
    write_all(volume, handle, &header.frequency.to_le_bytes())?;
    for sample in samples {
        write_all(volume, handle, &sample.to_le_bytes())?;
    }
    debug!(
        "wrote {} samples at {} Hz",
        header.point_count, header.frequency
    );
    Ok(header)
}

/// Read and check the header. Leaves the position at the first sample.
pub fn read_header<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    handle: &FileHandle,
) -> Result<SampleHeader, SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    let mut identifier = [0u8; IDENTIFIER.len()];
    read_exact(volume, handle, &mut identifier)?;
    if identifier[..] != *IDENTIFIER {
        warn!("not a sample file");
        return Err(SampleFileError::BadIdentifier);
    }
    Ok(SampleHeader {
        point_count: read_u32(volume, handle)?,
        frequency: read_u32(volume, handle)?,
    })
}

/// Read the next `out.len()` samples, or fewer when the file has fewer left.
/// Returns how many were read.
pub fn read_samples<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    handle: &FileHandle,
    out: &mut [u32],
) -> Result<usize, SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    for (count, slot) in out.iter_mut().enumerate() {
        if volume.is_eof(handle)? {
            return Ok(count);
        }
        *slot = read_u32(volume, handle)?;
    }
    Ok(out.len())
}

fn read_u32<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    handle: &FileHandle,
) -> Result<u32, SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    let mut bytes = [0u8; 4];
    read_exact(volume, handle, &mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_exact<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    handle: &FileHandle,
    mut buf: &mut [u8],
) -> Result<(), SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    while !buf.is_empty() {
        match volume.read(handle, buf)? {
            0 => return Err(SampleFileError::Truncated),
            n => buf = &mut buf[n..],
        }
    }
    Ok(())
}

fn write_all<BD, TS>(
    volume: &mut FatVolume<BD, TS>,
    handle: &FileHandle,
    data: &[u8],
) -> Result<(), SampleFileError<BD::Error>>
where
    BD: BlockDevice,
    TS: TimeSource,
{
    if volume.write(handle, data)? != data.len() {
        return Err(SampleFileError::Fat(FatError::DiskFull));
    }
    Ok(())
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
