//! # sdio-fat
//!
//! > SD card block I/O over SDIO, with a small FAT16/FAT32 layer on top
//!
//! This crate drives an SD card through the SDIO host peripheral of a
//! microcontroller such as the STM32F407, both with polled transfers and
//! with DMA, and puts a FAT16/FAT32 volume on it. It is `#![no_std]` and
//! does not use `alloc`.
//!
//! ## Using the crate
//!
//! The card driver needs something that implements [`sdio::SdioHost`] (the
//! vendor HAL's SDIO peripheral does the command layer) and an
//! `embedded_hal` delay. The FAT layer works on any [`BlockDevice`],
//! including the card itself, and takes a [`time::TimeSource`] for its
//! time stamps.
//!
//! ```rust
//! use sdio_fat::{
//!     fat::{DriveId, FatType, FatVolume, OpenMode, VolumeConfig},
//!     sdio::{memory::MemoryHost, SdCard, SdCardConfig},
//!     time::{FatTimestamp, FixedTimeSource},
//!     Block,
//! };
//! # struct NoDelay;
//! # impl embedded_hal::blocking::delay::DelayMs<u32> for NoDelay {
//! #     fn delay_ms(&mut self, _ms: u32) {}
//! # }
//! # fn main() -> Result<(), sdio_fat::fat::FatError<sdio_fat::sdio::Error>> {
//! let mut storage = vec![Block::new(); 32768];
//! let host: MemoryHost<'_, Vec<Block>> = MemoryHost::new(&mut storage);
//! let card = SdCard::new(host, NoDelay, SdCardConfig::default());
//! let clock = FixedTimeSource(FatTimestamp::new(2024, 3, 15, 10, 30, 20).unwrap());
//! let mut volume = FatVolume::new(card, clock, VolumeConfig::default());
//!
//! let mut work = [Block::new(), Block::new(), Block::new(), Block::new()];
//! volume.format(DriveId(0), FatType::Fat16, 0, &mut work)?;
//! volume.mount(DriveId(0), true)?;
//!
//! let file = volume.open("0:/LOG.TXT", OpenMode::CreateAlways)?;
//! volume.write_line(&file, "Line1: Hello FatFS")?;
//! volume.close(file)?;
//! assert_eq!(volume.stat("LOG.TXT")?.file_size(), 19);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.
//! The [`demo`] reports are only built with `log`.

#![cfg_attr(not(test), no_std)]
// #![deny(missing_docs)]

// ****************************************************************************
//
// Imports
//
// ****************************************************************************

#[cfg(test)]
mod test;

#[macro_use]
mod structure;

pub mod block_device;
pub mod mbr;
pub mod sdio;
pub mod time;

pub mod fat;
pub mod sample_file;

#[cfg(feature = "log")]
pub mod demo;

pub use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx, MemoryBlockDevice};
pub use crate::fat::{FatError, FatVolume};
pub use crate::sdio::Error as SdError;
pub use crate::sdio::SdCard;

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
