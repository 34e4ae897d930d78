//! Delivery of finished DMA transfers.

use crate::{Block, BlockIdx};

use super::{Direction, Error};

#[cfg(feature = "log")]
use log::{info, warn};

#[cfg(feature = "defmt-log")]
use defmt::{info, warn};

/// A finished DMA transfer. Owns the buffer that was lent to the DMA engine.
#[derive(Debug)]
pub struct Completion<B, E = Error> {
    /// Which way the data moved
    pub direction: Direction,
    /// First block of the transfer
    pub start: BlockIdx,
    /// Number of bytes moved, or why the transfer failed
    pub result: Result<usize, E>,
    /// The buffer, handed back to its owner
    pub buffer: B,
}

impl<B, E> Completion<B, E> {
    /// Convert the error type, keeping everything else.
    pub fn map_err<F, O>(self, op: O) -> Completion<B, F>
    where
        O: FnOnce(E) -> F,
    {
        Completion {
            direction: self.direction,
            start: self.start,
            result: self.result.map_err(op),
            buffer: self.buffer,
        }
    }

    /// Did the transfer succeed?
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Give the buffer back, dropping the status.
    pub fn into_buffer(self) -> B {
        self.buffer
    }
}

impl<B, E> Completion<B, E>
where
    B: AsRef<[Block]>,
{
    /// Bytes `[10..15)` of the buffer, the window the demo echoes to verify a
    /// transfer by eye.
    pub fn sample_window(&self) -> Option<[u8; 5]> {
        let first = self.buffer.as_ref().first()?;
        let mut window = [0u8; 5];
        window.copy_from_slice(&first.contents[10..15]);
        Some(window)
    }
}

/// Receives DMA completions.
///
/// Called from the context that services transfer-complete interrupts. Keep
/// implementations short: record the event and return. In particular, do not
/// touch a `FatVolume` from here.
pub trait CompletionSink<B> {
    /// A DMA write finished (successfully or not).
    fn on_write_complete(&mut self, completion: Completion<B>);
    /// A DMA read finished (successfully or not).
    fn on_read_complete(&mut self, completion: Completion<B>);
}

/// The demo sink: logs every completion with its sample window and keeps the
/// most recent one so the buffer can be reclaimed.
#[derive(Debug)]
pub struct EchoSink<B> {
    last: Option<Completion<B>>,
    reads: u32,
    writes: u32,
}

impl<B> EchoSink<B> {
    /// An empty sink.
    pub const fn new() -> Self {
        Self {
            last: None,
            reads: 0,
            writes: 0,
        }
    }

    /// Take the most recent completion.
    pub fn take(&mut self) -> Option<Completion<B>> {
        self.last.take()
    }

    /// How many reads completed so far.
    pub fn reads(&self) -> u32 {
        self.reads
    }

    /// How many writes completed so far.
    pub fn writes(&self) -> u32 {
        self.writes
    }
}

impl<B> Default for EchoSink<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> EchoSink<B>
where
    B: AsRef<[Block]>,
{
    fn echo(&mut self, what: &str, completion: Completion<B>) {
        match &completion.result {
            Ok(bytes) => {
                info!("DMA {} complete, {} bytes at block {}", what, bytes, completion.start.0);
                if let Some(w) = completion.sample_window() {
                    info!("Data in [10:15] is: {},{},{},{},{}", w[0], w[1], w[2], w[3], w[4]);
                }
            }
            Err(e) => warn!("DMA {} failed: {:?}", what, e),
        }
        self.last = Some(completion);
    }
}

impl<B> CompletionSink<B> for EchoSink<B>
where
    B: AsRef<[Block]>,
{
    fn on_write_complete(&mut self, completion: Completion<B>) {
        self.writes += 1;
        self.echo("write", completion);
    }

    fn on_read_complete(&mut self, completion: Completion<B>) {
        self.reads += 1;
        self.echo("read", completion);
    }
}
