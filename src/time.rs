//! sdio-fat - Time stamps
//!
//! FAT stores dates and times as two packed 16-bit words. A
//! [`TimeSource`] produces the current time in that form; [`RtcTimeSource`]
//! builds one from a real-time clock.

/// Why no time stamp could be produced.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimeError {
    /// The clock could not be read
    ClockUnavailable,
    /// The clock returned a value FAT cannot represent
    OutOfRange,
}

/// A FAT date and time packed into 32 bits.
///
/// The high half is the date: `(year - 1980) << 9 | month << 5 | day`. The
/// low half is the time: `hour << 11 | minute << 5 | second / 2`.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FatTimestamp(pub u32);

impl FatTimestamp {
    /// First year FAT can represent.
    pub const EPOCH_YEAR: u16 = 1980;
    /// Last year FAT can represent.
    pub const LAST_YEAR: u16 = 1980 + 127;

    /// Pack a calendar date and time. Seconds are stored with two second
    /// resolution.
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hours: u8,
        minutes: u8,
        seconds: u8,
    ) -> Result<Self, TimeError> {
        if !(Self::EPOCH_YEAR..=Self::LAST_YEAR).contains(&year)
            || !(1..=12).contains(&month)
            || !(1..=31).contains(&day)
            || hours > 23
            || minutes > 59
            || seconds > 59
        {
            return Err(TimeError::OutOfRange);
        }
        let date = ((year - Self::EPOCH_YEAR) << 9) | (u16::from(month) << 5) | u16::from(day);
        let time = (u16::from(hours) << 11) | (u16::from(minutes) << 5) | u16::from(seconds >> 1);
        Ok(Self::from_fat(date, time))
    }

    /// Combine the date and time words as found in a directory entry.
    pub fn from_fat(date: u16, time: u16) -> Self {
        FatTimestamp((u32::from(date) << 16) | u32::from(time))
    }

    /// The date word.
    pub fn date(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// The time word.
    pub fn time(&self) -> u16 {
        self.0 as u16
    }

    /// Calendar year.
    pub fn year(&self) -> u16 {
        Self::EPOCH_YEAR + ((self.date() & 0xFE00) >> 9)
    }

    /// Month, 1 to 12.
    pub fn month(&self) -> u8 {
        ((self.date() & 0x01E0) >> 5) as u8
    }

    /// Day of the month, 1 to 31.
    pub fn day(&self) -> u8 {
        (self.date() & 0x001F) as u8
    }

    /// Hours, 0 to 23.
    pub fn hours(&self) -> u8 {
        ((self.time() & 0xF800) >> 11) as u8
    }

    /// Minutes, 0 to 59.
    pub fn minutes(&self) -> u8 {
        ((self.time() & 0x07E0) >> 5) as u8
    }

    /// Seconds, always even.
    pub fn seconds(&self) -> u8 {
        ((self.time() & 0x001F) << 1) as u8
    }
}

impl core::fmt::Display for FatTimestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hours(),
            self.minutes(),
            self.seconds()
        )
    }
}

/// Something that knows the time, e.g. an RTC.
pub trait TimeSource {
    /// The current time.
    fn now(&mut self) -> Result<FatTimestamp, TimeError>;
}

impl<T> TimeSource for &mut T
where
    T: TimeSource,
{
    fn now(&mut self) -> Result<FatTimestamp, TimeError> {
        (*self).now()
    }
}

/// Time of day as an RTC reports it.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RtcTime {
    /// 0 to 23
    pub hours: u8,
    /// 0 to 59
    pub minutes: u8,
    /// 0 to 59
    pub seconds: u8,
}

/// Calendar date as an RTC reports it.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RtcDate {
    /// Full calendar year, e.g. 2024. Clocks that count from 2000 must add
    /// the century.
    pub year: u16,
    /// 1 to 12
    pub month: u8,
    /// 1 to 31
    pub day: u8,
}

/// A real-time clock.
///
/// Some clocks latch the date when the time is read, so `time` is always
/// called first.
pub trait Rtc {
    /// The errors the clock can return.
    type Error: core::fmt::Debug;
    /// Read the time of day.
    fn time(&mut self) -> Result<RtcTime, Self::Error>;
    /// Read the calendar date.
    fn date(&mut self) -> Result<RtcDate, Self::Error>;
}

/// A `TimeSource` reading an [`Rtc`].
#[derive(Debug)]
pub struct RtcTimeSource<R>
where
    R: Rtc,
{
    rtc: R,
}

impl<R> RtcTimeSource<R>
where
    R: Rtc,
{
    /// Use `rtc` as the clock.
    pub fn new(rtc: R) -> Self {
        Self { rtc }
    }

    /// Give the clock back.
    pub fn release(self) -> R {
        self.rtc
    }
}

impl<R> TimeSource for RtcTimeSource<R>
where
    R: Rtc,
{
    fn now(&mut self) -> Result<FatTimestamp, TimeError> {
        // The date is not read when the time read failed.
        let time = self.rtc.time().map_err(|_| TimeError::ClockUnavailable)?;
        let date = self.rtc.date().map_err(|_| TimeError::ClockUnavailable)?;
        FatTimestamp::new(
            date.year,
            date.month,
            date.day,
            time.hours,
            time.minutes,
            time.seconds,
        )
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixedTimeSource(pub FatTimestamp);

impl TimeSource for FixedTimeSource {
    fn now(&mut self) -> Result<FatTimestamp, TimeError> {
        Ok(self.0)
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
