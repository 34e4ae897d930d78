use embedded_hal::blocking::delay::DelayMs;

use crate::{
    fat::{DriveId, FatError, FatType, FatVolume, OpenMode, VolumeConfig},
    sample_file::{self, SampleFileError, SampleHeader},
    sdio::{memory::MemoryHost, Direction, SdCard, SdCardConfig},
    time::{FatTimestamp, FixedTimeSource, Rtc, RtcDate, RtcTime, RtcTimeSource, TimeError, TimeSource},
    Block, BlockCount, BlockDevice,
};

struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}

type Card<'a> = SdCard<MemoryHost<'a, Vec<Block>>, NoDelay>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn card(storage: &mut [Block]) -> Card<'_> {
    SdCard::new(MemoryHost::new(storage), NoDelay, SdCardConfig::default())
}

fn clock() -> FixedTimeSource {
    FixedTimeSource(FatTimestamp::new(2024, 3, 15, 10, 30, 20).unwrap())
}

fn card_volume(storage: &mut [Block]) -> FatVolume<Card<'_>, FixedTimeSource> {
    init_logger();
    let mut volume = FatVolume::new(card(storage), clock(), VolumeConfig::default());
    let mut work = vec![Block::new(); 16];
    volume.format(DriveId(0), FatType::Fat16, 0, &mut work).unwrap();
    volume.mount(DriveId(0), true).unwrap();
    volume
}

#[test]
fn timestamp_packing() {
    let t = FatTimestamp::new(2024, 3, 15, 10, 30, 20).unwrap();
    assert_eq!(t.date(), (44 << 9) | (3 << 5) | 15);
    assert_eq!(t.time(), (10 << 11) | (30 << 5) | 10);
    assert_eq!(FatTimestamp::from_fat(t.date(), t.time()), t);
    assert_eq!(
        (t.year(), t.month(), t.day(), t.hours(), t.minutes(), t.seconds()),
        (2024, 3, 15, 10, 30, 20)
    );
    assert_eq!(format!("{}", t), "2024-03-15 10:30:20");

    // Two second resolution.
    assert_eq!(FatTimestamp::new(2024, 3, 15, 10, 30, 21).unwrap().seconds(), 20);

    assert_eq!(FatTimestamp::new(1980, 1, 1, 0, 0, 0).unwrap().date(), (1 << 5) | 1);
    assert_eq!(FatTimestamp::new(1979, 12, 31, 0, 0, 0), Err(TimeError::OutOfRange));
    assert_eq!(FatTimestamp::new(2108, 1, 1, 0, 0, 0), Err(TimeError::OutOfRange));
    assert_eq!(FatTimestamp::new(2024, 13, 1, 0, 0, 0), Err(TimeError::OutOfRange));
    assert_eq!(FatTimestamp::new(2024, 1, 0, 0, 0, 0), Err(TimeError::OutOfRange));
    assert_eq!(FatTimestamp::new(2024, 1, 1, 24, 0, 0), Err(TimeError::OutOfRange));
}

#[derive(Default)]
struct FakeRtc {
    time_fails: bool,
    date_fails: bool,
    calls: Vec<&'static str>,
}

impl Rtc for FakeRtc {
    type Error = ();

    fn time(&mut self) -> Result<RtcTime, ()> {
        self.calls.push("time");
        if self.time_fails {
            return Err(());
        }
        Ok(RtcTime {
            hours: 23,
            minutes: 59,
            seconds: 58,
        })
    }

    fn date(&mut self) -> Result<RtcDate, ()> {
        self.calls.push("date");
        if self.date_fails {
            return Err(());
        }
        Ok(RtcDate {
            year: 2019,
            month: 3,
            day: 5,
        })
    }
}

#[test]
fn rtc_time_source() {
    let mut source = RtcTimeSource::new(FakeRtc::default());
    let now = source.now().unwrap();
    assert_eq!(format!("{}", now), "2019-03-05 23:59:58");
    assert_eq!(source.release().calls, ["time", "date"]);

    let mut source = RtcTimeSource::new(FakeRtc {
        time_fails: true,
        ..FakeRtc::default()
    });
    assert_eq!(source.now(), Err(TimeError::ClockUnavailable));
    assert_eq!(source.release().calls, ["time"]);

    let mut source = RtcTimeSource::new(FakeRtc {
        date_fails: true,
        ..FakeRtc::default()
    });
    assert_eq!(source.now(), Err(TimeError::ClockUnavailable));
}

#[test]
fn volume_on_a_card() {
    let mut storage = vec![Block::new(); 32768];
    {
        let mut volume = card_volume(&mut storage);
        assert_eq!(volume.device().num_blocks().unwrap(), BlockCount(32768));

        volume.mkdir("0:/LOGS").unwrap();
        let file = volume.open("0:/LOGS/DAY1.TXT", OpenMode::CreateAlways).unwrap();
        volume.write_line(&file, "t,value").unwrap();
        for i in 0..100 {
            volume.write_fmt(&file, format_args!("{},{}\n", i, i * i)).unwrap();
        }
        volume.close(file).unwrap();
        volume.unmount().unwrap();

        let (sd, _) = volume.release();
        let (host, _) = sd.release();
        assert_eq!(host.blocks()[0].contents[510..512], [0x55, 0xAA]);
    }

    // A second volume on the same storage sees the data.
    let mut volume = FatVolume::new(card(&mut storage), clock(), VolumeConfig::default());
    volume.mount(DriveId(0), false).unwrap();
    let file = volume.open("LOGS/DAY1.TXT", OpenMode::ReadOnly).unwrap();
    let lines: Vec<Vec<u8>> = volume
        .lines(&file)
        .map(|line| line.unwrap().trim_end().to_vec())
        .collect();
    volume.close(file).unwrap();
    assert_eq!(lines.len(), 101);
    assert_eq!(lines[0], b"t,value");
    assert_eq!(lines[100], b"99,9801");
}

#[test]
fn card_errors_surface_as_device_errors() {
    let mut storage = vec![Block::new(); 32768];
    let mut volume = card_volume(&mut storage);
    volume.device().host().fail_next(crate::sdio::HostError::Timeout);
    // The lookup reads the root directory first.
    assert_eq!(
        volume.open("NEW.TXT", OpenMode::CreateAlways).err(),
        Some(FatError::DeviceError(crate::sdio::Error::TransferTimeout))
    );
    // The card recovers and so does the volume.
    let file = volume.open("NEW.TXT", OpenMode::CreateAlways).unwrap();
    volume.close(file).unwrap();
}

#[test]
fn sample_file_round_trip() {
    let mut storage = vec![Block::new(); 32768];
    let mut volume = card_volume(&mut storage);

    let file = volume.open("ADC500.DAT", OpenMode::CreateAlways).unwrap();
    let header =
        sample_file::write_samples(&mut volume, &file, 500, (0..20).map(sample_file::demo_sample))
            .unwrap();
    volume.close(file).unwrap();
    assert_eq!(
        header,
        SampleHeader {
            point_count: 20,
            frequency: 500
        }
    );
    assert_eq!(Some(volume.stat("ADC500.DAT").unwrap().file_size()), header.file_len());
    assert_eq!(header.file_len(), Some(17 + 80));

    let file = volume.open("ADC500.DAT", OpenMode::ReadOnly).unwrap();
    assert_eq!(sample_file::read_header(&mut volume, &file).unwrap(), header);
    let mut values = [0u32; 32];
    let n = sample_file::read_samples(&mut volume, &file, &mut values).unwrap();
    assert_eq!(n, 20);
    assert_eq!(values[0], 1000);
    assert_eq!(values[5], 1005);
    assert_eq!(values[19], 1019);
    assert_eq!(sample_file::read_samples(&mut volume, &file, &mut values).unwrap(), 0);
    volume.close(file).unwrap();
}

#[test]
fn sample_file_rejects_other_files() {
    let mut storage = vec![Block::new(); 32768];
    let mut volume = card_volume(&mut storage);

    let file = volume.open("NOTES.TXT", OpenMode::CreateAlways).unwrap();
    volume.write_line(&file, "Line1: Hello FatFS").unwrap();
    volume.close(file).unwrap();
    let file = volume.open("NOTES.TXT", OpenMode::ReadOnly).unwrap();
    assert_eq!(
        sample_file::read_header(&mut volume, &file),
        Err(SampleFileError::BadIdentifier)
    );
    volume.close(file).unwrap();

    // Identifier and only half the header.
    let file = volume.open("SHORT.DAT", OpenMode::CreateAlways).unwrap();
    volume.write(&file, sample_file::IDENTIFIER).unwrap();
    volume.write(&file, &[3, 0, 0, 0]).unwrap();
    volume.close(file).unwrap();
    let file = volume.open("SHORT.DAT", OpenMode::ReadOnly).unwrap();
    assert_eq!(
        sample_file::read_header(&mut volume, &file),
        Err(SampleFileError::Truncated)
    );
    volume.close(file).unwrap();

    assert_eq!(
        volume.open("MISSING.DAT", OpenMode::ReadOnly).map_err(SampleFileError::from).err(),
        Some(SampleFileError::Fat(FatError::NotFound))
    );
}

#[test]
fn sample_counts_past_the_fat_limit() {
    let largest = SampleHeader {
        point_count: (u32::MAX - 17) / 4,
        frequency: 1000,
    };
    assert_eq!(largest.file_len(), Some(u32::MAX - 2));
    let too_many = SampleHeader {
        point_count: largest.point_count + 1,
        ..largest
    };
    assert_eq!(too_many.file_len(), None);

    // Refused before anything reaches the card.
    let mut storage = vec![Block::new(); 32768];
    let mut volume = card_volume(&mut storage);
    let file = volume.open("HUGE.DAT", OpenMode::CreateAlways).unwrap();
    let samples = (0..too_many.point_count as usize).map(|i| i as u32);
    assert_eq!(
        sample_file::write_samples(&mut volume, &file, 1000, samples),
        Err(SampleFileError::TooManySamples)
    );
    assert_eq!(volume.file_size(&file).unwrap(), 0);
    volume.close(file).unwrap();
}

#[cfg(feature = "log")]
mod demo {
    use super::*;
    use crate::{
        demo,
        sdio::{CardType, EchoSink},
    };

    #[test]
    fn card_menu() {
        init_logger();
        let mut storage = vec![Block::filled(0x5A); 64];
        let mut sd = card(&mut storage);

        let info = demo::show_card_info(&mut sd).unwrap();
        assert_eq!(info.card_type, CardType::HighCapacity);
        assert_eq!(info.block_count, 64);

        demo::erase_blocks(&mut sd).unwrap();
        assert_eq!(demo::c_string(&demo::test_read(&mut sd).unwrap()), Some(""));

        demo::test_write(&mut sd).unwrap();
        let block = demo::test_read(&mut sd).unwrap();
        assert_eq!(demo::c_string(&block), Some(demo::GREETING));

        let (host, _) = sd.release();
        assert_eq!(host.blocks()[demo::ERASE_END.0 as usize], Block::new());
        assert_eq!(host.blocks()[11], Block::filled(0x5A));
    }

    #[test]
    fn dma_menu() {
        init_logger();
        let mut storage = vec![Block::new(); 64];
        let mut sd = card(&mut storage);
        let mut sink = EchoSink::new();

        demo::start_dma_write(&mut sd, vec![Block::new()]).unwrap();
        assert!(sd.dma_in_flight(Direction::Write));
        // Nothing completes until the DMA engine says so.
        assert!(!sd.dispatch_completion(&mut sink));
        assert!(sd.host().fire(Direction::Write));
        assert!(sd.dispatch_completion(&mut sink));
        assert!(!sd.dma_in_flight(Direction::Write));
        assert_eq!(sink.writes(), 1);
        let done = sink.take().unwrap();
        assert!(done.is_ok());
        assert_eq!(done.start, demo::DMA_BLOCK);
        assert_eq!(done.sample_window(), Some([10, 11, 12, 13, 14]));

        demo::start_dma_read(&mut sd, vec![Block::new()]).unwrap();
        assert!(sd.host().fire(Direction::Read));
        assert!(sd.dispatch_completion(&mut sink));
        assert_eq!(sink.reads(), 1);
        let buffer = sink.take().unwrap().into_buffer();
        let mut expected = Block::new();
        demo::dma_pattern(&mut expected);
        assert_eq!(buffer, [expected]);

        // A second read while one is outstanding is refused and the buffer
        // comes back.
        demo::start_dma_read(&mut sd, vec![Block::new()]).unwrap();
        let refused = demo::start_dma_read(&mut sd, vec![Block::filled(1)]);
        match refused {
            Err((crate::sdio::Error::TransferInFlight, buffer)) => {
                assert_eq!(buffer, [Block::filled(1)])
            }
            other => panic!("unexpected {:?}", other.map_err(|(e, _)| e)),
        }
    }

    #[test]
    fn file_menu() {
        let mut storage = vec![Block::new(); 32768];
        let mut volume = card_volume(&mut storage);

        let info = demo::report_disk_info(&mut volume).unwrap();
        assert_eq!(info.total_clusters, 8167);

        demo::write_demo_files(&mut volume).unwrap();
        assert_eq!(demo::report_dir(&mut volume, "0:/").unwrap(), 6);
        let dirs: Vec<String> = volume
            .scan("0:/")
            .unwrap()
            .map(|entry| entry.unwrap())
            .filter(|entry| entry.is_dir())
            .map(|entry| entry.name().to_string())
            .collect();
        assert_eq!(dirs, ["SUBDIR1", "MYDOCS"]);
        // Running the menu entry again replaces the files and keeps the directories.
        demo::write_demo_files(&mut volume).unwrap();
        assert_eq!(demo::report_dir(&mut volume, "0:/").unwrap(), 6);
        assert_eq!(demo::read_txt_file(&mut volume, "readme.txt").unwrap(), 3);
        assert_eq!(
            demo::read_bin_file(&mut volume, "ADC1000.dat").unwrap(),
            SampleHeader {
                point_count: 50,
                frequency: 1000
            }
        );

        let entry = demo::file_info(&mut volume, "help.txt").unwrap();
        assert_eq!(entry.file_size(), 19 + 20 + 23);
        assert_eq!(entry.modified(), clock().now().unwrap());

        assert_eq!(
            demo::read_txt_file(&mut volume, "nothere.txt"),
            Err(FatError::NotFound)
        );
        assert_eq!(
            demo::read_bin_file(&mut volume, "readme.txt"),
            Err(SampleFileError::BadIdentifier)
        );
        assert_eq!(volume.open_files(), 0);
    }

    #[test]
    fn truncated_sample_file() {
        let mut storage = vec![Block::new(); 32768];
        let mut volume = card_volume(&mut storage);

        // The header promises 50 samples but only 3 follow.
        let file = volume.open("CUT.DAT", OpenMode::CreateAlways).unwrap();
        volume.write(&file, sample_file::IDENTIFIER).unwrap();
        volume.write(&file, &50u32.to_le_bytes()).unwrap();
        volume.write(&file, &1000u32.to_le_bytes()).unwrap();
        for i in 0..3u32 {
            volume.write(&file, &i.to_le_bytes()).unwrap();
        }
        volume.close(file).unwrap();

        assert_eq!(
            demo::read_bin_file(&mut volume, "CUT.DAT"),
            Err(SampleFileError::Truncated)
        );
        assert_eq!(volume.open_files(), 0);
    }
}
