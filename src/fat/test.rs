use core::cell::Cell;

use hex_literal::hex;

use crate::{
    mbr::{Mbr, Partition, PartitionNumber, PartitionType},
    time::{FatTimestamp, FixedTimeSource, TimeError, TimeSource},
    Block, BlockCount, BlockIdx, MemoryBlockDevice,
};

use super::{
    bios_param_block::{BiosParameterBlock, BpbError},
    file::MAX_OPEN_FILES,
    Attributes, Cluster, DriveId, FatError, FatType, FatVolume, FormatError, Layout, OpenMode,
    ShortName, ShortNameError, Space, VolumeConfig,
};

// 16 MiB: FAT16 with 4 sectors per cluster and 8167 clusters.
const FAT16_SECTORS: usize = 32768;
// 34 MiB: FAT32 with 1 sector per cluster and 68520 clusters.
const FAT32_SECTORS: usize = 69632;

type Volume<'a> = FatVolume<MemoryBlockDevice<'a>, FixedTimeSource>;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn stamp() -> FatTimestamp {
    FatTimestamp::new(2024, 3, 15, 10, 30, 20).unwrap()
}

fn unformatted(memory: &mut [u8], config: VolumeConfig) -> Volume<'_> {
    FatVolume::new(MemoryBlockDevice::new(memory), FixedTimeSource(stamp()), config)
}

fn formatted(memory: &mut [u8], fat_type: FatType) -> Volume<'_> {
    init_logger();
    let mut volume = unformatted(memory, VolumeConfig::default());
    let mut work = vec![Block::new(); 8];
    volume.format(DriveId(0), fat_type, 0, &mut work).unwrap();
    volume.mount(DriveId(0), true).unwrap();
    volume
}

fn block(memory: &[u8], idx: usize) -> &[u8] {
    &memory[idx * Block::LEN..(idx + 1) * Block::LEN]
}

fn write_file(volume: &mut Volume<'_>, path: &str, data: &[u8]) {
    let file = volume.open(path, OpenMode::CreateAlways).unwrap();
    assert_eq!(volume.write(&file, data).unwrap(), data.len());
    volume.close(file).unwrap();
}

fn read_file(volume: &mut Volume<'_>, path: &str) -> Vec<u8> {
    let file = volume.open(path, OpenMode::ReadOnly).unwrap();
    let mut contents = Vec::new();
    let mut buf = [0u8; 100];
    loop {
        let n = volume.read(&file, &mut buf).unwrap();
        if n == 0 {
            break;
        }
        contents.extend_from_slice(&buf[..n]);
    }
    assert!(volume.is_eof(&file).unwrap());
    volume.close(file).unwrap();
    contents
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn names(volume: &mut Volume<'_>, path: &str) -> Vec<String> {
    volume
        .scan(path)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            format!("{}{}", entry.name(), if entry.is_dir() { "/" } else { "" })
        })
        .collect()
}

struct BrokenClock;

impl TimeSource for BrokenClock {
    fn now(&mut self) -> Result<FatTimestamp, TimeError> {
        Err(TimeError::ClockUnavailable)
    }
}

#[test]
fn default_cluster_sizes() {
    assert_eq!(
        Layout::default_sectors_per_cluster(FatType::Fat16, 8400),
        Err(FormatError::VolumeTooSmall)
    );
    assert_eq!(Layout::default_sectors_per_cluster(FatType::Fat16, 8401), Ok(2));
    assert_eq!(Layout::default_sectors_per_cluster(FatType::Fat16, 32768), Ok(4));
    assert_eq!(
        Layout::default_sectors_per_cluster(FatType::Fat16, 4_194_305),
        Err(FormatError::VolumeTooLarge)
    );
    assert_eq!(
        Layout::default_sectors_per_cluster(FatType::Fat32, 66600),
        Err(FormatError::VolumeTooSmall)
    );
    assert_eq!(Layout::default_sectors_per_cluster(FatType::Fat32, 69632), Ok(1));
    assert_eq!(Layout::default_sectors_per_cluster(FatType::Fat32, 1_000_000), Ok(8));
    assert_eq!(Layout::default_sectors_per_cluster(FatType::Fat32, 62_333_952), Ok(32));
}

#[test]
fn layout_math() {
    let fat16 = Layout::new(FatType::Fat16, 32768, 0).unwrap();
    assert_eq!(fat16.sectors_per_cluster, 4);
    assert_eq!(fat16.reserved_sectors, 1);
    assert_eq!(fat16.fat_size, 32);
    assert_eq!(fat16.root_dir_sectors(), 32);
    assert_eq!(fat16.data_start(), 1 + 64 + 32);
    assert_eq!(fat16.cluster_count, 8167);

    let fat32 = Layout::new(FatType::Fat32, 69632, 0).unwrap();
    assert_eq!(fat32.sectors_per_cluster, 1);
    assert_eq!(fat32.reserved_sectors, 32);
    assert_eq!(fat32.fat_size, 540);
    assert_eq!(fat32.root_dir_sectors(), 0);
    assert_eq!(fat32.cluster_count, 68520);

    let big_clusters = Layout::new(FatType::Fat16, 65536, 4096).unwrap();
    assert_eq!(big_clusters.sectors_per_cluster, 8);

    assert_eq!(
        Layout::new(FatType::Fat16, 32768, 1000),
        Err(FormatError::InvalidAllocationUnit(1000))
    );
    assert_eq!(
        Layout::new(FatType::Fat16, 32768, 3 * 512),
        Err(FormatError::InvalidAllocationUnit(1536))
    );
    // 32 KiB clusters leave too few of them for FAT16.
    assert_eq!(
        Layout::new(FatType::Fat16, 32768, 32768),
        Err(FormatError::VolumeTooSmall)
    );
}

#[test]
fn format_fat16() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);

    let info = volume.disk_info().unwrap();
    assert_eq!(info.fat_type, FatType::Fat16);
    assert_eq!(info.sector_size, 512);
    assert_eq!(info.sectors_per_cluster, 4);
    assert_eq!(info.total_clusters, 8167);
    assert_eq!(info.free_clusters, 8167);
    assert_eq!(info.total_sectors(), 32668);
    assert_eq!(info.total_space(), Space::MiB(15));
    assert_eq!(info.free_space(), Space::MiB(15));
    assert_eq!(volume.fat_type().unwrap(), FatType::Fat16);

    let (bd, _) = volume.release();
    let memory = bd.release();
    let boot = block(memory, 0);
    assert_eq!(
        boot[0..24],
        hex!("EB3C90 4D53444F53352E30 0002 04 0100 02 0002 0080 F8 2000")
    );
    assert_eq!(boot[38], 0x29);
    assert_eq!(boot[43..62], *b"NO NAME    FAT16   ");
    assert_eq!(boot[510..512], hex!("55AA"));
    assert_eq!(boot[39..43], stamp().0.to_le_bytes());

    // Both FATs start with the media and end-of-chain entries.
    assert_eq!(block(memory, 1)[0..4], hex!("F8FF FFFF"));
    assert_eq!(block(memory, 33)[0..4], hex!("F8FF FFFF"));
    assert!(block(memory, 65).iter().all(|&b| b == 0));

    let mut copy = Block::new();
    copy.contents.copy_from_slice(boot);
    let bpb = BiosParameterBlock::new(copy).unwrap();
    assert_eq!(bpb.fat_type(), FatType::Fat16);
    assert_eq!(bpb.cluster_count(), 8167);
    assert_eq!(bpb.root_entry_count(), 512);
}

#[test]
fn format_fat32() {
    let mut memory = vec![0u8; FAT32_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat32);

    let info = volume.disk_info().unwrap();
    assert_eq!(info.fat_type, FatType::Fat32);
    assert_eq!(info.sectors_per_cluster, 1);
    assert_eq!(info.total_clusters, 68520);
    // The root directory takes one cluster.
    assert_eq!(info.free_clusters, 68519);
    assert_eq!(info.total_space(), Space::MiB(33));
    assert_eq!(info.cluster_bytes(), 512);

    let (bd, _) = volume.release();
    let memory = bd.release();
    let boot = block(memory, 0).to_vec();
    assert_eq!(boot[0..3], hex!("EB5890"));
    assert_eq!(boot[11..17], hex!("0002 01 2000 02"));
    assert_eq!(boot[36..52], hex!("1C020000 0000 0000 02000000 0100 0600"));
    assert_eq!(boot[82..90], *b"FAT32   ");
    assert_eq!(block(memory, 6), &boot[..]);

    let fs_info = block(memory, 1);
    assert_eq!(fs_info[0..4], hex!("52526141"));
    assert_eq!(fs_info[484..488], hex!("72724161"));
    assert_eq!(fs_info[508..512], hex!("000055AA"));
    assert_eq!(block(memory, 7), fs_info);

    let fat = hex!("F8FFFF0F FFFFFF0F FFFFFF0F");
    assert_eq!(block(memory, 32)[0..12], fat);
    assert_eq!(block(memory, 32 + 540)[0..12], fat);
}

#[test]
fn variable_sector_size_reports_kib() {
    init_logger();
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = unformatted(
        &mut memory,
        VolumeConfig {
            drive: DriveId(0),
            variable_sector_size: true,
        },
    );
    let mut work = vec![Block::new(); 4];
    volume.format(DriveId(0), FatType::Fat16, 0, &mut work).unwrap();
    let info = volume.disk_info().unwrap();
    assert_eq!(info.total_space(), Space::KiB(16334));
    assert_eq!(format!("{}", info.free_space()), "16334 KB");
}

#[test]
fn format_rejections() {
    init_logger();
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = unformatted(&mut memory, VolumeConfig::default());
    let mut small = vec![Block::new(); 3];
    assert_eq!(
        volume.format(DriveId(0), FatType::Fat16, 0, &mut small),
        Err(FatError::Format(FormatError::WorkAreaTooSmall))
    );
    let mut work = vec![Block::new(); 4];
    assert_eq!(
        volume.format(DriveId(1), FatType::Fat16, 0, &mut work),
        Err(FatError::InvalidDrive)
    );
    assert_eq!(
        volume.format(DriveId(0), FatType::Fat32, 0, &mut work),
        Err(FatError::Format(FormatError::VolumeTooSmall))
    );
    assert_eq!(
        volume.format(DriveId(0), FatType::Fat16, 1000, &mut work),
        Err(FatError::Format(FormatError::InvalidAllocationUnit(1000)))
    );

    volume.format(DriveId(0), FatType::Fat16, 0, &mut work).unwrap();
    let file = volume.open("A.TXT", OpenMode::CreateAlways).unwrap();
    assert_eq!(
        volume.format(DriveId(0), FatType::Fat16, 0, &mut work),
        Err(FatError::FilesOpen)
    );
    volume.close(file).unwrap();
}

#[test]
fn mount_needs_a_file_system() {
    init_logger();
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = unformatted(&mut memory, VolumeConfig::default());

    assert_eq!(volume.stat("A.TXT"), Err(FatError::NotMounted));
    assert_eq!(volume.mount(DriveId(3), true), Err(FatError::InvalidDrive));
    assert_eq!(volume.mount(DriveId(0), true), Err(FatError::NoFilesystem));

    // A deferred mount succeeds and fails on first use.
    volume.mount(DriveId(0), false).unwrap();
    assert!(!volume.is_mounted());
    assert_eq!(volume.disk_info(), Err(FatError::NoFilesystem));

    // Nothing was written.
    let (bd, _) = volume.release();
    assert!(bd.release().iter().all(|&b| b == 0));
}

#[test]
fn mount_is_lazy() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    write_file(&mut volume, "KEEP.TXT", b"kept");
    volume.unmount().unwrap();
    assert_eq!(volume.stat("KEEP.TXT"), Err(FatError::NotMounted));

    volume.mount(DriveId(0), false).unwrap();
    assert!(!volume.is_mounted());
    assert_eq!(volume.stat("KEEP.TXT").unwrap().file_size(), 4);
    assert!(volume.is_mounted());
}

#[test]
fn unmount_refuses_open_files() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    let file = volume.open("OPEN.TXT", OpenMode::CreateAlways).unwrap();
    assert_eq!(volume.unmount(), Err(FatError::FilesOpen));
    assert_eq!(volume.mount(DriveId(0), true), Err(FatError::FilesOpen));
    volume.close(file).unwrap();
    volume.unmount().unwrap();
}

#[test]
fn mount_first_partition() {
    init_logger();
    const START: usize = 2048;
    let mut image = vec![0u8; (START + FAT16_SECTORS) * Block::LEN];
    {
        let (mbr, partition) = image.split_at_mut(START * Block::LEN);
        let mut volume = unformatted(partition, VolumeConfig::default());
        let mut work = vec![Block::new(); 16];
        volume.format(DriveId(0), FatType::Fat16, 0, &mut work).unwrap();

        let mut block0 = Block::new();
        Mbr::set_partition(
            &mut block0,
            PartitionNumber::One,
            &Partition {
                ty: PartitionType::Fat16Lba,
                lba_start: BlockIdx(START as u32),
                block_count: BlockCount(FAT16_SECTORS as u32),
            },
        );
        mbr[..Block::LEN].copy_from_slice(&block0.contents);
    }

    let mut volume = unformatted(&mut image, VolumeConfig::default());
    volume.mount(DriveId(0), true).unwrap();
    let info = volume.disk_info().unwrap();
    assert_eq!(info.fat_type, FatType::Fat16);
    assert_eq!(info.total_clusters, 8167);

    write_file(&mut volume, "0:/PART.TXT", b"inside the partition");
    assert_eq!(read_file(&mut volume, "PART.TXT"), b"inside the partition");

    // The first data cluster is where the partition's layout puts it.
    let (bd, _) = volume.release();
    let image = bd.release();
    let data_start = START + 1 + 2 * 32 + 32;
    assert_eq!(&block(image, data_start)[..20], b"inside the partition");
}

#[test]
fn partition_with_bad_boot_sector() {
    init_logger();
    let mut image = vec![0u8; 4096 * Block::LEN];
    let mut block0 = Block::new();
    Mbr::set_partition(
        &mut block0,
        PartitionNumber::One,
        &Partition {
            ty: PartitionType::Fat32Lba,
            lba_start: BlockIdx(64),
            block_count: BlockCount(4000),
        },
    );
    image[..Block::LEN].copy_from_slice(&block0.contents);

    let mut volume = unformatted(&mut image, VolumeConfig::default());
    assert_eq!(
        volume.mount(DriveId(0), true),
        Err(FatError::Bpb(BpbError::InvalidSignature([0, 0])))
    );
}

#[test]
fn text_file_round_trip() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);

    let file = volume.open("0:/README.TXT", OpenMode::CreateAlways).unwrap();
    assert_eq!(volume.write_line(&file, "Line1: Hello FatFS").unwrap(), 19);
    volume.write_line(&file, "Line2: UPC, Qingdao").unwrap();
    let n = volume
        .write_fmt(&file, format_args!("Line3: Date={:04}-{:02}-{:02}\n", 2019, 3, 5))
        .unwrap();
    assert_eq!(n, 23);
    assert_eq!(volume.position(&file).unwrap(), 62);
    volume.close(file).unwrap();

    let entry = volume.stat("readme.txt").unwrap();
    assert_eq!(entry.file_size(), 62);
    assert_eq!(entry.name().as_bytes(), b"README  TXT");
    assert!(entry.attributes().contains(Attributes::ARCHIVE));
    assert_eq!(entry.modified(), stamp());
    assert_eq!(entry.created(), stamp());

    let file = volume.open("README.TXT", OpenMode::ReadOnly).unwrap();
    let lines: Vec<String> = volume
        .lines(&file)
        .map(|line| {
            let line = line.unwrap();
            assert!(line.is_complete());
            String::from_utf8(line.trim_end().to_vec()).unwrap()
        })
        .collect();
    assert_eq!(
        lines,
        ["Line1: Hello FatFS", "Line2: UPC, Qingdao", "Line3: Date=2019-03-05"]
    );
    assert!(volume.is_eof(&file).unwrap());
    volume.close(file).unwrap();
}

#[test]
fn read_line_fills_small_buffers() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    write_file(&mut volume, "LINES.TXT", b"Line1: Hello FatFS\nend");

    let file = volume.open("LINES.TXT", OpenMode::ReadOnly).unwrap();
    let mut buf = [0u8; 8];
    assert_eq!(volume.read_line(&file, &mut buf).unwrap(), 8);
    assert_eq!(&buf, b"Line1: H");
    assert_eq!(volume.read_line(&file, &mut buf).unwrap(), 8);
    assert_eq!(&buf, b"ello Fat");
    assert_eq!(volume.read_line(&file, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"FS\n");
    assert_eq!(volume.read_line(&file, &mut buf).unwrap(), 3);
    assert_eq!(&buf[..3], b"end");
    assert_eq!(volume.read_line(&file, &mut buf).unwrap(), 0);
    volume.close(file).unwrap();
}

#[test]
fn long_lines_are_split() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    let mut text = vec![b'x'; 200];
    text.push(b'\n');
    write_file(&mut volume, "LONG.TXT", &text);

    let file = volume.open("LONG.TXT", OpenMode::ReadOnly).unwrap();
    let pieces: Vec<(usize, bool)> = volume
        .lines(&file)
        .map(|line| {
            let line = line.unwrap();
            (line.as_bytes().len(), line.is_complete())
        })
        .collect();
    assert_eq!(pieces, [(128, false), (73, true)]);
    volume.close(file).unwrap();
}

#[test]
fn multi_cluster_file() {
    let mut memory = vec![0u8; FAT32_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat32);
    let free_before = volume.disk_info().unwrap().free_clusters;

    // Written in odd sized pieces so writes straddle blocks.
    let data = pattern(3000);
    let file = volume.open("BIG.BIN", OpenMode::CreateAlways).unwrap();
    for piece in data.chunks(333) {
        assert_eq!(volume.write(&file, piece).unwrap(), piece.len());
    }
    assert_eq!(volume.file_size(&file).unwrap(), 3000);
    volume.close(file).unwrap();

    assert_eq!(read_file(&mut volume, "BIG.BIN"), data);
    assert_eq!(volume.stat("BIG.BIN").unwrap().file_size(), 3000);
    // 3000 bytes in 512 byte clusters.
    assert_eq!(volume.disk_info().unwrap().free_clusters, free_before - 6);

    // Truncating gives every cluster back.
    let file = volume.open("BIG.BIN", OpenMode::CreateAlways).unwrap();
    assert_eq!(volume.file_size(&file).unwrap(), 0);
    volume.close(file).unwrap();
    let entry = volume.stat("BIG.BIN").unwrap();
    assert_eq!(entry.file_size(), 0);
    assert_eq!(entry.first_cluster(), Cluster::EMPTY);
    assert_eq!(volume.disk_info().unwrap().free_clusters, free_before);
}

#[test]
fn fat_copies_stay_in_step() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    write_file(&mut volume, "A.BIN", &pattern(5000));
    volume.mkdir("DIR").unwrap();

    let (bd, _) = volume.release();
    let memory = bd.release();
    let fat_bytes = 32 * Block::LEN;
    let first = &memory[Block::LEN..Block::LEN + fat_bytes];
    let second = &memory[Block::LEN + fat_bytes..Block::LEN + 2 * fat_bytes];
    assert_eq!(first, second);
    // Clusters 2 to 4 hold the file, 5 the directory.
    assert_eq!(first[4..12], hex!("0300 0400 FFFF FFFF"));
}

#[test]
fn fs_info_tracks_allocation() {
    let mut memory = vec![0u8; FAT32_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat32);
    assert_eq!(volume.disk_info().unwrap().free_clusters, 68519);
    write_file(&mut volume, "ONE.BIN", &pattern(512));

    let (bd, _) = volume.release();
    let memory = bd.release();
    let fs_info = block(memory, 1);
    assert_eq!(fs_info[488..492], 68518u32.to_le_bytes());
    assert_eq!(fs_info[492..496], 4u32.to_le_bytes());
}

#[test]
fn append_mode() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);

    // Append creates a missing file.
    let file = volume.open("LOG.TXT", OpenMode::Append).unwrap();
    volume.write(&file, b"abc").unwrap();
    volume.close(file).unwrap();

    let file = volume.open("LOG.TXT", OpenMode::Append).unwrap();
    assert_eq!(volume.position(&file).unwrap(), 3);
    volume.write(&file, b"def").unwrap();
    volume.close(file).unwrap();
    assert_eq!(read_file(&mut volume, "LOG.TXT"), b"abcdef");

    // Appending across a cluster boundary.
    let chunk = pattern(2048 - 6);
    let file = volume.open("LOG.TXT", OpenMode::Append).unwrap();
    volume.write(&file, &chunk).unwrap();
    volume.write(&file, b"tail").unwrap();
    volume.close(file).unwrap();
    let contents = read_file(&mut volume, "LOG.TXT");
    assert_eq!(contents.len(), 2052);
    assert_eq!(&contents[2048..], b"tail");
}

#[test]
fn seek_within_file() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    let data = pattern(5000);
    write_file(&mut volume, "SEEK.BIN", &data);

    let file = volume.open("SEEK.BIN", OpenMode::ReadOnly).unwrap();
    assert_eq!(volume.seek(&file, 5001), Err(FatError::InvalidSeek));
    volume.seek(&file, 4090).unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(volume.read(&file, &mut buf).unwrap(), 10);
    assert_eq!(buf[..], data[4090..4100]);
    volume.seek(&file, 5).unwrap();
    assert_eq!(volume.read(&file, &mut buf).unwrap(), 10);
    assert_eq!(buf[..], data[5..15]);
    volume.seek(&file, 5000).unwrap();
    assert!(volume.is_eof(&file).unwrap());
    volume.close(file).unwrap();
}

#[test]
fn open_conflicts() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    volume.mkdir("DIR").unwrap();

    assert_eq!(
        volume.open("MISSING.TXT", OpenMode::ReadOnly),
        Err(FatError::NotFound)
    );
    assert_eq!(volume.open("DIR", OpenMode::ReadOnly), Err(FatError::IsADirectory));
    assert_eq!(volume.open("/", OpenMode::ReadOnly), Err(FatError::InvalidPath));
    assert_eq!(
        volume.open("NAMETOOLONG.TXT", OpenMode::CreateAlways),
        Err(FatError::InvalidPath)
    );
    assert_eq!(
        volume.open("1:/A.TXT", OpenMode::CreateAlways),
        Err(FatError::InvalidDrive)
    );
    assert_eq!(
        volume.open("x:/A.TXT", OpenMode::CreateAlways),
        Err(FatError::InvalidPath)
    );

    let file = volume.open("A.TXT", OpenMode::CreateAlways).unwrap();
    assert_eq!(
        volume.open("a.txt", OpenMode::ReadOnly),
        Err(FatError::FileAlreadyOpen)
    );
    assert_eq!(volume.remove("A.TXT"), Err(FatError::FileAlreadyOpen));
    volume.close(file).unwrap();

    let file = volume.open("A.TXT", OpenMode::ReadOnly).unwrap();
    assert_eq!(volume.write(&file, b"no"), Err(FatError::WriteFailed));
    volume.close(file).unwrap();
}

#[test]
fn open_file_table_is_bounded() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);

    let mut handles = Vec::new();
    for i in 0..MAX_OPEN_FILES {
        let name = format!("F{}.TXT", i);
        handles.push(volume.open(&name, OpenMode::CreateAlways).unwrap());
    }
    assert_eq!(volume.open_files(), MAX_OPEN_FILES);
    assert_eq!(
        volume.open("ONEMORE.TXT", OpenMode::CreateAlways),
        Err(FatError::TooManyOpenFiles)
    );

    let first = handles.remove(0);
    let id = first.id();
    volume.close(first).unwrap();
    let again = volume.open("ONEMORE.TXT", OpenMode::CreateAlways).unwrap();
    assert_ne!(again.id(), id);
    handles.push(again);
    for handle in handles {
        volume.close(handle).unwrap();
    }
    assert_eq!(volume.open_files(), 0);
}

#[test]
fn mkdir_and_paths() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);

    volume.mkdir("LOGS").unwrap();
    let free = volume.disk_info().unwrap().free_clusters;
    // A second mkdir changes nothing.
    volume.mkdir("0:/logs").unwrap();
    assert_eq!(volume.disk_info().unwrap().free_clusters, free);
    assert!(volume.stat("LOGS").unwrap().is_dir());

    volume.mkdir("/LOGS/2024").unwrap();
    write_file(&mut volume, "LOGS/2024/DAY1.CSV", b"1,2,3\n");
    assert_eq!(read_file(&mut volume, "\\logs\\2024\\day1.csv"), b"1,2,3\n");

    write_file(&mut volume, "DATA.TXT", b"x");
    assert_eq!(volume.mkdir("DATA.TXT"), Err(FatError::AlreadyExists));
    assert_eq!(volume.mkdir("NOPE/SUB"), Err(FatError::NotFound));
    assert_eq!(
        volume.open("DATA.TXT/X.TXT", OpenMode::CreateAlways),
        Err(FatError::NotADirectory)
    );
    assert!(volume.exists("LOGS/2024/DAY1.CSV").unwrap());
    assert!(!volume.exists("LOGS/2024/DAY2.CSV").unwrap());

    assert_eq!(names(&mut volume, "LOGS"), ["2024/"]);
    assert_eq!(names(&mut volume, "/LOGS/2024"), ["DAY1.CSV"]);
    assert_eq!(names(&mut volume, ""), ["LOGS/", "DATA.TXT"]);
}

#[test]
fn dot_entries_on_disk() {
    let mut memory = vec![0u8; FAT32_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat32);
    volume.mkdir("A").unwrap();
    volume.mkdir("A/B").unwrap();
    let a = volume.stat("A").unwrap().first_cluster();
    let b = volume.stat("A/B").unwrap().first_cluster();
    assert_eq!((a, b), (Cluster(3), Cluster(4)));

    let (bd, _) = volume.release();
    let memory = bd.release();
    let data_start = 32 + 2 * 540;
    let dir_a = block(memory, data_start + 1);
    assert_eq!(dir_a[0..11], *b".          ");
    assert_eq!(dir_a[11], 0x10);
    assert_eq!(dir_a[26..28], hex!("0300"));
    // ".." of a directory in the root points at cluster 0.
    assert_eq!(dir_a[32..43], *b"..         ");
    assert_eq!(dir_a[58..60], hex!("0000"));
    assert_eq!(dir_a[64..75], *b"B          ");

    let dir_b = block(memory, data_start + 2);
    assert_eq!(dir_b[26..28], hex!("0400"));
    assert_eq!(dir_b[58..60], hex!("0300"));
}

#[test]
fn scan_skips_hidden_slots() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    write_file(&mut volume, "ONE.TXT", b"1");
    write_file(&mut volume, "TWO.TXT", b"2");
    write_file(&mut volume, "THREE.TXT", b"3");
    volume.remove("TWO.TXT").unwrap();

    assert_eq!(names(&mut volume, "/"), ["ONE.TXT", "THREE.TXT"]);
    // Scanning again starts over.
    let count = volume.scan("").unwrap().count();
    assert_eq!(count, 2);

    // The deleted slot is reused.
    write_file(&mut volume, "FOUR.TXT", b"4");
    assert_eq!(names(&mut volume, ""), ["ONE.TXT", "FOUR.TXT", "THREE.TXT"]);

    assert_eq!(volume.scan("MISSING").err(), Some(FatError::NotFound));
    assert_eq!(volume.scan("ONE.TXT").err(), Some(FatError::NotADirectory));
}

#[test]
fn remove_files_and_directories() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    let free = volume.disk_info().unwrap().free_clusters;

    volume.mkdir("DIR").unwrap();
    write_file(&mut volume, "DIR/FILE.BIN", &pattern(10_000));
    assert_eq!(volume.remove("DIR"), Err(FatError::DirectoryNotEmpty));
    assert_eq!(volume.remove("DIR/.."), Err(FatError::InvalidPath));
    assert_eq!(volume.remove("GONE.TXT"), Err(FatError::NotFound));

    volume.remove("DIR/FILE.BIN").unwrap();
    assert!(!volume.exists("DIR/FILE.BIN").unwrap());
    volume.remove("DIR").unwrap();
    assert!(!volume.exists("DIR").unwrap());
    assert_eq!(volume.disk_info().unwrap().free_clusters, free);
}

#[test]
fn fat32_root_grows() {
    let mut memory = vec![0u8; FAT32_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat32);
    // One 512 byte cluster holds 16 entries.
    for i in 0..20 {
        write_file(&mut volume, &format!("FILE{}.TXT", i), b"x");
    }
    assert_eq!(volume.scan("").unwrap().count(), 20);
    assert_eq!(read_file(&mut volume, "FILE19.TXT"), b"x");
}

#[test]
fn fat16_root_is_fixed() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    for i in 0..512 {
        let file = volume
            .open(&format!("F{}", i), OpenMode::CreateAlways)
            .unwrap();
        volume.close(file).unwrap();
    }
    assert_eq!(
        volume.open("LAST.TXT", OpenMode::CreateAlways),
        Err(FatError::DirectoryFull)
    );
    assert_eq!(volume.mkdir("LASTDIR"), Err(FatError::DirectoryFull));
}

#[test]
fn disk_full() {
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = formatted(&mut memory, FatType::Fat16);
    let capacity = 8167 * 2048;

    let file = volume.open("FILL.BIN", OpenMode::CreateAlways).unwrap();
    let chunk = pattern(8192);
    let mut total = 0;
    loop {
        let n = volume.write(&file, &chunk).unwrap();
        total += n;
        if n < chunk.len() {
            break;
        }
    }
    assert_eq!(total, capacity);
    assert_eq!(volume.write(&file, b"more"), Err(FatError::DiskFull));
    volume.close(file).unwrap();

    assert_eq!(volume.stat("FILL.BIN").unwrap().file_size() as usize, capacity);
    assert_eq!(volume.disk_info().unwrap().free_clusters, 0);
    volume.remove("FILL.BIN").unwrap();
    assert_eq!(volume.disk_info().unwrap().free_clusters, 8167);
}

#[test]
fn clock_failures_are_reported() {
    init_logger();
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = FatVolume::new(
        MemoryBlockDevice::new(&mut memory),
        BrokenClock,
        VolumeConfig::default(),
    );
    let mut work = vec![Block::new(); 4];
    // Formatting does not need the clock; the serial falls back to 0.
    volume.format(DriveId(0), FatType::Fat16, 0, &mut work).unwrap();
    assert_eq!(
        volume.open("A.TXT", OpenMode::CreateAlways),
        Err(FatError::ClockUnavailable)
    );
    assert_eq!(volume.mkdir("DIR"), Err(FatError::ClockUnavailable));
    assert_eq!(volume.now(), Err(FatError::ClockUnavailable));
    assert!(!volume.exists("A.TXT").unwrap());

    let (bd, _) = volume.release();
    assert_eq!(block(bd.release(), 0)[39..43], [0, 0, 0, 0]);
}

/// A clock that can be stopped while the volume owns it.
struct SwitchedClock<'a>(&'a Cell<bool>);

impl TimeSource for SwitchedClock<'_> {
    fn now(&mut self) -> Result<FatTimestamp, TimeError> {
        if self.0.get() {
            Ok(stamp())
        } else {
            Err(TimeError::ClockUnavailable)
        }
    }
}

#[test]
fn close_without_clock_keeps_data() {
    init_logger();
    let running = Cell::new(true);
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    let mut volume = FatVolume::new(
        MemoryBlockDevice::new(&mut memory),
        SwitchedClock(&running),
        VolumeConfig::default(),
    );
    let mut work = vec![Block::new(); 8];
    volume.format(DriveId(0), FatType::Fat16, 0, &mut work).unwrap();
    volume.mount(DriveId(0), true).unwrap();
    let free = volume.disk_info().unwrap().free_clusters;

    let data = pattern(10_000);
    let file = volume.open("DATA.BIN", OpenMode::CreateAlways).unwrap();
    assert_eq!(volume.write(&file, &data).unwrap(), data.len());
    running.set(false);
    assert_eq!(volume.close(file), Err(FatError::ClockUnavailable));
    volume.unmount().unwrap();
    running.set(true);

    volume.mount(DriveId(0), true).unwrap();
    let entry = volume.stat("DATA.BIN").unwrap();
    assert_eq!(entry.file_size(), 10_000);
    assert_ne!(entry.first_cluster(), Cluster::EMPTY);
    // The creation stamp stays in place of a modification time.
    assert_eq!(entry.modified(), stamp());
    // 10 000 bytes in 2 KiB clusters.
    assert_eq!(volume.disk_info().unwrap().free_clusters, free - 5);

    let file = volume.open("DATA.BIN", OpenMode::ReadOnly).unwrap();
    let mut contents = vec![0u8; 10_000];
    let mut done = 0;
    while done < contents.len() {
        let n = volume.read(&file, &mut contents[done..]).unwrap();
        assert_ne!(n, 0);
        done += n;
    }
    volume.close(file).unwrap();
    assert_eq!(contents, data);
}

#[test]
fn empty_directories_scan_cleanly() {
    for &(fat_type, sectors) in &[(FatType::Fat16, FAT16_SECTORS), (FatType::Fat32, FAT32_SECTORS)] {
        let mut memory = vec![0u8; sectors * Block::LEN];
        let mut volume = formatted(&mut memory, fat_type);
        assert_eq!(volume.scan("/").unwrap().count(), 0);
        volume.mkdir("EMPTY").unwrap();
        let entries: Vec<_> = volume.scan("EMPTY").unwrap().collect();
        assert!(entries.is_empty(), "{:?}: {} entries", fat_type, entries.len());
        assert_eq!(names(&mut volume, "/"), ["EMPTY/"]);
    }
}

#[test]
fn short_names() {
    assert_eq!(ShortName::new("readme.txt").unwrap().as_bytes(), b"README  TXT");
    assert_eq!(ShortName::new("ADC1000.dat").unwrap().as_bytes(), b"ADC1000 DAT");
    assert_eq!(ShortName::new("NOEXT").unwrap().as_bytes(), b"NOEXT      ");
    assert_eq!(ShortName::new(".."), Ok(ShortName::DOTDOT));
    assert_eq!(ShortName::new(""), Err(ShortNameError::Empty));
    assert_eq!(ShortName::new("toolongname"), Err(ShortNameError::BaseTooLong));
    assert_eq!(ShortName::new("a.text"), Err(ShortNameError::ExtensionTooLong));
    assert_eq!(ShortName::new(".hidden"), Err(ShortNameError::MisplacedPeriod));
    assert_eq!(ShortName::new("a.b.c"), Err(ShortNameError::MisplacedPeriod));
    assert_eq!(
        ShortName::new("a b.txt"),
        Err(ShortNameError::InvalidCharacter(b' '))
    );

    let name = ShortName::new("log_1.csv").unwrap();
    assert_eq!(name.base_name(), b"LOG_1");
    assert_eq!(name.extension(), b"CSV");
    assert_eq!(format!("{}", name), "LOG_1.CSV");
    assert_eq!(format!("{}", ShortName::new("NOEXT").unwrap()), "NOEXT");
}

#[test]
fn boot_sector_checks() {
    assert_eq!(
        BiosParameterBlock::new(Block::new()).err(),
        Some(BpbError::InvalidSignature([0, 0]))
    );

    let layout = Layout::new(FatType::Fat16, 32768, 0).unwrap();
    let mut memory = vec![0u8; FAT16_SECTORS * Block::LEN];
    formatted(&mut memory, FatType::Fat16);
    let mut boot = Block::new();
    boot.contents.copy_from_slice(block(&memory, 0));

    let bpb = BiosParameterBlock::new(boot.clone()).unwrap();
    assert_eq!(u32::from(bpb.sectors_per_cluster().get()), layout.sectors_per_cluster);
    assert_eq!(bpb.total_sector_count().get(), 32768);
    assert_eq!(bpb.root_dir_sectors(), layout.root_dir_sectors());

    boot.contents[16] = 0;
    assert_eq!(BiosParameterBlock::new(boot.clone()).err(), Some(BpbError::NoFats));
    boot.contents[16] = 2;
    boot.contents[11..13].copy_from_slice(&1024u16.to_le_bytes());
    assert_eq!(
        BiosParameterBlock::new(boot).err(),
        Some(BpbError::UnsupportedBytesPerSector(1024))
    );
}
