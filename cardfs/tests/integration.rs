use std::io::{Cursor, Seek, SeekFrom, Write};

use cardfs::catalog::Selection;
use cardfs::disk::{BlockDevice, Sector, SECTOR_SIZE};
use cardfs::driver::{FatDriver, FatError, OpenFlags};
use cardfs::wav::WavHeader;

const PARTITION_START: u32 = 63;
const PARTITION_BYTES: usize = 32 * 1024 * 1024;

/// Card image held in memory, counting device requests
struct ImageDisk {
    data: Vec<u8>,
    reads: usize,
    bulk_requests: usize,
}

impl ImageDisk {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            reads: 0,
            bulk_requests: 0,
        }
    }
}

impl BlockDevice for ImageDisk {
    fn read_sector(&mut self, lba: u32, buffer: &mut Sector) -> bool {
        let start = lba as usize * SECTOR_SIZE;
        match self.data.get(start..start + SECTOR_SIZE) {
            Some(sector) => {
                self.reads += 1;
                buffer.copy_from_slice(sector);
                true
            }
            None => false,
        }
    }

    fn read_sectors(&mut self, lba: u32, buffer: &mut [u8]) -> bool {
        let start = lba as usize * SECTOR_SIZE;
        match self.data.get(start..start + buffer.len()) {
            Some(sectors) => {
                self.bulk_requests += 1;
                self.reads += buffer.len() / SECTOR_SIZE;
                buffer.copy_from_slice(sectors);
                true
            }
            None => false,
        }
    }
}

/// A `fatfs` volume over an in-memory partition
type Volume<'c, 'p> = fatfs::FileSystem<&'c mut Cursor<&'p mut Vec<u8>>>;

/// Format a FAT16 partition with `fatfs` and let `populate` fill it.
fn fat16_partition(populate: impl FnOnce(&Volume<'_, '_>)) -> Vec<u8> {
    let mut partition = vec![0u8; PARTITION_BYTES];
    {
        let mut cursor = Cursor::new(&mut partition);
        fatfs::format_volume(
            &mut cursor,
            fatfs::FormatVolumeOptions::new().fat_type(fatfs::FatType::Fat16),
        )
        .expect("format_volume failed");
    }
    {
        let mut cursor = Cursor::new(&mut partition);
        let fs = fatfs::FileSystem::new(&mut cursor, fatfs::FsOptions::new())
            .expect("FileSystem::new failed");
        populate(&fs);
    }
    partition
}

/// Put a partition behind an MBR whose first entry points at it.
fn card_image(partition: Vec<u8>) -> Vec<u8> {
    let mut image = vec![0u8; PARTITION_START as usize * SECTOR_SIZE];
    let sectors = (partition.len() / SECTOR_SIZE) as u32;
    image[446] = 0x80;
    image[446 + 4] = 0x06;
    image[446 + 8..446 + 12].copy_from_slice(&PARTITION_START.to_le_bytes());
    image[446 + 12..446 + 16].copy_from_slice(&sectors.to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;
    image.extend_from_slice(&partition);
    image
}

fn mount(populate: impl FnOnce(&Volume<'_, '_>)) -> FatDriver<ImageDisk> {
    let image = card_image(fat16_partition(populate));
    FatDriver::mount(ImageDisk::new(image)).expect("mount failed")
}

fn content(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ seed).collect()
}

fn write_file(dir: &fatfs::Dir<&mut Cursor<&mut Vec<u8>>>, name: &str, data: &[u8]) {
    let mut file = dir.create_file(name).unwrap();
    file.truncate().unwrap();
    file.write_all(data).unwrap();
}

fn read_all(driver: &mut FatDriver<ImageDisk>, handle: u32, chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buffer = vec![0u8; chunk];
    loop {
        let n = driver.read(handle, &mut buffer).unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buffer[..n]);
    }
    out
}

fn wav_bytes(samples: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + samples as u32).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&44100u32.to_le_bytes());
    out.extend_from_slice(&(44100u32 * 4).to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(samples as u32).to_le_bytes());
    out.extend(content(samples, 0x5A));
    out
}

#[test]
fn mounts_partition_formatted_by_fatfs() {
    let driver = mount(|_| {});
    let fs = driver.fs();
    assert_eq!(fs.partition.start_lba, PARTITION_START);
    assert_eq!(fs.bpb.bytes_per_sector, 512);
    assert_eq!(fs.geometry.fat_start, PARTITION_START + fs.bpb.reserved_sectors as u32);
    assert!(fs.geometry.fat_end <= fs.geometry.root_directory_start);
    assert!(fs.geometry.root_directory_start < fs.geometry.data_start);
}

#[test]
fn reads_file_written_by_fatfs() {
    let data = content(10_000, 0);
    let expected = data.clone();
    let mut driver = mount(move |fs| write_file(&fs.root_dir(), "SONG1.WAV", &data));

    let handle = driver.open("song1.wav", OpenFlags::READ_ONLY).unwrap();
    assert_eq!(driver.stat(handle).unwrap().byte_size, 10_000);
    assert_eq!(read_all(&mut driver, handle, 700), expected);
    assert_eq!(driver.eof(handle), Ok(true));
    driver.close(handle).unwrap();
}

#[test]
fn bulk_read_streams_whole_file() {
    let data = content(8192 + 100, 3);
    let expected = data.clone();
    let mut driver = mount(move |fs| write_file(&fs.root_dir(), "LONG.WAV", &data));

    let handle = driver.open("LONG.WAV", OpenFlags::READ_ONLY).unwrap();
    let mut streamed = Vec::new();
    let mut buffer = vec![0u8; 4096];
    let mut sectors = 0;
    loop {
        let n = driver.bulk_read(handle, &mut buffer).unwrap();
        if n == 0 {
            break;
        }
        sectors += n;
        streamed.extend_from_slice(&buffer[..n * SECTOR_SIZE]);
    }
    assert_eq!(sectors, 17);
    assert_eq!(&streamed[..expected.len()], &expected[..]);
}

#[test]
fn fragmented_file_reads_back_in_order() {
    let first = content(300, 1);
    let tail = content(5000, 2);
    let mut expected = first.clone();
    expected.extend_from_slice(&tail);

    let mut driver = mount(move |fs| {
        let root = fs.root_dir();
        write_file(&root, "FRAG.BIN", &first);
        write_file(&root, "FILLER.BIN", &content(6000, 9));
        let mut file = root.open_file("FRAG.BIN").unwrap();
        file.seek(SeekFrom::End(0)).unwrap();
        file.write_all(&tail).unwrap();
    });

    let handle = driver.open("FRAG.BIN", OpenFlags::READ_ONLY).unwrap();
    assert_eq!(read_all(&mut driver, handle, 512), expected);

    driver.seek(handle, cardfs::driver::SeekFrom::Start(0)).unwrap();
    let mut buffer = vec![0u8; 16 * SECTOR_SIZE];
    let before = driver.fs().disk.device().bulk_requests;
    let sectors = driver.bulk_read(handle, &mut buffer).unwrap();
    assert_eq!(sectors, 11);
    assert!(driver.fs().disk.device().bulk_requests >= before + 2);
    assert_eq!(&buffer[..expected.len()], &expected[..]);
}

#[test]
fn enumerates_directories_and_tracks() {
    let mut driver = mount(|fs| {
        let root = fs.root_dir();
        write_file(&root, "INTRO.WAV", b"intro");
        let album = root.create_dir("ALBUM1").unwrap();
        write_file(&album, "A.WAV", b"track a");
        write_file(&album, "README.TXT", b"notes");
        write_file(&album, "B.WAV", b"track b");
        let second = root.create_dir("ALBUM2").unwrap();
        write_file(&second, "C.WAV", b"track c");
    });

    assert_eq!(driver.count_or_seek_directories(None), Ok(Selection::Counted(2)));
    assert_eq!(driver.count_or_seek_tracks(0, None), Ok(Selection::Counted(1)));
    assert_eq!(driver.count_or_seek_tracks(1, None), Ok(Selection::Counted(2)));
    assert_eq!(driver.count_or_seek_tracks(3, None), Err(FatError::NotFound));

    let name = match driver.count_or_seek_tracks(2, Some(1)).unwrap() {
        Selection::Selected { name, .. } => name,
        other => panic!("expected a track, got {:?}", other),
    };
    assert_eq!(name.as_str(), "C.WAV");
    assert_eq!(driver.current_directory_name().as_str(), "ALBUM2");

    let handle = driver.open(name.as_str(), OpenFlags::READ_ONLY).unwrap();
    assert_eq!(read_all(&mut driver, handle, 64), b"track c");
}

#[test]
fn long_names_do_not_hide_tracks() {
    let mut driver = mount(|fs| {
        let root = fs.root_dir();
        write_file(&root, "My Favourite Song.wav", b"lfn");
        write_file(&root, "PLAIN.WAV", b"sfn");
    });
    assert_eq!(driver.count_or_seek_tracks(0, None), Ok(Selection::Counted(2)));
    assert_eq!(driver.open("My Favourite Song.wav", OpenFlags::READ_ONLY), Err(FatError::NotFound));
    assert!(driver.open("plain.wav", OpenFlags::READ_ONLY).is_ok());
}

#[test]
fn wav_header_probe_then_stream() {
    let wav = wav_bytes(4000);
    let mut driver = mount(move |fs| write_file(&fs.root_dir(), "TONE.WAV", &wav));

    let handle = driver.open("TONE.WAV", OpenFlags::READ_ONLY).unwrap();
    let header = WavHeader::read(&mut driver, handle).unwrap();
    assert!(header.is_playable());
    assert_eq!(header.data_offset, 44);
    assert_eq!(header.data_size, 4000);

    // position is back at 0, so sector streaming is allowed
    let mut sector = [0u8; SECTOR_SIZE];
    assert_eq!(driver.bulk_read(handle, &mut sector), Ok(1));
    assert_eq!(&sector[..4], b"RIFF");
}

/// Partition at 63, 4 sectors per cluster, 1 reserved sector, two 9-sector
/// FATs, 16 root entries: FAT at 64, root at 82, data at 83.
fn reference_card() -> Vec<u8> {
    let mut image = vec![0u8; 400 * SECTOR_SIZE];
    let sector = |lba: u32| lba as usize * SECTOR_SIZE;

    image[446] = 0x80;
    image[446 + 4] = 0x06;
    image[446 + 8..446 + 12].copy_from_slice(&63u32.to_le_bytes());
    image[446 + 12..446 + 16].copy_from_slice(&337u32.to_le_bytes());
    image[510] = 0x55;
    image[511] = 0xAA;

    let boot = sector(63);
    image[boot + 11..boot + 13].copy_from_slice(&512u16.to_le_bytes());
    image[boot + 13] = 4;
    image[boot + 14..boot + 16].copy_from_slice(&1u16.to_le_bytes());
    image[boot + 16] = 2;
    image[boot + 17..boot + 19].copy_from_slice(&16u16.to_le_bytes());
    image[boot + 19..boot + 21].copy_from_slice(&337u16.to_le_bytes());
    image[boot + 21] = 0xF8;
    image[boot + 22..boot + 24].copy_from_slice(&9u16.to_le_bytes());
    image[boot + 28..boot + 32].copy_from_slice(&63u32.to_le_bytes());
    image[boot + 510] = 0x55;
    image[boot + 511] = 0xAA;

    for fat in [64, 73] {
        let start = sector(fat);
        let entries: [u16; 7] = [0xFFF8, 0xFFFF, 0, 0, 0, 6, 0xFFFF];
        for (i, entry) in entries.iter().enumerate() {
            image[start + i * 2..start + i * 2 + 2].copy_from_slice(&entry.to_le_bytes());
        }
    }

    let root = sector(82);
    image[root..root + 11].copy_from_slice(b"SONG1   WAV");
    image[root + 11] = 0x20;
    image[root + 26..root + 28].copy_from_slice(&5u16.to_le_bytes());
    image[root + 28..root + 32].copy_from_slice(&2048u32.to_le_bytes());

    // clusters 5 and 6 are sectors 95..103
    for (i, byte) in image[sector(95)..sector(103)].iter_mut().enumerate() {
        *byte = (i % 7) as u8 + 0x30;
    }
    image
}

#[test]
fn reference_card_streams_four_sectors_then_eof() {
    let mut driver = FatDriver::mount(ImageDisk::new(reference_card())).unwrap();
    let handle = driver.open("SONG1.WAV", OpenFlags::READ_ONLY).unwrap();

    let mut streamed = Vec::new();
    let mut sector = [0u8; SECTOR_SIZE];
    for _ in 0..4 {
        assert_eq!(driver.bulk_read(handle, &mut sector), Ok(1));
        streamed.extend_from_slice(&sector);
    }
    let expected: Vec<u8> = (0..2048).map(|i| (i % 7) as u8 + 0x30).collect();
    assert_eq!(streamed, expected);

    assert_eq!(driver.bulk_read(handle, &mut sector), Ok(0));
    assert_eq!(driver.eof(handle), Ok(true));
}

#[test]
fn metadata_after_bulk_read_rereads_device() {
    let mut driver = FatDriver::mount(ImageDisk::new(reference_card())).unwrap();
    let handle = driver.open("SONG1.WAV", OpenFlags::READ_ONLY).unwrap();
    let mut sector = [0u8; SECTOR_SIZE];
    driver.bulk_read(handle, &mut sector).unwrap();
    assert_eq!(driver.fs().disk.cached_address(), None);

    let reads = driver.fs().disk.device().reads;
    driver.fs_mut().find_by_name("SONG1.WAV").unwrap().unwrap();
    assert_eq!(driver.fs().disk.device().reads, reads + 1);
}
