//! cardls: inspect a FAT16 flash card image the way the player sees it.
//!
//! ```bash
//! cardls card.img info             # partition table and volume layout
//! cardls card.img dirs             # directories with track counts
//! cardls card.img tracks 1         # tracks of directory 1 (0 is the root)
//! cardls card.img cat 1 2 -o t.wav # stream a track out with bulk reads
//! cardls card.img wav 1 2          # WAV header of a track
//! ```

mod image;
mod logger;

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{bail, Result};
use cardfs::catalog::Selection;
use cardfs::disk::SECTOR_SIZE;
use cardfs::driver::{FatDriver, OpenFlags};
use cardfs::partition::partition_entries;
use cardfs::wav::WavHeader;
use clap::{Parser, Subcommand};

use image::ImageFile;

/// Sectors requested per bulk read while streaming
const STREAM_SECTORS: usize = 32;

#[derive(Parser)]
#[command(name = "cardls", about = "Inspect a FAT16 flash card image")]
struct Cli {
    /// Raw card image, starting with the MBR
    image: PathBuf,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Extension that marks a file as a track
    #[arg(long, default_value = "WAV", global = true)]
    extension: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the partition table and volume layout
    Info,

    /// List directories with their track counts
    Dirs,

    /// List the tracks of a directory
    Tracks {
        /// Directory index, 0 for the root
        dir: u16,
    },

    /// Copy a track's bytes to stdout or a file
    Cat {
        dir: u16,
        track: u16,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the WAV header of a track
    Wav { dir: u16, track: u16 },
}

type Driver = FatDriver<ImageFile>;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose)?;

    let mut driver = FatDriver::mount(ImageFile::open(&cli.image)?)?;
    driver.set_track_extension(&cli.extension);

    match cli.command {
        Commands::Info => info(&mut driver),
        Commands::Dirs => dirs(&mut driver),
        Commands::Tracks { dir } => tracks(&mut driver, dir),
        Commands::Cat { dir, track, output } => cat(&mut driver, dir, track, output),
        Commands::Wav { dir, track } => wav(&mut driver, dir, track),
    }
}

fn info(driver: &mut Driver) -> Result<()> {
    let entries = partition_entries(driver.fs_mut().disk.fetch(0)?);
    for (i, entry) in entries.iter().enumerate().filter(|(_, e)| e.is_defined()) {
        println!(
            "partition {}: type {:#04x} start {} sectors {}{}",
            i,
            entry.partition_type,
            entry.start_lba,
            entry.sector_count,
            if entry.bootable { " (active)" } else { "" },
        );
    }

    let fs = driver.fs();
    let bpb = &fs.bpb;
    let g = &fs.geometry;
    println!("sectors/cluster   {}", bpb.sectors_per_cluster);
    println!("reserved sectors  {}", bpb.reserved_sectors);
    println!("FAT copies        {} x {} sectors", bpb.fat_count, bpb.sectors_per_fat);
    println!("root entries      {}", bpb.root_directory_entries);
    println!("hidden sectors    {}", bpb.hidden_sectors);
    println!("FAT               {}..{}", g.fat_start, g.fat_end);
    println!("root directory    {} ({} sectors)", g.root_directory_start, g.root_directory_sectors);
    println!("data              {}", g.data_start);
    println!("clusters          {} x {} bytes", g.cluster_count, g.bytes_per_cluster);
    Ok(())
}

fn dirs(driver: &mut Driver) -> Result<()> {
    let total = match driver.count_or_seek_directories(None)? {
        Selection::Counted(total) => total,
        Selection::Selected { .. } => 0,
    };
    for index in 0..=total {
        let name = match driver.count_or_seek_directories(Some(index))? {
            Selection::Selected { name, .. } => name,
            Selection::Counted(_) => continue,
        };
        let tracks = match driver.count_or_seek_tracks(index, None)? {
            Selection::Counted(count) => count,
            Selection::Selected { .. } => 0,
        };
        println!("{:3}  {:<12}  {} tracks", index, name.as_str(), tracks);
    }
    Ok(())
}

/// Make track `track` of directory `dir` current and return its name
fn select_track(driver: &mut Driver, dir: u16, track: u16) -> Result<String> {
    match driver.count_or_seek_tracks(dir, Some(track))? {
        Selection::Selected { name, .. } => Ok(name.as_str().to_owned()),
        Selection::Counted(total) => bail!("directory {} has {} tracks", dir, total),
    }
}

fn tracks(driver: &mut Driver, dir: u16) -> Result<()> {
    let total = match driver.count_or_seek_tracks(dir, None)? {
        Selection::Counted(total) => total,
        Selection::Selected { .. } => 0,
    };
    println!("{}: {} tracks", driver.current_directory_name().as_str(), total);
    for index in 1..=total {
        let name = select_track(driver, dir, index)?;
        let handle = driver.open(&name, OpenFlags::READ_ONLY)?;
        let status = driver.stat(handle)?;
        driver.close(handle)?;
        println!(
            "{:3}  {:<12}  {:>10} bytes  cluster {}",
            index, name, status.byte_size, status.first_cluster
        );
    }
    Ok(())
}

fn cat(driver: &mut Driver, dir: u16, track: u16, output: Option<PathBuf>) -> Result<()> {
    let name = select_track(driver, dir, track)?;
    let handle = driver.open(&name, OpenFlags::READ_ONLY)?;
    let size = driver.stat(handle)?.byte_size as usize;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(io::stdout().lock()),
    };

    let mut buffer = vec![0u8; STREAM_SECTORS * SECTOR_SIZE];
    let mut written = 0;
    loop {
        let sectors = driver.bulk_read(handle, &mut buffer)?;
        if sectors == 0 {
            break;
        }
        // the last sector is only partly file data
        let bytes = (sectors * SECTOR_SIZE).min(size - written);
        out.write_all(&buffer[..bytes])?;
        written += bytes;
    }
    out.flush()?;
    driver.close(handle)?;
    log::info!("{}: {} bytes", name, written);
    Ok(())
}

fn wav(driver: &mut Driver, dir: u16, track: u16) -> Result<()> {
    let name = select_track(driver, dir, track)?;
    let handle = driver.open(&name, OpenFlags::READ_ONLY)?;
    let header = WavHeader::read(driver, handle)?;
    driver.close(handle)?;

    println!("{}", name);
    println!("format       {}", header.format_tag);
    println!("channels     {}", header.channels);
    println!("sample rate  {} Hz", header.sample_rate);
    println!("bits         {}", header.bits_per_sample);
    println!("data         {} bytes at {}", header.data_size, header.data_offset);
    println!("duration     {} s", header.duration_secs());
    println!("playable     {}", if header.is_playable() { "yes" } else { "no" });
    Ok(())
}
