use bitflags::bitflags;

use crate::disk::{BlockDevice, SectorCache, SECTOR_SIZE};
use crate::driver::{FatError, FatResult};
use crate::table::AllocationTable;

pub const DIR_ENTRY_SIZE: usize = 32;
pub const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / DIR_ENTRY_SIZE;

/// First name byte of a deleted entry
const SLOT_FREE: u8 = 0xE5;
/// First name byte of a never-used entry; nothing follows it
const SLOT_FREE_LAST: u8 = 0x00;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        /// Exact value carried by long file name fragments
        const LONG_NAME = Self::READ_ONLY.bits()
            | Self::HIDDEN.bits()
            | Self::SYSTEM.bits()
            | Self::VOLUME_ID.bits();
    }
}

/// Snapshot of a 32-byte on-disk directory entry. Copies are taken out of the
/// sector cache, so an entry stays valid after the cache moves on.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DirEntry {
    raw: [u8; DIR_ENTRY_SIZE],
}

impl DirEntry {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw.copy_from_slice(&bytes[..DIR_ENTRY_SIZE]);
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8; DIR_ENTRY_SIZE] {
        &self.raw
    }

    pub fn short_name(&self) -> ShortName {
        let mut name = [0u8; 11];
        name.copy_from_slice(&self.raw[..11]);
        ShortName(name)
    }

    pub fn attributes(&self) -> Attributes {
        Attributes::from_bits_retain(self.raw[11])
    }

    /// Free slot: deleted, or never used
    pub fn is_free(&self) -> bool {
        matches!(self.raw[0], SLOT_FREE | SLOT_FREE_LAST)
    }

    pub fn is_deleted(&self) -> bool {
        self.raw[0] == SLOT_FREE
    }

    /// Never-used slot; no allocated entries follow it
    pub fn is_end(&self) -> bool {
        self.raw[0] == SLOT_FREE_LAST
    }

    pub fn is_long_name(&self) -> bool {
        self.attributes() == Attributes::LONG_NAME
    }

    pub fn is_directory(&self) -> bool {
        self.attributes().contains(Attributes::DIRECTORY)
    }

    pub fn is_volume_id(&self) -> bool {
        !self.is_long_name() && self.attributes().contains(Attributes::VOLUME_ID)
    }

    /// Low word of the first cluster. The high word is always zero on FAT16.
    pub fn first_cluster(&self) -> u16 {
        u16::from_le_bytes([self.raw[26], self.raw[27]])
    }

    pub fn byte_size(&self) -> u32 {
        u32::from_le_bytes([self.raw[28], self.raw[29], self.raw[30], self.raw[31]])
    }

    pub fn creation_time(&self) -> FileTime {
        FileTime(u16::from_le_bytes([self.raw[14], self.raw[15]]))
    }

    pub fn creation_date(&self) -> FileDate {
        FileDate(u16::from_le_bytes([self.raw[16], self.raw[17]]))
    }

    pub fn access_date(&self) -> FileDate {
        FileDate(u16::from_le_bytes([self.raw[18], self.raw[19]]))
    }

    pub fn modification_time(&self) -> FileTime {
        FileTime(u16::from_le_bytes([self.raw[22], self.raw[23]]))
    }

    pub fn modification_date(&self) -> FileDate {
        FileDate(u16::from_le_bytes([self.raw[24], self.raw[25]]))
    }
}

impl core::fmt::Debug for DirEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DirEntry")
            .field("name", &self.short_name().display().as_str())
            .field("attributes", &self.attributes())
            .field("first_cluster", &self.first_cluster())
            .field("byte_size", &self.byte_size())
            .finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct FileTime(u16);

impl FileTime {
    pub fn get_hours(&self) -> u16 {
        self.0 >> 11
    }

    pub fn get_minutes(&self) -> u16 {
        (self.0 >> 5) & 0x3f
    }

    pub fn get_seconds(&self) -> u16 {
        (self.0 & 0x1f) << 1
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct FileDate(u16);

impl FileDate {
    pub fn get_year(&self) -> u16 {
        ((self.0 >> 9) & 0x7f) + 1980
    }

    pub fn get_month(&self) -> u16 {
        (self.0 >> 5) & 0xf
    }

    pub fn get_day(&self) -> u16 {
        self.0 & 0x1f
    }
}

/// An 8.3 name in its on-disk form: 8 name bytes and 3 extension bytes,
/// uppercase and space padded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShortName(pub [u8; 11]);

impl ShortName {
    /// Convert a user-facing name like "song1.wav" into "SONG1   WAV".
    /// The base ends at the first '.', and both parts are cut to size.
    pub fn from_filename(filename: &str) -> Self {
        let mut name = [b' '; 11];
        if filename == "." || filename == ".." {
            name[..filename.len()].copy_from_slice(filename.as_bytes());
            return ShortName(name);
        }
        let (base, ext) = match filename.split_once('.') {
            Some(pair) => pair,
            None => (filename, ""),
        };
        for (slot, b) in name[..8].iter_mut().zip(base.bytes()) {
            *slot = b.to_ascii_uppercase();
        }
        for (slot, b) in name[8..].iter_mut().zip(ext.bytes()) {
            *slot = b.to_ascii_uppercase();
        }
        ShortName(name)
    }

    pub fn base(&self) -> &[u8] {
        &self.0[..8]
    }

    pub fn ext(&self) -> &[u8] {
        &self.0[8..]
    }

    /// "NAME.EXT", with padding removed and the dot left out when there is
    /// no extension.
    pub fn display(&self) -> heapless::String<12> {
        let mut out = heapless::String::new();
        for &b in trim_padding(self.base()) {
            let _ = out.push(b as char);
        }
        let ext = trim_padding(self.ext());
        if !ext.is_empty() {
            let _ = out.push('.');
            for &b in ext {
                let _ = out.push(b as char);
            }
        }
        out
    }
}

pub(crate) fn trim_padding(bytes: &[u8]) -> &[u8] {
    let len = bytes.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &bytes[..len]
}

/// Which slots a directory scan stops on
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScanMode {
    /// Allocated entries; the scan ends at the first never-used slot
    Used,
    /// Deleted or never-used slots
    Free,
}

/// The two shapes a FAT16 directory can take on disk
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DirRegion {
    /// Fixed run of sectors between the FATs and the data region
    Root { first_sector: u32, sectors: u32 },
    /// Any other directory, stored in a cluster chain like a file
    Chain { first_sector: u32 },
}

impl DirRegion {
    pub fn first_sector(&self) -> u32 {
        match *self {
            DirRegion::Root { first_sector, .. } => first_sector,
            DirRegion::Chain { first_sector } => first_sector,
        }
    }

    /// A root region of zero sectors holds no entries at all
    pub fn is_empty(&self) -> bool {
        matches!(self, DirRegion::Root { sectors: 0, .. })
    }
}

/// Scan position inside one directory
#[derive(Clone, Debug)]
pub struct DirCursor {
    region: DirRegion,
    /// Sector currently being scanned
    sector: u32,
    /// Slot last visited in `sector`; None before the first one
    slot: Option<usize>,
    /// Set once the scan has run out of entries
    finished: bool,
    /// Cluster boundaries crossed, to catch looping chains
    clusters_crossed: u32,
}

impl DirCursor {
    pub fn new(region: DirRegion) -> Self {
        Self {
            region,
            sector: region.first_sector(),
            slot: None,
            finished: region.is_empty(),
            clusters_crossed: 0,
        }
    }

    pub fn region(&self) -> DirRegion {
        self.region
    }

    pub fn is_root(&self) -> bool {
        matches!(self.region, DirRegion::Root { .. })
    }

    /// Sector and slot of the entry last returned
    pub fn position(&self) -> Option<(u32, usize)> {
        self.slot.map(|slot| (self.sector, slot))
    }

    /// Rewind to just before the first entry and return the first match.
    pub fn start_scan<D: BlockDevice>(
        &mut self,
        mode: ScanMode,
        table: &AllocationTable,
        disk: &mut SectorCache<D>,
    ) -> FatResult<Option<DirEntry>> {
        self.sector = self.region.first_sector();
        self.slot = None;
        self.finished = self.region.is_empty();
        self.clusters_crossed = 0;
        self.advance(mode, table, disk)
    }

    /// Step forward to the next entry matching `mode`. Returns None when the
    /// directory is exhausted, and keeps returning None until rewound.
    pub fn advance<D: BlockDevice>(
        &mut self,
        mode: ScanMode,
        table: &AllocationTable,
        disk: &mut SectorCache<D>,
    ) -> FatResult<Option<DirEntry>> {
        while !self.finished {
            let slot = self.slot.map_or(0, |s| s + 1);
            if slot >= ENTRIES_PER_SECTOR {
                match self.next_sector(table, disk)? {
                    Some(sector) => {
                        self.sector = sector;
                        self.slot = None;
                    }
                    None => self.finished = true,
                }
                continue;
            }

            let sector = disk.fetch(self.sector)?;
            let offset = slot * DIR_ENTRY_SIZE;
            let entry = DirEntry::from_bytes(&sector[offset..offset + DIR_ENTRY_SIZE]);
            self.slot = Some(slot);

            match mode {
                ScanMode::Used if entry.is_end() => self.finished = true,
                ScanMode::Used if entry.is_deleted() => (),
                ScanMode::Used => return Ok(Some(entry)),
                ScanMode::Free if entry.is_free() => return Ok(Some(entry)),
                ScanMode::Free => (),
            }
        }
        Ok(None)
    }

    fn next_sector<D: BlockDevice>(
        &mut self,
        table: &AllocationTable,
        disk: &mut SectorCache<D>,
    ) -> FatResult<Option<u32>> {
        match self.region {
            DirRegion::Root { first_sector, sectors } => {
                let next = self.sector + 1;
                if next - first_sector < sectors {
                    Ok(Some(next))
                } else {
                    Ok(None)
                }
            }
            DirRegion::Chain { .. } => {
                let next = table.next_sector_address(disk, self.sector)?;
                if let Some(lba) = next {
                    let same_cluster =
                        table.address_to_cluster(lba) == table.address_to_cluster(self.sector);
                    if lba != self.sector + 1 || !same_cluster {
                        self.clusters_crossed += 1;
                        if self.clusters_crossed > table.cluster_count() {
                            log::warn!(
                                "directory chain at sector {} does not terminate",
                                self.region.first_sector()
                            );
                            return Err(FatError::ChainBroken);
                        }
                    }
                }
                Ok(next)
            }
        }
    }
}
