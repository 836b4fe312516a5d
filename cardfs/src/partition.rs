use crate::disk::{BlockDevice, Sector, SectorCache};
use crate::driver::{FatError, FatResult};

const PARTITION_TABLE_OFFSET: usize = 446;
const PARTITION_ENTRY_SIZE: usize = 16;
const PARTITION_COUNT: usize = 4;

/// DOS partition types for FAT16 (< 32MB and >= 32MB)
const TYPE_FAT16_SMALL: u8 = 0x04;
const TYPE_FAT16: u8 = 0x06;

/// True if the sector ends with the 0x55 0xAA boot signature
pub fn has_boot_signature(sector: &Sector) -> bool {
    sector[510] == 0x55 && sector[511] == 0xAA
}

/// One 16-byte entry of the MBR partition table
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PartitionEntry {
    pub bootable: bool,
    pub partition_type: u8,
    pub start_lba: u32,
    pub sector_count: u32,
}

impl PartitionEntry {
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            bootable: raw[0] == 0x80,
            partition_type: raw[4],
            start_lba: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            sector_count: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        }
    }

    pub fn is_defined(&self) -> bool {
        self.partition_type != 0
    }

    pub fn is_fat16(&self) -> bool {
        matches!(self.partition_type, TYPE_FAT16_SMALL | TYPE_FAT16)
    }
}

/// Parse all four entries of a master boot record
pub fn partition_entries(mbr: &Sector) -> [PartitionEntry; PARTITION_COUNT] {
    core::array::from_fn(|i| {
        let offset = PARTITION_TABLE_OFFSET + i * PARTITION_ENTRY_SIZE;
        PartitionEntry::parse(&mbr[offset..offset + PARTITION_ENTRY_SIZE])
    })
}

/// Read the MBR at LBA 0 and return the first partition entry, provided it
/// is a FAT16 partition. Later entries are logged but never mounted.
pub fn read_partition_table<D: BlockDevice>(
    disk: &mut SectorCache<D>,
) -> FatResult<PartitionEntry> {
    let mbr = disk.fetch(0)?;
    if !has_boot_signature(mbr) {
        log::warn!("no boot signature in MBR");
        return Err(FatError::BadSignature);
    }

    let entries = partition_entries(mbr);
    for (i, entry) in entries.iter().enumerate() {
        if entry.is_defined() {
            log::debug!(
                "partition #{}: type {:#04x} start {} active {}",
                i,
                entry.partition_type,
                entry.start_lba,
                entry.bootable,
            );
        }
    }

    let first = entries[0];
    if !first.is_fat16() {
        log::warn!("first partition type {:#04x} is not FAT16", first.partition_type);
        return Err(FatError::UnsupportedPartition(first.partition_type));
    }
    Ok(first)
}
