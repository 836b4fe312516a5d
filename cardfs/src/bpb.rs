use crate::disk::{read_u16, read_u32, BlockDevice, Sector, SectorCache, SECTOR_SIZE};
use crate::driver::{FatError, FatResult};
use crate::partition::{has_boot_signature, PartitionEntry};

/// Media descriptor of a fixed / removable flash card
pub const MEDIA_FIXED: u8 = 0xF8;

/// FAT16 entries held by one FAT sector
pub const FAT_ENTRIES_PER_SECTOR: u32 = (SECTOR_SIZE / 2) as u32;

/// The BIOS Parameter Block fields this driver reads, decoded from the first
/// sector of the partition.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BiosParamBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_directory_entries: u16,
    pub total_sectors: u16,
    pub media_descriptor: u8,
    pub sectors_per_fat: u16,
    pub hidden_sectors: u32,
    pub total_sectors_large: u32,
}

impl BiosParamBlock {
    pub fn parse(sector: &Sector) -> Self {
        Self {
            bytes_per_sector: read_u16(sector, 11),
            sectors_per_cluster: sector[13],
            reserved_sectors: read_u16(sector, 14),
            fat_count: sector[16],
            root_directory_entries: read_u16(sector, 17),
            total_sectors: read_u16(sector, 19),
            media_descriptor: sector[21],
            sectors_per_fat: read_u16(sector, 22),
            hidden_sectors: read_u32(sector, 28),
            total_sectors_large: read_u32(sector, 32),
        }
    }

    /// Sanity checks on a boot sector. Nothing is derived from a block that
    /// fails any of these.
    pub fn validate(&self, sector: &Sector) -> FatResult<()> {
        if !has_boot_signature(sector) {
            log::warn!("boot block has no signature");
            return Err(FatError::InvalidBootBlock);
        }
        if self.reserved_sectors == 0 {
            log::warn!("boot block declares no reserved sectors");
            return Err(FatError::InvalidBootBlock);
        }
        if self.media_descriptor != MEDIA_FIXED {
            log::warn!("unexpected media descriptor {:#04x}", self.media_descriptor);
            return Err(FatError::InvalidBootBlock);
        }
        if self.bytes_per_sector as usize != SECTOR_SIZE {
            log::warn!("unsupported sector size {}", self.bytes_per_sector);
            return Err(FatError::InvalidBootBlock);
        }
        if self.sectors_per_cluster == 0 || self.sectors_per_fat == 0 || self.fat_count == 0 {
            log::warn!("boot block has an empty cluster or FAT size");
            return Err(FatError::InvalidBootBlock);
        }
        if self.root_directory_sectors() == 0 {
            log::warn!(
                "root directory of {} entries is under one sector",
                self.root_directory_entries
            );
            return Err(FatError::InvalidBootBlock);
        }
        Ok(())
    }

    /// Root directory length in sectors (16 entries of 32 bytes per sector)
    pub fn root_directory_sectors(&self) -> u32 {
        self.root_directory_entries as u32 / 16
    }

    pub fn volume_sectors(&self) -> u32 {
        if self.total_sectors != 0 {
            self.total_sectors as u32
        } else {
            self.total_sectors_large
        }
    }
}

/// Where everything lives on the card. Computed once at mount time; every
/// address here is an absolute LBA.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Geometry {
    pub partition_start: u32,
    pub sectors_per_cluster: u32,
    pub root_directory_sectors: u32,
    /// First sector of the first FAT
    pub fat_start: u32,
    /// First sector after the first FAT
    pub fat_end: u32,
    pub root_directory_start: u32,
    pub data_start: u32,
    pub bytes_per_cluster: u32,
    /// Number of clusters in the data region
    pub cluster_count: u32,
}

impl Geometry {
    /// Lay out the volume. A block whose regions would run past the last
    /// addressable sector is rejected.
    pub fn from_bpb(partition_start: u32, bpb: &BiosParamBlock) -> FatResult<Self> {
        // The FAT lives at hidden + reserved sectors. Some formatters write a
        // zero hidden count on partitioned media, in which case the
        // partition table's own start is used.
        let volume_start = if bpb.hidden_sectors != 0 {
            if bpb.hidden_sectors != partition_start {
                log::warn!(
                    "hidden sectors ({}) differ from partition start ({})",
                    bpb.hidden_sectors,
                    partition_start,
                );
            }
            bpb.hidden_sectors
        } else {
            partition_start
        };

        let sectors_per_cluster = bpb.sectors_per_cluster as u32;
        let sectors_per_fat = bpb.sectors_per_fat as u32;
        let root_directory_sectors = bpb.root_directory_sectors();
        let fat_start = volume_start.checked_add(bpb.reserved_sectors as u32);
        let fat_end = fat_start.and_then(|start| start.checked_add(sectors_per_fat));
        let root_directory_start = fat_start.and_then(|start| {
            start.checked_add(bpb.fat_count as u32 * sectors_per_fat)
        });
        let data_start = root_directory_start
            .and_then(|start| start.checked_add(root_directory_sectors));
        let (Some(fat_start), Some(fat_end), Some(root_directory_start), Some(data_start)) =
            (fat_start, fat_end, root_directory_start, data_start)
        else {
            log::warn!("volume at {} runs past the end of the address space", volume_start);
            return Err(FatError::InvalidBootBlock);
        };

        // Clusters 0 and 1 have FAT slots but no data
        let fat_capacity = sectors_per_fat * FAT_ENTRIES_PER_SECTOR - 2;
        let cluster_count = match bpb.volume_sectors() {
            0 => fat_capacity,
            total => {
                let data_sectors = total.saturating_sub(data_start - volume_start);
                (data_sectors / sectors_per_cluster).min(fat_capacity)
            }
        };
        let data_end = cluster_count
            .checked_mul(sectors_per_cluster)
            .and_then(|sectors| data_start.checked_add(sectors));
        if data_end.is_none() {
            log::warn!("data region at {} runs past the end of the address space", data_start);
            return Err(FatError::InvalidBootBlock);
        }

        Ok(Self {
            partition_start,
            sectors_per_cluster,
            root_directory_sectors,
            fat_start,
            fat_end,
            root_directory_start,
            data_start,
            bytes_per_cluster: SECTOR_SIZE as u32 * sectors_per_cluster,
            cluster_count,
        })
    }
}

/// Read and check the boot sector of `partition`, returning the volume layout.
pub fn read_boot_parameters<D: BlockDevice>(
    disk: &mut SectorCache<D>,
    partition: &PartitionEntry,
) -> FatResult<(BiosParamBlock, Geometry)> {
    let sector = disk.fetch(partition.start_lba)?;
    let bpb = BiosParamBlock::parse(sector);
    bpb.validate(sector)?;
    let geometry = Geometry::from_bpb(partition.start_lba, &bpb)?;
    Ok((bpb, geometry))
}
