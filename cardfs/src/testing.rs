//! In-memory disks and a small FAT16 image builder shared by the unit tests.

use crate::disk::{BlockDevice, Sector, SECTOR_SIZE};

pub struct MemDisk {
    data: Vec<u8>,
    /// Sectors transferred from the "device", by any path
    pub reads: usize,
    /// Calls to `read_sectors`
    pub bulk_requests: usize,
    pub responding: bool,
}

impl MemDisk {
    pub fn new(sectors: usize) -> Self {
        Self::from_bytes(vec![0; sectors * SECTOR_SIZE])
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            reads: 0,
            bulk_requests: 0,
            responding: true,
        }
    }

    pub fn sector_mut(&mut self, lba: u32) -> &mut [u8] {
        let start = lba as usize * SECTOR_SIZE;
        &mut self.data[start..start + SECTOR_SIZE]
    }
}

impl BlockDevice for MemDisk {
    fn probe(&mut self) -> bool {
        self.responding
    }

    fn read_sector(&mut self, lba: u32, buffer: &mut Sector) -> bool {
        let start = lba as usize * SECTOR_SIZE;
        if start + SECTOR_SIZE > self.data.len() {
            return false;
        }
        self.reads += 1;
        buffer.copy_from_slice(&self.data[start..start + SECTOR_SIZE]);
        true
    }

    fn read_sectors(&mut self, lba: u32, buffer: &mut [u8]) -> bool {
        self.bulk_requests += 1;
        let start = lba as usize * SECTOR_SIZE;
        if start + buffer.len() > self.data.len() {
            return false;
        }
        self.reads += buffer.len() / SECTOR_SIZE;
        buffer.copy_from_slice(&self.data[start..start + buffer.len()]);
        true
    }
}

pub fn raw_entry(name: &[u8; 11], attributes: u8, cluster: u16, size: u32) -> [u8; 32] {
    let mut raw = [0u8; 32];
    raw[..11].copy_from_slice(name);
    raw[11] = attributes;
    raw[26..28].copy_from_slice(&cluster.to_le_bytes());
    raw[28..32].copy_from_slice(&size.to_le_bytes());
    raw
}

/// Builds a partitioned FAT16 card image sector by sector.
///
/// Defaults describe a partition at LBA 63 with 4 sectors per cluster, one
/// reserved sector, two 9-sector FATs and a one-sector (16 entry) root
/// directory, giving FAT at 64, root at 82 and data at 83.
pub struct ImageBuilder {
    pub disk: MemDisk,
    pub partition_start: u32,
    pub partition_type: u8,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entries: u16,
    pub sectors_per_fat: u16,
    pub total_sectors: u32,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self {
            disk: MemDisk::new(400),
            partition_start: 63,
            partition_type: 6,
            sectors_per_cluster: 4,
            reserved_sectors: 1,
            fat_count: 2,
            root_entries: 16,
            sectors_per_fat: 9,
            total_sectors: 400,
        }
    }

    pub fn fat_start(&self) -> u32 {
        self.partition_start + self.reserved_sectors as u32
    }

    pub fn root_start(&self) -> u32 {
        self.fat_start() + self.fat_count as u32 * self.sectors_per_fat as u32
    }

    pub fn data_start(&self) -> u32 {
        self.root_start() + self.root_entries as u32 / 16
    }

    pub fn cluster_lba(&self, cluster: u16) -> u32 {
        self.data_start() + (cluster as u32 - 2) * self.sectors_per_cluster as u32
    }

    /// Write the MBR and the boot sector from the current settings.
    pub fn format(mut self) -> Self {
        let start = self.partition_start;
        let mbr = self.disk.sector_mut(0);
        mbr[446] = 0x80;
        mbr[446 + 4] = self.partition_type;
        mbr[446 + 8..446 + 12].copy_from_slice(&start.to_le_bytes());
        mbr[446 + 12..446 + 16].copy_from_slice(&(self.total_sectors - start).to_le_bytes());
        mbr[510] = 0x55;
        mbr[511] = 0xAA;

        let total = (self.total_sectors - start) as u16;
        let (spc, reserved, fats, roots, spf) = (
            self.sectors_per_cluster,
            self.reserved_sectors,
            self.fat_count,
            self.root_entries,
            self.sectors_per_fat,
        );
        let boot = self.disk.sector_mut(start);
        boot[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        boot[3..11].copy_from_slice(b"MSWIN4.1");
        boot[11..13].copy_from_slice(&512u16.to_le_bytes());
        boot[13] = spc;
        boot[14..16].copy_from_slice(&reserved.to_le_bytes());
        boot[16] = fats;
        boot[17..19].copy_from_slice(&roots.to_le_bytes());
        boot[19..21].copy_from_slice(&total.to_le_bytes());
        boot[21] = 0xF8;
        boot[22..24].copy_from_slice(&spf.to_le_bytes());
        boot[28..32].copy_from_slice(&start.to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;

        self.set_fat(0, 0xFFF8);
        self.set_fat(1, 0xFFFF);
        self
    }

    /// Set a FAT entry in every FAT copy.
    pub fn set_fat(&mut self, cluster: u16, value: u16) {
        for copy in 0..self.fat_count as u32 {
            let lba = self.fat_start() + copy * self.sectors_per_fat as u32 + cluster as u32 / 256;
            let offset = (cluster as usize % 256) * 2;
            self.disk.sector_mut(lba)[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
        }
    }

    /// Link `clusters` in order and terminate the chain.
    pub fn chain(&mut self, clusters: &[u16]) {
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            self.set_fat(last, 0xFFFF);
        }
    }

    pub fn put_entry(&mut self, lba: u32, slot: usize, raw: [u8; 32]) {
        self.disk.sector_mut(lba)[slot * 32..slot * 32 + 32].copy_from_slice(&raw);
    }

    pub fn root_entry(&mut self, slot: usize, raw: [u8; 32]) {
        let lba = self.root_start() + (slot / 16) as u32;
        self.put_entry(lba, slot % 16, raw);
    }

    /// Fill every sector of `cluster` with bytes from `fill(sector_in_cluster, byte_index)`.
    pub fn fill_cluster(&mut self, cluster: u16, fill: impl Fn(usize, usize) -> u8) {
        let first = self.cluster_lba(cluster);
        for s in 0..self.sectors_per_cluster as usize {
            let sector = self.disk.sector_mut(first + s as u32);
            for (i, byte) in sector.iter_mut().enumerate() {
                *byte = fill(s, i);
            }
        }
    }
}
