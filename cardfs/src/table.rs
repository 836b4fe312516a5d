use crate::bpb::{Geometry, FAT_ENTRIES_PER_SECTOR};
use crate::disk::{read_u16, BlockDevice, Sector, SectorCache};
use crate::driver::{FatError, FatResult};

/// FAT16 values at or above this mark the end of a cluster chain
pub const CHAIN_END: u16 = 0xFFF8;

/// What the FAT says follows a cluster
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Link {
    Next(u16),
    End,
}

/// The cluster-chain half of the volume layout: maps between clusters and
/// sectors, and follows chains through the first FAT copy.
#[derive(Copy, Clone, Debug)]
pub struct AllocationTable {
    sectors_per_cluster: u32,
    fat_start: u32,
    fat_end: u32,
    data_start: u32,
    cluster_count: u32,
}

impl AllocationTable {
    pub fn from_geometry(geometry: &Geometry) -> Self {
        Self {
            sectors_per_cluster: geometry.sectors_per_cluster,
            fat_start: geometry.fat_start,
            fat_end: geometry.fat_end,
            data_start: geometry.data_start,
            cluster_count: geometry.cluster_count,
        }
    }

    /// Upper bound on the number of links any chain walk may follow
    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn sectors_per_cluster(&self) -> u32 {
        self.sectors_per_cluster
    }

    /// Cluster owning a data-region sector, or 0 if `lba` is not in the data region
    pub fn address_to_cluster(&self, lba: u32) -> u16 {
        if lba < self.data_start {
            return 0;
        }
        let cluster = 2 + (lba - self.data_start) / self.sectors_per_cluster;
        u16::try_from(cluster).unwrap_or(0)
    }

    /// First sector of a cluster, or 0 for the reserved clusters 0 and 1
    pub fn cluster_to_address(&self, cluster: u16) -> u32 {
        if cluster < 2 {
            return 0;
        }
        self.data_start + (cluster as u32 - 2) * self.sectors_per_cluster
    }

    /// Bring the FAT sector holding `cluster`'s entry into the cache.
    pub fn load_fat_sector<'disk, D: BlockDevice>(
        &self,
        disk: &'disk mut SectorCache<D>,
        cluster: u16,
    ) -> FatResult<&'disk Sector> {
        let lba = self.fat_start + cluster as u32 / FAT_ENTRIES_PER_SECTOR;
        if lba >= self.fat_end {
            log::warn!("cluster {} is outside the FAT", cluster);
            return Err(FatError::ChainBroken);
        }
        disk.fetch(lba)
    }

    pub fn next_cluster<D: BlockDevice>(
        &self,
        disk: &mut SectorCache<D>,
        cluster: u16,
    ) -> FatResult<Link> {
        let sector = self.load_fat_sector(disk, cluster)?;
        let offset = (cluster as u32 % FAT_ENTRIES_PER_SECTOR) as usize * 2;
        match read_u16(sector, offset) {
            next if next >= CHAIN_END => Ok(Link::End),
            0 | 1 => {
                log::warn!("cluster {} links to a reserved cluster", cluster);
                Err(FatError::ChainBroken)
            }
            next => Ok(Link::Next(next)),
        }
    }

    /// The sector that follows `lba` in its file or directory. Within a
    /// cluster that is simply `lba + 1`; at the end of a cluster the FAT is
    /// consulted. Returns None when the chain ends.
    pub fn next_sector_address<D: BlockDevice>(
        &self,
        disk: &mut SectorCache<D>,
        lba: u32,
    ) -> FatResult<Option<u32>> {
        let next = lba + 1;
        let current_cluster = self.address_to_cluster(lba);
        if current_cluster == 0 {
            return Err(FatError::ChainBroken);
        }
        if current_cluster == self.address_to_cluster(next) {
            return Ok(Some(next));
        }
        match self.next_cluster(disk, current_cluster)? {
            Link::Next(cluster) => Ok(Some(self.cluster_to_address(cluster))),
            Link::End => Ok(None),
        }
    }

    /// Follow `count` links from `first`. Returns None if the chain ends
    /// before that many links.
    pub fn walk<D: BlockDevice>(
        &self,
        disk: &mut SectorCache<D>,
        first: u16,
        count: u32,
    ) -> FatResult<Option<u16>> {
        if count > self.cluster_count {
            return Ok(None);
        }
        let mut cluster = first;
        for _ in 0..count {
            match self.next_cluster(disk, cluster)? {
                Link::Next(next) => cluster = next,
                Link::End => return Ok(None),
            }
        }
        Ok(Some(cluster))
    }

    /// Number of sectors after `lba` that sit physically right behind it in
    /// the same chain. Stops at the first gap, the chain end, or after
    /// `limit` sectors.
    pub fn contiguous_run<D: BlockDevice>(
        &self,
        disk: &mut SectorCache<D>,
        lba: u32,
        limit: u32,
    ) -> FatResult<u32> {
        let mut run = 0;
        let mut current = lba;
        while run < limit {
            match self.next_sector_address(disk, current)? {
                Some(next) if next == current + 1 => {
                    run += 1;
                    current = next;
                }
                _ => break,
            }
        }
        Ok(run)
    }
}
