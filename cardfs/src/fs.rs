use crate::bpb::{read_boot_parameters, BiosParamBlock, Geometry};
use crate::dir::{DirCursor, DirEntry, DirRegion, ScanMode, ShortName};
use crate::disk::{BlockDevice, SectorCache};
use crate::driver::{FatError, FatResult};
use crate::partition::{read_partition_table, PartitionEntry};
use crate::table::AllocationTable;

/// A mounted FAT16 volume: the device behind its sector cache, the layout
/// read from the MBR and boot sector, and the directory currently being
/// browsed.
pub struct FatFS<D: BlockDevice> {
    pub disk: SectorCache<D>,
    pub partition: PartitionEntry,
    pub bpb: BiosParamBlock,
    pub geometry: Geometry,
    pub table: AllocationTable,
    cwd: DirCursor,
    /// Entry the current directory was entered through; None at the root
    cwd_entry: Option<DirEntry>,
}

impl<D: BlockDevice> FatFS<D> {
    pub fn mount(device: D) -> FatResult<Self> {
        let mut disk = SectorCache::new(device);
        probe_device(&mut disk)?;
        let (partition, bpb, geometry) = Self::read_layout(&mut disk)?;
        let table = AllocationTable::from_geometry(&geometry);
        Ok(Self {
            disk,
            partition,
            bpb,
            geometry,
            table,
            cwd: DirCursor::new(root_region(&geometry)),
            cwd_entry: None,
        })
    }

    /// Read the layout again, for a card that may have been swapped.
    /// Browsing restarts at the root directory.
    pub fn remount(&mut self) -> FatResult<()> {
        self.disk.invalidate();
        let (partition, bpb, geometry) = Self::read_layout(&mut self.disk)?;
        self.partition = partition;
        self.bpb = bpb;
        self.geometry = geometry;
        self.table = AllocationTable::from_geometry(&geometry);
        self.change_to_root();
        Ok(())
    }

    fn read_layout(
        disk: &mut SectorCache<D>,
    ) -> FatResult<(PartitionEntry, BiosParamBlock, Geometry)> {
        let partition = read_partition_table(disk)?;
        let (bpb, geometry) = read_boot_parameters(disk, &partition)?;
        log::info!(
            "FAT16 volume at {}: fat {}..{} root {} ({} sectors) data {} cluster {} bytes x {}",
            geometry.partition_start,
            geometry.fat_start,
            geometry.fat_end,
            geometry.root_directory_start,
            geometry.root_directory_sectors,
            geometry.data_start,
            geometry.bytes_per_cluster,
            geometry.cluster_count,
        );
        Ok((partition, bpb, geometry))
    }

    pub fn root_region(&self) -> DirRegion {
        root_region(&self.geometry)
    }

    pub fn cwd(&self) -> &DirCursor {
        &self.cwd
    }

    pub fn cwd_entry(&self) -> Option<&DirEntry> {
        self.cwd_entry.as_ref()
    }

    pub fn change_to_root(&mut self) {
        self.cwd = DirCursor::new(self.root_region());
        self.cwd_entry = None;
    }

    /// Make the directory described by `entry` current. A first cluster of 0
    /// is how ".." entries point back at the root.
    pub fn change_to_directory(&mut self, entry: &DirEntry) -> FatResult<()> {
        if !entry.is_directory() {
            return Err(FatError::NotFound);
        }
        let cluster = entry.first_cluster();
        if cluster == 0 {
            self.change_to_root();
            return Ok(());
        }
        let first_sector = self.table.cluster_to_address(cluster);
        if first_sector == 0 || cluster as u32 >= self.table.cluster_count() + 2 {
            log::warn!("directory points at invalid cluster {}", cluster);
            return Err(FatError::ChainBroken);
        }
        self.cwd = DirCursor::new(DirRegion::Chain { first_sector });
        self.cwd_entry = Some(*entry);
        Ok(())
    }

    pub fn start_scan(&mut self, mode: ScanMode) -> FatResult<Option<DirEntry>> {
        self.cwd.start_scan(mode, &self.table, &mut self.disk)
    }

    pub fn advance(&mut self, mode: ScanMode) -> FatResult<Option<DirEntry>> {
        self.cwd.advance(mode, &self.table, &mut self.disk)
    }

    /// Look up a file or directory by its user-facing name in the current
    /// directory. Long-name fragments never match.
    pub fn find_by_name(&mut self, filename: &str) -> FatResult<Option<DirEntry>> {
        let wanted = ShortName::from_filename(filename);
        let mut next = self.start_scan(ScanMode::Used)?;
        while let Some(entry) = next {
            if !entry.is_long_name() && entry.short_name() == wanted {
                return Ok(Some(entry));
            }
            next = self.advance(ScanMode::Used)?;
        }
        Ok(None)
    }
}

/// Check that the card answers before anything is read from it
pub fn probe_device<D: BlockDevice>(disk: &mut SectorCache<D>) -> FatResult<()> {
    if !disk.probe() {
        log::warn!("block device does not respond");
        return Err(FatError::NoDevice);
    }
    Ok(())
}

fn root_region(geometry: &Geometry) -> DirRegion {
    DirRegion::Root {
        first_sector: geometry.root_directory_start,
        sectors: geometry.root_directory_sectors,
    }
}
