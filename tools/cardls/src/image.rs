use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use cardfs::disk::{BlockDevice, Sector, SECTOR_SIZE};

/// Block device backed by a raw card image on the host
pub struct ImageFile {
    file: File,
    sectors: u64,
}

impl ImageFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            sectors: len / SECTOR_SIZE as u64,
        })
    }

    fn read_at(&mut self, lba: u32, buffer: &mut [u8]) -> bool {
        let offset = lba as u64 * SECTOR_SIZE as u64;
        let result = self
            .file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(buffer));
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("image read at sector {} failed: {}", lba, e);
                false
            }
        }
    }
}

impl BlockDevice for ImageFile {
    fn probe(&mut self) -> bool {
        self.sectors > 0
    }

    fn read_sector(&mut self, lba: u32, buffer: &mut Sector) -> bool {
        self.read_at(lba, buffer)
    }

    fn read_sectors(&mut self, lba: u32, buffer: &mut [u8]) -> bool {
        self.read_at(lba, buffer)
    }
}
