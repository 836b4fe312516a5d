use crate::driver::{FatError, FatResult};

pub const SECTOR_SIZE: usize = 512;

pub type Sector = [u8; SECTOR_SIZE];

/// Trait abstracting the raw block transport.
/// On the player this is the MMC/SD card on the SPI bus.
/// On host, this is backed by an image file or a memory buffer.
pub trait BlockDevice {
    /// Returns true if the device answers. Most transports have nothing to
    /// initialise, so the default assumes it does.
    fn probe(&mut self) -> bool {
        true
    }

    fn read_sector(&mut self, lba: u32, buffer: &mut Sector) -> bool;

    /// Read `buffer.len() / SECTOR_SIZE` consecutive sectors starting at `lba`.
    /// Transports with a multi-block command should override this.
    fn read_sectors(&mut self, lba: u32, buffer: &mut [u8]) -> bool {
        for (i, chunk) in buffer.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            let sector: &mut Sector = match chunk.try_into() {
                Ok(sector) => sector,
                Err(_) => return false,
            };
            if !self.read_sector(lba + i as u32, sector) {
                return false;
            }
        }
        true
    }
}

/// SectorCache is the only view the rest of the driver has of the disk. It
/// keeps exactly one sector in memory, tagged with its LBA. Metadata reads
/// (MBR, BPB, FAT, directories) go through `fetch`; streaming reads go
/// through `bulk_fetch`, which writes into the caller's buffer and leaves the
/// cached sector untrusted.
pub struct SectorCache<D: BlockDevice> {
    device: D,
    buffer: Sector,
    /// LBA currently held in `buffer`, or None when the buffer is stale.
    tag: Option<u32>,
}

impl<D: BlockDevice> SectorCache<D> {
    pub fn new(device: D) -> Self {
        Self {
            device,
            buffer: [0; SECTOR_SIZE],
            tag: None,
        }
    }

    /// Make sure the buffer holds sector `lba`, reading from the device only
    /// if it holds something else.
    pub fn fetch(&mut self, lba: u32) -> FatResult<&Sector> {
        if self.tag != Some(lba) {
            log::trace!("read sector {}", lba);
            // Tag is cleared first so a failed read never leaves a half
            // written buffer marked as valid.
            self.tag = None;
            if !self.device.read_sector(lba, &mut self.buffer) {
                log::warn!("device read failed at sector {}", lba);
                return Err(FatError::ReadFailed);
            }
            self.tag = Some(lba);
        }
        Ok(&self.buffer)
    }

    /// Transfer whole sectors starting at `lba` straight into `destination`,
    /// bypassing the buffer. The cached sector is invalidated.
    pub fn bulk_fetch(&mut self, lba: u32, destination: &mut [u8]) -> FatResult<()> {
        self.tag = None;
        let whole = destination.len() - destination.len() % SECTOR_SIZE;
        log::trace!("bulk read {} sectors at {}", whole / SECTOR_SIZE, lba);
        if !self.device.read_sectors(lba, &mut destination[..whole]) {
            log::warn!("device bulk read failed at sector {}", lba);
            return Err(FatError::ReadFailed);
        }
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.tag = None;
    }

    pub fn cached_address(&self) -> Option<u32> {
        self.tag
    }

    pub fn probe(&mut self) -> bool {
        self.device.probe()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn into_inner(self) -> D {
        self.device
    }
}

pub fn read_u16(sector: &Sector, offset: usize) -> u16 {
    u16::from_le_bytes([sector[offset], sector[offset + 1]])
}

pub fn read_u32(sector: &Sector, offset: usize) -> u32 {
    u32::from_le_bytes([
        sector[offset],
        sector[offset + 1],
        sector[offset + 2],
        sector[offset + 3],
    ])
}
