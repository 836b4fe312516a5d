use bitflags::bitflags;

use crate::disk::{BlockDevice, SectorCache, SECTOR_SIZE};
use crate::fs::FatFS;
use crate::table::AllocationTable;

/// Files that may be open at once
pub const MAX_OPEN_FILES: usize = 2;

const SECTOR: u32 = SECTOR_SIZE as u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FatError {
    /// The block device did not answer
    NoDevice,
    /// Sector 0 carries no 0x55AA signature
    BadSignature,
    /// First partition is not FAT16; carries the type byte found
    UnsupportedPartition(u8),
    /// Boot sector failed validation
    InvalidBootBlock,
    FileHandleInvalid,
    TooManyOpenFiles,
    InvalidArgument,
    UnsupportedOperation,
    /// Name refers to a directory or volume label
    NotAFile,
    NotFound,
    /// The device reported a failed transfer
    ReadFailed,
    /// A cluster chain is corrupt, loops, or ended before the file did
    ChainBroken,
    /// The driver is already in use by another caller
    Busy,
}

impl core::fmt::Display for FatError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FatError::NoDevice => f.write_str("no device"),
            FatError::BadSignature => f.write_str("missing boot signature"),
            FatError::UnsupportedPartition(t) => write!(f, "unsupported partition type {:#04x}", t),
            FatError::InvalidBootBlock => f.write_str("invalid boot block"),
            FatError::FileHandleInvalid => f.write_str("invalid file handle"),
            FatError::TooManyOpenFiles => f.write_str("too many open files"),
            FatError::InvalidArgument => f.write_str("invalid argument"),
            FatError::UnsupportedOperation => f.write_str("unsupported operation"),
            FatError::NotAFile => f.write_str("not a file"),
            FatError::NotFound => f.write_str("not found"),
            FatError::ReadFailed => f.write_str("read failed"),
            FatError::ChainBroken => f.write_str("broken cluster chain"),
            FatError::Busy => f.write_str("driver busy"),
        }
    }
}

impl core::error::Error for FatError {}

pub type FatResult<T = u32> = Result<T, FatError>;

bitflags! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u8 {
        const READ_ONLY = 0x01;
        const WRITE_ONLY = 0x02;
        const READ_WRITE = 0x04;
        const APPEND = 0x08;
        const CREATE = 0x10;
        const TRUNCATE = 0x20;
        const EXCLUSIVE = 0x40;
    }
}

impl OpenFlags {
    const ACCESS: Self = Self::READ_ONLY.union(Self::WRITE_ONLY).union(Self::READ_WRITE);
    const MODIFY: Self = Self::CREATE.union(Self::TRUNCATE).union(Self::EXCLUSIVE);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u32),
    Current(i32),
    /// Relative to the last byte of the file: `End(0)` lands on `size - 1`
    End(i32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileStatus {
    pub byte_size: u32,
    pub position: u32,
    pub first_cluster: u16,
}

/// State of one open file
#[derive(Copy, Clone, Debug)]
pub struct FileHandle {
    first_cluster: u16,
    /// Sectors physically following `address` that still belong to the file
    contiguous: u32,
    /// Sector holding the byte at `position`; None if unresolved
    address: Option<u32>,
    position: u32,
    size: u32,
    mode: OpenFlags,
}

impl FileHandle {
    fn is_readable(&self) -> bool {
        self.mode.contains(OpenFlags::READ_ONLY)
    }

    fn at_eof(&self) -> bool {
        self.position >= self.size
    }

    /// Sectors from the one holding `position` to the end of the file
    fn remaining_sectors(&self) -> u32 {
        let sector_start = self.position - self.position % SECTOR;
        self.size.saturating_sub(sector_start).div_ceil(SECTOR)
    }

    /// Sector holding byte `position`, found by walking the chain
    fn locate<D: BlockDevice>(
        &self,
        position: u32,
        table: &AllocationTable,
        disk: &mut SectorCache<D>,
    ) -> FatResult<Option<u32>> {
        if self.first_cluster < 2 {
            return Ok(None);
        }
        let bytes_per_cluster = table.sectors_per_cluster() * SECTOR;
        let cluster = table.walk(disk, self.first_cluster, position / bytes_per_cluster)?;
        Ok(cluster.map(|c| table.cluster_to_address(c) + (position % bytes_per_cluster) / SECTOR))
    }

    fn refresh_run<D: BlockDevice>(
        &mut self,
        table: &AllocationTable,
        disk: &mut SectorCache<D>,
    ) -> FatResult<()> {
        self.contiguous = match self.address {
            Some(lba) => {
                let limit = self.remaining_sectors().saturating_sub(1);
                table.contiguous_run(disk, lba, limit)?
            }
            None => 0,
        };
        Ok(())
    }

    /// Move `address` to the following sector of the file
    fn step<D: BlockDevice>(
        &mut self,
        table: &AllocationTable,
        disk: &mut SectorCache<D>,
    ) -> FatResult<()> {
        let current = self.address.ok_or(FatError::ChainBroken)?;
        if self.contiguous > 0 {
            self.contiguous -= 1;
            self.address = Some(current + 1);
            return Ok(());
        }
        // left unresolved if the chain cannot be followed
        self.address = None;
        self.address = table.next_sector_address(disk, current)?;
        self.refresh_run(table, disk)
    }
}

/// Fixed-capacity table of open handles
struct SlotList<T, const N: usize> {
    slots: [Option<T>; N],
}

impl<T, const N: usize> SlotList<T, N> {
    fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
        }
    }

    fn has_free_slot(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    fn insert(&mut self, item: T) -> Option<usize> {
        let index = self.slots.iter().position(Option::is_none)?;
        self.slots[index] = Some(item);
        Some(index)
    }

    fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index)?.as_ref()
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index)?.as_mut()
    }

    fn remove(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index)?.take()
    }

    fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

pub struct FatDriver<D: BlockDevice> {
    pub(crate) fs: FatFS<D>,
    handles: SlotList<FileHandle, MAX_OPEN_FILES>,
    pub(crate) track_extension: [u8; 3],
}

impl<D: BlockDevice> FatDriver<D> {
    pub fn mount(device: D) -> FatResult<Self> {
        Ok(Self {
            fs: FatFS::mount(device)?,
            handles: SlotList::new(),
            track_extension: *b"WAV",
        })
    }

    /// Re-read the card layout. Every open handle is dropped.
    pub fn remount(&mut self) -> FatResult<()> {
        self.handles.clear();
        self.fs.remount()
    }

    pub fn fs(&self) -> &FatFS<D> {
        &self.fs
    }

    pub fn fs_mut(&mut self) -> &mut FatFS<D> {
        &mut self.fs
    }

    pub fn into_device(self) -> D {
        self.fs.disk.into_inner()
    }

    /// Open a file in the current directory. Only read-only access exists.
    pub fn open(&mut self, filename: &str, flags: OpenFlags) -> FatResult<u32> {
        if flags.intersects(OpenFlags::MODIFY) {
            return Err(FatError::UnsupportedOperation);
        }
        let access = flags & OpenFlags::ACCESS;
        if access.bits().count_ones() != 1 {
            return Err(FatError::InvalidArgument);
        }
        if access != OpenFlags::READ_ONLY {
            return Err(FatError::UnsupportedOperation);
        }
        if !self.handles.has_free_slot() {
            return Err(FatError::TooManyOpenFiles);
        }

        let entry = self.fs.find_by_name(filename)?.ok_or(FatError::NotFound)?;
        if entry.is_directory() || entry.is_volume_id() {
            return Err(FatError::NotAFile);
        }

        let mut handle = FileHandle {
            first_cluster: entry.first_cluster(),
            contiguous: 0,
            address: None,
            position: 0,
            size: entry.byte_size(),
            mode: flags,
        };
        if flags.contains(OpenFlags::APPEND) {
            handle.position = handle.size;
        }
        handle.address = handle.locate(handle.position, &self.fs.table, &mut self.fs.disk)?;
        handle.refresh_run(&self.fs.table, &mut self.fs.disk)?;

        let index = self.handles.insert(handle).ok_or(FatError::TooManyOpenFiles)?;
        log::debug!(
            "open {} -> handle {} (cluster {}, {} bytes)",
            filename,
            index,
            handle.first_cluster,
            handle.size,
        );
        Ok(index as u32)
    }

    pub fn close(&mut self, handle: u32) -> FatResult<()> {
        self.handles
            .remove(handle as usize)
            .map(|_| ())
            .ok_or(FatError::FileHandleInvalid)
    }

    pub fn eof(&self, handle: u32) -> FatResult<bool> {
        self.handles
            .get(handle as usize)
            .map(FileHandle::at_eof)
            .ok_or(FatError::FileHandleInvalid)
    }

    pub fn stat(&self, handle: u32) -> FatResult<FileStatus> {
        let handle = self.handles.get(handle as usize).ok_or(FatError::FileHandleInvalid)?;
        Ok(FileStatus {
            byte_size: handle.size,
            position: handle.position,
            first_cluster: handle.first_cluster,
        })
    }

    /// Copy up to `buffer.len()` bytes from the current position, never
    /// reading past the end of the file. Returns the number of bytes copied.
    /// A failure after some bytes were copied returns that count; the next
    /// call reports the error.
    pub fn read(&mut self, handle: u32, buffer: &mut [u8]) -> FatResult<usize> {
        let file = self
            .handles
            .get_mut(handle as usize)
            .filter(|h| h.is_readable())
            .ok_or(FatError::FileHandleInvalid)?;
        let fs = &mut self.fs;

        let mut copied = 0;
        while copied < buffer.len() && !file.at_eof() {
            let Some(address) = file.address else {
                return partial(copied, FatError::ChainBroken);
            };
            let offset = (file.position % SECTOR) as usize;
            let count = (SECTOR_SIZE - offset)
                .min((file.size - file.position) as usize)
                .min(buffer.len() - copied);

            let sector = match fs.disk.fetch(address) {
                Ok(sector) => sector,
                Err(err) => return partial(copied, err),
            };
            buffer[copied..copied + count].copy_from_slice(&sector[offset..offset + count]);
            copied += count;
            file.position += count as u32;

            if file.position % SECTOR == 0 && !file.at_eof() {
                if let Err(err) = file.step(&fs.table, &mut fs.disk) {
                    return partial(copied, err);
                }
            }
        }
        Ok(copied)
    }

    /// Move the position. Targets before the start or past the size are
    /// rejected without changing anything. Returns the new position.
    pub fn seek(&mut self, handle: u32, from: SeekFrom) -> FatResult<u32> {
        let file = self.handles.get_mut(handle as usize).ok_or(FatError::FileHandleInvalid)?;
        let fs = &mut self.fs;

        let target = match from {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(n) => file.position as i64 + n as i64,
            SeekFrom::End(n) => file.size as i64 - 1 + n as i64,
        };
        if target < 0 || target > file.size as i64 {
            return Err(FatError::InvalidArgument);
        }
        let target = target as u32;
        if target == file.position {
            return Ok(target);
        }

        let address = file.locate(target, &fs.table, &mut fs.disk)?;
        file.position = target;
        file.address = address;
        file.refresh_run(&fs.table, &mut fs.disk)?;
        log::debug!("seek handle {} to {} (sector {:?})", handle, target, address);
        Ok(target)
    }

    /// Stream whole sectors straight into `destination`, bypassing the
    /// cache. The position must be sector aligned. Physically adjacent
    /// sectors go out in a single device request. Returns the number of
    /// sectors transferred, 0 at end of file. As with `read`, a failure
    /// part way through returns the sectors already transferred.
    pub fn bulk_read(&mut self, handle: u32, destination: &mut [u8]) -> FatResult<usize> {
        let file = self
            .handles
            .get_mut(handle as usize)
            .filter(|h| h.is_readable())
            .ok_or(FatError::FileHandleInvalid)?;
        let fs = &mut self.fs;

        if file.at_eof() {
            return Ok(0);
        }
        let wanted = destination.len() / SECTOR_SIZE;
        if file.position % SECTOR != 0 || wanted == 0 {
            return Err(FatError::InvalidArgument);
        }

        let mut done = 0;
        while done < wanted && !file.at_eof() {
            let Some(address) = file.address else {
                return partial(done, FatError::ChainBroken);
            };
            let run = (file.contiguous + 1)
                .min((wanted - done) as u32)
                .min(file.remaining_sectors());

            let start = done * SECTOR_SIZE;
            let end = start + run as usize * SECTOR_SIZE;
            if let Err(err) = fs.disk.bulk_fetch(address, &mut destination[start..end]) {
                return partial(done, err);
            }
            done += run as usize;

            file.position = (file.position + run * SECTOR).min(file.size);
            file.address = Some(address + run - 1);
            file.contiguous -= run - 1;
            if !file.at_eof() {
                if let Err(err) = file.step(&fs.table, &mut fs.disk) {
                    return partial(done, err);
                }
            }
        }
        Ok(done)
    }
}

/// Result of a transfer that stopped on `err` after `done` units
fn partial(done: usize, err: FatError) -> FatResult<usize> {
    if done == 0 {
        return Err(err);
    }
    log::debug!("transfer stopped after {} units: {}", done, err);
    Ok(done)
}
