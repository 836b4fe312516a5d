//! Directory and track enumeration for the playback controller.
//!
//! Directories are the subdirectories of the root, numbered from 1 in
//! on-disk order; index 0 is the root itself. Tracks are the files of one
//! directory carrying the track extension, also numbered from 1.

use heapless::String;

use crate::dir::{trim_padding, DirEntry, ScanMode};
use crate::disk::BlockDevice;
use crate::driver::{FatDriver, FatError, FatResult};

/// Name reported for the root directory
pub const ROOT_NAME: &str = "TOP";

pub type DisplayName = String<12>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Selection {
    /// The requested index exists and is now current
    Selected { index: u16, name: DisplayName },
    /// No index was requested, or it was out of range; carries the total
    Counted(u16),
}

fn root_name() -> DisplayName {
    let mut name = String::new();
    let _ = name.push_str(ROOT_NAME);
    name
}

fn is_subdirectory(entry: &DirEntry) -> bool {
    entry.is_directory()
        && !entry.is_long_name()
        && !entry.is_volume_id()
        && entry.short_name().base()[0] != b'.'
}

/// "NAME.EXT" with padding trimmed, keeping at least one base character
pub fn track_name(entry: &DirEntry) -> DisplayName {
    let short = entry.short_name();
    let base = short.base();
    let len = base.iter().rposition(|&b| b != b' ').map_or(1, |i| i + 1);
    let ext = trim_padding(short.ext());
    let dot: &[u8] = if ext.is_empty() { b"" } else { b"." };
    let mut name = String::new();
    for &b in base[..len].iter().chain(dot).chain(ext) {
        let _ = name.push(b as char);
    }
    name
}

impl<D: BlockDevice> FatDriver<D> {
    /// Extension that marks a file as a track, "WAV" unless changed.
    /// Longer extensions are cut to 3 characters.
    pub fn set_track_extension(&mut self, ext: &str) {
        let mut padded = [b' '; 3];
        for (slot, b) in padded.iter_mut().zip(ext.bytes()) {
            *slot = b.to_ascii_uppercase();
        }
        self.track_extension = padded;
    }

    fn is_track(&self, entry: &DirEntry) -> bool {
        !entry.is_directory()
            && !entry.is_long_name()
            && !entry.is_volume_id()
            && entry.short_name().ext() == self.track_extension
    }

    /// Name of the current directory, `TOP` at the root
    pub fn current_directory_name(&self) -> DisplayName {
        match self.fs.cwd_entry() {
            Some(entry) => entry.short_name().display(),
            None => root_name(),
        }
    }

    /// Count the root's subdirectories, or make the `index`th one current.
    /// The scan always starts from the root; an index past the end leaves
    /// the root current.
    pub fn count_or_seek_directories(&mut self, index: Option<u16>) -> FatResult<Selection> {
        self.fs.change_to_root();
        if index == Some(0) {
            return Ok(Selection::Selected {
                index: 0,
                name: root_name(),
            });
        }

        let mut count = 0u16;
        let mut next = self.fs.start_scan(ScanMode::Used)?;
        while let Some(entry) = next {
            if is_subdirectory(&entry) {
                count += 1;
                if index == Some(count) {
                    self.fs.change_to_directory(&entry)?;
                    log::debug!("entered directory {}: {:?}", count, entry);
                    return Ok(Selection::Selected {
                        index: count,
                        name: entry.short_name().display(),
                    });
                }
            }
            next = self.fs.advance(ScanMode::Used)?;
        }
        Ok(Selection::Counted(count))
    }

    /// Enter directory `dir_index` and count its tracks, or locate the
    /// `file_index`th one. A located track can be opened by the returned
    /// name.
    pub fn count_or_seek_tracks(
        &mut self,
        dir_index: u16,
        file_index: Option<u16>,
    ) -> FatResult<Selection> {
        match self.count_or_seek_directories(Some(dir_index))? {
            Selection::Selected { .. } => (),
            Selection::Counted(_) => return Err(FatError::NotFound),
        }

        let mut count = 0u16;
        let mut next = self.fs.start_scan(ScanMode::Used)?;
        while let Some(entry) = next {
            if self.is_track(&entry) {
                count += 1;
                if file_index == Some(count) {
                    return Ok(Selection::Selected {
                        index: count,
                        name: track_name(&entry),
                    });
                }
            }
            next = self.fs.advance(ScanMode::Used)?;
        }
        Ok(Selection::Counted(count))
    }
}
