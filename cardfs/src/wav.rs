//! RIFF/WAVE header probe, read through the ordinary file stream so a
//! track can be checked before it is streamed with `bulk_read`.

use crate::disk::BlockDevice;
use crate::driver::{FatDriver, FatError, SeekFrom};

const FORMAT_PCM: u16 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WavError {
    Io(FatError),
    /// File does not start with a RIFF header
    NotRiff,
    /// RIFF form type is not WAVE
    NotWave,
    /// The `fmt ` chunk is missing, short, or comes after the data
    UnsupportedFormat,
    /// No `data` chunk before the end of the file
    NoData,
}

impl From<FatError> for WavError {
    fn from(err: FatError) -> Self {
        WavError::Io(err)
    }
}

impl core::fmt::Display for WavError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WavError::Io(err) => write!(f, "I/O error: {}", err),
            WavError::NotRiff => f.write_str("not a RIFF file"),
            WavError::NotWave => f.write_str("not a WAVE file"),
            WavError::UnsupportedFormat => f.write_str("unsupported WAVE format"),
            WavError::NoData => f.write_str("no sample data"),
        }
    }
}

impl core::error::Error for WavError {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WavHeader {
    pub format_tag: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    /// Byte offset of the first sample in the file
    pub data_offset: u32,
    pub data_size: u32,
}

impl WavHeader {
    /// Parse the header of the open file `handle`. The position is returned
    /// to the start of the file afterwards, ready for sector streaming.
    pub fn read<D: BlockDevice>(driver: &mut FatDriver<D>, handle: u32) -> Result<Self, WavError> {
        driver.seek(handle, SeekFrom::Start(0))?;
        let header = Self::parse(driver, handle);
        driver.seek(handle, SeekFrom::Start(0))?;
        header
    }

    fn parse<D: BlockDevice>(driver: &mut FatDriver<D>, handle: u32) -> Result<Self, WavError> {
        let mut riff = [0u8; 12];
        if !read_exact(driver, handle, &mut riff)? || &riff[0..4] != b"RIFF" {
            return Err(WavError::NotRiff);
        }
        if &riff[8..12] != b"WAVE" {
            return Err(WavError::NotWave);
        }

        let size = driver.stat(handle)?.byte_size;
        let mut header = WavHeader::default();
        let mut have_format = false;
        let mut chunk = [0u8; 8];
        while read_exact(driver, handle, &mut chunk)? {
            let length = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
            let position = driver.stat(handle)?.position;
            match &chunk[0..4] {
                b"fmt " => {
                    let mut fmt = [0u8; 16];
                    if length < 16 || !read_exact(driver, handle, &mut fmt)? {
                        return Err(WavError::UnsupportedFormat);
                    }
                    header.format_tag = u16::from_le_bytes([fmt[0], fmt[1]]);
                    header.channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                    header.sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                    header.byte_rate = u32::from_le_bytes([fmt[8], fmt[9], fmt[10], fmt[11]]);
                    header.block_align = u16::from_le_bytes([fmt[12], fmt[13]]);
                    header.bits_per_sample = u16::from_le_bytes([fmt[14], fmt[15]]);
                    have_format = true;
                }
                b"data" => {
                    if !have_format {
                        return Err(WavError::UnsupportedFormat);
                    }
                    header.data_offset = position;
                    header.data_size = length.min(size - position);
                    return Ok(header);
                }
                _ => (),
            }
            // chunks are word aligned
            let next = position as u64 + length as u64 + (length & 1) as u64;
            if next > size as u64 {
                break;
            }
            driver.seek(handle, SeekFrom::Start(next as u32))?;
        }
        Err(WavError::NoData)
    }

    /// 16-bit stereo PCM, the only sample layout the player outputs
    pub fn is_playable(&self) -> bool {
        self.format_tag == FORMAT_PCM && self.channels == 2 && self.bits_per_sample == 16
    }

    pub fn duration_secs(&self) -> u32 {
        if self.byte_rate == 0 {
            return 0;
        }
        self.data_size / self.byte_rate
    }
}

/// Fill `buffer` completely. Returns false if the file ends first.
fn read_exact<D: BlockDevice>(
    driver: &mut FatDriver<D>,
    handle: u32,
    buffer: &mut [u8],
) -> Result<bool, WavError> {
    let mut filled = 0;
    while filled < buffer.len() {
        match driver.read(handle, &mut buffer[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(true)
}
