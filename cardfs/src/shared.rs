use spin::Mutex;

use crate::disk::BlockDevice;
use crate::driver::{FatDriver, FatError, FatResult};

/// One driver reachable from several contexts, such as the command handler
/// and the playback refill. A caller that arrives while another is inside
/// the driver gets `FatError::Busy` instead of spinning.
///
/// ```ignore
/// static CARD: SharedDriver<SpiCard> = SharedDriver::new();
///
/// CARD.mount(SpiCard::new())?;
/// let tracks = CARD.with(|driver| driver.count_or_seek_tracks(1, None))?;
/// ```
pub struct SharedDriver<D: BlockDevice> {
    inner: Mutex<Option<FatDriver<D>>>,
}

impl<D: BlockDevice> SharedDriver<D> {
    /// An empty slot, usable in a `static`
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    pub fn with_driver(driver: FatDriver<D>) -> Self {
        Self {
            inner: Mutex::new(Some(driver)),
        }
    }

    /// Mount `device` and make it the shared driver, replacing any previous one.
    pub fn mount(&self, device: D) -> FatResult<()> {
        let mut slot = self.inner.try_lock().ok_or(FatError::Busy)?;
        *slot = Some(FatDriver::mount(device)?);
        Ok(())
    }

    /// Run `f` with exclusive access to the driver.
    pub fn with<R>(&self, f: impl FnOnce(&mut FatDriver<D>) -> FatResult<R>) -> FatResult<R> {
        let mut slot = self.inner.try_lock().ok_or_else(|| {
            log::debug!("driver entered while in use");
            FatError::Busy
        })?;
        let driver = slot.as_mut().ok_or(FatError::NoDevice)?;
        f(driver)
    }

    /// Remove the driver, for example when the card is ejected.
    pub fn take(&self) -> FatResult<Option<FatDriver<D>>> {
        let mut slot = self.inner.try_lock().ok_or(FatError::Busy)?;
        Ok(slot.take())
    }
}

impl<D: BlockDevice> Default for SharedDriver<D> {
    fn default() -> Self {
        Self::new()
    }
}
