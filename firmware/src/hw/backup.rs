use chess_core::hal::{BackupMemory, RetainedRegister};
use chess_core::persist::BACKUP_CAPACITY;
use embassy_stm32::pac;

const BKPSRAM_BASE: usize = 0x4002_4000;

/// Grants write access to the backup domain and keeps the backup SRAM
/// powered from VBAT.
pub(super) fn enable() {
    pac::PWR.cr1().modify(|w| w.set_dbp(true));
    pac::PWR.csr1().modify(|w| w.set_bre(true));
    while !pac::PWR.csr1().read().brr() {}
}

/// The 4 KiB battery-backed SRAM.
pub struct BackupSram;

impl BackupSram {
    fn span(offset: usize, len: usize) -> Option<*mut u8> {
        let end = offset.checked_add(len)?;
        (end <= BACKUP_CAPACITY).then(|| (BKPSRAM_BASE + offset) as *mut u8)
    }
}

impl BackupMemory for BackupSram {
    fn capacity(&self) -> usize {
        BACKUP_CAPACITY
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        let Some(base) = Self::span(offset, buf.len()) else {
            buf.fill(0);
            return;
        };
        for (index, byte) in buf.iter_mut().enumerate() {
            // SAFETY: the span lies inside BKPSRAM, which is always mapped.
            *byte = unsafe { base.add(index).read_volatile() };
        }
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        let Some(base) = Self::span(offset, data.len()) else {
            return;
        };
        for (index, byte) in data.iter().enumerate() {
            // SAFETY: as above; write access was granted in `enable`.
            unsafe { base.add(index).write_volatile(*byte) };
        }
    }
}

/// RTC backup register 0, which survives watchdog resets.
pub struct RtcBackupRegister;

impl RetainedRegister for RtcBackupRegister {
    fn read(&self) -> u32 {
        pac::RTC.bkpr(0).read().bkp()
    }

    fn write(&mut self, value: u32) {
        pac::RTC.bkpr(0).write(|w| w.set_bkp(value));
    }
}
