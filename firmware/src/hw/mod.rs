//! STM32F405 bindings for the hardware traits of the coordination layer.
//!
//! Every binding is a zero-sized handle over PAC registers. The fault handler
//! rebuilds the handles it needs instead of borrowing them from the main
//! program, so nothing here may carry state that matters across instances.

mod adc;
mod backup;
mod clock;
mod keypad;
mod signals;
mod timer;

use chess_core::diagnostics::ResetFlags;
use chess_core::system::Platform;
use embassy_stm32::pac;

pub use adc::BatteryChannel;
pub use backup::{BackupSram, RtcBackupRegister};
pub use clock::{RccClock, core_mhz};
pub use keypad::MatrixPins;
pub use signals::PanelOutputs;
pub use timer::{CycleClock, SysTickTimer, Wfi};

/// Peripheral set of the production board.
pub struct Board;

impl Platform for Board {
    type Clock = RccClock;
    type Timer = SysTickTimer;
    type Watchdog = IndependentWatchdog;
    type Backup = BackupSram;
    type Idle = Wfi;
}

/// Enables bus clocks and puts every pin in its idle configuration.
pub fn init_board() {
    pac::RCC.ahb1enr().modify(|w| {
        w.set_gpioaen(true);
        w.set_gpioben(true);
        w.set_gpiocen(true);
        w.set_bkpsramen(true);
    });
    pac::RCC.apb1enr().modify(|w| w.set_pwren(true));
    pac::RCC.apb2enr().modify(|w| w.set_adc1en(true));
    pac::FLASH.acr().modify(|w| {
        w.set_prften(true);
        w.set_icen(true);
        w.set_dcen(true);
    });

    keypad::configure();
    signals::configure();
    adc::configure();
    backup::enable();
    timer::enable_cycle_counter();
}

/// Reads and clears the reset controller flags.
pub fn read_reset_flags() -> ResetFlags {
    let csr = pac::RCC.csr().read();
    let flags = ResetFlags {
        power_on: csr.porrstf(),
        watchdog: csr.iwdgrstf(),
        external_pin: csr.pinrstf(),
        software: csr.sftrstf(),
        brown_out: csr.borrstf(),
    };
    pac::RCC.csr().modify(|w| w.set_rmvf(true));
    flags
}

/// Configurable fault status register.
pub fn fault_status() -> u32 {
    // SAFETY: read-only access to a system control register.
    unsafe { (*cortex_m::peripheral::SCB::PTR).cfsr.read() }
}

/// Independent watchdog clocked from the 32 kHz LSI.
pub struct IndependentWatchdog;

impl chess_core::hal::WatchdogHardware for IndependentWatchdog {
    fn start(&mut self) {
        pac::IWDG.kr().write(|w| w.set_key(pac::iwdg::vals::Key::START));
    }

    fn unlock(&mut self) {
        pac::IWDG.kr().write(|w| w.set_key(pac::iwdg::vals::Key::ENABLE));
    }

    fn write_prescaler(&mut self, code: u8) {
        pac::IWDG
            .pr()
            .write(|w| w.set_pr(pac::iwdg::vals::Pr::from_bits(code)));
    }

    fn write_reload(&mut self, reload: u16) {
        pac::IWDG.rlr().write(|w| w.set_rl(reload));
    }

    fn update_pending(&self) -> bool {
        let sr = pac::IWDG.sr().read();
        sr.pvu() || sr.rvu()
    }

    fn feed(&mut self) {
        pac::IWDG.kr().write(|w| w.set_key(pac::iwdg::vals::Key::RESET));
    }
}
