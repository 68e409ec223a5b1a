//! Last-resort handling of hardware faults.
//!
//! The handler runs with interrupts disabled and owns nothing long-lived: it
//! borrows the components, drops the system into its lowest-power state,
//! waits for the user to acknowledge the diagnostic, and hands the reset over
//! to the watchdog.

use core::fmt::{self, Write as _};
use core::time::Duration;

use heapless::String;

use crate::clock::{ClockManager, SpeedTier};
use crate::config::{DebounceConfig, FAULT_WATCHDOG_TIMEOUT_MS};
use crate::diagnostics::INTENTIONAL_RESET_MARKER;
use crate::hal::{
    Clock, ClockHardware, KeyMatrix, RetainedRegister, SignalOutputs, TickTimer, WatchdogHardware,
};
use crate::keyboard::wait_for_enter;
use crate::scheduler::SchedulerControl;
use crate::watchdog::{PendingReset, Watchdog};

/// Length of the acknowledgement tone.
pub const ACK_TONE: Duration = Duration::from_millis(150);
/// Width of one diagnostic line on the character display.
pub const DIAGNOSTIC_COLUMNS: usize = 20;

pub type DiagnosticLine = String<DIAGNOSTIC_COLUMNS>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultKind {
    HardFault,
    MemManage,
    BusFault,
    UsageFault,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FaultKind::HardFault => "HARD FAULT",
            FaultKind::MemManage => "MEMORY FAULT",
            FaultKind::BusFault => "BUS FAULT",
            FaultKind::UsageFault => "USAGE FAULT",
        };
        f.write_str(text)
    }
}

impl FaultKind {
    /// Picks the escalated fault class from the configurable fault status
    /// register. The lowest non-empty status byte wins; an empty register
    /// means the fault was a plain hard fault (vector table read, escalated
    /// debug event).
    #[must_use]
    pub const fn from_status(cfsr: u32) -> Self {
        if cfsr & 0x0000_00FF != 0 {
            FaultKind::MemManage
        } else if cfsr & 0x0000_FF00 != 0 {
            FaultKind::BusFault
        } else if cfsr & 0xFFFF_0000 != 0 {
            FaultKind::UsageFault
        } else {
            FaultKind::HardFault
        }
    }
}

/// What the exception frame and fault registers told us.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultReport {
    pub kind: FaultKind,
    /// Program counter at the time of the fault.
    pub address: u32,
    /// Configurable fault status register.
    pub status: u32,
}

impl FaultReport {
    /// Renders the fixed four-line diagnostic.
    #[must_use]
    pub fn diagnostic_lines(&self) -> [DiagnosticLine; 4] {
        let mut lines: [DiagnosticLine; 4] = Default::default();
        // Every line fits the display width, so formatting cannot fail.
        let _ = write!(lines[0], "{}", self.kind);
        let _ = write!(lines[1], "PC   {:08X}", self.address);
        let _ = write!(lines[2], "CFSR {:08X}", self.status);
        let _ = lines[3].push_str("ENT: RESTART");
        lines
    }
}

/// Outputs only the fault path needs beyond the tick-driven signals.
pub trait FaultIo: SignalOutputs {
    fn set_fault_led(&mut self, on: bool);

    /// Writes the diagnostic lines to the display, top to bottom.
    fn show_diagnostic(&mut self, lines: &[DiagnosticLine]);
}

/// Borrowed components the fault path drives.
pub struct FaultHandler<'a, W, T, H, M, C, R, O> {
    pub watchdog: &'a mut Watchdog<W>,
    pub scheduler: &'a mut SchedulerControl<T>,
    pub clock: &'a mut ClockManager<H>,
    pub matrix: &'a mut M,
    pub time: &'a mut C,
    pub retained: &'a mut R,
    pub io: &'a mut O,
    pub debounce: DebounceConfig,
}

impl<W, T, H, M, C, R, O> FaultHandler<'_, W, T, H, M, C, R, O>
where
    W: WatchdogHardware,
    T: TickTimer,
    H: ClockHardware,
    M: KeyMatrix,
    C: Clock,
    R: RetainedRegister,
    O: FaultIo,
{
    /// Runs the fault sequence. The returned token means the watchdog now
    /// owns the reset; the caller must spin without retriggering it.
    pub fn run(self, report: &FaultReport) -> PendingReset {
        let Self {
            watchdog,
            scheduler,
            clock,
            matrix,
            time,
            retained,
            io,
            debounce,
        } = self;

        watchdog.retrigger();
        io.set_buzzer(false);
        scheduler.halt();
        let _ = clock.set_speed(SpeedTier::OscillatorOnly, scheduler);
        io.set_fault_led(true);
        io.show_diagnostic(&report.diagnostic_lines());

        wait_for_enter(matrix, time, &debounce, || watchdog.retrigger());

        watchdog.retrigger();
        io.set_buzzer(true);
        time.busy_wait(ACK_TONE);
        io.set_buzzer(false);

        retained.write(INTENTIONAL_RESET_MARKER);
        watchdog.force_reset(FAULT_WATCHDOG_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_fits_display() {
        let report = FaultReport {
            kind: FaultKind::UsageFault,
            address: 0x0800_1234,
            status: 0x0002_0000,
        };
        let lines = report.diagnostic_lines();
        assert_eq!(lines[0].as_str(), "USAGE FAULT");
        assert_eq!(lines[1].as_str(), "PC   08001234");
        assert_eq!(lines[2].as_str(), "CFSR 00020000");
        assert!(lines.iter().all(|line| !line.is_empty()));
    }

    #[test]
    fn status_register_selects_fault_class() {
        assert_eq!(FaultKind::from_status(0), FaultKind::HardFault);
        assert_eq!(FaultKind::from_status(0x0000_0082), FaultKind::MemManage);
        assert_eq!(FaultKind::from_status(0x0000_0400), FaultKind::BusFault);
        assert_eq!(FaultKind::from_status(0x0200_0000), FaultKind::UsageFault);
        assert_eq!(FaultKind::from_status(0x0001_0100), FaultKind::BusFault);
    }
}
