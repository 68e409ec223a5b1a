use core::cell::Cell;

use chess_core::hal::{Clock, Idle, Instant, TickTimer};
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{DWT, SCB};

use super::clock::core_mhz;

fn peripherals() -> cortex_m::Peripherals {
    // SAFETY: each handle touches a disjoint set of core registers, and the
    // tick interrupt never races the main program on SysTick configuration
    // because the scheduler halts it first.
    unsafe { cortex_m::Peripherals::steal() }
}

pub(super) fn enable_cycle_counter() {
    let mut core = peripherals();
    core.DCB.enable_trace();
    core.DWT.enable_cycle_counter();
}

/// SysTick running from the core clock.
pub struct SysTickTimer;

impl TickTimer for SysTickTimer {
    fn stop(&mut self) {
        let mut syst = peripherals().SYST;
        syst.disable_interrupt();
        syst.disable_counter();
    }

    fn clear_pending(&mut self) {
        SCB::clear_pendst();
    }

    fn start(&mut self, reload: u32) {
        let mut syst = peripherals().SYST;
        syst.set_clock_source(SystClkSource::Core);
        syst.set_reload(reload);
        syst.clear_current();
        syst.enable_interrupt();
        syst.enable_counter();
    }
}

/// Microsecond time base built on the DWT cycle counter.
///
/// Cycles are converted at the frequency in effect when they are observed, so
/// `now` must be polled at least once per counter wrap (about 20 s at the
/// fastest tier). Busy waits poll continuously.
pub struct CycleClock {
    last_cycles: Cell<u32>,
    spare_cycles: Cell<u64>,
    micros: Cell<u64>,
}

impl CycleClock {
    pub fn new() -> Self {
        Self {
            last_cycles: Cell::new(DWT::cycle_count()),
            spare_cycles: Cell::new(0),
            micros: Cell::new(0),
        }
    }
}

impl Clock for CycleClock {
    fn now(&self) -> Instant {
        let cycles = DWT::cycle_count();
        let elapsed = u64::from(cycles.wrapping_sub(self.last_cycles.get()));
        self.last_cycles.set(cycles);

        let per_micro = u64::from(core_mhz().max(1));
        let total = self.spare_cycles.get() + elapsed;
        self.micros.set(self.micros.get() + total / per_micro);
        self.spare_cycles.set(total % per_micro);
        Instant::from_micros(self.micros.get())
    }
}

/// Sleeps the core until the next interrupt.
pub struct Wfi;

impl Idle for Wfi {
    fn wait_for_interrupt(&mut self) {
        cortex_m::asm::wfi();
    }
}
