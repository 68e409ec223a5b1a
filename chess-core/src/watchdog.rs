//! Independent watchdog supervision.

use crate::hal::WatchdogHardware;

/// Low-speed oscillator feeding the watchdog.
pub const WATCHDOG_CLOCK_HZ: u32 = 32_000;
/// Prescaler register code selecting a divide-by-256.
pub const PRESCALER_DIV256: u8 = 6;
/// Divider selected by [`PRESCALER_DIV256`].
pub const PRESCALER_DIVIDER: u32 = 256;
/// Duration of one countdown step.
pub const STEP_MS: u32 = PRESCALER_DIVIDER * 1_000 / WATCHDOG_CLOCK_HZ;
/// Largest value accepted by the 12-bit reload register.
pub const MAX_RELOAD: u16 = 0x0FFF;

/// Converts a timeout to reload steps, rounding down within `1..=MAX_RELOAD`.
#[must_use]
pub fn reload_for(timeout_ms: u32) -> u16 {
    let steps = (timeout_ms / STEP_MS).clamp(1, u32::from(MAX_RELOAD));
    u16::try_from(steps).unwrap_or(MAX_RELOAD)
}

/// Token returned once the watchdog has been armed for a deliberate reset.
///
/// Holding it documents that nothing may retrigger the watchdog any more; the
/// only way forward is to wait for the reset.
#[must_use = "a pending reset only happens if the caller stops retriggering"]
#[derive(Debug, Eq, PartialEq)]
pub struct PendingReset {
    pub timeout_ms: u32,
}

pub struct Watchdog<H> {
    hw: H,
    timeout_ms: Option<u32>,
}

impl<H: WatchdogHardware> Watchdog<H> {
    #[must_use]
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            timeout_ms: None,
        }
    }

    /// Starts (or reprograms) the countdown and returns the effective timeout.
    ///
    /// Blocks until both register writes have been committed by the watchdog
    /// clock domain.
    pub fn arm(&mut self, timeout_ms: u32) -> u32 {
        let reload = reload_for(timeout_ms);
        self.hw.start();
        self.hw.unlock();
        self.hw.write_prescaler(PRESCALER_DIV256);
        self.hw.write_reload(reload);
        while self.hw.update_pending() {}
        self.hw.feed();

        let effective = u32::from(reload) * STEP_MS;
        self.timeout_ms = Some(effective);
        effective
    }

    pub fn retrigger(&mut self) {
        self.hw.feed();
    }

    /// Re-arms with a short timeout for a supervised reset.
    pub fn force_reset(&mut self, timeout_ms: u32) -> PendingReset {
        PendingReset {
            timeout_ms: self.arm(timeout_ms),
        }
    }

    /// Effective timeout of the last `arm`, if any.
    #[must_use]
    pub fn timeout_ms(&self) -> Option<u32> {
        self.timeout_ms
    }

    #[must_use]
    pub fn hardware(&self) -> &H {
        &self.hw
    }
}
