//! Hardware capabilities consumed by the coordination layer.
//!
//! Each trait covers one peripheral concern and is deliberately narrow so the
//! firmware can implement it with a handful of register writes and tests can
//! replace it with a recording mock. None of the traits encode a specific
//! register layout; the firmware crate binds them to the STM32F4 PAC.

use core::ops::Add;
use core::time::Duration;

/// Monotonic timestamp with microsecond resolution.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Instant {
    micros: u64,
}

impl Instant {
    /// Creates an instant from a microsecond count.
    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self { micros }
    }

    /// Returns the raw microsecond count.
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.micros
    }

    /// Returns the saturating duration from `earlier` to `self`.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_micros(self.micros.saturating_sub(earlier.micros))
    }
}

impl Add<Duration> for Instant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self::Output {
        let micros = u64::try_from(rhs.as_micros()).unwrap_or(u64::MAX);
        Self::from_micros(self.micros.saturating_add(micros))
    }
}

/// Free-running time source used for busy-wait delays.
///
/// Busy waits never depend on the tick interrupt, so the fault path can use
/// them with interrupts disabled.
pub trait Clock {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Spins until `duration` has elapsed.
    fn busy_wait(&mut self, duration: Duration) {
        let deadline = self.now() + duration;
        while self.now() < deadline {}
    }
}

/// The periodic tick timer driving the scheduler interrupt.
pub trait TickTimer {
    /// Stops the counter and masks the tick interrupt.
    fn stop(&mut self);

    /// Clears a tick interrupt that was latched but not yet serviced.
    fn clear_pending(&mut self);

    /// Loads `reload` and starts counting with the interrupt enabled.
    fn start(&mut self, reload: u32);
}

/// Voltage regulator scale selected for a target frequency.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum VoltageScale {
    /// Full performance scale required above 144 MHz.
    Scale1,
    /// Power-saving scale.
    Scale2,
}

/// Source feeding the system clock mux.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemClockSource {
    Internal,
    External,
    Pll,
}

/// Oscillator that feeds the PLL or the system clock directly.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OscillatorSource {
    External,
    Internal,
}

/// PLL multiplier/divider settings.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PllConfig {
    pub source: OscillatorSource,
    /// Input divider bringing the oscillator down to 1 MHz.
    pub m: u8,
    /// VCO multiplier.
    pub n: u16,
    /// System clock divider (2, 4, 6 or 8).
    pub p: u8,
    /// USB/SDIO divider.
    pub q: u8,
}

/// APB prescalers expressed as plain divisors (1, 2, 4, 8, 16).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BusDividers {
    pub apb1: u8,
    pub apb2: u8,
}

/// Reset and clock control registers plus the flash interface.
pub trait ClockHardware {
    /// Enables the bus clock of the power controller.
    fn enable_power_interface(&mut self);
    fn set_voltage_scale(&mut self, scale: VoltageScale);
    fn regulator_ready(&self) -> bool;
    fn flash_wait_states(&self) -> u8;
    fn set_flash_wait_states(&mut self, wait_states: u8);
    fn start_external_oscillator(&mut self);
    fn stop_external_oscillator(&mut self);
    fn external_oscillator_ready(&self) -> bool;
    fn select_system_clock(&mut self, source: SystemClockSource);
    fn system_clock_source(&self) -> SystemClockSource;
    fn disable_pll(&mut self);
    fn configure_pll(&mut self, config: PllConfig);
    fn enable_pll(&mut self);
    fn pll_ready(&self) -> bool;
    fn bus_dividers(&self) -> BusDividers;
    fn set_bus_dividers(&mut self, dividers: BusDividers);
}

/// Independent watchdog fed by the low-speed internal oscillator.
pub trait WatchdogHardware {
    /// Starts the countdown; once started it cannot be stopped.
    fn start(&mut self);
    /// Unlocks the prescaler and reload registers for writing.
    fn unlock(&mut self);
    fn write_prescaler(&mut self, code: u8);
    fn write_reload(&mut self, reload: u16);
    /// Returns `true` while a prescaler or reload write has not been committed.
    fn update_pending(&self) -> bool;
    /// Reloads the countdown.
    fn feed(&mut self);
}

/// Keypad matrix lines plus the separately wired light button.
///
/// Read methods report asserted lines as set bits regardless of the
/// electrical polarity.
pub trait KeyMatrix {
    fn drive_columns_low(&mut self);
    fn read_rows(&self) -> u8;
    fn drive_rows_low(&mut self);
    fn read_columns(&self) -> u8;
    fn light_button_asserted(&self) -> bool;
    /// Reconfigures the lines so only the ENTER key can be sampled.
    fn configure_enter_only(&mut self);
    fn enter_asserted(&self) -> bool;
}

/// Battery voltage converter with a single pending conversion.
pub trait BatteryAdc {
    /// Returns the result of the last completed conversion.
    fn read_last(&mut self) -> u16;
    /// Starts the next conversion without waiting for it.
    fn start_conversion(&mut self);
}

/// Battery-backed persistent memory.
pub trait BackupMemory {
    /// Size of the region in bytes.
    fn capacity(&self) -> usize;
    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    fn read(&self, offset: usize, buf: &mut [u8]);
    /// Writes `data` starting at `offset`.
    fn write(&mut self, offset: usize, data: &[u8]);
}

/// Buzzer, backlight and indicator outputs driven from the tick handler.
pub trait SignalOutputs {
    fn set_buzzer(&mut self, on: bool);
    fn set_backlight(&mut self, on: bool);
    fn set_heartbeat(&mut self, on: bool);
}

/// Register that survives a watchdog reset (an RTC backup register).
pub trait RetainedRegister {
    fn read(&self) -> u32;
    fn write(&mut self, value: u32);
}

/// Low-power wait used by the main program while it has nothing to do.
pub trait Idle {
    /// Sleeps until the next interrupt; spurious wakes are allowed.
    fn wait_for_interrupt(&mut self);
}
