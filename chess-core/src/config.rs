//! Compile-time defaults for the coordination layer.
//!
//! The firmware starts from [`SystemConfig::default`] and adjusts individual
//! fields (for example the user's throttle setting restored from backup
//! memory) before handing the configuration to the components.

use crate::clock::SpeedTier;

/// Tick interrupt rate in normal operation.
pub const TICK_HZ: u32 = 1_000;
/// Tick interrupt rate once the system is dying.
pub const DYING_TICK_HZ: u32 = 100;
/// Number of 1 ms ticks per slow (10 ms) dispatch.
pub const SLOW_TICK_DIVIDER: u8 = 10;
/// Milliseconds added per tick in the dying state.
pub const DYING_TICK_MS: u32 = 1_000 / DYING_TICK_HZ;
/// Half period of the heartbeat indicator (1 s duty cycle).
pub const HEARTBEAT_HALF_PERIOD_MS: u16 = 500;

/// Depth of the key event ring (one slot stays free).
pub const KEY_QUEUE_DEPTH: usize = 16;

/// External crystal frequency.
pub const EXTERNAL_OSC_MHZ: u32 = 8;
/// Internal RC oscillator frequency.
pub const INTERNAL_OSC_MHZ: u32 = 16;
/// Polls of the oscillator-ready flag before falling back to the internal RC.
pub const OSC_STARTUP_POLLS: u32 = 0x5000;
/// Polls of the PLL and regulator ready flags before giving up.
pub const PLL_LOCK_POLLS: u32 = 0x5000;

/// Watchdog timeout used during normal operation.
pub const WATCHDOG_TIMEOUT_MS: u32 = 10_000;
/// Short timeout armed by the fault handler before it stops retriggering.
pub const FAULT_WATCHDOG_TIMEOUT_MS: u32 = 100;

/// Key click length.
pub const KEY_CLICK_MS: u16 = 15;
/// Backlight on-time after a key press, in 10 ms units.
pub const BACKLIGHT_TIMEOUT_TICKS: u16 = 3_000;

/// Per-key debounce thresholds, in completed scans.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DebounceConfig {
    /// Consecutive detections needed before a press is reported.
    pub hit: u8,
    /// Counter level at which an active key is considered released.
    pub release: u8,
    /// Counter value forced on press; also the counter ceiling.
    pub blocked: u8,
}

impl DebounceConfig {
    #[must_use]
    pub const fn new(hit: u8, release: u8, blocked: u8) -> Self {
        Self {
            hit,
            release,
            blocked,
        }
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self::new(6, 2, 20)
    }
}

/// Number of samples in the battery averaging ring (power of two).
pub const BATTERY_SAMPLES: usize = 32;
/// Lowest raw reading accepted into the ring.
pub const BATTERY_ADC_MIN: u16 = 1_200;
/// Highest raw reading accepted into the ring.
pub const BATTERY_ADC_MAX: u16 = 3_600;

/// Battery classification thresholds on the summed scale.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryThresholds {
    /// At or below: shutdown.
    pub shutdown: u32,
    /// At or below while HIGH: drop to LOW.
    pub high_to_low: u32,
    /// At or above while LOW: recover to HIGH.
    pub low_to_high: u32,
    /// Minimum to start a new game after boot.
    pub startup_min: u32,
}

impl BatteryThresholds {
    /// Builds thresholds from per-sample ADC levels.
    #[allow(clippy::cast_lossless, clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn from_sample_levels(
        shutdown: u16,
        high_to_low: u16,
        low_to_high: u16,
        startup_min: u16,
    ) -> Self {
        let n = BATTERY_SAMPLES as u32;
        Self {
            shutdown: shutdown as u32 * n,
            high_to_low: high_to_low as u32 * n,
            low_to_high: low_to_high as u32 * n,
            startup_min: startup_min as u32 * n,
        }
    }

    /// Returns `true` when the thresholds are strictly ordered.
    #[must_use]
    pub const fn is_ordered(&self) -> bool {
        self.shutdown < self.high_to_low
            && self.high_to_low < self.low_to_high
            && self.low_to_high < self.startup_min
    }
}

impl Default for BatteryThresholds {
    fn default() -> Self {
        // 2x AA through a 1:2 divider at 3.3 V full scale.
        Self::from_sample_levels(2_230, 2_360, 2_420, 2_480)
    }
}

/// Speed policy applied by the clock manager.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockPolicy {
    /// Tier used while waiting for user input.
    pub idle: SpeedTier,
    /// Highest tier reached without overclocking; also the fallback when an
    /// overclock request is denied.
    pub nominal: SpeedTier,
    /// User underclock applied by `throttle` and as the ceiling for normal
    /// requests.
    pub throttle: Option<SpeedTier>,
    /// Minimum tier held while writing backup memory.
    pub save: SpeedTier,
}

impl Default for ClockPolicy {
    fn default() -> Self {
        Self {
            idle: SpeedTier::OscillatorOnly,
            nominal: SpeedTier::Mhz168,
            throttle: None,
            save: SpeedTier::Mhz168,
        }
    }
}

/// Default ceiling: 49 days minus one hour of headroom for deadline maths.
pub const SESSION_CLOCK_CEILING_MS: u32 = u32::MAX - 3_600_000;

/// Aggregate configuration handed to the components at boot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SystemConfig {
    pub debounce: DebounceConfig,
    pub battery: BatteryThresholds,
    pub clock: ClockPolicy,
    pub watchdog_timeout_ms: u32,
    pub session_clock_ceiling_ms: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            debounce: DebounceConfig::default(),
            battery: BatteryThresholds::default(),
            clock: ClockPolicy::default(),
            watchdog_timeout_ms: WATCHDOG_TIMEOUT_MS,
            session_clock_ceiling_ms: SESSION_CLOCK_CEILING_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_battery_thresholds_are_ordered() {
        assert!(BatteryThresholds::default().is_ordered());
    }

    #[test]
    fn blocked_value_exceeds_hit_threshold() {
        let debounce = DebounceConfig::default();
        assert!(debounce.blocked > debounce.hit);
        assert!(debounce.release < debounce.hit);
    }

    #[test]
    fn battery_samples_is_power_of_two() {
        assert!(BATTERY_SAMPLES.is_power_of_two());
    }
}
