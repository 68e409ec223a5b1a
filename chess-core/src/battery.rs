//! Battery voltage averaging and level classification.

use core::fmt;

use crate::config::{BATTERY_ADC_MAX, BATTERY_ADC_MIN, BATTERY_SAMPLES, BatteryThresholds};
use crate::hal::BatteryAdc;

const INDEX_MASK: usize = BATTERY_SAMPLES - 1;
const _: () = assert!(BATTERY_SAMPLES.is_power_of_two());

/// Battery level bitset.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BatteryStatus(u8);

impl BatteryStatus {
    pub const HIGH: Self = Self(1);
    pub const LOW: Self = Self(2);
    pub const SHUTDOWN: Self = Self(4);
    pub const LOW_SHUTDOWN: Self = Self(Self::LOW.0 | Self::SHUTDOWN.0);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Rebuilds a status from [`BatteryStatus::bits`], dropping unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x07)
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_high(self) -> bool {
        self.contains(Self::HIGH)
    }

    #[must_use]
    pub const fn is_shutdown(self) -> bool {
        self.contains(Self::SHUTDOWN)
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_shutdown() {
            f.write_str("shutdown")
        } else if self.is_high() {
            f.write_str("high")
        } else {
            f.write_str("low")
        }
    }
}

/// Result of folding one conversion into the monitor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleOutcome {
    pub status: BatteryStatus,
    /// Set only on the sample that entered the shutdown state.
    pub entered_shutdown: bool,
}

/// Circular average of the most recent battery readings.
///
/// `sum` is maintained incrementally and always equals the sum of `samples`.
pub struct BatteryMonitor {
    samples: [u16; BATTERY_SAMPLES],
    index: usize,
    sum: u32,
    status: BatteryStatus,
    entropy: u32,
    thresholds: BatteryThresholds,
}

impl BatteryMonitor {
    /// Primes every slot with the first reading and classifies it.
    #[must_use]
    pub fn new(thresholds: BatteryThresholds, first_reading: u16) -> Self {
        let reading = clip(first_reading);
        let sum = u32::from(reading) * BATTERY_SAMPLES as u32;
        let status = if sum > thresholds.high_to_low {
            BatteryStatus::HIGH
        } else if sum > thresholds.shutdown {
            BatteryStatus::LOW
        } else {
            BatteryStatus::LOW_SHUTDOWN
        };
        Self {
            samples: [reading; BATTERY_SAMPLES],
            index: 0,
            sum,
            status,
            entropy: u32::from(first_reading & 1),
            thresholds,
        }
    }

    /// Reads the last conversion, starts the next one and folds the result in.
    pub fn sample_adc<A: BatteryAdc>(&mut self, adc: &mut A) -> SampleOutcome {
        let raw = adc.read_last();
        adc.start_conversion();
        self.on_sample(raw)
    }

    /// Folds one raw reading into the average and reclassifies.
    pub fn on_sample(&mut self, raw: u16) -> SampleOutcome {
        self.entropy = self.entropy.rotate_left(1) ^ u32::from(raw & 1);

        let reading = clip(raw);
        let evicted = self.samples[self.index];
        self.samples[self.index] = reading;
        self.index = (self.index + 1) & INDEX_MASK;
        self.sum = self.sum - u32::from(evicted) + u32::from(reading);

        let previous = self.status;
        self.status = self.classify();
        SampleOutcome {
            status: self.status,
            entered_shutdown: self.status.is_shutdown() && !previous.is_shutdown(),
        }
    }

    // One state step per sample; shutdown is terminal.
    fn classify(&self) -> BatteryStatus {
        let t = &self.thresholds;
        if self.status.is_shutdown() {
            self.status
        } else if self.status.is_high() {
            if self.sum <= t.high_to_low {
                BatteryStatus::LOW
            } else {
                BatteryStatus::HIGH
            }
        } else if self.sum <= t.shutdown {
            BatteryStatus::LOW_SHUTDOWN
        } else if self.sum >= t.low_to_high {
            BatteryStatus::HIGH
        } else {
            BatteryStatus::LOW
        }
    }

    #[must_use]
    pub fn sum(&self) -> u32 {
        self.sum
    }

    #[must_use]
    pub fn status(&self) -> BatteryStatus {
        self.status
    }

    #[must_use]
    pub fn entropy(&self) -> u32 {
        self.entropy
    }

    #[must_use]
    pub fn samples(&self) -> &[u16; BATTERY_SAMPLES] {
        &self.samples
    }

    #[must_use]
    pub fn thresholds(&self) -> &BatteryThresholds {
        &self.thresholds
    }
}

/// Returns `true` when `sum` is high enough to start a new game.
#[must_use]
pub const fn allows_new_game(thresholds: &BatteryThresholds, sum: u32) -> bool {
    sum >= thresholds.startup_min
}

fn clip(raw: u16) -> u16 {
    raw.clamp(BATTERY_ADC_MIN, BATTERY_ADC_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level_for(sum: u32) -> u16 {
        u16::try_from(sum / BATTERY_SAMPLES as u32).unwrap()
    }

    #[test]
    fn primes_buffer_with_first_reading() {
        let monitor = BatteryMonitor::new(BatteryThresholds::default(), 2_500);
        assert_eq!(monitor.sum(), 2_500 * 32);
        assert_eq!(monitor.status(), BatteryStatus::HIGH);
    }

    #[test]
    fn initial_status_uses_thresholds() {
        let t = BatteryThresholds::default();
        let low = BatteryMonitor::new(t, level_for(t.high_to_low));
        assert_eq!(low.status(), BatteryStatus::LOW);
        let dead = BatteryMonitor::new(t, level_for(t.shutdown));
        assert_eq!(dead.status(), BatteryStatus::LOW_SHUTDOWN);
    }

    #[test]
    fn readings_are_clipped() {
        let mut monitor = BatteryMonitor::new(BatteryThresholds::default(), 0);
        assert_eq!(monitor.sum(), u32::from(BATTERY_ADC_MIN) * 32);
        monitor.on_sample(u16::MAX);
        assert_eq!(
            monitor.sum(),
            u32::from(BATTERY_ADC_MIN) * 31 + u32::from(BATTERY_ADC_MAX)
        );
    }

    #[test]
    fn low_recovers_only_above_upper_band() {
        let t = BatteryThresholds::default();
        let mut monitor = BatteryMonitor::new(t, 2_300);
        assert_eq!(monitor.status(), BatteryStatus::LOW);

        // Average between the bands stays LOW.
        for _ in 0..32 {
            monitor.on_sample(2_400);
        }
        assert_eq!(monitor.status(), BatteryStatus::LOW);

        for _ in 0..32 {
            monitor.on_sample(2_420);
        }
        assert_eq!(monitor.status(), BatteryStatus::HIGH);
    }

    #[test]
    fn shutdown_reported_once_and_sticks() {
        let t = BatteryThresholds::default();
        let mut monitor = BatteryMonitor::new(t, 2_300);
        let mut entered = 0;
        for _ in 0..64 {
            if monitor.on_sample(1_500).entered_shutdown {
                entered += 1;
            }
        }
        assert_eq!(entered, 1);
        for _ in 0..64 {
            monitor.on_sample(3_000);
        }
        assert_eq!(monitor.status(), BatteryStatus::LOW_SHUTDOWN);
    }

    #[test]
    fn high_drops_to_low_before_shutdown() {
        let mut monitor = BatteryMonitor::new(BatteryThresholds::default(), 3_000);
        let mut passed_low = false;
        while !monitor.status().is_shutdown() {
            let previous = monitor.status();
            let outcome = monitor.on_sample(1_200);
            if previous.is_high() {
                assert!(!outcome.status.is_shutdown(), "HIGH must step through LOW");
            }
            passed_low |= outcome.status == BatteryStatus::LOW;
        }
        assert!(passed_low);
    }

    #[test]
    fn adc_sampling_starts_next_conversion() {
        struct Adc {
            value: u16,
            started: u32,
        }
        impl BatteryAdc for Adc {
            fn read_last(&mut self) -> u16 {
                self.value
            }
            fn start_conversion(&mut self) {
                self.started += 1;
            }
        }

        let mut adc = Adc {
            value: 2_501,
            started: 0,
        };
        let mut monitor = BatteryMonitor::new(BatteryThresholds::default(), 2_500);
        let before = monitor.entropy();
        monitor.sample_adc(&mut adc);
        assert_eq!(adc.started, 1);
        assert_eq!(monitor.entropy(), before.rotate_left(1) ^ 1);
    }
}
