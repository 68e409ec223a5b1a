use crate::config::DebounceConfig;

/// Debounce counter for one physical key.
///
/// While the key is up the counter is a run length: detections count up and
/// any idle scan drops it back to zero, so a press needs `hit` consecutive
/// detections. On press the counter is forced to `blocked`; from there idle
/// scans count down and detections count back up, and the key is up again
/// once the counter has decayed to `release`. The counter keeps that value,
/// so a re-press needs `hit - release` further consecutive detections.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Debounce {
    counter: u8,
    active: bool,
}

impl Debounce {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counter: 0,
            active: false,
        }
    }

    /// Folds one completed scan into the state; returns `true` on a new press.
    pub fn sample(&mut self, detected: bool, config: &DebounceConfig) -> bool {
        if self.active {
            if detected {
                if self.counter < config.blocked {
                    self.counter += 1;
                }
            } else {
                self.counter = self.counter.saturating_sub(1);
            }
            if self.counter <= config.release {
                self.active = false;
            }
            return false;
        }

        if !detected {
            self.counter = 0;
            return false;
        }

        self.counter = self.counter.saturating_add(1);
        if self.counter >= config.hit {
            self.active = true;
            self.counter = config.blocked;
            return true;
        }
        false
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub const fn counter(&self) -> u8 {
        self.counter
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
