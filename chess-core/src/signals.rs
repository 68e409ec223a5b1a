//! Buzzer, backlight and heartbeat timing driven from the tick handler.

use crate::config::{BACKLIGHT_TIMEOUT_TICKS, HEARTBEAT_HALF_PERIOD_MS, KEY_CLICK_MS};
use crate::hal::SignalOutputs;

#[derive(Debug, Default)]
pub struct Signals {
    beep_ms: u16,
    buzzer_on: bool,
    backlight_ticks: u16,
    backlight_on: bool,
    heartbeat_ms: u16,
    heartbeat_on: bool,
}

impl Signals {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            beep_ms: 0,
            buzzer_on: false,
            backlight_ticks: 0,
            backlight_on: false,
            heartbeat_ms: 0,
            heartbeat_on: false,
        }
    }

    /// 1 ms handler: runs the beep countdown.
    pub fn fast_tick<O: SignalOutputs>(&mut self, out: &mut O) {
        let on = self.beep_ms > 0;
        self.beep_ms = self.beep_ms.saturating_sub(1);
        if on != self.buzzer_on {
            self.buzzer_on = on;
            out.set_buzzer(on);
        }
    }

    /// 10 ms handler: backlight auto-off.
    pub fn slow_tick<O: SignalOutputs>(&mut self, out: &mut O) {
        if self.backlight_ticks == 0 {
            return;
        }
        self.backlight_ticks -= 1;
        if self.backlight_ticks == 0 && self.backlight_on {
            self.backlight_on = false;
            out.set_backlight(false);
        }
    }

    /// Toggles the heartbeat indicator every half period.
    pub fn heartbeat<O: SignalOutputs>(&mut self, out: &mut O) {
        self.heartbeat_ms += 1;
        if self.heartbeat_ms >= HEARTBEAT_HALF_PERIOD_MS {
            self.heartbeat_ms = 0;
            self.heartbeat_on = !self.heartbeat_on;
            out.set_heartbeat(self.heartbeat_on);
        }
    }

    /// Starts (or extends) a beep of `duration_ms`.
    pub fn beep(&mut self, duration_ms: u16) {
        self.beep_ms = self.beep_ms.max(duration_ms);
    }

    pub fn key_click(&mut self) {
        self.beep(KEY_CLICK_MS);
    }

    pub fn wake_backlight<O: SignalOutputs>(&mut self, out: &mut O) {
        self.backlight_ticks = BACKLIGHT_TIMEOUT_TICKS;
        if !self.backlight_on {
            self.backlight_on = true;
            out.set_backlight(true);
        }
    }

    /// Light button: switches the backlight on (with timeout) or off.
    pub fn toggle_backlight<O: SignalOutputs>(&mut self, out: &mut O) {
        if self.backlight_on {
            self.backlight_on = false;
            self.backlight_ticks = 0;
            out.set_backlight(false);
        } else {
            self.wake_backlight(out);
        }
    }

    /// Cuts any running beep immediately.
    pub fn silence<O: SignalOutputs>(&mut self, out: &mut O) {
        self.beep_ms = 0;
        self.buzzer_on = false;
        out.set_buzzer(false);
    }

    #[must_use]
    pub fn is_beeping(&self) -> bool {
        self.buzzer_on
    }

    #[must_use]
    pub fn backlight_on(&self) -> bool {
        self.backlight_on
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Outputs {
        buzzer: bool,
        backlight: bool,
        heartbeat_toggles: u32,
    }

    impl SignalOutputs for Outputs {
        fn set_buzzer(&mut self, on: bool) {
            self.buzzer = on;
        }

        fn set_backlight(&mut self, on: bool) {
            self.backlight = on;
        }

        fn set_heartbeat(&mut self, _on: bool) {
            self.heartbeat_toggles += 1;
        }
    }

    #[test]
    fn key_click_lasts_click_duration() {
        let mut signals = Signals::new();
        let mut out = Outputs::default();
        signals.key_click();
        for _ in 0..KEY_CLICK_MS {
            signals.fast_tick(&mut out);
            assert!(out.buzzer);
        }
        signals.fast_tick(&mut out);
        assert!(!out.buzzer);
    }

    #[test]
    fn backlight_switches_off_after_timeout() {
        let mut signals = Signals::new();
        let mut out = Outputs::default();
        signals.wake_backlight(&mut out);
        for _ in 0..BACKLIGHT_TIMEOUT_TICKS - 1 {
            signals.slow_tick(&mut out);
        }
        assert!(out.backlight);
        signals.slow_tick(&mut out);
        assert!(!out.backlight);
    }

    #[test]
    fn light_button_toggles() {
        let mut signals = Signals::new();
        let mut out = Outputs::default();
        signals.toggle_backlight(&mut out);
        assert!(out.backlight);
        signals.toggle_backlight(&mut out);
        assert!(!out.backlight);
    }

    #[test]
    fn heartbeat_has_one_second_period() {
        let mut signals = Signals::new();
        let mut out = Outputs::default();
        for _ in 0..2_000 {
            signals.heartbeat(&mut out);
        }
        assert_eq!(out.heartbeat_toggles, 4);
    }
}
