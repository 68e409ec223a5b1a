//! CPU speed tiers and the clock/power manager.
//!
//! Every reconfiguration parks the core on the internal RC oscillator, brings
//! the regulator and PLL up in a fixed order, and only then switches the
//! system clock. Flash wait states and bus dividers are raised before a switch
//! to a faster clock and relaxed only after a switch to a slower one; running
//! flash faster than its access time for the current frequency is a bus fault.

use core::fmt;

use crate::config::{
    ClockPolicy, EXTERNAL_OSC_MHZ, INTERNAL_OSC_MHZ, OSC_STARTUP_POLLS, PLL_LOCK_POLLS,
};
use crate::hal::{
    BusDividers, ClockHardware, OscillatorSource, PllConfig, SystemClockSource, TickTimer,
    VoltageScale,
};
use crate::scheduler::SchedulerControl;

/// Highest APB1 frequency the peripherals are rated for.
pub const APB1_MAX_MHZ: u32 = 42;
/// Highest APB2 frequency the peripherals are rated for.
pub const APB2_MAX_MHZ: u32 = 84;
/// Flash access window per wait state at 3.3 V.
pub const FLASH_MHZ_PER_WAIT_STATE: u32 = 30;
/// Frequencies above this need the full-performance regulator scale.
pub const SCALE2_MAX_MHZ: u32 = 144;
/// Frequencies above this are overclocked.
pub const NOMINAL_MAX_MHZ: u32 = 168;
/// Lowest VCO frequency we configure (keeps the 48 MHz output reachable).
pub const VCO_MIN_MHZ: u32 = 192;
/// USB/SDIO clock derived from the PLL Q output.
pub const USB_CLOCK_MHZ: u32 = 48;

/// CPU speed tiers, ordered from slowest to fastest.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpeedTier {
    /// PLL off, the system runs straight from the oscillator.
    OscillatorOnly,
    Mhz32,
    Mhz64,
    Mhz96,
    Mhz120,
    Mhz144,
    Mhz168,
    Mhz192,
    Mhz216,
}

impl SpeedTier {
    /// Every tier in ascending order.
    pub const ALL: [SpeedTier; 9] = [
        SpeedTier::OscillatorOnly,
        SpeedTier::Mhz32,
        SpeedTier::Mhz64,
        SpeedTier::Mhz96,
        SpeedTier::Mhz120,
        SpeedTier::Mhz144,
        SpeedTier::Mhz168,
        SpeedTier::Mhz192,
        SpeedTier::Mhz216,
    ];

    /// PLL output frequency, or `None` for the oscillator-only tier.
    #[must_use]
    pub const fn pll_mhz(self) -> Option<u32> {
        match self {
            SpeedTier::OscillatorOnly => None,
            SpeedTier::Mhz32 => Some(32),
            SpeedTier::Mhz64 => Some(64),
            SpeedTier::Mhz96 => Some(96),
            SpeedTier::Mhz120 => Some(120),
            SpeedTier::Mhz144 => Some(144),
            SpeedTier::Mhz168 => Some(168),
            SpeedTier::Mhz192 => Some(192),
            SpeedTier::Mhz216 => Some(216),
        }
    }

    /// Core frequency when the tier runs from `source`.
    #[must_use]
    pub const fn frequency_mhz(self, source: OscillatorSource) -> u32 {
        match self.pll_mhz() {
            Some(mhz) => mhz,
            None => oscillator_mhz(source),
        }
    }

    /// Returns `true` for tiers above the nominal maximum.
    #[must_use]
    pub const fn is_overclock(self) -> bool {
        match self.pll_mhz() {
            Some(mhz) => mhz > NOMINAL_MAX_MHZ,
            None => false,
        }
    }

    /// PLL settings for the tier, with a 1 MHz PLL input.
    #[must_use]
    pub fn pll_config(self, source: OscillatorSource) -> Option<PllConfig> {
        let mhz = self.pll_mhz()?;
        let p = [2u8, 4, 6, 8]
            .into_iter()
            .find(|&p| mhz * u32::from(p) >= VCO_MIN_MHZ)
            .unwrap_or(8);
        let vco = mhz * u32::from(p);
        let q = vco.div_ceil(USB_CLOCK_MHZ);
        Some(PllConfig {
            source,
            m: u8::try_from(oscillator_mhz(source)).unwrap_or(u8::MAX),
            n: u16::try_from(vco).unwrap_or(u16::MAX),
            p,
            q: u8::try_from(q).unwrap_or(u8::MAX),
        })
    }

    /// Returns `true` when the PLL delivers exactly 48 MHz on its Q output.
    #[must_use]
    pub fn is_usb_exact(self) -> bool {
        self.pll_config(OscillatorSource::External)
            .is_some_and(|pll| u32::from(pll.n) % USB_CLOCK_MHZ == 0)
    }

    /// Nearest tier at or above `self` that keeps a serial/USB link clocked.
    #[must_use]
    pub fn usb_compatible(self) -> Self {
        Self::ALL
            .into_iter()
            .filter(|tier| *tier >= self)
            .find(|tier| tier.is_usb_exact())
            .unwrap_or(SpeedTier::Mhz168)
    }

    /// Compact code used in persisted configuration.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            SpeedTier::OscillatorOnly => 0,
            SpeedTier::Mhz32 => 1,
            SpeedTier::Mhz64 => 2,
            SpeedTier::Mhz96 => 3,
            SpeedTier::Mhz120 => 4,
            SpeedTier::Mhz144 => 5,
            SpeedTier::Mhz168 => 6,
            SpeedTier::Mhz192 => 7,
            SpeedTier::Mhz216 => 8,
        }
    }

    /// Decodes a persisted tier code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SpeedTier::OscillatorOnly),
            1 => Some(SpeedTier::Mhz32),
            2 => Some(SpeedTier::Mhz64),
            3 => Some(SpeedTier::Mhz96),
            4 => Some(SpeedTier::Mhz120),
            5 => Some(SpeedTier::Mhz144),
            6 => Some(SpeedTier::Mhz168),
            7 => Some(SpeedTier::Mhz192),
            8 => Some(SpeedTier::Mhz216),
            _ => None,
        }
    }
}

impl fmt::Display for SpeedTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pll_mhz() {
            Some(mhz) => write!(f, "{mhz} MHz"),
            None => f.write_str("oscillator"),
        }
    }
}

/// Frequency of a raw oscillator.
#[must_use]
pub const fn oscillator_mhz(source: OscillatorSource) -> u32 {
    match source {
        OscillatorSource::External => EXTERNAL_OSC_MHZ,
        OscillatorSource::Internal => INTERNAL_OSC_MHZ,
    }
}

/// Flash wait states required at `mhz`.
#[must_use]
pub const fn wait_states_for(mhz: u32) -> u8 {
    let ws = mhz.saturating_sub(1) / FLASH_MHZ_PER_WAIT_STATE;
    if ws > 7 { 7 } else { ws as u8 }
}

/// Regulator scale required at `mhz`.
#[must_use]
pub const fn voltage_scale_for(mhz: u32) -> VoltageScale {
    if mhz > SCALE2_MAX_MHZ {
        VoltageScale::Scale1
    } else {
        VoltageScale::Scale2
    }
}

/// Smallest power-of-two APB dividers keeping both buses within rating.
#[must_use]
pub const fn bus_dividers_for(mhz: u32) -> BusDividers {
    BusDividers {
        apb1: bus_divider(mhz, APB1_MAX_MHZ),
        apb2: bus_divider(mhz, APB2_MAX_MHZ),
    }
}

const fn bus_divider(mhz: u32, limit: u32) -> u8 {
    let mut divider = 1u8;
    while divider < 16 && mhz > limit * divider as u32 {
        divider *= 2;
    }
    divider
}

/// Tick timer reload producing `tick_hz` interrupts from a `cpu_hz` core clock.
#[must_use]
pub const fn tick_reload(cpu_hz: u32, tick_hz: u32) -> u32 {
    (cpu_hz / tick_hz).saturating_sub(1)
}

/// Active clock configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    pub tier: SpeedTier,
    pub source: OscillatorSource,
    /// The tier came from a [`SpeedMode::Forced`] request. The throttle
    /// leaves such a tier alone while it sits above the ceiling.
    pub forced: bool,
}

impl ClockConfig {
    /// Configuration straight out of reset: internal RC, no PLL.
    #[must_use]
    pub const fn reset() -> Self {
        Self {
            tier: SpeedTier::OscillatorOnly,
            source: OscillatorSource::Internal,
            forced: false,
        }
    }
}

/// How a speed request interacts with the configured throttle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpeedMode {
    /// Capped at the user's throttle ceiling.
    Normal,
    /// Ignores the throttle ceiling; overclocking rules still apply.
    Forced,
}

/// Conditions gating overclocking tiers.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpeedPermit {
    pub battery_high: bool,
    pub user_interacted: bool,
}

impl SpeedPermit {
    /// Returns `true` when overclocking tiers may be entered.
    #[must_use]
    pub const fn allows_overclock(self) -> bool {
        self.battery_high && self.user_interacted
    }
}

/// Result of a speed change.
#[must_use]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpeedReport {
    pub tier: SpeedTier,
    pub source: OscillatorSource,
    pub frequency_mhz: u32,
    /// The external oscillator or the PLL failed; timing runs from the
    /// internal RC and is less accurate.
    pub degraded: bool,
    /// An overclocking tier was requested but not permitted.
    pub escalation_denied: bool,
}

/// Owns the clock tree and applies speed tiers.
pub struct ClockManager<H> {
    hw: H,
    policy: ClockPolicy,
    config: ClockConfig,
    frequency_mhz: u32,
    serial_active: bool,
}

impl<H: ClockHardware> ClockManager<H> {
    /// Wraps the clock hardware as configured out of reset.
    #[must_use]
    pub fn new(hw: H, policy: ClockPolicy) -> Self {
        Self {
            hw,
            policy,
            config: ClockConfig::reset(),
            frequency_mhz: INTERNAL_OSC_MHZ,
            serial_active: false,
        }
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> ClockConfig {
        self.config
    }

    /// Returns the speed policy.
    #[must_use]
    pub fn policy(&self) -> &ClockPolicy {
        &self.policy
    }

    /// Returns the speed policy for modification (user settings).
    pub fn policy_mut(&mut self) -> &mut ClockPolicy {
        &mut self.policy
    }

    /// Core frequency in Hz.
    #[must_use]
    pub fn cpu_hz(&self) -> u32 {
        self.frequency_mhz * 1_000_000
    }

    /// Core frequency in MHz.
    #[must_use]
    pub fn frequency_mhz(&self) -> u32 {
        self.frequency_mhz
    }

    /// Marks whether a serial/USB link needs a USB-exact PLL.
    pub fn set_serial_active(&mut self, active: bool) {
        self.serial_active = active;
    }

    /// Provides access to the wrapped hardware.
    #[must_use]
    pub fn hardware(&self) -> &H {
        &self.hw
    }

    /// Applies `requested` after the overclocking, throttle and serial rules.
    pub fn request_speed<T: TickTimer>(
        &mut self,
        requested: SpeedTier,
        mode: SpeedMode,
        permit: SpeedPermit,
        scheduler: &mut SchedulerControl<T>,
    ) -> SpeedReport {
        let mut tier = requested;
        let mut denied = false;

        if tier.is_overclock() && !permit.allows_overclock() {
            tier = self.policy.nominal;
            denied = true;
        }

        if mode == SpeedMode::Normal
            && let Some(ceiling) = self.policy.throttle
            && tier > ceiling
        {
            tier = ceiling;
        }

        if self.serial_active {
            tier = tier.usb_compatible();
        }

        let mut report = self.set_speed(tier, scheduler);
        self.config.forced = mode == SpeedMode::Forced;
        report.escalation_denied = denied;
        report
    }

    /// Re-applies the configured underclock.
    ///
    /// Returns `None` when no throttle is configured, the throttle tier is
    /// already active, or a forced request left the clock above the ceiling.
    pub fn throttle<T: TickTimer>(
        &mut self,
        scheduler: &mut SchedulerControl<T>,
    ) -> Option<SpeedReport> {
        let mut ceiling = self.policy.throttle?;
        if self.serial_active {
            ceiling = ceiling.usb_compatible();
        }
        let forced_above = self.config.forced && self.config.tier > ceiling;
        if forced_above || self.config.tier == ceiling {
            return None;
        }
        Some(self.set_speed(ceiling, scheduler))
    }

    /// Reconfigures the clock tree for `tier` without applying any policy.
    ///
    /// The scheduler timer is halted for the duration and restarted with a
    /// reload matching the new frequency if it was running before.
    pub fn set_speed<T: TickTimer>(
        &mut self,
        tier: SpeedTier,
        scheduler: &mut SchedulerControl<T>,
    ) -> SpeedReport {
        let was_running = scheduler.halt();
        let previous_wait_states = self.hw.flash_wait_states();

        self.park_on_internal();

        let oscillator = self.start_oscillator();
        let mut degraded = oscillator == OscillatorSource::Internal;
        let mut applied = tier;
        let mut target_mhz = tier.frequency_mhz(oscillator);

        let target_source = if self.prepare_regulator(target_mhz) {
            match tier.pll_config(oscillator) {
                Some(pll) => {
                    self.hw.configure_pll(pll);
                    self.hw.enable_pll();
                    if poll_until(PLL_LOCK_POLLS, || self.hw.pll_ready()) {
                        SystemClockSource::Pll
                    } else {
                        self.hw.disable_pll();
                        degraded = true;
                        SystemClockSource::Internal
                    }
                }
                None => match oscillator {
                    OscillatorSource::External => SystemClockSource::External,
                    OscillatorSource::Internal => SystemClockSource::Internal,
                },
            }
        } else {
            degraded = true;
            SystemClockSource::Internal
        };

        if target_source == SystemClockSource::Internal {
            applied = SpeedTier::OscillatorOnly;
            target_mhz = INTERNAL_OSC_MHZ;
        }

        self.switch_clock(target_source, target_mhz, previous_wait_states);

        let source = match target_source {
            SystemClockSource::Internal => OscillatorSource::Internal,
            SystemClockSource::External | SystemClockSource::Pll => oscillator,
        };
        if source == OscillatorSource::Internal {
            self.hw.stop_external_oscillator();
        }

        self.config = ClockConfig {
            tier: applied,
            source,
            forced: false,
        };
        self.frequency_mhz = target_mhz;

        scheduler.retune(self.cpu_hz());
        if was_running {
            scheduler.resume();
        }

        SpeedReport {
            tier: applied,
            source,
            frequency_mhz: target_mhz,
            degraded,
            escalation_denied: false,
        }
    }

    fn park_on_internal(&mut self) {
        if self.hw.system_clock_source() != SystemClockSource::Internal {
            self.hw.select_system_clock(SystemClockSource::Internal);
            // The mux switches within a few cycles of the RC oscillator.
            poll_until(PLL_LOCK_POLLS, || {
                self.hw.system_clock_source() == SystemClockSource::Internal
            });
        }
        self.hw.disable_pll();
    }

    fn start_oscillator(&mut self) -> OscillatorSource {
        self.hw.start_external_oscillator();
        if poll_until(OSC_STARTUP_POLLS, || self.hw.external_oscillator_ready()) {
            OscillatorSource::External
        } else {
            self.hw.stop_external_oscillator();
            OscillatorSource::Internal
        }
    }

    fn prepare_regulator(&mut self, target_mhz: u32) -> bool {
        self.hw.enable_power_interface();
        self.hw.set_voltage_scale(voltage_scale_for(target_mhz));
        poll_until(PLL_LOCK_POLLS, || self.hw.regulator_ready())
    }

    fn switch_clock(&mut self, target: SystemClockSource, target_mhz: u32, previous_ws: u8) {
        let target_ws = wait_states_for(target_mhz);
        let target_dividers = bus_dividers_for(target_mhz);

        if target_ws > self.hw.flash_wait_states() {
            self.hw.set_flash_wait_states(target_ws);
        }
        let current = self.hw.bus_dividers();
        self.hw.set_bus_dividers(BusDividers {
            apb1: current.apb1.max(target_dividers.apb1),
            apb2: current.apb2.max(target_dividers.apb2),
        });

        if self.hw.system_clock_source() != target {
            self.hw.select_system_clock(target);
            poll_until(PLL_LOCK_POLLS, || self.hw.system_clock_source() == target);
        }

        if target_ws < previous_ws.max(self.hw.flash_wait_states()) {
            self.hw.set_flash_wait_states(target_ws);
        }
        if self.hw.bus_dividers() != target_dividers {
            self.hw.set_bus_dividers(target_dividers);
        }
    }
}

/// Temporary speed boost used around backup-memory writes.
pub trait SpeedControl {
    /// Raises the clock to at least the save tier, returning the tier to
    /// restore afterwards, or `None` if no change was needed.
    fn boost(&mut self) -> Option<SpeedTier>;

    /// Restores a tier returned by [`SpeedControl::boost`].
    fn restore(&mut self, previous: SpeedTier);
}

/// [`SpeedControl`] over a clock manager and its scheduler.
pub struct SaveBoost<'a, H, T> {
    clock: &'a mut ClockManager<H>,
    scheduler: &'a mut SchedulerControl<T>,
    forced: bool,
}

impl<'a, H, T> SaveBoost<'a, H, T> {
    pub fn new(clock: &'a mut ClockManager<H>, scheduler: &'a mut SchedulerControl<T>) -> Self {
        Self {
            clock,
            scheduler,
            forced: false,
        }
    }
}

impl<H: ClockHardware, T: TickTimer> SpeedControl for SaveBoost<'_, H, T> {
    fn boost(&mut self) -> Option<SpeedTier> {
        let current = self.clock.config().tier;
        let save = self.clock.policy().save;
        if current >= save {
            return None;
        }
        self.forced = self.clock.config.forced;
        let _ = self.clock.set_speed(save, self.scheduler);
        Some(current)
    }

    fn restore(&mut self, previous: SpeedTier) {
        let _ = self.clock.set_speed(previous, self.scheduler);
        self.clock.config.forced = self.forced;
    }
}

fn poll_until(limit: u32, mut ready: impl FnMut() -> bool) -> bool {
    (0..limit).any(|_| ready())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_states_follow_thirty_mhz_steps() {
        assert_eq!(wait_states_for(16), 0);
        assert_eq!(wait_states_for(30), 0);
        assert_eq!(wait_states_for(32), 1);
        assert_eq!(wait_states_for(168), 5);
        assert_eq!(wait_states_for(216), 7);
    }

    #[test]
    fn pll_settings_keep_vco_in_range() {
        for tier in SpeedTier::ALL {
            let Some(pll) = tier.pll_config(OscillatorSource::External) else {
                continue;
            };
            let vco = u32::from(pll.n);
            assert!((VCO_MIN_MHZ..=432).contains(&vco));
            assert_eq!(vco / u32::from(pll.p), tier.pll_mhz().unwrap_or_default());
            assert_eq!(pll.m, 8);
            assert!(pll.q >= 2 && pll.q <= 15);
        }
    }

    #[test]
    fn internal_source_divides_to_same_pll_input() {
        let pll = SpeedTier::Mhz168
            .pll_config(OscillatorSource::Internal)
            .expect("pll tier");
        assert_eq!(pll.m, 16);
        assert_eq!(pll.n, 336);
        assert_eq!(pll.p, 2);
        assert_eq!(pll.q, 7);
    }

    #[test]
    fn overclock_starts_above_nominal() {
        assert!(!SpeedTier::Mhz168.is_overclock());
        assert!(SpeedTier::Mhz192.is_overclock());
        assert!(SpeedTier::Mhz216.is_overclock());
        assert!(!SpeedTier::OscillatorOnly.is_overclock());
    }

    #[test]
    fn usb_compatible_skips_inexact_tiers() {
        assert_eq!(SpeedTier::Mhz64.usb_compatible(), SpeedTier::Mhz96);
        assert_eq!(SpeedTier::OscillatorOnly.usb_compatible(), SpeedTier::Mhz32);
        assert_eq!(SpeedTier::Mhz168.usb_compatible(), SpeedTier::Mhz168);
    }

    #[test]
    fn bus_dividers_stay_within_rating() {
        for tier in SpeedTier::ALL {
            let mhz = tier.frequency_mhz(OscillatorSource::External);
            let dividers = bus_dividers_for(mhz);
            assert!(mhz / u32::from(dividers.apb1) <= APB1_MAX_MHZ);
            assert!(mhz / u32::from(dividers.apb2) <= APB2_MAX_MHZ);
        }
    }

    #[test]
    fn tier_codes_round_trip() {
        for tier in SpeedTier::ALL {
            assert_eq!(SpeedTier::from_code(tier.code()), Some(tier));
        }
        assert_eq!(SpeedTier::from_code(9), None);
    }

    #[test]
    fn tick_reload_matches_one_millisecond() {
        assert_eq!(tick_reload(168_000_000, 1_000), 167_999);
        assert_eq!(tick_reload(16_000_000, 100), 159_999);
    }
}
