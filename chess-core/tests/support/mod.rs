//! Simulated peripherals shared by the integration suites.
#![allow(dead_code)]

use core::cell::Cell;
use core::time::Duration;

use chess_core::clock::{
    APB1_MAX_MHZ, APB2_MAX_MHZ, oscillator_mhz, voltage_scale_for, wait_states_for,
};
use chess_core::hal::{
    BackupMemory, BatteryAdc, BusDividers, Clock, ClockHardware, Idle, Instant, KeyMatrix,
    OscillatorSource, PllConfig, RetainedRegister, SignalOutputs, SystemClockSource, TickTimer,
    VoltageScale, WatchdogHardware,
};
use chess_core::system::Platform;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ClockOp {
    PowerInterface,
    Scale(VoltageScale),
    WaitStates(u8),
    ExternalOn,
    ExternalOff,
    Select(SystemClockSource),
    PllOff,
    PllConfigure(PllConfig),
    PllOn,
    Dividers(BusDividers),
}

/// Clock tree model that records every register operation and counts
/// configurations that would fault real silicon.
pub struct SimClock {
    pub ops: Vec<ClockOp>,
    pub crystal_fails: bool,
    pub pll_fails: bool,
    pub violations: u32,
    source: SystemClockSource,
    external_on: bool,
    pll_on: bool,
    pll: Option<PllConfig>,
    wait_states: u8,
    scale: VoltageScale,
    dividers: BusDividers,
}

impl Default for SimClock {
    fn default() -> Self {
        Self {
            ops: Vec::new(),
            crystal_fails: false,
            pll_fails: false,
            violations: 0,
            source: SystemClockSource::Internal,
            external_on: false,
            pll_on: false,
            pll: None,
            wait_states: 0,
            scale: VoltageScale::Scale2,
            dividers: BusDividers { apb1: 1, apb2: 1 },
        }
    }
}

impl SimClock {
    pub fn failing_crystal() -> Self {
        Self {
            crystal_fails: true,
            ..Self::default()
        }
    }

    /// Current core frequency as the hardware would run it.
    pub fn core_mhz(&self) -> u32 {
        match self.source {
            SystemClockSource::Internal => oscillator_mhz(OscillatorSource::Internal),
            SystemClockSource::External => oscillator_mhz(OscillatorSource::External),
            SystemClockSource::Pll => self.pll_output_mhz(),
        }
    }

    fn pll_output_mhz(&self) -> u32 {
        self.pll.map_or(0, |pll| {
            oscillator_mhz(pll.source) / u32::from(pll.m) * u32::from(pll.n) / u32::from(pll.p)
        })
    }

    fn check(&mut self) {
        let mhz = self.core_mhz();
        let scale_ok = self.scale == VoltageScale::Scale1 || voltage_scale_for(mhz) == self.scale;
        if self.wait_states < wait_states_for(mhz)
            || !scale_ok
            || mhz / u32::from(self.dividers.apb1) > APB1_MAX_MHZ
            || mhz / u32::from(self.dividers.apb2) > APB2_MAX_MHZ
        {
            self.violations += 1;
        }
    }

    pub fn selects(&self) -> Vec<SystemClockSource> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                ClockOp::Select(source) => Some(*source),
                _ => None,
            })
            .collect()
    }
}

impl ClockHardware for SimClock {
    fn enable_power_interface(&mut self) {
        self.ops.push(ClockOp::PowerInterface);
    }

    fn set_voltage_scale(&mut self, scale: VoltageScale) {
        self.ops.push(ClockOp::Scale(scale));
        self.scale = scale;
        self.check();
    }

    fn regulator_ready(&self) -> bool {
        true
    }

    fn flash_wait_states(&self) -> u8 {
        self.wait_states
    }

    fn set_flash_wait_states(&mut self, wait_states: u8) {
        self.ops.push(ClockOp::WaitStates(wait_states));
        self.wait_states = wait_states;
        self.check();
    }

    fn start_external_oscillator(&mut self) {
        self.ops.push(ClockOp::ExternalOn);
        self.external_on = true;
    }

    fn stop_external_oscillator(&mut self) {
        self.ops.push(ClockOp::ExternalOff);
        self.external_on = false;
    }

    fn external_oscillator_ready(&self) -> bool {
        self.external_on && !self.crystal_fails
    }

    fn select_system_clock(&mut self, source: SystemClockSource) {
        self.ops.push(ClockOp::Select(source));
        self.source = source;
        self.check();
    }

    fn system_clock_source(&self) -> SystemClockSource {
        self.source
    }

    fn disable_pll(&mut self) {
        self.ops.push(ClockOp::PllOff);
        self.pll_on = false;
    }

    fn configure_pll(&mut self, config: PllConfig) {
        assert!(!self.pll_on, "PLL reprogrammed while running");
        self.ops.push(ClockOp::PllConfigure(config));
        self.pll = Some(config);
    }

    fn enable_pll(&mut self) {
        self.ops.push(ClockOp::PllOn);
        self.pll_on = true;
    }

    fn pll_ready(&self) -> bool {
        self.pll_on && !self.pll_fails
    }

    fn bus_dividers(&self) -> BusDividers {
        self.dividers
    }

    fn set_bus_dividers(&mut self, dividers: BusDividers) {
        self.ops.push(ClockOp::Dividers(dividers));
        self.dividers = dividers;
        self.check();
    }
}

#[derive(Default)]
pub struct SimTimer {
    pub running: bool,
    pub pending: bool,
    pub reload: u32,
    pub starts: u32,
}

impl TickTimer for SimTimer {
    fn stop(&mut self) {
        self.running = false;
    }

    fn clear_pending(&mut self) {
        self.pending = false;
    }

    fn start(&mut self, reload: u32) {
        self.running = true;
        self.reload = reload;
        self.starts += 1;
    }
}

#[derive(Default)]
pub struct SimWatchdog {
    pub started: bool,
    pub reload: u16,
    pub feeds: u32,
}

impl WatchdogHardware for SimWatchdog {
    fn start(&mut self) {
        self.started = true;
    }

    fn unlock(&mut self) {}

    fn write_prescaler(&mut self, _code: u8) {}

    fn write_reload(&mut self, reload: u16) {
        self.reload = reload;
    }

    fn update_pending(&self) -> bool {
        false
    }

    fn feed(&mut self) {
        self.feeds += 1;
    }
}

/// Backup SRAM with optional stuck-at-zero bits.
pub struct SimBackup {
    pub bytes: Vec<u8>,
    pub writes: u32,
    pub stuck_low: u8,
}

impl Default for SimBackup {
    fn default() -> Self {
        Self {
            bytes: vec![0; 4_096],
            writes: 0,
            stuck_low: 0,
        }
    }
}

impl BackupMemory for SimBackup {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.bytes[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        self.writes += 1;
        for (slot, byte) in self.bytes[offset..offset + data.len()].iter_mut().zip(data) {
            *slot = byte & !self.stuck_low;
        }
    }
}

#[derive(Default)]
pub struct SimIdle {
    pub sleeps: u32,
}

impl Idle for SimIdle {
    fn wait_for_interrupt(&mut self) {
        self.sleeps += 1;
    }
}

/// Keypad with at most one held key.
#[derive(Default)]
pub struct SimMatrix {
    pub held: Option<(u8, u8)>,
    pub light: bool,
    /// ENTER reads asserted once this many polls have passed.
    pub enter_after: Cell<u32>,
    pub enter_only: bool,
}

impl SimMatrix {
    pub fn press(&mut self, row: u8, col: u8) {
        self.held = Some((row, col));
    }

    pub fn release(&mut self) {
        self.held = None;
    }
}

impl KeyMatrix for SimMatrix {
    fn drive_columns_low(&mut self) {}

    fn read_rows(&self) -> u8 {
        self.held.map_or(0, |(row, _)| 1 << row)
    }

    fn drive_rows_low(&mut self) {}

    fn read_columns(&self) -> u8 {
        self.held.map_or(0, |(_, col)| 1 << col)
    }

    fn light_button_asserted(&self) -> bool {
        self.light
    }

    fn configure_enter_only(&mut self) {
        self.enter_only = true;
    }

    fn enter_asserted(&self) -> bool {
        let remaining = self.enter_after.get();
        self.enter_after.set(remaining.saturating_sub(1));
        remaining == 0
    }
}

pub struct SimAdc {
    pub value: u16,
    pub conversions: u32,
}

impl SimAdc {
    pub fn new(value: u16) -> Self {
        Self {
            value,
            conversions: 0,
        }
    }
}

impl BatteryAdc for SimAdc {
    fn read_last(&mut self) -> u16 {
        self.value
    }

    fn start_conversion(&mut self) {
        self.conversions += 1;
    }
}

#[derive(Default)]
pub struct SimOutputs {
    pub buzzer: bool,
    pub buzzer_edges: u32,
    pub backlight: bool,
    pub heartbeat: bool,
    pub fault_led: bool,
    pub diagnostic: Vec<String>,
}

impl SignalOutputs for SimOutputs {
    fn set_buzzer(&mut self, on: bool) {
        if on != self.buzzer {
            self.buzzer_edges += 1;
        }
        self.buzzer = on;
    }

    fn set_backlight(&mut self, on: bool) {
        self.backlight = on;
    }

    fn set_heartbeat(&mut self, on: bool) {
        self.heartbeat = on;
    }
}

impl chess_core::fault::FaultIo for SimOutputs {
    fn set_fault_led(&mut self, on: bool) {
        self.fault_led = on;
    }

    fn show_diagnostic(&mut self, lines: &[chess_core::fault::DiagnosticLine]) {
        self.diagnostic = lines.iter().map(|line| line.as_str().to_owned()).collect();
    }
}

#[derive(Default)]
pub struct SimRetained(pub u32);

impl RetainedRegister for SimRetained {
    fn read(&self) -> u32 {
        self.0
    }

    fn write(&mut self, value: u32) {
        self.0 = value;
    }
}

/// Time source that jumps forward on busy waits.
#[derive(Default)]
pub struct SimTime {
    pub micros: u64,
}

impl Clock for SimTime {
    fn now(&self) -> Instant {
        Instant::from_micros(self.micros)
    }

    fn busy_wait(&mut self, duration: Duration) {
        self.micros += u64::try_from(duration.as_micros()).unwrap();
    }
}

pub struct SimPlatform;

impl Platform for SimPlatform {
    type Clock = SimClock;
    type Timer = SimTimer;
    type Watchdog = SimWatchdog;
    type Backup = SimBackup;
    type Idle = SimIdle;
}
