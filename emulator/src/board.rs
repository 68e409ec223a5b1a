//! Host model of the board peripherals.
//!
//! All handles share one [`BoardState`] so the session can poke at the
//! "hardware" (hold a key, sag the battery, break the crystal) while the
//! coordination layer owns the handles. Backup memory and the retained
//! register live here too, so they survive emulated resets.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use chess_core::clock::oscillator_mhz;
use chess_core::fault::{DiagnosticLine, FaultIo};
use chess_core::hal::{
    BackupMemory, BatteryAdc, BusDividers, Clock, ClockHardware, Idle, Instant, KeyMatrix,
    OscillatorSource, PllConfig, RetainedRegister, SignalOutputs, SystemClockSource, TickTimer,
    VoltageScale, WatchdogHardware,
};
use chess_core::keyboard::{Key, LAYOUT};
use chess_core::persist::BACKUP_CAPACITY;
use chess_core::system::Platform;
use chess_core::watchdog::STEP_MS;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LineDrive {
    Columns,
    Rows,
    EnterOnly,
}

pub struct BoardState {
    // keypad
    held: Cell<Option<Key>>,
    drive: Cell<LineDrive>,
    // analog
    battery_raw: Cell<u16>,
    // clock tree
    crystal_ok: Cell<bool>,
    external_on: Cell<bool>,
    pll_on: Cell<bool>,
    pll: Cell<Option<PllConfig>>,
    source: Cell<SystemClockSource>,
    wait_states: Cell<u8>,
    dividers: Cell<BusDividers>,
    scale: Cell<VoltageScale>,
    // tick timer
    tick_reload: Cell<Option<u32>>,
    // watchdog
    watchdog_running: Cell<bool>,
    watchdog_reload: Cell<u16>,
    watchdog_remaining_ms: Cell<u32>,
    // outputs
    buzzer: Cell<bool>,
    backlight: Cell<bool>,
    heartbeat: Cell<bool>,
    fault_led: Cell<bool>,
    diagnostic: RefCell<Vec<String>>,
    // battery-backed
    backup: RefCell<Vec<u8>>,
    retained: Cell<u32>,
    // busy-wait clock
    micros: Cell<u64>,
}

impl BoardState {
    pub fn new(battery_raw: u16) -> Rc<Self> {
        Rc::new(Self {
            held: Cell::new(None),
            drive: Cell::new(LineDrive::Columns),
            battery_raw: Cell::new(battery_raw),
            crystal_ok: Cell::new(true),
            external_on: Cell::new(false),
            pll_on: Cell::new(false),
            pll: Cell::new(None),
            source: Cell::new(SystemClockSource::Internal),
            wait_states: Cell::new(0),
            dividers: Cell::new(BusDividers { apb1: 1, apb2: 1 }),
            scale: Cell::new(VoltageScale::Scale1),
            tick_reload: Cell::new(None),
            watchdog_running: Cell::new(false),
            watchdog_reload: Cell::new(0),
            watchdog_remaining_ms: Cell::new(0),
            buzzer: Cell::new(false),
            backlight: Cell::new(false),
            heartbeat: Cell::new(false),
            fault_led: Cell::new(false),
            diagnostic: RefCell::new(Vec::new()),
            backup: RefCell::new(vec![0; BACKUP_CAPACITY]),
            retained: Cell::new(0),
            micros: Cell::new(0),
        })
    }

    /// Puts every volatile register back to its reset value. Battery-backed
    /// storage and the outside world are untouched.
    pub fn reset_peripherals(&self) {
        self.drive.set(LineDrive::Columns);
        self.external_on.set(false);
        self.pll_on.set(false);
        self.pll.set(None);
        self.source.set(SystemClockSource::Internal);
        self.wait_states.set(0);
        self.dividers.set(BusDividers { apb1: 1, apb2: 1 });
        self.scale.set(VoltageScale::Scale1);
        self.tick_reload.set(None);
        self.watchdog_running.set(false);
        self.buzzer.set(false);
        self.backlight.set(false);
        self.heartbeat.set(false);
        self.fault_led.set(false);
        self.diagnostic.borrow_mut().clear();
    }

    pub fn hold(&self, key: Option<Key>) {
        self.held.set(key);
    }

    pub fn set_battery_raw(&self, raw: u16) {
        self.battery_raw.set(raw);
    }

    pub fn battery_raw(&self) -> u16 {
        self.battery_raw.get()
    }

    pub fn set_crystal_ok(&self, ok: bool) {
        self.crystal_ok.set(ok);
    }

    pub fn crystal_ok(&self) -> bool {
        self.crystal_ok.get()
    }

    /// Core frequency implied by the clock mux and PLL settings.
    pub fn core_mhz(&self) -> u32 {
        match self.source.get() {
            SystemClockSource::Internal => oscillator_mhz(OscillatorSource::Internal),
            SystemClockSource::External => oscillator_mhz(OscillatorSource::External),
            SystemClockSource::Pll => self.pll.get().map_or(0, |pll| {
                oscillator_mhz(pll.source) / u32::from(pll.m) * u32::from(pll.n)
                    / u32::from(pll.p)
            }),
        }
    }

    pub fn wait_states(&self) -> u8 {
        self.wait_states.get()
    }

    pub fn tick_reload(&self) -> Option<u32> {
        self.tick_reload.get()
    }

    pub fn backlight(&self) -> bool {
        self.backlight.get()
    }

    pub fn buzzer(&self) -> bool {
        self.buzzer.get()
    }

    pub fn fault_led(&self) -> bool {
        self.fault_led.get()
    }

    pub fn diagnostic(&self) -> Vec<String> {
        self.diagnostic.borrow().clone()
    }

    /// Flips one bit of backup memory.
    pub fn corrupt_backup(&self, offset: usize, bit: u8) -> bool {
        let mut backup = self.backup.borrow_mut();
        match backup.get_mut(offset) {
            Some(byte) => {
                *byte ^= 1 << (bit & 7);
                true
            }
            None => false,
        }
    }

    /// Counts the watchdog down by `ms`. Returns `true` once it expires.
    pub fn run_watchdog(&self, ms: u32) -> bool {
        if !self.watchdog_running.get() {
            return false;
        }
        let remaining = self.watchdog_remaining_ms.get().saturating_sub(ms);
        self.watchdog_remaining_ms.set(remaining);
        remaining == 0
    }

    pub fn watchdog_remaining_ms(&self) -> Option<u32> {
        self.watchdog_running
            .get()
            .then(|| self.watchdog_remaining_ms.get())
    }

    fn reload_watchdog(&self) {
        self.watchdog_remaining_ms
            .set(u32::from(self.watchdog_reload.get()) * STEP_MS);
    }

    fn line_of(key: Key) -> Option<(usize, usize)> {
        LAYOUT.iter().enumerate().find_map(|(row, keys)| {
            keys.iter()
                .position(|&candidate| candidate == key)
                .map(|col| (row, col))
        })
    }
}

pub struct HostPlatform;

impl Platform for HostPlatform {
    type Clock = ClockTree;
    type Timer = HostTimer;
    type Watchdog = HostWatchdog;
    type Backup = HostBackup;
    type Idle = HostIdle;
}

macro_rules! board_handle {
    ($($name:ident),* $(,)?) => {
        $(
            pub struct $name(pub Rc<BoardState>);
        )*
    };
}

board_handle!(
    ClockTree,
    HostTimer,
    HostWatchdog,
    HostBackup,
    HostIdle,
    HostMatrix,
    HostAdc,
    HostOutputs,
    HostRetained,
    HostClock,
);

impl ClockHardware for ClockTree {
    fn enable_power_interface(&mut self) {}

    fn set_voltage_scale(&mut self, scale: VoltageScale) {
        self.0.scale.set(scale);
    }

    fn regulator_ready(&self) -> bool {
        true
    }

    fn flash_wait_states(&self) -> u8 {
        self.0.wait_states.get()
    }

    fn set_flash_wait_states(&mut self, wait_states: u8) {
        self.0.wait_states.set(wait_states);
    }

    fn start_external_oscillator(&mut self) {
        self.0.external_on.set(true);
    }

    fn stop_external_oscillator(&mut self) {
        self.0.external_on.set(false);
    }

    fn external_oscillator_ready(&self) -> bool {
        self.0.external_on.get() && self.0.crystal_ok.get()
    }

    fn select_system_clock(&mut self, source: SystemClockSource) {
        self.0.source.set(source);
    }

    fn system_clock_source(&self) -> SystemClockSource {
        self.0.source.get()
    }

    fn disable_pll(&mut self) {
        self.0.pll_on.set(false);
    }

    fn configure_pll(&mut self, config: PllConfig) {
        self.0.pll.set(Some(config));
    }

    fn enable_pll(&mut self) {
        self.0.pll_on.set(true);
    }

    fn pll_ready(&self) -> bool {
        let state = &self.0;
        state.pll_on.get()
            && state.pll.get().is_some_and(|pll| {
                pll.source == OscillatorSource::Internal || self.external_oscillator_ready()
            })
    }

    fn bus_dividers(&self) -> BusDividers {
        self.0.dividers.get()
    }

    fn set_bus_dividers(&mut self, dividers: BusDividers) {
        self.0.dividers.set(dividers);
    }
}

impl TickTimer for HostTimer {
    fn stop(&mut self) {
        self.0.tick_reload.set(None);
    }

    fn clear_pending(&mut self) {}

    fn start(&mut self, reload: u32) {
        self.0.tick_reload.set(Some(reload));
    }
}

impl WatchdogHardware for HostWatchdog {
    fn start(&mut self) {
        if !self.0.watchdog_running.get() {
            self.0.watchdog_running.set(true);
            self.0.reload_watchdog();
        }
    }

    fn unlock(&mut self) {}

    fn write_prescaler(&mut self, _code: u8) {}

    fn write_reload(&mut self, reload: u16) {
        self.0.watchdog_reload.set(reload);
    }

    fn update_pending(&self) -> bool {
        false
    }

    fn feed(&mut self) {
        self.0.reload_watchdog();
    }
}

impl BackupMemory for HostBackup {
    fn capacity(&self) -> usize {
        BACKUP_CAPACITY
    }

    fn read(&self, offset: usize, buf: &mut [u8]) {
        let backup = self.0.backup.borrow();
        buf.copy_from_slice(&backup[offset..offset + buf.len()]);
    }

    fn write(&mut self, offset: usize, data: &[u8]) {
        let mut backup = self.0.backup.borrow_mut();
        backup[offset..offset + data.len()].copy_from_slice(data);
    }
}

impl Idle for HostIdle {
    fn wait_for_interrupt(&mut self) {}
}

impl KeyMatrix for HostMatrix {
    fn drive_columns_low(&mut self) {
        self.0.drive.set(LineDrive::Columns);
    }

    fn read_rows(&self) -> u8 {
        match self.0.held.get().and_then(BoardState::line_of) {
            Some((row, _)) if self.0.drive.get() == LineDrive::Columns => 1 << row,
            _ => 0,
        }
    }

    fn drive_rows_low(&mut self) {
        self.0.drive.set(LineDrive::Rows);
    }

    fn read_columns(&self) -> u8 {
        match self.0.held.get().and_then(BoardState::line_of) {
            Some((_, col)) if self.0.drive.get() == LineDrive::Rows => 1 << col,
            _ => 0,
        }
    }

    fn light_button_asserted(&self) -> bool {
        self.0.held.get() == Some(Key::Light)
    }

    fn configure_enter_only(&mut self) {
        self.0.drive.set(LineDrive::EnterOnly);
    }

    fn enter_asserted(&self) -> bool {
        self.0.drive.get() == LineDrive::EnterOnly && self.0.held.get() == Some(Key::Enter)
    }
}

impl BatteryAdc for HostAdc {
    fn read_last(&mut self) -> u16 {
        self.0.battery_raw.get()
    }

    fn start_conversion(&mut self) {}
}

impl SignalOutputs for HostOutputs {
    fn set_buzzer(&mut self, on: bool) {
        self.0.buzzer.set(on);
    }

    fn set_backlight(&mut self, on: bool) {
        self.0.backlight.set(on);
    }

    fn set_heartbeat(&mut self, on: bool) {
        self.0.heartbeat.set(on);
    }
}

impl FaultIo for HostOutputs {
    fn set_fault_led(&mut self, on: bool) {
        self.0.fault_led.set(on);
    }

    fn show_diagnostic(&mut self, lines: &[DiagnosticLine]) {
        *self.0.diagnostic.borrow_mut() = lines.iter().map(|line| line.to_string()).collect();
    }
}

impl RetainedRegister for HostRetained {
    fn read(&self) -> u32 {
        self.0.retained.get()
    }

    fn write(&mut self, value: u32) {
        self.0.retained.set(value);
    }
}

/// Busy waits complete instantly; each wait moves the clock forward.
impl Clock for HostClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.0.micros.get())
    }

    fn busy_wait(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.0.micros.set(self.0.micros.get().saturating_add(micros));
    }
}
