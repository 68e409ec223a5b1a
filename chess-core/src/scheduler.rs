//! Periodic tick dispatch and the state it shares with the main program.
//!
//! [`TickContext`] is owned by the tick interrupt; [`SharedState`] and the
//! split [`KeyQueue`](crate::keyboard::KeyQueue) are the only things both
//! contexts touch. Every field of `SharedState` has a single writer: the
//! interrupt publishes time, battery level and the GO/POS flags, the main
//! program publishes the input mode, beep requests and the dying flag.
//! Multi-field writes from main (setting the clock) go through
//! [`SchedulerControl::pause`].

use core::cell::Cell;

use critical_section::Mutex;
use portable_atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};

use crate::battery::{BatteryMonitor, BatteryStatus};
use crate::clock::tick_reload;
use crate::config::{
    DYING_TICK_HZ, DYING_TICK_MS, SESSION_CLOCK_CEILING_MS, SLOW_TICK_DIVIDER, TICK_HZ,
};
use crate::hal::{BatteryAdc, KeyMatrix, SignalOutputs, TickTimer};
use crate::keyboard::{InputMode, InputModeCell, KeyAction, KeyProducer, KeyScanner, route_key};
use crate::signals::Signals;

/// Callback run once when the battery enters the shutdown state.
pub type ShutdownCallback = fn();

/// State shared between the tick interrupt and the main program.
pub struct SharedState {
    system_time_ms: AtomicU32,
    clock_ceiling_ms: AtomicU32,
    input_mode: InputModeCell,
    force_move: AtomicBool,
    display_toggle: AtomicBool,
    battery_status: AtomicU8,
    battery_sum: AtomicU32,
    entropy: AtomicU32,
    beep_request: AtomicU16,
    dying: AtomicBool,
    shutdown_pending: AtomicBool,
    shutdown_callback: Mutex<Cell<Option<ShutdownCallback>>>,
}

impl SharedState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            system_time_ms: AtomicU32::new(0),
            clock_ceiling_ms: AtomicU32::new(SESSION_CLOCK_CEILING_MS),
            input_mode: InputModeCell::new(InputMode::User),
            force_move: AtomicBool::new(false),
            display_toggle: AtomicBool::new(false),
            battery_status: AtomicU8::new(BatteryStatus::HIGH.bits()),
            battery_sum: AtomicU32::new(0),
            entropy: AtomicU32::new(0),
            beep_request: AtomicU16::new(0),
            dying: AtomicBool::new(false),
            shutdown_pending: AtomicBool::new(false),
            shutdown_callback: Mutex::new(Cell::new(None)),
        }
    }

    #[must_use]
    pub fn system_time_ms(&self) -> u32 {
        self.system_time_ms.load(Ordering::Acquire)
    }

    /// Overwrites the session clock. Call with the scheduler paused.
    pub fn set_system_time_ms(&self, ms: u32) {
        let ceiling = self.clock_ceiling_ms.load(Ordering::Relaxed);
        self.system_time_ms.store(ms.min(ceiling), Ordering::Release);
    }

    pub fn set_clock_ceiling_ms(&self, ceiling: u32) {
        self.clock_ceiling_ms.store(ceiling, Ordering::Relaxed);
    }

    /// Interrupt side: advances the session clock, saturating at the ceiling.
    pub fn advance_time(&self, ms: u32) {
        let ceiling = self.clock_ceiling_ms.load(Ordering::Relaxed);
        let now = self.system_time_ms.load(Ordering::Relaxed);
        let next = now.saturating_add(ms).min(ceiling);
        self.system_time_ms.store(next, Ordering::Release);
    }

    #[must_use]
    pub fn input_mode(&self) -> InputMode {
        self.input_mode.get()
    }

    pub fn set_input_mode(&self, mode: InputMode) {
        self.input_mode.set(mode);
    }

    #[must_use]
    pub fn take_force_move(&self) -> bool {
        self.force_move.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn take_display_toggle(&self) -> bool {
        self.display_toggle.swap(false, Ordering::AcqRel)
    }

    #[must_use]
    pub fn battery_status(&self) -> BatteryStatus {
        BatteryStatus::from_bits(self.battery_status.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn battery_sum(&self) -> u32 {
        self.battery_sum.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn entropy(&self) -> u32 {
        self.entropy.load(Ordering::Acquire)
    }

    fn publish_battery(&self, monitor: &BatteryMonitor) {
        self.battery_sum.store(monitor.sum(), Ordering::Release);
        self.entropy.store(monitor.entropy(), Ordering::Release);
        self.battery_status
            .store(monitor.status().bits(), Ordering::Release);
    }

    /// Main side: asks the tick handler to sound the buzzer.
    pub fn request_beep(&self, duration_ms: u16) {
        self.beep_request.fetch_max(duration_ms, Ordering::AcqRel);
    }

    fn take_beep_request(&self) -> u16 {
        self.beep_request.swap(0, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    pub fn set_dying(&self) {
        self.dying.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn shutdown_pending(&self) -> bool {
        self.shutdown_pending.load(Ordering::Acquire)
    }

    /// Installs (or with `None`, clears) the battery shutdown callback.
    pub fn register_shutdown_callback(&self, callback: Option<ShutdownCallback>) {
        critical_section::with(|cs| self.shutdown_callback.borrow(cs).set(callback));
    }

    /// Flags the shutdown and runs the registered callback at most once.
    ///
    /// The slot is emptied before the call so a shutdown already in progress
    /// cannot be entered again.
    pub fn trigger_shutdown(&self) {
        self.shutdown_pending.store(true, Ordering::Release);
        let callback = critical_section::with(|cs| self.shutdown_callback.borrow(cs).take());
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the tick interrupt owns.
pub struct TickContext<'a, M, A, S> {
    shared: &'a SharedState,
    keys: KeyProducer<'a>,
    matrix: M,
    adc: A,
    outputs: S,
    scanner: KeyScanner,
    battery: BatteryMonitor,
    signals: Signals,
    slow_divider: u8,
}

impl<'a, M, A, S> TickContext<'a, M, A, S>
where
    M: KeyMatrix,
    A: BatteryAdc,
    S: SignalOutputs,
{
    #[must_use]
    pub fn new(
        shared: &'a SharedState,
        keys: KeyProducer<'a>,
        matrix: M,
        adc: A,
        outputs: S,
        scanner: KeyScanner,
        battery: BatteryMonitor,
    ) -> Self {
        shared.publish_battery(&battery);
        Self {
            shared,
            keys,
            matrix,
            adc,
            outputs,
            scanner,
            battery,
            signals: Signals::new(),
            slow_divider: 0,
        }
    }

    /// Runs one tick of the dispatch table.
    pub fn on_tick(&mut self) {
        if self.shared.is_dying() {
            // One dying tick spans a whole battery period.
            self.slow_tick();
            self.shared.advance_time(DYING_TICK_MS);
            return;
        }

        let beep = self.shared.take_beep_request();
        if beep > 0 {
            self.signals.beep(beep);
        }
        self.signals.fast_tick(&mut self.outputs);

        self.slow_divider += 1;
        if self.slow_divider >= SLOW_TICK_DIVIDER {
            self.slow_tick();
            self.slow_divider = 0;
        }

        self.shared.advance_time(1);

        let scan = self.scanner.scan(&mut self.matrix);
        if scan.light {
            self.signals.toggle_backlight(&mut self.outputs);
        }
        if let Some(key) = scan.pressed {
            let action = route_key(key, self.shared.input_mode(), &mut self.keys);
            self.dispatch_key(action);
        }

        self.signals.heartbeat(&mut self.outputs);
    }

    fn slow_tick(&mut self) {
        let outcome = self.battery.sample_adc(&mut self.adc);
        self.shared.publish_battery(&self.battery);
        if outcome.entered_shutdown {
            self.shared.trigger_shutdown();
        }
        self.signals.slow_tick(&mut self.outputs);
    }

    fn dispatch_key(&mut self, action: KeyAction) {
        match action {
            KeyAction::Queued | KeyAction::Dropped => {
                self.signals.key_click();
                self.signals.wake_backlight(&mut self.outputs);
            }
            KeyAction::ForceMove => self.shared.force_move.store(true, Ordering::Release),
            KeyAction::ToggleDisplay => {
                self.shared.display_toggle.store(true, Ordering::Release);
            }
            KeyAction::Ignored => {}
        }
    }

    #[must_use]
    pub fn battery(&self) -> &BatteryMonitor {
        &self.battery
    }

    #[must_use]
    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn matrix_mut(&mut self) -> &mut M {
        &mut self.matrix
    }

    pub fn adc_mut(&mut self) -> &mut A {
        &mut self.adc
    }

    #[must_use]
    pub fn outputs(&self) -> &S {
        &self.outputs
    }
}

/// Main-program handle on the tick timer.
pub struct SchedulerControl<T> {
    timer: T,
    tick_hz: u32,
    reload: u32,
    running: bool,
}

impl<T: TickTimer> SchedulerControl<T> {
    /// Wraps a stopped timer; the reload is derived from `cpu_hz`.
    #[must_use]
    pub fn new(timer: T, cpu_hz: u32) -> Self {
        Self {
            timer,
            tick_hz: TICK_HZ,
            reload: tick_reload(cpu_hz, TICK_HZ),
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.timer.start(self.reload);
        self.running = true;
    }

    /// Stops the timer and discards a latched tick; returns whether it was
    /// running.
    pub fn halt(&mut self) -> bool {
        let was_running = self.running;
        self.timer.stop();
        self.timer.clear_pending();
        self.running = false;
        was_running
    }

    pub fn resume(&mut self) {
        self.start();
    }

    /// Recomputes the reload for a new core frequency. Takes effect on the
    /// next start.
    pub fn retune(&mut self, cpu_hz: u32) {
        self.reload = tick_reload(cpu_hz, self.tick_hz);
    }

    /// Stops the tick until the returned guard is dropped.
    pub fn pause(&mut self) -> PauseGuard<'_, T> {
        let resume = self.halt();
        PauseGuard {
            control: self,
            resume,
        }
    }

    /// Switches to the coarse dying cadence. Takes effect on the next start.
    pub fn enter_dying(&mut self, cpu_hz: u32) {
        self.tick_hz = DYING_TICK_HZ;
        self.retune(cpu_hz);
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[must_use]
    pub fn reload(&self) -> u32 {
        self.reload
    }

    #[must_use]
    pub fn tick_hz(&self) -> u32 {
        self.tick_hz
    }

    #[must_use]
    pub fn timer(&self) -> &T {
        &self.timer
    }
}

/// Keeps the tick stopped; restarts it on drop if it was running.
#[must_use = "the scheduler resumes as soon as the guard is dropped"]
pub struct PauseGuard<'a, T: TickTimer> {
    control: &'a mut SchedulerControl<T>,
    resume: bool,
}

impl<T: TickTimer> Drop for PauseGuard<'_, T> {
    fn drop(&mut self) {
        if self.resume {
            self.control.resume();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Timer {
        running: bool,
        pending: bool,
        reload: u32,
    }

    impl TickTimer for Timer {
        fn stop(&mut self) {
            self.running = false;
        }

        fn clear_pending(&mut self) {
            self.pending = false;
        }

        fn start(&mut self, reload: u32) {
            self.running = true;
            self.reload = reload;
        }
    }

    #[test]
    fn pause_clears_latched_tick_and_resumes() {
        let mut control = SchedulerControl::new(Timer::default(), 168_000_000);
        control.start();
        control.timer.pending = true;
        {
            let _guard = control.pause();
        }
        assert!(control.is_running());
        assert!(!control.timer().pending);
        assert_eq!(control.timer().reload, 167_999);
    }

    #[test]
    fn pause_does_not_start_a_stopped_timer() {
        let mut control = SchedulerControl::new(Timer::default(), 16_000_000);
        drop(control.pause());
        assert!(!control.is_running());
        assert!(!control.timer().running);
    }

    #[test]
    fn dying_uses_ten_millisecond_period() {
        let mut control = SchedulerControl::new(Timer::default(), 16_000_000);
        control.enter_dying(8_000_000);
        assert_eq!(control.tick_hz(), DYING_TICK_HZ);
        assert_eq!(control.reload(), 79_999);
    }

    #[test]
    fn session_clock_saturates_at_ceiling() {
        let shared = SharedState::new();
        shared.set_clock_ceiling_ms(100);
        shared.set_system_time_ms(95);
        for _ in 0..10 {
            shared.advance_time(1);
        }
        assert_eq!(shared.system_time_ms(), 100);
    }

    #[test]
    fn beep_requests_keep_the_longest() {
        let shared = SharedState::new();
        shared.request_beep(50);
        shared.request_beep(20);
        assert_eq!(shared.take_beep_request(), 50);
        assert_eq!(shared.take_beep_request(), 0);
    }
}
