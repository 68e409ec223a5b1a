//! Main-program facade over the coordination layer.
//!
//! [`HardwareContext`] owns every component the main program drives and
//! exposes the calls the game flow needs. The tick interrupt side lives in
//! [`crate::scheduler::TickContext`]; the two meet only in [`SharedState`].

use crate::battery::{self, BatteryStatus};
use crate::clock::{ClockManager, SaveBoost, SpeedMode, SpeedPermit, SpeedReport, SpeedTier};
use crate::config::SystemConfig;
use crate::diagnostics::{ResetCause, ResetFlags, take_reset_cause};
use crate::fault::{FaultHandler, FaultIo};
use crate::hal::{
    BackupMemory, Clock, ClockHardware, Idle, KeyMatrix, RetainedRegister, TickTimer,
    WatchdogHardware,
};
use crate::keyboard::{InputMode, Key, KeyConsumer};
use crate::persist::{
    BootRestore, LoadError, LoadedGame, PersistentGameState, PersistentStore, SaveError, SaveMode,
};
use crate::scheduler::{SchedulerControl, SharedState, ShutdownCallback};
use crate::watchdog::Watchdog;

/// Hardware a target provides to the main program.
pub trait Platform {
    type Clock: ClockHardware;
    type Timer: TickTimer;
    type Watchdog: WatchdogHardware;
    type Backup: BackupMemory;
    type Idle: Idle;
}

/// Summary of the boot sequence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootReport {
    pub reset_cause: ResetCause,
    pub restore: BootRestore,
    pub speed: SpeedReport,
    pub watchdog_timeout_ms: u32,
    /// Battery is good enough to start a new game.
    pub battery_ok: bool,
}

pub struct HardwareContext<'a, P: Platform> {
    shared: &'a SharedState,
    keys: KeyConsumer<'a>,
    clock: ClockManager<P::Clock>,
    scheduler: SchedulerControl<P::Timer>,
    watchdog: Watchdog<P::Watchdog>,
    store: PersistentStore<P::Backup>,
    idle: P::Idle,
    config: SystemConfig,
    user_interacted: bool,
}

impl<'a, P: Platform> HardwareContext<'a, P> {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shared: &'a SharedState,
        keys: KeyConsumer<'a>,
        clock: P::Clock,
        timer: P::Timer,
        watchdog: P::Watchdog,
        backup: P::Backup,
        idle: P::Idle,
        config: SystemConfig,
    ) -> Self {
        let clock = ClockManager::new(clock, config.clock);
        let scheduler = SchedulerControl::new(timer, clock.cpu_hz());
        Self {
            shared,
            keys,
            clock,
            scheduler,
            watchdog: Watchdog::new(watchdog),
            store: PersistentStore::new(backup),
            idle,
            config,
            user_interacted: false,
        }
    }

    /// Brings the system up: idle clock, watchdog, saved game, then the tick.
    pub fn boot<R: RetainedRegister>(&mut self, flags: ResetFlags, retained: &mut R) -> BootReport {
        let reset_cause = take_reset_cause(flags, retained);
        self.shared
            .set_clock_ceiling_ms(self.config.session_clock_ceiling_ms);

        let speed = self.clock.set_speed(self.config.clock.idle, &mut self.scheduler);
        let watchdog_timeout_ms = self.watchdog.arm(self.config.watchdog_timeout_ms);

        let restore = self.store.restore_at_boot();
        if let BootRestore::Restored(game) = &restore {
            self.apply_restored(game);
        }

        self.scheduler.start();
        BootReport {
            reset_cause,
            restore,
            speed,
            watchdog_timeout_ms,
            battery_ok: self.battery_allows_new_game(),
        }
    }

    fn apply_restored(&mut self, game: &LoadedGame) {
        self.clock.policy_mut().throttle = game.state.hardware.throttle;
        self.set_system_time_ms(game.state.timing.session_ms);
    }

    /// Returns the next key, if any.
    ///
    /// Feeds the watchdog. With `sleep_allowed`, an empty queue puts the core
    /// to sleep until the next interrupt and checks once more.
    pub fn read_key(&mut self, sleep_allowed: bool) -> Option<Key> {
        self.watchdog.retrigger();
        if let Some(key) = self.keys.dequeue() {
            self.user_interacted = true;
            return Some(key);
        }
        if !sleep_allowed {
            return None;
        }
        self.idle.wait_for_interrupt();
        let key = self.keys.dequeue();
        self.user_interacted |= key.is_some();
        key
    }

    /// Keys waiting for [`Self::read_key`].
    #[must_use]
    pub fn queued_keys(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn system_time_ms(&self) -> u32 {
        self.shared.system_time_ms()
    }

    pub fn set_system_time_ms(&mut self, ms: u32) {
        let _pause = self.scheduler.pause();
        self.shared.set_system_time_ms(ms);
    }

    /// Feeds the watchdog and reports whether `deadline_ms` has passed.
    pub fn time_budget_expired(&mut self, deadline_ms: u32) -> bool {
        self.watchdog.retrigger();
        self.shared.system_time_ms() >= deadline_ms
    }

    pub fn register_battery_shutdown_callback(&self, callback: Option<ShutdownCallback>) {
        self.shared.register_shutdown_callback(callback);
    }

    pub fn request_speed(&mut self, tier: SpeedTier, mode: SpeedMode) -> SpeedReport {
        let permit = SpeedPermit {
            battery_high: self.shared.battery_status().is_high(),
            user_interacted: self.user_interacted,
        };
        self.clock
            .request_speed(tier, mode, permit, &mut self.scheduler)
    }

    /// Changes the user underclock. Takes effect on the next [`Self::throttle`]
    /// or normal speed request.
    pub fn set_throttle(&mut self, tier: Option<SpeedTier>) {
        self.clock.policy_mut().throttle = tier;
    }

    pub fn throttle(&mut self) -> Option<SpeedReport> {
        self.clock.throttle(&mut self.scheduler)
    }

    pub fn set_serial_active(&mut self, active: bool) {
        self.clock.set_serial_active(active);
    }

    pub fn save(&mut self, state: &PersistentGameState, mode: SaveMode) -> Result<usize, SaveError> {
        let mut speed = SaveBoost::new(&mut self.clock, &mut self.scheduler);
        self.store.save(state, mode, &mut speed)
    }

    pub fn load(&mut self) -> Result<LoadedGame, LoadError> {
        let game = self.store.load()?;
        self.clock.policy_mut().throttle = game.state.hardware.throttle;
        Ok(game)
    }

    /// Starts a fresh game: autosave back on.
    pub fn new_game(&mut self) {
        self.store.enable_autosave();
    }

    pub fn set_input_mode(&self, mode: InputMode) {
        self.shared.set_input_mode(mode);
    }

    #[must_use]
    pub fn take_force_move(&self) -> bool {
        self.shared.take_force_move()
    }

    #[must_use]
    pub fn take_display_toggle(&self) -> bool {
        self.shared.take_display_toggle()
    }

    #[must_use]
    pub fn battery_status(&self) -> BatteryStatus {
        self.shared.battery_status()
    }

    pub fn battery_allows_new_game(&mut self) -> bool {
        let _pause = self.scheduler.pause();
        battery::allows_new_game(&self.config.battery, self.shared.battery_sum())
    }

    #[must_use]
    pub fn entropy(&self) -> u32 {
        self.shared.entropy()
    }

    pub fn beep(&self, duration_ms: u16) {
        self.shared.request_beep(duration_ms);
    }

    /// Final low-power state after a battery shutdown: lowest tier, the tick
    /// only keeps the session clock.
    pub fn enter_dying(&mut self) -> SpeedReport {
        self.shared.set_dying();
        self.scheduler.enter_dying(self.clock.cpu_hz());
        self.clock
            .set_speed(SpeedTier::OscillatorOnly, &mut self.scheduler)
    }

    #[must_use]
    pub fn shutdown_pending(&self) -> bool {
        self.shared.shutdown_pending()
    }

    #[must_use]
    pub fn user_interacted(&self) -> bool {
        self.user_interacted
    }

    #[must_use]
    pub fn clock(&self) -> &ClockManager<P::Clock> {
        &self.clock
    }

    #[must_use]
    pub fn scheduler(&self) -> &SchedulerControl<P::Timer> {
        &self.scheduler
    }

    #[must_use]
    pub fn store(&self) -> &PersistentStore<P::Backup> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut PersistentStore<P::Backup> {
        &mut self.store
    }

    #[must_use]
    pub fn shared(&self) -> &'a SharedState {
        self.shared
    }

    #[must_use]
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Borrows the components the fault path drives.
    pub fn fault_handler<'b, M, C, R, O>(
        &'b mut self,
        matrix: &'b mut M,
        time: &'b mut C,
        retained: &'b mut R,
        io: &'b mut O,
    ) -> FaultHandler<'b, P::Watchdog, P::Timer, P::Clock, M, C, R, O>
    where
        M: KeyMatrix,
        C: Clock,
        R: RetainedRegister,
        O: FaultIo,
    {
        FaultHandler {
            watchdog: &mut self.watchdog,
            scheduler: &mut self.scheduler,
            clock: &mut self.clock,
            matrix,
            time,
            retained,
            io,
            debounce: self.config.debounce,
        }
    }
}
