use core::cell::RefCell;

use chess_core::battery::BatteryMonitor;
use chess_core::clock::ClockManager;
use chess_core::config::SystemConfig;
use chess_core::fault::{FaultHandler, FaultKind, FaultReport};
use chess_core::hal::BatteryAdc;
use chess_core::keyboard::{KeyQueue, KeyScanner};
use chess_core::persist::{BootRestore, PersistentGameState, SaveMode};
use chess_core::scheduler::{SchedulerControl, SharedState, TickContext};
use chess_core::system::HardwareContext;
use chess_core::watchdog::Watchdog;
use cortex_m::interrupt;
use cortex_m::register::primask;
use cortex_m_rt::{ExceptionFrame, entry, exception};
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use static_cell::StaticCell;

use crate::hw;
use crate::hw::{
    BackupSram, BatteryChannel, Board, CycleClock, IndependentWatchdog, MatrixPins, PanelOutputs,
    RccClock, RtcBackupRegister, SysTickTimer, Wfi,
};
use crate::telemetry::{TelemetryEvent, TelemetryRecorder};

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

type Tick = TickContext<'static, MatrixPins, BatteryChannel, PanelOutputs>;

static SHARED: SharedState = SharedState::new();
static KEYS: StaticCell<KeyQueue> = StaticCell::new();
static TICK: Mutex<CriticalSectionRawMutex, RefCell<Option<Tick>>> =
    Mutex::new(RefCell::new(None));
static HARDWARE: StaticCell<HardwareContext<'static, Board>> = StaticCell::new();
static GAME: StaticCell<PersistentGameState> = StaticCell::new();

fn board_config() -> SystemConfig {
    SystemConfig::default()
}

#[entry]
fn main() -> ! {
    hw::init_board();
    let flags = hw::read_reset_flags();
    let config = board_config();

    let (producer, consumer) = KEYS.init(KeyQueue::new()).split();

    let mut adc = BatteryChannel;
    let first_reading = adc.read_blocking();
    adc.start_conversion();
    let tick = TickContext::new(
        &SHARED,
        producer,
        MatrixPins,
        adc,
        PanelOutputs,
        KeyScanner::new(config.debounce),
        BatteryMonitor::new(config.battery, first_reading),
    );
    TICK.lock(|cell| *cell.borrow_mut() = Some(tick));

    let hardware = HARDWARE.init(HardwareContext::new(
        &SHARED,
        consumer,
        RccClock,
        SysTickTimer,
        IndependentWatchdog,
        BackupSram,
        Wfi,
        config,
    ));
    let report = hardware.boot(flags, &mut RtcBackupRegister);
    hardware.register_battery_shutdown_callback(Some(on_battery_exhausted));

    let mut telemetry = TelemetryRecorder::new();
    telemetry.record_boot(&report, hardware.system_time_ms());

    let game = GAME.init(match report.restore {
        BootRestore::Restored(loaded) => loaded.state,
        BootRestore::NoSavedGame | BootRestore::MemoryFault => PersistentGameState::default(),
    });

    loop {
        let now = hardware.system_time_ms();
        telemetry.record_battery(hardware.battery_status(), now);

        if hardware.shutdown_pending() && !SHARED.is_dying() {
            telemetry.record(TelemetryEvent::ShutdownRequested, now);
            game.timing.session_ms = now;
            let saved = hardware.save(game, SaveMode::Auto);
            telemetry.record_save(SaveMode::Auto, saved, now);
            let speed = hardware.enter_dying();
            telemetry.record(TelemetryEvent::Dying, now);
            telemetry.record_speed(&speed, now);
        }

        if let Some(key) = hardware.read_key(true) {
            defmt::debug!("key {}", key);
        }
    }
}

// Runs inside the tick interrupt; the main loop picks up the pending flag.
fn on_battery_exhausted() {
    defmt::warn!("battery exhausted");
}

#[exception]
fn SysTick() {
    TICK.lock(|cell| {
        if let Some(tick) = cell.borrow_mut().as_mut() {
            tick.on_tick();
        }
    });
}

#[exception]
unsafe fn HardFault(frame: &ExceptionFrame) -> ! {
    let status = hw::fault_status();
    let report = FaultReport {
        kind: FaultKind::from_status(status),
        address: frame.pc(),
        status,
    };
    defmt::error!("{}", report);

    let config = board_config();
    let mut watchdog = Watchdog::new(IndependentWatchdog);
    let mut scheduler = SchedulerControl::new(SysTickTimer, hw::core_mhz() * 1_000_000);
    let mut clock = ClockManager::new(RccClock, config.clock);
    let _pending = FaultHandler {
        watchdog: &mut watchdog,
        scheduler: &mut scheduler,
        clock: &mut clock,
        matrix: &mut MatrixPins,
        time: &mut CycleClock::new(),
        retained: &mut RtcBackupRegister,
        io: &mut PanelOutputs,
        debounce: config.debounce,
    }
    .run(&report);

    loop {
        cortex_m::asm::nop();
    }
}
