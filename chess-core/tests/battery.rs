mod support;

use std::sync::atomic::{AtomicU32, Ordering};

use chess_core::battery::{BatteryMonitor, BatteryStatus};
use chess_core::config::{
    BATTERY_ADC_MAX, BATTERY_ADC_MIN, BATTERY_SAMPLES, BatteryThresholds, DebounceConfig,
    SLOW_TICK_DIVIDER,
};
use chess_core::keyboard::{KeyQueue, KeyScanner};
use chess_core::scheduler::{SharedState, TickContext};
use proptest::prelude::*;
use support::{SimAdc, SimMatrix, SimOutputs};

type Ctx<'a> = TickContext<'a, SimMatrix, SimAdc, SimOutputs>;

fn tick_context<'a>(shared: &'a SharedState, keys: &'a mut KeyQueue, level: u16) -> Ctx<'a> {
    let (producer, _) = keys.split();
    TickContext::new(
        shared,
        producer,
        SimMatrix::default(),
        SimAdc::new(level),
        SimOutputs::default(),
        KeyScanner::new(DebounceConfig::default()),
        BatteryMonitor::new(BatteryThresholds::default(), level),
    )
}

fn rank(status: BatteryStatus) -> u8 {
    if status.is_shutdown() {
        2
    } else if status.is_high() {
        0
    } else {
        1
    }
}

#[test]
fn steady_voltage_fills_the_average() {
    let thresholds = BatteryThresholds::default();
    let shared = SharedState::new();
    let mut keys = KeyQueue::new();
    let level = 2_430;
    let mut ctx = tick_context(&shared, &mut keys, 2_300);
    assert_eq!(shared.battery_status(), BatteryStatus::LOW);

    ctx.adc_mut().value = level;
    for _ in 0..BATTERY_SAMPLES * usize::from(SLOW_TICK_DIVIDER) {
        ctx.on_tick();
    }

    let expected = u32::from(level) * BATTERY_SAMPLES as u32;
    assert_eq!(shared.battery_sum(), expected);
    assert!(expected >= thresholds.low_to_high);
    assert_eq!(shared.battery_status(), BatteryStatus::HIGH);
    assert_eq!(ctx.adc_mut().conversions, BATTERY_SAMPLES as u32);
}

static SHUTDOWN_CALLS: AtomicU32 = AtomicU32::new(0);

fn on_shutdown() {
    SHUTDOWN_CALLS.fetch_add(1, Ordering::SeqCst);
}

#[test]
fn shutdown_callback_runs_once() {
    let shared = SharedState::new();
    let mut keys = KeyQueue::new();
    shared.register_shutdown_callback(Some(on_shutdown));
    let mut ctx = tick_context(&shared, &mut keys, 2_300);

    ctx.adc_mut().value = BATTERY_ADC_MIN;
    for _ in 0..4 * BATTERY_SAMPLES * usize::from(SLOW_TICK_DIVIDER) {
        ctx.on_tick();
    }

    assert!(shared.battery_status().is_shutdown());
    assert!(shared.shutdown_pending());
    assert_eq!(SHUTDOWN_CALLS.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_without_callback_only_raises_flag() {
    let shared = SharedState::new();
    let mut keys = KeyQueue::new();
    let mut ctx = tick_context(&shared, &mut keys, 2_300);
    ctx.adc_mut().value = BATTERY_ADC_MIN;
    for _ in 0..BATTERY_SAMPLES * usize::from(SLOW_TICK_DIVIDER) {
        ctx.on_tick();
    }
    assert!(shared.shutdown_pending());
}

#[test]
fn battery_runs_on_ten_millisecond_cadence() {
    let shared = SharedState::new();
    let mut keys = KeyQueue::new();
    let mut ctx = tick_context(&shared, &mut keys, 2_500);
    for _ in 0..95 {
        ctx.on_tick();
    }
    assert_eq!(ctx.adc_mut().conversions, 9);
    assert_eq!(shared.system_time_ms(), 95);
}

proptest! {
    #[test]
    fn sum_always_matches_buffer(
        first in any::<u16>(),
        readings in prop::collection::vec(any::<u16>(), 0..200),
    ) {
        let mut monitor = BatteryMonitor::new(BatteryThresholds::default(), first);
        for raw in readings {
            monitor.on_sample(raw);
            let literal: u32 = monitor.samples().iter().copied().map(u32::from).sum();
            prop_assert_eq!(monitor.sum(), literal);
            prop_assert!(monitor
                .samples()
                .iter()
                .all(|sample| (BATTERY_ADC_MIN..=BATTERY_ADC_MAX).contains(sample)));
        }
    }

    #[test]
    fn status_moves_one_step_per_sample(
        first in 1_000u16..3_800,
        readings in prop::collection::vec(1_000u16..3_800, 0..300),
    ) {
        let mut monitor = BatteryMonitor::new(BatteryThresholds::default(), first);
        for raw in readings {
            let before = monitor.status();
            let after = monitor.on_sample(raw).status;
            prop_assert!(rank(before).abs_diff(rank(after)) <= 1);
            if before.is_shutdown() {
                prop_assert_eq!(after, before);
            }
            if rank(before) == 0 {
                prop_assert!(!after.is_shutdown());
            }
        }
    }
}
