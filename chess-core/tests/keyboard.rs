mod support;

use chess_core::battery::BatteryMonitor;
use chess_core::config::{BatteryThresholds, DebounceConfig, KEY_CLICK_MS};
use chess_core::hal::KeyMatrix;
use chess_core::keyboard::{
    Debounce, InputMode, Key, KeyProducer, KeyQueue, KeyScanner, ScanPhase, wait_for_enter,
};
use chess_core::scheduler::{SharedState, TickContext};
use proptest::prelude::*;
use support::{SimAdc, SimMatrix, SimOutputs, SimTime};

type Ctx<'a> = TickContext<'a, SimMatrix, SimAdc, SimOutputs>;

fn tick_context<'a>(shared: &'a SharedState, keys: KeyProducer<'a>) -> Ctx<'a> {
    TickContext::new(
        shared,
        keys,
        SimMatrix::default(),
        SimAdc::new(2_500),
        SimOutputs::default(),
        KeyScanner::new(DebounceConfig::default()),
        BatteryMonitor::new(BatteryThresholds::default(), 2_500),
    )
}

fn run(ctx: &mut Ctx<'_>, ticks: usize) {
    for _ in 0..ticks {
        ctx.on_tick();
    }
}

/// Runs scan phases until `scans` scans have completed.
fn complete_scans(scanner: &mut KeyScanner, matrix: &mut SimMatrix, scans: usize) -> Vec<Key> {
    let mut pressed = Vec::new();
    let mut completed = 0;
    while completed < scans {
        let was_rows = scanner.phase() == ScanPhase::Rows;
        let outcome = scanner.scan(matrix);
        let finished = was_rows || scanner.phase() == ScanPhase::Columns;
        if finished {
            completed += 1;
        }
        pressed.extend(outcome.pressed);
    }
    pressed
}

#[test]
fn seven_detections_then_three_releases_report_one_press() {
    let mut scanner = KeyScanner::new(DebounceConfig::default());
    let mut matrix = SimMatrix::default();

    matrix.press(2, 1);
    let mut presses = complete_scans(&mut scanner, &mut matrix, 7);
    matrix.release();
    presses.extend(complete_scans(&mut scanner, &mut matrix, 3));

    assert_eq!(presses, vec![Key::Enter]);
}

#[test]
fn idle_matrix_stays_in_column_phase() {
    let mut scanner = KeyScanner::new(DebounceConfig::default());
    let mut matrix = SimMatrix::default();
    for _ in 0..5 {
        let outcome = scanner.scan(&mut matrix);
        assert_eq!(outcome.pressed, None);
        assert_eq!(scanner.phase(), ScanPhase::Columns);
    }
}

struct ChordMatrix;

impl KeyMatrix for ChordMatrix {
    fn drive_columns_low(&mut self) {}
    fn read_rows(&self) -> u8 {
        0b0011
    }
    fn drive_rows_low(&mut self) {}
    fn read_columns(&self) -> u8 {
        0b0001
    }
    fn light_button_asserted(&self) -> bool {
        false
    }
    fn configure_enter_only(&mut self) {}
    fn enter_asserted(&self) -> bool {
        false
    }
}

#[test]
fn chords_are_suppressed() {
    let mut scanner = KeyScanner::new(DebounceConfig::default());
    let mut matrix = ChordMatrix;
    for _ in 0..100 {
        assert_eq!(scanner.scan(&mut matrix).pressed, None);
    }
    assert!(!scanner.debounce(Key::A1).is_some_and(Debounce::is_active));
    assert!(!scanner.debounce(Key::E5).is_some_and(Debounce::is_active));
}

#[test]
fn user_mode_queues_key_with_click_and_backlight() {
    let shared = SharedState::new();
    let mut queue = KeyQueue::new();
    let (producer, mut keys) = queue.split();
    let mut ctx = tick_context(&shared, producer);

    ctx.matrix_mut().press(0, 0);
    // Six completed scans; the click starts on the following tick.
    run(&mut ctx, 13);

    assert_eq!(keys.dequeue(), Some(Key::A1));
    assert!(keys.is_empty());
    assert!(ctx.outputs().buzzer, "click should be sounding");
    assert!(ctx.outputs().backlight);

    run(&mut ctx, usize::from(KEY_CLICK_MS) + 1);
    assert!(!ctx.outputs().buzzer);
}

#[test]
fn full_queue_still_clicks() {
    let shared = SharedState::new();
    let mut queue = KeyQueue::new();
    let (mut producer, keys) = queue.split();
    for _ in 0..keys.capacity() {
        producer.enqueue(Key::B2).unwrap();
    }
    let mut ctx = tick_context(&shared, producer);

    ctx.matrix_mut().press(1, 0);
    run(&mut ctx, 13);

    assert_eq!(keys.len(), keys.capacity());
    assert!(ctx.outputs().buzzer);
}

#[test]
fn computer_mode_routes_go_and_pos_to_flags() {
    let shared = SharedState::new();
    shared.set_input_mode(InputMode::Computer);
    let mut queue = KeyQueue::new();
    let (producer, keys) = queue.split();
    let mut ctx = tick_context(&shared, producer);

    ctx.matrix_mut().press(3, 0);
    run(&mut ctx, 12);
    ctx.matrix_mut().release();
    run(&mut ctx, 40);
    ctx.matrix_mut().press(3, 1);
    run(&mut ctx, 12);
    ctx.matrix_mut().release();
    run(&mut ctx, 40);
    ctx.matrix_mut().press(0, 3);
    run(&mut ctx, 12);

    assert!(shared.take_force_move());
    assert!(!shared.take_force_move(), "flag is consumed");
    assert!(shared.take_display_toggle());
    assert!(keys.is_empty());
    assert!(!ctx.outputs().buzzer);
}

#[test]
fn light_button_toggles_backlight() {
    let shared = SharedState::new();
    let mut queue = KeyQueue::new();
    let (producer, keys) = queue.split();
    let mut ctx = tick_context(&shared, producer);

    ctx.matrix_mut().light = true;
    run(&mut ctx, 10);
    assert!(ctx.outputs().backlight);
    assert!(keys.is_empty(), "light button never enters the queue");
}

#[test]
fn enter_only_mode_polls_without_ticks() {
    let mut matrix = SimMatrix::default();
    matrix.enter_after.set(10);
    let mut time = SimTime::default();
    let mut feeds = 0;

    wait_for_enter(&mut matrix, &mut time, &DebounceConfig::default(), || feeds += 1);

    assert!(matrix.enter_only);
    assert_eq!(feeds, 16);
    assert_eq!(time.micros, 15_000);
}

/// Longest stretch of consecutive detections in `samples`.
fn longest_run(samples: &[bool]) -> usize {
    samples
        .split(|detected| !detected)
        .map(<[bool]>::len)
        .max()
        .unwrap_or(0)
}

fn runs() -> impl Strategy<Value = Vec<bool>> {
    prop::collection::vec((any::<bool>(), 1usize..30), 0..40).prop_map(|runs| {
        runs.into_iter()
            .flat_map(|(detected, len)| std::iter::repeat_n(detected, len))
            .collect()
    })
}

proptest! {
    #[test]
    fn presses_are_separated_by_release_and_rehit(samples in runs()) {
        let config = DebounceConfig::default();
        let mut debounce = Debounce::new();
        let presses: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|(_, detected)| debounce.sample(**detected, &config))
            .map(|(index, _)| index)
            .collect();

        for pair in presses.windows(2) {
            let between = &samples[pair[0] + 1..=pair[1]];
            let detections = between.iter().filter(|d| **d).count();
            let idle = between.len() - detections;
            prop_assert!(idle >= usize::from(config.blocked - config.release));
            prop_assert!(detections >= usize::from(config.hit - config.release));
        }
    }

    #[test]
    fn first_press_follows_an_unbroken_run_of_hits(samples in prop::collection::vec(any::<bool>(), 0..200)) {
        let config = DebounceConfig::default();
        let mut debounce = Debounce::new();
        let first = samples.iter().position(|detected| debounce.sample(*detected, &config));
        if let Some(first) = first {
            prop_assert!(longest_run(&samples[..=first]) >= usize::from(config.hit));
        } else {
            prop_assert!(longest_run(&samples) < usize::from(config.hit));
        }
    }
}
