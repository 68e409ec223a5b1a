//! Keypad matrix scanning, debounce and key routing.
//!
//! The tick interrupt calls [`KeyScanner::scan`] once per millisecond. Each
//! call performs one phase of a two-phase scan: the column phase detects
//! whether anything is pressed at all, the row phase identifies the key. A
//! completed scan feeds every key's [`Debounce`] filter exactly once.

mod debounce;
mod queue;

use core::fmt;
use core::time::Duration;

use portable_atomic::{AtomicU8, Ordering};

pub use debounce::Debounce;
pub use queue::{KeyConsumer, KeyProducer, KeyQueue};

use crate::config::DebounceConfig;
use crate::hal::{Clock, KeyMatrix};

/// Logical keys. Codes are stable and start at 1 so zero never names a key.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Key {
    A1 = 1,
    B2,
    C3,
    D4,
    E5,
    F6,
    G7,
    H8,
    Clear,
    Enter,
    Back,
    Forward,
    Go,
    PosDisp,
    Menu,
    Info,
    /// Dedicated backlight button outside the matrix.
    Light,
}

/// Number of keys wired into the matrix.
pub const MATRIX_KEYS: usize = 16;

/// Matrix layout indexed by `[row][column]`.
pub const LAYOUT: [[Key; 4]; 4] = [
    [Key::A1, Key::B2, Key::C3, Key::D4],
    [Key::E5, Key::F6, Key::G7, Key::H8],
    [Key::Clear, Key::Enter, Key::Back, Key::Forward],
    [Key::Go, Key::PosDisp, Key::Menu, Key::Info],
];

impl Key {
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Key::A1,
            2 => Key::B2,
            3 => Key::C3,
            4 => Key::D4,
            5 => Key::E5,
            6 => Key::F6,
            7 => Key::G7,
            8 => Key::H8,
            9 => Key::Clear,
            10 => Key::Enter,
            11 => Key::Back,
            12 => Key::Forward,
            13 => Key::Go,
            14 => Key::PosDisp,
            15 => Key::Menu,
            16 => Key::Info,
            17 => Key::Light,
            _ => return None,
        })
    }

    /// Position of a matrix key in the debounce table.
    const fn matrix_index(self) -> Option<usize> {
        match self {
            Key::Light => None,
            key => Some(key as usize - 1),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Key::A1 => "A1",
            Key::B2 => "B2",
            Key::C3 => "C3",
            Key::D4 => "D4",
            Key::E5 => "E5",
            Key::F6 => "F6",
            Key::G7 => "G7",
            Key::H8 => "H8",
            Key::Clear => "CL",
            Key::Enter => "ENT",
            Key::Back => "BACK",
            Key::Forward => "FWD",
            Key::Go => "GO",
            Key::PosDisp => "POS",
            Key::Menu => "MENU",
            Key::Info => "INFO",
            Key::Light => "LIGHT",
        };
        f.write_str(label)
    }
}

/// Maps a sampled row/column pair to a key.
///
/// Exactly one row bit and one column bit must be set; anything else (no
/// key, chords, ghosting) is ambiguous and yields `None`.
#[must_use]
pub fn decode(row_mask: u8, col_mask: u8) -> Option<Key> {
    let row = single_line(row_mask)?;
    let col = single_line(col_mask)?;
    Some(LAYOUT[row][col])
}

fn single_line(mask: u8) -> Option<usize> {
    let mask = mask & 0x0F;
    (mask.count_ones() == 1).then(|| mask.trailing_zeros() as usize)
}

/// How detected keys are used.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InputMode {
    /// Keys go to the event queue.
    User = 0,
    /// The engine is thinking: only GO and POS act, directly.
    Computer = 1,
}

impl InputMode {
    #[must_use]
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => InputMode::Computer,
            _ => InputMode::User,
        }
    }
}

/// Shared cell holding the current [`InputMode`].
pub struct InputModeCell(AtomicU8);

impl InputModeCell {
    #[must_use]
    pub const fn new(mode: InputMode) -> Self {
        Self(AtomicU8::new(mode as u8))
    }

    #[must_use]
    pub fn get(&self) -> InputMode {
        InputMode::from_code(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, mode: InputMode) {
        self.0.store(mode as u8, Ordering::Release);
    }
}

/// What happened to a key after routing.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KeyAction {
    Queued,
    /// User mode, but the queue was full.
    Dropped,
    ForceMove,
    ToggleDisplay,
    Ignored,
}

impl KeyAction {
    /// Returns `true` when the press should click and wake the backlight.
    #[must_use]
    pub const fn notifies_user(self) -> bool {
        matches!(self, KeyAction::Queued | KeyAction::Dropped)
    }
}

/// Routes a debounced press according to the input mode.
pub fn route_key(key: Key, mode: InputMode, keys: &mut KeyProducer<'_>) -> KeyAction {
    match mode {
        InputMode::User => match keys.enqueue(key) {
            Ok(()) => KeyAction::Queued,
            Err(_) => KeyAction::Dropped,
        },
        InputMode::Computer => match key {
            Key::Go => KeyAction::ForceMove,
            Key::PosDisp => KeyAction::ToggleDisplay,
            _ => KeyAction::Ignored,
        },
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanPhase {
    Columns,
    Rows,
}

/// Result of one scan phase.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ScanOutcome {
    /// Newly debounced matrix key press.
    pub pressed: Option<Key>,
    /// Newly debounced light button press.
    pub light: bool,
}

/// Two-phase matrix scanner with per-key debounce.
pub struct KeyScanner {
    phase: ScanPhase,
    row_mask: u8,
    keys: [Debounce; MATRIX_KEYS],
    light: Debounce,
    config: DebounceConfig,
}

impl KeyScanner {
    #[must_use]
    pub const fn new(config: DebounceConfig) -> Self {
        Self {
            phase: ScanPhase::Columns,
            row_mask: 0,
            keys: [Debounce::new(); MATRIX_KEYS],
            light: Debounce::new(),
            config,
        }
    }

    #[must_use]
    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Runs one scan phase.
    pub fn scan<M: KeyMatrix>(&mut self, matrix: &mut M) -> ScanOutcome {
        match self.phase {
            ScanPhase::Columns => {
                matrix.drive_columns_low();
                let rows = matrix.read_rows() & 0x0F;
                if rows == 0 {
                    // Nothing pressed: the columns stay driven and the scan is
                    // complete.
                    return self.complete(None, matrix.light_button_asserted());
                }
                self.row_mask = rows;
                self.phase = ScanPhase::Rows;
                ScanOutcome::default()
            }
            ScanPhase::Rows => {
                matrix.drive_rows_low();
                let cols = matrix.read_columns();
                let detected = decode(self.row_mask, cols);
                matrix.drive_columns_low();
                self.phase = ScanPhase::Columns;
                self.complete(detected, matrix.light_button_asserted())
            }
        }
    }

    fn complete(&mut self, detected: Option<Key>, light_asserted: bool) -> ScanOutcome {
        let detected_index = detected.and_then(Key::matrix_index);
        let mut pressed = None;
        for (index, key) in self.keys.iter_mut().enumerate() {
            if key.sample(detected_index == Some(index), &self.config) {
                pressed = detected;
            }
        }
        ScanOutcome {
            pressed,
            light: self.light.sample(light_asserted, &self.config),
        }
    }

    /// Debounce state of a matrix key.
    #[must_use]
    pub fn debounce(&self, key: Key) -> Option<&Debounce> {
        key.matrix_index().map(|index| &self.keys[index])
    }

    /// Forgets all debounce history and restarts at the column phase.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }
}

/// Sampling period of the enter-only confirmation loop.
pub const ENTER_POLL_PERIOD: Duration = Duration::from_millis(1);

/// Blocks until ENTER is pressed, without relying on interrupts.
///
/// The matrix is reconfigured so only the ENTER line is read. `feed` runs on
/// every sample so the caller can keep the watchdog alive.
pub fn wait_for_enter<M, C, F>(matrix: &mut M, clock: &mut C, config: &DebounceConfig, mut feed: F)
where
    M: KeyMatrix,
    C: Clock,
    F: FnMut(),
{
    matrix.configure_enter_only();
    let mut enter = Debounce::new();
    loop {
        feed();
        if enter.sample(matrix.enter_asserted(), config) {
            return;
        }
        clock.busy_wait(ENTER_POLL_PERIOD);
    }
}
