use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant as HostInstant};

use chess_core::battery::BatteryMonitor;
use chess_core::clock::{SpeedMode, SpeedReport, SpeedTier};
use chess_core::config::SystemConfig;
use chess_core::diagnostics::ResetFlags;
use chess_core::fault::{FaultKind, FaultReport};
use chess_core::keyboard::{InputMode, Key, KeyQueue, KeyScanner};
use chess_core::persist::{BootRestore, PersistentGameState, SaveMode};
use chess_core::scheduler::{SharedState, TickContext};
use chess_core::system::{BootReport, HardwareContext};

use crate::board::{
    BoardState, ClockTree, HostAdc, HostBackup, HostClock, HostIdle, HostMatrix, HostOutputs,
    HostPlatform, HostRetained, HostTimer, HostWatchdog,
};

/// Default key hold time, comfortably above the debounce threshold.
const DEFAULT_PRESS_MS: u32 = 50;
/// Upper bound on how long a fault waits for the watchdog to bite.
const FAULT_RESET_LIMIT_MS: u32 = 1_000;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("press", "press <key> [ms]          - hold a key (A1..H8, CL, ENT, GO, ...)"),
    ("tick", "tick <ms>                 - let time pass with the main loop running"),
    ("hang", "hang <ms>                 - let time pass without feeding the watchdog"),
    ("battery", "battery <raw>             - set the battery ADC reading"),
    ("speed", "speed <osc|MHz> [forced]   - request a CPU speed tier"),
    ("throttle", "throttle <osc|MHz|off>    - set and apply the user underclock"),
    ("serial", "serial <on|off>            - mark the serial link active"),
    ("mode", "mode <user|computer>       - switch the key input mode"),
    ("beep", "beep <ms>                  - sound the buzzer"),
    ("save", "save [auto|manual]         - write the game to backup memory"),
    ("load", "load                       - read the game back"),
    ("newgame", "newgame                    - start over with autosave enabled"),
    ("corrupt", "corrupt <offset> [bit]     - flip a bit in backup memory"),
    ("crystal", "crystal <ok|fail>          - make the external crystal work or not"),
    ("fault", "fault [hard|mem|bus|usage] - raise a fault and acknowledge it"),
    ("reboot", "reboot                     - press the reset button"),
    ("status", "status                     - show the board state"),
    ("help", "help [topic]               - show help for a command"),
];

type Tick = TickContext<'static, HostMatrix, HostAdc, HostOutputs>;

/// One powered-up instance of the coordination layer.
struct Machine {
    shared: &'static SharedState,
    hardware: HardwareContext<'static, HostPlatform>,
    tick: Tick,
    tick_residue_ms: u32,
}

impl Machine {
    fn power_up(board: &Rc<BoardState>, flags: ResetFlags) -> (Self, BootReport) {
        // Every emulated reset gets fresh interrupt-shared state, as a real
        // reset would. The old state is small and simply left behind.
        let shared: &'static SharedState = Box::leak(Box::new(SharedState::new()));
        let keys: &'static mut KeyQueue = Box::leak(Box::new(KeyQueue::new()));
        let (producer, consumer) = keys.split();
        let config = SystemConfig::default();

        let tick = TickContext::new(
            shared,
            producer,
            HostMatrix(Rc::clone(board)),
            HostAdc(Rc::clone(board)),
            HostOutputs(Rc::clone(board)),
            KeyScanner::new(config.debounce),
            BatteryMonitor::new(config.battery, board.battery_raw()),
        );
        let mut hardware = HardwareContext::new(
            shared,
            consumer,
            ClockTree(Rc::clone(board)),
            HostTimer(Rc::clone(board)),
            HostWatchdog(Rc::clone(board)),
            HostBackup(Rc::clone(board)),
            HostIdle(Rc::clone(board)),
            config,
        );
        let report = hardware.boot(flags, &mut HostRetained(Rc::clone(board)));
        let machine = Self {
            shared,
            hardware,
            tick,
            tick_residue_ms: 0,
        };
        (machine, report)
    }
}

pub struct Session {
    board: Rc<BoardState>,
    machine: Machine,
    game: PersistentGameState,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
}

impl Session {
    pub fn new(battery_raw: u16, transcript: Option<&Path>) -> io::Result<(Self, Vec<String>)> {
        let transcript = transcript.map(TranscriptLogger::new).transpose()?;
        let board = BoardState::new(battery_raw);
        let flags = ResetFlags {
            power_on: true,
            external_pin: true,
            ..ResetFlags::default()
        };
        let (machine, report) = Machine::power_up(&board, flags);
        let mut session = Self {
            board,
            machine,
            game: PersistentGameState::default(),
            transcript,
            started_at: HostInstant::now(),
        };
        let lines = session.adopt_boot(report);
        session.record_output(&lines)?;
        Ok((session, lines))
    }

    #[cfg(test)]
    pub fn board(&self) -> &BoardState {
        &self.board
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let mut words = trimmed.split_whitespace();
        let command = words.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();
        let lines = match self.dispatch(&command, &args) {
            Ok(lines) => lines,
            Err(message) => vec![format!("ERR {message}")],
        };

        self.record_output(&lines)?;
        Ok(lines)
    }

    fn dispatch(&mut self, command: &str, args: &[&str]) -> Result<Vec<String>, String> {
        match command {
            "help" => Ok(help(args.first().copied())),
            "press" => {
                let key = parse_key(arg(args, 0)?)?;
                let hold_ms = optional_number(args, 1)?.unwrap_or(DEFAULT_PRESS_MS);
                Ok(self.press(key, hold_ms))
            }
            "tick" => {
                let ms = parse_number(arg(args, 0)?)?;
                let mut lines = self.advance(ms, true);
                lines.push(format!("OK tick {ms}ms now={}ms", self.time_ms()));
                Ok(lines)
            }
            "hang" => {
                let ms = parse_number(arg(args, 0)?)?;
                let mut lines = self.advance(ms, false);
                lines.push(format!("OK hang {ms}ms"));
                Ok(lines)
            }
            "battery" => {
                let raw = parse_number(arg(args, 0)?)?;
                let raw = u16::try_from(raw).map_err(|_| format!("syntax battery {raw}"))?;
                self.board.set_battery_raw(raw);
                Ok(vec![format!("OK battery raw={raw}")])
            }
            "speed" => {
                let tier = parse_tier(arg(args, 0)?)?;
                let mode = match args.get(1) {
                    Some(word) if word.eq_ignore_ascii_case("forced") => SpeedMode::Forced,
                    Some(word) => return Err(format!("syntax speed mode `{word}`")),
                    None => SpeedMode::Normal,
                };
                let report = self.machine.hardware.request_speed(tier, mode);
                Ok(vec![describe_speed("speed", &report)])
            }
            "throttle" => {
                let word = arg(args, 0)?;
                let tier = if word.eq_ignore_ascii_case("off") {
                    None
                } else {
                    Some(parse_tier(word)?)
                };
                self.game.hardware.throttle = tier;
                self.machine.hardware.set_throttle(tier);
                Ok(match self.machine.hardware.throttle() {
                    Some(report) => vec![describe_speed("throttle", &report)],
                    None => vec!["OK throttle unchanged".to_string()],
                })
            }
            "serial" => {
                let active = parse_switch(arg(args, 0)?, "on", "off")?;
                self.machine.hardware.set_serial_active(active);
                Ok(vec![format!("OK serial active={active}")])
            }
            "mode" => {
                let computer = parse_switch(arg(args, 0)?, "computer", "user")?;
                let mode = if computer {
                    InputMode::Computer
                } else {
                    InputMode::User
                };
                self.machine.hardware.set_input_mode(mode);
                Ok(vec![format!("OK mode {mode:?}")])
            }
            "beep" => {
                let ms = parse_number(arg(args, 0)?)?;
                let ms = u16::try_from(ms).map_err(|_| format!("syntax beep {ms}"))?;
                self.machine.hardware.beep(ms);
                Ok(vec![format!("OK beep {ms}ms")])
            }
            "save" => {
                let manual = match args.first() {
                    Some(word) => parse_switch(word, "manual", "auto")?,
                    None => true,
                };
                let mode = if manual { SaveMode::Manual } else { SaveMode::Auto };
                Ok(vec![self.save(mode)])
            }
            "load" => Ok(vec![self.load()]),
            "newgame" => {
                let allowed = self.machine.hardware.battery_allows_new_game();
                if !allowed {
                    return Err("battery too low for a new game".to_string());
                }
                self.machine.hardware.new_game();
                self.game = PersistentGameState::default();
                Ok(vec!["OK newgame autosave=on".to_string()])
            }
            "corrupt" => {
                let offset = usize::try_from(parse_number(arg(args, 0)?)?)
                    .map_err(|_| "syntax corrupt offset".to_string())?;
                let bit = optional_number(args, 1)?.unwrap_or(0);
                let bit = u8::try_from(bit).map_err(|_| format!("syntax corrupt bit {bit}"))?;
                if self.board.corrupt_backup(offset, bit) {
                    Ok(vec![format!("OK corrupt offset={offset} bit={}", bit & 7)])
                } else {
                    Err(format!("corrupt offset {offset} out of range"))
                }
            }
            "crystal" => {
                let ok = parse_switch(arg(args, 0)?, "ok", "fail")?;
                self.board.set_crystal_ok(ok);
                Ok(vec![format!("OK crystal {}", if ok { "ok" } else { "fail" })])
            }
            "fault" => {
                let kind = match args.first() {
                    Some(word) => parse_fault(word)?,
                    None => FaultKind::HardFault,
                };
                Ok(self.fault(kind))
            }
            "reboot" => {
                let flags = ResetFlags {
                    external_pin: true,
                    ..ResetFlags::default()
                };
                Ok(self.reboot(flags))
            }
            "status" => Ok(self.status()),
            other => Err(format!("syntax unknown command `{other}`")),
        }
    }

    fn time_ms(&self) -> u32 {
        self.machine.hardware.system_time_ms()
    }

    /// Holds `key` for `hold_ms`, releases it and lets the same time pass
    /// again so the release debounces.
    fn press(&mut self, key: Key, hold_ms: u32) -> Vec<String> {
        self.board.hold(Some(key));
        let mut lines = self.advance(hold_ms, true);
        self.board.hold(None);
        lines.extend(self.advance(hold_ms, true));
        lines.push(format!("OK press {key} {hold_ms}ms"));
        lines
    }

    /// Runs the board for `ms` milliseconds. With `serviced`, the main loop
    /// polls keys (and so feeds the watchdog) every millisecond.
    fn advance(&mut self, ms: u32, serviced: bool) -> Vec<String> {
        let mut lines = Vec::new();
        for _ in 0..ms {
            if self.board.run_watchdog(1) {
                let flags = ResetFlags {
                    watchdog: true,
                    ..ResetFlags::default()
                };
                lines.push("watchdog expired".to_string());
                lines.extend(self.reboot(flags));
                break;
            }

            let scheduler = self.machine.hardware.scheduler();
            if scheduler.is_running() {
                let period_ms = 1_000 / scheduler.tick_hz().max(1);
                self.machine.tick_residue_ms += 1;
                if self.machine.tick_residue_ms >= period_ms {
                    self.machine.tick_residue_ms = 0;
                    self.machine.tick.on_tick();
                }
            }

            if serviced {
                self.service(&mut lines);
            }
        }
        lines
    }

    /// One pass of the firmware main loop.
    fn service(&mut self, lines: &mut Vec<String>) {
        while let Some(key) = self.machine.hardware.read_key(false) {
            lines.push(format!("key {key}"));
        }
        if self.machine.hardware.take_force_move() {
            lines.push("force move".to_string());
        }
        if self.machine.hardware.take_display_toggle() {
            lines.push("toggle display".to_string());
        }
        if self.machine.hardware.shutdown_pending() && !self.machine.shared.is_dying() {
            lines.push("battery exhausted".to_string());
            self.game.timing.session_ms = self.time_ms();
            lines.push(self.save(SaveMode::Auto));
            let report = self.machine.hardware.enter_dying();
            lines.push(describe_speed("dying", &report));
        }
    }

    fn save(&mut self, mode: SaveMode) -> String {
        self.game.timing.session_ms = self.time_ms();
        match self.machine.hardware.save(&self.game, mode) {
            Ok(bytes) => format!("OK save {} {bytes}B", mode_label(mode)),
            Err(err) => format!("ERR save {err}"),
        }
    }

    fn load(&mut self) -> String {
        match self.machine.hardware.load() {
            Ok(loaded) => {
                self.game = loaded.state;
                format!(
                    "OK load {} session={}ms autosave={}",
                    mode_label(loaded.mode),
                    self.game.timing.session_ms,
                    on_off(self.machine.hardware.store().autosave_enabled())
                )
            }
            Err(err) => format!("ERR load {err}"),
        }
    }

    fn fault(&mut self, kind: FaultKind) -> Vec<String> {
        let report = FaultReport {
            kind,
            address: 0x0800_1F2C,
            status: fault_status(kind),
        };
        let board = Rc::clone(&self.board);

        // The user acknowledges right away.
        board.hold(Some(Key::Enter));
        let _pending = self
            .machine
            .hardware
            .fault_handler(
                &mut HostMatrix(Rc::clone(&board)),
                &mut HostClock(Rc::clone(&board)),
                &mut HostRetained(Rc::clone(&board)),
                &mut HostOutputs(Rc::clone(&board)),
            )
            .run(&report);
        board.hold(None);

        let mut lines = vec![format!("fault {kind}")];
        lines.extend(board.diagnostic().into_iter().map(|line| format!("  | {line}")));
        lines.push(format!(
            "fault-led={} core={}MHz",
            on_off(board.fault_led()),
            board.core_mhz()
        ));
        lines.extend(self.advance(FAULT_RESET_LIMIT_MS, false));
        lines
    }

    fn reboot(&mut self, flags: ResetFlags) -> Vec<String> {
        self.board.reset_peripherals();
        let (machine, report) = Machine::power_up(&self.board, flags);
        self.machine = machine;
        self.adopt_boot(report)
    }

    fn adopt_boot(&mut self, report: BootReport) -> Vec<String> {
        let restore = match &report.restore {
            BootRestore::Restored(loaded) => {
                self.game = loaded.state.clone();
                "restored"
            }
            BootRestore::NoSavedGame => {
                self.game = PersistentGameState::default();
                "fresh"
            }
            BootRestore::MemoryFault => {
                self.game = PersistentGameState::default();
                "memory-fault"
            }
        };
        vec![
            format!(
                "boot cause={} restore={restore} battery={} watchdog={}ms",
                report.reset_cause,
                if report.battery_ok { "ok" } else { "low" },
                report.watchdog_timeout_ms,
            ),
            describe_speed("boot", &report.speed),
        ]
    }

    fn status(&self) -> Vec<String> {
        let hardware = &self.machine.hardware;
        let clock = hardware.clock().config();
        let scheduler = hardware.scheduler();
        vec![
            format!(
                "time={}ms tier={} core={}MHz wait-states={} source={:?}",
                hardware.system_time_ms(),
                clock.tier,
                self.board.core_mhz(),
                self.board.wait_states(),
                clock.source,
            ),
            format!(
                "tick running={} rate={}Hz reload={}",
                scheduler.is_running(),
                scheduler.tick_hz(),
                self.board
                    .tick_reload()
                    .map_or_else(|| "-".to_string(), |reload| reload.to_string()),
            ),
            format!(
                "battery raw={} status={} sum={} entropy={:08x}",
                self.board.battery_raw(),
                hardware.battery_status(),
                self.machine.tick.battery().sum(),
                hardware.entropy(),
            ),
            format!(
                "keys queued={} mode={:?} backlight={} buzzer={}",
                hardware.queued_keys(),
                self.machine.shared.input_mode(),
                on_off(self.board.backlight()),
                on_off(self.board.buzzer()),
            ),
            format!(
                "autosave={} crystal={} watchdog={} dying={}",
                on_off(hardware.store().autosave_enabled()),
                if self.board.crystal_ok() { "ok" } else { "fail" },
                self.board
                    .watchdog_remaining_ms()
                    .map_or_else(|| "off".to_string(), |ms| format!("{ms}ms")),
                self.machine.shared.is_dying(),
            ),
        ]
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

fn help(topic: Option<&str>) -> Vec<String> {
    match topic {
        Some(target) => match HELP_TOPICS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(target))
        {
            Some((_, detail)) => vec![(*detail).to_string()],
            None => vec![
                format!("No help available for `{target}`."),
                format!(
                    "Available topics: {}",
                    HELP_TOPICS
                        .iter()
                        .map(|(name, _)| *name)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            ],
        },
        None => {
            let mut lines = vec!["Available commands:".to_string()];
            lines.extend(HELP_TOPICS.iter().map(|(_, detail)| format!("  {detail}")));
            lines
        }
    }
}

fn describe_speed(label: &str, report: &SpeedReport) -> String {
    let mut line = format!(
        "OK {label} tier={} core={}MHz source={:?}",
        report.tier, report.frequency_mhz, report.source
    );
    if report.degraded {
        line.push_str(" degraded");
    }
    if report.escalation_denied {
        line.push_str(" overclock-denied");
    }
    line
}

fn arg<'a>(args: &[&'a str], index: usize) -> Result<&'a str, String> {
    args.get(index)
        .copied()
        .ok_or_else(|| "syntax missing argument".to_string())
}

fn parse_number(word: &str) -> Result<u32, String> {
    word.parse()
        .map_err(|_| format!("syntax expected a number, got `{word}`"))
}

fn optional_number(args: &[&str], index: usize) -> Result<Option<u32>, String> {
    args.get(index).map(|word| parse_number(word)).transpose()
}

fn parse_switch(word: &str, yes: &str, no: &str) -> Result<bool, String> {
    if word.eq_ignore_ascii_case(yes) {
        Ok(true)
    } else if word.eq_ignore_ascii_case(no) {
        Ok(false)
    } else {
        Err(format!("syntax expected `{yes}` or `{no}`, got `{word}`"))
    }
}

fn parse_key(word: &str) -> Result<Key, String> {
    (1..=17)
        .filter_map(Key::from_code)
        .find(|key| key.to_string().eq_ignore_ascii_case(word))
        .ok_or_else(|| format!("syntax unknown key `{word}`"))
}

fn parse_tier(word: &str) -> Result<SpeedTier, String> {
    if word.eq_ignore_ascii_case("osc") {
        return Ok(SpeedTier::OscillatorOnly);
    }
    let mhz = parse_number(word)?;
    SpeedTier::ALL
        .into_iter()
        .find(|tier| tier.pll_mhz() == Some(mhz))
        .ok_or_else(|| format!("syntax no {mhz} MHz tier"))
}

fn parse_fault(word: &str) -> Result<FaultKind, String> {
    match word.to_ascii_lowercase().as_str() {
        "hard" => Ok(FaultKind::HardFault),
        "mem" => Ok(FaultKind::MemManage),
        "bus" => Ok(FaultKind::BusFault),
        "usage" => Ok(FaultKind::UsageFault),
        other => Err(format!("syntax unknown fault `{other}`")),
    }
}

/// A plausible status register value for each fault class.
fn fault_status(kind: FaultKind) -> u32 {
    match kind {
        FaultKind::HardFault => 0,
        FaultKind::MemManage => 0x0000_0082,
        FaultKind::BusFault => 0x0000_8200,
        FaultKind::UsageFault => 0x0002_0000,
    }
}

fn mode_label(mode: SaveMode) -> &'static str {
    match mode {
        SaveMode::Auto => "auto",
        SaveMode::Manual => "manual",
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };
        writeln!(logger.writer, "# Chess computer emulator transcript")?;
        writeln!(
            logger.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(logger.writer)?;
        logger.writer.flush()?;
        Ok(logger)
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
