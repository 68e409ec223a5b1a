//! Telemetry ring buffer and logging helpers.
//!
//! The recorder keeps the last few coordination events (boot, speed changes,
//! battery transitions, saves, shutdown) with their session timestamp so a
//! debugger can inspect the recent history after the fact. Every record is
//! mirrored to defmt on target and to stdout on the host.

#![allow(dead_code)]

use core::fmt::Write as _;

use chess_core::battery::BatteryStatus;
use chess_core::clock::{SpeedReport, SpeedTier};
use chess_core::diagnostics::ResetCause;
use chess_core::fault::FaultKind;
use chess_core::persist::{BootRestore, SaveError, SaveMode};
use chess_core::system::BootReport;
use heapless::{HistoryBuf, OldestOrdered, String};

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 32;

/// Longest rendered event description.
pub const MESSAGE_CAPACITY: usize = 64;

pub type EventId = u16;
pub type TelemetryRing = HistoryBuf<TelemetryRecord, TELEMETRY_RING_CAPACITY>;
pub type TelemetryMessage = String<MESSAGE_CAPACITY>;

/// What the saved-game check at boot found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored,
    Fresh,
    MemoryFault,
}

impl From<&BootRestore> for RestoreOutcome {
    fn from(restore: &BootRestore) -> Self {
        match restore {
            BootRestore::Restored(_) => RestoreOutcome::Restored,
            BootRestore::NoSavedGame => RestoreOutcome::Fresh,
            BootRestore::MemoryFault => RestoreOutcome::MemoryFault,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TelemetryEvent {
    Boot {
        cause: ResetCause,
        restore: RestoreOutcome,
        battery_ok: bool,
    },
    Speed {
        tier: SpeedTier,
        frequency_mhz: u32,
        degraded: bool,
        escalation_denied: bool,
    },
    Battery(BatteryStatus),
    Saved {
        mode: SaveMode,
        bytes: usize,
    },
    SaveFailed(SaveError),
    ShutdownRequested,
    Dying,
    Fault(FaultKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub timestamp_ms: u32,
    pub event: TelemetryEvent,
}

pub struct TelemetryRecorder {
    ring: TelemetryRing,
    next_event_id: EventId,
    last_battery: Option<BatteryStatus>,
}

impl TelemetryRecorder {
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
            last_battery: None,
        }
    }

    /// Returns an iterator over the recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Records the boot summary followed by the speed it settled on.
    pub fn record_boot(&mut self, report: &BootReport, timestamp_ms: u32) -> EventId {
        let id = self.record(
            TelemetryEvent::Boot {
                cause: report.reset_cause,
                restore: RestoreOutcome::from(&report.restore),
                battery_ok: report.battery_ok,
            },
            timestamp_ms,
        );
        self.record_speed(&report.speed, timestamp_ms);
        id
    }

    pub fn record_speed(&mut self, report: &SpeedReport, timestamp_ms: u32) -> EventId {
        self.record(
            TelemetryEvent::Speed {
                tier: report.tier,
                frequency_mhz: report.frequency_mhz,
                degraded: report.degraded,
                escalation_denied: report.escalation_denied,
            },
            timestamp_ms,
        )
    }

    /// Records a battery level only when it differs from the last one seen.
    pub fn record_battery(&mut self, status: BatteryStatus, timestamp_ms: u32) -> Option<EventId> {
        if self.last_battery == Some(status) {
            return None;
        }
        self.last_battery = Some(status);
        Some(self.record(TelemetryEvent::Battery(status), timestamp_ms))
    }

    pub fn record_save(
        &mut self,
        mode: SaveMode,
        result: Result<usize, SaveError>,
        timestamp_ms: u32,
    ) -> EventId {
        let event = match result {
            Ok(bytes) => TelemetryEvent::Saved { mode, bytes },
            Err(err) => TelemetryEvent::SaveFailed(err),
        };
        self.record(event, timestamp_ms)
    }

    /// Records an arbitrary event and mirrors it to the log.
    pub fn record(&mut self, event: TelemetryEvent, timestamp_ms: u32) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(TelemetryRecord {
            id,
            timestamp_ms,
            event,
        });
        emit_log(id, timestamp_ms, describe(&event).as_str());
        id
    }
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders an event as a single log line.
pub fn describe(event: &TelemetryEvent) -> TelemetryMessage {
    let mut line = TelemetryMessage::new();
    // Every rendering fits the buffer; a truncated line is still useful.
    let _ = match event {
        TelemetryEvent::Boot {
            cause,
            restore,
            battery_ok,
        } => write!(
            line,
            "boot cause={cause} restore={} battery={}",
            restore_label(*restore),
            if *battery_ok { "ok" } else { "low" }
        ),
        TelemetryEvent::Speed {
            tier,
            frequency_mhz,
            degraded,
            escalation_denied,
        } => {
            let _ = write!(line, "speed tier={tier} core={frequency_mhz}MHz");
            if *degraded {
                let _ = line.push_str(" degraded");
            }
            if *escalation_denied {
                let _ = line.push_str(" denied");
            }
            Ok(())
        }
        TelemetryEvent::Battery(status) => write!(line, "battery {status}"),
        TelemetryEvent::Saved { mode, bytes } => {
            write!(line, "save {} {bytes}B", save_mode_label(*mode))
        }
        TelemetryEvent::SaveFailed(err) => write!(line, "save failed: {err}"),
        TelemetryEvent::ShutdownRequested => write!(line, "shutdown requested"),
        TelemetryEvent::Dying => write!(line, "dying"),
        TelemetryEvent::Fault(kind) => write!(line, "fault {kind}"),
    };
    line
}

#[cfg(target_os = "none")]
fn emit_log(id: EventId, timestamp_ms: u32, message: &str) {
    defmt::info!("telemetry#{} t={}ms {}", id, timestamp_ms, message);
}

#[cfg(not(target_os = "none"))]
fn emit_log(id: EventId, timestamp_ms: u32, message: &str) {
    println!("telemetry#{id} t={timestamp_ms}ms {message}");
}

const fn restore_label(restore: RestoreOutcome) -> &'static str {
    match restore {
        RestoreOutcome::Restored => "restored",
        RestoreOutcome::Fresh => "fresh",
        RestoreOutcome::MemoryFault => "memory-fault",
    }
}

const fn save_mode_label(mode: SaveMode) -> &'static str {
    match mode {
        SaveMode::Auto => "auto",
        SaveMode::Manual => "manual",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess_core::hal::OscillatorSource;

    fn report(tier: SpeedTier, frequency_mhz: u32, degraded: bool) -> SpeedReport {
        SpeedReport {
            tier,
            source: OscillatorSource::External,
            frequency_mhz,
            degraded,
            escalation_denied: false,
        }
    }

    #[test]
    fn boot_records_summary_then_speed() {
        let mut recorder = TelemetryRecorder::new();
        let boot = BootReport {
            reset_cause: ResetCause::FaultRecovery,
            restore: BootRestore::NoSavedGame,
            speed: report(SpeedTier::OscillatorOnly, 8, false),
            watchdog_timeout_ms: 10_000,
            battery_ok: true,
        };

        let id = recorder.record_boot(&boot, 0);
        assert_eq!(id, 0);
        assert_eq!(recorder.len(), 2);

        let first = recorder.oldest_first().next().copied().unwrap();
        assert_eq!(
            describe(&first.event).as_str(),
            "boot cause=fault recovery restore=fresh battery=ok"
        );
        let latest = recorder.latest().copied().unwrap();
        assert_eq!(
            describe(&latest.event).as_str(),
            "speed tier=oscillator core=8MHz"
        );
    }

    #[test]
    fn degraded_speed_is_flagged() {
        let event = TelemetryEvent::Speed {
            tier: SpeedTier::OscillatorOnly,
            frequency_mhz: 16,
            degraded: true,
            escalation_denied: false,
        };
        assert_eq!(
            describe(&event).as_str(),
            "speed tier=oscillator core=16MHz degraded"
        );
    }

    #[test]
    fn battery_changes_are_deduplicated() {
        let mut recorder = TelemetryRecorder::new();
        assert!(recorder.record_battery(BatteryStatus::HIGH, 10).is_some());
        assert!(recorder.record_battery(BatteryStatus::HIGH, 20).is_none());
        assert!(recorder.record_battery(BatteryStatus::LOW, 30).is_some());
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn save_outcomes_are_described() {
        let mut recorder = TelemetryRecorder::new();
        recorder.record_save(SaveMode::Manual, Ok(812), 5);
        assert_eq!(
            describe(&recorder.latest().unwrap().event).as_str(),
            "save manual 812B"
        );
        recorder.record_save(SaveMode::Auto, Err(SaveError::AutosaveDisabled), 6);
        assert_eq!(
            describe(&recorder.latest().unwrap().event).as_str(),
            "save failed: autosave disabled"
        );
    }

    #[test]
    fn ring_keeps_most_recent_entries() {
        let mut recorder = TelemetryRecorder::new();
        for t in 0..40 {
            recorder.record(TelemetryEvent::Dying, t);
        }
        assert_eq!(recorder.len(), TELEMETRY_RING_CAPACITY);
        let oldest = recorder.oldest_first().next().unwrap();
        assert_eq!(oldest.timestamp_ms, 8);
        assert_eq!(recorder.latest().unwrap().id, 39);
    }
}
