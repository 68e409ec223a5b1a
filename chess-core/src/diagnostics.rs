//! Reset-cause classification.

use core::fmt;

use crate::hal::RetainedRegister;

/// Written to the retained register right before a deliberate watchdog reset.
pub const INTENTIONAL_RESET_MARKER: u32 = 0xDEAD_C0DE;

/// Raw reset flags latched by the reset controller.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResetFlags {
    pub power_on: bool,
    pub watchdog: bool,
    pub external_pin: bool,
    pub software: bool,
    pub brown_out: bool,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResetCause {
    PowerOn,
    BrownOut,
    /// Watchdog expired without the fault handler asking for it.
    Watchdog,
    /// The fault handler forced the watchdog reset.
    FaultRecovery,
    ExternalPin,
    Software,
    Unknown,
}

impl fmt::Display for ResetCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResetCause::PowerOn => "power-on",
            ResetCause::BrownOut => "brown-out",
            ResetCause::Watchdog => "watchdog",
            ResetCause::FaultRecovery => "fault recovery",
            ResetCause::ExternalPin => "reset pin",
            ResetCause::Software => "software",
            ResetCause::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Classifies the last reset. Power-on wins over everything because the pin
/// flag is always latched alongside it.
#[must_use]
pub fn classify(flags: ResetFlags, marker: u32) -> ResetCause {
    if flags.power_on {
        ResetCause::PowerOn
    } else if flags.brown_out {
        ResetCause::BrownOut
    } else if flags.watchdog {
        if marker == INTENTIONAL_RESET_MARKER {
            ResetCause::FaultRecovery
        } else {
            ResetCause::Watchdog
        }
    } else if flags.software {
        ResetCause::Software
    } else if flags.external_pin {
        ResetCause::ExternalPin
    } else {
        ResetCause::Unknown
    }
}

/// Reads and clears the marker, then classifies.
pub fn take_reset_cause<R: RetainedRegister>(flags: ResetFlags, retained: &mut R) -> ResetCause {
    let marker = retained.read();
    retained.write(0);
    classify(flags, marker)
}
