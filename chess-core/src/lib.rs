#![no_std]

// Hardware coordination and persistence layer for the handheld chess computer.
//
// Everything in this crate stays portable between the STM32 firmware and host
// tooling: register access lives behind the traits in `hal`, and the only
// state shared with the tick interrupt is the atomics in `scheduler`.

pub mod battery;
pub mod clock;
pub mod config;
pub mod diagnostics;
pub mod fault;
pub mod hal;
pub mod keyboard;
pub mod persist;
pub mod scheduler;
pub mod signals;
pub mod system;
pub mod watchdog;
