//! Push-pull outputs: buzzer PB8, backlight PB9, heartbeat LED PA5, fault
//! LED PA6.

use chess_core::fault::{DiagnosticLine, FaultIo};
use chess_core::hal::SignalOutputs;
use embassy_stm32::pac;
use embassy_stm32::pac::gpio::Gpio;
use embassy_stm32::pac::gpio::vals::Moder;

const BUZZER: (Gpio, usize) = (pac::GPIOB, 8);
const BACKLIGHT: (Gpio, usize) = (pac::GPIOB, 9);
const HEARTBEAT: (Gpio, usize) = (pac::GPIOA, 5);
const FAULT_LED: (Gpio, usize) = (pac::GPIOA, 6);

pub(super) fn configure() {
    for (port, pin) in [BUZZER, BACKLIGHT, HEARTBEAT, FAULT_LED] {
        port.bsrr().write(|w| w.set_br(pin, true));
        port.moder().modify(|w| w.set_moder(pin, Moder::OUTPUT));
    }
}

fn set((port, pin): (Gpio, usize), on: bool) {
    port.bsrr().write(|w| {
        if on {
            w.set_bs(pin, true);
        } else {
            w.set_br(pin, true);
        }
    });
}

pub struct PanelOutputs;

impl SignalOutputs for PanelOutputs {
    fn set_buzzer(&mut self, on: bool) {
        set(BUZZER, on);
    }

    fn set_backlight(&mut self, on: bool) {
        set(BACKLIGHT, on);
    }

    fn set_heartbeat(&mut self, on: bool) {
        set(HEARTBEAT, on);
    }
}

impl FaultIo for PanelOutputs {
    fn set_fault_led(&mut self, on: bool) {
        set(FAULT_LED, on);
    }

    // The character display belongs to the UI task, which is gone by the
    // time a fault is handled; the lines go to the defmt RTT log instead.
    fn show_diagnostic(&mut self, lines: &[DiagnosticLine]) {
        for line in lines {
            defmt::error!("{}", line.as_str());
        }
    }
}
