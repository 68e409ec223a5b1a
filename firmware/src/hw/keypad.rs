//! 4x4 key matrix on PC0..PC7 plus the light button on PB0.
//!
//! Rows sit on PC0..PC3 and columns on PC4..PC7. Whichever side is being
//! sampled is an input with pull-up; the other side is an open-drain output
//! driven low. Lines are active low.

use chess_core::hal::KeyMatrix;
use embassy_stm32::pac;
use embassy_stm32::pac::gpio::Gpio;
use embassy_stm32::pac::gpio::vals::{Idr, Moder, Ot, Pupdr};

const ROW_PINS: [usize; 4] = [0, 1, 2, 3];
const COLUMN_PINS: [usize; 4] = [4, 5, 6, 7];
const LIGHT_PIN: usize = 0;
const ENTER_ROW: usize = 2;
const ENTER_COLUMN: usize = 1;

fn matrix_port() -> Gpio {
    pac::GPIOC
}

pub(super) fn configure() {
    let port = matrix_port();
    for pin in ROW_PINS.into_iter().chain(COLUMN_PINS) {
        port.otyper().modify(|w| w.set_ot(pin, Ot::OPENDRAIN));
        port.pupdr().modify(|w| w.set_pupdr(pin, Pupdr::PULLUP));
    }
    pac::GPIOB.moder().modify(|w| w.set_moder(LIGHT_PIN, Moder::INPUT));
    pac::GPIOB
        .pupdr()
        .modify(|w| w.set_pupdr(LIGHT_PIN, Pupdr::PULLUP));
    MatrixPins.drive_columns_low();
}

fn drive_low(port: Gpio, pins: [usize; 4]) {
    for pin in pins {
        port.bsrr().write(|w| w.set_br(pin, true));
        port.moder().modify(|w| w.set_moder(pin, Moder::OUTPUT));
    }
}

fn release(port: Gpio, pins: [usize; 4]) {
    for pin in pins {
        port.moder().modify(|w| w.set_moder(pin, Moder::INPUT));
    }
}

fn asserted_mask(port: Gpio, pins: [usize; 4]) -> u8 {
    let idr = port.idr().read();
    pins.iter()
        .enumerate()
        .filter(|&(_, &pin)| idr.idr(pin) == Idr::LOW)
        .fold(0, |mask, (bit, _)| mask | (1 << bit))
}

pub struct MatrixPins;

impl KeyMatrix for MatrixPins {
    fn drive_columns_low(&mut self) {
        let port = matrix_port();
        release(port, ROW_PINS);
        drive_low(port, COLUMN_PINS);
    }

    fn read_rows(&self) -> u8 {
        asserted_mask(matrix_port(), ROW_PINS)
    }

    fn drive_rows_low(&mut self) {
        let port = matrix_port();
        release(port, COLUMN_PINS);
        drive_low(port, ROW_PINS);
    }

    fn read_columns(&self) -> u8 {
        asserted_mask(matrix_port(), COLUMN_PINS)
    }

    fn light_button_asserted(&self) -> bool {
        pac::GPIOB.idr().read().idr(LIGHT_PIN) == Idr::LOW
    }

    fn configure_enter_only(&mut self) {
        let port = matrix_port();
        release(port, ROW_PINS);
        release(port, COLUMN_PINS);
        let column = COLUMN_PINS[ENTER_COLUMN];
        port.bsrr().write(|w| w.set_br(column, true));
        port.moder().modify(|w| w.set_moder(column, Moder::OUTPUT));
    }

    fn enter_asserted(&self) -> bool {
        matrix_port().idr().read().idr(ROW_PINS[ENTER_ROW]) == Idr::LOW
    }
}
