use chess_core::hal::BatteryAdc;
use embassy_stm32::pac;
use embassy_stm32::pac::adc::vals::{Adcpre, SampleTime};
use embassy_stm32::pac::gpio::vals::Moder;

/// Battery divider on PB1 (ADC1_IN9).
const CHANNEL: u8 = 9;
const PIN: usize = 1;

pub(super) fn configure() {
    pac::GPIOB.moder().modify(|w| w.set_moder(PIN, Moder::ANALOG));
    // PCLK2 / 8 keeps the converter under 36 MHz up to the fastest tier.
    pac::ADC123_COMMON
        .ccr()
        .modify(|w| w.set_adcpre(Adcpre::DIV8));
    pac::ADC1
        .smpr2()
        .modify(|w| w.set_smp(usize::from(CHANNEL), SampleTime::CYCLES480));
    pac::ADC1.sqr1().modify(|w| w.set_l(0));
    pac::ADC1.sqr3().write(|w| w.set_sq(0, CHANNEL));
    pac::ADC1.cr2().modify(|w| w.set_adon(true));
}

/// ADC1 with a single regular conversion on the battery channel.
pub struct BatteryChannel;

impl BatteryChannel {
    /// Converts once and waits for the result. Only used before the tick
    /// starts, to prime the battery average.
    pub fn read_blocking(&mut self) -> u16 {
        self.start_conversion();
        while !pac::ADC1.sr().read().eoc() {}
        self.read_last()
    }
}

impl BatteryAdc for BatteryChannel {
    fn read_last(&mut self) -> u16 {
        pac::ADC1.dr().read().data()
    }

    fn start_conversion(&mut self) {
        pac::ADC1.cr2().modify(|w| w.set_swstart(true));
    }
}
