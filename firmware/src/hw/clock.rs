use chess_core::config::{EXTERNAL_OSC_MHZ, INTERNAL_OSC_MHZ};
use chess_core::hal::{
    BusDividers, ClockHardware, OscillatorSource, PllConfig, SystemClockSource, VoltageScale,
};
use embassy_stm32::pac;
use embassy_stm32::pac::flash::vals::Latency;
use embassy_stm32::pac::pwr::vals::Vos;
use embassy_stm32::pac::rcc::vals::{Pllm, Plln, Pllp, Pllq, Pllsrc, Ppre, Sw};

/// RCC, FLASH and PWR registers.
pub struct RccClock;

impl ClockHardware for RccClock {
    fn enable_power_interface(&mut self) {
        pac::RCC.apb1enr().modify(|w| w.set_pwren(true));
    }

    fn set_voltage_scale(&mut self, scale: VoltageScale) {
        let vos = match scale {
            VoltageScale::Scale1 => Vos::SCALE1,
            VoltageScale::Scale2 => Vos::SCALE2,
        };
        pac::PWR.cr1().modify(|w| w.set_vos(vos));
    }

    // The F405 regulator has no VOS ready flag; the new scale is in effect
    // by the time the PLL reports lock.
    fn regulator_ready(&self) -> bool {
        true
    }

    fn flash_wait_states(&self) -> u8 {
        pac::FLASH.acr().read().latency().to_bits()
    }

    fn set_flash_wait_states(&mut self, wait_states: u8) {
        pac::FLASH
            .acr()
            .modify(|w| w.set_latency(Latency::from_bits(wait_states)));
    }

    fn start_external_oscillator(&mut self) {
        pac::RCC.cr().modify(|w| w.set_hseon(true));
    }

    fn stop_external_oscillator(&mut self) {
        pac::RCC.cr().modify(|w| w.set_hseon(false));
    }

    fn external_oscillator_ready(&self) -> bool {
        pac::RCC.cr().read().hserdy()
    }

    fn select_system_clock(&mut self, source: SystemClockSource) {
        let sw = match source {
            SystemClockSource::Internal => Sw::HSI,
            SystemClockSource::External => Sw::HSE,
            SystemClockSource::Pll => Sw::PLL1_P,
        };
        pac::RCC.cfgr().modify(|w| w.set_sw(sw));
        while pac::RCC.cfgr().read().sws() != sw {}
    }

    fn system_clock_source(&self) -> SystemClockSource {
        match pac::RCC.cfgr().read().sws() {
            Sw::HSE => SystemClockSource::External,
            Sw::PLL1_P => SystemClockSource::Pll,
            _ => SystemClockSource::Internal,
        }
    }

    fn disable_pll(&mut self) {
        pac::RCC.cr().modify(|w| w.set_pllon(false));
        while pac::RCC.cr().read().pllrdy() {}
    }

    fn configure_pll(&mut self, config: PllConfig) {
        pac::RCC.pllcfgr().modify(|w| {
            w.set_pllsrc(match config.source {
                OscillatorSource::External => Pllsrc::HSE,
                OscillatorSource::Internal => Pllsrc::HSI,
            });
            w.set_pllm(Pllm::from_bits(config.m));
            w.set_plln(Plln::from_bits(config.n));
            w.set_pllp(Pllp::from_bits(config.p / 2 - 1));
            w.set_pllq(Pllq::from_bits(config.q));
        });
    }

    fn enable_pll(&mut self) {
        pac::RCC.cr().modify(|w| w.set_pllon(true));
    }

    fn pll_ready(&self) -> bool {
        pac::RCC.cr().read().pllrdy()
    }

    fn bus_dividers(&self) -> BusDividers {
        let cfgr = pac::RCC.cfgr().read();
        BusDividers {
            apb1: divisor_from_ppre(cfgr.ppre1()),
            apb2: divisor_from_ppre(cfgr.ppre2()),
        }
    }

    fn set_bus_dividers(&mut self, dividers: BusDividers) {
        pac::RCC.cfgr().modify(|w| {
            w.set_ppre1(ppre_from_divisor(dividers.apb1));
            w.set_ppre2(ppre_from_divisor(dividers.apb2));
        });
    }
}

fn ppre_from_divisor(divisor: u8) -> Ppre {
    match divisor {
        2 => Ppre::DIV2,
        4 => Ppre::DIV4,
        8 => Ppre::DIV8,
        16 => Ppre::DIV16,
        _ => Ppre::DIV1,
    }
}

fn divisor_from_ppre(ppre: Ppre) -> u8 {
    match ppre {
        Ppre::DIV2 => 2,
        Ppre::DIV4 => 4,
        Ppre::DIV8 => 8,
        Ppre::DIV16 => 16,
        _ => 1,
    }
}

/// Core frequency decoded from the live clock tree.
///
/// The busy-wait clock uses this rather than the clock manager's view so it
/// stays correct inside the fault handler, which rebuilds the manager from
/// reset defaults.
pub fn core_mhz() -> u32 {
    match pac::RCC.cfgr().read().sws() {
        Sw::HSE => EXTERNAL_OSC_MHZ,
        Sw::PLL1_P => {
            let pll = pac::RCC.pllcfgr().read();
            let input = if pll.pllsrc() == Pllsrc::HSE {
                EXTERNAL_OSC_MHZ
            } else {
                INTERNAL_OSC_MHZ
            };
            let m = u32::from(pll.pllm().to_bits()).max(1);
            let n = u32::from(pll.plln().to_bits());
            let p = (u32::from(pll.pllp().to_bits()) + 1) * 2;
            input * n / m / p
        }
        _ => INTERNAL_OSC_MHZ,
    }
}
