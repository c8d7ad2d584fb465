//! Sleep-mode entry for the STM32G0 core.
//!
//! `Idle` and `AdcNoiseReduction` both use plain sleep: the core clock stops
//! but the timers, the UART, and the ADC keep their clocks. The converter
//! runs off HSI16, which Stop mode would gate, so a pending sample must not
//! go deeper. `PowerSave` is Stop 1 with the RTC on LSE left running.

#![cfg(target_os = "none")]

use cortex_m::peripheral::SCB;
use cortex_m::{asm, interrupt};
use embassy_stm32::pac;
use valve_core::power::SleepDepth;

/// Stop 1 in PWR_CR1.LPMS.
const LPMS_STOP1: u8 = 0b001;

pub fn disable_interrupts() {
    interrupt::disable();
}

pub fn enable_interrupts() {
    unsafe {
        interrupt::enable();
    }
}

/// Enters `depth` with interrupts masked, then unmasks them.
///
/// A masked interrupt that becomes pending still wakes `wfi`, so work posted
/// after the idle check cannot be slept through. Its handler runs as soon as
/// the mask is lifted, before this returns.
pub fn enter(depth: SleepDepth) {
    // SAFETY: only the dispatch loop touches the system control register.
    let mut scb = unsafe { cortex_m::Peripherals::steal() }.SCB;
    configure(&mut scb, depth);
    asm::dsb();
    asm::wfi();
    scb.clear_sleepdeep();
    enable_interrupts();
}

fn configure(scb: &mut SCB, depth: SleepDepth) {
    match depth {
        SleepDepth::Idle | SleepDepth::AdcNoiseReduction => scb.clear_sleepdeep(),
        SleepDepth::PowerSave => {
            pac::PWR
                .cr1()
                .modify(|w| w.set_lpms(pac::pwr::vals::Lpms::from_bits(LPMS_STOP1)));
            scb.set_sleepdeep();
        }
    }
}
