//! Interrupt handlers. Each one acknowledges its peripheral and posts work;
//! everything else happens in the dispatch loop.

use embassy_stm32::interrupt;
use valve_core::pending::{ClockTickFlags, TaskSet};

use super::PENDING;
use crate::hw;
use crate::status;

#[interrupt]
fn RTC_TAMP() {
    hw::acknowledge_second_wakeup();
    PENDING.post_clock(ClockTickFlags::SECOND);
}

#[interrupt]
fn TIM3_TIM4() {
    hw::acknowledge_pulse_timer();
    if status::take_motor_step() {
        PENDING.post(TaskSet::MOTOR_PULSE);
    } else {
        PENDING.post(TaskSet::MOTOR_STOP);
    }
}

#[interrupt]
fn EXTI0_1() {
    key_edge();
}

#[interrupt]
fn EXTI4_15() {
    key_edge();
}

fn key_edge() {
    if hw::acknowledge_key_edges() {
        PENDING.post(TaskSet::KEYBOARD);
    }
}

#[interrupt]
fn ADC1_COMP() {
    status::record_adc_result(hw::read_conversion());
    PENDING.post(TaskSet::ADC);
}

#[interrupt]
fn USART2_LPUART2() {
    while let Some(byte) = hw::read_serial_byte() {
        if hw::receive_serial_byte(byte) {
            PENDING.post(TaskSet::COM);
        }
    }
}
