#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Flags shared between interrupt handlers and the dispatch loop.
//!
//! Handlers publish peripheral activity here so the power selector can ask
//! whether the main clock must stay on without borrowing any driver state.

use portable_atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};

/// Motor pulses left before the current run reaches its target.
static MOTOR_STEPS_LEFT: AtomicU8 = AtomicU8::new(0);
/// Pulses the timer has issued that the dispatch loop has not yet applied to
/// the tracked position.
static MOTOR_PULSES_UNAPPLIED: AtomicU8 = AtomicU8::new(0);
/// The motor pulse timer is counting.
static MOTOR_TIMER_RUNNING: AtomicBool = AtomicBool::new(false);
/// A serial line is half received or a reply is still draining.
static SERIAL_ACTIVE: AtomicBool = AtomicBool::new(false);
/// Raw value of the last completed conversion.
static ADC_RESULT: AtomicU16 = AtomicU16::new(0);

/// Starts a motor run of `steps` pulses.
pub fn start_motor_run(steps: u8) {
    MOTOR_STEPS_LEFT.store(steps, Ordering::Relaxed);
    MOTOR_TIMER_RUNNING.store(steps != 0, Ordering::Relaxed);
}

/// Ends the motor run, whether or not it reached its target.
pub fn stop_motor_run() {
    MOTOR_STEPS_LEFT.store(0, Ordering::Relaxed);
    MOTOR_TIMER_RUNNING.store(false, Ordering::Relaxed);
}

/// Consumes one pulse from the current run.
///
/// Returns `false` once the run has no pulses left, which is the timer
/// handler's cue to post a stop instead of another pulse.
pub fn take_motor_step() -> bool {
    let taken = MOTOR_STEPS_LEFT
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |left| {
            left.checked_sub(1)
        })
        .is_ok();
    if taken {
        MOTOR_PULSES_UNAPPLIED.fetch_add(1, Ordering::Relaxed);
    }
    taken
}

/// Returns the pulses issued since the last call and resets the count.
///
/// Pulse posts coalesce, so one serviced pulse task may stand for several
/// timer interrupts.
pub fn take_motor_pulses() -> u8 {
    MOTOR_PULSES_UNAPPLIED.swap(0, Ordering::Relaxed)
}

#[cfg(test)]
pub fn motor_steps_left() -> u8 {
    MOTOR_STEPS_LEFT.load(Ordering::Relaxed)
}

pub fn record_serial_active(active: bool) {
    SERIAL_ACTIVE.store(active, Ordering::Relaxed);
}

pub fn record_adc_result(raw: u16) {
    ADC_RESULT.store(raw, Ordering::Relaxed);
}

pub fn adc_result() -> u16 {
    ADC_RESULT.load(Ordering::Relaxed)
}

/// `true` while the motor timer or the serial port needs the main clock.
pub fn needs_main_clock() -> bool {
    MOTOR_TIMER_RUNNING.load(Ordering::Relaxed) || SERIAL_ACTIVE.load(Ordering::Relaxed)
}
