//! Dispatch-trace logging.
//!
//! The scheduler keeps its own bounded trace ring. After each loop iteration
//! the firmware forwards whatever is new to defmt (or stdout on the host) so
//! the ring can wrap without losing the log stream. Records that wrapped out
//! before they were forwarded are reported as a gap.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use valve_core::board::DeviceConfig;
use valve_core::startup::IntegrityError;
use valve_core::trace::{DispatchTrace, TraceRecord, TraceSeq};

/// Forwards new trace records to the log.
pub struct TraceLogger {
    next: TraceSeq,
    skipped: u32,
}

impl TraceLogger {
    pub const fn new() -> Self {
        Self {
            next: 0,
            skipped: 0,
        }
    }

    /// Logs every record not yet forwarded. Returns how many were logged.
    pub fn flush(&mut self, trace: &DispatchTrace) -> usize {
        let mut logged = 0;
        for record in trace.since(self.next) {
            let gap = record.seq.wrapping_sub(self.next);
            if gap != 0 {
                self.skipped = self.skipped.saturating_add(gap);
                emit_gap(gap);
            }
            emit_record(record);
            self.next = record.seq.wrapping_add(1);
            logged += 1;
        }
        logged
    }

    /// Records lost to ring wrap-around since boot.
    #[cfg(test)]
    pub const fn skipped(&self) -> u32 {
        self.skipped
    }
}

impl Default for TraceLogger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_os = "none")]
pub fn log_boot(config: &DeviceConfig) {
    defmt::info!("boot: {}", config);
}

#[cfg(not(target_os = "none"))]
pub fn log_boot(config: &DeviceConfig) {
    println!(
        "boot: adc-during-motor={} software-window={} protection={}",
        config.allow_adc_during_motor,
        config.software_window_detection,
        config.valve_protection
    );
}

#[cfg(target_os = "none")]
pub fn log_halt(error: &IntegrityError) {
    defmt::error!("halt: {}", error);
}

#[cfg(not(target_os = "none"))]
pub fn log_halt(error: &IntegrityError) {
    println!("halt: {error}");
}

#[cfg(target_os = "none")]
fn emit_record(record: &TraceRecord) {
    defmt::info!("trace #{} {}", record.seq, record.event);
}

#[cfg(not(target_os = "none"))]
fn emit_record(record: &TraceRecord) {
    println!("trace #{} {}", record.seq, record.event);
}

#[cfg(target_os = "none")]
fn emit_gap(gap: u32) {
    defmt::warn!("trace: {} records lost", gap);
}

#[cfg(not(target_os = "none"))]
fn emit_gap(gap: u32) {
    println!("trace: {gap} records lost");
}
