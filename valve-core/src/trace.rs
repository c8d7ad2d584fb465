//! Dispatch trace ring shared by firmware logging and the host emulator.
//!
//! The scheduler appends one record per serviced step, sleep decision, and
//! actuation it triggers. Records carry a running sequence number so readers
//! can pick up only what they have not seen yet.

use core::fmt;

use heapless::HistoryBuf;

use crate::board::{CalibrationReason, FatalIndicator};
use crate::dispatch::Step;
use crate::power::SleepDepth;

/// Number of trace records retained.
pub const TRACE_CAPACITY: usize = 64;

/// Monotonic sequence number attached to each record.
pub type TraceSeq = u32;

/// Things worth recording about one loop iteration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TraceEvent {
    Slept(SleepDepth),
    Serviced(Step),
    Calibration(CalibrationReason),
    MotorCommand(u8),
    /// A fresh sample was requested for the next sleep.
    SampleRequested,
    /// The software window countdown ran out.
    WindowExpired,
    Halted(FatalIndicator),
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::Slept(depth) => write!(f, "sleep {depth}"),
            TraceEvent::Serviced(step) => write!(f, "run {step}"),
            TraceEvent::Calibration(reason) => write!(f, "calibrate {reason}"),
            TraceEvent::MotorCommand(target) => write!(f, "motor goto {target}%"),
            TraceEvent::SampleRequested => f.write_str("sample requested"),
            TraceEvent::WindowExpired => f.write_str("window timeout expired"),
            TraceEvent::Halted(indicator) => write!(f, "halted ({indicator})"),
        }
    }
}

/// One entry in the trace ring.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TraceRecord {
    pub seq: TraceSeq,
    pub event: TraceEvent,
}

/// Fixed-capacity ring of recent scheduler activity.
pub struct DispatchTrace {
    ring: HistoryBuf<TraceRecord, TRACE_CAPACITY>,
    next_seq: TraceSeq,
}

impl DispatchTrace {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_seq: 0,
        }
    }

    /// Appends an event, evicting the oldest record when full.
    pub fn record(&mut self, event: TraceEvent) -> TraceSeq {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.ring.write(TraceRecord { seq, event });
        seq
    }

    /// Records in chronological order.
    pub fn oldest_first(&self) -> impl Iterator<Item = &TraceRecord> {
        self.ring.oldest_ordered()
    }

    /// Records with a sequence number at or after `seq`, oldest first.
    pub fn since(&self, seq: TraceSeq) -> impl Iterator<Item = &TraceRecord> {
        self.oldest_first()
            .filter(move |record| record.seq.wrapping_sub(seq) < TraceSeq::MAX / 2)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TraceRecord> {
        self.ring.recent()
    }

    /// Sequence number the next record will receive.
    #[must_use]
    pub const fn next_seq(&self) -> TraceSeq {
        self.next_seq
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.len() == 0
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

impl Default for DispatchTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_keeps_latest_records() {
        let mut trace = DispatchTrace::new();
        for _ in 0..(TRACE_CAPACITY + 3) {
            trace.record(TraceEvent::SampleRequested);
        }

        assert_eq!(trace.len(), TRACE_CAPACITY);
        let first = trace.oldest_first().next().unwrap();
        assert_eq!(first.seq, 3);
        assert_eq!(trace.latest().unwrap().seq, 66);
    }

    #[test]
    fn since_skips_records_already_seen() {
        let mut trace = DispatchTrace::new();
        trace.record(TraceEvent::Slept(SleepDepth::PowerSave));
        let mark = trace.record(TraceEvent::MotorCommand(40));
        trace.record(TraceEvent::WindowExpired);

        let seen: heapless::Vec<TraceEvent, 4> =
            trace.since(mark).map(|record| record.event).collect();

        assert_eq!(
            seen.as_slice(),
            &[TraceEvent::MotorCommand(40), TraceEvent::WindowExpired]
        );
    }
}
