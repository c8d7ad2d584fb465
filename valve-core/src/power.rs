//! Sleep-depth policy for the idle main loop.

use core::fmt;

use crate::board::Analog;
use crate::pending::PendingWork;

/// Processor low-power states, shallowest first.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepDepth {
    /// Main clock keeps running for the fast timer or the serial transport.
    Idle,
    /// CPU core halted so an analog conversion runs without switching noise.
    AdcNoiseReduction,
    /// Only the asynchronous clock keeps running.
    PowerSave,
}

impl fmt::Display for SleepDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepDepth::Idle => f.write_str("idle"),
            SleepDepth::AdcNoiseReduction => f.write_str("adc-noise-reduction"),
            SleepDepth::PowerSave => f.write_str("power-save"),
        }
    }
}

/// Platform hooks needed to enter and leave sleep.
pub trait PowerControl {
    /// Suspends interrupt delivery.
    fn disable_interrupts(&mut self);

    /// Resumes interrupt delivery.
    fn enable_interrupts(&mut self);

    /// `true` while the clock peripheral is still synchronising an update.
    /// Sleeping in that window is forbidden.
    fn clock_sync_busy(&self) -> bool;

    /// `true` while the fast timer or the serial transport needs the main
    /// clock.
    fn needs_main_clock(&self) -> bool;

    /// Enters `depth`. Called with interrupt delivery suspended; resumes
    /// delivery immediately around the sleep primitive and returns after the
    /// waking interrupt has been serviced.
    fn sleep(&mut self, depth: SleepDepth);
}

/// Chooses the deepest sleep compatible with the pending peripheral activity.
#[must_use]
pub const fn select_sleep_depth(needs_main_clock: bool, sample_pending: bool) -> SleepDepth {
    if needs_main_clock {
        SleepDepth::Idle
    } else if sample_pending {
        SleepDepth::AdcNoiseReduction
    } else {
        SleepDepth::PowerSave
    }
}

/// Idle-time gate in front of the sleep primitive.
#[derive(Copy, Clone, Debug, Default)]
pub struct PowerStateSelector;

impl PowerStateSelector {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Sleeps when nothing is pending and the clock is quiescent.
    ///
    /// Returns the depth that was entered, or `None` when work was pending
    /// (interrupt delivery is resumed either way).
    pub fn try_sleep<P>(&self, pending: &PendingWork, platform: &mut P) -> Option<SleepDepth>
    where
        P: PowerControl + Analog,
    {
        platform.disable_interrupts();

        if !pending.is_idle() || platform.clock_sync_busy() {
            platform.enable_interrupts();
            return None;
        }

        let sample = pending.take_sample_request();
        let depth = select_sleep_depth(platform.needs_main_clock(), sample);
        if sample {
            platform.start_conversion();
        }
        platform.sleep(depth);
        Some(depth)
    }
}
