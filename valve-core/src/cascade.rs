//! Once-per-second tick cascade.
//!
//! The clock interrupt posts [`TaskSet::RTC`](crate::pending::TaskSet::RTC)
//! together with its [`ClockTickFlags`]. When the dispatch loop services that
//! task it runs [`TickCascade::run`], which fans the tick out to the
//! controller, the motor, the keyboard, and the analog front end in a fixed
//! order: the valve target must be current before the motor is commanded, and
//! long-press detection must run on every tick, not only on minute boundaries.

use core::fmt;

use crate::board::{AutoUpdateCountdown, Board, CalibrationReason, DeviceConfig, Weekday};
use crate::pending::{ClockTickFlags, DisplayRequest, PendingWork};
use crate::trace::{DispatchTrace, TraceEvent};

/// Weekly slot for the anti-seizure valve exercise.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WeeklySchedule {
    pub day: Weekday,
    pub hour: u8,
    pub minute: u8,
}

impl WeeklySchedule {
    #[must_use]
    pub const fn new(day: Weekday, hour: u8, minute: u8) -> Self {
        Self { day, hour, minute }
    }

    /// Exact match on day, hour, and minute.
    #[must_use]
    pub fn matches(&self, day: Weekday, hour: u8, minute: u8) -> bool {
        self.day == day && self.hour == hour && self.minute == minute
    }
}

impl Default for WeeklySchedule {
    /// Saturday 10:00.
    fn default() -> Self {
        Self::new(Weekday::Saturday, 10, 0)
    }
}

impl fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:02}:{:02}", self.day, self.hour, self.minute)
    }
}

/// Minutes left before the open-window override lapses. Zero means inactive.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WindowCountdown(u8);

impl WindowCountdown {
    pub fn arm(&mut self, minutes: u8) {
        self.0 = minutes;
    }

    #[must_use]
    pub const fn remaining(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_active(self) -> bool {
        self.0 != 0
    }

    /// Counts one minute down. Returns `true` on the minute it expires.
    pub fn tick_minute(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        self.0 == 0
    }
}

/// What one cascade run did, for callers and tests.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct TickReport {
    /// The cascade ran past the clock-flag check.
    pub ticked: bool,
    pub minute: bool,
    pub valve_protection: bool,
    pub window_expired: bool,
    /// Target the motor was commanded to, if any.
    pub motor_target: Option<u8>,
    pub sample_requested: bool,
}

/// State carried between ticks.
#[derive(Clone, Debug)]
pub struct TickCascade {
    config: DeviceConfig,
    window: WindowCountdown,
    auto_update: AutoUpdateCountdown,
}

impl TickCascade {
    #[must_use]
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            config,
            window: WindowCountdown::default(),
            auto_update: AutoUpdateCountdown::disarmed(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DeviceConfig {
        &self.config
    }

    #[must_use]
    pub const fn window(&self) -> WindowCountdown {
        self.window
    }

    #[must_use]
    pub const fn auto_update(&self) -> AutoUpdateCountdown {
        self.auto_update
    }

    pub fn auto_update_mut(&mut self) -> &mut AutoUpdateCountdown {
        &mut self.auto_update
    }

    /// Services one clock task.
    pub fn run<B: Board>(
        &mut self,
        board: &mut B,
        pending: &PendingWork,
        trace: &mut DispatchTrace,
    ) -> TickReport {
        let mut report = TickReport::default();
        let flags = pending.clear_clock(ClockTickFlags::OVERFLOW | ClockTickFlags::SECOND);
        if flags.is_empty() {
            return report;
        }
        if flags.contains(ClockTickFlags::SECOND) {
            board.add_one_second();
        }
        report.ticked = true;

        let minute = board.second() == 0;
        report.minute = minute;

        board.update(minute);
        if self.config.software_window_detection {
            if let Some(minutes) = board.take_window_open() {
                self.window.arm(minutes);
            }
        }

        if minute {
            if self.valve_protection_due(board) {
                board.update_calibration(CalibrationReason::ValveProtection);
                trace.record(TraceEvent::Calibration(CalibrationReason::ValveProtection));
                report.valve_protection = true;
            }
            if self.config.software_window_detection && self.window.tick_minute() {
                board.clear_forced_update();
                trace.record(TraceEvent::WindowExpired);
                report.window_expired = true;
            }
        }

        if board.battery_mv() > 0 {
            let contact = board.poll_contact();
            board.update_calibration(CalibrationReason::Contact(contact));
            let target = board.valve_wanted();
            board.goto(target);
            trace.record(TraceEvent::MotorCommand(target));
            report.motor_target = Some(target);
        }

        board.detect_long_press();

        if board.is_idle() || self.config.allow_adc_during_motor {
            board.prepare_sample();
            pending.request_sample();
            trace.record(TraceEvent::SampleRequested);
            report.sample_requested = true;
        }

        self.auto_update.tick();
        pending.request_display(DisplayRequest::UPDATE);

        report
    }

    fn valve_protection_due<B: Board>(&self, board: &B) -> bool {
        !board.errors().battery_fault()
            && self
                .config
                .valve_protection
                .matches(board.day_of_week(), board.hour(), board.minute())
    }
}
