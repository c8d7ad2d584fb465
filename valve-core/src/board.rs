//! Collaborator traits consumed by the dispatch loop.
//!
//! Each trait is the narrow surface the scheduler drives on one peripheral
//! module. The algorithms behind them (calendar, temperature policy, motor
//! positioning, menu screens, protocol parsing) live in the implementors.
//! [`Board`] bundles them so a single value can be handed to the scheduler.

use core::fmt;

use crate::cascade::WeeklySchedule;
use crate::power::PowerControl;

/// Day of week as reported by the real-time clock.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    /// ISO numbering, Monday = 1 through Sunday = 7.
    #[must_use]
    pub const fn from_iso(day: u8) -> Option<Self> {
        match day {
            1 => Some(Weekday::Monday),
            2 => Some(Weekday::Tuesday),
            3 => Some(Weekday::Wednesday),
            4 => Some(Weekday::Thursday),
            5 => Some(Weekday::Friday),
            6 => Some(Weekday::Saturday),
            7 => Some(Weekday::Sunday),
            _ => None,
        }
    }

    #[must_use]
    pub const fn iso(self) -> u8 {
        match self {
            Weekday::Monday => 1,
            Weekday::Tuesday => 2,
            Weekday::Wednesday => 3,
            Weekday::Thursday => 4,
            Weekday::Friday => 5,
            Weekday::Saturday => 6,
            Weekday::Sunday => 7,
        }
    }

    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Weekday::Monday => Weekday::Tuesday,
            Weekday::Tuesday => Weekday::Wednesday,
            Weekday::Wednesday => Weekday::Thursday,
            Weekday::Thursday => Weekday::Friday,
            Weekday::Friday => Weekday::Saturday,
            Weekday::Saturday => Weekday::Sunday,
            Weekday::Sunday => Weekday::Monday,
        }
    }

    /// Parses an English day name or its three-letter prefix.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        if name.len() < 3 {
            return None;
        }
        Self::ALL.into_iter().find(|day| {
            day.label()
                .get(..name.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(name))
        })
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Real-time clock.
pub trait Clock {
    /// Advances the calendar by one second.
    fn add_one_second(&mut self);

    fn second(&self) -> u8;

    fn minute(&self) -> u8;

    fn hour(&self) -> u8;

    fn day_of_week(&self) -> Weekday;
}

/// Controller error bits polled by the tick cascade.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerErrors(u8);

impl ControllerErrors {
    pub const BATTERY_LOW: Self = Self(1 << 0);
    pub const BATTERY_WARNING: Self = Self(1 << 1);
    pub const MOTOR: Self = Self(1 << 2);
    pub const MOUNT: Self = Self(1 << 3);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Any condition that should suppress unattended valve exercise.
    #[must_use]
    pub const fn battery_fault(self) -> bool {
        self.intersects(Self::BATTERY_LOW.union(Self::BATTERY_WARNING))
    }
}

impl fmt::Display for ControllerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let labels = [
            (Self::BATTERY_LOW, "battery-low"),
            (Self::BATTERY_WARNING, "battery-warning"),
            (Self::MOTOR, "motor"),
            (Self::MOUNT, "mount"),
        ];
        let mut first = true;
        for (bit, label) in labels {
            if self.intersects(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(label)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Temperature-control policy.
pub trait Controller {
    /// Periodic re-evaluation; `minute` is set on minute boundaries.
    fn update(&mut self, minute: bool);

    fn errors(&self) -> ControllerErrors;

    /// Desired valve opening in percent.
    fn valve_wanted(&self) -> u8;

    /// Returns and clears a fresh open-window detection, with the number of
    /// minutes the forced-update override should stay active.
    fn take_window_open(&mut self) -> Option<u8>;

    /// Drops the forced-update override once the window timeout elapses.
    fn clear_forced_update(&mut self);
}

/// State of the valve mounting contact.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MountState {
    Mounted,
    Removed,
}

/// Why the motor should refresh its calibration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CalibrationReason {
    /// Weekly full-travel run against valve seizure.
    ValveProtection,
    /// Routine refresh driven by the mounting contact.
    Contact(MountState),
}

impl fmt::Display for CalibrationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationReason::ValveProtection => f.write_str("valve-protection"),
            CalibrationReason::Contact(MountState::Mounted) => f.write_str("contact-mounted"),
            CalibrationReason::Contact(MountState::Removed) => f.write_str("contact-removed"),
        }
    }
}

/// Valve motor driver.
pub trait Motor {
    /// Commands the valve toward `target` percent open.
    fn goto(&mut self, target: u8);

    fn update_calibration(&mut self, reason: CalibrationReason);

    /// Samples the mounting contact.
    fn poll_contact(&mut self) -> MountState;

    /// Handles the stop signal raised by the motor timer.
    fn stop(&mut self);

    /// Handles one periodic pulse while the motor is moving.
    fn pulse(&mut self);

    fn is_idle(&self) -> bool;
}

/// Result of servicing a finished analog conversion.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SampleStatus {
    /// All channels for this cycle are converted.
    Done,
    /// Another channel should be converted on the next sleep.
    Continue,
}

/// Analog front end (temperature and battery).
pub trait Analog {
    /// Powers the converter up ahead of a sampling cycle.
    fn prepare_sample(&mut self);

    /// Starts a conversion; the result is read after the next wake.
    fn start_conversion(&mut self);

    fn service(&mut self) -> SampleStatus;

    /// Averaged battery voltage in millivolts, zero while unknown.
    fn battery_mv(&self) -> u16;
}

/// Keyboard scanner.
pub trait Keyboard {
    /// Reads the raw key state after a pin change and queues key events.
    fn poll(&mut self);

    /// Time-based long-press detection, called every tick.
    fn detect_long_press(&mut self);

    fn has_events(&self) -> bool;
}

/// Signed seconds counter that forces a menu refresh when it reaches zero.
///
/// Negative values mean disarmed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AutoUpdateCountdown(i8);

impl AutoUpdateCountdown {
    #[must_use]
    pub const fn disarmed() -> Self {
        Self(-1)
    }

    pub fn arm(&mut self, seconds: i8) {
        self.0 = seconds;
    }

    pub fn disarm(&mut self) {
        self.0 = -1;
    }

    #[must_use]
    pub const fn value(self) -> i8 {
        self.0
    }

    #[must_use]
    pub const fn is_due(self) -> bool {
        self.0 == 0
    }

    /// Counts down once per tick while non-negative, so a due countdown
    /// disarms itself on the following tick.
    pub fn tick(&mut self) {
        if self.0 >= 0 {
            self.0 -= 1;
        }
    }
}

impl Default for AutoUpdateCountdown {
    fn default() -> Self {
        Self::disarmed()
    }
}

/// Menu state machine.
pub trait Menu {
    /// Consumes pending key events and advances the menu. The menu may re-arm
    /// `auto_update`. Returns `true` when the screen needs a full redraw.
    fn evaluate(&mut self, auto_update: &mut AutoUpdateCountdown) -> bool;
}

/// Fixed glyphs shown for unrecoverable faults.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalIndicator {
    EepromError,
}

impl fmt::Display for FatalIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalIndicator::EepromError => f.write_str("EEPr"),
        }
    }
}

/// Display renderer.
pub trait Display {
    /// Renders the current menu view, blanking first when `clear` is set.
    fn render(&mut self, clear: bool);

    /// Pushes the segment buffer to the glass.
    fn refresh(&mut self);

    fn show_fatal(&mut self, indicator: FatalIndicator);
}

/// Serial communication transport.
pub trait Comm {
    fn init(&mut self);

    fn parse_pending(&mut self);
}

/// Settings read from the persisted configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceConfig {
    /// Keep sampling while the motor moves (otherwise samples wait for idle).
    pub allow_adc_during_motor: bool,
    /// Window detection is emulated in software rather than by a sensor.
    pub software_window_detection: bool,
    pub valve_protection: WeeklySchedule,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            allow_adc_during_motor: false,
            software_window_detection: true,
            valve_protection: WeeklySchedule::default(),
        }
    }
}

/// Persisted configuration store.
pub trait ConfigStore {
    fn layout_marker(&mut self) -> u8;

    fn read_config(&mut self) -> DeviceConfig;
}

/// Everything the scheduler drives, as one value.
pub trait Board:
    Clock + Controller + Motor + Analog + Keyboard + Menu + Display + Comm + ConfigStore + PowerControl
{
}

impl<T> Board for T where
    T: Clock
        + Controller
        + Motor
        + Analog
        + Keyboard
        + Menu
        + Display
        + Comm
        + ConfigStore
        + PowerControl
{
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_accepts_three_letter_prefix() {
        assert_eq!(Weekday::from_name("SAT"), Some(Weekday::Saturday));
        assert_eq!(Weekday::from_name("thurs"), Some(Weekday::Thursday));
        assert_eq!(Weekday::from_name("su"), None);
        assert_eq!(Weekday::from_name("sundays"), None);
    }

    #[test]
    fn weekday_iso_numbering_round_trips() {
        for day in Weekday::ALL {
            assert_eq!(Weekday::from_iso(day.iso()), Some(day));
        }
        assert_eq!(Weekday::Sunday.next(), Weekday::Monday);
    }

    #[test]
    fn countdown_is_due_once_then_disarms() {
        let mut countdown = AutoUpdateCountdown::disarmed();
        countdown.arm(1);
        countdown.tick();
        assert!(countdown.is_due());

        countdown.tick();
        assert!(!countdown.is_due());
        assert_eq!(countdown.value(), -1);

        countdown.tick();
        assert_eq!(countdown.value(), -1);
    }

    #[test]
    fn only_battery_errors_count_as_battery_fault() {
        assert!(ControllerErrors::BATTERY_WARNING.battery_fault());
        assert!(
            !ControllerErrors::MOTOR
                .union(ControllerErrors::MOUNT)
                .battery_fault()
        );
    }
}
