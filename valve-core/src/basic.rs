//! Minimal collaborator implementations shared by the emulator and firmware.
//!
//! Provides a second counter with day-of-week rollover, a bounded key-event
//! queue, and a proportional valve controller.
//! Calendar dates, alarms, and real temperature policy are not modelled.

use heapless::Deque;

use crate::board::{Clock, Controller, ControllerErrors, Weekday};

/// Wall clock that only tracks time of day and day of week.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SoftClock {
    day: Weekday,
    hour: u8,
    minute: u8,
    second: u8,
}

impl SoftClock {
    /// Out-of-range fields are clamped.
    #[must_use]
    pub const fn new(day: Weekday, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            day,
            hour: clamp(hour, 23),
            minute: clamp(minute, 59),
            second: clamp(second, 59),
        }
    }

    /// Sets the time; out-of-range fields are clamped.
    pub fn set(&mut self, day: Weekday, hour: u8, minute: u8, second: u8) {
        *self = Self::new(day, hour, minute, second);
    }
}

const fn clamp(value: u8, max: u8) -> u8 {
    if value > max { max } else { value }
}

impl Default for SoftClock {
    fn default() -> Self {
        Self::new(Weekday::Monday, 0, 0, 0)
    }
}

impl Clock for SoftClock {
    fn add_one_second(&mut self) {
        self.second += 1;
        if self.second < 60 {
            return;
        }
        self.second = 0;
        self.minute += 1;
        if self.minute < 60 {
            return;
        }
        self.minute = 0;
        self.hour += 1;
        if self.hour < 24 {
            return;
        }
        self.hour = 0;
        self.day = self.day.next();
    }

    fn second(&self) -> u8 {
        self.second
    }

    fn minute(&self) -> u8 {
        self.minute
    }

    fn hour(&self) -> u8 {
        self.hour
    }

    fn day_of_week(&self) -> Weekday {
        self.day
    }
}

/// Front-panel keys.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Key {
    Prog,
    Auto,
    Comfort,
    WheelUp,
    WheelDown,
}

impl Key {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            n if n.eq_ignore_ascii_case("prog") => Some(Key::Prog),
            n if n.eq_ignore_ascii_case("auto") => Some(Key::Auto),
            n if n.eq_ignore_ascii_case("c") || n.eq_ignore_ascii_case("comfort") => {
                Some(Key::Comfort)
            }
            "+" => Some(Key::WheelUp),
            "-" => Some(Key::WheelDown),
            n if n.eq_ignore_ascii_case("up") => Some(Key::WheelUp),
            n if n.eq_ignore_ascii_case("down") => Some(Key::WheelDown),
            _ => None,
        }
    }
}

/// A key press as seen by the menu.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyEvent {
    pub key: Key,
    pub long: bool,
}

/// Depth of the key-event queue.
pub const KEY_QUEUE_DEPTH: usize = 8;

/// Bounded key-event queue; the oldest event is dropped when full.
#[derive(Clone, Debug, Default)]
pub struct KeyQueue {
    events: Deque<KeyEvent, KEY_QUEUE_DEPTH>,
}

impl KeyQueue {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            events: Deque::new(),
        }
    }

    pub fn push(&mut self, event: KeyEvent) {
        if self.events.is_full() {
            let _ = self.events.pop_front();
        }
        let _ = self.events.push_back(event);
    }

    pub fn pop(&mut self) -> Option<KeyEvent> {
        self.events.pop_front()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Proportional valve controller with a fixed gain.
///
/// Temperatures are in hundredths of a degree Celsius.
#[derive(Clone, Debug)]
pub struct FixedController {
    wanted: i16,
    measured: i16,
    valve: u8,
    errors: ControllerErrors,
    window_open: Option<u8>,
    forced_update: bool,
    minutes: u32,
}

impl FixedController {
    /// Valve percent per degree of error.
    pub const GAIN: i32 = 20;

    #[must_use]
    pub const fn new(wanted: i16) -> Self {
        Self {
            wanted,
            measured: wanted,
            valve: 50,
            errors: ControllerErrors::empty(),
            window_open: None,
            forced_update: false,
            minutes: 0,
        }
    }

    pub fn set_wanted(&mut self, centi_celsius: i16) {
        self.wanted = centi_celsius;
    }

    #[must_use]
    pub const fn wanted(&self) -> i16 {
        self.wanted
    }

    pub fn set_measured(&mut self, centi_celsius: i16) {
        self.measured = centi_celsius;
    }

    #[must_use]
    pub const fn measured(&self) -> i16 {
        self.measured
    }

    pub fn set_errors(&mut self, errors: ControllerErrors) {
        self.errors = errors;
    }

    /// Flags an open window; the override lasts `minutes`.
    pub fn open_window(&mut self, minutes: u8) {
        self.window_open = Some(minutes);
        self.forced_update = true;
    }

    #[must_use]
    pub const fn forced_update(&self) -> bool {
        self.forced_update
    }

    /// Minute boundaries seen so far.
    #[must_use]
    pub const fn minutes(&self) -> u32 {
        self.minutes
    }
}

impl Controller for FixedController {
    fn update(&mut self, minute: bool) {
        if minute {
            self.minutes = self.minutes.wrapping_add(1);
        }
        if self.forced_update {
            self.valve = 0;
            return;
        }
        let error = i32::from(self.wanted) - i32::from(self.measured);
        let output = 50 + error * Self::GAIN / 100;
        self.valve = u8::try_from(output.clamp(0, 100)).unwrap_or(100);
    }

    fn errors(&self) -> ControllerErrors {
        self.errors
    }

    fn valve_wanted(&self) -> u8 {
        self.valve
    }

    fn take_window_open(&mut self) -> Option<u8> {
        self.window_open.take()
    }

    fn clear_forced_update(&mut self) {
        self.forced_update = false;
    }
}
