//! Simulated peripherals for the host emulator.
//!
//! `SimBoard` implements every collaborator trait the scheduler drives.
//! Interrupts are modelled inside [`PowerControl::sleep`]: each sleep raises
//! exactly one interrupt, picked from the peripherals that are busy (motor
//! timer, serial transmitter, converter, LCD frame) before falling back to
//! the queue of external events the REPL injected.

use std::collections::VecDeque;

use valve_core::basic::{FixedController, Key, KeyEvent, KeyQueue, SoftClock};
use valve_core::board::{
    Analog, AutoUpdateCountdown, CalibrationReason, Clock, Comm, ConfigStore, Controller,
    ControllerErrors, DeviceConfig, Display, FatalIndicator, Keyboard, Menu, MountState, Motor,
    SampleStatus, Weekday,
};
use valve_core::pending::{ClockTickFlags, PendingWork, TaskSet};
use valve_core::power::{PowerControl, SleepDepth};
use valve_core::startup::LAYOUT_MARKER;

/// Seconds a key must stay down to count as a long press.
pub const LONG_PRESS_SECONDS: u8 = 2;
/// Valve travel per motor pulse, in percent.
pub const PULSE_STEP: u8 = 5;
/// Seconds an edit screen stays up without input.
pub const MENU_TIMEOUT: i8 = 5;
/// Set-point step per wheel detent, in hundredths of a degree.
pub const WHEEL_STEP: i16 = 50;
pub const COMFORT_SETPOINT: i16 = 2100;
pub const BATTERY_WARNING_MV: u16 = 2400;
pub const BATTERY_LOW_MV: u16 = 2200;
/// Sleeps the transmitter needs to shift out one reply.
const TX_SLEEPS: u8 = 2;
/// Sleep attempts a clock write keeps the clock domain busy for.
const CLOCK_SYNC_ATTEMPTS: u8 = 1;

/// External events injected by the REPL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Interrupt {
    Second,
    KeyDown { key: Key, long: bool },
    Serial(String),
}

/// The interrupt that ended the most recent sleep.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Wake {
    /// Nothing left to raise; the simulation is quiescent.
    None,
    MotorTimer,
    SerialTx,
    Conversion,
    LcdFrame,
    External,
}

/// Menu screens.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Screen {
    Home,
    Setpoint,
    Info,
}

/// Valve motor with a position counter and a pulse timer.
#[derive(Debug)]
pub struct SimMotor {
    pub position: u8,
    pub target: u8,
    pub running: bool,
    pub calibrated: bool,
    pub calibrations: u32,
    pub protection_runs: u32,
    pub mount: MountState,
}

impl SimMotor {
    const fn new() -> Self {
        Self {
            position: 0,
            target: 0,
            running: false,
            calibrated: false,
            calibrations: 0,
            protection_runs: 0,
            mount: MountState::Mounted,
        }
    }
}

/// Two-channel converter: temperature first, then battery.
#[derive(Debug)]
pub struct SimAnalog {
    pub supply_mv: u16,
    pub room_centi: i16,
    pub battery_mv: u16,
    pub powered: bool,
    pub converting: bool,
    pub samples: u32,
    channel: u8,
}

impl SimAnalog {
    const fn new() -> Self {
        Self {
            supply_mv: 3000,
            room_centi: 2000,
            battery_mv: 0,
            powered: false,
            converting: false,
            samples: 0,
            channel: 0,
        }
    }
}

pub struct SimBoard<'a> {
    pending: &'a PendingWork,
    clock: SoftClock,
    clock_sync: u8,
    controller: FixedController,
    motor: SimMotor,
    analog: SimAnalog,
    raw_key: Option<Key>,
    held: Option<(Key, u8)>,
    keys: KeyQueue,
    screen: Screen,
    frame: String,
    glass: String,
    lcd_dirty: bool,
    renders: u32,
    clears: u32,
    fatal: Option<FatalIndicator>,
    comm_ready: bool,
    rx: VecDeque<String>,
    replies: Vec<String>,
    tx_busy: u8,
    config: DeviceConfig,
    layout_marker: u8,
    interrupts_enabled: bool,
    queued: VecDeque<Interrupt>,
    last_wake: Wake,
}

impl<'a> SimBoard<'a> {
    pub fn new(pending: &'a PendingWork, config: DeviceConfig) -> Self {
        Self {
            pending,
            clock: SoftClock::new(Weekday::Monday, 8, 0, 0),
            clock_sync: 0,
            controller: FixedController::new(COMFORT_SETPOINT),
            motor: SimMotor::new(),
            analog: SimAnalog::new(),
            raw_key: None,
            held: None,
            keys: KeyQueue::new(),
            screen: Screen::Home,
            frame: String::new(),
            glass: String::new(),
            lcd_dirty: false,
            renders: 0,
            clears: 0,
            fatal: None,
            comm_ready: false,
            rx: VecDeque::new(),
            replies: Vec::new(),
            tx_busy: 0,
            config,
            layout_marker: LAYOUT_MARKER,
            interrupts_enabled: true,
            queued: VecDeque::new(),
            last_wake: Wake::None,
        }
    }

    /// Makes the persisted layout marker unrecognisable.
    pub fn corrupt_layout(&mut self) {
        self.layout_marker = !LAYOUT_MARKER;
    }

    pub fn raise(&mut self, interrupt: Interrupt) {
        self.queued.push_back(interrupt);
    }

    /// Events still waiting to be delivered.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn last_wake(&self) -> Wake {
        self.last_wake
    }

    /// Writes the clock; the clock domain stays busy briefly afterwards.
    pub fn set_time(&mut self, day: Weekday, hour: u8, minute: u8, second: u8) {
        self.clock.set(day, hour, minute, second);
        self.clock_sync = CLOCK_SYNC_ATTEMPTS;
    }

    pub fn clock(&self) -> &SoftClock {
        &self.clock
    }

    pub fn set_supply(&mut self, millivolts: u16) {
        self.analog.supply_mv = millivolts;
    }

    pub fn set_room_temperature(&mut self, centi_celsius: i16) {
        self.analog.room_centi = centi_celsius;
    }

    pub fn set_setpoint(&mut self, centi_celsius: i16) {
        self.controller.set_wanted(centi_celsius);
    }

    pub fn open_window(&mut self, minutes: u8) {
        self.controller.open_window(minutes);
    }

    pub fn controller(&self) -> &FixedController {
        &self.controller
    }

    pub fn motor(&self) -> &SimMotor {
        &self.motor
    }

    pub fn analog(&self) -> &SimAnalog {
        &self.analog
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// What the glass currently shows.
    pub fn glass(&self) -> &str {
        &self.glass
    }

    /// `true` when the last rendered frame is already on the glass.
    pub fn glass_is_current(&self) -> bool {
        self.glass == self.frame
    }

    pub fn renders(&self) -> (u32, u32) {
        (self.renders, self.clears)
    }

    pub fn fatal(&self) -> Option<FatalIndicator> {
        self.fatal
    }

    pub fn comm_ready(&self) -> bool {
        self.comm_ready
    }

    /// Serial replies produced since the last call.
    pub fn take_replies(&mut self) -> Vec<String> {
        std::mem::take(&mut self.replies)
    }

    fn compose(&self) -> String {
        match self.screen {
            Screen::Home => format!(
                "{} {:02}:{:02} {} {:>3}%",
                short_day(self.clock.day_of_week()),
                self.clock.hour(),
                self.clock.minute(),
                format_centi(self.controller.measured()),
                self.motor.position
            ),
            Screen::Setpoint => format!("set {}", format_centi(self.controller.wanted())),
            Screen::Info => format!(
                "bat {}mV val {}%",
                self.analog.battery_mv, self.motor.position
            ),
        }
    }

    fn deliver(&mut self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Second => self.pending.post_clock(ClockTickFlags::SECOND),
            Interrupt::KeyDown { key, long } => {
                self.raw_key = Some(key);
                self.held = long.then_some((key, 0));
                self.pending.post(TaskSet::KEYBOARD);
            }
            Interrupt::Serial(line) => {
                self.rx.push_back(line);
                self.pending.post(TaskSet::COM);
            }
        }
    }

    /// Raises the single interrupt that ends the current sleep.
    fn raise_next(&mut self) -> Wake {
        if self.tx_busy > 0 {
            self.tx_busy -= 1;
            return Wake::SerialTx;
        }
        if self.motor.running {
            if self.motor.position == self.motor.target {
                self.pending.post(TaskSet::MOTOR_STOP);
            } else {
                self.pending.post(TaskSet::MOTOR_PULSE);
            }
            return Wake::MotorTimer;
        }
        if self.analog.converting {
            self.pending.post(TaskSet::ADC);
            return Wake::Conversion;
        }
        if self.lcd_dirty {
            self.pending.post(TaskSet::LCD_REFRESH);
            return Wake::LcdFrame;
        }
        match self.queued.pop_front() {
            Some(interrupt) => {
                self.deliver(interrupt);
                Wake::External
            }
            None => Wake::None,
        }
    }

    fn reply(&mut self, line: String) {
        self.replies.push(line);
        self.tx_busy = TX_SLEEPS;
    }

    fn battery_errors(millivolts: u16) -> ControllerErrors {
        if millivolts < BATTERY_LOW_MV {
            ControllerErrors::BATTERY_LOW
        } else if millivolts < BATTERY_WARNING_MV {
            ControllerErrors::BATTERY_WARNING
        } else {
            ControllerErrors::empty()
        }
    }
}

impl Clock for SimBoard<'_> {
    fn add_one_second(&mut self) {
        self.clock.add_one_second();
    }

    fn second(&self) -> u8 {
        self.clock.second()
    }

    fn minute(&self) -> u8 {
        self.clock.minute()
    }

    fn hour(&self) -> u8 {
        self.clock.hour()
    }

    fn day_of_week(&self) -> Weekday {
        self.clock.day_of_week()
    }
}

impl Controller for SimBoard<'_> {
    fn update(&mut self, minute: bool) {
        self.controller.update(minute);
    }

    fn errors(&self) -> ControllerErrors {
        self.controller.errors()
    }

    fn valve_wanted(&self) -> u8 {
        self.controller.valve_wanted()
    }

    fn take_window_open(&mut self) -> Option<u8> {
        self.controller.take_window_open()
    }

    fn clear_forced_update(&mut self) {
        self.controller.clear_forced_update();
    }
}

impl Motor for SimBoard<'_> {
    fn goto(&mut self, target: u8) {
        self.motor.target = target.min(100);
        if self.motor.position != self.motor.target {
            self.motor.running = true;
        }
    }

    fn update_calibration(&mut self, reason: CalibrationReason) {
        match reason {
            CalibrationReason::ValveProtection => {
                // Full travel to the open stop, then back to the target.
                self.motor.protection_runs += 1;
                self.motor.position = 100;
                self.motor.running = self.motor.position != self.motor.target;
            }
            CalibrationReason::Contact(MountState::Removed) => self.motor.calibrated = false,
            CalibrationReason::Contact(MountState::Mounted) => {
                if !self.motor.calibrated {
                    self.motor.calibrated = true;
                    self.motor.calibrations += 1;
                }
            }
        }
    }

    fn poll_contact(&mut self) -> MountState {
        self.motor.mount
    }

    fn stop(&mut self) {
        self.motor.running = false;
    }

    fn pulse(&mut self) {
        let SimMotor {
            position, target, ..
        } = &mut self.motor;
        if *position < *target {
            *position = position.saturating_add(PULSE_STEP).min(*target);
        } else {
            *position = position.saturating_sub(PULSE_STEP).max(*target);
        }
    }

    fn is_idle(&self) -> bool {
        !self.motor.running
    }
}

impl Analog for SimBoard<'_> {
    fn prepare_sample(&mut self) {
        self.analog.powered = true;
        self.analog.channel = 0;
    }

    fn start_conversion(&mut self) {
        self.analog.converting = true;
    }

    fn service(&mut self) -> SampleStatus {
        self.analog.converting = false;
        if self.analog.channel == 0 {
            self.controller.set_measured(self.analog.room_centi);
            self.analog.channel = 1;
            return SampleStatus::Continue;
        }

        self.analog.battery_mv = self.analog.supply_mv;
        self.analog.powered = false;
        self.analog.samples += 1;
        self.controller
            .set_errors(Self::battery_errors(self.analog.battery_mv));
        SampleStatus::Done
    }

    fn battery_mv(&self) -> u16 {
        self.analog.battery_mv
    }
}

impl Keyboard for SimBoard<'_> {
    fn poll(&mut self) {
        if let Some(key) = self.raw_key.take() {
            self.keys.push(KeyEvent { key, long: false });
        }
    }

    fn detect_long_press(&mut self) {
        let Some((key, seconds)) = self.held else {
            return;
        };
        let seconds = seconds + 1;
        if seconds < LONG_PRESS_SECONDS {
            self.held = Some((key, seconds));
            return;
        }
        self.held = None;
        self.keys.push(KeyEvent { key, long: true });
    }

    fn has_events(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl Menu for SimBoard<'_> {
    fn evaluate(&mut self, auto_update: &mut AutoUpdateCountdown) -> bool {
        let before = self.screen;
        let mut handled = false;

        while let Some(event) = self.keys.pop() {
            handled = true;
            match (event.key, event.long) {
                (Key::WheelUp, _) => {
                    let wanted = self.controller.wanted().saturating_add(WHEEL_STEP);
                    self.controller.set_wanted(wanted);
                    self.screen = Screen::Setpoint;
                    auto_update.arm(MENU_TIMEOUT);
                }
                (Key::WheelDown, _) => {
                    let wanted = self.controller.wanted().saturating_sub(WHEEL_STEP);
                    self.controller.set_wanted(wanted);
                    self.screen = Screen::Setpoint;
                    auto_update.arm(MENU_TIMEOUT);
                }
                (Key::Comfort, _) => {
                    self.controller.set_wanted(COMFORT_SETPOINT);
                    self.screen = Screen::Setpoint;
                    auto_update.arm(MENU_TIMEOUT);
                }
                (Key::Prog, true) => {
                    self.screen = Screen::Info;
                    auto_update.arm(MENU_TIMEOUT);
                }
                (Key::Prog | Key::Auto, _) => {
                    self.screen = Screen::Home;
                    auto_update.disarm();
                }
            }
        }

        if !handled && auto_update.is_due() {
            self.screen = Screen::Home;
        }

        before != self.screen
    }
}

impl Display for SimBoard<'_> {
    fn render(&mut self, clear: bool) {
        if clear {
            self.clears += 1;
        }
        self.frame = self.compose();
        self.renders += 1;
        self.lcd_dirty = true;
    }

    fn refresh(&mut self) {
        self.glass.clone_from(&self.frame);
        self.lcd_dirty = false;
    }

    fn show_fatal(&mut self, indicator: FatalIndicator) {
        self.fatal = Some(indicator);
        self.frame = indicator.to_string();
        self.lcd_dirty = true;
    }
}

impl Comm for SimBoard<'_> {
    fn init(&mut self) {
        self.comm_ready = true;
    }

    fn parse_pending(&mut self) {
        let Some(line) = self.rx.pop_front() else {
            return;
        };
        let reply = match line.trim() {
            "V" | "v" => format!("V valve-emulator {}", env!("CARGO_PKG_VERSION")),
            "D" | "d" => format!(
                "D {} {:02}:{:02}:{:02} valve={}% wanted={} bat={}mV",
                short_day(self.clock.day_of_week()),
                self.clock.hour(),
                self.clock.minute(),
                self.clock.second(),
                self.motor.position,
                format_centi(self.controller.wanted()),
                self.analog.battery_mv
            ),
            other => format!("? {other}"),
        };
        self.reply(reply);
    }
}

impl ConfigStore for SimBoard<'_> {
    fn layout_marker(&mut self) -> u8 {
        self.layout_marker
    }

    fn read_config(&mut self) -> DeviceConfig {
        self.config
    }
}

impl PowerControl for SimBoard<'_> {
    fn disable_interrupts(&mut self) {
        self.interrupts_enabled = false;
    }

    fn enable_interrupts(&mut self) {
        self.interrupts_enabled = true;
        self.clock_sync = self.clock_sync.saturating_sub(1);
    }

    fn clock_sync_busy(&self) -> bool {
        self.clock_sync > 0
    }

    fn needs_main_clock(&self) -> bool {
        self.motor.running || self.tx_busy > 0
    }

    fn sleep(&mut self, _depth: SleepDepth) {
        debug_assert!(!self.interrupts_enabled);
        self.interrupts_enabled = true;
        self.last_wake = self.raise_next();
    }
}

fn short_day(day: Weekday) -> &'static str {
    day.label().get(..3).unwrap_or_default()
}

/// Formats hundredths of a degree as `21.50C`.
pub fn format_centi(centi: i16) -> String {
    let sign = if centi < 0 { "-" } else { "" };
    let magnitude = i32::from(centi).abs();
    format!("{sign}{}.{:02}C", magnitude / 100, magnitude % 100)
}
