#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use valve_core::basic::SoftClock;
use valve_core::board::{
    Analog, AutoUpdateCountdown, CalibrationReason, Clock, Comm, ConfigStore, Controller,
    ControllerErrors, DeviceConfig, Display, FatalIndicator, Keyboard, Menu, MountState, Motor,
    SampleStatus, Weekday,
};
use valve_core::pending::{ClockTickFlags, PendingWork, TaskSet};
use valve_core::power::{PowerControl, SleepDepth};
use valve_core::startup::LAYOUT_MARKER;

/// Every collaborator call the scheduler made, in order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Call {
    AddSecond,
    ControllerUpdate { minute: bool },
    ClearForcedUpdate,
    Calibrate(CalibrationReason),
    Goto(u8),
    PollContact,
    MotorStop,
    MotorPulse,
    PrepareSample,
    StartConversion,
    ServiceSample,
    KeyboardPoll,
    LongPress,
    MenuEvaluate,
    Render { clear: bool },
    LcdRefresh,
    ShowFatal(FatalIndicator),
    CommInit,
    CommParse,
    ReadConfig,
    Sleep(SleepDepth),
}

/// What a simulated interrupt posts when the mock wakes from sleep.
#[derive(Copy, Clone, Debug)]
pub enum Wake {
    Tasks(TaskSet),
    Clock(ClockTickFlags),
}

pub struct MockBoard {
    pub pending: Arc<PendingWork>,
    pub calls: Vec<Call>,
    pub clock: SoftClock,
    pub errors: ControllerErrors,
    pub valve_wanted: u8,
    pub window_open: Option<u8>,
    pub battery_mv: u16,
    pub motor_idle: bool,
    pub key_events: usize,
    pub menu_redraw: bool,
    pub menu_rearm: Option<i8>,
    pub sample_status: SampleStatus,
    pub layout_marker: u8,
    pub config: DeviceConfig,
    pub needs_main_clock: bool,
    pub clock_busy: bool,
    pub interrupts_enabled: bool,
    pub on_wake: VecDeque<Wake>,
    /// Clock seconds the RTC posts while `add_one_second` is running.
    pub seconds_during_advance: usize,
}

impl MockBoard {
    pub fn new(pending: Arc<PendingWork>) -> Self {
        Self {
            pending,
            calls: Vec::new(),
            clock: SoftClock::new(Weekday::Wednesday, 12, 0, 30),
            errors: ControllerErrors::empty(),
            valve_wanted: 40,
            window_open: None,
            battery_mv: 3000,
            motor_idle: true,
            key_events: 0,
            menu_redraw: false,
            menu_rearm: None,
            sample_status: SampleStatus::Done,
            layout_marker: LAYOUT_MARKER,
            config: DeviceConfig::default(),
            needs_main_clock: false,
            clock_busy: false,
            interrupts_enabled: true,
            on_wake: VecDeque::new(),
            seconds_during_advance: 0,
        }
    }

    pub fn count(&self, call: Call) -> usize {
        self.calls.iter().filter(|made| **made == call).count()
    }

    pub fn position(&self, call: Call) -> Option<usize> {
        self.calls.iter().position(|made| *made == call)
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl Clock for MockBoard {
    fn add_one_second(&mut self) {
        self.calls.push(Call::AddSecond);
        if self.seconds_during_advance > 0 {
            self.seconds_during_advance -= 1;
            self.pending.post_clock(ClockTickFlags::SECOND);
        }
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

impl Controller for MockBoard {
    fn update(&mut self, minute: bool) {
        self.calls.push(Call::ControllerUpdate { minute });
    }

    fn errors(&self) -> ControllerErrors {
        self.errors
    }

    fn valve_wanted(&self) -> u8 {
        self.valve_wanted
    }

    fn take_window_open(&mut self) -> Option<u8> {
        self.window_open.take()
    }

    fn clear_forced_update(&mut self) {
        self.calls.push(Call::ClearForcedUpdate);
    }
}

impl Motor for MockBoard {
    fn goto(&mut self, target: u8) {
        self.calls.push(Call::Goto(target));
    }

    fn update_calibration(&mut self, reason: CalibrationReason) {
        self.calls.push(Call::Calibrate(reason));
    }

    fn poll_contact(&mut self) -> MountState {
        self.calls.push(Call::PollContact);
        MountState::Mounted
    }

    fn stop(&mut self) {
        self.calls.push(Call::MotorStop);
    }

    fn pulse(&mut self) {
        self.calls.push(Call::MotorPulse);
    }

    fn is_idle(&self) -> bool {
        self.motor_idle
    }
}

impl Analog for MockBoard {
    fn prepare_sample(&mut self) {
        self.calls.push(Call::PrepareSample);
    }

    fn start_conversion(&mut self) {
        self.calls.push(Call::StartConversion);
    }

    fn service(&mut self) -> SampleStatus {
        self.calls.push(Call::ServiceSample);
        self.sample_status
    }

    fn battery_mv(&self) -> u16 {
        self.battery_mv
    }
}

impl Keyboard for MockBoard {
    fn poll(&mut self) {
        self.calls.push(Call::KeyboardPoll);
    }

    fn detect_long_press(&mut self) {
        self.calls.push(Call::LongPress);
    }

    fn has_events(&self) -> bool {
        self.key_events > 0
    }
}

impl Menu for MockBoard {
    fn evaluate(&mut self, auto_update: &mut AutoUpdateCountdown) -> bool {
        self.calls.push(Call::MenuEvaluate);
        self.key_events = 0;
        if let Some(seconds) = self.menu_rearm.take() {
            auto_update.arm(seconds);
        }
        self.menu_redraw
    }
}

impl Display for MockBoard {
    fn render(&mut self, clear: bool) {
        self.calls.push(Call::Render { clear });
    }

    fn refresh(&mut self) {
        self.calls.push(Call::LcdRefresh);
    }

    fn show_fatal(&mut self, indicator: FatalIndicator) {
        self.calls.push(Call::ShowFatal(indicator));
    }
}

impl Comm for MockBoard {
    fn init(&mut self) {
        self.calls.push(Call::CommInit);
    }

    fn parse_pending(&mut self) {
        self.calls.push(Call::CommParse);
    }
}

impl ConfigStore for MockBoard {
    fn layout_marker(&mut self) -> u8 {
        self.layout_marker
    }

    fn read_config(&mut self) -> DeviceConfig {
        self.calls.push(Call::ReadConfig);
        self.config
    }
}

impl PowerControl for MockBoard {
    fn disable_interrupts(&mut self) {
        self.interrupts_enabled = false;
    }

    fn enable_interrupts(&mut self) {
        self.interrupts_enabled = true;
    }

    fn clock_sync_busy(&self) -> bool {
        self.clock_busy
    }

    fn needs_main_clock(&self) -> bool {
        self.needs_main_clock
    }

    fn sleep(&mut self, depth: SleepDepth) {
        assert!(
            !self.interrupts_enabled,
            "sleep must be entered with interrupt delivery suspended"
        );
        self.calls.push(Call::Sleep(depth));
        self.interrupts_enabled = true;
        match self.on_wake.pop_front() {
            Some(Wake::Tasks(tasks)) => self.pending.post(tasks),
            Some(Wake::Clock(flags)) => self.pending.post_clock(flags),
            None => {}
        }
    }
}

/// Minimal xorshift generator so interleavings are reproducible.
pub struct XorShift(u64);

impl XorShift {
    pub fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    pub fn below(&mut self, bound: u64) -> u64 {
        self.next_u64() % bound
    }
}
