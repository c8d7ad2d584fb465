//! STM32G0B1 valve board.
//!
//! Pin map:
//!
//! | pin      | use                          |
//! |----------|------------------------------|
//! | PB0, PB1 | motor H-bridge open / close  |
//! | PB2      | mounting contact, low = mounted |
//! | PA0      | Prog key                     |
//! | PA1      | Auto key                     |
//! | PA4      | Comfort key                  |
//! | PA5, PA6 | wheel up / down              |
//! | PA2, PA3 | USART2 TX / RX service port  |
//!
//! The part has no segment-LCD controller, so the "glass" is the service
//! port: each refresh writes the composed frame as an `L` line.

#![cfg(target_os = "none")]

pub mod power;

use core::cell::RefCell;
use core::fmt::Write as _;
use core::ptr;

use critical_section::Mutex;
use embassy_stm32 as hal;
use embassy_stm32::adc::{Adc, SampleTime};
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::interrupt::{self, InterruptExt};
use embassy_stm32::mode::Blocking;
use embassy_stm32::pac;
use embassy_stm32::peripherals::ADC1;
use embassy_stm32::rtc::{Rtc, RtcConfig};
use embassy_stm32::usart::{self, Uart};
use heapless::String;
use valve_core::basic::{FixedController, Key, KeyEvent, KeyQueue, SoftClock};
use valve_core::board::{
    Analog, AutoUpdateCountdown, CalibrationReason, Clock, Comm, ConfigStore, Controller,
    ControllerErrors, DeviceConfig, Display, FatalIndicator, Keyboard, Menu, Motor, MountState,
    SampleStatus, Weekday,
};
use valve_core::pending::{PendingWork, TaskSet};
use valve_core::power::{PowerControl, SleepDepth};

use crate::sensor;
use crate::serial::{self, LineBuffer, Request, StatusLine};
use crate::status;
use crate::store::{ConfigRecord, RECORD_LEN};

/// Bytes received on the service port, shared with its interrupt handler.
static SERIAL_RX: Mutex<RefCell<LineBuffer>> = Mutex::new(RefCell::new(LineBuffer::new()));

/// Start of the last 2 KiB flash page.
const CONFIG_ADDR: *const [u8; RECORD_LEN] = 0x0807_F800 as *const [u8; RECORD_LEN];
/// Factory VREFINT reading at 3.0 V.
const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;
/// Factory temperature-sensor reading at 30 °C and 3.0 V.
const TS_CAL1_ADDR: *const u16 = 0x1FFF_75A8 as *const u16;

const TEMPERATURE_CHANNEL: usize = 12;
const VREFINT_CHANNEL: usize = 13;

/// Timer ticks per motor pulse, at 1 kHz.
const MOTOR_PULSE_MS: u16 = 40;
/// Pulses for a full close stroke during calibration, with margin for slip.
const CALIBRATION_STEPS: u8 = 110;
const FULLY_OPEN: u8 = 100;

const LONG_PRESS_SECONDS: u8 = 2;
const MENU_TIMEOUT: i8 = 5;
const WHEEL_STEP: i16 = 50;
const COMFORT_SETPOINT: i16 = 2100;

const BATTERY_WARNING_MV: u16 = 2400;
const BATTERY_LOW_MV: u16 = 2200;

const SERVICE_BAUD: u32 = 9600;

/// Adds a received byte to the service-port line buffer.
///
/// Returns `true` when the byte completed a line.
pub fn receive_serial_byte(byte: u8) -> bool {
    critical_section::with(|cs| {
        let mut buffer = SERIAL_RX.borrow_ref_mut(cs);
        let completed = buffer.push(byte);
        status::record_serial_active(buffer.is_receiving());
        completed
    })
}

fn take_serial_line() -> Option<serial::Line> {
    critical_section::with(|cs| SERIAL_RX.borrow_ref_mut(cs).take_line())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    Stopped,
    Opening,
    Closing,
}

/// H-bridge motor with position counted in pulses (one percent each).
struct MotorDrive {
    open: Output<'static>,
    close: Output<'static>,
    contact: Input<'static>,
    position: u8,
    target: u8,
    direction: Direction,
    calibrating: bool,
    calibrated: bool,
}

impl MotorDrive {
    fn apply(&mut self, direction: Direction) {
        self.direction = direction;
        match direction {
            Direction::Stopped => {
                self.open.set_low();
                self.close.set_low();
            }
            Direction::Opening => {
                self.close.set_low();
                self.open.set_high();
            }
            Direction::Closing => {
                self.open.set_low();
                self.close.set_high();
            }
        }
    }

    fn run(&mut self, direction: Direction, steps: u8) {
        if steps == 0 {
            self.halt();
            return;
        }
        self.apply(direction);
        status::start_motor_run(steps);
        start_pulse_timer();
    }

    /// Applies the pulses issued since the last settle to `position`.
    fn settle_pulses(&mut self) {
        let pulses = status::take_motor_pulses();
        if self.calibrating {
            return;
        }
        self.position = match self.direction {
            Direction::Opening => self.position.saturating_add(pulses).min(FULLY_OPEN),
            Direction::Closing => self.position.saturating_sub(pulses),
            Direction::Stopped => self.position,
        };
    }

    fn halt(&mut self) {
        self.settle_pulses();
        self.apply(Direction::Stopped);
        status::stop_motor_run();
        stop_pulse_timer();
    }

    fn head_for_target(&mut self) {
        if self.calibrating || !self.calibrated {
            return;
        }
        self.settle_pulses();
        let (direction, steps) = if self.target > self.position {
            (Direction::Opening, self.target - self.position)
        } else {
            (Direction::Closing, self.position - self.target)
        };
        self.run(direction, steps);
    }

    /// Drives against the closed stop to re-zero the position.
    fn calibrate(&mut self) {
        self.settle_pulses();
        self.calibrating = true;
        self.run(Direction::Closing, CALIBRATION_STEPS);
    }
}

/// Front-panel keys on pull-up inputs, pressed = low.
struct KeyPad {
    pins: [(Key, Input<'static>); 5],
    held: Option<(Key, u8)>,
    queue: KeyQueue,
}

impl KeyPad {
    fn pressed(&self) -> Option<Key> {
        self.pins
            .iter()
            .find(|(_, pin)| pin.is_low())
            .map(|(key, _)| *key)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Screen {
    Home,
    Setpoint,
    Info,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Channel {
    Supply,
    Temperature,
}

/// Everything the dispatch loop drives on this board.
pub struct ValveBoard {
    pending: &'static PendingWork,
    clock: SoftClock,
    controller: FixedController,
    motor: MotorDrive,
    keys: KeyPad,
    screen: Screen,
    frame: String<24>,
    serial: Uart<'static, Blocking>,
    _adc: Adc<'static, ADC1>,
    _rtc: Rtc,
    channel: Channel,
    supply_mv: u16,
    battery_mv: u16,
}

impl ValveBoard {
    /// Claims the pins and peripherals. Interrupt sources stay masked until
    /// [`Self::enable_wakeups`] so nothing is posted before boot completes.
    pub fn new(pending: &'static PendingWork, p: hal::Peripherals) -> Result<Self, usart::ConfigError> {
        let mut serial_config = usart::Config::default();
        serial_config.baudrate = SERVICE_BAUD;
        let serial = Uart::new_blocking(p.USART2, p.PA3, p.PA2, serial_config)?;

        let mut adc = Adc::new(p.ADC1);
        adc.set_sample_time(SampleTime::CYCLES160_5);
        // The tokens only gate the internal channels on; conversions are
        // started from the register block so they can complete in sleep.
        let _ = adc.enable_vrefint();
        let _ = adc.enable_temperature();

        let rtc = Rtc::new(p.RTC, RtcConfig::default());

        Ok(Self {
            pending,
            clock: SoftClock::default(),
            controller: FixedController::new(COMFORT_SETPOINT),
            motor: MotorDrive {
                open: Output::new(p.PB0, Level::Low, Speed::Low),
                close: Output::new(p.PB1, Level::Low, Speed::Low),
                contact: Input::new(p.PB2, Pull::Up),
                position: 0,
                target: 0,
                direction: Direction::Stopped,
                calibrating: false,
                calibrated: false,
            },
            keys: KeyPad {
                pins: [
                    (Key::Prog, Input::new(p.PA0, Pull::Up)),
                    (Key::Auto, Input::new(p.PA1, Pull::Up)),
                    (Key::Comfort, Input::new(p.PA4, Pull::Up)),
                    (Key::WheelUp, Input::new(p.PA5, Pull::Up)),
                    (Key::WheelDown, Input::new(p.PA6, Pull::Up)),
                ],
                held: None,
                queue: KeyQueue::new(),
            },
            screen: Screen::Home,
            frame: String::new(),
            serial,
            _adc: adc,
            _rtc: rtc,
            channel: Channel::Supply,
            supply_mv: 0,
            battery_mv: 0,
        })
    }

    /// Starts the one-second wakeup, the key edge interrupts, and unmasks
    /// every interrupt the dispatch loop waits on.
    pub fn enable_wakeups(&mut self) {
        start_second_wakeup();
        configure_key_edges();
        configure_pulse_timer();
        pac::ADC1.ier().modify(|w| w.set_eocie(true));

        // SAFETY: the handlers only touch atomics and the pending-work block.
        unsafe {
            interrupt::RTC_TAMP.enable();
            interrupt::TIM3_TIM4.enable();
            interrupt::EXTI0_1.enable();
            interrupt::EXTI4_15.enable();
            interrupt::ADC1_COMP.enable();
        }
    }

    fn refresh_errors(&mut self) {
        let mut errors = if self.battery_mv == 0 {
            ControllerErrors::empty()
        } else if self.battery_mv < BATTERY_LOW_MV {
            ControllerErrors::BATTERY_LOW
        } else if self.battery_mv < BATTERY_WARNING_MV {
            ControllerErrors::BATTERY_WARNING
        } else {
            ControllerErrors::empty()
        };
        if !self.motor.calibrated {
            errors = errors.union(ControllerErrors::MOUNT);
        }
        self.controller.set_errors(errors);
    }

    fn status_line(&self) -> StatusLine {
        StatusLine {
            day: self.clock.day_of_week(),
            hour: self.clock.hour(),
            minute: self.clock.minute(),
            second: self.clock.second(),
            valve: self.motor.position,
            battery_mv: self.battery_mv,
            errors: self.controller.errors(),
        }
    }

    fn compose_frame(&mut self) {
        self.frame.clear();
        let _ = match self.screen {
            Screen::Home => write!(
                self.frame,
                "{:02}:{:02} {} {:>3}%",
                self.clock.hour(),
                self.clock.minute(),
                Centi(self.controller.measured()),
                self.motor.position
            ),
            Screen::Setpoint => write!(self.frame, "set {}", Centi(self.controller.wanted())),
            Screen::Info => write!(self.frame, "bat {}mV", self.battery_mv),
        };
    }
}

/// Hundredths of a degree shown as `21.50C`.
struct Centi(i16);

impl core::fmt::Display for Centi {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}C", magnitude / 100, magnitude % 100)
    }
}

impl Clock for ValveBoard {
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

impl Controller for ValveBoard {
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

impl Motor for ValveBoard {
    fn goto(&mut self, target: u8) {
        let target = target.min(FULLY_OPEN);
        if target == self.motor.target && self.motor.direction != Direction::Stopped {
            return;
        }
        self.motor.target = target;
        self.motor.head_for_target();
    }

    fn update_calibration(&mut self, reason: CalibrationReason) {
        match reason {
            CalibrationReason::ValveProtection => {
                if self.motor.calibrated {
                    self.motor.calibrate();
                }
            }
            CalibrationReason::Contact(MountState::Removed) => {
                if self.motor.calibrated || self.motor.calibrating {
                    self.motor.calibrated = false;
                    self.motor.calibrating = false;
                    self.motor.halt();
                    self.refresh_errors();
                }
            }
            CalibrationReason::Contact(MountState::Mounted) => {
                if !self.motor.calibrated && !self.motor.calibrating {
                    self.motor.calibrate();
                }
            }
        }
    }

    fn poll_contact(&mut self) -> MountState {
        if self.motor.contact.is_low() {
            MountState::Mounted
        } else {
            MountState::Removed
        }
    }

    fn stop(&mut self) {
        if self.motor.calibrating {
            self.motor.calibrating = false;
            self.motor.calibrated = true;
            self.motor.position = 0;
            self.refresh_errors();
            self.motor.halt();
            self.motor.head_for_target();
            return;
        }
        self.motor.halt();
    }

    fn pulse(&mut self) {
        self.motor.settle_pulses();
    }

    fn is_idle(&self) -> bool {
        self.motor.direction == Direction::Stopped
    }
}

impl Analog for ValveBoard {
    fn prepare_sample(&mut self) {
        self.channel = Channel::Supply;
    }

    fn start_conversion(&mut self) {
        let channel = match self.channel {
            Channel::Supply => VREFINT_CHANNEL,
            Channel::Temperature => TEMPERATURE_CHANNEL,
        };
        let adc = pac::ADC1;
        adc.isr().write(|w| w.set_ccrdy(true));
        adc.chselr().write(|w| w.set_chsel(channel, true));
        while !adc.isr().read().ccrdy() {}
        adc.cr().modify(|w| w.set_adstart(true));
    }

    fn service(&mut self) -> SampleStatus {
        let raw = status::adc_result();
        match self.channel {
            Channel::Supply => {
                // SAFETY: factory calibration word in system memory.
                let cal = unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) };
                self.supply_mv = sensor::supply_mv(cal, raw);
                self.channel = Channel::Temperature;
                SampleStatus::Continue
            }
            Channel::Temperature => {
                // SAFETY: factory calibration word in system memory.
                let cal = unsafe { ptr::read_volatile(TS_CAL1_ADDR) };
                self.controller
                    .set_measured(sensor::temperature_centi(cal, raw, self.supply_mv));
                self.battery_mv = self.supply_mv;
                self.refresh_errors();
                self.channel = Channel::Supply;
                SampleStatus::Done
            }
        }
    }

    fn battery_mv(&self) -> u16 {
        self.battery_mv
    }
}

impl Keyboard for ValveBoard {
    fn poll(&mut self) {
        let pressed = self.keys.pressed();
        match (pressed, self.keys.held) {
            (Some(key), Some((held, _))) if key == held => {}
            (Some(key), _) => {
                self.keys.queue.push(KeyEvent { key, long: false });
                self.keys.held = Some((key, 0));
            }
            (None, _) => self.keys.held = None,
        }
    }

    fn detect_long_press(&mut self) {
        let Some((key, seconds)) = self.keys.held else {
            return;
        };
        if self.keys.pressed() != Some(key) {
            self.keys.held = None;
            return;
        }
        let seconds = seconds.saturating_add(1);
        if seconds == LONG_PRESS_SECONDS {
            self.keys.queue.push(KeyEvent { key, long: true });
        }
        self.keys.held = Some((key, seconds));
    }

    fn has_events(&self) -> bool {
        !self.keys.queue.is_empty()
    }
}

impl Menu for ValveBoard {
    fn evaluate(&mut self, auto_update: &mut AutoUpdateCountdown) -> bool {
        let before = self.screen;
        let mut handled = false;

        while let Some(event) = self.keys.queue.pop() {
            handled = true;
            match (event.key, event.long) {
                (Key::WheelUp | Key::WheelDown, _) => {
                    let wanted = self.controller.wanted();
                    let wanted = if event.key == Key::WheelUp {
                        wanted.saturating_add(WHEEL_STEP)
                    } else {
                        wanted.saturating_sub(WHEEL_STEP)
                    };
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

impl Display for ValveBoard {
    fn render(&mut self, clear: bool) {
        if clear {
            self.frame.clear();
        }
        self.compose_frame();
        self.pending.post(TaskSet::LCD_REFRESH);
    }

    fn refresh(&mut self) {
        write_line(&mut self.serial, "L ", &self.frame);
    }

    fn show_fatal(&mut self, indicator: FatalIndicator) {
        self.frame.clear();
        let _ = write!(self.frame, "{indicator}");
    }
}

impl Comm for ValveBoard {
    fn init(&mut self) {
        pac::USART2.cr1().modify(|w| w.set_rxneie(true));
        // SAFETY: the handler only touches the line buffer and atomics.
        unsafe {
            interrupt::USART2_LPUART2.enable();
        }
    }

    fn parse_pending(&mut self) {
        let Some(line) = take_serial_line() else {
            return;
        };
        let reply = match Request::parse(&line) {
            Request::Version => serial::version_reply(),
            Request::Status => serial::status_reply(&self.status_line()),
            Request::SetTime {
                day,
                hour,
                minute,
                second,
            } => {
                self.clock.set(day, hour, minute, second);
                serial::status_reply(&self.status_line())
            }
            Request::Unknown(command) => serial::unknown_reply(command),
        };
        write_line(&mut self.serial, "", &reply);
    }
}

impl ConfigStore for ValveBoard {
    fn layout_marker(&mut self) -> u8 {
        read_config_record().layout_marker()
    }

    fn read_config(&mut self) -> DeviceConfig {
        read_config_record().config()
    }
}

impl PowerControl for ValveBoard {
    fn disable_interrupts(&mut self) {
        power::disable_interrupts();
    }

    fn enable_interrupts(&mut self) {
        power::enable_interrupts();
    }

    fn clock_sync_busy(&self) -> bool {
        pac::RTC.icsr().read().initf()
    }

    fn needs_main_clock(&self) -> bool {
        status::needs_main_clock()
    }

    fn sleep(&mut self, depth: SleepDepth) {
        power::enter(depth);
    }
}

/// A failed write loses one service line; the loop keeps going.
fn write_line(serial: &mut Uart<'static, Blocking>, prefix: &str, body: &str) {
    let _ = serial.blocking_write(prefix.as_bytes());
    let _ = serial.blocking_write(body.as_bytes());
    let _ = serial.blocking_write(b"\r\n");
}

fn read_config_record() -> ConfigRecord {
    // SAFETY: the configuration page is memory-mapped flash.
    ConfigRecord::new(unsafe { ptr::read_volatile(CONFIG_ADDR) })
}

/// Programs the RTC wakeup timer for one interrupt per second off the
/// 1 Hz calendar clock.
fn start_second_wakeup() {
    let rtc = pac::RTC;
    rtc.wpr().write(|w| w.set_key(pac::rtc::vals::Key::DEACTIVATE1));
    rtc.wpr().write(|w| w.set_key(pac::rtc::vals::Key::DEACTIVATE2));
    rtc.cr().modify(|w| w.set_wute(false));
    while !rtc.icsr().read().wutwf() {}
    rtc.wutr().write(|w| w.set_wut(0));
    rtc.cr().modify(|w| {
        w.set_wucksel(pac::rtc::vals::Wucksel::SPRE);
        w.set_wutie(true);
        w.set_wute(true);
    });
    rtc.wpr().write(|w| w.set_key(pac::rtc::vals::Key::ACTIVATE));
}

/// Routes the key pins (port A) to EXTI on both edges.
fn configure_key_edges() {
    const KEY_LINES: [usize; 5] = [0, 1, 4, 5, 6];
    let exti = pac::EXTI;
    for line in KEY_LINES {
        exti.exticr(line / 4).modify(|w| w.set_exti(line % 4, 0));
        exti.rtsr(0).modify(|w| w.set_line(line, true));
        exti.ftsr(0).modify(|w| w.set_line(line, true));
        exti.imr(0).modify(|w| w.set_line(line, true));
    }
}

/// Clears pending key edges. Returns `true` if any were pending.
pub fn acknowledge_key_edges() -> bool {
    let exti = pac::EXTI;
    let rising = exti.rpr(0).read().0;
    let falling = exti.fpr(0).read().0;
    exti.rpr(0).write_value(pac::exti::regs::Lines(rising));
    exti.fpr(0).write_value(pac::exti::regs::Lines(falling));
    rising | falling != 0
}

/// TIM3 at 1 kHz with an update event every motor pulse; left stopped.
fn configure_pulse_timer() {
    pac::RCC.apbenr1().modify(|w| w.set_tim3en(true));
    let tim = pac::TIM3;
    tim.psc().write_value(15_999);
    tim.arr().write(|w| w.set_arr(MOTOR_PULSE_MS));
    tim.dier().modify(|w| w.set_uie(true));
}

fn start_pulse_timer() {
    let tim = pac::TIM3;
    tim.cnt().write(|w| w.set_cnt(0));
    tim.cr1().modify(|w| w.set_cen(true));
}

fn stop_pulse_timer() {
    pac::TIM3.cr1().modify(|w| w.set_cen(false));
}

/// Clears the pulse-timer update flag.
pub fn acknowledge_pulse_timer() {
    pac::TIM3.sr().modify(|w| w.set_uif(false));
}

/// Clears the RTC wakeup flag.
pub fn acknowledge_second_wakeup() {
    pac::RTC.scr().write(|w| w.set_cwutf(true));
}

/// Reads the finished conversion, which also clears end-of-conversion.
pub fn read_conversion() -> u16 {
    let raw = pac::ADC1.dr().read().0 & 0xFFFF;
    u16::try_from(raw).unwrap_or_default()
}

/// Reads the received byte, which also clears the receive flag.
pub fn read_serial_byte() -> Option<u8> {
    let usart = pac::USART2;
    if !usart.isr().read().rxne() {
        return None;
    }
    u8::try_from(usart.rdr().read().0 & 0xFF).ok()
}
