#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Line-oriented service protocol on the serial port.
//!
//! The receive interrupt feeds bytes into a [`LineBuffer`]; a carriage return
//! or line feed completes the line and the dispatch loop answers it on its
//! next pass. Requests are a single letter, optionally followed by digits:
//!
//! * `V` reports the firmware version.
//! * `D` reports the clock (ISO day of week), valve position, battery, and
//!   error flags.
//! * `T<d><hhmmss>` sets the clock, `d` being the ISO day of week.

use core::fmt::Write as _;

use heapless::{String, Vec};
use valve_core::board::{ControllerErrors, Weekday};
use winnow::combinator::{alt, eof, preceded, terminated};
use winnow::prelude::*;
use winnow::token::one_of;

pub const LINE_CAPACITY: usize = 32;
pub const REPLY_CAPACITY: usize = 96;

pub type Line = Vec<u8, LINE_CAPACITY>;
pub type Reply = String<REPLY_CAPACITY>;

/// Accumulates received bytes into lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Line,
    complete: Option<Line>,
    overflowed: bool,
}

impl LineBuffer {
    pub const fn new() -> Self {
        Self {
            partial: Vec::new(),
            complete: None,
            overflowed: false,
        }
    }

    /// Adds one received byte. Returns `true` when it completed a line.
    ///
    /// Over-long lines are dropped whole. A completed line that has not been
    /// taken yet is replaced by the newer one.
    pub fn push(&mut self, byte: u8) -> bool {
        if byte == b'\r' || byte == b'\n' {
            let line = core::mem::take(&mut self.partial);
            let overflowed = core::mem::replace(&mut self.overflowed, false);
            if line.is_empty() || overflowed {
                return false;
            }
            self.complete = Some(line);
            return true;
        }

        if self.partial.push(byte).is_err() {
            self.overflowed = true;
        }
        false
    }

    /// `true` while a line is partly received.
    pub fn is_receiving(&self) -> bool {
        !self.partial.is_empty() || self.overflowed
    }

    pub fn take_line(&mut self) -> Option<Line> {
        self.complete.take()
    }
}

/// Parsed service request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Version,
    Status,
    SetTime {
        day: Weekday,
        hour: u8,
        minute: u8,
        second: u8,
    },
    Unknown(u8),
}

impl Request {
    /// Parses one received line. Anything that is not a well-formed request
    /// is reported back as `Unknown` with its first byte.
    pub fn parse(line: &[u8]) -> Self {
        terminated(request, eof)
            .parse(line)
            .unwrap_or(Request::Unknown(line.first().copied().unwrap_or(b'?')))
    }
}

fn request(input: &mut &[u8]) -> ModalResult<Request> {
    alt((
        one_of([b'V', b'v']).value(Request::Version),
        one_of([b'D', b'd']).value(Request::Status),
        preceded(one_of([b'T', b't']), set_time),
    ))
    .parse_next(input)
}

fn set_time(input: &mut &[u8]) -> ModalResult<Request> {
    let day = one_of(b'1'..=b'7')
        .verify_map(|day: u8| Weekday::from_iso(day - b'0'))
        .parse_next(input)?;
    let hour = two_digits.verify(|hour: &u8| *hour < 24).parse_next(input)?;
    let minute = two_digits.verify(|minute: &u8| *minute < 60).parse_next(input)?;
    let second = two_digits.verify(|second: &u8| *second < 60).parse_next(input)?;
    Ok(Request::SetTime {
        day,
        hour,
        minute,
        second,
    })
}

fn two_digits(input: &mut &[u8]) -> ModalResult<u8> {
    (digit, digit)
        .map(|(tens, ones)| tens * 10 + ones)
        .parse_next(input)
}

fn digit(input: &mut &[u8]) -> ModalResult<u8> {
    one_of(b'0'..=b'9').map(|byte: u8| byte - b'0').parse_next(input)
}

/// What the status reply reports.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusLine {
    pub day: Weekday,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub valve: u8,
    pub battery_mv: u16,
    pub errors: ControllerErrors,
}

pub fn version_reply() -> Reply {
    let mut reply = Reply::new();
    let _ = write!(reply, "V valve-firmware {}", env!("CARGO_PKG_VERSION"));
    reply
}

pub fn status_reply(status: &StatusLine) -> Reply {
    let mut reply = Reply::new();
    let _ = write!(
        reply,
        "D {} {:02}:{:02}:{:02} valve={}% bat={}mV err={}",
        status.day.iso(),
        status.hour,
        status.minute,
        status.second,
        status.valve,
        status.battery_mv,
        status.errors
    );
    reply
}

pub fn unknown_reply(command: u8) -> Reply {
    let mut reply = Reply::new();
    let shown = if command.is_ascii_graphic() {
        char::from(command)
    } else {
        '?'
    };
    let _ = write!(reply, "? {shown}");
    reply
}
