//! REPL grammar for the emulator.
//!
//! Each line is one command. Keywords are case-insensitive; arguments are
//! separated by inline whitespace.

use valve_core::basic::Key;
use valve_core::board::Weekday;
use winnow::ascii::{Caseless, dec_uint, digit1, space0, space1};
use winnow::combinator::{alt, cut_err, eof, opt, peek, preceded, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{rest, take_while};

/// Parsed REPL command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    /// Raise `n` one-second clock interrupts.
    Tick(u32),
    /// Raise clock interrupts up to the next minute boundary.
    Minute,
    Key {
        key: Key,
        long: bool,
    },
    /// Deliver a line on the serial port.
    Com(String),
    /// Set the supply voltage the next battery sample reads.
    Battery(u16),
    /// Set the room temperature, in hundredths of a degree.
    Temp(i16),
    /// Set the controller set-point, in hundredths of a degree.
    Setpoint(i16),
    /// Report an open window lasting `n` minutes.
    Window(u8),
    Time {
        day: Weekday,
        hour: u8,
        minute: u8,
        second: u8,
    },
    Status,
    Trace,
    Help(Option<String>),
}

/// Help text per command, in display order.
pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("tick", "tick [n]                    - raise n one-second clock interrupts"),
    ("minute", "minute                      - tick up to the next minute boundary"),
    ("key", "key <prog|auto|c|+|-> [long] - press a key"),
    ("com", "com <text>                  - deliver a line on the serial port"),
    ("battery", "battery <mv>                - set the supply voltage"),
    ("temp", "temp <celsius>              - set the measured room temperature"),
    ("setpoint", "setpoint <celsius>          - set the wanted temperature"),
    ("window", "window <minutes>            - report an open window"),
    ("time", "time <day> <hh:mm[:ss]>     - set the clock"),
    ("status", "status                      - show board and loop state"),
    ("trace", "trace                       - dump the dispatch trace"),
    ("help", "help [topic]                - show help for a command"),
];

/// Parses one REPL line.
pub fn parse(line: &str) -> Result<Command, String> {
    terminated(command, (space0, eof))
        .parse(line.trim())
        .map_err(|err| err.to_string())
}

fn command(input: &mut &str) -> ModalResult<Command> {
    alt((
        preceded(keyword("tick"), opt(preceded(space1, count)))
            .map(|n| Command::Tick(n.unwrap_or(1))),
        keyword("minute").value(Command::Minute),
        preceded(keyword("key"), cut_err(key)),
        preceded(keyword("com"), cut_err(preceded(space1, rest)))
            .map(|text: &str| Command::Com(text.to_owned())),
        preceded(keyword("battery"), cut_err(preceded(space1, millivolts)))
            .map(Command::Battery),
        preceded(keyword("temp"), cut_err(preceded(space1, celsius))).map(Command::Temp),
        preceded(keyword("setpoint"), cut_err(preceded(space1, celsius)))
            .map(Command::Setpoint),
        preceded(keyword("window"), cut_err(preceded(space1, minutes))).map(Command::Window),
        preceded(keyword("time"), cut_err(time)),
        keyword("status").value(Command::Status),
        keyword("trace").value(Command::Trace),
        preceded(keyword("help"), opt(preceded(space1, word)))
            .map(|topic: Option<&str>| Command::Help(topic.map(str::to_owned))),
    ))
    .context(StrContext::Label("command"))
    .parse_next(input)
}

/// A case-insensitive keyword that ends at whitespace or end of line.
fn keyword<'a>(name: &'static str) -> impl Parser<&'a str, &'a str, ErrMode<ContextError>> {
    terminated(Caseless(name), peek(alt((space1, eof))))
}

fn word<'a>(input: &mut &'a str) -> ModalResult<&'a str> {
    take_while(1.., |c: char| !c.is_ascii_whitespace()).parse_next(input)
}

fn count(input: &mut &str) -> ModalResult<u32> {
    dec_uint
        .verify(|n: &u32| *n > 0)
        .context(StrContext::Expected(StrContextValue::Description(
            "positive count",
        )))
        .parse_next(input)
}

fn millivolts(input: &mut &str) -> ModalResult<u16> {
    dec_uint
        .context(StrContext::Expected(StrContextValue::Description(
            "millivolts",
        )))
        .parse_next(input)
}

fn minutes(input: &mut &str) -> ModalResult<u8> {
    dec_uint
        .verify(|n: &u8| *n > 0)
        .context(StrContext::Expected(StrContextValue::Description(
            "minutes (1-255)",
        )))
        .parse_next(input)
}

fn key(input: &mut &str) -> ModalResult<Command> {
    (
        preceded(space1, word.verify_map(Key::from_name)).context(StrContext::Expected(
            StrContextValue::Description("prog, auto, c, + or -"),
        )),
        opt(preceded(space1, Caseless("long"))),
    )
        .map(|(key, long)| Command::Key {
            key,
            long: long.is_some(),
        })
        .parse_next(input)
}

/// `21`, `21.5`, `-3.25`; converted to hundredths.
fn celsius(input: &mut &str) -> ModalResult<i16> {
    (opt('-'), digit1, opt(preceded('.', digit1)))
        .verify_map(|(sign, whole, fraction): (Option<char>, &str, Option<&str>)| {
            let whole: i32 = whole.parse().ok()?;
            let fraction = match fraction {
                None => 0,
                Some(digits) if digits.len() == 1 => digits.parse::<i32>().ok()? * 10,
                Some(digits) if digits.len() == 2 => digits.parse::<i32>().ok()?,
                Some(_) => return None,
            };
            let magnitude = whole.checked_mul(100)?.checked_add(fraction)?;
            let value = if sign.is_some() { -magnitude } else { magnitude };
            i16::try_from(value).ok()
        })
        .context(StrContext::Expected(StrContextValue::Description(
            "degrees celsius",
        )))
        .parse_next(input)
}

fn time(input: &mut &str) -> ModalResult<Command> {
    (
        preceded(space1, word.verify_map(Weekday::from_name))
            .context(StrContext::Expected(StrContextValue::Description("day"))),
        preceded(space1, two_digits),
        preceded(':', two_digits),
        opt(preceded(':', two_digits)),
    )
        .verify(|(_, hour, minute, second): &(Weekday, u8, u8, Option<u8>)| {
            *hour < 24 && *minute < 60 && second.is_none_or(|second| second < 60)
        })
        .map(|(day, hour, minute, second)| Command::Time {
            day,
            hour,
            minute,
            second: second.unwrap_or(0),
        })
        .context(StrContext::Expected(StrContextValue::Description(
            "hh:mm[:ss]",
        )))
        .parse_next(input)
}

fn two_digits(input: &mut &str) -> ModalResult<u8> {
    take_while(1..=2, |c: char| c.is_ascii_digit())
        .verify_map(|digits: &str| digits.parse().ok())
        .parse_next(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_defaults_to_one() {
        assert_eq!(parse("tick"), Ok(Command::Tick(1)));
        assert_eq!(parse("TICK 30"), Ok(Command::Tick(30)));
    }

    #[test]
    fn keyword_must_end_at_whitespace() {
        assert!(parse("ticks").is_err());
        assert!(parse("tick 0").is_err());
    }

    #[test]
    fn key_accepts_long_press_modifier() {
        assert_eq!(
            parse("key prog long"),
            Ok(Command::Key {
                key: Key::Prog,
                long: true
            })
        );
        assert_eq!(
            parse("key +"),
            Ok(Command::Key {
                key: Key::WheelUp,
                long: false
            })
        );
        assert!(parse("key escape").is_err());
    }

    #[test]
    fn com_keeps_the_rest_of_the_line() {
        assert_eq!(parse("com V 1 2"), Ok(Command::Com("V 1 2".to_owned())));
    }

    #[test]
    fn temperatures_parse_to_hundredths() {
        assert_eq!(parse("temp 19.5"), Ok(Command::Temp(1950)));
        assert_eq!(parse("setpoint 21"), Ok(Command::Setpoint(2100)));
        assert_eq!(parse("temp -2.25"), Ok(Command::Temp(-225)));
        assert!(parse("temp 1.234").is_err());
    }

    #[test]
    fn time_takes_day_and_clock() {
        assert_eq!(
            parse("time sat 09:59:58"),
            Ok(Command::Time {
                day: Weekday::Saturday,
                hour: 9,
                minute: 59,
                second: 58,
            })
        );
        assert_eq!(
            parse("time monday 7:05"),
            Ok(Command::Time {
                day: Weekday::Monday,
                hour: 7,
                minute: 5,
                second: 0,
            })
        );
        assert!(parse("time sat 24:00").is_err());
        assert!(parse("time xx 10:00").is_err());
    }

    #[test]
    fn help_takes_optional_topic() {
        assert_eq!(parse("help"), Ok(Command::Help(None)));
        assert_eq!(parse("help key"), Ok(Command::Help(Some("key".to_owned()))));
    }
}
