use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant as HostInstant};

use valve_core::board::{Clock, Controller, DeviceConfig};
use valve_core::dispatch::{Cycle, Scheduler, Step};
use valve_core::pending::PendingWork;
use valve_core::startup::{self, IntegrityError};
use valve_core::trace::{DispatchTrace, TraceEvent, TraceRecord, TraceSeq};

use crate::command::{self, Command, HELP_TOPICS};
use crate::sim::{Interrupt, SimBoard, Wake, format_centi};

/// Upper bound on loop iterations per command, in case a collaborator keeps
/// re-posting work forever.
const MAX_CYCLES_PER_COMMAND: usize = 20_000;

/// Canned device configurations selectable from the command line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Profile {
    Default,
    AdcDuringMotor,
    HardwareWindow,
}

impl Profile {
    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("default") {
            Ok(Self::Default)
        } else if tag.eq_ignore_ascii_case("adc-during-motor") {
            Ok(Self::AdcDuringMotor)
        } else if tag.eq_ignore_ascii_case("hw-window") {
            Ok(Self::HardwareWindow)
        } else {
            Err(format!("Unknown profile `{tag}`"))
        }
    }

    pub fn config(self) -> DeviceConfig {
        let base = DeviceConfig::default();
        match self {
            Profile::Default => base,
            Profile::AdcDuringMotor => DeviceConfig {
                allow_adc_during_motor: true,
                ..base
            },
            Profile::HardwareWindow => DeviceConfig {
                software_window_detection: false,
                ..base
            },
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Profile::Default => "default",
            Profile::AdcDuringMotor => "adc-during-motor",
            Profile::HardwareWindow => "hw-window",
        }
    }
}

/// Command-line options.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    pub profile: Profile,
    pub corrupt_layout: bool,
    pub transcript: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            profile: Profile::Default,
            corrupt_layout: false,
            transcript: None,
        }
    }
}

enum Device<'a> {
    Running(Scheduler<'a, SimBoard<'a>>),
    Halted {
        board: SimBoard<'a>,
        error: IntegrityError,
        trace: DispatchTrace,
    },
}

pub struct Session<'a> {
    device: Device<'a>,
    transcript: Option<TranscriptLogger>,
    started_at: HostInstant,
    trace_seen: TraceSeq,
    boot_report: Vec<String>,
}

impl<'a> Session<'a> {
    /// Builds the simulated board and runs startup validation on it.
    pub fn new(pending: &'a PendingWork, options: &Options) -> io::Result<Self> {
        let transcript = options
            .transcript
            .as_deref()
            .map(|path| TranscriptLogger::new(path, options.profile))
            .transpose()?;

        let mut board = SimBoard::new(pending, options.profile.config());
        if options.corrupt_layout {
            board.corrupt_layout();
        }

        let mut boot_report = Vec::new();
        let device = match startup::boot(&mut board) {
            Ok(config) => {
                boot_report.push(format!(
                    "boot ok: profile={} adc-during-motor={} software-window={} protection={}",
                    options.profile.tag(),
                    config.allow_adc_during_motor,
                    config.software_window_detection,
                    config.valve_protection
                ));
                Device::Running(Scheduler::new(board, pending, config))
            }
            Err(error) => {
                let mut trace = DispatchTrace::new();
                trace.record(TraceEvent::Halted(error.indicator()));
                boot_report.push(format!("HALT {error}"));
                boot_report.push(format!("lcd: {}", board.glass()));
                Device::Halted {
                    board,
                    error,
                    trace,
                }
            }
        };

        let mut session = Self {
            device,
            transcript,
            started_at: HostInstant::now(),
            trace_seen: 0,
            boot_report,
        };
        let report = session.boot_report.clone();
        session.record_output(Duration::ZERO, &report)?;
        Ok(session)
    }

    /// Lines describing how startup went.
    pub fn boot_report(&self) -> &[String] {
        &self.boot_report
    }

    pub fn is_halted(&self) -> bool {
        matches!(self.device, Device::Halted { .. })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.append_line(elapsed, TranscriptRole::Host, trimmed)?;
        }

        let lines = match command::parse(trimmed) {
            Ok(command) => self.execute(command),
            Err(err) => err
                .lines()
                .enumerate()
                .map(|(index, line)| {
                    if index == 0 {
                        format!("ERR syntax {line}")
                    } else {
                        format!("           {line}")
                    }
                })
                .collect(),
        };

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn execute(&mut self, command: Command) -> Vec<String> {
        match command {
            Command::Help(topic) => return help(topic.as_deref()),
            Command::Trace => return self.dump_trace(),
            Command::Status => return self.status(),
            _ => {}
        }

        let Device::Running(scheduler) = &mut self.device else {
            if let Device::Halted { error, .. } = &self.device {
                return vec![format!("ERR halted: {error}")];
            }
            return Vec::new();
        };

        let board = scheduler.board_mut();
        match command {
            Command::Tick(count) => {
                for _ in 0..count {
                    board.raise(Interrupt::Second);
                }
                let verbose = count == 1;
                self.settle(verbose)
            }
            Command::Minute => {
                let remaining = 60 - u32::from(board.second());
                for _ in 0..remaining {
                    board.raise(Interrupt::Second);
                }
                self.settle(false)
            }
            Command::Key { key, long } => {
                board.raise(Interrupt::KeyDown { key, long });
                self.settle(true)
            }
            Command::Com(text) => {
                board.raise(Interrupt::Serial(text));
                self.settle(true)
            }
            Command::Battery(millivolts) => {
                board.set_supply(millivolts);
                vec![format!(
                    "supply {millivolts} mV (read on the next battery sample)"
                )]
            }
            Command::Temp(centi) => {
                board.set_room_temperature(centi);
                vec![format!(
                    "room {} (read on the next temperature sample)",
                    format_centi(centi)
                )]
            }
            Command::Setpoint(centi) => {
                board.set_setpoint(centi);
                vec![format!("setpoint {}", format_centi(centi))]
            }
            Command::Window(minutes) => {
                board.open_window(minutes);
                vec![format!("window open, override for {minutes} min")]
            }
            Command::Time {
                day,
                hour,
                minute,
                second,
            } => {
                board.set_time(day, hour, minute, second);
                vec![format!("clock {day} {hour:02}:{minute:02}:{second:02}")]
            }
            Command::Help(_) | Command::Trace | Command::Status => Vec::new(),
        }
    }

    /// Runs the loop until it sleeps with nothing left to wake it.
    fn settle(&mut self, verbose: bool) -> Vec<String> {
        let Device::Running(scheduler) = &mut self.device else {
            return Vec::new();
        };

        let mut lines = Vec::new();
        let mut cycles = 0_usize;
        let mut sleeps = 0_usize;
        let mut ticks = 0_usize;
        let mut last_sleep = None;

        while cycles < MAX_CYCLES_PER_COMMAND {
            let cycle = scheduler.run_once();
            cycles += 1;
            if let Some(depth) = cycle.slept {
                sleeps += 1;
                last_sleep = Some(depth);
            }
            if cycle.tick.is_some_and(|report| report.ticked) {
                ticks += 1;
            }

            let board = scheduler.board();
            let quiescent = cycle.slept.is_some()
                && board.last_wake() == Wake::None
                && scheduler.pending().is_idle()
                && (cycle.is_idle() || (redraw_only(&cycle) && board.glass_is_current()));
            if verbose && !quiescent {
                lines.push(describe_cycle(&cycle));
            }
            lines.extend(
                scheduler
                    .board_mut()
                    .take_replies()
                    .into_iter()
                    .map(|reply| format!("COM> {reply}")),
            );
            if quiescent {
                break;
            }
        }

        let (notable, seen) = notable_events(scheduler.trace(), self.trace_seen);
        self.trace_seen = seen;
        lines.extend(notable);

        if !verbose {
            let depth = last_sleep.map_or_else(|| "-".to_owned(), |depth| depth.to_string());
            lines.push(format!(
                "{ticks} ticks, {cycles} cycles, {sleeps} sleeps, last sleep {depth}"
            ));
        }
        if cycles >= MAX_CYCLES_PER_COMMAND {
            lines.push(format!(
                "WARN loop still busy after {MAX_CYCLES_PER_COMMAND} cycles"
            ));
        }
        let board = scheduler.board();
        if board.queued() > 0 {
            lines.push(format!("WARN {} events still queued", board.queued()));
        }
        lines.push(format!("lcd: {}", board.glass()));
        lines
    }

    fn status(&self) -> Vec<String> {
        match &self.device {
            Device::Halted { board, error, .. } => vec![
                format!("state: halted ({error})"),
                format!(
                    "lcd: {} (fatal={})",
                    board.glass(),
                    board.fatal().map_or_else(|| "-".to_owned(), |f| f.to_string())
                ),
                format!("comm: {}", comm_label(board.comm_ready())),
            ],
            Device::Running(scheduler) => {
                let board = scheduler.board();
                let clock = board.clock();
                let motor = board.motor();
                let analog = board.analog();
                let controller = board.controller();
                let cascade = scheduler.cascade();
                let (renders, clears) = board.renders();
                vec![
                    format!(
                        "clock: {} {:02}:{:02}:{:02}",
                        clock.day_of_week(),
                        clock.hour(),
                        clock.minute(),
                        clock.second()
                    ),
                    format!(
                        "valve: position {}% target {}% {} calibrations={} protection-runs={}",
                        motor.position,
                        motor.target,
                        if motor.running { "running" } else { "idle" },
                        motor.calibrations,
                        motor.protection_runs
                    ),
                    format!(
                        "controller: wanted {} measured {} errors {}{}",
                        format_centi(controller.wanted()),
                        format_centi(controller.measured()),
                        controller.errors(),
                        if controller.forced_update() {
                            " (window override)"
                        } else {
                            ""
                        }
                    ),
                    format!(
                        "battery: {} mV (supply {} mV, {} samples{})",
                        analog.battery_mv,
                        analog.supply_mv,
                        analog.samples,
                        if analog.powered { ", converter on" } else { "" }
                    ),
                    format!(
                        "window: {} min remaining, auto-update {}",
                        cascade.window().remaining(),
                        cascade.auto_update().value()
                    ),
                    format!(
                        "pending: tasks {} display {} sample {}",
                        scheduler.pending().pending(),
                        scheduler.pending().display(),
                        scheduler.pending().sample_requested()
                    ),
                    format!(
                        "lcd: {} (screen {:?}, {renders} renders, {clears} clears)",
                        board.glass(),
                        board.screen()
                    ),
                    format!("comm: {}", comm_label(board.comm_ready())),
                ]
            }
        }
    }

    fn dump_trace(&self) -> Vec<String> {
        let trace = match &self.device {
            Device::Running(scheduler) => scheduler.trace(),
            Device::Halted { trace, .. } => trace,
        };
        if trace.is_empty() {
            return vec!["trace empty".to_owned()];
        }
        trace.oldest_first().map(format_record).collect()
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            for line in lines {
                transcript.append_line(elapsed, TranscriptRole::Emulator, line)?;
            }
        }
        Ok(())
    }
}

fn comm_label(ready: bool) -> &'static str {
    if ready { "ready" } else { "not initialised" }
}

/// A due auto-update countdown re-runs the menu on every wake until the next
/// tick; such a cycle changes nothing once its frame is on the glass.
fn redraw_only(cycle: &Cycle) -> bool {
    cycle
        .steps
        .iter()
        .all(|step| matches!(step, Step::Menu | Step::Render))
}

fn describe_cycle(cycle: &Cycle) -> String {
    let sleep = cycle
        .slept
        .map_or_else(|| "awake".to_owned(), |depth| format!("sleep {depth}"));
    if cycle.steps.is_empty() {
        return format!("{sleep} -> nothing pending");
    }
    let steps: Vec<String> = cycle.steps.iter().map(Step::to_string).collect();
    let suffix = if cycle.restarted { " (restart)" } else { "" };
    format!("{sleep} -> {}{suffix}", steps.join(", "))
}

/// Trace events worth surfacing on their own, plus the next unseen sequence.
fn notable_events(trace: &DispatchTrace, seen: TraceSeq) -> (Vec<String>, TraceSeq) {
    let lines = trace
        .since(seen)
        .filter(|record| {
            matches!(
                record.event,
                TraceEvent::Calibration(_) | TraceEvent::WindowExpired | TraceEvent::Halted(_)
            )
        })
        .map(format_record)
        .collect();
    (lines, trace.next_seq())
}

fn format_record(record: &TraceRecord) -> String {
    format!("#{:<5} {}", record.seq, record.event)
}

fn help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_owned());
            } else {
                lines.push(format!("No help available for `{target}`."));
                let topics: Vec<&str> = HELP_TOPICS.iter().map(|(name, _)| *name).collect();
                lines.push(format!("Available topics: {}", topics.join(", ")));
            }
        }
        None => {
            lines.push("Available commands:".to_owned());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("  exit                        - leave the emulator".to_owned());
        }
    }
    lines
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(path: &Path, profile: Profile) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: Profile) -> io::Result<()> {
        writeln!(
            self.writer,
            "# Valve emulator transcript (profile {})",
            profile.tag()
        )?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

#[derive(Clone, Copy)]
enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session<'a>(pending: &'a PendingWork, options: &Options) -> Session<'a> {
        Session::new(pending, options).expect("session")
    }

    #[test]
    fn corrupt_layout_halts_and_rejects_commands() {
        let pending = PendingWork::new();
        let options = Options {
            corrupt_layout: true,
            ..Options::default()
        };
        let mut session = session(&pending, &options);

        assert!(session.is_halted());
        assert!(session.boot_report()[0].starts_with("HALT"));
        let lines = session.handle_command("tick").unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ERR halted"));

        let status = session.handle_command("status").unwrap();
        assert!(status.iter().any(|line| line.contains("EEPr")));
        assert!(status.iter().any(|line| line == "comm: not initialised"));
    }

    #[test]
    fn first_tick_samples_before_moving_the_motor() {
        let pending = PendingWork::new();
        let mut session = session(&pending, &Options::default());

        // Battery unknown on the first tick: no motor command yet.
        session.handle_command("tick").unwrap();
        let Device::Running(scheduler) = &session.device else {
            panic!("session halted");
        };
        assert!(!scheduler.board().motor().running);
        assert_eq!(scheduler.board().analog().samples, 1);
        assert_eq!(scheduler.board().motor().position, 0);

        // The second tick sees the sampled battery and moves the valve.
        session.handle_command("tick").unwrap();
        let Device::Running(scheduler) = &session.device else {
            panic!("session halted");
        };
        let motor = scheduler.board().motor();
        assert!(!motor.running);
        assert_eq!(motor.position, motor.target);
        assert!(motor.target > 0);
    }

    #[test]
    fn key_press_redraws_the_setpoint_screen() {
        let pending = PendingWork::new();
        let mut session = session(&pending, &Options::default());

        let lines = session.handle_command("key +").unwrap();

        assert!(
            lines
                .iter()
                .any(|line| line.contains("keyboard, menu, render")),
            "{lines:?}"
        );
        assert_eq!(lines.last().map(String::as_str), Some("lcd: set 21.50C"));
    }

    #[test]
    fn due_auto_update_lets_the_loop_settle() {
        let pending = PendingWork::new();
        let mut session = session(&pending, &Options::default());
        session.handle_command("key +").unwrap();

        let lines = session.handle_command("tick 5").unwrap();

        assert!(lines.iter().all(|line| !line.starts_with("WARN")), "{lines:?}");
        assert!(lines.iter().any(|line| line.starts_with("5 ticks,")), "{lines:?}");
        let Device::Running(scheduler) = &session.device else {
            panic!("session halted");
        };
        assert!(scheduler.board().glass_is_current());
    }

    #[test]
    fn serial_reply_is_reported() {
        let pending = PendingWork::new();
        let mut session = session(&pending, &Options::default());

        let lines = session.handle_command("com V").unwrap();

        assert!(lines.iter().any(|line| line.starts_with("COM> V valve-emulator")));
    }

    #[test]
    fn weekly_protection_shows_in_the_summary() {
        let pending = PendingWork::new();
        let mut session = session(&pending, &Options::default());
        session.handle_command("tick").unwrap();
        session.handle_command("time sat 09:59:30").unwrap();

        let lines = session.handle_command("minute").unwrap();

        assert!(
            lines
                .iter()
                .any(|line| line.ends_with("calibrate valve-protection")),
            "{lines:?}"
        );
    }

    #[test]
    fn syntax_errors_are_reported_not_executed() {
        let pending = PendingWork::new();
        let mut session = session(&pending, &Options::default());

        let lines = session.handle_command("warp 9").unwrap();

        assert!(lines[0].starts_with("ERR syntax"));
    }

    #[test]
    fn profiles_map_to_configs() {
        assert!(Profile::from_tag("ADC-during-motor").unwrap().config().allow_adc_during_motor);
        assert!(!Profile::from_tag("hw-window")
            .unwrap()
            .config()
            .software_window_detection);
        assert!(Profile::from_tag("turbo").is_err());
    }
}
