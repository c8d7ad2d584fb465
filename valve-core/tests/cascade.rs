mod common;

use std::sync::Arc;

use common::{Call, MockBoard};
use valve_core::basic::SoftClock;
use valve_core::board::{
    CalibrationReason, Clock, ControllerErrors, DeviceConfig, MountState, Weekday,
};
use valve_core::cascade::{TickCascade, TickReport};
use valve_core::pending::{ClockTickFlags, DisplayRequest, PendingWork, TaskSet};
use valve_core::trace::DispatchTrace;

struct Rig {
    pending: Arc<PendingWork>,
    board: MockBoard,
    cascade: TickCascade,
    trace: DispatchTrace,
}

impl Rig {
    fn new(config: DeviceConfig) -> Self {
        let pending = Arc::new(PendingWork::new());
        let mut board = MockBoard::new(Arc::clone(&pending));
        board.config = config;
        Self {
            pending,
            board,
            cascade: TickCascade::new(config),
            trace: DispatchTrace::new(),
        }
    }

    fn at(mut self, day: Weekday, hour: u8, minute: u8, second: u8) -> Self {
        self.board.clock = SoftClock::new(day, hour, minute, second);
        self
    }

    /// One second elapses and the clock task is serviced.
    fn tick(&mut self) -> TickReport {
        self.pending.post_clock(ClockTickFlags::SECOND);
        self.pending.drain_and_clear(TaskSet::RTC);
        self.cascade
            .run(&mut self.board, &self.pending, &mut self.trace)
    }

    fn protection_runs(&self) -> usize {
        self.board
            .count(Call::Calibrate(CalibrationReason::ValveProtection))
    }
}

#[test]
fn unknown_battery_skips_motor_but_not_controller_or_countdown() {
    let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Tuesday, 8, 14, 59);
    rig.board.battery_mv = 0;
    rig.cascade.auto_update_mut().arm(5);

    let report = rig.tick();

    assert!(report.minute);
    assert_eq!(report.motor_target, None);
    assert_eq!(rig.board.count(Call::ControllerUpdate { minute: true }), 1);
    assert!(rig.board.calls.iter().all(|call| !matches!(call, Call::Goto(_))));
    assert_eq!(
        rig.board
            .count(Call::Calibrate(CalibrationReason::Contact(MountState::Mounted))),
        0
    );
    assert_eq!(rig.cascade.auto_update().value(), 4);
    assert_eq!(rig.pending.display(), DisplayRequest::UPDATE);
}

#[test]
fn steps_run_in_dependency_order() {
    let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Saturday, 9, 59, 59);
    rig.board.valve_wanted = 65;

    let report = rig.tick();

    assert!(report.valve_protection);
    assert_eq!(
        rig.board.calls,
        vec![
            Call::AddSecond,
            Call::ControllerUpdate { minute: true },
            Call::Calibrate(CalibrationReason::ValveProtection),
            Call::PollContact,
            Call::Calibrate(CalibrationReason::Contact(MountState::Mounted)),
            Call::Goto(65),
            Call::LongPress,
            Call::PrepareSample,
        ]
    );
    assert!(rig.pending.sample_requested());
    assert!(rig.pending.clock_flags().is_empty());
}

#[test]
fn weekly_protection_fires_only_in_its_slot() {
    let mut fired = Vec::new();
    for (day, hour, minute) in [
        (Weekday::Saturday, 9, 58),
        (Weekday::Saturday, 9, 59),
        (Weekday::Saturday, 10, 0),
        (Weekday::Friday, 9, 59),
        (Weekday::Sunday, 9, 59),
    ] {
        // One second before the boundary, so the tick lands on hh:mm+1:00.
        let mut rig = Rig::new(DeviceConfig::default()).at(day, hour, minute, 59);
        rig.tick();
        fired.push(rig.protection_runs());
    }

    // Only Saturday 09:59:59 -> 10:00:00 lands exactly on the slot.
    assert_eq!(fired, vec![0, 1, 0, 0, 0]);
}

#[test]
fn weekly_protection_needs_a_minute_boundary() {
    let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Saturday, 10, 0, 10);

    let report = rig.tick();

    assert!(!report.minute);
    assert_eq!(rig.protection_runs(), 0);
}

#[test]
fn battery_faults_suppress_weekly_protection() {
    for errors in [
        ControllerErrors::BATTERY_LOW,
        ControllerErrors::BATTERY_WARNING,
    ] {
        let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Saturday, 9, 59, 59);
        rig.board.errors = errors;

        let report = rig.tick();

        assert!(report.minute);
        assert!(!report.valve_protection);
        assert_eq!(rig.protection_runs(), 0);
        assert_eq!(report.motor_target, Some(40), "motor still follows the target");
    }
}

#[test]
fn unrelated_errors_do_not_suppress_protection() {
    let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Saturday, 9, 59, 59);
    rig.board.errors = ControllerErrors::MOUNT;

    rig.tick();

    assert_eq!(rig.protection_runs(), 1);
}

#[test]
fn custom_protection_slot_is_honoured() {
    let config = DeviceConfig {
        valve_protection: valve_core::cascade::WeeklySchedule::new(Weekday::Monday, 3, 30),
        ..DeviceConfig::default()
    };
    let mut rig = Rig::new(config).at(Weekday::Monday, 3, 29, 59);

    rig.tick();

    assert_eq!(rig.protection_runs(), 1);
}

#[test]
fn window_countdown_clears_override_after_its_minutes() {
    let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Monday, 7, 0, 0);
    rig.board.window_open = Some(2);

    let mut expired_at = None;
    for second in 1..=180 {
        let report = rig.tick();
        if report.window_expired {
            expired_at = Some(second);
            break;
        }
    }

    // Armed on the first tick, then counted down on 07:01:00 and 07:02:00.
    assert_eq!(expired_at, Some(120));
    assert_eq!(rig.board.count(Call::ClearForcedUpdate), 1);
}

#[test]
fn hardware_window_detection_leaves_override_alone() {
    let config = DeviceConfig {
        software_window_detection: false,
        ..DeviceConfig::default()
    };
    let mut rig = Rig::new(config).at(Weekday::Monday, 7, 0, 58);
    rig.board.window_open = Some(1);

    for _ in 0..130 {
        rig.tick();
    }

    assert_eq!(rig.board.count(Call::ClearForcedUpdate), 0);
    assert!(!rig.cascade.window().is_active());
}

#[test]
fn moving_motor_defers_sampling_unless_allowed() {
    let mut rig = Rig::new(DeviceConfig::default());
    rig.board.motor_idle = false;
    assert!(!rig.tick().sample_requested);
    assert!(!rig.pending.sample_requested());

    let config = DeviceConfig {
        allow_adc_during_motor: true,
        ..DeviceConfig::default()
    };
    let mut rig = Rig::new(config);
    rig.board.motor_idle = false;
    assert!(rig.tick().sample_requested);
    assert!(rig.pending.sample_requested());
}

#[test]
fn long_press_detection_runs_every_tick() {
    let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Monday, 7, 0, 10);

    for _ in 0..5 {
        rig.tick();
    }

    assert_eq!(rig.board.count(Call::LongPress), 5);
    assert_eq!(rig.board.count(Call::ControllerUpdate { minute: false }), 5);
}

#[test]
fn overflow_without_second_runs_cascade_without_advancing() {
    let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Monday, 7, 0, 10);
    rig.pending.post_clock(ClockTickFlags::OVERFLOW);
    rig.pending.drain_and_clear(TaskSet::RTC);

    let report = rig
        .cascade
        .run(&mut rig.board, &rig.pending, &mut rig.trace);

    assert!(report.ticked);
    assert_eq!(rig.board.count(Call::AddSecond), 0);
    assert!(rig.pending.clock_flags().is_empty());
}

#[test]
fn second_posted_while_advancing_is_kept_for_the_next_run() {
    let mut rig = Rig::new(DeviceConfig::default()).at(Weekday::Monday, 7, 0, 10);
    rig.board.seconds_during_advance = 1;

    assert!(rig.tick().ticked);
    assert_eq!(rig.pending.clock_flags(), ClockTickFlags::SECOND);
    assert!(rig.pending.pending().contains(TaskSet::RTC));

    rig.pending.drain_and_clear(TaskSet::RTC);
    let report = rig
        .cascade
        .run(&mut rig.board, &rig.pending, &mut rig.trace);

    assert!(report.ticked);
    assert_eq!(rig.board.count(Call::AddSecond), 2);
    assert_eq!(rig.board.clock.second(), 12);
    assert!(rig.pending.clock_flags().is_empty());
}

#[test]
fn spurious_clock_task_does_nothing() {
    let mut rig = Rig::new(DeviceConfig::default());

    let report = rig
        .cascade
        .run(&mut rig.board, &rig.pending, &mut rig.trace);

    assert!(!report.ticked);
    assert!(rig.board.calls.is_empty());
    assert!(rig.pending.display().is_empty());
}
