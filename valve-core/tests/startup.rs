mod common;

use std::sync::Arc;

use common::{Call, MockBoard};
use valve_core::board::{DeviceConfig, FatalIndicator, Weekday};
use valve_core::cascade::WeeklySchedule;
use valve_core::pending::PendingWork;
use valve_core::startup::{IntegrityError, LAYOUT_MARKER, boot};

#[test]
fn mismatched_marker_halts_without_comm_init() {
    let pending = Arc::new(PendingWork::new());
    let mut board = MockBoard::new(pending);
    board.layout_marker = LAYOUT_MARKER.wrapping_add(1);

    let error = boot(&mut board).expect_err("corrupt layout must not boot");

    assert_eq!(
        error,
        IntegrityError {
            expected: LAYOUT_MARKER,
            found: LAYOUT_MARKER.wrapping_add(1),
        }
    );
    assert_eq!(board.count(Call::CommInit), 0);
    assert_eq!(
        board.calls,
        vec![
            Call::ShowFatal(FatalIndicator::EepromError),
            Call::LcdRefresh
        ]
    );
}

#[test]
fn matching_marker_initialises_comm_exactly_once() {
    let pending = Arc::new(PendingWork::new());
    let mut board = MockBoard::new(pending);
    board.config = DeviceConfig {
        allow_adc_during_motor: true,
        software_window_detection: false,
        valve_protection: WeeklySchedule::new(Weekday::Sunday, 4, 0),
    };

    let config = boot(&mut board).expect("valid layout should boot");

    assert_eq!(config, board.config);
    assert_eq!(board.count(Call::CommInit), 1);
    assert_eq!(board.count(Call::ShowFatal(FatalIndicator::EepromError)), 0);
    assert_eq!(board.calls, vec![Call::ReadConfig, Call::CommInit]);
}

#[test]
fn integrity_error_describes_both_markers() {
    let error = IntegrityError {
        expected: 0x0F,
        found: 0xFF,
    };

    assert_eq!(
        error.to_string(),
        "persisted layout marker 0xff does not match expected 0x0f"
    );
}
