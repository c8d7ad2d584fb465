#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Persisted configuration record.
//!
//! The record sits at the start of the last flash page:
//!
//! | offset | field                                          |
//! |--------|------------------------------------------------|
//! | 0      | layout marker                                  |
//! | 1      | flags: bit 0 sample while moving, bit 1 window sensor fitted |
//! | 2      | valve protection day, ISO numbering            |
//! | 3      | valve protection hour                          |
//! | 4      | valve protection minute                        |
//!
//! Erased flash reads back as `0xFF`, which never matches the marker.

use valve_core::board::{DeviceConfig, Weekday};
use valve_core::cascade::WeeklySchedule;

pub const RECORD_LEN: usize = 5;

const FLAG_SAMPLE_WHILE_MOVING: u8 = 1 << 0;
const FLAG_WINDOW_SENSOR: u8 = 1 << 1;

/// Raw configuration bytes as read from flash.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ConfigRecord([u8; RECORD_LEN]);

impl ConfigRecord {
    pub const fn new(bytes: [u8; RECORD_LEN]) -> Self {
        Self(bytes)
    }

    pub const fn layout_marker(&self) -> u8 {
        self.0[0]
    }

    /// Decodes the settings. An out-of-range protection slot falls back to
    /// the default slot rather than failing the boot.
    pub fn config(&self) -> DeviceConfig {
        let [_, flags, day, hour, minute] = self.0;
        let valve_protection = match Weekday::from_iso(day) {
            Some(day) if hour < 24 && minute < 60 => WeeklySchedule::new(day, hour, minute),
            _ => WeeklySchedule::default(),
        };

        DeviceConfig {
            allow_adc_during_motor: flags & FLAG_SAMPLE_WHILE_MOVING != 0,
            software_window_detection: flags & FLAG_WINDOW_SENSOR == 0,
            valve_protection,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use valve_core::startup::LAYOUT_MARKER;

    #[test]
    fn erased_flash_has_no_valid_marker() {
        let record = ConfigRecord::new([0xFF; RECORD_LEN]);
        assert_ne!(record.layout_marker(), LAYOUT_MARKER);
    }

    #[test]
    fn decodes_flags_and_protection_slot() {
        let record = ConfigRecord::new([LAYOUT_MARKER, 0b11, 3, 6, 45]);
        let config = record.config();

        assert!(config.allow_adc_during_motor);
        assert!(!config.software_window_detection);
        assert_eq!(
            config.valve_protection,
            WeeklySchedule::new(Weekday::Wednesday, 6, 45)
        );
    }

    #[test]
    fn invalid_slot_falls_back_to_default() {
        for bytes in [
            [LAYOUT_MARKER, 0, 0, 10, 0],
            [LAYOUT_MARKER, 0, 6, 24, 0],
            [LAYOUT_MARKER, 0, 6, 10, 60],
        ] {
            let config = ConfigRecord::new(bytes).config();
            assert_eq!(config.valve_protection, WeeklySchedule::default());
            assert!(config.software_window_detection);
            assert!(!config.allow_adc_during_motor);
        }
    }
}
