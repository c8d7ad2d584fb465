#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Raw ADC readings to physical units.
//!
//! Both internal channels are factory-calibrated at a 3.0 V supply, so the
//! VREFINT reading doubles as the supply measurement that rescales the
//! temperature-sensor reading.

/// Supply voltage the factory calibration values were taken at.
pub const CALIBRATION_MV: u32 = 3000;
/// Temperature the sensor calibration value was taken at, in hundredths.
pub const CALIBRATION_CENTI: i32 = 3000;
/// Full-scale count of the 12-bit converter.
pub const FULL_SCALE: i32 = 4095;
/// Sensor slope in hundredths of a degree per millivolt (2.5 mV/°C).
pub const CENTI_PER_MV: i32 = 40;

/// Supply voltage from a VREFINT reading. Zero while no reading exists.
pub fn supply_mv(vrefint_cal: u16, raw: u16) -> u16 {
    if raw == 0 {
        return 0;
    }
    let mv = CALIBRATION_MV * u32::from(vrefint_cal) / u32::from(raw);
    u16::try_from(mv).unwrap_or(u16::MAX)
}

/// Temperature in hundredths of a degree from a sensor reading taken at
/// `supply_mv`.
pub fn temperature_centi(ts_cal: u16, raw: u16, supply_mv: u16) -> i16 {
    let supply = if supply_mv == 0 {
        CALIBRATION_MV
    } else {
        u32::from(supply_mv)
    };
    let at_calibration_supply = i32::try_from(u32::from(raw) * supply / CALIBRATION_MV)
        .unwrap_or(i32::MAX);
    let delta_mv = (at_calibration_supply - i32::from(ts_cal)) * 3000 / FULL_SCALE;
    let centi = CALIBRATION_CENTI + delta_mv * CENTI_PER_MV;
    let clamped = centi.clamp(i32::from(i16::MIN), i32::from(i16::MAX));
    i16::try_from(clamped).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supply_scales_inversely_with_reading() {
        assert_eq!(supply_mv(1500, 1500), 3000);
        assert_eq!(supply_mv(1500, 2000), 2250);
        assert_eq!(supply_mv(1500, 0), 0);
    }

    #[test]
    fn calibration_point_reads_thirty_degrees() {
        assert_eq!(temperature_centi(1000, 1000, 3000), 3000);
    }

    #[test]
    fn lower_reading_is_colder() {
        // 41 counts is about 30 mV, or twelve degrees.
        let centi = temperature_centi(1000, 959, 3000);
        assert_eq!(centi, 1800);
    }

    #[test]
    fn unknown_supply_assumes_calibration_voltage() {
        assert_eq!(
            temperature_centi(1000, 959, 0),
            temperature_centi(1000, 959, 3000)
        );
    }
}
