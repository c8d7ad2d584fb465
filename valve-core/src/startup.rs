//! Boot-time validation of the persisted configuration.
//!
//! An unrecognised layout marker means the calibration and configuration
//! data cannot be trusted to drive the motor, so the device shows a fixed
//! error glyph and stops for good. There is no retry and no recovery path.

use core::fmt;

use crate::board::{Comm, ConfigStore, DeviceConfig, Display, FatalIndicator};

/// Layout revision the firmware understands.
pub const LAYOUT_MARKER: u8 = 0x0F;

/// Persisted layout marker did not match [`LAYOUT_MARKER`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IntegrityError {
    pub expected: u8,
    pub found: u8,
}

impl IntegrityError {
    /// Glyph shown while halted on this error.
    #[must_use]
    pub const fn indicator(&self) -> FatalIndicator {
        FatalIndicator::EepromError
    }
}

impl fmt::Display for IntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "persisted layout marker {:#04x} does not match expected {:#04x}",
            self.found, self.expected
        )
    }
}

/// Checks the layout marker and brings up the communication transport.
///
/// On a mismatch the error glyph is rendered and the transport is left
/// untouched; the caller is expected to [`halt`].
pub fn boot<B>(board: &mut B) -> Result<DeviceConfig, IntegrityError>
where
    B: ConfigStore + Display + Comm,
{
    let found = board.layout_marker();
    if found != LAYOUT_MARKER {
        let error = IntegrityError {
            expected: LAYOUT_MARKER,
            found,
        };
        board.show_fatal(error.indicator());
        board.refresh();
        return Err(error);
    }

    let config = board.read_config();
    board.init();
    Ok(config)
}

/// Stops the device permanently.
pub fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
