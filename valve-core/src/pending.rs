//! Pending-work registry shared between interrupt handlers and the main loop.
//!
//! Interrupt handlers are producers: each one performs a single atomic flag
//! set and returns. The dispatch loop is the only consumer and clears flags
//! through read-and-clear operations that run inside a critical section, so a
//! bit posted while the loop is clearing is either observed by that drain or
//! left set for the next one. Nothing outside this module touches the raw
//! bit registers.

use core::fmt;
use core::ops::{BitOr, BitOrAssign};

use portable_atomic::{AtomicBool, AtomicU8, Ordering};

/// Coarse task categories posted by signal sources.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskSet(u8);

impl TaskSet {
    /// Segment refresh requested by the display frame interrupt.
    pub const LCD_REFRESH: Self = Self(1 << 0);
    /// An analog conversion finished and needs servicing.
    pub const ADC: Self = Self(1 << 1);
    /// Bytes or a frame arrived on the serial transport.
    pub const COM: Self = Self(1 << 2);
    /// The motor run budget expired or a stall was detected.
    pub const MOTOR_STOP: Self = Self(1 << 3);
    /// Key state changed.
    pub const KEYBOARD: Self = Self(1 << 4);
    /// The real-time clock ticked.
    pub const RTC: Self = Self(1 << 5);
    /// Periodic motor pulse while the valve is moving.
    pub const MOTOR_PULSE: Self = Self(1 << 6);

    const ALL_BITS: u8 = 0x7F;

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn all() -> Self {
        Self(Self::ALL_BITS)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Builds a set from raw bits, discarding unknown ones.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & Self::ALL_BITS)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Iterates the single-bit members of the set, lowest bit first.
    pub fn iter(self) -> impl Iterator<Item = TaskSet> {
        (0..8u8)
            .map(|shift| Self(1 << shift))
            .filter(move |bit| self.contains(*bit) && !bit.is_empty())
    }

    const fn label(self) -> &'static str {
        match self {
            Self::LCD_REFRESH => "lcd",
            Self::ADC => "adc",
            Self::COM => "com",
            Self::MOTOR_STOP => "motor-stop",
            Self::KEYBOARD => "keyboard",
            Self::RTC => "rtc",
            Self::MOTOR_PULSE => "motor-pulse",
            _ => "?",
        }
    }
}

impl BitOr for TaskSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TaskSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for TaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for bit in self.iter() {
            if !first {
                f.write_str("|")?;
            }
            f.write_str(bit.label())?;
            first = false;
        }
        Ok(())
    }
}

/// Display sub-requests raised by collaborators that changed visible state.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DisplayRequest(u8);

impl DisplayRequest {
    pub const UPDATE: Self = Self(1 << 0);
    /// Full redraw. Always carries `UPDATE` once posted.
    pub const CLEAR: Self = Self(1 << 1);

    #[must_use]
    pub const fn none() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn wants_clear(self) -> bool {
        self.0 & Self::CLEAR.0 != 0
    }

    const fn normalized(self) -> Self {
        if self.wants_clear() {
            Self(self.0 | Self::UPDATE.0)
        } else {
            self
        }
    }
}

impl fmt::Display for DisplayRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_empty(), self.wants_clear()) {
            (true, _) => f.write_str("-"),
            (false, true) => f.write_str("clear"),
            (false, false) => f.write_str("update"),
        }
    }
}

impl BitOr for DisplayRequest {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags written by the periodic clock interrupt.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockTickFlags(u8);

impl ClockTickFlags {
    /// The clock counter wrapped without completing a second.
    pub const OVERFLOW: Self = Self(1 << 0);
    /// One second elapsed.
    pub const SECOND: Self = Self(1 << 1);

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for ClockTickFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Registry of pending work shared by every execution context.
///
/// Producers call the `post*`/`request*` methods; the dispatch loop is the
/// only caller of the `drain*`/`take*`/`clear*` methods.
pub struct PendingWork {
    tasks: AtomicU8,
    display: AtomicU8,
    clock: AtomicU8,
    sample_on_sleep: AtomicBool,
}

impl PendingWork {
    /// Creates an empty registry suitable for a `static`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks: AtomicU8::new(0),
            display: AtomicU8::new(0),
            clock: AtomicU8::new(0),
            sample_on_sleep: AtomicBool::new(false),
        }
    }

    /// Marks `tasks` as pending. Posting an already pending task is a no-op.
    pub fn post(&self, tasks: TaskSet) {
        self.tasks.fetch_or(tasks.bits(), Ordering::AcqRel);
    }

    /// Atomically clears the bits of `mask` and returns those that were set.
    pub fn drain_and_clear(&self, mask: TaskSet) -> TaskSet {
        let previous =
            critical_section::with(|_| self.tasks.fetch_and(!mask.bits(), Ordering::AcqRel));
        TaskSet::from_bits_truncate(previous & mask.bits())
    }

    /// Snapshot of the pending tasks without clearing anything.
    #[must_use]
    pub fn pending(&self) -> TaskSet {
        TaskSet::from_bits_truncate(self.tasks.load(Ordering::Acquire))
    }

    /// Returns `true` when no task is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending().is_empty()
    }

    /// Raises a display sub-request. `CLEAR` implies `UPDATE`.
    pub fn request_display(&self, request: DisplayRequest) {
        self.display
            .fetch_or(request.normalized().bits(), Ordering::AcqRel);
    }

    /// Replaces any pending display request with a full redraw.
    pub fn request_redraw(&self) {
        self.display.store(
            (DisplayRequest::CLEAR | DisplayRequest::UPDATE).bits(),
            Ordering::Release,
        );
    }

    /// Consumes every pending display sub-request.
    pub fn take_display(&self) -> DisplayRequest {
        let bits = critical_section::with(|_| self.display.swap(0, Ordering::AcqRel));
        DisplayRequest(bits)
    }

    /// Snapshot of the pending display sub-requests.
    #[must_use]
    pub fn display(&self) -> DisplayRequest {
        DisplayRequest(self.display.load(Ordering::Acquire))
    }

    /// Called from the periodic clock interrupt: records `flags` and posts
    /// [`TaskSet::RTC`].
    pub fn post_clock(&self, flags: ClockTickFlags) {
        self.clock.fetch_or(flags.bits(), Ordering::AcqRel);
        self.post(TaskSet::RTC);
    }

    /// Snapshot of the clock flags.
    #[must_use]
    pub fn clock_flags(&self) -> ClockTickFlags {
        ClockTickFlags(self.clock.load(Ordering::Acquire))
    }

    /// Clears `mask` from the clock flags with interrupt delivery suspended and
    /// returns the bits of `mask` that were set.
    pub fn clear_clock(&self, mask: ClockTickFlags) -> ClockTickFlags {
        let previous =
            critical_section::with(|_| self.clock.fetch_and(!mask.bits(), Ordering::AcqRel));
        ClockTickFlags(previous & mask.bits())
    }

    /// Asks the next sleep to start an analog conversion.
    pub fn request_sample(&self) {
        self.sample_on_sleep.store(true, Ordering::Release);
    }

    /// Returns whether a sample was requested and clears the request.
    pub fn take_sample_request(&self) -> bool {
        self.sample_on_sleep.swap(false, Ordering::AcqRel)
    }

    /// Reports whether a sample request is waiting for the next sleep.
    #[must_use]
    pub fn sample_requested(&self) -> bool {
        self.sample_on_sleep.load(Ordering::Acquire)
    }
}

impl Default for PendingWork {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PendingWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWork")
            .field("tasks", &self.pending())
            .field("display", &self.display())
            .field("clock", &self.clock_flags())
            .field("sample_on_sleep", &self.sample_requested())
            .finish()
    }
}
