use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_stm32 as hal;
use valve_core::dispatch::Scheduler;
use valve_core::pending::PendingWork;
use valve_core::startup;

use crate::hw::ValveBoard;
use crate::telemetry::{self, TraceLogger};

mod interrupts;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Work posted by the interrupt handlers for the dispatch loop.
pub(super) static PENDING: PendingWork = PendingWork::new();

#[cortex_m_rt::entry]
fn main() -> ! {
    let peripherals = hal::init(hal::Config::default());

    let mut board = match ValveBoard::new(&PENDING, peripherals) {
        Ok(board) => board,
        Err(err) => {
            defmt::error!("service port setup failed: {}", defmt::Debug2Format(&err));
            halt();
        }
    };

    let config = match startup::boot(&mut board) {
        Ok(config) => config,
        Err(err) => {
            telemetry::log_halt(&err);
            halt();
        }
    };
    telemetry::log_boot(&config);
    board.enable_wakeups();

    let mut scheduler = Scheduler::new(board, &PENDING, config);
    let mut logger = TraceLogger::new();
    loop {
        scheduler.run_once();
        logger.flush(scheduler.trace());
    }
}

/// Stops with interrupts masked so nothing posts work behind the halt.
fn halt() -> ! {
    interrupt::disable();
    startup::halt()
}
