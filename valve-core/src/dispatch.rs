//! Cooperative dispatch loop.
//!
//! Each iteration first offers the processor to the [`PowerStateSelector`],
//! then walks [`PRIORITY`] from the top. The four short, latency-sensitive
//! stages restart the iteration after servicing a single task so the loop
//! gets back to sleep as soon as possible. The remaining stages are chained
//! to the clock tick and fall through to each other within the same
//! iteration, ending with the display render.

use core::fmt;

use crate::board::{Board, CalibrationReason, DeviceConfig, SampleStatus};
use crate::cascade::{TickCascade, TickReport};
use crate::pending::{DisplayRequest, PendingWork, TaskSet};
use crate::power::{PowerStateSelector, SleepDepth};
use crate::trace::{DispatchTrace, TraceEvent};

/// Steps the loop can service.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    LcdRefresh,
    Sample,
    Comm,
    MotorStop,
    Keyboard,
    Tick,
    Menu,
    MotorPulse,
    Render,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Step::LcdRefresh => "lcd-refresh",
            Step::Sample => "adc",
            Step::Comm => "com",
            Step::MotorStop => "motor-stop",
            Step::Keyboard => "keyboard",
            Step::Tick => "tick",
            Step::Menu => "menu",
            Step::MotorPulse => "motor-pulse",
            Step::Render => "render",
        };
        f.write_str(label)
    }
}

/// What the loop does after a stage has serviced its task.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Flow {
    /// Go back to the idle check.
    Restart,
    /// Continue with the next stage in the same iteration.
    FallThrough,
}

/// How a stage decides it has work.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Trigger {
    /// A task bit in the registry.
    Task(TaskSet),
    /// Key events queued or the auto-update countdown is due.
    MenuDue,
    /// Any display sub-request pending.
    DisplayPending,
}

/// One row of the priority table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Stage {
    pub step: Step,
    pub trigger: Trigger,
    pub flow: Flow,
}

impl Stage {
    const fn new(step: Step, trigger: Trigger, flow: Flow) -> Self {
        Self {
            step,
            trigger,
            flow,
        }
    }
}

/// Service order, highest priority first.
pub const PRIORITY: [Stage; 9] = [
    Stage::new(
        Step::LcdRefresh,
        Trigger::Task(TaskSet::LCD_REFRESH),
        Flow::Restart,
    ),
    Stage::new(Step::Sample, Trigger::Task(TaskSet::ADC), Flow::Restart),
    Stage::new(Step::Comm, Trigger::Task(TaskSet::COM), Flow::Restart),
    Stage::new(
        Step::MotorStop,
        Trigger::Task(TaskSet::MOTOR_STOP),
        Flow::Restart,
    ),
    Stage::new(
        Step::Keyboard,
        Trigger::Task(TaskSet::KEYBOARD),
        Flow::FallThrough,
    ),
    Stage::new(Step::Tick, Trigger::Task(TaskSet::RTC), Flow::FallThrough),
    Stage::new(Step::Menu, Trigger::MenuDue, Flow::FallThrough),
    Stage::new(
        Step::MotorPulse,
        Trigger::Task(TaskSet::MOTOR_PULSE),
        Flow::FallThrough,
    ),
    Stage::new(Step::Render, Trigger::DisplayPending, Flow::FallThrough),
];

/// Implicit states of the loop.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoopState {
    CheckingIdle,
    RunningTask,
    Sleeping,
}

/// Maximum number of steps one iteration can service.
pub const MAX_STEPS_PER_CYCLE: usize = PRIORITY.len();

/// Summary of one loop iteration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Cycle {
    /// Sleep depth entered before servicing, if the loop slept.
    pub slept: Option<SleepDepth>,
    pub steps: heapless::Vec<Step, MAX_STEPS_PER_CYCLE>,
    /// Set when the iteration ended on a restarting stage.
    pub restarted: bool,
    pub tick: Option<TickReport>,
}

impl Cycle {
    /// `true` when the iteration slept and then found nothing to do.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.steps.is_empty()
    }

    fn push(&mut self, step: Step) {
        // Each stage runs at most once per iteration, so this never overflows.
        let _ = self.steps.push(step);
    }
}

/// Owner of the main loop.
pub struct Scheduler<'a, B: Board> {
    board: B,
    pending: &'a PendingWork,
    cascade: TickCascade,
    selector: PowerStateSelector,
    trace: DispatchTrace,
    state: LoopState,
}

impl<'a, B: Board> Scheduler<'a, B> {
    /// Builds a scheduler around a validated board configuration.
    pub fn new(board: B, pending: &'a PendingWork, config: DeviceConfig) -> Self {
        Self {
            board,
            pending,
            cascade: TickCascade::new(config),
            selector: PowerStateSelector::new(),
            trace: DispatchTrace::new(),
            state: LoopState::CheckingIdle,
        }
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    #[must_use]
    pub fn pending(&self) -> &'a PendingWork {
        self.pending
    }

    pub fn cascade(&self) -> &TickCascade {
        &self.cascade
    }

    pub fn trace(&self) -> &DispatchTrace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut DispatchTrace {
        &mut self.trace
    }

    #[must_use]
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Runs the loop forever.
    pub fn run(&mut self) -> ! {
        loop {
            self.run_once();
        }
    }

    /// Executes one iteration: the idle check, then the priority table.
    pub fn run_once(&mut self) -> Cycle {
        let mut cycle = Cycle::default();

        self.state = LoopState::CheckingIdle;
        if let Some(depth) = self.selector.try_sleep(self.pending, &mut self.board) {
            self.state = LoopState::Sleeping;
            self.trace.record(TraceEvent::Slept(depth));
            cycle.slept = Some(depth);
        }

        self.state = LoopState::RunningTask;
        for stage in &PRIORITY {
            if !self.claim(stage.trigger) {
                continue;
            }

            self.service(stage.step, &mut cycle);
            cycle.push(stage.step);
            self.trace.record(TraceEvent::Serviced(stage.step));

            if stage.flow == Flow::Restart {
                cycle.restarted = true;
                break;
            }
        }

        self.state = LoopState::CheckingIdle;
        cycle
    }

    /// Tests a stage trigger and, for task triggers, clears the bit.
    fn claim(&mut self, trigger: Trigger) -> bool {
        match trigger {
            Trigger::Task(task) => !self.pending.drain_and_clear(task).is_empty(),
            Trigger::MenuDue => self.board.has_events() || self.cascade.auto_update().is_due(),
            Trigger::DisplayPending => !self.pending.display().is_empty(),
        }
    }

    fn service(&mut self, step: Step, cycle: &mut Cycle) {
        match step {
            Step::LcdRefresh => self.board.refresh(),
            Step::Sample => {
                if self.board.service() == SampleStatus::Continue {
                    self.pending.request_sample();
                }
            }
            Step::Comm => self.board.parse_pending(),
            Step::MotorStop => self.board.stop(),
            Step::Keyboard => self.board.poll(),
            Step::Tick => {
                let report = self
                    .cascade
                    .run(&mut self.board, self.pending, &mut self.trace);
                cycle.tick = Some(report);
            }
            Step::Menu => {
                self.pending.request_display(DisplayRequest::UPDATE);
                if self.board.evaluate(self.cascade.auto_update_mut()) {
                    self.pending.request_redraw();
                }
            }
            Step::MotorPulse => {
                let contact = self.board.poll_contact();
                self.board
                    .update_calibration(CalibrationReason::Contact(contact));
                self.board.pulse();
            }
            Step::Render => {
                let request = self.pending.take_display();
                self.board.render(request.wants_clear());
            }
        }
    }
}

impl<B: Board> fmt::Debug for Scheduler<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", self.pending)
            .field("cascade", &self.cascade)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
