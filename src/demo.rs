//! Demo sequencer: scripted choreographies run through the dispatcher.
//!
//! A [`DemoPattern`] is a list of `(command, hold)` steps. A run plays the
//! pattern [`DEMO_CYCLES`] times, submitting each step as an ordinary
//! command. A step that does not succeed aborts the whole run; demos never
//! retry and never roll back what already moved.
//!
//! Cancellation is cooperative. The run checks its
//! [`CancellationToken`] before each submission and races every hold
//! against it, but a command already submitted finishes (or times out)
//! on its own.
//!
//! # Example
//!
//! ```rust,no_run
//! use led_chain::demo::{DemoPattern, DemoReport};
//! use led_chain::hal::MockLink;
//! use led_chain::{ChainSession, Config};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let session = ChainSession::connect(Config::default(), MockLink::simulated(4))?;
//! session.ready().await?;
//!
//! let run = session.start_demo(1)?;
//! assert!(session.start_demo(2).is_err()); // one run at a time
//!
//! match run.wait().await? {
//!     DemoReport::Completed { commands } => println!("{commands} commands"),
//!     other => println!("demo ended early: {other}"),
//! }
//! # Ok(())
//! # }
//! ```

use core::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::{Command, EngineError};
use crate::dispatcher::DispatcherHandle;
use crate::events::{Classification, EventLog};

/// Times each pattern is played per run.
pub const DEMO_CYCLES: u32 = 2;

// ============================================================================
// Patterns
// ============================================================================

/// One scripted command and how long to hold after it succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DemoStep {
    /// Command to submit.
    pub command: Command,
    /// Pause after a successful submission.
    pub hold: Duration,
}

impl DemoStep {
    /// Step holding for `hold_ms` milliseconds.
    pub const fn new(command: Command, hold_ms: u64) -> Self {
        Self {
            command,
            hold: Duration::from_millis(hold_ms),
        }
    }
}

/// A named, fixed list of steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DemoPattern {
    /// Display name.
    pub name: String,
    /// Steps in order.
    pub steps: Vec<DemoStep>,
}

impl DemoPattern {
    /// Number of builtin patterns (ids `1..=BUILTIN_COUNT`).
    pub const BUILTIN_COUNT: u8 = 3;

    /// A pattern of your own.
    pub fn custom(name: impl Into<String>, steps: Vec<DemoStep>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Builtin pattern by id.
    ///
    /// 1. `sweep`: every servo through its window
    /// 2. `pulse`: every LED ramped up and back down
    /// 3. `wave`: servos and LEDs alternating together
    ///
    /// ```
    /// use led_chain::demo::{DemoError, DemoPattern};
    ///
    /// assert_eq!(DemoPattern::builtin(1).unwrap().name, "sweep");
    /// assert_eq!(DemoPattern::builtin(4), Err(DemoError::UnknownPattern(4)));
    /// ```
    pub fn builtin(id: u8) -> Result<Self, DemoError> {
        let pattern = match id {
            1 => Self::custom(
                "sweep",
                vec![
                    DemoStep::new(Command::servo_all(60), 600),
                    DemoStep::new(Command::servo_all(90), 600),
                    DemoStep::new(Command::servo_all(120), 600),
                ],
            ),
            2 => Self::custom(
                "pulse",
                vec![
                    DemoStep::new(Command::dac_all(0), 300),
                    DemoStep::new(Command::dac_all(1050), 300),
                    DemoStep::new(Command::dac_all(2100), 500),
                    DemoStep::new(Command::dac_all(0), 300),
                ],
            ),
            3 => Self::custom(
                "wave",
                vec![
                    DemoStep::new(Command::servo_all(75), 100),
                    DemoStep::new(Command::dac_all(700), 400),
                    DemoStep::new(Command::servo_all(105), 100),
                    DemoStep::new(Command::dac_all(1400), 400),
                ],
            ),
            other => return Err(DemoError::UnknownPattern(other)),
        };
        Ok(pattern)
    }

    /// Commands one run submits when nothing fails.
    pub fn commands_per_run(&self) -> usize {
        self.steps.len() * DEMO_CYCLES as usize
    }
}

// ============================================================================
// Errors and reports
// ============================================================================

/// Why a demo could not start.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DemoError {
    /// Another run is active.
    #[error("a demo is already running")]
    AlreadyRunning,
    /// No builtin pattern with this id.
    #[error("no demo pattern {0}")]
    UnknownPattern(u8),
    /// The run ended without producing a report.
    #[error("demo task ended unexpectedly")]
    Lost,
}

/// How a run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DemoReport {
    /// Every step of every cycle succeeded.
    Completed {
        /// Commands submitted.
        commands: usize,
    },
    /// Stopped at a step boundary on request.
    Cancelled {
        /// Commands submitted before stopping.
        commands: usize,
    },
    /// A step failed; later steps were not submitted.
    Aborted {
        /// Cycle of the failed step (1-based).
        cycle: u32,
        /// Failed step within the cycle (1-based).
        step: usize,
        /// What the dispatcher returned.
        error: EngineError,
    },
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DemoReport::Completed { commands } => write!(f, "completed ({commands} commands)"),
            DemoReport::Cancelled { commands } => {
                write!(f, "cancelled after {commands} commands")
            }
            DemoReport::Aborted { cycle, step, error } => {
                write!(f, "aborted at cycle {cycle} step {step}: {error}")
            }
        }
    }
}

// ============================================================================
// Run
// ============================================================================

/// Play `pattern` through `dispatcher` until done, failed or cancelled.
pub async fn run_pattern(
    dispatcher: &DispatcherHandle,
    pattern: &DemoPattern,
    cancel: &CancellationToken,
) -> DemoReport {
    let mut commands = 0;

    for cycle in 1..=DEMO_CYCLES {
        for (index, step) in pattern.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                return DemoReport::Cancelled { commands };
            }

            if let Err(error) = dispatcher.submit(step.command).await {
                return DemoReport::Aborted {
                    cycle,
                    step: index + 1,
                    error,
                };
            }
            commands += 1;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return DemoReport::Cancelled { commands },
                _ = tokio::time::sleep(step.hold) => {}
            }
        }
    }

    DemoReport::Completed { commands }
}

// ============================================================================
// Sequencer
// ============================================================================

#[derive(Debug)]
struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct Slot {
    next_id: u64,
    active: Option<ActiveRun>,
}

/// Starts runs, at most one at a time.
#[derive(Clone, Debug)]
pub struct DemoSequencer {
    dispatcher: DispatcherHandle,
    log: Arc<EventLog>,
    slot: Arc<Mutex<Slot>>,
}

/// A started run.
#[derive(Debug)]
pub struct DemoHandle {
    id: u64,
    name: String,
    cancel: CancellationToken,
    report: oneshot::Receiver<DemoReport>,
}

impl DemoHandle {
    /// Run id, unique per sequencer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Pattern name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the run to stop at its next step boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<DemoReport, DemoError> {
        self.report.await.map_err(|_| DemoError::Lost)
    }
}

impl DemoSequencer {
    /// Sequencer submitting through `dispatcher`.
    pub fn new(dispatcher: DispatcherHandle, log: Arc<EventLog>) -> Self {
        Self {
            dispatcher,
            log,
            slot: Arc::default(),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start builtin pattern `id`.
    pub fn start_builtin(&self, id: u8) -> Result<DemoHandle, DemoError> {
        self.start(DemoPattern::builtin(id)?)
    }

    /// Start `pattern` unless a run is already active.
    pub fn start(&self, pattern: DemoPattern) -> Result<DemoHandle, DemoError> {
        let cancel = CancellationToken::new();
        let id = {
            let mut slot = self.slot();
            if slot.active.is_some() {
                return Err(DemoError::AlreadyRunning);
            }
            slot.next_id += 1;
            let id = slot.next_id;
            slot.active = Some(ActiveRun {
                id,
                cancel: cancel.clone(),
            });
            id
        };

        info!(run = id, pattern = %pattern.name, "demo started");
        self.log
            .local(format!("demo '{}' started", pattern.name), Classification::Demo);

        let (report_tx, report_rx) = oneshot::channel();
        let name = pattern.name.clone();
        let sequencer = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            let report = run_pattern(&sequencer.dispatcher, &pattern, &token).await;
            match &report {
                DemoReport::Aborted { .. } => warn!(run = id, %report, "demo ended"),
                _ => info!(run = id, %report, "demo ended"),
            }
            let class = match report {
                DemoReport::Aborted { .. } => Classification::Failure,
                _ => Classification::Demo,
            };
            sequencer
                .log
                .local(format!("demo '{}' {report}", pattern.name), class);

            // Free the slot before the report is observable.
            {
                let mut slot = sequencer.slot();
                if slot.active.as_ref().map(|run| run.id) == Some(id) {
                    slot.active = None;
                }
            }
            let _ = report_tx.send(report);
        });

        Ok(DemoHandle {
            id,
            name,
            cancel,
            report: report_rx,
        })
    }

    /// Cancel the active run, if any. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match &self.slot().active {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a run is active.
    pub fn is_running(&self) -> bool {
        self.slot().active.is_some()
    }
}
