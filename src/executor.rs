//! Running the test function
//!
//! The [`Executor`] owns the oracle and turns one [`ConjectureData`] into one
//! [`ConjectureResult`]. Draw errors and panics are classified here: an
//! overrun concludes as overflow, a rejected input as invalid, a panic as
//! interesting with the panic location as its origin. Usage errors are not
//! outcomes; they halt whatever is driving the executor.

use crate::choice::ChoiceValue;
use crate::data::{ConjectureData, ConjectureResult, DrawError, InterestingOrigin, Outcome, TestResult, UsageError};

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use std::time::Instant;
use thiserror::Error;

/// The test function under examination.
pub trait Oracle {
    fn execute(&mut self, data: &mut ConjectureData) -> TestResult;
}

impl<F> Oracle for F
where
    F: FnMut(&mut ConjectureData) -> TestResult,
{
    fn execute(&mut self, data: &mut ConjectureData) -> TestResult {
        self(data)
    }
}

/// Why execution stopped early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Halt {
    #[error("the run deadline has passed")]
    Deadline,
    #[error("the shrink call budget is exhausted")]
    ShrinkBudget,
    #[error(transparent)]
    Usage(#[from] UsageError),
}

thread_local! {
    static CAPTURING: Cell<bool> = Cell::new(false);
    static PANIC_LOCATION: RefCell<Option<String>> = RefCell::new(None);
}

static INSTALL_HOOK: Once = Once::new();

/// Installs a process-wide hook that records panic locations, and stays
/// silent, on threads currently running an oracle. Other panics reach the
/// previous hook untouched.
fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if CAPTURING.with(Cell::get) {
                let location = info
                    .location()
                    .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()));
                PANIC_LOCATION.with(|slot| *slot.borrow_mut() = location);
            } else {
                previous(info);
            }
        }));
    });
}

#[derive(Debug)]
struct CapturedPanic {
    message: String,
    location: Option<String>,
}

fn capture_panics<T>(f: impl FnOnce() -> T) -> Result<T, CapturedPanic> {
    install_panic_hook();
    let was_capturing = CAPTURING.with(|c| c.replace(true));
    let result = panic::catch_unwind(AssertUnwindSafe(f));
    CAPTURING.with(|c| c.set(was_capturing));
    result.map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        let location = PANIC_LOCATION.with(|slot| slot.borrow_mut().take());
        CapturedPanic { message, location }
    })
}

pub struct Executor<O> {
    oracle: O,
    max_choices: usize,
    deadline: Option<Instant>,
    calls: usize,
}

impl<O: Oracle> Executor<O> {
    pub fn new(oracle: O, max_choices: usize) -> Self {
        Self {
            oracle,
            max_choices,
            deadline: None,
            calls: 0,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }

    pub fn max_choices(&self) -> usize {
        self.max_choices
    }

    /// Oracle invocations so far.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn check_deadline(&self) -> Result<(), Halt> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Halt::Deadline),
            _ => Ok(()),
        }
    }

    /// Runs one test case, unless the deadline has passed.
    pub fn execute(&mut self, data: ConjectureData) -> Result<ConjectureResult, Halt> {
        self.check_deadline()?;
        Ok(self.run(data)?)
    }

    /// Replays `choices`, allowing `extend` further simplest-valued draws.
    pub fn replay(&mut self, choices: &[ChoiceValue], extend: usize) -> Result<ConjectureResult, Halt> {
        let max_choices = choices.len().saturating_add(extend).min(self.max_choices);
        self.execute(ConjectureData::for_choices(choices.to_vec(), max_choices))
    }

    /// Replays `choices` exactly, ignoring the deadline.
    pub fn confirm(&mut self, choices: &[ChoiceValue]) -> Result<ConjectureResult, UsageError> {
        self.run(ConjectureData::for_choices(choices.to_vec(), choices.len()))
    }

    fn run(&mut self, mut data: ConjectureData) -> Result<ConjectureResult, UsageError> {
        self.calls += 1;
        let oracle = &mut self.oracle;
        let outcome = match capture_panics(|| oracle.execute(&mut data)) {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(DrawError::Overrun { .. })) => Outcome::Overflow,
            Ok(Err(DrawError::Invalid(reason))) => {
                data.note(reason);
                Outcome::Invalid
            }
            Ok(Err(DrawError::Usage(error))) => return Err(error),
            Err(panic) => {
                data.note(panic.message);
                Outcome::Interesting(InterestingOrigin::panic(panic.location))
            }
        };
        let result = data.conclude(outcome)?;
        log::trace!(
            "call {}: {} with {} choices{}",
            self.calls,
            result.status,
            result.len(),
            result
                .interesting_origin
                .as_ref()
                .map(|origin| format!(" ({})", origin))
                .unwrap_or_default()
        );
        Ok(result)
    }
}
