//! # Conjecture
//!
//! The core of a property-based testing engine. Test functions draw typed
//! choices from a [`ConjectureData`]; the [`ConjectureRunner`] generates
//! random test cases, and when one fails the [`Shrinker`] reduces its choice
//! sequence to a shortlex-minimal one that still fails the same way.
//!
//! ```no_run
//! use conjecture::{ConjectureData, ConjectureRunner, Outcome, RunnerConfig, TestResult};
//!
//! let mut runner = ConjectureRunner::new(
//!     |data: &mut ConjectureData| -> TestResult {
//!         let n = data.draw_integer(None, None)?;
//!         Ok(Outcome::check(n < 100, "too large"))
//!     },
//!     RunnerConfig::default(),
//! );
//! let report = runner.run().unwrap();
//! assert_eq!(report.failures[0].result.choices()[0], conjecture::ChoiceValue::Integer(100));
//! ```

pub mod choice;
pub mod data;
pub mod datatree;
pub mod engine;
pub mod executor;
pub mod floats;
pub mod minimizer;
pub mod persistence;
pub mod providers;
pub mod shrinking;
pub mod spans;
pub mod utils;

pub use choice::{
    BooleanConstraints, BytesConstraints, ChoiceNode, ChoiceType, ChoiceValue, Constraints, FloatConstraints,
    IntegerConstraints, IntervalSet, SortKey, StringConstraints,
};
pub use data::{
    calc_label_from_name, ConjectureData, ConjectureResult, DrawError, InterestingOrigin, Outcome, Status,
    TestResult, UsageError,
};
pub use datatree::DataTree;
pub use engine::{
    ConjectureRunner, EngineError, ExecutionPhase, ExitReason, FailureReport, HealthCheck, HealthCheckFailure, Phase,
    RunReport, RunnerConfig, RunnerStats, Verdict,
};
pub use executor::{Executor, Halt, Oracle};
pub use minimizer::{find_integer, minimize, Minimizer};
pub use persistence::{deserialize, serialize, DecodeError, ReplayableChoices};
pub use providers::{PrimitiveProvider, RandomProvider, SimplestProvider};
pub use shrinking::{ShrinkOutcome, ShrinkPass, ShrinkPassStats, Shrinker};
pub use spans::{Span, Spans};
