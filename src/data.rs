//! ConjectureData - the source of choices for one test case
//!
//! A [`ConjectureData`] hands out typed choices to the test function and
//! records every one of them, together with the span structure the test
//! declares. It runs in one of two modes: generating fresh values from a
//! seeded provider, or replaying a recorded prefix. Either way a prefix is
//! consumed first; once it runs out (or stops fitting the constraints), the
//! provider takes over.
//!
//! When the test finishes, [`ConjectureData::conclude`] freezes the data
//! into an immutable [`ConjectureResult`].

use crate::choice::{
    sort_key, BooleanConstraints, BytesConstraints, ChoiceNode, ChoiceType, ChoiceValue, Constraints,
    FloatConstraints, IntegerConstraints, IntervalSet, SortKey, StringConstraints,
};
use crate::persistence::choices_to_bytes;
use crate::providers::{PrimitiveProvider, RandomProvider, SimplestProvider};
use crate::spans::{SpanRecord, Spans};

use byteorder::{BigEndian, ByteOrder};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha384};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Derives a stable 64-bit span label from a name: the first eight bytes of
/// its SHA-384 digest, big-endian.
pub fn calc_label_from_name(name: &str) -> u64 {
    let digest = Sha384::digest(name.as_bytes());
    BigEndian::read_u64(&digest[..8])
}

/// Folds several labels into one, order-sensitively.
pub fn combine_labels(labels: &[u64]) -> u64 {
    labels.iter().fold(0u64, |label, &l| label.rotate_left(1) ^ l)
}

/// Label of the implicit root span.
pub static TOP_LABEL: Lazy<u64> = Lazy::new(|| calc_label_from_name("top"));

/// How a test case ended. The derived order is the order of "interest":
/// `Overflow < Invalid < Valid < Interesting`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Status {
    Overflow,
    Invalid,
    Valid,
    Interesting,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Overflow => "overflow",
            Status::Invalid => "invalid",
            Status::Valid => "valid",
            Status::Interesting => "interesting",
        };
        f.write_str(name)
    }
}

/// Identifies a distinct failure, so that two different bugs are shrunk and
/// reported separately.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InterestingOrigin {
    pub kind: String,
    pub location: Option<String>,
}

impl InterestingOrigin {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            location: None,
        }
    }

    pub fn at(kind: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            location: Some(location.into()),
        }
    }

    /// Origin of a panic raised by the test function. The message is not
    /// part of the identity: it often embeds the failing values.
    pub fn panic(location: Option<String>) -> Self {
        Self {
            kind: "panic".to_string(),
            location,
        }
    }
}

impl fmt::Display for InterestingOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.kind, location),
            None => f.write_str(&self.kind),
        }
    }
}

/// What a test function reports when it returns normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Valid,
    Invalid,
    Overflow,
    Interesting(InterestingOrigin),
}

impl Outcome {
    pub fn interesting(kind: impl Into<String>) -> Self {
        Outcome::Interesting(InterestingOrigin::new(kind))
    }

    /// `Valid` if `passed`, otherwise interesting with the given kind.
    pub fn check(passed: bool, kind: impl Into<String>) -> Self {
        if passed {
            Outcome::Valid
        } else {
            Outcome::interesting(kind)
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Outcome::Valid => Status::Valid,
            Outcome::Invalid => Status::Invalid,
            Outcome::Overflow => Status::Overflow,
            Outcome::Interesting(_) => Status::Interesting,
        }
    }
}

/// What a test function returns.
pub type TestResult = Result<Outcome, DrawError>;

/// Misuse of the data API. These abort the whole run: they are bugs in the
/// caller, not properties of the generated input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("cannot use a test case after it has been concluded")]
    Frozen,
    #[error("stop_span called with no open span")]
    UnmatchedStopSpan,
    #[error("test case concluded with {open} span(s) still open")]
    UnclosedSpans { open: usize },
    #[error("spans interleaved: expected {expected} open span(s) on exit, found {found}")]
    InterleavedSpans { expected: usize, found: usize },
    #[error("invalid {choice_type} constraints: {reason}")]
    InvalidConstraints { choice_type: ChoiceType, reason: String },
    #[error("forced value {value} is not permitted by its constraints")]
    ForcedNotPermitted { value: String },
    #[error("expected a {expected} choice, got a {found}")]
    KindMismatch { expected: ChoiceType, found: ChoiceType },
    #[error("invalid target {label:?}: {reason}")]
    InvalidTarget { label: String, reason: String },
}

/// Why a draw did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawError {
    /// The choice budget ran out. The test case concludes as overflow.
    #[error("exceeded the maximum of {max_choices} choices")]
    Overrun { max_choices: usize },
    /// The test rejected its input, e.g. through a failed assumption.
    #[error("invalid test case: {0}")]
    Invalid(String),
    #[error(transparent)]
    Usage(#[from] UsageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMode {
    Generate,
    Replay,
}

/// A test case in progress.
#[derive(Debug)]
pub struct ConjectureData {
    mode: DataMode,
    prefix: Vec<ChoiceValue>,
    provider: Box<dyn PrimitiveProvider>,
    max_choices: usize,
    nodes: Vec<ChoiceNode>,
    spans: SpanRecord,
    notes: Vec<String>,
    target_observations: BTreeMap<String, f64>,
    frozen: bool,
    overrun: bool,
    misaligned_at: Option<usize>,
    usage_error: Option<UsageError>,
}

impl ConjectureData {
    /// Replays `prefix`, then draws from a provider seeded with `seed`.
    pub fn generate(seed: u64, prefix: Vec<ChoiceValue>, max_choices: usize) -> Self {
        Self::with_provider(DataMode::Generate, prefix, Box::new(RandomProvider::new(seed)), max_choices)
    }

    /// Replays `choices` exactly. Draws beyond the recorded choices, or that
    /// no longer fit, get the simplest permitted value.
    pub fn for_choices(choices: Vec<ChoiceValue>, max_choices: usize) -> Self {
        Self::with_provider(DataMode::Replay, choices, Box::new(SimplestProvider), max_choices)
    }

    pub fn with_provider(
        mode: DataMode,
        prefix: Vec<ChoiceValue>,
        provider: Box<dyn PrimitiveProvider>,
        max_choices: usize,
    ) -> Self {
        Self {
            mode,
            prefix,
            provider,
            max_choices,
            nodes: Vec::new(),
            spans: SpanRecord::new(*TOP_LABEL),
            notes: Vec::new(),
            target_observations: BTreeMap::new(),
            frozen: false,
            overrun: false,
            misaligned_at: None,
            usage_error: None,
        }
    }

    pub fn mode(&self) -> DataMode {
        self.mode
    }

    pub fn max_choices(&self) -> usize {
        self.max_choices
    }

    /// Number of choices drawn so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[ChoiceNode] {
        &self.nodes
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// First position at which the replayed prefix did not fit.
    pub fn misaligned_at(&self) -> Option<usize> {
        self.misaligned_at
    }

    /// Depth of open spans, not counting the root.
    pub fn depth(&self) -> usize {
        self.spans.open()
    }

    fn fail(&mut self, error: UsageError) -> DrawError {
        log::debug!("usage error: {}", error);
        if self.usage_error.is_none() {
            self.usage_error = Some(error.clone());
        }
        DrawError::Usage(error)
    }

    fn check_live(&mut self) -> Result<(), DrawError> {
        if let Some(error) = &self.usage_error {
            return Err(DrawError::Usage(error.clone()));
        }
        if self.frozen {
            return Err(self.fail(UsageError::Frozen));
        }
        if self.overrun {
            return Err(DrawError::Overrun {
                max_choices: self.max_choices,
            });
        }
        Ok(())
    }

    /// Draws one choice of any kind. A forced value is recorded as the
    /// choice but still occupies a prefix position.
    pub fn draw_choice(
        &mut self,
        constraints: Constraints,
        forced: Option<ChoiceValue>,
    ) -> Result<ChoiceValue, DrawError> {
        self.check_live()?;
        if let Err(reason) = constraints.validate() {
            return Err(self.fail(UsageError::InvalidConstraints {
                choice_type: constraints.choice_type(),
                reason,
            }));
        }
        if let Some(value) = &forced {
            if !constraints.permits(value) {
                let value = value.to_string();
                return Err(self.fail(UsageError::ForcedNotPermitted { value }));
            }
        }

        let index = self.nodes.len();
        if index >= self.max_choices {
            log::trace!("overrun at {} choices", index);
            self.overrun = true;
            return Err(DrawError::Overrun {
                max_choices: self.max_choices,
            });
        }

        let (value, was_forced) = match forced {
            Some(value) => (value, true),
            None => (self.next_value(index, &constraints), false),
        };
        self.nodes.push(ChoiceNode::new(value.clone(), constraints, was_forced, index));
        Ok(value)
    }

    fn next_value(&mut self, index: usize, constraints: &Constraints) -> ChoiceValue {
        if let Some(recorded) = self.prefix.get(index) {
            if constraints.permits(recorded) {
                return recorded.clone();
            }
            if self.misaligned_at.is_none() {
                log::trace!("prefix misaligned at {}: {} does not fit", index, recorded);
                self.misaligned_at = Some(index);
            }
        }
        let value = self.provider.draw(constraints);
        if constraints.permits(&value) {
            value
        } else {
            log::warn!("provider produced {} outside its constraints", value);
            constraints.simplest()
        }
    }

    fn mismatch(&mut self, expected: ChoiceType, value: &ChoiceValue) -> DrawError {
        self.fail(UsageError::KindMismatch {
            expected,
            found: value.choice_type(),
        })
    }

    pub fn draw_boolean(&mut self, p: f64) -> Result<bool, DrawError> {
        self.draw_boolean_with(p, None)
    }

    pub fn draw_boolean_with(&mut self, p: f64, forced: Option<bool>) -> Result<bool, DrawError> {
        let constraints = Constraints::Boolean(BooleanConstraints::new(p));
        match self.draw_choice(constraints, forced.map(ChoiceValue::Boolean))? {
            ChoiceValue::Boolean(value) => Ok(value),
            other => Err(self.mismatch(ChoiceType::Boolean, &other)),
        }
    }

    pub fn draw_integer(&mut self, min_value: Option<i128>, max_value: Option<i128>) -> Result<i128, DrawError> {
        self.draw_integer_with(IntegerConstraints::new(min_value, max_value), None)
    }

    pub fn draw_integer_with(
        &mut self,
        constraints: IntegerConstraints,
        forced: Option<i128>,
    ) -> Result<i128, DrawError> {
        match self.draw_choice(Constraints::Integer(constraints), forced.map(ChoiceValue::Integer))? {
            ChoiceValue::Integer(value) => Ok(value),
            other => Err(self.mismatch(ChoiceType::Integer, &other)),
        }
    }

    pub fn draw_float(&mut self, constraints: FloatConstraints) -> Result<f64, DrawError> {
        self.draw_float_with(constraints, None)
    }

    pub fn draw_float_with(&mut self, constraints: FloatConstraints, forced: Option<f64>) -> Result<f64, DrawError> {
        match self.draw_choice(Constraints::Float(constraints), forced.map(ChoiceValue::Float))? {
            ChoiceValue::Float(value) => Ok(value),
            other => Err(self.mismatch(ChoiceType::Float, &other)),
        }
    }

    pub fn draw_string(
        &mut self,
        intervals: &IntervalSet,
        min_size: usize,
        max_size: usize,
    ) -> Result<String, DrawError> {
        let constraints = StringConstraints::new(intervals.clone(), min_size, max_size);
        match self.draw_choice(Constraints::String(constraints), None)? {
            ChoiceValue::String(value) => Ok(value),
            other => Err(self.mismatch(ChoiceType::String, &other)),
        }
    }

    pub fn draw_bytes(&mut self, min_size: usize, max_size: usize) -> Result<Vec<u8>, DrawError> {
        let constraints = BytesConstraints::new(min_size, max_size);
        match self.draw_choice(Constraints::Bytes(constraints), None)? {
            ChoiceValue::Bytes(value) => Ok(value),
            other => Err(self.mismatch(ChoiceType::Bytes, &other)),
        }
    }

    pub fn start_span(&mut self, label: u64) -> Result<(), DrawError> {
        self.check_live()?;
        self.spans.start(label, self.nodes.len());
        Ok(())
    }

    pub fn stop_span(&mut self) -> Result<(), DrawError> {
        self.stop_span_with(false)
    }

    /// Closes the innermost span. A discarded span marks choices the test
    /// drew and then threw away; the shrinker deletes those first.
    pub fn stop_span_with(&mut self, discard: bool) -> Result<(), DrawError> {
        self.check_live()?;
        match self.spans.stop(self.nodes.len(), discard) {
            Some(_) => Ok(()),
            None => Err(self.fail(UsageError::UnmatchedStopSpan)),
        }
    }

    /// Runs `f` inside a span labelled `label`. `f` must leave the span
    /// depth as it found it.
    pub fn span<T, F>(&mut self, label: u64, f: F) -> Result<T, DrawError>
    where
        F: FnOnce(&mut Self) -> Result<T, DrawError>,
    {
        self.start_span(label)?;
        let expected = self.spans.open();
        let value = f(self)?;
        let found = self.spans.open();
        if found != expected {
            return Err(self.fail(UsageError::InterleavedSpans { expected, found }));
        }
        self.stop_span()?;
        Ok(value)
    }

    /// Marks the test case invalid unless `condition` holds.
    pub fn assume(&mut self, condition: bool, reason: &str) -> Result<(), DrawError> {
        if condition {
            Ok(())
        } else {
            Err(DrawError::Invalid(reason.to_string()))
        }
    }

    /// Attaches a message to the eventual result.
    pub fn note(&mut self, message: impl Into<String>) {
        self.notes.push(message.into());
    }

    /// Records a score for targeted search to maximize. Each label may be
    /// scored once per test case, and scores must be finite.
    pub fn target(&mut self, label: impl Into<String>, score: f64) -> Result<(), DrawError> {
        if let Some(error) = &self.usage_error {
            return Err(DrawError::Usage(error.clone()));
        }
        if self.frozen {
            return Err(self.fail(UsageError::Frozen));
        }
        let label = label.into();
        let reason = if !score.is_finite() {
            Some(format!("score must be finite, got {}", score))
        } else if self.target_observations.contains_key(&label) {
            Some("already scored in this test case".to_string())
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(self.fail(UsageError::InvalidTarget { label, reason }));
        }
        log::trace!("target {:?} = {}", label, score);
        self.target_observations.insert(label, score);
        Ok(())
    }

    pub fn target_observations(&self) -> &BTreeMap<String, f64> {
        &self.target_observations
    }

    /// Freezes the test case. Overrun always wins over the reported outcome,
    /// and open spans are only tolerated for overflowing or invalid cases.
    pub fn conclude(&mut self, outcome: Outcome) -> Result<ConjectureResult, UsageError> {
        if self.frozen {
            return Err(UsageError::Frozen);
        }
        self.frozen = true;
        if let Some(error) = self.usage_error.take() {
            return Err(error);
        }

        let outcome = if self.overrun { Outcome::Overflow } else { outcome };
        let open = self.spans.open();
        if open > 0 && matches!(outcome, Outcome::Valid | Outcome::Interesting(_)) {
            return Err(UsageError::UnclosedSpans { open });
        }

        let status = outcome.status();
        let interesting_origin = match outcome {
            Outcome::Interesting(origin) => Some(origin),
            _ => None,
        };
        let spans = std::mem::replace(&mut self.spans, SpanRecord::new(*TOP_LABEL)).finish(self.nodes.len());
        Ok(ConjectureResult {
            status,
            interesting_origin,
            nodes: std::mem::take(&mut self.nodes),
            spans,
            misaligned_at: self.misaligned_at,
            notes: std::mem::take(&mut self.notes),
            target_observations: std::mem::take(&mut self.target_observations),
        })
    }
}

/// The immutable record of a finished test case.
#[derive(Debug, Clone)]
pub struct ConjectureResult {
    pub status: Status,
    pub interesting_origin: Option<InterestingOrigin>,
    pub nodes: Vec<ChoiceNode>,
    pub spans: Spans,
    pub misaligned_at: Option<usize>,
    pub notes: Vec<String>,
    /// Scores reported through [`ConjectureData::target`], by label.
    pub target_observations: BTreeMap<String, f64>,
}

impl ConjectureResult {
    pub fn choices(&self) -> Vec<ChoiceValue> {
        self.nodes.iter().map(|node| node.value.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn sort_key(&self) -> SortKey {
        sort_key(&self.nodes)
    }

    pub fn is_interesting(&self) -> bool {
        self.status == Status::Interesting
    }

    /// The replay buffer for this result's choices.
    pub fn to_bytes(&self) -> Vec<u8> {
        choices_to_bytes(&self.choices())
    }
}
