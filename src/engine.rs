//! ConjectureRunner - the main test execution engine
//!
//! The runner drives one property through its phases:
//!
//! 1. **Reuse**: replay choice sequences the caller saved from earlier runs.
//! 2. **Generate**: run fresh random test cases, steered away from explored
//!    paths by the [`DataTree`], until the example budget is spent, the
//!    search space is exhausted, or a failure is found.
//! 3. **Target**: when the test reports scores through
//!    [`ConjectureData::target`], hill-climb the best test case per label
//!    with part of the example budget held back from generation.
//! 4. **Shrink**: minimize every distinct failure, in discovery order.
//! 5. **Confirm**: replay each minimized failure once more, so a
//!    nondeterministic oracle is reported as flaky rather than as a bug.
//!
//! Invalid and overflowing test cases never count towards the example
//! budget. Too many of them in a row makes the run unsatisfiable. While the
//! first valid examples are generated the runner also runs health checks,
//! see [`HealthCheck`].

use crate::data::{ConjectureData, ConjectureResult, InterestingOrigin, Status, UsageError};
use crate::datatree::{DataTree, TreeStats};
use crate::choice::ChoiceValue;
use crate::executor::{Executor, Halt, Oracle};
use crate::minimizer::find_integer;
use crate::persistence::{fingerprint, ReplayableChoices};
use crate::shrinking::Shrinker;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Phases a run may go through. Leaving one out of
/// [`RunnerConfig::phases`] skips it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Reuse,
    Generate,
    Target,
    Shrink,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::Reuse, Phase::Generate, Phase::Target, Phase::Shrink];
}

impl TryFrom<&str> for Phase {
    type Error = String;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        match name {
            "reuse" => Ok(Phase::Reuse),
            "generate" => Ok(Phase::Generate),
            "target" => Ok(Phase::Target),
            "shrink" => Ok(Phase::Shrink),
            other => Err(format!("unknown phase {:?}", other)),
        }
    }
}

/// Configuration for the ConjectureRunner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Valid examples to run before stopping
    pub max_examples: usize,

    /// Choices a single test case may draw before it overflows
    pub max_choices: usize,

    /// Wall-clock budget for the whole run
    pub max_time: Option<Duration>,

    /// Seed for the run's random number generator
    pub seed: u64,

    /// Oracle calls shared by all shrinks of one run
    pub max_shrinks: usize,

    /// Consecutive invalid or overflowing test cases that make the run
    /// unsatisfiable
    pub max_invalid_streak: usize,

    /// Consecutive duplicate test cases after which the search space is
    /// considered covered
    pub duplicate_streak_threshold: usize,

    /// Upper bound on remembered choice sequence fingerprints
    pub max_fingerprints: usize,

    pub phases: Vec<Phase>,

    /// Shrink and report every distinct failure instead of just the first
    pub report_multiple_bugs: bool,

    /// Share of `max_examples` held back from generation for targeted
    /// search
    pub targeting_phase_fraction: f64,

    /// Valid examples after which health checks stop
    pub health_check_valid_examples: usize,

    /// Invalid test cases tolerated before the first
    /// `health_check_valid_examples` valid ones
    pub health_check_max_invalid: usize,

    /// Overflowing test cases tolerated in the same window
    pub health_check_max_overflow: usize,

    /// Oracle time tolerated in the same window
    pub health_check_max_time: Option<Duration>,

    /// Health checks that only log a warning instead of failing the run
    pub suppress_health_check: Vec<HealthCheck>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_examples: 100,
            max_choices: 8 * 1024,
            max_time: Some(Duration::from_secs(60)),
            seed: 0,
            max_shrinks: 10_000,
            max_invalid_streak: 1_000,
            duplicate_streak_threshold: 50,
            max_fingerprints: 10_000,
            phases: Phase::ALL.to_vec(),
            report_multiple_bugs: true,
            targeting_phase_fraction: 0.5,
            health_check_valid_examples: 10,
            health_check_max_invalid: 50,
            health_check_max_overflow: 20,
            health_check_max_time: Some(Duration::from_secs(1)),
            suppress_health_check: Vec::new(),
        }
    }
}

impl RunnerConfig {
    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples;
        self
    }

    pub fn with_max_choices(mut self, max_choices: usize) -> Self {
        self.max_choices = max_choices;
        self
    }

    pub fn with_max_time(mut self, max_time: Option<Duration>) -> Self {
        self.max_time = max_time;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_shrinks(mut self, max_shrinks: usize) -> Self {
        self.max_shrinks = max_shrinks;
        self
    }

    pub fn with_max_invalid_streak(mut self, streak: usize) -> Self {
        self.max_invalid_streak = streak;
        self
    }

    pub fn with_duplicate_streak_threshold(mut self, streak: usize) -> Self {
        self.duplicate_streak_threshold = streak;
        self
    }

    pub fn with_max_fingerprints(mut self, max_fingerprints: usize) -> Self {
        self.max_fingerprints = max_fingerprints;
        self
    }

    pub fn with_phases(mut self, phases: &[Phase]) -> Self {
        self.phases = phases.to_vec();
        self
    }

    pub fn with_report_multiple_bugs(mut self, report: bool) -> Self {
        self.report_multiple_bugs = report;
        self
    }

    pub fn with_targeting_phase_fraction(mut self, fraction: f64) -> Self {
        self.targeting_phase_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_health_check_max_time(mut self, max_time: Option<Duration>) -> Self {
        self.health_check_max_time = max_time;
        self
    }

    pub fn suppressing(mut self, checks: &[HealthCheck]) -> Self {
        self.suppress_health_check.extend_from_slice(checks);
        self
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn is_suppressed(&self, check: HealthCheck) -> bool {
        self.suppress_health_check.contains(&check)
    }

    /// Valid examples generated before targeted search takes over.
    fn generation_budget(&self) -> usize {
        if !self.has_phase(Phase::Target) {
            return self.max_examples;
        }
        let held_back = (self.max_examples as f64 * self.targeting_phase_fraction) as usize;
        self.max_examples - held_back.min(self.max_examples)
    }
}

/// Problems with a test rather than with the code under test, detected
/// while the first valid examples are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheck {
    /// Most test cases are rejected.
    FilterTooMuch,
    /// Most test cases overflow `max_choices`.
    DataTooLarge,
    TooSlow,
    /// Even the simplest test case is close to `max_choices`.
    LargeBaseExample,
}

impl fmt::Display for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthCheck::FilterTooMuch => "filter_too_much",
            HealthCheck::DataTooLarge => "data_too_large",
            HealthCheck::TooSlow => "too_slow",
            HealthCheck::LargeBaseExample => "large_base_example",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckFailure {
    pub check: HealthCheck,
    pub message: String,
}

/// What the runner is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPhase {
    Idle,
    Reuse,
    Generate,
    Target,
    Shrink,
    Confirm,
    Done,
}

/// Why the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// The example budget was spent without finding a failure.
    MaxExamples,
    /// Every reachable test case has been run.
    Exhausted,
    TimedOut,
    FoundFailure,
    /// Generation was disabled and nothing was reused.
    Finished,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ExitReason::MaxExamples => "max_examples reached",
            ExitReason::Exhausted => "search space exhausted",
            ExitReason::TimedOut => "timed out",
            ExitReason::FoundFailure => "found a failure",
            ExitReason::Finished => "finished",
        };
        f.write_str(reason)
    }
}

/// Statistics about test execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunnerStats {
    /// Oracle calls, across all phases
    pub calls: usize,

    pub valid: usize,
    pub invalid: usize,
    pub overflow: usize,
    pub interesting: usize,

    /// Generated test cases that repeated an earlier choice sequence
    pub duplicates: usize,

    /// Oracle calls made by targeted search
    pub target_calls: usize,

    pub shrink_calls: usize,
    pub shrinks: usize,

    pub generation_time: Duration,
    pub shrinking_time: Duration,
}

/// Outcome of the confirmation replay of a minimized failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Confirmed,
    /// The exact same choices concluded differently the second time.
    Flaky {
        observed: Status,
        observed_origin: Option<InterestingOrigin>,
    },
}

#[derive(Debug, Clone)]
pub struct FailureReport {
    pub origin: InterestingOrigin,
    /// The minimized failing test case.
    pub result: ConjectureResult,
    pub verdict: Verdict,
}

impl FailureReport {
    pub fn is_flaky(&self) -> bool {
        matches!(self.verdict, Verdict::Flaky { .. })
    }

    /// The failure's choice sequence, ready to be saved and reused.
    pub fn replayable(&self) -> ReplayableChoices {
        ReplayableChoices::from(&self.result)
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub exit_reason: ExitReason,
    /// One entry per distinct failure, in discovery order.
    pub failures: Vec<FailureReport>,
    pub stats: RunnerStats,
    /// Suppressed health checks that would have failed the run.
    pub health_warnings: Vec<HealthCheckFailure>,
    /// Best score seen per target label.
    pub target_scores: BTreeMap<String, f64>,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("unable to satisfy assumptions: {valid} valid, {invalid} invalid and {overflow} overflowing test cases")]
    Unsatisfiable {
        valid: usize,
        invalid: usize,
        overflow: usize,
    },
    #[error("health check {} failed: {}", .0.check, .0.message)]
    HealthCheck(HealthCheckFailure),
}

/// One failure the run is tracking.
#[derive(Debug)]
struct Failure {
    origin: InterestingOrigin,
    result: ConjectureResult,
    shrunk: bool,
}

/// Counts over the health-checked window at the start of generation.
#[derive(Debug, Default)]
struct HealthState {
    valid: usize,
    invalid: usize,
    overflow: usize,
    elapsed: Duration,
}

/// The best-scoring valid test case for one target label.
#[derive(Debug)]
struct TargetBest {
    score: f64,
    result: ConjectureResult,
}

#[derive(Debug, Clone, Copy)]
enum SpanPick {
    Last,
    Random,
}

/// Consecutive non-improving span regenerations before a climb moves on.
const MAX_CLIMB_FAILURES: usize = 10;

/// Main test execution engine
pub struct ConjectureRunner<O> {
    config: RunnerConfig,
    executor: Executor<O>,
    tree: DataTree,
    rng: ChaCha8Rng,
    previous: Vec<ReplayableChoices>,
    fingerprints: HashSet<[u8; 32]>,
    failures: Vec<Failure>,
    stats: RunnerStats,
    phase: ExecutionPhase,
    invalid_streak: usize,
    duplicate_streak: usize,
    first_bug_at: Option<usize>,
    timed_out: bool,
    unsatisfiable: bool,
    health: Option<HealthState>,
    health_warnings: Vec<HealthCheckFailure>,
    best_targets: BTreeMap<String, TargetBest>,
}

impl<O: Oracle> ConjectureRunner<O> {
    pub fn new(oracle: O, config: RunnerConfig) -> Self {
        Self {
            executor: Executor::new(oracle, config.max_choices),
            tree: DataTree::new(),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            previous: Vec::new(),
            fingerprints: HashSet::new(),
            failures: Vec::new(),
            stats: RunnerStats::default(),
            phase: ExecutionPhase::Idle,
            invalid_streak: 0,
            duplicate_streak: 0,
            first_bug_at: None,
            timed_out: false,
            unsatisfiable: false,
            health: None,
            health_warnings: Vec::new(),
            best_targets: BTreeMap::new(),
            config,
        }
    }

    /// Choice sequences to replay before generating anything.
    pub fn with_previous_examples(mut self, examples: Vec<ReplayableChoices>) -> Self {
        self.previous = examples;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    pub fn tree_stats(&self) -> TreeStats {
        self.tree.stats()
    }

    pub fn run(&mut self) -> Result<RunReport, EngineError> {
        log::info!("starting run with seed {}", self.config.seed);
        let deadline = self.config.max_time.map(|budget| Instant::now() + budget);
        self.executor.set_deadline(deadline);

        let exit_reason = self.explore()?;
        if self.config.has_phase(Phase::Shrink) && !self.failures.is_empty() {
            self.shrink_all()?;
        }
        let failures = self.confirm_all()?;
        self.phase = ExecutionPhase::Done;

        if failures.is_empty() && (self.unsatisfiable || (self.stats.valid == 0 && self.stats.calls > 0)) {
            log::info!("run is unsatisfiable");
            return Err(EngineError::Unsatisfiable {
                valid: self.stats.valid,
                invalid: self.stats.invalid,
                overflow: self.stats.overflow,
            });
        }
        let exit_reason = if self.timed_out {
            ExitReason::TimedOut
        } else if !failures.is_empty() {
            ExitReason::FoundFailure
        } else {
            exit_reason
        };
        log::info!(
            "run finished: {} after {} calls, {} failure(s)",
            exit_reason,
            self.stats.calls,
            failures.len()
        );
        Ok(RunReport {
            exit_reason,
            failures,
            stats: self.stats.clone(),
            health_warnings: self.health_warnings.clone(),
            target_scores: self.target_scores(),
        })
    }

    /// Reuse and generation. Returns why generation stopped.
    fn explore(&mut self) -> Result<ExitReason, EngineError> {
        let started = Instant::now();
        let reason = self.reuse_and_generate();
        self.stats.generation_time += started.elapsed();
        reason
    }

    fn reuse_and_generate(&mut self) -> Result<ExitReason, EngineError> {
        if self.config.has_phase(Phase::Reuse) && !self.previous.is_empty() {
            self.phase = ExecutionPhase::Reuse;
            log::info!("replaying {} saved example(s)", self.previous.len());
            for example in std::mem::take(&mut self.previous) {
                let data = example.into_data(self.config.max_choices);
                if self.test(data)?.is_none() {
                    return Ok(ExitReason::TimedOut);
                }
            }
            if !self.failures.is_empty() && !self.config.report_multiple_bugs {
                return Ok(ExitReason::FoundFailure);
            }
        }

        if !self.config.has_phase(Phase::Generate) {
            return Ok(ExitReason::Finished);
        }
        self.phase = ExecutionPhase::Generate;
        if !self.check_base_example()? {
            return Ok(ExitReason::TimedOut);
        }
        if self.failures.is_empty() {
            self.health = Some(HealthState::default());
        }

        let budget = self.config.generation_budget();
        let reason = self.generate_until(budget)?;
        if reason != ExitReason::MaxExamples || self.unsatisfiable || budget == self.config.max_examples {
            return Ok(reason);
        }
        if !self.best_targets.is_empty() && !self.optimise_targets()? {
            return Ok(ExitReason::TimedOut);
        }
        self.phase = ExecutionPhase::Generate;
        self.generate_until(self.config.max_examples)
    }

    /// Generates fresh test cases until `max_valid` of them were valid or
    /// something else stops generation.
    fn generate_until(&mut self, max_valid: usize) -> Result<ExitReason, EngineError> {
        log::info!("generating up to {} examples", max_valid);
        loop {
            if let Some(reason) = self.should_stop_generating(max_valid) {
                log::debug!("generation stopped: {}", reason);
                return Ok(reason);
            }
            let prefix = self.tree.generate_novel_prefix(&mut self.rng);
            let seed = self.rng.gen();
            let data = ConjectureData::generate(seed, prefix, self.config.max_choices);
            if self.test(data)?.is_none() {
                return Ok(ExitReason::TimedOut);
            }
        }
    }

    fn should_stop_generating(&mut self, max_valid: usize) -> Option<ExitReason> {
        if self.tree.is_exhausted() {
            return Some(ExitReason::Exhausted);
        }
        if self.duplicate_streak >= self.config.duplicate_streak_threshold {
            return Some(ExitReason::Exhausted);
        }
        if self.invalid_streak >= self.config.max_invalid_streak {
            self.unsatisfiable = true;
            return Some(ExitReason::MaxExamples);
        }
        if let Some(first_bug_at) = self.first_bug_at {
            // Keep looking for other bugs for as long again as the first
            // one took to find.
            if !self.config.report_multiple_bugs || self.stats.calls >= 2 * first_bug_at {
                return Some(ExitReason::FoundFailure);
            }
        }
        if self.stats.valid >= max_valid {
            return Some(ExitReason::MaxExamples);
        }
        None
    }

    /// Runs the all-simplest test case. Returns false once the deadline has
    /// passed.
    fn check_base_example(&mut self) -> Result<bool, EngineError> {
        let data = ConjectureData::for_choices(Vec::new(), self.config.max_choices);
        let result = match self.test(data)? {
            Some(result) => result,
            None => return Ok(false),
        };
        let max_choices = self.config.max_choices;
        let too_large = match result.status {
            Status::Overflow => true,
            Status::Valid => result.len() * 2 > max_choices,
            _ => false,
        };
        if too_large {
            let message = format!(
                "the simplest test case concluded {} after {} choices, against a limit of {}",
                result.status,
                result.len(),
                max_choices
            );
            self.fail_health_check(HealthCheck::LargeBaseExample, message)?;
        }
        Ok(true)
    }

    /// Runs one test case and files its result. `None` once the deadline
    /// has passed.
    fn test(&mut self, data: ConjectureData) -> Result<Option<ConjectureResult>, EngineError> {
        let started = Instant::now();
        let result = match self.executor.execute(data) {
            Ok(result) => result,
            Err(Halt::Usage(error)) => return Err(error.into()),
            Err(halt) => {
                log::info!("stopping after {} calls: {}", self.stats.calls, halt);
                self.timed_out = halt == Halt::Deadline;
                return Ok(None);
            }
        };
        let elapsed = started.elapsed();
        self.stats.calls += 1;
        self.tree.record(&result);

        let key = fingerprint(&result.choices());
        if self.fingerprints.contains(&key) {
            self.stats.duplicates += 1;
            self.duplicate_streak += 1;
            if result.status < Status::Valid {
                self.invalid_streak += 1;
            }
            return Ok(Some(result));
        }
        if self.fingerprints.len() < self.config.max_fingerprints {
            self.fingerprints.insert(key);
        }
        self.duplicate_streak = 0;

        match result.status {
            Status::Valid => {
                self.stats.valid += 1;
                self.invalid_streak = 0;
                self.record_targets(&result);
            }
            Status::Invalid => {
                self.stats.invalid += 1;
                self.invalid_streak += 1;
            }
            Status::Overflow => {
                self.stats.overflow += 1;
                self.invalid_streak += 1;
            }
            Status::Interesting => {
                self.stats.interesting += 1;
                self.invalid_streak = 0;
                self.first_bug_at.get_or_insert(self.stats.calls);
                self.health = None;
                self.record_failure(result.clone());
            }
        }
        self.check_health(result.status, elapsed)?;
        Ok(Some(result))
    }

    fn check_health(&mut self, status: Status, elapsed: Duration) -> Result<(), EngineError> {
        let state = match self.health.as_mut() {
            Some(state) => state,
            None => return Ok(()),
        };
        state.elapsed += elapsed;
        match status {
            Status::Valid => state.valid += 1,
            Status::Invalid => state.invalid += 1,
            Status::Overflow => state.overflow += 1,
            Status::Interesting => {}
        }
        let HealthState {
            valid,
            invalid,
            overflow,
            elapsed,
        } = *state;

        if valid >= self.config.health_check_valid_examples {
            log::debug!("health checks passed after {} calls", self.stats.calls);
            self.health = None;
            return Ok(());
        }
        let (check, message) = if overflow >= self.config.health_check_max_overflow {
            let message = format!(
                "{} test cases overran {} choices while only {} valid ones were generated",
                overflow, self.config.max_choices, valid
            );
            (HealthCheck::DataTooLarge, message)
        } else if invalid >= self.config.health_check_max_invalid {
            let message = format!(
                "{} test cases were rejected while only {} valid ones were generated",
                invalid, valid
            );
            (HealthCheck::FilterTooMuch, message)
        } else if self.config.health_check_max_time.map_or(false, |limit| elapsed > limit) {
            let message = format!(
                "generating {} valid test cases took {:?} ({} invalid, {} overran)",
                valid, elapsed, invalid, overflow
            );
            (HealthCheck::TooSlow, message)
        } else {
            return Ok(());
        };
        self.health = None;
        self.fail_health_check(check, message)
    }

    fn fail_health_check(&mut self, check: HealthCheck, message: String) -> Result<(), EngineError> {
        let failure = HealthCheckFailure { check, message };
        if self.config.is_suppressed(check) {
            log::warn!("suppressed health check {}: {}", check, failure.message);
            self.health_warnings.push(failure);
            return Ok(());
        }
        log::info!("health check {} failed: {}", check, failure.message);
        Err(EngineError::HealthCheck(failure))
    }

    fn record_targets(&mut self, result: &ConjectureResult) {
        for (label, &score) in &result.target_observations {
            let improved = self
                .best_targets
                .get(label)
                .map_or(true, |best| score > best.score);
            if improved {
                log::trace!("target {:?} improved to {}", label, score);
                let best = TargetBest {
                    score,
                    result: result.clone(),
                };
                self.best_targets.insert(label.clone(), best);
            }
        }
    }

    fn target_scores(&self) -> BTreeMap<String, f64> {
        self.best_targets
            .iter()
            .map(|(label, best)| (label.clone(), best.score))
            .collect()
    }

    /// Hill-climbs the best test case of every target label. Returns false
    /// once the deadline has passed.
    fn optimise_targets(&mut self) -> Result<bool, EngineError> {
        self.phase = ExecutionPhase::Target;
        let labels: Vec<String> = self.best_targets.keys().cloned().collect();
        log::info!("optimising {} target(s)", labels.len());
        let calls_before = self.stats.calls;
        let mut finished = true;
        for label in &labels {
            if !self.hill_climb(label)? {
                finished = false;
                break;
            }
            log::debug!("target {:?} climbed to {}", label, self.best_score(label));
        }
        self.stats.target_calls += self.stats.calls - calls_before;
        Ok(finished)
    }

    fn keep_climbing(&self) -> bool {
        self.failures.is_empty()
            && self.stats.valid < self.config.max_examples
            && self.invalid_streak < self.config.max_invalid_streak
    }

    fn best_score(&self, label: &str) -> f64 {
        self.best_targets
            .get(label)
            .map_or(f64::NEG_INFINITY, |best| best.score)
    }

    fn hill_climb(&mut self, label: &str) -> Result<bool, EngineError> {
        for pick in [SpanPick::Last, SpanPick::Random] {
            let mut failures = 0;
            while failures < MAX_CLIMB_FAILURES && self.keep_climbing() {
                match self.regenerate_span(label, pick)? {
                    None => return Ok(false),
                    Some(true) => failures = 0,
                    Some(false) => failures += 1,
                }
            }
        }
        self.nudge_integers(label)
    }

    /// Runs `data` and reports whether it raised the best score of `label`.
    fn try_target(&mut self, label: &str, data: ConjectureData) -> Result<Option<(bool, ConjectureResult)>, EngineError> {
        let before = self.best_score(label);
        Ok(self
            .test(data)?
            .map(|result| (self.best_score(label) > before, result)))
    }

    /// Redraws one span of the best test case at random, first as a fresh
    /// tail and then spliced back in front of the choices that followed it.
    fn regenerate_span(&mut self, label: &str, pick: SpanPick) -> Result<Option<bool>, EngineError> {
        let current = match self.best_targets.get(label) {
            Some(best) => best.result.clone(),
            None => return Ok(Some(false)),
        };
        let candidates: Vec<usize> = current
            .spans
            .iter()
            .filter(|span| !span.is_empty())
            .map(|span| span.index)
            .collect();
        let chosen = match pick {
            SpanPick::Last => candidates.last().copied(),
            SpanPick::Random if candidates.is_empty() => None,
            SpanPick::Random => Some(candidates[self.rng.gen_range(0..candidates.len())]),
        };
        let (span_index, start, end) = match chosen.and_then(|index| current.spans.get(index)) {
            Some(span) => (span.index, span.start, span.end),
            None => return Ok(Some(false)),
        };

        let choices = current.choices();
        let seed = self.rng.gen();
        let data = ConjectureData::generate(seed, choices[..start].to_vec(), self.config.max_choices);
        let attempt = match self.try_target(label, data)? {
            None => return Ok(None),
            Some((true, _)) => return Ok(Some(true)),
            Some((false, attempt)) => attempt,
        };
        let redrawn = match attempt.spans.get(span_index) {
            Some(span) if span.start == start && span.end <= attempt.len() => {
                attempt.choices()[span.start..span.end].to_vec()
            }
            _ => return Ok(Some(false)),
        };
        let mut spliced = choices[..start].to_vec();
        spliced.extend(redrawn);
        spliced.extend_from_slice(&choices[end..]);
        let data = ConjectureData::for_choices(spliced, self.config.max_choices);
        Ok(self.try_target(label, data)?.map(|(improved, _)| improved))
    }

    /// The unforced integer at `index` of the best test case for `label`.
    fn integer_choice(&self, label: &str, index: usize) -> Option<i128> {
        let node = self.best_targets.get(label)?.result.nodes.get(index)?;
        match node.value {
            ChoiceValue::Integer(value) if !node.was_forced => Some(value),
            _ => None,
        }
    }

    /// Pushes each integer choice of the best test case up, then down, for
    /// as long as the score keeps rising.
    fn nudge_integers(&mut self, label: &str) -> Result<bool, EngineError> {
        let mut index = 0;
        loop {
            let length = match self.best_targets.get(label) {
                Some(best) => best.result.len(),
                None => return Ok(true),
            };
            if index >= length || !self.keep_climbing() {
                return Ok(true);
            }
            for upwards in [true, false] {
                let base = match self.integer_choice(label, index) {
                    Some(base) => base,
                    None => break,
                };
                let mut halted = false;
                find_integer(|step| -> Result<bool, EngineError> {
                    if halted || !self.keep_climbing() {
                        return Ok(false);
                    }
                    match self.nudge(label, index, base, step, upwards)? {
                        Some(improved) => Ok(improved),
                        None => {
                            halted = true;
                            Ok(false)
                        }
                    }
                })?;
                if halted {
                    return Ok(false);
                }
            }
            index += 1;
        }
    }

    fn nudge(
        &mut self,
        label: &str,
        index: usize,
        base: i128,
        step: u128,
        upwards: bool,
    ) -> Result<Option<bool>, EngineError> {
        let best = match self.best_targets.get(label) {
            Some(best) => &best.result,
            None => return Ok(Some(false)),
        };
        let shifted = if upwards {
            base.checked_add_unsigned(step)
        } else {
            base.checked_sub_unsigned(step)
        };
        let value = match shifted.map(ChoiceValue::Integer) {
            Some(value) if best.nodes.get(index).map_or(false, |node| node.constraints.permits(&value)) => value,
            _ => return Ok(Some(false)),
        };
        let mut choices = best.choices();
        choices[index] = value;
        let data = ConjectureData::for_choices(choices, self.config.max_choices);
        Ok(self.try_target(label, data)?.map(|(improved, _)| improved))
    }

    /// Keeps the smallest result per origin, in discovery order.
    fn record_failure(&mut self, result: ConjectureResult) {
        let origin = match result.interesting_origin.clone() {
            Some(origin) => origin,
            None => return,
        };
        match self.failures.iter_mut().find(|failure| failure.origin == origin) {
            Some(failure) => {
                if !failure.shrunk && result.sort_key() < failure.result.sort_key() {
                    failure.result = result;
                }
            }
            None => {
                log::info!("found failure {} with {} choices", origin, result.len());
                self.failures.push(Failure {
                    origin,
                    result,
                    shrunk: false,
                });
            }
        }
    }

    fn shrink_all(&mut self) -> Result<(), EngineError> {
        self.phase = ExecutionPhase::Shrink;
        let started = Instant::now();
        let outcome = self.shrink_failures();
        self.stats.shrinking_time += started.elapsed();
        outcome
    }

    fn shrink_failures(&mut self) -> Result<(), EngineError> {
        if !self.config.report_multiple_bugs {
            self.failures.truncate(1);
        }
        let mut index = 0;
        while index < self.failures.len() {
            let remaining = self.config.max_shrinks.saturating_sub(self.stats.shrink_calls);
            if remaining == 0 {
                log::info!("shrink budget spent, reporting remaining failures unshrunk");
                break;
            }
            let target = self.failures[index].result.clone();
            let origin = self.failures[index].origin.clone();
            log::info!("shrinking {} ({} choices)", origin, target.len());
            let outcome = Shrinker::new(&mut self.executor, target, origin)
                .with_max_calls(remaining)
                .allow_slips(!self.config.report_multiple_bugs)
                .shrink()?;
            self.stats.calls += outcome.calls;
            self.stats.shrink_calls += outcome.calls;
            self.stats.shrinks += outcome.shrinks;
            if outcome.halted == Some(Halt::Deadline) {
                self.timed_out = true;
            }

            let failure = &mut self.failures[index];
            failure.origin = outcome.origin;
            failure.result = outcome.result;
            failure.shrunk = true;
            if self.config.report_multiple_bugs {
                for found in outcome.discovered {
                    self.record_failure(found);
                }
            }
            if self.timed_out {
                break;
            }
            index += 1;
        }
        Ok(())
    }

    fn confirm_all(&mut self) -> Result<Vec<FailureReport>, EngineError> {
        if self.failures.is_empty() {
            return Ok(Vec::new());
        }
        self.phase = ExecutionPhase::Confirm;
        let mut reports = Vec::with_capacity(self.failures.len());
        for failure in &self.failures {
            let replay = self.executor.confirm(&failure.result.choices())?;
            self.stats.calls += 1;
            let verdict = if replay.status == Status::Interesting
                && replay.interesting_origin.as_ref() == Some(&failure.origin)
            {
                Verdict::Confirmed
            } else {
                log::warn!(
                    "flaky test: {} did not reproduce on replay (got {})",
                    failure.origin,
                    replay.status
                );
                Verdict::Flaky {
                    observed: replay.status,
                    observed_origin: replay.interesting_origin,
                }
            };
            reports.push(FailureReport {
                origin: failure.origin.clone(),
                result: failure.result.clone(),
                verdict,
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::ChoiceValue;
    use crate::data::{Outcome, TestResult};

    #[test]
    fn phases_parse_from_names() {
        assert_eq!(Phase::try_from("reuse"), Ok(Phase::Reuse));
        assert_eq!(Phase::try_from("generate"), Ok(Phase::Generate));
        assert_eq!(Phase::try_from("target"), Ok(Phase::Target));
        assert_eq!(Phase::try_from("shrink"), Ok(Phase::Shrink));
        assert!(Phase::try_from("explain").is_err());
    }

    #[test]
    fn default_config_enables_every_phase() {
        let config = RunnerConfig::default();
        assert!(Phase::ALL.iter().all(|&phase| config.has_phase(phase)));
        assert_eq!(config.max_choices, 8192);
    }

    #[test]
    fn targeting_holds_back_part_of_the_budget() {
        let config = RunnerConfig::default().with_max_examples(101);
        assert_eq!(config.generation_budget(), 51);
        assert_eq!(config.clone().with_targeting_phase_fraction(2.0).generation_budget(), 0);
        let untargeted = config.with_phases(&[Phase::Generate, Phase::Shrink]);
        assert_eq!(untargeted.generation_budget(), 101);
    }

    #[test]
    fn passing_test_spends_the_example_budget() {
        let mut runner = ConjectureRunner::new(
            |data: &mut ConjectureData| -> TestResult {
                data.draw_integer(None, None)?;
                Ok(Outcome::Valid)
            },
            RunnerConfig::default().with_max_examples(30),
        );
        let report = runner.run().unwrap();
        assert!(report.passed());
        assert_eq!(report.exit_reason, ExitReason::MaxExamples);
        assert_eq!(report.stats.valid, 30);
        assert_eq!(runner.phase(), ExecutionPhase::Done);
    }

    #[test]
    fn always_invalid_is_unsatisfiable() {
        let mut runner = ConjectureRunner::new(
            |data: &mut ConjectureData| -> TestResult {
                data.draw_integer(None, None)?;
                data.assume(false, "never")?;
                Ok(Outcome::Valid)
            },
            RunnerConfig::default().with_max_invalid_streak(20),
        );
        match runner.run() {
            Err(EngineError::Unsatisfiable { valid, invalid, .. }) => {
                assert_eq!(valid, 0);
                assert!(invalid > 0 && invalid <= 20, "{} invalid", invalid);
            }
            other => panic!("expected unsatisfiable, got {:?}", other.map(|r| r.exit_reason)),
        }
    }

    #[test]
    fn rejected_duplicates_still_count_towards_unsatisfiable() {
        let saved = vec![ReplayableChoices::new(vec![ChoiceValue::Integer(7)]); 3];
        let mut runner = ConjectureRunner::new(
            |data: &mut ConjectureData| -> TestResult {
                let n = data.draw_integer(Some(0), Some(100))?;
                data.assume(n > 100, "never")?;
                Ok(Outcome::Valid)
            },
            RunnerConfig::default().with_max_invalid_streak(3),
        )
        .with_previous_examples(saved);
        match runner.run() {
            Err(EngineError::Unsatisfiable { valid, invalid, .. }) => {
                assert_eq!(valid, 0);
                // 7 once, then the all-zero base example.
                assert_eq!(invalid, 2);
            }
            other => panic!("expected unsatisfiable, got {:?}", other.map(|r| r.exit_reason)),
        }
        assert_eq!(runner.stats().duplicates, 2);
        assert_eq!(runner.stats().calls, 4);
    }

    #[test]
    fn skipping_shrink_reports_the_raw_failure() {
        let mut runner = ConjectureRunner::new(
            |data: &mut ConjectureData| -> TestResult {
                let n = data.draw_integer(Some(0), Some(1_000_000))?;
                Ok(Outcome::check(n < 10, "big"))
            },
            RunnerConfig::default()
                .with_phases(&[Phase::Generate])
                .with_report_multiple_bugs(false),
        );
        let report = runner.run().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.stats.shrink_calls, 0);
        assert_eq!(report.failures[0].verdict, Verdict::Confirmed);
    }

    #[test]
    fn saved_examples_are_replayed_first() {
        let saved = ReplayableChoices::new(vec![ChoiceValue::Integer(77)]);
        let mut runner = ConjectureRunner::new(
            |data: &mut ConjectureData| -> TestResult {
                let n = data.draw_integer(Some(0), Some(100))?;
                Ok(Outcome::check(n != 77, "seventy-seven"))
            },
            RunnerConfig::default().with_phases(&[Phase::Reuse]),
        )
        .with_previous_examples(vec![saved]);
        let report = runner.run().unwrap();
        assert_eq!(report.stats.calls, 2);
        assert_eq!(report.failures[0].result.choices(), vec![ChoiceValue::Integer(77)]);
    }
}
