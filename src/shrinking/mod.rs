//! Shrinking interesting test cases
//!
//! A [`Shrinker`] takes one interesting [`ConjectureResult`] and repeatedly
//! proposes edits to its choice sequence, replaying each through the oracle.
//! An edit is kept only when the replay is interesting with an acceptable
//! origin and is strictly smaller in shortlex order, so the shrink target
//! only ever decreases.
//!
//! Passes run in a fixed order, each to completion. The sweep repeats while
//! any pass made progress. Passes marked expensive stay off until a sweep of
//! the cheap ones stalls, and then stay on.

mod passes;

use crate::choice::{choice_key, ChoiceValue, SortKey};
use crate::data::{ConjectureResult, InterestingOrigin, Status, UsageError};
use crate::executor::{Executor, Halt, Oracle};
use crate::persistence::fingerprint;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Default cap on oracle calls for one shrink.
pub const DEFAULT_MAX_SHRINK_CALLS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShrinkPass {
    RemoveDiscarded,
    SpanDeletion,
    NodeDeletion,
    ZeroSpans,
    MinimizeIndividualChoices,
    MinimizeDuplicatedChoices,
    ReorderSpans,
    MinimizeIntegerRuns,
    RedistributeIntegerPairs,
    PassToDescendant,
    LowerAndDelete,
}

impl ShrinkPass {
    /// Every pass, in the order a sweep runs them.
    pub const ALL: [ShrinkPass; 11] = [
        ShrinkPass::RemoveDiscarded,
        ShrinkPass::SpanDeletion,
        ShrinkPass::NodeDeletion,
        ShrinkPass::ZeroSpans,
        ShrinkPass::MinimizeIndividualChoices,
        ShrinkPass::MinimizeDuplicatedChoices,
        ShrinkPass::ReorderSpans,
        ShrinkPass::MinimizeIntegerRuns,
        ShrinkPass::RedistributeIntegerPairs,
        ShrinkPass::PassToDescendant,
        ShrinkPass::LowerAndDelete,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShrinkPass::RemoveDiscarded => "remove_discarded",
            ShrinkPass::SpanDeletion => "span_deletion",
            ShrinkPass::NodeDeletion => "node_deletion",
            ShrinkPass::ZeroSpans => "zero_spans",
            ShrinkPass::MinimizeIndividualChoices => "minimize_individual_choices",
            ShrinkPass::MinimizeDuplicatedChoices => "minimize_duplicated_choices",
            ShrinkPass::ReorderSpans => "reorder_spans",
            ShrinkPass::MinimizeIntegerRuns => "minimize_integer_runs",
            ShrinkPass::RedistributeIntegerPairs => "redistribute_integer_pairs",
            ShrinkPass::PassToDescendant => "pass_to_descendant",
            ShrinkPass::LowerAndDelete => "lower_and_delete",
        }
    }

    pub fn is_expensive(self) -> bool {
        matches!(
            self,
            ShrinkPass::RedistributeIntegerPairs | ShrinkPass::PassToDescendant | ShrinkPass::LowerAndDelete
        )
    }

    /// Deletion passes may switch to a different failure when slips are
    /// allowed.
    pub fn accepts_any(self) -> bool {
        matches!(self, ShrinkPass::SpanDeletion | ShrinkPass::NodeDeletion)
    }
}

impl fmt::Display for ShrinkPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShrinkPassStats {
    pub runs: usize,
    pub calls: usize,
    pub shrinks: usize,
    /// Choices removed by this pass's successful edits.
    pub removed: usize,
}

/// What a finished shrink hands back.
#[derive(Debug, Clone)]
pub struct ShrinkOutcome {
    pub result: ConjectureResult,
    pub origin: InterestingOrigin,
    pub calls: usize,
    pub shrinks: usize,
    /// Smallest example seen for every other origin hit along the way.
    pub discovered: Vec<ConjectureResult>,
    /// Set when shrinking stopped on the deadline or the call budget rather
    /// than converging.
    pub halted: Option<Halt>,
    pub pass_stats: Vec<(ShrinkPass, ShrinkPassStats)>,
}

pub struct Shrinker<'a, O> {
    executor: &'a mut Executor<O>,
    target: ConjectureResult,
    target_key: SortKey,
    origin: InterestingOrigin,
    allow_slips: bool,
    accept_any: bool,
    expensive_enabled: bool,
    max_calls: usize,
    calls: usize,
    shrinks: usize,
    cache: HashMap<[u8; 32], ConjectureResult>,
    discovered: Vec<ConjectureResult>,
    current_pass: Option<ShrinkPass>,
    pass_stats: HashMap<ShrinkPass, ShrinkPassStats>,
}

impl<'a, O: Oracle> Shrinker<'a, O> {
    /// `target` must be interesting with `origin`.
    pub fn new(executor: &'a mut Executor<O>, target: ConjectureResult, origin: InterestingOrigin) -> Self {
        let mut cache = HashMap::new();
        cache.insert(fingerprint(&target.choices()), target.clone());
        Self {
            executor,
            target_key: target.sort_key(),
            target,
            origin,
            allow_slips: false,
            accept_any: false,
            expensive_enabled: false,
            max_calls: DEFAULT_MAX_SHRINK_CALLS,
            calls: 0,
            shrinks: 0,
            cache,
            discovered: Vec::new(),
            current_pass: None,
            pass_stats: HashMap::new(),
        }
    }

    pub fn with_max_calls(mut self, max_calls: usize) -> Self {
        self.max_calls = max_calls;
        self
    }

    /// Lets deletion passes move on to a different failure.
    pub fn allow_slips(mut self, allow: bool) -> Self {
        self.allow_slips = allow;
        self
    }

    pub fn target(&self) -> &ConjectureResult {
        &self.target
    }

    pub fn origin(&self) -> &InterestingOrigin {
        &self.origin
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn shrinks(&self) -> usize {
        self.shrinks
    }

    pub fn pass_stats(&self, pass: ShrinkPass) -> ShrinkPassStats {
        self.pass_stats.get(&pass).copied().unwrap_or_default()
    }

    /// Runs the greedy loop to convergence, the deadline or the call budget.
    pub fn shrink(mut self) -> Result<ShrinkOutcome, UsageError> {
        let initial = self.target.len();
        log::debug!("shrinking {} from {} choices", self.origin, initial);
        let halted = match self.greedy_shrink() {
            Ok(()) => None,
            Err(Halt::Usage(error)) => return Err(error),
            Err(halt) => {
                log::debug!("shrinking stopped early: {}", halt);
                Some(halt)
            }
        };
        log::debug!(
            "shrank {} from {} to {} choices in {} calls",
            self.origin,
            initial,
            self.target.len(),
            self.calls
        );
        let pass_stats = ShrinkPass::ALL.iter().map(|&pass| (pass, self.pass_stats(pass))).collect();
        Ok(ShrinkOutcome {
            result: self.target,
            origin: self.origin,
            calls: self.calls,
            shrinks: self.shrinks,
            discovered: self.discovered,
            halted,
            pass_stats,
        })
    }

    fn greedy_shrink(&mut self) -> Result<(), Halt> {
        self.try_simplest()?;
        loop {
            let before = self.shrinks;
            for pass in ShrinkPass::ALL {
                if pass.is_expensive() && !self.expensive_enabled {
                    continue;
                }
                self.run_pass(pass)?;
            }
            if self.shrinks > before {
                continue;
            }
            if self.expensive_enabled {
                return Ok(());
            }
            log::debug!("cheap passes stalled at {} choices, enabling expensive passes", self.target.len());
            self.expensive_enabled = true;
        }
    }

    /// Runs one pass to completion. Returns whether it shrank the target.
    pub fn run_pass(&mut self, pass: ShrinkPass) -> Result<bool, Halt> {
        let before = self.shrinks;
        self.current_pass = Some(pass);
        self.accept_any = self.allow_slips && pass.accepts_any();
        self.pass_stats.entry(pass).or_default().runs += 1;
        let result = match pass {
            ShrinkPass::RemoveDiscarded => self.remove_discarded(),
            ShrinkPass::SpanDeletion => self.span_deletion(),
            ShrinkPass::NodeDeletion => self.node_deletion(),
            ShrinkPass::ZeroSpans => self.zero_spans(),
            ShrinkPass::MinimizeIndividualChoices => self.minimize_individual_choices(),
            ShrinkPass::MinimizeDuplicatedChoices => self.minimize_duplicated_choices(),
            ShrinkPass::ReorderSpans => self.reorder_spans(),
            ShrinkPass::MinimizeIntegerRuns => self.minimize_integer_runs(),
            ShrinkPass::RedistributeIntegerPairs => self.redistribute_integer_pairs(),
            ShrinkPass::PassToDescendant => self.pass_to_descendant(),
            ShrinkPass::LowerAndDelete => self.lower_and_delete(),
        };
        self.current_pass = None;
        self.accept_any = false;
        result?;
        let improved = self.shrinks > before;
        if improved {
            log::debug!("{} shrank the target to {} choices", pass, self.target.len());
        }
        Ok(improved)
    }

    fn try_simplest(&mut self) -> Result<bool, Halt> {
        let attempt = self
            .target
            .nodes
            .iter()
            .map(|node| {
                if node.was_forced {
                    node.value.clone()
                } else {
                    node.constraints.simplest()
                }
            })
            .collect();
        self.consider(attempt)
    }

    pub(crate) fn choices(&self) -> Vec<ChoiceValue> {
        self.target.choices()
    }

    /// Whether `choices` could possibly beat the target. Positions whose
    /// value does not fit the target's constraints may change the shape of
    /// the test case, so they are left to the replay to judge.
    fn could_improve(&self, choices: &[ChoiceValue]) -> bool {
        let nodes = &self.target.nodes;
        if choices.len() != nodes.len() {
            return choices.len() < nodes.len();
        }
        for (value, node) in choices.iter().zip(nodes) {
            if !node.constraints.permits(value) {
                return true;
            }
            match choice_key(value, &node.constraints).cmp(&node.key()) {
                Ordering::Less => return true,
                Ordering::Greater => return false,
                Ordering::Equal => {}
            }
        }
        false
    }

    fn run_choices(&mut self, choices: &[ChoiceValue], extend: usize) -> Result<ConjectureResult, Halt> {
        if self.calls >= self.max_calls {
            return Err(Halt::ShrinkBudget);
        }
        self.calls += 1;
        if let Some(pass) = self.current_pass {
            self.pass_stats.entry(pass).or_default().calls += 1;
        }
        let result = self.executor.replay(choices, extend)?;
        if result.status == Status::Interesting && result.interesting_origin.as_ref() != Some(&self.origin) {
            self.note_discovered(&result);
        }
        Ok(result)
    }

    fn note_discovered(&mut self, result: &ConjectureResult) {
        let origin = &result.interesting_origin;
        match self.discovered.iter_mut().find(|known| &known.interesting_origin == origin) {
            Some(known) => {
                if result.sort_key() < known.sort_key() {
                    *known = result.clone();
                }
            }
            None => {
                if let Some(origin) = origin {
                    log::debug!("found a different failure while shrinking: {}", origin);
                }
                self.discovered.push(result.clone());
            }
        }
    }

    /// Replays `choices` unless they cannot beat the target. Results are
    /// memoized by fingerprint.
    fn execute_candidate(&mut self, choices: &[ChoiceValue]) -> Result<Option<ConjectureResult>, Halt> {
        if !self.could_improve(choices) {
            return Ok(None);
        }
        let key = fingerprint(choices);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(Some(cached.clone()));
        }
        let result = self.run_choices(choices, 0)?;
        self.cache.insert(key, result.clone());
        Ok(Some(result))
    }

    /// Makes `result` the new target if it is acceptable and smaller.
    fn incorporate(&mut self, result: &ConjectureResult) -> bool {
        if result.status != Status::Interesting {
            return false;
        }
        let origin = match &result.interesting_origin {
            Some(origin) => origin,
            None => return false,
        };
        if origin != &self.origin && !self.accept_any {
            return false;
        }
        let key = result.sort_key();
        if key >= self.target_key {
            return false;
        }
        if origin != &self.origin {
            log::debug!("slipped from {} to {}", self.origin, origin);
            self.origin = origin.clone();
        }
        let removed = self.target.len().saturating_sub(result.len());
        if let Some(pass) = self.current_pass {
            let stats = self.pass_stats.entry(pass).or_default();
            stats.shrinks += 1;
            stats.removed += removed;
        }
        self.target = result.clone();
        self.target_key = key;
        self.shrinks += 1;
        true
    }

    /// Replays `choices` and keeps the result if it improves the target.
    pub(crate) fn consider(&mut self, choices: Vec<ChoiceValue>) -> Result<bool, Halt> {
        match self.execute_candidate(&choices)? {
            Some(result) => Ok(self.incorporate(&result)),
            None => Ok(false),
        }
    }

    /// Like [`Shrinker::consider`], but when the edit before `edit_end`
    /// changed how many choices the test consumes, also tries a repaired
    /// variant of the attempt.
    fn try_with_repair(&mut self, attempt: Vec<ChoiceValue>, edit_end: usize) -> Result<bool, Halt> {
        let result = match self.execute_candidate(&attempt)? {
            Some(result) => result,
            None => return Ok(false),
        };
        if self.incorporate(&result) {
            return Ok(true);
        }
        self.repair(&attempt, &result, edit_end)
    }

    fn repair(&mut self, attempt: &[ChoiceValue], result: &ConjectureResult, edit_end: usize) -> Result<bool, Halt> {
        if result.status == Status::Overflow {
            // The edit made the test want more choices: let it draw simplest
            // values up to the size of the current target.
            let extend = self.target.len().saturating_sub(attempt.len());
            if extend == 0 {
                return Ok(false);
            }
            let extended = self.run_choices(attempt, extend)?;
            return Ok(self.incorporate(&extended));
        }
        // The test stopped early, so choices after the edit were lost.
        // Assume they are the ones right behind it.
        let consumed = result.len();
        if consumed >= attempt.len() || edit_end >= attempt.len() {
            return Ok(false);
        }
        let lost = attempt.len() - consumed;
        let end = edit_end.saturating_add(lost).min(attempt.len());
        let mut repaired = attempt[..edit_end].to_vec();
        repaired.extend_from_slice(&attempt[end..]);
        self.consider(repaired)
    }

    /// Sets several positions at once. Fails without replaying if any
    /// position is forced or does not permit its new value.
    fn try_replacements(&mut self, replacements: &[(usize, ChoiceValue)]) -> Result<bool, Halt> {
        let mut attempt = self.choices();
        let mut edit_end = 0;
        for (index, value) in replacements {
            match self.target.nodes.get(*index) {
                Some(node) if !node.was_forced && node.constraints.permits(value) => {
                    attempt[*index] = value.clone();
                    edit_end = edit_end.max(index + 1);
                }
                _ => return Ok(false),
            }
        }
        self.try_with_repair(attempt, edit_end)
    }

    fn try_replace(&mut self, index: usize, value: ChoiceValue) -> Result<bool, Halt> {
        self.try_replacements(&[(index, value)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ConjectureData, Outcome, TestResult};

    fn at_least_100(data: &mut ConjectureData) -> TestResult {
        let n = data.draw_integer(None, None)?;
        Ok(Outcome::check(n < 100, "large"))
    }

    fn initial<O: Oracle>(executor: &mut Executor<O>, choices: Vec<ChoiceValue>) -> ConjectureResult {
        let result = executor.replay(&choices, 0).unwrap();
        assert_eq!(result.status, Status::Interesting);
        result
    }

    #[test]
    fn pass_names_are_unique() {
        let mut names: Vec<_> = ShrinkPass::ALL.iter().map(|p| p.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ShrinkPass::ALL.len());
    }

    #[test]
    fn only_three_passes_are_expensive() {
        let expensive = ShrinkPass::ALL.iter().filter(|p| p.is_expensive()).count();
        assert_eq!(expensive, 3);
    }

    #[test]
    fn shrinks_an_integer_threshold() {
        let mut executor = Executor::new(at_least_100, 100);
        let target = initial(&mut executor, vec![ChoiceValue::Integer(987_654)]);
        let outcome = Shrinker::new(&mut executor, target, InterestingOrigin::new("large"))
            .shrink()
            .unwrap();
        assert_eq!(outcome.result.choices(), vec![ChoiceValue::Integer(100)]);
        assert!(outcome.halted.is_none());
        assert!(outcome.shrinks > 0);
    }

    #[test]
    fn call_budget_halts() {
        let mut executor = Executor::new(at_least_100, 100);
        let target = initial(&mut executor, vec![ChoiceValue::Integer(987_654)]);
        let outcome = Shrinker::new(&mut executor, target, InterestingOrigin::new("large"))
            .with_max_calls(3)
            .shrink()
            .unwrap();
        assert_eq!(outcome.halted, Some(Halt::ShrinkBudget));
        assert_eq!(outcome.calls, 3);
    }

    #[test]
    fn rejects_candidates_that_cannot_improve() {
        let mut executor = Executor::new(at_least_100, 100);
        let target = initial(&mut executor, vec![ChoiceValue::Integer(500)]);
        let mut shrinker = Shrinker::new(&mut executor, target, InterestingOrigin::new("large"));
        assert!(!shrinker.consider(vec![ChoiceValue::Integer(501)]).unwrap());
        assert!(!shrinker.consider(vec![ChoiceValue::Integer(500)]).unwrap());
        assert_eq!(shrinker.calls(), 0);
        assert!(shrinker.consider(vec![ChoiceValue::Integer(499)]).unwrap());
        assert_eq!(shrinker.calls(), 1);
    }

    #[test]
    fn other_origins_are_recorded_not_accepted() {
        let oracle = |data: &mut ConjectureData| -> TestResult {
            let n = data.draw_integer(Some(0), Some(1000))?;
            Ok(match n {
                0..=9 => Outcome::Valid,
                10..=19 => Outcome::interesting("small"),
                _ => Outcome::interesting("large"),
            })
        };
        let mut executor = Executor::new(oracle, 10);
        let target = initial(&mut executor, vec![ChoiceValue::Integer(700)]);
        let outcome = Shrinker::new(&mut executor, target, InterestingOrigin::new("large"))
            .shrink()
            .unwrap();
        assert_eq!(outcome.result.choices(), vec![ChoiceValue::Integer(20)]);
        assert_eq!(outcome.origin, InterestingOrigin::new("large"));
        assert_eq!(outcome.discovered.len(), 1);
        assert_eq!(
            outcome.discovered[0].interesting_origin,
            Some(InterestingOrigin::new("small"))
        );
    }
}
