//! # Shrinking Test Suite
//!
//! Drives the [`Shrinker`] directly against fixed starting examples.
//!
//! ## Coverage
//!
//! - Known minimal forms for integers, lists, strings and forced draws
//! - Converged results are a fixed point of every individual pass
//! - Slipping to a different failure only when allowed

use conjecture::utils::lists;
use conjecture::{
    ChoiceValue, ConjectureData, ConjectureResult, Executor, InterestingOrigin, IntegerConstraints, IntervalSet,
    Oracle, Outcome, ShrinkOutcome, ShrinkPass, Shrinker, Status, TestResult,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ints(values: &[i128]) -> Vec<ChoiceValue> {
    values.iter().map(|&v| ChoiceValue::Integer(v)).collect()
}

/// Encodes a list of integers the way `lists` draws it.
fn list_choices(values: &[i128]) -> Vec<ChoiceValue> {
    let mut out = Vec::new();
    for &v in values {
        out.push(ChoiceValue::Boolean(true));
        out.push(ChoiceValue::Integer(v));
    }
    out.push(ChoiceValue::Boolean(false));
    out
}

fn interesting<O: Oracle>(executor: &mut Executor<O>, choices: Vec<ChoiceValue>) -> ConjectureResult {
    let result = executor.replay(&choices, 0).unwrap();
    assert_eq!(result.status, Status::Interesting, "starting example must fail");
    result
}

fn shrink_from<O: Oracle>(oracle: O, choices: Vec<ChoiceValue>, allow_slips: bool) -> ShrinkOutcome {
    let mut executor = Executor::new(oracle, 1_000);
    let target = interesting(&mut executor, choices);
    let origin = target.interesting_origin.clone().unwrap();
    Shrinker::new(&mut executor, target, origin)
        .allow_slips(allow_slips)
        .shrink()
        .unwrap()
}

/// Runs every pass once more on a converged result and checks none of them
/// finds anything smaller.
fn assert_fixed_point<O: Oracle>(oracle: O, outcome: &ShrinkOutcome) {
    assert!(outcome.halted.is_none(), "shrink did not converge: {:?}", outcome.halted);
    let mut executor = Executor::new(oracle, 1_000);
    let target = interesting(&mut executor, outcome.result.choices());
    let mut shrinker = Shrinker::new(&mut executor, target, outcome.origin.clone());
    for pass in ShrinkPass::ALL {
        assert!(!shrinker.run_pass(pass).unwrap(), "{} still shrinks {:?}", pass, outcome.result.choices());
    }
    assert_eq!(shrinker.target().choices(), outcome.result.choices());
}

fn at_least_100(data: &mut ConjectureData) -> TestResult {
    let n = data.draw_integer(None, None)?;
    Ok(Outcome::check(n < 100, "large"))
}

fn balanced_pair(data: &mut ConjectureData) -> TestResult {
    let n1 = data.draw_integer(None, None)?;
    let n2 = data.draw_integer(None, None)?;
    Ok(Outcome::check(!(n1 >= 5 && n1.saturating_add(n2) >= 50), "sum"))
}

fn heavy_list(data: &mut ConjectureData) -> TestResult {
    let values = lists(data, 0, 20, None, |data| data.draw_integer(Some(0), Some(1_000)))?;
    Ok(Outcome::check(values.iter().sum::<i128>() < 100, "heavy"))
}

fn long_or_seven(data: &mut ConjectureData) -> TestResult {
    let values = lists(data, 0, 10, None, |data| data.draw_integer(Some(0), Some(10)))?;
    Ok(if values.len() >= 3 {
        Outcome::interesting("long")
    } else if values.first() == Some(&7) {
        Outcome::interesting("seven")
    } else {
        Outcome::Valid
    })
}

// === KNOWN MINIMA ===

#[test]
fn integer_threshold_from_both_sides() {
    init_logging();
    let outcome = shrink_from(at_least_100, ints(&[i128::MAX / 3]), false);
    assert_eq!(outcome.result.choices(), ints(&[100]));
    assert_eq!(outcome.origin, InterestingOrigin::new("large"));
}

#[test]
fn pair_sum_is_redistributed() {
    init_logging();
    let outcome = shrink_from(balanced_pair, ints(&[50, 0]), false);
    assert_eq!(outcome.result.choices(), ints(&[5, 45]));
    let redistributed = outcome
        .pass_stats
        .iter()
        .find(|(pass, _)| *pass == ShrinkPass::RedistributeIntegerPairs)
        .map(|(_, stats)| stats.shrinks)
        .unwrap_or_default();
    assert!(redistributed > 0);
}

#[test]
fn strings_shrink_in_length_then_content() {
    init_logging();
    let alphabet = IntervalSet::from_chars("abc");
    let oracle = move |data: &mut ConjectureData| -> TestResult {
        let s = data.draw_string(&alphabet, 0, 10)?;
        Ok(Outcome::check(s.chars().count() < 3, "three chars"))
    };
    let outcome = shrink_from(oracle, vec![ChoiceValue::String("cbacbc".to_string())], false);
    assert_eq!(outcome.result.choices(), vec![ChoiceValue::String("aaa".to_string())]);
}

#[test]
fn forced_draws_are_left_alone() {
    init_logging();
    let oracle = |data: &mut ConjectureData| -> TestResult {
        let fixed = data.draw_integer_with(IntegerConstraints::bounded(0, 1_000), Some(42))?;
        let free = data.draw_integer(Some(0), Some(1_000))?;
        Ok(Outcome::check(fixed + free < 100, "sum"))
    };
    let outcome = shrink_from(oracle, ints(&[42, 900]), false);
    assert_eq!(outcome.result.choices(), ints(&[42, 58]));
    assert!(outcome.result.nodes[0].was_forced);
    assert!(!outcome.result.nodes[1].was_forced);
}

#[test]
fn shrinking_never_grows_the_example() {
    init_logging();
    let start = list_choices(&[400, 3, 900, 12]);
    let start_len = start.len();
    let outcome = shrink_from(heavy_list, start, false);
    assert!(outcome.result.len() <= start_len);
    assert_eq!(outcome.result.choices(), list_choices(&[100]));
}

// === FIXED POINTS ===

#[test]
fn integer_result_is_a_fixed_point() {
    init_logging();
    let outcome = shrink_from(at_least_100, ints(&[-123_456_789]), false);
    assert_fixed_point(at_least_100, &outcome);
}

#[test]
fn pair_result_is_a_fixed_point() {
    init_logging();
    let outcome = shrink_from(balanced_pair, ints(&[1_000, -3]), false);
    assert_fixed_point(balanced_pair, &outcome);
}

#[test]
fn list_result_is_a_fixed_point() {
    init_logging();
    let outcome = shrink_from(heavy_list, list_choices(&[70, 0, 999, 5, 31]), false);
    assert_fixed_point(heavy_list, &outcome);
}

// === SLIPPING ===

#[test]
fn without_slips_the_origin_is_kept() {
    init_logging();
    let outcome = shrink_from(long_or_seven, list_choices(&[7, 1, 2]), false);
    assert_eq!(outcome.origin, InterestingOrigin::new("long"));
    assert_eq!(outcome.result.choices(), list_choices(&[0, 0, 0]));
    assert!(outcome
        .discovered
        .iter()
        .any(|result| result.interesting_origin == Some(InterestingOrigin::new("seven"))));
}

#[test]
fn with_slips_a_smaller_failure_takes_over() {
    init_logging();
    let outcome = shrink_from(long_or_seven, list_choices(&[7, 1, 2]), true);
    assert_eq!(outcome.origin, InterestingOrigin::new("seven"));
    assert_eq!(outcome.result.choices(), list_choices(&[7]));
}
