//! # Test Case Test Suite
//!
//! Behaviour of a single [`ConjectureData`] and of the replay buffer built
//! from its result.
//!
//! ## Coverage
//!
//! - Generation is deterministic per seed and replays reproduce it exactly
//! - Span trees of randomly shaped test cases are well formed
//! - Usage errors surface at the offending call and again at conclusion
//! - Overrun, misalignment and the saved replay format

use conjecture::data::calc_label_from_name;
use conjecture::{
    deserialize, serialize, ChoiceType, ChoiceValue, ConjectureData, ConjectureResult, DrawError, FloatConstraints,
    Outcome, ReplayableChoices, Status, UsageError,
};

const MAX_CHOICES: usize = 1_000;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A recursive structure whose shape depends on its own draws.
fn tree(data: &mut ConjectureData, depth: u64) -> Result<u64, DrawError> {
    data.span(calc_label_from_name("tree") ^ depth, |data| {
        let kind = data.draw_integer(Some(0), Some(4))?;
        match kind {
            0 => Ok(1),
            1 => Ok(u64::from(data.draw_boolean(0.3)?)),
            2 if depth < 4 => {
                let left = tree(data, depth + 1)?;
                let right = tree(data, depth + 1)?;
                Ok(left + right)
            }
            3 => {
                let f = data.draw_float(FloatConstraints::finite())?;
                Ok(u64::from(f > 0.0))
            }
            _ => Ok(data.draw_bytes(0, 4)?.len() as u64),
        }
    })
}

fn program(data: &mut ConjectureData) -> Result<Outcome, DrawError> {
    let total = tree(data, 0)?;
    Ok(Outcome::check(total < 3, "large tree"))
}

fn run(mut data: ConjectureData) -> ConjectureResult {
    match program(&mut data) {
        Ok(outcome) => data.conclude(outcome).unwrap(),
        Err(DrawError::Overrun { .. }) => data.conclude(Outcome::Overflow).unwrap(),
        Err(other) => panic!("unexpected draw error {:?}", other),
    }
}

fn generated(seed: u64) -> ConjectureResult {
    run(ConjectureData::generate(seed, Vec::new(), MAX_CHOICES))
}

// === DETERMINISM AND REPLAY ===

#[test]
fn same_seed_same_test_case() {
    init_logging();
    for seed in 0..50 {
        let a = generated(seed);
        let b = generated(seed);
        assert_eq!(a.choices(), b.choices());
        assert_eq!(a.status, b.status);
        assert_eq!(a.spans, b.spans);
    }
}

#[test]
fn replay_reproduces_generation() {
    init_logging();
    for seed in 0..100 {
        let original = generated(seed);
        let replayed = run(ConjectureData::for_choices(original.choices(), MAX_CHOICES));
        assert_eq!(replayed.choices(), original.choices(), "seed {}", seed);
        assert_eq!(replayed.status, original.status);
        assert_eq!(replayed.interesting_origin, original.interesting_origin);
        assert_eq!(replayed.spans, original.spans);
        assert_eq!(replayed.misaligned_at, None);
    }
}

#[test]
fn prefixes_are_replayed_before_generating() {
    let prefix = vec![ChoiceValue::Integer(2), ChoiceValue::Integer(0), ChoiceValue::Integer(0)];
    for seed in 0..20 {
        let result = run(ConjectureData::generate(seed, prefix.clone(), MAX_CHOICES));
        assert_eq!(&result.choices()[..3], prefix.as_slice());
    }
}

#[test]
fn saved_choices_replay_the_same_result() {
    init_logging();
    for seed in 0..30 {
        let original = generated(seed);
        let saved = deserialize(&serialize(&original)).unwrap();
        assert_eq!(saved.as_slice(), original.choices().as_slice());
        let replayed = run(saved.into_data(MAX_CHOICES));
        assert_eq!(replayed.choices(), original.choices());

        let restored = ReplayableChoices::from_bytes(&ReplayableChoices::from(&original).to_bytes()).unwrap();
        assert_eq!(restored.len(), original.len());
    }
}

// === SPANS ===

#[test]
fn span_trees_are_well_formed() {
    for seed in 0..100 {
        let result = generated(seed);
        let spans = &result.spans;
        assert!(spans.is_well_formed(), "seed {}", seed);
        let root = spans.root().unwrap();
        assert_eq!((root.start, root.end), (0, result.len()));
        for span in spans.iter() {
            for child in &span.children {
                let child = spans.get(*child).unwrap();
                assert_eq!(child.parent, Some(span.index));
                assert_eq!(child.depth, span.depth + 1);
            }
            for descendant in spans.descendants(span.index) {
                assert!(span.contains(spans.get(descendant).unwrap()));
                assert!(spans.get(descendant).unwrap().depth > span.depth);
            }
        }
    }
}

#[test]
fn discarded_spans_are_marked() {
    let mut data = ConjectureData::for_choices(vec![ChoiceValue::Integer(3), ChoiceValue::Integer(4)], 10);
    let label = calc_label_from_name("attempt");
    data.start_span(label).unwrap();
    data.draw_integer(Some(0), Some(9)).unwrap();
    data.stop_span_with(true).unwrap();
    data.start_span(label).unwrap();
    data.draw_integer(Some(0), Some(9)).unwrap();
    data.stop_span().unwrap();
    let result = data.conclude(Outcome::Valid).unwrap();
    let discarded: Vec<bool> = result.spans.iter().skip(1).map(|span| span.discarded).collect();
    assert_eq!(discarded, vec![true, false]);
}

// === USAGE ERRORS ===

#[test]
fn unmatched_stop_span_fails_immediately() {
    let mut data = ConjectureData::for_choices(Vec::new(), 10);
    assert_eq!(data.stop_span(), Err(DrawError::Usage(UsageError::UnmatchedStopSpan)));
    assert_eq!(data.conclude(Outcome::Valid).unwrap_err(), UsageError::UnmatchedStopSpan);
}

#[test]
fn drawing_after_conclusion_is_refused() {
    let mut data = ConjectureData::for_choices(Vec::new(), 10);
    data.conclude(Outcome::Valid).unwrap();
    assert!(data.is_frozen());
    assert_eq!(data.draw_boolean(0.5), Err(DrawError::Usage(UsageError::Frozen)));
    assert_eq!(data.conclude(Outcome::Valid).unwrap_err(), UsageError::Frozen);
}

#[test]
fn inverted_bounds_are_a_usage_error() {
    let mut data = ConjectureData::for_choices(Vec::new(), 10);
    match data.draw_integer(Some(5), Some(1)) {
        Err(DrawError::Usage(UsageError::InvalidConstraints { choice_type, .. })) => {
            assert_eq!(choice_type, ChoiceType::Integer)
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        data.conclude(Outcome::Valid),
        Err(UsageError::InvalidConstraints { .. })
    ));
}

#[test]
fn forced_values_must_be_permitted() {
    let mut data = ConjectureData::for_choices(Vec::new(), 10);
    assert_eq!(
        data.draw_boolean_with(0.0, Some(true)),
        Err(DrawError::Usage(UsageError::ForcedNotPermitted {
            value: "true".to_string()
        }))
    );
}

#[test]
fn spans_may_not_leak_out_of_a_scope() {
    let mut data = ConjectureData::for_choices(Vec::new(), 10);
    let outer = calc_label_from_name("outer");
    let inner = calc_label_from_name("inner");
    let result = data.span(outer, |data| data.start_span(inner));
    assert_eq!(
        result,
        Err(DrawError::Usage(UsageError::InterleavedSpans { expected: 1, found: 2 }))
    );
}

#[test]
fn open_spans_are_tolerated_for_rejected_cases() {
    let mut data = ConjectureData::for_choices(Vec::new(), 10);
    data.start_span(calc_label_from_name("open")).unwrap();
    assert_eq!(data.depth(), 1);
    let result = data.conclude(Outcome::Invalid).unwrap();
    assert_eq!(result.status, Status::Invalid);
}

// === BUDGETS AND MISALIGNMENT ===

#[test]
fn overrun_concludes_as_overflow() {
    let mut data = ConjectureData::for_choices(Vec::new(), 2);
    data.draw_boolean(0.5).unwrap();
    data.draw_boolean(0.5).unwrap();
    assert_eq!(data.draw_boolean(0.5), Err(DrawError::Overrun { max_choices: 2 }));
    assert!(matches!(data.draw_integer(None, None), Err(DrawError::Overrun { .. })));
    let result = data.conclude(Outcome::interesting("ignored")).unwrap();
    assert_eq!(result.status, Status::Overflow);
    assert_eq!(result.interesting_origin, None);
    assert_eq!(result.len(), 2);
}

#[test]
fn misaligned_replay_falls_back_to_simplest() {
    let mut data = ConjectureData::for_choices(vec![ChoiceValue::Boolean(true), ChoiceValue::Integer(4)], 10);
    assert_eq!(data.draw_integer(Some(3), Some(9)).unwrap(), 3);
    assert_eq!(data.draw_integer(Some(3), Some(9)).unwrap(), 4);
    assert_eq!(data.draw_boolean(0.5).unwrap(), false);
    let result = data.conclude(Outcome::Valid).unwrap();
    assert_eq!(result.misaligned_at, Some(0));
    assert_eq!(
        result.choices(),
        vec![ChoiceValue::Integer(3), ChoiceValue::Integer(4), ChoiceValue::Boolean(false)]
    );
}

#[test]
fn notes_are_kept_on_the_result() {
    let mut data = ConjectureData::for_choices(Vec::new(), 10);
    data.note("first");
    data.note(format!("second {}", 2));
    let result = data.conclude(Outcome::Valid).unwrap();
    assert_eq!(result.notes, vec!["first".to_string(), "second 2".to_string()]);
}
