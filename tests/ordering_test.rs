//! # Ordering Test Suite
//!
//! Properties of the choice complexity order and of the shortlex order on
//! choice sequences, checked over randomly drawn values.
//!
//! ## Coverage
//!
//! - Index round trips and bijectivity for integers, booleans and floats
//! - Integers order by distance from `shrink_towards`
//! - Sequence keys: shorter is simpler, otherwise first difference decides
//! - Trichotomy and transitivity of the sequence order

use conjecture::choice::{choice_from_index, choice_key, choice_to_index, sort_key};
use conjecture::{
    BooleanConstraints, BytesConstraints, ChoiceNode, ChoiceValue, Constraints, FloatConstraints,
    IntegerConstraints, IntervalSet, PrimitiveProvider, RandomProvider, StringConstraints,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;
use std::collections::HashSet;

fn random_integer_constraints(rng: &mut ChaCha8Rng) -> IntegerConstraints {
    let min = if rng.gen_bool(0.5) { Some(rng.gen_range(-1_000..=0)) } else { None };
    let max = if rng.gen_bool(0.5) { Some(rng.gen_range(0..=1_000)) } else { None };
    let shrink_towards = rng.gen_range(-50..=50);
    IntegerConstraints::new(min, max).with_shrink_towards(shrink_towards)
}

fn random_constraints(rng: &mut ChaCha8Rng) -> Constraints {
    match rng.gen_range(0..5) {
        0 => Constraints::Integer(random_integer_constraints(rng)),
        1 => Constraints::Boolean(BooleanConstraints::new(rng.gen_range(0.1..0.9))),
        2 => Constraints::Float(FloatConstraints::default()),
        3 => Constraints::String(StringConstraints::new(IntervalSet::from_chars("abcxyz"), 0, 6)),
        _ => Constraints::Bytes(BytesConstraints::new(0, 6)),
    }
}

fn random_nodes(rng: &mut ChaCha8Rng, provider: &mut RandomProvider) -> Vec<ChoiceNode> {
    let len = rng.gen_range(0..6);
    (0..len)
        .map(|index| {
            let constraints = random_constraints(rng);
            let value = provider.draw(&constraints);
            ChoiceNode::new(value, constraints, false, index)
        })
        .collect()
}

// === CHOICE INDICES ===

#[test]
fn integer_indices_round_trip() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let mut provider = RandomProvider::new(2);
    for _ in 0..500 {
        let constraints = Constraints::Integer(random_integer_constraints(&mut rng));
        let value = provider.draw(&constraints);
        let index = choice_to_index(&value, &constraints).unwrap();
        assert_eq!(choice_from_index(index, &constraints), Some(value), "{:?}", constraints);
    }
}

#[test]
fn bounded_integers_index_without_gaps() {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    for _ in 0..50 {
        let min = rng.gen_range(-40..=0);
        let max = rng.gen_range(0..=40);
        let shrink_towards = rng.gen_range(-60..=60);
        let constraints = Constraints::Integer(IntegerConstraints::bounded(min, max).with_shrink_towards(shrink_towards));
        let indices: HashSet<u128> = (min..=max)
            .map(|v| choice_to_index(&ChoiceValue::Integer(v), &constraints).unwrap())
            .collect();
        let count = (max - min + 1) as u128;
        assert_eq!(indices, (0..count).collect::<HashSet<u128>>(), "{:?}", constraints);
        assert_eq!(choice_from_index(0, &constraints), Some(constraints.simplest()));
        assert_eq!(choice_from_index(count, &constraints), None);
    }
}

#[test]
fn integers_closer_to_the_target_are_simpler() {
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    for _ in 0..200 {
        let shrink_towards = rng.gen_range(-1_000..=1_000);
        let constraints = Constraints::Integer(IntegerConstraints::default().with_shrink_towards(shrink_towards));
        let near = rng.gen_range(0..1_000i128);
        let far = near + rng.gen_range(1..1_000i128);
        for sign in [1, -1] {
            let a = ChoiceValue::Integer(shrink_towards + sign * near);
            let b = ChoiceValue::Integer(shrink_towards + sign * far);
            assert!(choice_to_index(&a, &constraints) < choice_to_index(&b, &constraints));
        }
    }
}

#[test]
fn booleans_order_false_first_unless_pinned() {
    let free = Constraints::Boolean(BooleanConstraints::new(0.5));
    assert_eq!(choice_to_index(&ChoiceValue::Boolean(false), &free), Some(0));
    assert_eq!(choice_to_index(&ChoiceValue::Boolean(true), &free), Some(1));
    let pinned = Constraints::Boolean(BooleanConstraints::new(1.0));
    assert_eq!(choice_to_index(&ChoiceValue::Boolean(true), &pinned), Some(0));
    assert_eq!(choice_from_index(0, &pinned), Some(ChoiceValue::Boolean(true)));
    assert_eq!(choice_from_index(1, &pinned), None);
}

#[test]
fn float_indices_round_trip_bitwise() {
    let mut rng = ChaCha8Rng::seed_from_u64(5);
    let constraints = Constraints::Float(FloatConstraints::default());
    let specials = [0.0, -0.0, 1.0, -1.0, 0.5, f64::INFINITY, f64::NEG_INFINITY, f64::MIN_POSITIVE];
    let random = (0..500).map(|_| f64::from_bits(rng.gen::<u64>())).filter(|f| !f.is_nan());
    for value in specials.iter().copied().chain(random) {
        let value = ChoiceValue::Float(value);
        let index = choice_to_index(&value, &constraints).unwrap();
        assert_eq!(choice_from_index(index, &constraints), Some(value));
    }
}

#[test]
fn integral_floats_are_simpler_than_fractions() {
    let constraints = Constraints::Float(FloatConstraints::default());
    let index = |f: f64| choice_to_index(&ChoiceValue::Float(f), &constraints).unwrap();
    assert!(index(0.0) < index(1.0));
    assert!(index(2.0) < index(1.5));
    assert!(index(1_000_000.0) < index(0.5));
    assert!(index(3.0) < index(-3.0));
    assert!(index(-0.0) > index(1e300));
}

#[test]
fn float_simplest_comes_first_in_the_order() {
    let mut rng = ChaCha8Rng::seed_from_u64(12);
    for _ in 0..200 {
        let a = rng.gen_range(-50.0..50.0) * 10f64.powi(rng.gen_range(-3..3));
        let width = rng.gen_range(0.0..1.0) * 10f64.powi(rng.gen_range(-4..2));
        let bounds = FloatConstraints::bounded(a, a + width);
        let constraints = Constraints::Float(bounds);
        let simplest = bounds.simplest();
        assert!(bounds.permits(simplest), "{:?} not permitted by {:?}", simplest, bounds);
        let best = choice_to_index(&ChoiceValue::Float(simplest), &constraints).unwrap();
        for step in 0..=200 {
            let value = a + width * f64::from(step) / 200.0;
            if !bounds.permits(value) {
                continue;
            }
            let index = choice_to_index(&ChoiceValue::Float(value), &constraints).unwrap();
            assert!(best <= index, "{} is simpler than {} in {:?}", value, simplest, bounds);
        }
    }
}

// === SEQUENCE ORDER ===

#[test]
fn shorter_sequences_are_simpler() {
    let mut rng = ChaCha8Rng::seed_from_u64(6);
    let mut provider = RandomProvider::new(7);
    for _ in 0..300 {
        let a = random_nodes(&mut rng, &mut provider);
        let b = random_nodes(&mut rng, &mut provider);
        if a.len() != b.len() {
            assert_eq!(sort_key(&a).cmp(&sort_key(&b)), a.len().cmp(&b.len()));
        }
    }
}

#[test]
fn equal_lengths_compare_at_the_first_difference() {
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let mut provider = RandomProvider::new(9);
    for _ in 0..300 {
        let a = random_nodes(&mut rng, &mut provider);
        let mut b = a.clone();
        if b.is_empty() {
            continue;
        }
        let position = rng.gen_range(0..b.len());
        let constraints = b[position].constraints.clone();
        b[position] = ChoiceNode::new(provider.draw(&constraints), constraints, false, position);
        let expected = a[position].key().cmp(&b[position].key());
        assert_eq!(sort_key(&a).cmp(&sort_key(&b)), expected);
    }
}

#[test]
fn sequence_order_is_a_total_order() {
    let mut rng = ChaCha8Rng::seed_from_u64(10);
    let mut provider = RandomProvider::new(11);
    let keys: Vec<_> = (0..40).map(|_| sort_key(&random_nodes(&mut rng, &mut provider))).collect();
    for a in &keys {
        for b in &keys {
            let forward = a.cmp(b);
            assert_eq!(forward, b.cmp(a).reverse());
            assert_eq!(forward == Ordering::Equal, a == b);
            for c in &keys {
                if a <= b && b <= c {
                    assert!(a <= c);
                }
            }
        }
    }
}

#[test]
fn collection_keys_order_by_size_then_elements() {
    let constraints = Constraints::String(StringConstraints::new(IntervalSet::from_chars("abc"), 1, 5));
    let key = |s: &str| choice_key(&ChoiceValue::String(s.to_string()), &constraints);
    assert!(key("a") < key("aa"));
    assert!(key("c") < key("aa"));
    assert!(key("ab") < key("ba"));
    assert_eq!(key("a").primary, 0);

    let constraints = Constraints::Bytes(BytesConstraints::new(0, 4));
    let key = |b: &[u8]| choice_key(&ChoiceValue::Bytes(b.to_vec()), &constraints);
    assert!(key(&[]) < key(&[0]));
    assert!(key(&[255]) < key(&[0, 0]));
    assert!(key(&[1, 0]) < key(&[1, 1]));
}
